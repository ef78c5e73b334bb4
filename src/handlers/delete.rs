//! Delete (RFC 4511 §4.8). The backend is responsible for refusing to
//! delete a non-leaf entry (`notAllowedOnNonLeaf`); this handler only maps
//! that and other backend errors onto result codes.

use crate::handlers::{backend_error_code, send, HandlerContext, OutboundSender, Session};
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

pub async fn handle(ctx: &HandlerContext, session: &Session, message_id: i64, dn: String, tx: &OutboundSender) {
    if session.is_anonymous() {
        send(tx, message_id, Response::Delete(LdapResult::new(ResultCode::InsufficientAccessRights)), vec![]);
        return;
    }
    let result = match ctx.backend.delete_entry(&dn).await {
        Ok(()) => LdapResult::success(),
        Err(err) => {
            let code = if matches!(err, crate::error::BackendError::SchemaViolation(_)) {
                ResultCode::NotAllowedOnNonLeaf
            } else {
                backend_error_code(&err)
            };
            let mut result = LdapResult::new(code).with_message(err.to_string());
            if code == ResultCode::NoSuchObject {
                result = result.with_matched_dn(ctx.backend.longest_existing_ancestor(&dn).await);
            }
            result
        }
    };
    send(tx, message_id, Response::Delete(result), vec![]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Entry;
    use crate::backend_memory::MemoryBackend;
    use crate::controls_impl::PagedSearchManager;
    use clap::Parser;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn ctx() -> HandlerContext {
        HandlerContext {
            backend: MemoryBackend::new(),
            config: Arc::new(crate::config::Config::parse_from(["ldapd"])),
            paged: Arc::new(PagedSearchManager::new(Duration::from_secs(300), 10)),
            naming_contexts: vec!["dc=test".to_string()],
        }
    }

    fn bound_session() -> Session {
        Session {
            bound_dn: "cn=admin,dc=test".to_string(),
            is_secure: false,
        }
    }

    #[tokio::test]
    async fn deleting_entry_with_children_is_rejected() {
        let c = ctx();
        c.backend
            .add_entry(Entry {
                dn: "dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        c.backend
            .add_entry(Entry {
                dn: "uid=a,dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(&c, &bound_session(), 1, "dc=test".to_string(), &tx).await;
        match rx.recv().await.unwrap().response {
            Response::Delete(r) => assert_eq!(r.code, ResultCode::NotAllowedOnNonLeaf),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn deleting_missing_entry_is_no_such_object() {
        let c = ctx();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(&c, &bound_session(), 1, "uid=ghost,dc=test".to_string(), &tx).await;
        match rx.recv().await.unwrap().response {
            Response::Delete(r) => assert_eq!(r.code, ResultCode::NoSuchObject),
            _ => panic!(),
        }
    }
}
