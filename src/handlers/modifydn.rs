//! Modify DN (RFC 4511 §4.9), covering both rename-in-place and the
//! optional `newSuperior` move.

use crate::handlers::{backend_error_code, send, HandlerContext, OutboundSender, Session};
use crate::request::ModifyDnRequest;
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

pub async fn handle(ctx: &HandlerContext, session: &Session, message_id: i64, req: ModifyDnRequest, tx: &OutboundSender) {
    if session.is_anonymous() {
        send(tx, message_id, Response::ModifyDn(LdapResult::new(ResultCode::InsufficientAccessRights)), vec![]);
        return;
    }
    let result = match ctx
        .backend
        .modify_dn(&req.dn, &req.new_rdn, req.delete_old_rdn, req.new_superior.as_deref())
        .await
    {
        Ok(()) => LdapResult::success(),
        Err(err) => {
            let code = if matches!(err, crate::error::BackendError::SchemaViolation(_)) {
                ResultCode::NotAllowedOnNonLeaf
            } else {
                backend_error_code(&err)
            };
            let mut result = LdapResult::new(code).with_message(err.to_string());
            if code == ResultCode::NoSuchObject {
                result = result.with_matched_dn(ctx.backend.longest_existing_ancestor(&req.dn).await);
            }
            result
        }
    };
    send(tx, message_id, Response::ModifyDn(result), vec![]);
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
    async fn rename_moves_entry_under_new_rdn() {
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
        handle(
            &c,
            &bound_session(),
            1,
            ModifyDnRequest {
                dn: "uid=a,dc=test".to_string(),
                new_rdn: "uid=b".to_string(),
                delete_old_rdn: true,
                new_superior: None,
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::ModifyDn(r) => assert!(r.is_success()),
            _ => panic!(),
        }
        assert!(c.backend.get_entry("uid=a,dc=test").await.unwrap().is_none());
        assert!(c.backend.get_entry("uid=b,dc=test").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn renaming_entry_with_children_is_rejected() {
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
                dn: "ou=people,dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        c.backend
            .add_entry(Entry {
                dn: "uid=a,ou=people,dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &bound_session(),
            1,
            ModifyDnRequest {
                dn: "ou=people,dc=test".to_string(),
                new_rdn: "ou=staff".to_string(),
                delete_old_rdn: true,
                new_superior: None,
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::ModifyDn(r) => assert_eq!(r.code, ResultCode::NotAllowedOnNonLeaf),
            _ => panic!(),
        }
    }
}
