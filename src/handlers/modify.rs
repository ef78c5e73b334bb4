//! Modify (RFC 4511 §4.6). Changes are applied in request order and must
//! be all-or-nothing; that atomicity lives in the backend implementation
//! (see `MemoryBackend::modify_entry`), not here.

use crate::backend::ModifyKind;
use crate::handlers::{backend_error_code, send, HandlerContext, OutboundSender, Session};
use crate::request::{ModifyOp, ModifyRequest};
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

fn to_modify_kind(op: &ModifyOp) -> ModifyKind {
    match op {
        ModifyOp::Add => ModifyKind::Add,
        ModifyOp::Delete => ModifyKind::Delete,
        ModifyOp::Replace => ModifyKind::Replace,
        ModifyOp::Increment => ModifyKind::Increment,
    }
}

pub async fn handle(ctx: &HandlerContext, session: &Session, message_id: i64, req: ModifyRequest, tx: &OutboundSender) {
    if session.is_anonymous() {
        send(tx, message_id, Response::Modify(LdapResult::new(ResultCode::InsufficientAccessRights)), vec![]);
        return;
    }
    let changes = req
        .changes
        .into_iter()
        .map(|c| (c.attribute, c.values, to_modify_kind(&c.operation)))
        .collect();
    let result = match ctx.backend.modify_entry(&req.dn, changes).await {
        Ok(()) => LdapResult::success(),
        Err(err) => LdapResult::new(backend_error_code(&err)).with_message(err.to_string()),
    };
    send(tx, message_id, Response::Modify(result), vec![]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Entry;
    use crate::backend_memory::MemoryBackend;
    use crate::controls_impl::PagedSearchManager;
    use crate::request::Change;
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
    async fn successful_modify_adds_attribute() {
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
            ModifyRequest {
                dn: "uid=a,dc=test".to_string(),
                changes: vec![Change {
                    operation: ModifyOp::Add,
                    attribute: "cn".to_string(),
                    values: vec![b"Alice".to_vec()],
                }],
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::Modify(r) => assert!(r.is_success()),
            _ => panic!(),
        }
        let entry = c.backend.get_entry("uid=a,dc=test").await.unwrap().unwrap();
        assert_eq!(entry.get("cn").unwrap(), &vec![b"Alice".to_vec()]);
    }
}
