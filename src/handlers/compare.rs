//! Compare (RFC 4511 §4.10). Value equality is plain ASCII
//! case-insensitive octet comparison; there's no schema here to supply a
//! real matching rule.

use crate::handlers::{backend_error_code, send, HandlerContext, OutboundSender, Session};
use crate::request::CompareRequest;
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

fn ci_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

pub async fn handle(ctx: &HandlerContext, session: &Session, message_id: i64, req: CompareRequest, tx: &OutboundSender) {
    if session.is_anonymous() {
        send(tx, message_id, Response::Compare(LdapResult::new(ResultCode::InsufficientAccessRights)), vec![]);
        return;
    }
    let entry = match ctx.backend.get_entry(&req.dn).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            let matched_dn = ctx.backend.longest_existing_ancestor(&req.dn).await;
            send(
                tx,
                message_id,
                Response::Compare(LdapResult::new(ResultCode::NoSuchObject).with_matched_dn(matched_dn)),
                vec![],
            );
            return;
        }
        Err(err) => {
            send(
                tx,
                message_id,
                Response::Compare(LdapResult::new(backend_error_code(&err)).with_message(err.to_string())),
                vec![],
            );
            return;
        }
    };
    let code = match entry.get(&req.attribute) {
        None => ResultCode::NoSuchAttribute,
        Some(values) if values.iter().any(|v| ci_eq(v, &req.value)) => ResultCode::CompareTrue,
        Some(_) => ResultCode::CompareFalse,
    };
    send(tx, message_id, Response::Compare(LdapResult::new(code)), vec![]);
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
    async fn compare_true_and_false() {
        let c = ctx();
        c.backend
            .add_entry(Entry {
                dn: "dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        let mut entry = Entry {
            dn: "uid=a,dc=test".to_string(),
            attributes: vec![],
        };
        entry.set("cn", vec![b"Alice".to_vec()]);
        c.backend.add_entry(entry).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &bound_session(),
            1,
            CompareRequest {
                dn: "uid=a,dc=test".to_string(),
                attribute: "cn".to_string(),
                value: b"alice".to_vec(),
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::Compare(r) => assert_eq!(r.code, ResultCode::CompareTrue),
            _ => panic!(),
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &bound_session(),
            2,
            CompareRequest {
                dn: "uid=a,dc=test".to_string(),
                attribute: "cn".to_string(),
                value: b"bob".to_vec(),
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::Compare(r) => assert_eq!(r.code, ResultCode::CompareFalse),
            _ => panic!(),
        }
    }

    #[tokio::test]
    async fn compare_against_absent_attribute_is_no_such_attribute() {
        let c = ctx();
        c.backend
            .add_entry(Entry {
                dn: "dc=test".to_string(),
                attributes: vec![],
            })
            .await
            .unwrap();
        let mut entry = Entry {
            dn: "uid=a,dc=test".to_string(),
            attributes: vec![],
        };
        entry.set("cn", vec![b"Alice".to_vec()]);
        c.backend.add_entry(entry).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &bound_session(),
            1,
            CompareRequest {
                dn: "uid=a,dc=test".to_string(),
                attribute: "mail".to_string(),
                value: b"alice@example.com".to_vec(),
            },
            &tx,
        )
        .await;
        match rx.recv().await.unwrap().response {
            Response::Compare(r) => assert_eq!(r.code, ResultCode::NoSuchAttribute),
            _ => panic!(),
        }
    }
}
