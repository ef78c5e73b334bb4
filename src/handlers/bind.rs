//! Bind (RFC 4511 §4.2). Only simple authentication and anonymous bind are
//! supported; SASL mechanisms are a Non-goal.

use crate::handlers::{send, HandlerContext, OutboundSender, Session};
use crate::password::{self};
use crate::request::{Auth, BindRequest};
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

pub async fn handle(ctx: &HandlerContext, session: &mut Session, message_id: i64, req: BindRequest, tx: &OutboundSender) {
    if req.version != 3 {
        session.bound_dn = String::new();
        send(
            tx,
            message_id,
            Response::Bind(LdapResult::new(ResultCode::ProtocolError).with_message("only LDAPv3 is supported")),
            vec![],
        );
        return;
    }

    let Auth::Simple(password) = &req.auth;

    if req.name.is_empty() && password.is_empty() {
        session.bound_dn = String::new();
        send(tx, message_id, Response::Bind(LdapResult::success()), vec![]);
        return;
    }

    if password.is_empty() {
        // Unauthenticated bind (RFC 4513 §5.1.2): a non-empty name with an
        // empty password must not be treated as a successful simple bind.
        session.bound_dn = String::new();
        send(
            tx,
            message_id,
            Response::Bind(LdapResult::new(ResultCode::UnwillingToPerform).with_message("unauthenticated bind is not allowed")),
            vec![],
        );
        return;
    }

    let entry = match ctx.backend.get_entry(&req.name).await {
        Ok(Some(e)) => e,
        Ok(None) => {
            session.bound_dn = String::new();
            send(
                tx,
                message_id,
                Response::Bind(LdapResult::new(ResultCode::InvalidCredentials)),
                vec![],
            );
            return;
        }
        Err(err) => {
            session.bound_dn = String::new();
            send(
                tx,
                message_id,
                Response::Bind(LdapResult::new(ResultCode::OperationsError).with_message(err.to_string())),
                vec![],
            );
            return;
        }
    };

    let stored = entry.get("userPassword").and_then(|v| v.first()).and_then(|v| std::str::from_utf8(v).ok());
    let verified = match stored {
        Some(s) => password::verify(s, password).unwrap_or(false),
        None => false,
    };

    if verified {
        session.bound_dn = req.name.clone();
        send(tx, message_id, Response::Bind(LdapResult::success()), vec![]);
    } else {
        session.bound_dn = String::new();
        send(tx, message_id, Response::Bind(LdapResult::new(ResultCode::InvalidCredentials)), vec![]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Entry};
    use crate::backend_memory::MemoryBackend;
    use crate::controls_impl::PagedSearchManager;
    use crate::password::Scheme;
    use crate::request::Auth;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn ctx(backend: Arc<MemoryBackend>) -> HandlerContext {
        HandlerContext {
            backend,
            config: Arc::new({
                use clap::Parser;
                crate::config::Config::parse_from(["ldapd"])
            }),
            paged: Arc::new(PagedSearchManager::new(Duration::from_secs(300), 10)),
            naming_contexts: vec!["dc=test".to_string()],
        }
    }

    #[tokio::test]
    async fn anonymous_bind_succeeds() {
        let backend = MemoryBackend::new();
        let c = ctx(backend);
        let mut session = Session::anonymous();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &mut session,
            1,
            BindRequest {
                version: 3,
                name: String::new(),
                auth: Auth::Simple(vec![]),
            },
            &tx,
        )
        .await;
        let msg = rx.recv().await.unwrap();
        match msg.response {
            Response::Bind(r) => assert!(r.is_success()),
            _ => panic!(),
        }
        assert!(session.is_anonymous());
    }

    #[tokio::test]
    async fn simple_bind_with_correct_password_succeeds() {
        let backend = MemoryBackend::new();
        backend
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
        entry.set("userPassword", vec![password::encode(Scheme::Ssha, b"secret").into_bytes()]);
        backend.add_entry(entry).await.unwrap();
        let c = ctx(backend);
        let mut session = Session::anonymous();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &mut session,
            1,
            BindRequest {
                version: 3,
                name: "uid=a,dc=test".to_string(),
                auth: Auth::Simple(b"secret".to_vec()),
            },
            &tx,
        )
        .await;
        let msg = rx.recv().await.unwrap();
        match msg.response {
            Response::Bind(r) => assert!(r.is_success()),
            _ => panic!(),
        }
        assert_eq!(session.bound_dn, "uid=a,dc=test");
    }

    #[tokio::test]
    async fn wrong_password_leaves_session_anonymous() {
        let backend = MemoryBackend::new();
        backend
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
        entry.set("userPassword", vec![password::encode(Scheme::Ssha, b"secret").into_bytes()]);
        backend.add_entry(entry).await.unwrap();
        let c = ctx(backend);
        let mut session = Session::anonymous();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handle(
            &c,
            &mut session,
            1,
            BindRequest {
                version: 3,
                name: "uid=a,dc=test".to_string(),
                auth: Auth::Simple(b"wrong".to_vec()),
            },
            &tx,
        )
        .await;
        let msg = rx.recv().await.unwrap();
        match msg.response {
            Response::Bind(r) => assert_eq!(r.code, ResultCode::InvalidCredentials),
            _ => panic!(),
        }
        assert!(session.is_anonymous());
    }
}
