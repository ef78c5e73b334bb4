//! Per-connection engine: read/dispatch/write loop, StartTLS in-place
//! upgrade, write-deadline enforcement, and abandon/teardown coordination.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{FutureExt, SinkExt, StreamExt};
use lber::StructureTag;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::abandon::AbandonRegistry;
use crate::codec::LdapCodec;
use crate::controls::Control;
use crate::exop_impl;
use crate::handlers::{self, HandlerContext, OutboundMessage, Session};
use crate::message::{encode_response, DecodeFailure, InboundMessage};
use crate::request::{ExtendedRequest, Request};
use crate::response::{ExtendedResponse, Response};
use crate::result::{LdapResult, ResultCode};
use crate::tls::MaybeTlsStream;

/// Entry point for the plain listener: StartTLS can still upgrade this
/// connection in place later.
pub async fn run(stream: TcpStream, ctx: Arc<HandlerContext>, tls_acceptor: Option<tokio_native_tls::TlsAcceptor>, shutdown: CancellationToken) {
    run_on_stream(MaybeTlsStream::Plain(stream), ctx, tls_acceptor, shutdown).await;
}

/// Entry point for a connection whose transport is already decided
/// (plaintext from the plain listener, or already-handshaken TLS from the
/// LDAPS listener).
pub async fn run_on_stream(stream: MaybeTlsStream, ctx: Arc<HandlerContext>, tls_acceptor: Option<tokio_native_tls::TlsAcceptor>, shutdown: CancellationToken) {
    let mut framed = Framed::new(stream, LdapCodec);
    let mut session = Session {
        bound_dn: String::new(),
        is_secure: matches!(framed.get_ref(), MaybeTlsStream::Tls(_)),
    };
    let abandon = Arc::new(AbandonRegistry::new());
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            outbound = rx.recv() => {
                let Some(msg) = outbound else { continue };
                if write_message(&mut framed, &msg, ctx.config.write_deadline_secs).await.is_err() {
                    break;
                }
            }
            frame = tokio::time::timeout(Duration::from_secs(ctx.config.read_deadline_secs), framed.next()) => {
                let frame = match frame {
                    Ok(Some(Ok(tag))) => tag,
                    Ok(Some(Err(_))) | Ok(None) | Err(_) => break,
                };
                match dispatch(frame, &ctx, &mut session, &abandon, &tx, &mut framed, tls_acceptor.as_ref()).await {
                    DispatchOutcome::Continue => {}
                    DispatchOutcome::Close => break,
                }
            }
        }
    }

    abandon.cancel_all_and_drain(Duration::from_secs(ctx.config.shutdown_grace_secs)).await;
}

enum DispatchOutcome {
    Continue,
    Close,
}

async fn dispatch(
    tag: StructureTag,
    ctx: &Arc<HandlerContext>,
    session: &mut Session,
    abandon: &Arc<AbandonRegistry>,
    tx: &handlers::OutboundSender,
    framed: &mut Framed<MaybeTlsStream, LdapCodec>,
    tls_acceptor: Option<&tokio_native_tls::TlsAcceptor>,
) -> DispatchOutcome {
    let msg = match InboundMessage::decode(tag, ctx.config.filter_max_depth) {
        Ok(m) => m,
        Err(DecodeFailure::Envelope(_)) => return DispatchOutcome::Close,
        Err(DecodeFailure::Operation { message_id, request_tag, error }) => {
            if let Some(resp) = crate::response::for_request_tag(request_tag, LdapResult::new(ResultCode::ProtocolError).with_message(error.to_string())) {
                handlers::send(tx, message_id, resp, vec![]);
            }
            return DispatchOutcome::Continue;
        }
    };
    let message_id = msg.message_id;
    let controls = msg.controls;

    match msg.request {
        Request::Unbind => return DispatchOutcome::Close,

        // Bind mutates the connection's identity, which the very next frame
        // read off the wire must observe; it can't be handed to a spawned
        // task without making `Session` itself shared and locked, so it
        // runs inline like StartTLS below. Still registered, so a bind
        // that never gets a response shows up in `abandon.pending_count()`.
        Request::Bind(req) => {
            let guard = abandon.register(message_id);
            let result = AssertUnwindSafe(handlers::bind::handle(ctx, session, message_id, req, tx))
                .catch_unwind()
                .await;
            drop(guard);
            if result.is_err() {
                handlers::send(tx, message_id, Response::Bind(LdapResult::new(ResultCode::OperationsError)), vec![]);
            }
        }

        Request::Add(req) => {
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::add::handle(&ctx, &session_snapshot, message_id, req, &tx)).catch_unwind().await;
            });
            return DispatchOutcome::Continue;
        }
        Request::Delete(dn) => {
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::delete::handle(&ctx, &session_snapshot, message_id, dn, &tx)).catch_unwind().await;
            });
            return DispatchOutcome::Continue;
        }
        Request::Modify(req) => {
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::modify::handle(&ctx, &session_snapshot, message_id, req, &tx)).catch_unwind().await;
            });
            return DispatchOutcome::Continue;
        }
        Request::ModifyDn(req) => {
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::modifydn::handle(&ctx, &session_snapshot, message_id, req, &tx)).catch_unwind().await;
            });
            return DispatchOutcome::Continue;
        }
        Request::Compare(req) => {
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::compare::handle(&ctx, &session_snapshot, message_id, req, &tx)).catch_unwind().await;
            });
            return DispatchOutcome::Continue;
        }

        Request::Search(req) => {
            let guard = abandon.register(message_id);
            let ctx = ctx.clone();
            let tx = tx.clone();
            let session_snapshot = Session {
                bound_dn: session.bound_dn.clone(),
                is_secure: session.is_secure,
            };
            tokio::spawn(async move {
                let cancel = guard.cancel.clone();
                let _guard = guard;
                let _ = AssertUnwindSafe(handlers::search::handle(&ctx, &session_snapshot, message_id, req, controls, &tx, cancel))
                    .catch_unwind()
                    .await;
            });
            return DispatchOutcome::Continue;
        }

        Request::Abandon(target_id) => {
            abandon.handle(target_id);
        }

        Request::Extended(req) => {
            if req.oid == exop_impl::OID_START_TLS {
                return handle_start_tls(ctx, session, message_id, tx, framed, tls_acceptor, abandon).await;
            }
            let (guard, ctx, session_snapshot, tx) = spawn_prelude(abandon, ctx, session, tx, message_id);
            let abandon = abandon.clone();
            tokio::spawn(async move {
                let _guard = guard;
                let _ = AssertUnwindSafe(handle_extended(&ctx, &session_snapshot, &abandon, message_id, req, &tx))
                    .catch_unwind()
                    .await;
            });
            return DispatchOutcome::Continue;
        }
    }
    DispatchOutcome::Continue
}

/// Register `message_id` in `abandon` and hand back everything a spawned
/// handler task needs as owned values: the guard, a cloned `ctx`, a
/// point-in-time snapshot of the session, and a cloned outbound sender. The
/// same shape `Request::Search` already uses, factored out so every other
/// non-Unbind request can be dispatched onto its own task too.
fn spawn_prelude(
    abandon: &Arc<AbandonRegistry>,
    ctx: &Arc<HandlerContext>,
    session: &Session,
    tx: &handlers::OutboundSender,
    message_id: i64,
) -> (crate::abandon::PendingGuard, Arc<HandlerContext>, Session, handlers::OutboundSender) {
    let guard = abandon.register(message_id);
    let session_snapshot = Session {
        bound_dn: session.bound_dn.clone(),
        is_secure: session.is_secure,
    };
    (guard, ctx.clone(), session_snapshot, tx.clone())
}

async fn handle_extended(
    ctx: &Arc<HandlerContext>,
    session: &Session,
    abandon: &Arc<AbandonRegistry>,
    message_id: i64,
    req: ExtendedRequest,
    tx: &handlers::OutboundSender,
) {
    let response = if req.oid == exop_impl::OID_WHO_AM_I {
        ExtendedResponse {
            result: LdapResult::success(),
            name: Some(exop_impl::OID_WHO_AM_I.to_string()),
            value: Some(exop_impl::whoami::handle(&session.bound_dn)),
        }
    } else if req.oid == exop_impl::OID_CANCEL {
        let outcome = req
            .value
            .as_deref()
            .ok_or_else(|| "cancel request missing value".to_string())
            .and_then(|v| exop_impl::cancel::decode_cancel_id(v).map_err(|e| e.to_string()));
        match outcome {
            Ok(cancel_id) => ExtendedResponse {
                result: LdapResult::new(exop_impl::cancel::handle(abandon, cancel_id)),
                name: None,
                value: None,
            },
            Err(msg) => ExtendedResponse {
                result: LdapResult::new(ResultCode::ProtocolError).with_message(msg),
                name: None,
                value: None,
            },
        }
    } else if req.oid == exop_impl::OID_PASSWORD_MODIFY {
        let decoded = exop_impl::passmod::PasswordModifyRequest::decode(req.value.as_deref().unwrap_or(&[]));
        match decoded {
            Ok(pm_req) => {
                let outcome = exop_impl::passmod::handle(ctx.backend.as_ref(), &session.bound_dn, pm_req).await;
                ExtendedResponse {
                    result: LdapResult::new(outcome.result).with_message(outcome.message),
                    name: None,
                    value: exop_impl::passmod::encode_response_value(&outcome.generated_passwd),
                }
            }
            Err(err) => ExtendedResponse {
                result: LdapResult::new(ResultCode::ProtocolError).with_message(err.to_string()),
                name: None,
                value: None,
            },
        }
    } else {
        ExtendedResponse {
            result: LdapResult::new(ResultCode::ProtocolError).with_message(format!("unsupported extended operation {}", req.oid)),
            name: None,
            value: None,
        }
    };
    handlers::send(tx, message_id, Response::Extended(response), vec![]);
}

async fn handle_start_tls(
    ctx: &Arc<HandlerContext>,
    session: &mut Session,
    message_id: i64,
    tx: &handlers::OutboundSender,
    framed: &mut Framed<MaybeTlsStream, LdapCodec>,
    tls_acceptor: Option<&tokio_native_tls::TlsAcceptor>,
    abandon: &Arc<AbandonRegistry>,
) -> DispatchOutcome {
    let preconditions = crate::exop_impl::starttls::check_preconditions(
        tls_acceptor.is_some(),
        session.is_secure,
        abandon.pending_count(),
    );
    if let Err(err) = preconditions {
        handlers::send(
            tx,
            message_id,
            Response::Extended(ExtendedResponse {
                result: LdapResult::new(err.result_code()),
                name: Some(exop_impl::OID_START_TLS.to_string()),
                value: None,
            }),
            vec![],
        );
        return DispatchOutcome::Continue;
    }

    let ok = encode_response(
        message_id,
        &Response::Extended(ExtendedResponse {
            result: LdapResult::success(),
            name: Some(exop_impl::OID_START_TLS.to_string()),
            value: None,
        }),
        &[],
    );
    if framed.send(ok).await.is_err() {
        return DispatchOutcome::Close;
    }

    let acceptor = tls_acceptor.expect("checked by check_preconditions");
    let taken = std::mem::take(framed.get_mut());
    let plain = match taken {
        MaybeTlsStream::Plain(s) => s,
        MaybeTlsStream::Tls(_) | MaybeTlsStream::Empty => unreachable!("already checked not secure"),
    };
    match acceptor.accept(plain).await {
        Ok(tls) => {
            *framed = Framed::new(MaybeTlsStream::Tls(Box::new(tls)), LdapCodec);
            session.is_secure = true;
            session.bound_dn.clear();
            DispatchOutcome::Continue
        }
        Err(_) => DispatchOutcome::Close,
    }
}

async fn write_message(framed: &mut Framed<MaybeTlsStream, LdapCodec>, msg: &OutboundMessage, write_deadline_secs: u64) -> Result<(), ()> {
    let controls: Vec<Control> = msg.controls.clone();
    let envelope = encode_response(msg.message_id, &msg.response, &controls);
    tokio::time::timeout(Duration::from_secs(write_deadline_secs), framed.send(envelope))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())
}
