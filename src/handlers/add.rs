//! Add (RFC 4511 §4.7). Requires a non-empty `objectClass` attribute;
//! everything else is delegated to the backend.

use crate::backend::Entry;
use crate::handlers::{backend_error_code, send, HandlerContext, OutboundSender, Session};
use crate::request::AddRequest;
use crate::response::Response;
use crate::result::{LdapResult, ResultCode};

pub async fn handle(ctx: &HandlerContext, session: &Session, message_id: i64, req: AddRequest, tx: &OutboundSender) {
    if session.is_anonymous() {
        send(
            tx,
            message_id,
            Response::Add(LdapResult::new(ResultCode::InsufficientAccessRights)),
            vec![],
        );
        return;
    }

    let has_object_class = req
        .attributes
        .iter()
        .any(|(name, values)| name.eq_ignore_ascii_case("objectClass") && !values.is_empty());
    if !has_object_class {
        send(
            tx,
            message_id,
            Response::Add(LdapResult::new(ResultCode::ObjectClassViolation).with_message("objectClass is required")),
            vec![],
        );
        return;
    }

    let dn = req.dn.clone();
    let entry = Entry {
        dn: dn.clone(),
        attributes: req.attributes,
    };
    let result = match ctx.backend.add_entry(entry).await {
        Ok(()) => LdapResult::success(),
        Err(err) => {
            let code = backend_error_code(&err);
            let mut result = LdapResult::new(code).with_message(err.to_string());
            if code == ResultCode::NoSuchObject {
                result = result.with_matched_dn(ctx.backend.longest_existing_ancestor(&dn).await);
            }
            result
        }
    };
    send(tx, message_id, Response::Add(result), vec![]);
}
