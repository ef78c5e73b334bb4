//! Per-operation request handlers (RFC 4511 §4.2-4.14). Each handler is a
//! free function taking the shared [`HandlerContext`], the per-connection
//! [`Session`], and the decoded request; it pushes zero or more responses
//! onto `tx` rather than returning them, since a persistent search needs to
//! keep pushing long after its handler call would otherwise have returned.

pub mod add;
pub mod bind;
pub mod compare;
pub mod delete;
pub mod modify;
pub mod modifydn;
pub mod search;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::Config;
use crate::controls::Control;
use crate::controls_impl::PagedSearchManager;
use crate::error::{BackendError, BackendErrorKind};
use crate::response::Response;
use crate::result::ResultCode;

/// Per-connection, mutable across requests.
pub struct Session {
    pub bound_dn: String,
    pub is_secure: bool,
}

impl Session {
    pub fn anonymous() -> Session {
        Session {
            bound_dn: String::new(),
            is_secure: false,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.bound_dn.is_empty()
    }
}

/// Shared, connection-independent collaborators every handler needs.
pub struct HandlerContext {
    pub backend: Arc<dyn Backend>,
    pub config: Arc<Config>,
    pub paged: Arc<PagedSearchManager>,
    pub naming_contexts: Vec<String>,
}

pub struct OutboundMessage {
    pub message_id: i64,
    pub response: Response,
    pub controls: Vec<Control>,
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundMessage>;

pub fn send(tx: &OutboundSender, message_id: i64, response: Response, controls: Vec<Control>) {
    let _ = tx.send(OutboundMessage {
        message_id,
        response,
        controls,
    });
}

/// Handed to handlers that run as long-lived background tasks (persistent
/// search); cancelled by Abandon/Cancel or connection teardown.
pub type HandlerCancellation = CancellationToken;

/// Map a backend error onto the closest RFC 4511 result code. Backends that
/// only ever return `Other` still get a sensible code via `classify()`.
pub fn backend_error_code(err: &BackendError) -> ResultCode {
    match err.classify() {
        BackendErrorKind::NotFound => ResultCode::NoSuchObject,
        BackendErrorKind::AlreadyExists => ResultCode::EntryAlreadyExists,
        BackendErrorKind::InvalidDn => ResultCode::InvalidDnSyntax,
        BackendErrorKind::SchemaViolation => ResultCode::ObjectClassViolation,
        BackendErrorKind::NoSuchAttribute => ResultCode::NoSuchAttribute,
        BackendErrorKind::AttributeOrValueExists => ResultCode::AttributeOrValueExists,
        BackendErrorKind::Other => ResultCode::OperationsError,
    }
}
