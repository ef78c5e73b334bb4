//! Layered error types. The BER layer never panics; this layer adds the
//! connection-fatal and backend-facing kinds on top of it.

use std::io;

use lber::BerError;
use thiserror::Error;

/// Connection-fatal errors surfaced by the framing and dispatch loop.
///
/// Anything reaching the connection loop as `LdapError` closes the socket;
/// operation-level failures never produce one of these, they produce a
/// result code instead (see [`crate::result::ResultCode`]).
#[derive(Error, Debug)]
pub enum LdapError {
    #[error("BER decode error: {0}")]
    Codec(#[from] BerError),
    #[error("truncated message")]
    Truncated,
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Errors returned by a [`crate::backend::Backend`] implementation.
///
/// Handlers map these onto RFC 4511 result codes per the contracts in
/// each handler module. `Other` carries a free-text message that handlers
/// fall back to classifying by substring when a backend doesn't use one of
/// the more specific variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("entry not found")]
    NotFound,
    #[error("entry already exists")]
    AlreadyExists,
    #[error("invalid DN: {0}")]
    InvalidDn(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("no such attribute: {0}")]
    NoSuchAttribute(String),
    #[error("attribute or value exists: {0}")]
    AttributeOrValueExists(String),
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Best-effort classification for backends that only ever return
    /// `Other`, so handlers written against the typed variants still work
    /// against a third-party backend that doesn't use them.
    pub fn classify(&self) -> BackendErrorKind {
        match self {
            BackendError::NotFound => BackendErrorKind::NotFound,
            BackendError::AlreadyExists => BackendErrorKind::AlreadyExists,
            BackendError::InvalidDn(_) => BackendErrorKind::InvalidDn,
            BackendError::SchemaViolation(_) => BackendErrorKind::SchemaViolation,
            BackendError::NoSuchAttribute(_) => BackendErrorKind::NoSuchAttribute,
            BackendError::AttributeOrValueExists(_) => BackendErrorKind::AttributeOrValueExists,
            BackendError::Other(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("no such attribute") {
                    BackendErrorKind::NoSuchAttribute
                } else if lower.contains("attribute or value exists") {
                    BackendErrorKind::AttributeOrValueExists
                } else if lower.contains("not found") || lower.contains("no such") {
                    BackendErrorKind::NotFound
                } else if lower.contains("already exists") || lower.contains("duplicate") {
                    BackendErrorKind::AlreadyExists
                } else if lower.contains("invalid dn") || lower.contains("bad dn") {
                    BackendErrorKind::InvalidDn
                } else if lower.contains("objectclass") || lower.contains("schema") {
                    BackendErrorKind::SchemaViolation
                } else {
                    BackendErrorKind::Other
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendErrorKind {
    NotFound,
    AlreadyExists,
    InvalidDn,
    SchemaViolation,
    NoSuchAttribute,
    AttributeOrValueExists,
    Other,
}
