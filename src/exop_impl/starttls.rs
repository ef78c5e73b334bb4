//! StartTLS (RFC 4511 §4.14, OID `1.3.6.1.4.1.1466.20037`).
//!
//! The extended operation itself only negotiates the upgrade: the caller
//! sends a success `ExtendedResponse` with this OID as `responseName` over
//! the still-plaintext connection, then performs the actual handshake (see
//! [`crate::tls`]). This module only validates preconditions.

use crate::result::ResultCode;

pub const OID: &str = "1.3.6.1.4.1.1466.20037";

#[derive(Debug, PartialEq, Eq)]
pub enum StartTlsError {
    /// TLS isn't configured on this server at all.
    NotConfigured,
    /// The connection already completed a TLS handshake.
    AlreadySecure,
    /// Operations are still outstanding on the connection; RFC 4511 §4.14.2
    /// requires the client to let them finish (or abandon them) first.
    OperationsInProgress,
}

impl StartTlsError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            StartTlsError::NotConfigured => ResultCode::ProtocolError,
            StartTlsError::AlreadySecure => ResultCode::OperationsError,
            StartTlsError::OperationsInProgress => ResultCode::OperationsError,
        }
    }
}

pub fn check_preconditions(tls_configured: bool, already_secure: bool, pending_ops: usize) -> Result<(), StartTlsError> {
    if !tls_configured {
        return Err(StartTlsError::NotConfigured);
    }
    if already_secure {
        return Err(StartTlsError::AlreadySecure);
    }
    if pending_ops > 0 {
        return Err(StartTlsError::OperationsInProgress);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_when_not_configured() {
        assert_eq!(check_preconditions(false, false, 0), Err(StartTlsError::NotConfigured));
    }

    #[test]
    fn rejects_with_operations_outstanding() {
        assert_eq!(check_preconditions(true, false, 2), Err(StartTlsError::OperationsInProgress));
    }

    #[test]
    fn accepts_clean_plaintext_connection() {
        assert_eq!(check_preconditions(true, false, 0), Ok(()));
    }
}
