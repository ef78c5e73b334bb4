//! Cancel (RFC 3909, OID `1.3.6.1.1.8`).
//!
//! Unlike Abandon, Cancel is acknowledged: the cancelled operation still
//! gets a response (`cancelled`), and the Cancel request itself gets its
//! own `ExtendedResponse`. Decoding is a single `cancelID INTEGER`, not
//! wrapped in a SEQUENCE.

use lber::parse::{ber_integer_to_i64, parse_tag_complete};

use crate::abandon::AbandonRegistry;
use crate::error::LdapError;
use crate::result::ResultCode;

pub const OID: &str = "1.3.6.1.1.8";

pub fn decode_cancel_id(value: &[u8]) -> Result<i64, LdapError> {
    let tag = parse_tag_complete(value).map_err(LdapError::from)?;
    let bytes = tag
        .expect_primitive()
        .ok_or_else(|| LdapError::Protocol("cancel request value must be a primitive INTEGER".to_string()))?;
    ber_integer_to_i64(&bytes).map_err(LdapError::from)
}

/// Per RFC 3909 §3: `noSuchOperation` if the id isn't known, `cancel`
/// succeeds (with `success`) once the target operation has been signalled.
pub fn handle(registry: &AbandonRegistry, cancel_id: i64) -> ResultCode {
    if registry.handle(cancel_id) {
        ResultCode::Success
    } else {
        // RFC 3909 defines cancel-specific codes as private extensions;
        // noSuchOperation (119) isn't in our core result code set, so this
        // server reports the closest standard code instead.
        ResultCode::OperationsError
    }
}
