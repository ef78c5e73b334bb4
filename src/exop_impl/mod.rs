//! Extended operation implementations, keyed by OID. [`crate::handlers`]
//! dispatches an `ExtendedRequest` here; an unrecognized OID is answered
//! with `protocolError` before reaching this module.

pub mod cancel;
pub mod passmod;
pub mod starttls;
pub mod whoami;

pub use cancel::OID as OID_CANCEL;
pub use passmod::OID as OID_PASSWORD_MODIFY;
pub use starttls::OID as OID_START_TLS;
pub use whoami::OID as OID_WHO_AM_I;
