//! Operation result structures.
//!
//! Every result-bearing response shares the `LDAPResult` triple of
//! `(resultCode, matchedDN, diagnosticMessage)` from RFC 4511 §4.1.9. This
//! module gives the result code a proper enum instead of a bare integer, so
//! handler code reads as intent rather than magic numbers.

use std::fmt;

/// Standard RFC 4511 result codes used by this server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Success = 0,
    OperationsError = 1,
    ProtocolError = 2,
    TimeLimitExceeded = 3,
    SizeLimitExceeded = 4,
    CompareFalse = 5,
    CompareTrue = 6,
    AuthMethodNotSupported = 7,
    StrongerAuthRequired = 8,
    NoSuchAttribute = 16,
    UndefinedAttributeType = 17,
    InappropriateMatching = 18,
    ConstraintViolation = 19,
    AttributeOrValueExists = 20,
    InvalidAttributeSyntax = 21,
    NoSuchObject = 32,
    InvalidDnSyntax = 34,
    InvalidCredentials = 49,
    InsufficientAccessRights = 50,
    Busy = 51,
    Unavailable = 52,
    UnwillingToPerform = 53,
    UnavailableCriticalExtension = 12,
    NamingViolation = 64,
    ObjectClassViolation = 65,
    NotAllowedOnNonLeaf = 66,
    EntryAlreadyExists = 68,
    AffectsMultipleDsas = 71,
    Other = 80,
}

impl ResultCode {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    /// Diagnostic name for logging; matches the RFC's own identifier.
    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::OperationsError => "operationsError",
            ResultCode::ProtocolError => "protocolError",
            ResultCode::TimeLimitExceeded => "timeLimitExceeded",
            ResultCode::SizeLimitExceeded => "sizeLimitExceeded",
            ResultCode::CompareFalse => "compareFalse",
            ResultCode::CompareTrue => "compareTrue",
            ResultCode::AuthMethodNotSupported => "authMethodNotSupported",
            ResultCode::StrongerAuthRequired => "strongerAuthRequired",
            ResultCode::NoSuchAttribute => "noSuchAttribute",
            ResultCode::UndefinedAttributeType => "undefinedAttributeType",
            ResultCode::InappropriateMatching => "inappropriateMatching",
            ResultCode::ConstraintViolation => "constraintViolation",
            ResultCode::AttributeOrValueExists => "attributeOrValueExists",
            ResultCode::InvalidAttributeSyntax => "invalidAttributeSyntax",
            ResultCode::NoSuchObject => "noSuchObject",
            ResultCode::InvalidDnSyntax => "invalidDNSyntax",
            ResultCode::InvalidCredentials => "invalidCredentials",
            ResultCode::InsufficientAccessRights => "insufficientAccessRights",
            ResultCode::Busy => "busy",
            ResultCode::Unavailable => "unavailable",
            ResultCode::UnwillingToPerform => "unwillingToPerform",
            ResultCode::UnavailableCriticalExtension => "unavailableCriticalExtension",
            ResultCode::NamingViolation => "namingViolation",
            ResultCode::ObjectClassViolation => "objectClassViolation",
            ResultCode::NotAllowedOnNonLeaf => "notAllowedOnNonLeaf",
            ResultCode::EntryAlreadyExists => "entryAlreadyExists",
            ResultCode::AffectsMultipleDsas => "affectsMultipleDSAs",
            ResultCode::Other => "other",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i64())
    }
}

/// Common components of an LDAP operation result, shared by every
/// result-bearing response variant.
#[derive(Clone, Debug)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic_message: String,
}

impl LdapResult {
    pub fn success() -> Self {
        LdapResult {
            code: ResultCode::Success,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
        }
    }

    pub fn new(code: ResultCode) -> Self {
        LdapResult {
            code,
            matched_dn: String::new(),
            diagnostic_message: String::new(),
        }
    }

    pub fn with_matched_dn(mut self, dn: impl Into<String>) -> Self {
        self.matched_dn = dn.into();
        self
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.diagnostic_message = msg.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == ResultCode::Success
    }
}
