//! Who Am I? (RFC 4532, OID `1.3.6.1.4.1.4203.1.11.3`).
//!
//! Returns the server's view of the bound identity as an `authzId` string
//! (`dn:<DN>` for a simple bind, empty for anonymous), carried directly as
//! the extended response's `responseValue` with no further BER wrapping.

pub const OID: &str = "1.3.6.1.4.1.4203.1.11.3";

pub fn handle(bound_dn: &str) -> Vec<u8> {
    if bound_dn.is_empty() {
        Vec::new()
    } else {
        format!("dn:{}", bound_dn).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_identity_is_empty() {
        assert_eq!(handle(""), Vec::<u8>::new());
    }

    #[test]
    fn bound_identity_is_dn_prefixed() {
        assert_eq!(handle("cn=admin,dc=test"), b"dn:cn=admin,dc=test".to_vec());
    }
}
