//! The synthetic Root DSE entry served for a base-scope search against the
//! empty DN (RFC 4511 §5.1).

use crate::backend::Entry;
use crate::controls::{OID_PAGED_RESULTS, OID_PERSISTENT_SEARCH, OID_SORT_REQUEST};
use crate::exop_impl::{OID_CANCEL, OID_PASSWORD_MODIFY, OID_START_TLS, OID_WHO_AM_I};

pub fn root_dse(naming_contexts: &[String]) -> Entry {
    let str_values = |vals: &[&str]| vals.iter().map(|v| v.as_bytes().to_vec()).collect::<Vec<_>>();
    Entry {
        dn: String::new(),
        attributes: vec![
            ("objectClass".to_string(), str_values(&["top"])),
            ("supportedLDAPVersion".to_string(), str_values(&["3"])),
            (
                "namingContexts".to_string(),
                naming_contexts.iter().map(|c| c.as_bytes().to_vec()).collect(),
            ),
            (
                "supportedExtension".to_string(),
                str_values(&[OID_WHO_AM_I, OID_START_TLS, OID_CANCEL, OID_PASSWORD_MODIFY]),
            ),
            (
                "supportedControl".to_string(),
                str_values(&[OID_PAGED_RESULTS, OID_SORT_REQUEST, OID_PERSISTENT_SEARCH]),
            ),
            ("supportedFeatures".to_string(), vec![]),
            ("vendorName".to_string(), str_values(&["ldapd"])),
            ("vendorVersion".to_string(), str_values(&[env!("CARGO_PKG_VERSION")])),
        ],
    }
}
