//! Request/response controls (RFC 4511 §4.1.11): an OID, a criticality
//! flag, and an opaque value that individual control implementations
//! further decode. The generic envelope lives here; per-control semantics
//! live in [`crate::controls_impl`].

use lber::structures::{ASNTag, Boolean, OctetString, Sequence, Tag};
use lber::{StructureTag, TagClass};

use crate::error::LdapError;

pub const OID_PAGED_RESULTS: &str = "1.2.840.113556.1.4.319";
pub const OID_SORT_REQUEST: &str = "1.2.840.113556.1.4.473";
pub const OID_SORT_RESPONSE: &str = "1.2.840.113556.1.4.474";
pub const OID_PERSISTENT_SEARCH: &str = "2.16.840.1.113730.3.4.3";
pub const OID_ENTRY_CHANGE_NOTIFICATION: &str = "2.16.840.1.113730.3.4.7";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub criticality: bool,
    pub value: Vec<u8>,
}

impl Control {
    pub fn new(oid: impl Into<String>, criticality: bool, value: Vec<u8>) -> Self {
        Control {
            oid: oid.into(),
            criticality,
            value,
        }
    }

    pub fn decode(tag: StructureTag) -> Result<Control, LdapError> {
        let mut inner = tag
            .expect_constructed()
            .ok_or_else(|| LdapError::Protocol("control must be constructed".to_string()))?;
        inner.reverse();
        let oid = inner
            .pop()
            .and_then(|t| t.expect_primitive())
            .and_then(|b| String::from_utf8(b).ok())
            .ok_or_else(|| LdapError::Protocol("control missing OID".to_string()))?;
        let mut criticality = false;
        let mut value = Vec::new();
        if let Some(next) = inner.pop() {
            if next.id == lber::universal::Types::Boolean as u64 {
                criticality = next.expect_primitive().map(|b| b.first() == Some(&0xff)).unwrap_or(false);
                if let Some(val_tag) = inner.pop() {
                    value = val_tag.expect_primitive().unwrap_or_default();
                }
            } else {
                value = next.expect_primitive().unwrap_or_default();
            }
        }
        Ok(Control { oid, criticality, value })
    }

    pub fn encode(&self) -> Tag {
        let mut inner = vec![Tag::OctetString(OctetString {
            inner: self.oid.clone().into_bytes(),
            ..Default::default()
        })];
        if self.criticality {
            inner.push(Tag::Boolean(Boolean {
                inner: true,
                ..Default::default()
            }));
        }
        if !self.value.is_empty() {
            inner.push(Tag::OctetString(OctetString {
                inner: self.value.clone(),
                ..Default::default()
            }));
        }
        Tag::Sequence(Sequence {
            inner,
            ..Default::default()
        })
    }
}

/// Decode the `[0] Controls OPTIONAL` sequence attached to an LDAPMessage.
pub fn decode_controls(tag: StructureTag) -> Result<Vec<Control>, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("controls sequence must be constructed".to_string()))?;
    children.into_iter().map(Control::decode).collect()
}

pub fn encode_controls(controls: &[Control]) -> StructureTag {
    Tag::Sequence(Sequence {
        id: 0,
        class: TagClass::Context,
        inner: controls.iter().map(Control::encode).collect(),
    })
    .into_structure()
}
