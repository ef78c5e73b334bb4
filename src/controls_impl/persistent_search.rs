//! Persistent Search (draft-ietf-ldapext-psearch, OID
//! `2.16.840.1.113730.3.4.3`), with the companion Entry Change
//! Notification response control (OID `2.16.840.1.113730.3.4.7`).
//!
//! A persistent search never terminates on its own: the initial
//! `SearchResultDone` is withheld, and the connection keeps streaming
//! `SearchResultEntry` responses as matching changes arrive on the
//! backend's change feed, until the client abandons the operation.

use lber::parse::{ber_integer_to_i64, parse_tag_complete};
use lber::structures::{ASNTag, Boolean, Enumerated, Integer, Sequence, Tag};
use lber::StructureTag;

use crate::backend::{ChangeEvent, ChangeType};
use crate::error::LdapError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeTypes(pub i64);

impl ChangeTypes {
    pub const ADD: i64 = 1;
    pub const DELETE: i64 = 2;
    pub const MODIFY: i64 = 4;
    pub const MODIFY_DN: i64 = 8;
    pub const ANY: i64 = Self::ADD | Self::DELETE | Self::MODIFY | Self::MODIFY_DN;

    pub fn matches(&self, change_type: ChangeType) -> bool {
        self.0 & (change_type as i64) != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistentSearchControl {
    pub change_types: ChangeTypes,
    pub changes_only: bool,
    pub return_ecs: bool,
}

impl PersistentSearchControl {
    pub fn decode(value: &[u8]) -> Result<PersistentSearchControl, LdapError> {
        let tag = parse_tag_complete(value).map_err(LdapError::from)?;
        let children = tag
            .expect_constructed()
            .ok_or_else(|| LdapError::Protocol("persistent search control value must be a SEQUENCE".to_string()))?;
        let mut iter = children.into_iter();
        let change_types = decode_int(&mut iter, "changeTypes")?;
        let changes_only = decode_bool(&mut iter, "changesOnly")?;
        let return_ecs = decode_bool(&mut iter, "returnECs")?;
        Ok(PersistentSearchControl {
            change_types: ChangeTypes(change_types),
            changes_only,
            return_ecs,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: self.change_types.0,
                    ..Default::default()
                }),
                Tag::Boolean(Boolean {
                    inner: self.changes_only,
                    ..Default::default()
                }),
                Tag::Boolean(Boolean {
                    inner: self.return_ecs,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        });
        lber::encode(&tag.into_structure())
    }
}

fn decode_int(iter: &mut std::vec::IntoIter<StructureTag>, what: &str) -> Result<i64, LdapError> {
    let bytes = iter
        .next()
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| LdapError::Protocol(format!("persistent search control missing {}", what)))?;
    ber_integer_to_i64(&bytes).map_err(LdapError::from)
}

fn decode_bool(iter: &mut std::vec::IntoIter<StructureTag>, what: &str) -> Result<bool, LdapError> {
    let bytes = iter
        .next()
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| LdapError::Protocol(format!("persistent search control missing {}", what)))?;
    Ok(bytes.first() == Some(&0xff))
}

/// The EntryChangeNotification response control carried alongside each
/// streamed `SearchResultEntry`.
pub struct EntryChangeNotification {
    pub change_type: ChangeType,
    pub previous_dn: Option<String>,
    pub change_number: u64,
}

impl EntryChangeNotification {
    pub fn encode(&self) -> Vec<u8> {
        let mut inner = vec![Tag::Enumerated(Enumerated {
            inner: self.change_type as i64,
            ..Default::default()
        })];
        if let Some(prev) = &self.previous_dn {
            inner.push(Tag::OctetString(lber::structures::OctetString {
                inner: prev.clone().into_bytes(),
                ..Default::default()
            }));
        }
        inner.push(Tag::Integer(Integer {
            inner: self.change_number as i64,
            ..Default::default()
        }));
        let tag = Tag::Sequence(Sequence {
            inner,
            ..Default::default()
        });
        lber::encode(&tag.into_structure())
    }
}

/// Whether `event` is relevant to a persistent search scoped to `base_dn`
/// under `scope`, honoring the requested `changeTypes` bitmask.
pub fn event_matches(
    event: &ChangeEvent,
    control: &PersistentSearchControl,
    base_dn: &str,
    scope: crate::request::Scope,
) -> bool {
    if !control.change_types.matches(event.change_type) {
        return false;
    }
    dn_in_scope(&event.dn, base_dn, scope) || event.previous_dn.as_deref().map(|p| dn_in_scope(p, base_dn, scope)).unwrap_or(false)
}

fn dn_in_scope(dn: &str, base_dn: &str, scope: crate::request::Scope) -> bool {
    let dn = dn.trim().to_lowercase();
    let base = base_dn.trim().to_lowercase();
    match scope {
        crate::request::Scope::Base => dn == base,
        crate::request::Scope::OneLevel => dn.find(',').map(|i| dn[i + 1..].trim() == base).unwrap_or(false),
        crate::request::Scope::Subtree => base.is_empty() || dn == base || dn.ends_with(&format!(",{}", base)),
    }
}
