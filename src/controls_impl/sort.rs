//! Server-Side Sort (RFC 2891, request OID `1.2.840.113556.1.4.473`,
//! response OID `1.2.840.113556.1.4.474`).
//!
//! Sorting is stable and happens after the filter has selected the
//! candidate set, never before: a sort key only reorders, it never
//! excludes. Entries missing the sort attribute always sort last,
//! regardless of `reverse`.

use lber::parse::parse_tag_complete;
use lber::structures::{ASNTag, Boolean, Enumerated, OctetString, Sequence, Tag};
use lber::StructureTag;

use crate::backend::Entry;
use crate::error::LdapError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub attribute: String,
    pub ordering_rule: Option<String>,
    pub reverse: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortRequestControl {
    pub keys: Vec<SortKey>,
}

impl SortRequestControl {
    pub fn decode(value: &[u8]) -> Result<SortRequestControl, LdapError> {
        let tag = parse_tag_complete(value).map_err(LdapError::from)?;
        let children = tag
            .expect_constructed()
            .ok_or_else(|| LdapError::Protocol("sort request control value must be a SEQUENCE".to_string()))?;
        let keys = children.into_iter().map(decode_key).collect::<Result<Vec<_>, _>>()?;
        if keys.is_empty() {
            return Err(LdapError::Protocol("sort request control needs at least one key".to_string()));
        }
        Ok(SortRequestControl { keys })
    }

    pub fn encode(&self) -> Vec<u8> {
        let tag = Tag::Sequence(Sequence {
            inner: self.keys.iter().map(encode_key).collect(),
            ..Default::default()
        });
        lber::encode(&tag.into_structure())
    }
}

fn decode_key(tag: StructureTag) -> Result<SortKey, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("sort key must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let attribute = iter
        .next()
        .and_then(|t| t.expect_primitive())
        .and_then(|b| String::from_utf8(b).ok())
        .ok_or_else(|| LdapError::Protocol("sort key missing attribute".to_string()))?;
    let mut ordering_rule = None;
    let mut reverse = false;
    for t in iter {
        match t.id {
            0 => ordering_rule = t.expect_primitive().and_then(|b| String::from_utf8(b).ok()),
            1 => reverse = t.expect_primitive().map(|b| b.first() == Some(&0xff)).unwrap_or(false),
            _ => {}
        }
    }
    Ok(SortKey {
        attribute,
        ordering_rule,
        reverse,
    })
}

fn encode_key(key: &SortKey) -> Tag {
    let mut inner = vec![Tag::OctetString(OctetString {
        inner: key.attribute.clone().into_bytes(),
        ..Default::default()
    })];
    if let Some(rule) = &key.ordering_rule {
        inner.push(Tag::OctetString(OctetString {
            id: 0,
            class: lber::TagClass::Context,
            inner: rule.clone().into_bytes(),
        }));
    }
    if key.reverse {
        inner.push(Tag::Boolean(Boolean {
            id: 1,
            class: lber::TagClass::Context,
            inner: true,
        }));
    }
    Tag::Sequence(Sequence {
        inner,
        ..Default::default()
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortResult {
    Success = 0,
    OperationsError = 1,
    Unwilling = 53,
    NoSuchAttribute = 16,
}

pub struct SortResponseControl {
    pub result: SortResult,
}

impl SortResponseControl {
    pub fn encode(&self) -> Vec<u8> {
        let tag = Tag::Sequence(Sequence {
            inner: vec![Tag::Enumerated(Enumerated {
                inner: self.result as i64,
                ..Default::default()
            })],
            ..Default::default()
        });
        lber::encode(&tag.into_structure())
    }
}

/// Apply `keys` to `entries` in place, stably, first key major. Unknown
/// `ordering_rule`s fall back to plain octet comparison of the first value.
pub fn sort_entries(entries: &mut [Entry], keys: &[SortKey]) {
    for key in keys.iter().rev() {
        entries.sort_by(|a, b| {
            let av = a.get(&key.attribute).and_then(|v| v.first());
            let bv = b.get(&key.attribute).and_then(|v| v.first());
            let ordering = match (av, bv) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (Some(_), None) => std::cmp::Ordering::Less,
                (Some(x), Some(y)) => x.cmp(y),
            };
            if key.reverse && av.is_some() && bv.is_some() {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lber::parse::parse_tag_complete;

    fn entry(dn: &str, cn: Option<&str>) -> Entry {
        let mut e = Entry {
            dn: dn.to_string(),
            attributes: vec![],
        };
        if let Some(v) = cn {
            e.set("cn", vec![v.as_bytes().to_vec()]);
        }
        e
    }

    #[test]
    fn sort_request_round_trips() {
        let ctrl = SortRequestControl {
            keys: vec![SortKey {
                attribute: "cn".to_string(),
                ordering_rule: None,
                reverse: true,
            }],
        };
        let bytes = ctrl.encode();
        let tag = parse_tag_complete(&bytes).unwrap();
        let _ = tag;
        let decoded = SortRequestControl::decode(&bytes).unwrap();
        assert_eq!(ctrl, decoded);
    }

    #[test]
    fn sort_is_stable_and_missing_attribute_sorts_last() {
        let mut entries = vec![
            entry("uid=a", Some("bob")),
            entry("uid=b", None),
            entry("uid=c", Some("alice")),
            entry("uid=d", Some("alice")),
        ];
        sort_entries(
            &mut entries,
            &[SortKey {
                attribute: "cn".to_string(),
                ordering_rule: None,
                reverse: false,
            }],
        );
        let dns: Vec<_> = entries.iter().map(|e| e.dn.clone()).collect();
        assert_eq!(dns, vec!["uid=c", "uid=d", "uid=a", "uid=b"]);
    }

    #[test]
    fn reverse_still_sorts_missing_last() {
        let mut entries = vec![entry("uid=a", Some("bob")), entry("uid=b", None), entry("uid=c", Some("alice"))];
        sort_entries(
            &mut entries,
            &[SortKey {
                attribute: "cn".to_string(),
                ordering_rule: None,
                reverse: true,
            }],
        );
        let dns: Vec<_> = entries.iter().map(|e| e.dn.clone()).collect();
        assert_eq!(dns, vec!["uid=a", "uid=c", "uid=b"]);
    }
}
