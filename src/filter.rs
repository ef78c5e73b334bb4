//! The LDAP search filter AST (RFC 4511 §4.5.1.7) and its BER <-> struct
//! conversions.
//!
//! Filters arrive as a context-tagged choice nested inside a SearchRequest;
//! decoding is recursive-descent over [`lber::StructureTag`], bounded in
//! depth to keep a maliciously nested filter from blowing the stack.

use lber::structures::{ASNTag, OctetString, Sequence, Set, Tag};
use lber::{StructureTag, TagClass};

use crate::backend::Entry;
use crate::error::LdapError;

const TAG_AND: u64 = 0;
const TAG_OR: u64 = 1;
const TAG_NOT: u64 = 2;
const TAG_EQUALITY: u64 = 3;
const TAG_SUBSTRINGS: u64 = 4;
const TAG_GREATER_OR_EQUAL: u64 = 5;
const TAG_LESS_OR_EQUAL: u64 = 6;
const TAG_PRESENT: u64 = 7;
const TAG_APPROX_MATCH: u64 = 8;
const TAG_EXTENSIBLE_MATCH: u64 = 9;

/// One piece of a `Substrings` filter; `Initial`/`Final` may appear at most
/// once, in first/last position respectively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubstringPiece {
    Initial(Vec<u8>),
    Any(Vec<u8>),
    Final(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, Vec<u8>),
    Substrings(String, Vec<SubstringPiece>),
    GreaterOrEqual(String, Vec<u8>),
    LessOrEqual(String, Vec<u8>),
    Present(String),
    ApproxMatch(String, Vec<u8>),
    ExtensibleMatch {
        matching_rule: Option<String>,
        attribute: Option<String>,
        value: Vec<u8>,
        dn_attributes: bool,
    },
}

impl Filter {
    pub fn decode(tag: StructureTag, max_depth: u32) -> Result<Filter, LdapError> {
        decode_at(tag, max_depth, 0)
    }

    pub fn encode(&self) -> Tag {
        match self {
            Filter::And(children) => context_set(TAG_AND, children),
            Filter::Or(children) => context_set(TAG_OR, children),
            Filter::Not(child) => Tag::ExplicitTag(lber::structures::ExplicitTag {
                id: TAG_NOT,
                class: TagClass::Context,
                inner: Box::new(child.encode()),
            }),
            Filter::Equality(attr, val) => attribute_value_assertion(TAG_EQUALITY, attr, val),
            Filter::Substrings(attr, pieces) => encode_substrings(attr, pieces),
            Filter::GreaterOrEqual(attr, val) => {
                attribute_value_assertion(TAG_GREATER_OR_EQUAL, attr, val)
            }
            Filter::LessOrEqual(attr, val) => {
                attribute_value_assertion(TAG_LESS_OR_EQUAL, attr, val)
            }
            Filter::Present(attr) => Tag::OctetString(OctetString {
                id: TAG_PRESENT,
                class: TagClass::Context,
                inner: attr.clone().into_bytes(),
            }),
            Filter::ApproxMatch(attr, val) => attribute_value_assertion(TAG_APPROX_MATCH, attr, val),
            Filter::ExtensibleMatch {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => encode_extensible(matching_rule, attribute, value, *dn_attributes),
        }
    }

    /// Deterministic printable form used to bind a paged-search cookie to
    /// its originating query. Any drift here breaks cookie equality across
    /// pages of the same search, so this must never be reused for anything
    /// client-visible.
    pub fn canonical_string(&self) -> String {
        match self {
            Filter::And(children) => {
                format!("(&{})", children.iter().map(Filter::canonical_string).collect::<String>())
            }
            Filter::Or(children) => {
                format!("(|{})", children.iter().map(Filter::canonical_string).collect::<String>())
            }
            Filter::Not(child) => format!("(!{})", child.canonical_string()),
            Filter::Equality(attr, val) => format!("({}={})", attr, escape(val)),
            Filter::Substrings(attr, pieces) => {
                let mut s = format!("({}=", attr);
                for piece in pieces {
                    match piece {
                        SubstringPiece::Initial(v) => s.push_str(&escape(v)),
                        SubstringPiece::Any(v) => {
                            s.push('*');
                            s.push_str(&escape(v));
                        }
                        SubstringPiece::Final(v) => {
                            s.push('*');
                            s.push_str(&escape(v));
                        }
                    }
                }
                if !matches!(pieces.last(), Some(SubstringPiece::Final(_))) {
                    s.push('*');
                }
                s.push(')');
                s
            }
            Filter::GreaterOrEqual(attr, val) => format!("({}>={})", attr, escape(val)),
            Filter::LessOrEqual(attr, val) => format!("({}<={})", attr, escape(val)),
            Filter::Present(attr) => format!("({}=*)", attr),
            Filter::ApproxMatch(attr, val) => format!("({}~={})", attr, escape(val)),
            Filter::ExtensibleMatch {
                matching_rule,
                attribute,
                value,
                dn_attributes,
            } => format!(
                "({}:{}{}={})",
                attribute.clone().unwrap_or_default(),
                matching_rule.clone().map(|r| format!("{}:", r)).unwrap_or_default(),
                if *dn_attributes { ":dn" } else { "" },
                escape(value)
            ),
        }
    }

    /// The filter the core substitutes when a SearchRequest arrives without
    /// one, used for cookie binding and nowhere else.
    pub fn present_object_class() -> Filter {
        Filter::Present("objectClass".to_string())
    }

    /// Evaluate this filter against `entry`. Value comparisons are plain
    /// ASCII case-insensitive octet comparison; there is no schema here to
    /// supply a real matching rule, so `ExtensibleMatch` without a known
    /// matching rule falls back to the same equality test as `Equality`.
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|c| c.matches(entry)),
            Filter::Or(children) => children.iter().any(|c| c.matches(entry)),
            Filter::Not(child) => !child.matches(entry),
            Filter::Equality(attr, val) => entry.get(attr).map(|vs| vs.iter().any(|v| ci_eq(v, val))).unwrap_or(false),
            Filter::Substrings(attr, pieces) => entry
                .get(attr)
                .map(|vs| vs.iter().any(|v| substrings_match(v, pieces)))
                .unwrap_or(false),
            Filter::GreaterOrEqual(attr, val) => entry.get(attr).map(|vs| vs.iter().any(|v| v.as_slice() >= val.as_slice())).unwrap_or(false),
            Filter::LessOrEqual(attr, val) => entry.get(attr).map(|vs| vs.iter().any(|v| v.as_slice() <= val.as_slice())).unwrap_or(false),
            Filter::Present(attr) => entry.get(attr).map(|vs| !vs.is_empty()).unwrap_or(false),
            Filter::ApproxMatch(attr, val) => entry.get(attr).map(|vs| vs.iter().any(|v| ci_eq(v, val))).unwrap_or(false),
            Filter::ExtensibleMatch { attribute, value, .. } => match attribute {
                Some(attr) => entry.get(attr).map(|vs| vs.iter().any(|v| ci_eq(v, value))).unwrap_or(false),
                None => entry.attributes.iter().any(|(_, vs)| vs.iter().any(|v| ci_eq(v, value))),
            },
        }
    }
}

fn ci_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_ignore_ascii_case(y))
}

fn substrings_match(value: &[u8], pieces: &[SubstringPiece]) -> bool {
    let lower = value.to_ascii_lowercase();
    let mut cursor = 0usize;
    for (i, piece) in pieces.iter().enumerate() {
        match piece {
            SubstringPiece::Initial(p) => {
                let p = p.to_ascii_lowercase();
                if !lower.starts_with(&p[..]) {
                    return false;
                }
                cursor = p.len();
            }
            SubstringPiece::Final(p) => {
                let p = p.to_ascii_lowercase();
                if !lower[cursor..].ends_with(&p[..]) {
                    return false;
                }
            }
            SubstringPiece::Any(p) => {
                let p = p.to_ascii_lowercase();
                match lower[cursor..].windows(p.len().max(1)).position(|w| w == &p[..]) {
                    Some(offset) if !p.is_empty() => cursor += offset + p.len(),
                    _ if p.is_empty() => {}
                    None => return false,
                    Some(_) => unreachable!(),
                }
            }
        }
        let _ = i;
    }
    true
}

fn escape(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn context_set(id: u64, children: &[Filter]) -> Tag {
    Tag::Set(Set {
        id,
        class: TagClass::Context,
        inner: children.iter().map(Filter::encode).collect(),
    })
}

fn attribute_value_assertion(id: u64, attr: &str, val: &[u8]) -> Tag {
    Tag::Sequence(Sequence {
        id,
        class: TagClass::Context,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.as_bytes().to_vec(),
                ..Default::default()
            }),
            Tag::OctetString(OctetString {
                inner: val.to_vec(),
                ..Default::default()
            }),
        ],
    })
}

fn encode_substrings(attr: &str, pieces: &[SubstringPiece]) -> Tag {
    let inner_pieces: Vec<Tag> = pieces
        .iter()
        .map(|p| {
            let (id, bytes) = match p {
                SubstringPiece::Initial(b) => (0u64, b),
                SubstringPiece::Any(b) => (1u64, b),
                SubstringPiece::Final(b) => (2u64, b),
            };
            Tag::OctetString(OctetString {
                id,
                class: TagClass::Context,
                inner: bytes.clone(),
            })
        })
        .collect();
    Tag::Sequence(Sequence {
        id: TAG_SUBSTRINGS,
        class: TagClass::Context,
        inner: vec![
            Tag::OctetString(OctetString {
                inner: attr.as_bytes().to_vec(),
                ..Default::default()
            }),
            Tag::Sequence(Sequence {
                inner: inner_pieces,
                ..Default::default()
            }),
        ],
    })
}

fn encode_extensible(
    matching_rule: &Option<String>,
    attribute: &Option<String>,
    value: &[u8],
    dn_attributes: bool,
) -> Tag {
    let mut inner = Vec::new();
    if let Some(rule) = matching_rule {
        inner.push(Tag::OctetString(OctetString {
            id: 1,
            class: TagClass::Context,
            inner: rule.clone().into_bytes(),
        }));
    }
    if let Some(attr) = attribute {
        inner.push(Tag::OctetString(OctetString {
            id: 2,
            class: TagClass::Context,
            inner: attr.clone().into_bytes(),
        }));
    }
    inner.push(Tag::OctetString(OctetString {
        id: 3,
        class: TagClass::Context,
        inner: value.to_vec(),
    }));
    if dn_attributes {
        inner.push(Tag::Boolean(lber::structures::Boolean {
            id: 4,
            class: TagClass::Context,
            inner: true,
        }));
    }
    Tag::Sequence(Sequence {
        id: TAG_EXTENSIBLE_MATCH,
        class: TagClass::Context,
        inner,
    })
}

fn decode_at(tag: StructureTag, max_depth: u32, depth: u32) -> Result<Filter, LdapError> {
    if depth >= max_depth {
        return Err(LdapError::Protocol("filter nesting too deep".to_string()));
    }
    let class = tag.class;
    let id = tag.id;
    if class != TagClass::Context {
        return Err(LdapError::Protocol("filter element outside context class".to_string()));
    }
    match id {
        TAG_AND | TAG_OR => {
            let children = tag
                .expect_constructed()
                .ok_or_else(|| LdapError::Protocol("and/or filter must be constructed".to_string()))?
                .into_iter()
                .map(|t| decode_at(t, max_depth, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            if id == TAG_AND {
                Ok(Filter::And(children))
            } else {
                Ok(Filter::Or(children))
            }
        }
        TAG_NOT => {
            let mut inner = tag
                .expect_constructed()
                .ok_or_else(|| LdapError::Protocol("not filter must be constructed".to_string()))?;
            if inner.len() != 1 {
                return Err(LdapError::Protocol("not filter must have exactly one child".to_string()));
            }
            let child = decode_at(inner.remove(0), max_depth, depth + 1)?;
            Ok(Filter::Not(Box::new(child)))
        }
        TAG_EQUALITY | TAG_GREATER_OR_EQUAL | TAG_LESS_OR_EQUAL | TAG_APPROX_MATCH => {
            let (attr, val) = decode_ava(tag)?;
            Ok(match id {
                TAG_EQUALITY => Filter::Equality(attr, val),
                TAG_GREATER_OR_EQUAL => Filter::GreaterOrEqual(attr, val),
                TAG_LESS_OR_EQUAL => Filter::LessOrEqual(attr, val),
                _ => Filter::ApproxMatch(attr, val),
            })
        }
        TAG_PRESENT => {
            let bytes = tag
                .expect_primitive()
                .ok_or_else(|| LdapError::Protocol("present filter must be primitive".to_string()))?;
            Ok(Filter::Present(
                String::from_utf8(bytes).map_err(|_| LdapError::Protocol("non-UTF8 attribute name".to_string()))?,
            ))
        }
        TAG_SUBSTRINGS => decode_substrings(tag),
        TAG_EXTENSIBLE_MATCH => decode_extensible(tag),
        other => Err(LdapError::Protocol(format!("unsupported filter choice {}", other))),
    }
}

fn decode_ava(tag: StructureTag) -> Result<(String, Vec<u8>), LdapError> {
    let mut inner = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("attribute-value-assertion must be constructed".to_string()))?;
    if inner.len() != 2 {
        return Err(LdapError::Protocol("attribute-value-assertion needs two elements".to_string()));
    }
    let val = inner
        .pop()
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| LdapError::Protocol("bad assertion value".to_string()))?;
    let attr = inner
        .pop()
        .and_then(|t| t.expect_primitive())
        .and_then(|b| String::from_utf8(b).ok())
        .ok_or_else(|| LdapError::Protocol("bad attribute description".to_string()))?;
    Ok((attr, val))
}

fn decode_substrings(tag: StructureTag) -> Result<Filter, LdapError> {
    let mut inner = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("substrings filter must be constructed".to_string()))?;
    if inner.len() != 2 {
        return Err(LdapError::Protocol("substrings filter needs two elements".to_string()));
    }
    let pieces_tag = inner.pop().unwrap();
    let attr = inner
        .pop()
        .and_then(|t| t.expect_primitive())
        .and_then(|b| String::from_utf8(b).ok())
        .ok_or_else(|| LdapError::Protocol("bad attribute description".to_string()))?;
    let piece_tags = pieces_tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("substrings list must be constructed".to_string()))?;
    let mut pieces = Vec::new();
    let mut seen_initial = false;
    let mut seen_final = false;
    for (i, t) in piece_tags.into_iter().enumerate() {
        let id = t.id;
        let bytes = t
            .expect_primitive()
            .ok_or_else(|| LdapError::Protocol("substring piece must be primitive".to_string()))?;
        let piece = match id {
            0 => {
                if seen_initial || i != 0 {
                    return Err(LdapError::Protocol("initial substring must be first and unique".to_string()));
                }
                seen_initial = true;
                SubstringPiece::Initial(bytes)
            }
            1 => SubstringPiece::Any(bytes),
            2 => {
                if seen_final {
                    return Err(LdapError::Protocol("final substring must be unique".to_string()));
                }
                seen_final = true;
                SubstringPiece::Final(bytes)
            }
            other => return Err(LdapError::Protocol(format!("unknown substring piece tag {}", other))),
        };
        pieces.push(piece);
    }
    if pieces.is_empty() {
        return Err(LdapError::Protocol("substrings filter needs at least one piece".to_string()));
    }
    Ok(Filter::Substrings(attr, pieces))
}

fn decode_extensible(tag: StructureTag) -> Result<Filter, LdapError> {
    let inner = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("extensible match must be constructed".to_string()))?;
    let mut matching_rule = None;
    let mut attribute = None;
    let mut value = None;
    let mut dn_attributes = false;
    for t in inner {
        match t.id {
            1 => {
                matching_rule = t
                    .expect_primitive()
                    .and_then(|b| String::from_utf8(b).ok());
            }
            2 => {
                attribute = t
                    .expect_primitive()
                    .and_then(|b| String::from_utf8(b).ok());
            }
            3 => {
                value = t.expect_primitive();
            }
            4 => {
                dn_attributes = t
                    .expect_primitive()
                    .map(|b| b.first().copied().unwrap_or(0) != 0)
                    .unwrap_or(false);
            }
            _ => {}
        }
    }
    Ok(Filter::ExtensibleMatch {
        matching_rule,
        attribute,
        value: value.ok_or_else(|| LdapError::Protocol("extensible match needs a value".to_string()))?,
        dn_attributes,
    })
}
