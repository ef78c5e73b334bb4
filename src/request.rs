//! Typed request variants, decoded from the application-tagged `protocolOp`
//! choice of an LDAPMessage (RFC 4511 §4.2-4.11).

use lber::parse::ber_integer_to_i64;
use lber::structures::{ASNTag, Boolean, Enumerated, Integer, OctetString, Sequence, Tag};
use lber::{StructureTag, TagClass};

use crate::error::LdapError;
use crate::filter::Filter;

pub const TAG_BIND_REQUEST: u64 = 0;
pub const TAG_UNBIND_REQUEST: u64 = 2;
pub const TAG_SEARCH_REQUEST: u64 = 3;
pub const TAG_MODIFY_REQUEST: u64 = 6;
pub const TAG_ADD_REQUEST: u64 = 8;
pub const TAG_DEL_REQUEST: u64 = 10;
pub const TAG_MODIFY_DN_REQUEST: u64 = 12;
pub const TAG_COMPARE_REQUEST: u64 = 14;
pub const TAG_ABANDON_REQUEST: u64 = 16;
pub const TAG_EXTENDED_REQUEST: u64 = 23;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Base = 0,
    OneLevel = 1,
    Subtree = 2,
}

impl Scope {
    fn from_i64(n: i64) -> Result<Scope, LdapError> {
        match n {
            0 => Ok(Scope::Base),
            1 => Ok(Scope::OneLevel),
            2 => Ok(Scope::Subtree),
            other => Err(LdapError::Protocol(format!("invalid search scope {}", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Auth {
    Simple(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub name: String,
    pub auth: Auth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_object: String,
    pub scope: Scope,
    pub deref_aliases: i64,
    pub size_limit: i64,
    pub time_limit: i64,
    pub types_only: bool,
    pub filter: Filter,
    pub attributes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModifyOp {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Change {
    pub operation: ModifyOp,
    pub attribute: String,
    pub values: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyRequest {
    pub dn: String,
    pub changes: Vec<Change>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AddRequest {
    pub dn: String,
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModifyDnRequest {
    pub dn: String,
    pub new_rdn: String,
    pub delete_old_rdn: bool,
    pub new_superior: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompareRequest {
    pub dn: String,
    pub attribute: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedRequest {
    pub oid: String,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Bind(BindRequest),
    Unbind,
    Search(SearchRequest),
    Add(AddRequest),
    Delete(String),
    Modify(ModifyRequest),
    ModifyDn(ModifyDnRequest),
    Compare(CompareRequest),
    Abandon(i64),
    Extended(ExtendedRequest),
}

impl Request {
    pub fn decode(tag: StructureTag, filter_max_depth: u32) -> Result<Request, LdapError> {
        if tag.class != TagClass::Application {
            return Err(LdapError::Protocol("protocolOp must be application-tagged".to_string()));
        }
        match tag.id {
            TAG_BIND_REQUEST => decode_bind(tag).map(Request::Bind),
            TAG_UNBIND_REQUEST => Ok(Request::Unbind),
            TAG_SEARCH_REQUEST => decode_search(tag, filter_max_depth).map(Request::Search),
            TAG_ADD_REQUEST => decode_add(tag).map(Request::Add),
            TAG_DEL_REQUEST => tag
                .expect_primitive()
                .and_then(|b| String::from_utf8(b).ok())
                .map(Request::Delete)
                .ok_or_else(|| LdapError::Protocol("bad delete request".to_string())),
            TAG_MODIFY_REQUEST => decode_modify(tag).map(Request::Modify),
            TAG_MODIFY_DN_REQUEST => decode_modify_dn(tag).map(Request::ModifyDn),
            TAG_COMPARE_REQUEST => decode_compare(tag).map(Request::Compare),
            TAG_ABANDON_REQUEST => tag
                .expect_primitive()
                .map(|b| ber_integer_to_i64(&b).unwrap_or(0))
                .map(Request::Abandon)
                .ok_or_else(|| LdapError::Protocol("bad abandon request".to_string())),
            TAG_EXTENDED_REQUEST => decode_extended(tag).map(Request::Extended),
            other => Err(LdapError::Protocol(format!("unsupported request tag {}", other))),
        }
    }
}

fn next_primitive(iter: &mut std::vec::IntoIter<StructureTag>) -> Option<Vec<u8>> {
    iter.next().and_then(|t| t.expect_primitive())
}

fn next_string(iter: &mut std::vec::IntoIter<StructureTag>) -> Result<String, LdapError> {
    next_primitive(iter)
        .and_then(|b| String::from_utf8(b).ok())
        .ok_or_else(|| LdapError::Protocol("expected a string element".to_string()))
}

fn next_int(iter: &mut std::vec::IntoIter<StructureTag>) -> Result<i64, LdapError> {
    let bytes = next_primitive(iter).ok_or_else(|| LdapError::Protocol("expected an integer element".to_string()))?;
    ber_integer_to_i64(&bytes).map_err(LdapError::from)
}

fn decode_bind(tag: StructureTag) -> Result<BindRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("bind request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let version = next_int(&mut iter)?;
    let name = next_string(&mut iter)?;
    let auth_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("bind request missing credentials".to_string()))?;
    let auth = match auth_tag.id {
        0 => Auth::Simple(
            auth_tag
                .expect_primitive()
                .ok_or_else(|| LdapError::Protocol("bad simple credentials".to_string()))?,
        ),
        other => {
            return Err(LdapError::Protocol(format!("unsupported bind auth choice {}", other)));
        }
    };
    Ok(BindRequest { version, name, auth })
}

fn decode_search(tag: StructureTag, filter_max_depth: u32) -> Result<SearchRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("search request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let base_object = next_string(&mut iter)?;
    let scope = Scope::from_i64(next_int(&mut iter)?)?;
    let deref_aliases = next_int(&mut iter)?;
    let size_limit = next_int(&mut iter)?;
    let time_limit = next_int(&mut iter)?;
    let types_only = next_primitive(&mut iter)
        .map(|b| b.first().copied().unwrap_or(0) != 0)
        .ok_or_else(|| LdapError::Protocol("search request missing typesOnly".to_string()))?;
    let filter_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("search request missing filter".to_string()))?;
    let filter = Filter::decode(filter_tag, filter_max_depth)?;
    let attr_list_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("search request missing attribute list".to_string()))?;
    let attributes = attr_list_tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("attribute list must be constructed".to_string()))?
        .into_iter()
        .map(|t| {
            t.expect_primitive()
                .and_then(|b| String::from_utf8(b).ok())
                .ok_or_else(|| LdapError::Protocol("bad attribute name".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SearchRequest {
        base_object,
        scope,
        deref_aliases,
        size_limit,
        time_limit,
        types_only,
        filter,
        attributes,
    })
}

fn decode_add(tag: StructureTag) -> Result<AddRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("add request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let dn = next_string(&mut iter)?;
    let attrs_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("add request missing attribute list".to_string()))?;
    let attributes = decode_attribute_list(attrs_tag)?;
    Ok(AddRequest { dn, attributes })
}

fn decode_attribute_list(tag: StructureTag) -> Result<Vec<(String, Vec<Vec<u8>>)>, LdapError> {
    tag.expect_constructed()
        .ok_or_else(|| LdapError::Protocol("attribute list must be constructed".to_string()))?
        .into_iter()
        .map(|av| {
            let mut inner = av
                .expect_constructed()
                .ok_or_else(|| LdapError::Protocol("attribute must be constructed".to_string()))?
                .into_iter();
            let name = next_string(&mut inner)?;
            let values = inner
                .next()
                .and_then(|t| t.expect_constructed())
                .ok_or_else(|| LdapError::Protocol("attribute values must be constructed".to_string()))?
                .into_iter()
                .map(|v| v.expect_primitive().ok_or_else(|| LdapError::Protocol("bad attribute value".to_string())))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name, values))
        })
        .collect()
}

fn decode_modify(tag: StructureTag) -> Result<ModifyRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("modify request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let dn = next_string(&mut iter)?;
    let changes_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("modify request missing changes".to_string()))?;
    let changes = changes_tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("changes list must be constructed".to_string()))?
        .into_iter()
        .map(decode_change)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ModifyRequest { dn, changes })
}

fn decode_change(tag: StructureTag) -> Result<Change, LdapError> {
    let mut inner = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("change must be constructed".to_string()))?
        .into_iter();
    let op_bytes = next_primitive(&mut inner).ok_or_else(|| LdapError::Protocol("change missing operation".to_string()))?;
    let operation = match ber_integer_to_i64(&op_bytes).unwrap_or(-1) {
        0 => ModifyOp::Add,
        1 => ModifyOp::Delete,
        2 => ModifyOp::Replace,
        3 => ModifyOp::Increment,
        other => return Err(LdapError::Protocol(format!("unknown modify operation {}", other))),
    };
    let av_tag = inner.next().ok_or_else(|| LdapError::Protocol("change missing attribute".to_string()))?;
    let mut av_iter = av_tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("attribute must be constructed".to_string()))?
        .into_iter();
    let attribute = next_string(&mut av_iter)?;
    let values = av_iter
        .next()
        .and_then(|t| t.expect_constructed())
        .ok_or_else(|| LdapError::Protocol("attribute values must be constructed".to_string()))?
        .into_iter()
        .map(|v| v.expect_primitive().ok_or_else(|| LdapError::Protocol("bad attribute value".to_string())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Change {
        operation,
        attribute,
        values,
    })
}

fn decode_modify_dn(tag: StructureTag) -> Result<ModifyDnRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("modify DN request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let dn = next_string(&mut iter)?;
    let new_rdn = next_string(&mut iter)?;
    let delete_old_rdn = next_primitive(&mut iter)
        .map(|b| b.first().copied().unwrap_or(0) != 0)
        .ok_or_else(|| LdapError::Protocol("modify DN request missing deleteoldrdn".to_string()))?;
    let new_superior = match iter.next() {
        Some(t) => Some(
            t.expect_primitive()
                .and_then(|b| String::from_utf8(b).ok())
                .ok_or_else(|| LdapError::Protocol("bad newSuperior".to_string()))?,
        ),
        None => None,
    };
    Ok(ModifyDnRequest {
        dn,
        new_rdn,
        delete_old_rdn,
        new_superior,
    })
}

fn decode_compare(tag: StructureTag) -> Result<CompareRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("compare request must be constructed".to_string()))?;
    let mut iter = children.into_iter();
    let dn = next_string(&mut iter)?;
    let ava_tag = iter
        .next()
        .ok_or_else(|| LdapError::Protocol("compare request missing assertion".to_string()))?;
    let mut ava_iter = ava_tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("assertion must be constructed".to_string()))?
        .into_iter();
    let attribute = next_string(&mut ava_iter)?;
    let value = next_primitive(&mut ava_iter).ok_or_else(|| LdapError::Protocol("bad assertion value".to_string()))?;
    Ok(CompareRequest { dn, attribute, value })
}

fn decode_extended(tag: StructureTag) -> Result<ExtendedRequest, LdapError> {
    let children = tag
        .expect_constructed()
        .ok_or_else(|| LdapError::Protocol("extended request must be constructed".to_string()))?;
    let mut oid = None;
    let mut value = None;
    for t in children {
        match t.id {
            0 => oid = t.expect_primitive().and_then(|b| String::from_utf8(b).ok()),
            1 => value = t.expect_primitive(),
            _ => {}
        }
    }
    Ok(ExtendedRequest {
        oid: oid.ok_or_else(|| LdapError::Protocol("extended request missing OID".to_string()))?,
        value,
    })
}

// --- Encoders, used by the integration test harness to build requests. ---

impl BindRequest {
    pub fn encode(&self) -> Tag {
        let Auth::Simple(pw) = &self.auth;
        Tag::Sequence(Sequence {
            id: TAG_BIND_REQUEST,
            class: TagClass::Application,
            inner: vec![
                Tag::Integer(Integer {
                    inner: self.version,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: self.name.clone().into_bytes(),
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    id: 0,
                    class: TagClass::Context,
                    inner: pw.clone(),
                }),
            ],
        })
    }
}

impl SearchRequest {
    pub fn encode(&self) -> Tag {
        Tag::Sequence(Sequence {
            id: TAG_SEARCH_REQUEST,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: self.base_object.clone().into_bytes(),
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: self.scope as i64,
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: self.deref_aliases,
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: self.size_limit,
                    ..Default::default()
                }),
                Tag::Integer(Integer {
                    inner: self.time_limit,
                    ..Default::default()
                }),
                Tag::Boolean(Boolean {
                    inner: self.types_only,
                    ..Default::default()
                }),
                self.filter.encode(),
                Tag::Sequence(Sequence {
                    inner: self
                        .attributes
                        .iter()
                        .map(|a| {
                            Tag::OctetString(OctetString {
                                inner: a.clone().into_bytes(),
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        })
    }
}

impl ExtendedRequest {
    pub fn encode(&self) -> Tag {
        let mut inner = vec![Tag::OctetString(OctetString {
            id: 0,
            class: TagClass::Context,
            inner: self.oid.clone().into_bytes(),
        })];
        if let Some(v) = &self.value {
            inner.push(Tag::OctetString(OctetString {
                id: 1,
                class: TagClass::Context,
                inner: v.clone(),
            }));
        }
        Tag::Sequence(Sequence {
            id: TAG_EXTENDED_REQUEST,
            class: TagClass::Application,
            inner,
        })
    }
}

impl AddRequest {
    pub fn encode(&self) -> Tag {
        Tag::Sequence(Sequence {
            id: TAG_ADD_REQUEST,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: self.dn.clone().into_bytes(),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: self
                        .attributes
                        .iter()
                        .map(|(name, values)| {
                            Tag::Sequence(Sequence {
                                inner: vec![
                                    Tag::OctetString(OctetString {
                                        inner: name.clone().into_bytes(),
                                        ..Default::default()
                                    }),
                                    Tag::Sequence(Sequence {
                                        inner: values
                                            .iter()
                                            .map(|v| {
                                                Tag::OctetString(OctetString {
                                                    inner: v.clone(),
                                                    ..Default::default()
                                                })
                                            })
                                            .collect(),
                                        ..Default::default()
                                    }),
                                ],
                                ..Default::default()
                            })
                        })
                        .collect(),
                    ..Default::default()
                }),
            ],
        })
    }
}

impl CompareRequest {
    pub fn encode(&self) -> Tag {
        Tag::Sequence(Sequence {
            id: TAG_COMPARE_REQUEST,
            class: TagClass::Application,
            inner: vec![
                Tag::OctetString(OctetString {
                    inner: self.dn.clone().into_bytes(),
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    inner: vec![
                        Tag::OctetString(OctetString {
                            inner: self.attribute.clone().into_bytes(),
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            inner: self.value.clone(),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                }),
            ],
        })
    }
}
