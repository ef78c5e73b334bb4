//! Typed response variants and their encoding into the application-tagged
//! `protocolOp` choice of an LDAPMessage.

use lber::structures::{ASNTag, Enumerated, OctetString, Sequence, Tag};
use lber::TagClass;

use crate::request::{
    TAG_ADD_REQUEST, TAG_BIND_REQUEST, TAG_COMPARE_REQUEST, TAG_DEL_REQUEST, TAG_EXTENDED_REQUEST, TAG_MODIFY_DN_REQUEST, TAG_MODIFY_REQUEST,
    TAG_SEARCH_REQUEST,
};
use crate::result::LdapResult;

pub const TAG_BIND_RESPONSE: u64 = 1;
pub const TAG_SEARCH_RESULT_ENTRY: u64 = 4;
pub const TAG_SEARCH_RESULT_DONE: u64 = 5;
pub const TAG_MODIFY_RESPONSE: u64 = 7;
pub const TAG_ADD_RESPONSE: u64 = 9;
pub const TAG_DEL_RESPONSE: u64 = 11;
pub const TAG_MODIFY_DN_RESPONSE: u64 = 13;
pub const TAG_COMPARE_RESPONSE: u64 = 15;
pub const TAG_EXTENDED_RESPONSE: u64 = 24;

#[derive(Clone, Debug)]
pub struct SearchResultEntry {
    pub dn: String,
    pub attributes: Vec<(String, Vec<Vec<u8>>)>,
}

#[derive(Clone, Debug)]
pub struct ExtendedResponse {
    pub result: LdapResult,
    pub name: Option<String>,
    pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug)]
pub enum Response {
    Bind(LdapResult),
    SearchResultEntry(SearchResultEntry),
    SearchResultDone(LdapResult),
    Add(LdapResult),
    Delete(LdapResult),
    Modify(LdapResult),
    ModifyDn(LdapResult),
    Compare(LdapResult),
    Extended(ExtendedResponse),
}

/// The response variant that answers a given request tag, for replying to
/// an operation whose body failed to decode. Abandon and Unbind have no
/// response PDU in the protocol, so a caller gets back `None` for those (and
/// for anything else it doesn't recognize) and simply sends nothing.
pub fn for_request_tag(request_tag: u64, result: LdapResult) -> Option<Response> {
    match request_tag {
        TAG_BIND_REQUEST => Some(Response::Bind(result)),
        TAG_SEARCH_REQUEST => Some(Response::SearchResultDone(result)),
        TAG_ADD_REQUEST => Some(Response::Add(result)),
        TAG_DEL_REQUEST => Some(Response::Delete(result)),
        TAG_MODIFY_REQUEST => Some(Response::Modify(result)),
        TAG_MODIFY_DN_REQUEST => Some(Response::ModifyDn(result)),
        TAG_COMPARE_REQUEST => Some(Response::Compare(result)),
        TAG_EXTENDED_REQUEST => Some(Response::Extended(ExtendedResponse { result, name: None, value: None })),
        _ => None,
    }
}

fn ldap_result_elements(result: &LdapResult) -> Vec<Tag> {
    vec![
        Tag::Enumerated(Enumerated {
            inner: result.code.as_i64(),
            ..Default::default()
        }),
        Tag::OctetString(OctetString {
            inner: result.matched_dn.clone().into_bytes(),
            ..Default::default()
        }),
        Tag::OctetString(OctetString {
            inner: result.diagnostic_message.clone().into_bytes(),
            ..Default::default()
        }),
    ]
}

impl Response {
    pub fn encode(&self) -> Tag {
        match self {
            Response::Bind(r) => Tag::Sequence(Sequence {
                id: TAG_BIND_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::SearchResultEntry(e) => Tag::Sequence(Sequence {
                id: TAG_SEARCH_RESULT_ENTRY,
                class: TagClass::Application,
                inner: vec![
                    Tag::OctetString(OctetString {
                        inner: e.dn.clone().into_bytes(),
                        ..Default::default()
                    }),
                    Tag::Sequence(Sequence {
                        inner: e
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
            }),
            Response::SearchResultDone(r) => Tag::Sequence(Sequence {
                id: TAG_SEARCH_RESULT_DONE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::Add(r) => Tag::Sequence(Sequence {
                id: TAG_ADD_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::Delete(r) => Tag::Sequence(Sequence {
                id: TAG_DEL_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::Modify(r) => Tag::Sequence(Sequence {
                id: TAG_MODIFY_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::ModifyDn(r) => Tag::Sequence(Sequence {
                id: TAG_MODIFY_DN_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::Compare(r) => Tag::Sequence(Sequence {
                id: TAG_COMPARE_RESPONSE,
                class: TagClass::Application,
                inner: ldap_result_elements(r),
            }),
            Response::Extended(e) => {
                let mut inner = ldap_result_elements(&e.result);
                if let Some(name) = &e.name {
                    inner.push(Tag::OctetString(OctetString {
                        id: 10,
                        class: TagClass::Context,
                        inner: name.clone().into_bytes(),
                    }));
                }
                if let Some(value) = &e.value {
                    inner.push(Tag::OctetString(OctetString {
                        id: 11,
                        class: TagClass::Context,
                        inner: value.clone(),
                    }));
                }
                Tag::Sequence(Sequence {
                    id: TAG_EXTENDED_RESPONSE,
                    class: TagClass::Application,
                    inner,
                })
            }
        }
    }
}
