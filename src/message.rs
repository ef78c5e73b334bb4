//! The LDAPMessage envelope: message id, protocol operation, and optional
//! controls (RFC 4511 §4.1.1).

use lber::parse::ber_integer_to_i64;
use lber::structures::{ASNTag, Integer, Sequence, Tag};
use lber::{StructureTag, TagClass};

use crate::controls::{decode_controls, encode_controls, Control};
use crate::error::LdapError;
use crate::request::Request;
use crate::response::Response;

/// A fully decoded inbound request: its message id, the operation, and any
/// controls attached to it.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message_id: i64,
    pub request: Request,
    pub controls: Vec<Control>,
}

/// Why [`InboundMessage::decode`] failed, split by how the dispatcher must
/// react: an envelope it can't even identify a message id for leaves no way
/// to answer the peer and closes the connection; anything past that point
/// has a message id and an application tag to reply against, so it gets a
/// `protocolError` response for that one message instead.
#[derive(Debug)]
pub enum DecodeFailure {
    Envelope(LdapError),
    Operation { message_id: i64, request_tag: u64, error: LdapError },
}

impl InboundMessage {
    pub fn decode(tag: StructureTag, filter_max_depth: u32) -> Result<InboundMessage, DecodeFailure> {
        let mut children = tag
            .match_id(lber::universal::Types::Sequence as u64)
            .and_then(|t| t.expect_constructed())
            .ok_or_else(|| DecodeFailure::Envelope(LdapError::InvalidMessage("envelope is not a SEQUENCE".to_string())))?;
        if children.len() < 2 || children.len() > 3 {
            return Err(DecodeFailure::Envelope(LdapError::InvalidMessage(format!(
                "envelope has {} elements, expected 2 or 3",
                children.len()
            ))));
        }
        let id_tag = children.remove(0);
        let op_tag = children.remove(0);
        let controls_tag = children.pop();

        let message_id = id_tag
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(lber::universal::Types::Integer as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| LdapError::InvalidMessage("bad message id".to_string()))
            .and_then(|b| ber_integer_to_i64(&b).map_err(LdapError::from))
            .map_err(DecodeFailure::Envelope)?;
        let request_tag = op_tag.id;

        let controls = match controls_tag {
            Some(t) => decode_controls(t).map_err(|error| DecodeFailure::Operation {
                message_id,
                request_tag,
                error,
            })?,
            None => Vec::new(),
        };
        let request = Request::decode(op_tag, filter_max_depth).map_err(|error| DecodeFailure::Operation {
            message_id,
            request_tag,
            error,
        })?;
        Ok(InboundMessage {
            message_id,
            request,
            controls,
        })
    }
}

/// Encode a response for `message_id` as a complete LDAPMessage envelope,
/// ready to hand to the codec for writing.
pub fn encode_response(message_id: i64, response: &Response, controls: &[Control]) -> StructureTag {
    let mut inner = vec![
        Tag::Integer(Integer {
            inner: message_id,
            ..Default::default()
        }),
        response.encode(),
    ];
    if !controls.is_empty() {
        inner.push(Tag::StructureTag(encode_controls(controls)));
    }
    Tag::Sequence(Sequence {
        inner,
        ..Default::default()
    })
    .into_structure()
}
