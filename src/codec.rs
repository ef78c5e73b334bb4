//! Tokio codec that frames one complete LDAPMessage envelope (tag 0x30,
//! definite-length SEQUENCE) off the wire at a time, and writes one
//! complete envelope atomically.

use bytes::{Buf, BytesMut};
use lber::{encode, parse::parse_tag, BerError, StructureTag, TagClass};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LdapError;

#[derive(Default)]
pub struct LdapCodec;

impl Decoder for LdapCodec {
    type Item = StructureTag;
    type Error = LdapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StructureTag>, LdapError> {
        if src.is_empty() {
            return Ok(None);
        }
        match parse_tag(src) {
            Ok((rest, tag)) => {
                if tag.class != TagClass::Universal || tag.id != 16 {
                    return Err(LdapError::InvalidMessage(
                        "envelope is not a universal SEQUENCE".to_string(),
                    ));
                }
                let consumed = src.len() - rest.len();
                src.advance(consumed);
                Ok(Some(tag))
            }
            Err(BerError::UnexpectedEof { .. }) | Err(BerError::LengthOverrun { .. }) => Ok(None),
            Err(e) => Err(LdapError::Codec(e)),
        }
    }
}

impl Encoder<StructureTag> for LdapCodec {
    type Error = LdapError;

    fn encode(&mut self, item: StructureTag, dst: &mut BytesMut) -> Result<(), LdapError> {
        let bytes = encode(&item);
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_waits_for_full_envelope() {
        let mut codec = LdapCodec;
        let full = encode(&StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: lber::PL::C(vec![]),
        });
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 1..]);
        let tag = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(tag.id, 16);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_non_sequence_envelope() {
        let mut codec = LdapCodec;
        let bad = encode(&StructureTag {
            class: TagClass::Universal,
            id: 2,
            payload: lber::PL::P(vec![]),
        });
        let mut buf = BytesMut::from(&bad[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
