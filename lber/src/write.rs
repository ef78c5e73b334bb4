//! Definite-length BER encoding of a [`StructureTag`] tree into a flat byte
//! buffer.

use crate::common::{TagClass, TagStructure};
use crate::tag::{StructureTag, PL};

fn write_identifier(out: &mut Vec<u8>, class: TagClass, structure: TagStructure, id: u64) {
    let class_bits = (class as u8) << 6;
    let structure_bit = (structure as u8) << 5;
    if id < 0x1f {
        out.push(class_bits | structure_bit | id as u8);
        return;
    }
    out.push(class_bits | structure_bit | 0x1f);
    let mut groups = Vec::new();
    let mut n = id;
    loop {
        groups.push((n & 0x7f) as u8);
        n >>= 7;
        if n == 0 {
            break;
        }
    }
    for (i, byte) in groups.iter().rev().enumerate() {
        let continuation = if i + 1 == groups.len() { 0x00 } else { 0x80 };
        out.push(byte | continuation);
    }
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = (len as u64).to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(7);
    let octets = &bytes[first_nonzero..];
    out.push(0x80 | octets.len() as u8);
    out.extend_from_slice(octets);
}

/// Append the BER encoding of `tag` onto `out`.
pub fn write_tag(out: &mut Vec<u8>, tag: &StructureTag) {
    match &tag.payload {
        PL::P(bytes) => {
            write_identifier(out, tag.class, TagStructure::Primitive, tag.id);
            write_length(out, bytes.len());
            out.extend_from_slice(bytes);
        }
        PL::C(children) => {
            let mut body = Vec::new();
            for child in children {
                write_tag(&mut body, child);
            }
            write_identifier(out, tag.class, TagStructure::Constructed, tag.id);
            write_length(out, body.len());
            out.extend_from_slice(&body);
        }
    }
}

/// Encode `tag` as a standalone buffer.
pub fn encode(tag: &StructureTag) -> Vec<u8> {
    let mut out = Vec::new();
    write_tag(&mut out, tag);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_tag_complete;

    #[test]
    fn short_length_round_trips() {
        let tag = StructureTag {
            class: TagClass::Universal,
            id: 2,
            payload: PL::P(vec![1, 2, 3]),
        };
        let bytes = encode(&tag);
        assert_eq!(bytes, vec![2, 3, 1, 2, 3]);
        assert_eq!(parse_tag_complete(&bytes).unwrap(), tag);
    }

    #[test]
    fn long_length_round_trips() {
        let payload = vec![0u8; 200];
        let tag = StructureTag {
            class: TagClass::Application,
            id: 4,
            payload: PL::P(payload.clone()),
        };
        let bytes = encode(&tag);
        assert_eq!(bytes[0], (1 << 6) | 4); // application, primitive, id 4
        assert_eq!(bytes[1], 0x81); // long form, 1 length octet
        assert_eq!(bytes[2], 200);
        assert_eq!(parse_tag_complete(&bytes).unwrap(), tag);
    }

    #[test]
    fn constructed_round_trips() {
        let inner = StructureTag {
            class: TagClass::Universal,
            id: 4,
            payload: PL::P(b"cn".to_vec()),
        };
        let outer = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: PL::C(vec![inner]),
        };
        let bytes = encode(&outer);
        assert_eq!(parse_tag_complete(&bytes).unwrap(), outer);
    }

    #[test]
    fn high_tag_number_round_trips() {
        let tag = StructureTag {
            class: TagClass::Context,
            id: 40,
            payload: PL::P(vec![]),
        };
        let bytes = encode(&tag);
        assert_eq!(parse_tag_complete(&bytes).unwrap(), tag);
    }
}
