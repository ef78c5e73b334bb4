//! Definite-length BER decoding: tag octets, length octets, and the
//! recursive primitive/constructed payload.

use nom::bytes::complete::take;
use nom::IResult;

use crate::common::{TagClass, TagStructure};
use crate::error::BerError;
use crate::tag::{StructureTag, PL};

struct Header {
    class: TagClass,
    structure: TagStructure,
    id: u64,
}

fn parse_identifier(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, octet) = take(1usize)(input)?;
    let octet = octet[0];
    let class = TagClass::from_u8((octet & 0xC0) >> 6).expect("2 bits always map to a class");
    let structure =
        TagStructure::from_u8((octet & 0x20) >> 5).expect("1 bit always maps to a structure");
    let low_tag = octet & 0x1f;
    if low_tag < 0x1f {
        return Ok((
            input,
            Header {
                class,
                structure,
                id: low_tag as u64,
            },
        ));
    }
    // High-tag-number form: a base-128 sequence of octets, MSB-continuation, low 7 bits data.
    let mut id: u64 = 0;
    let mut rest = input;
    loop {
        let (next, byte) = take(1usize)(rest)?;
        let byte = byte[0];
        id = (id << 7) | (byte & 0x7f) as u64;
        rest = next;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((rest, Header { class, structure, id }))
}

fn parse_length(input: &[u8], offset_base: usize) -> Result<(&[u8], u64), BerError> {
    let (input, first) = take(1usize)(input).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| BerError::UnexpectedEof {
        offset: offset_base,
    })?;
    let first = first[0];
    if first & 0x80 == 0 {
        return Ok((input, (first & 0x7f) as u64));
    }
    let noctets = first & 0x7f;
    if noctets == 0 {
        return Err(BerError::IndefiniteLength { offset: offset_base });
    }
    if noctets as usize > 8 {
        return Err(BerError::LengthTooWide { offset: offset_base });
    }
    let (input, octets) =
        take(noctets as usize)(input).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| BerError::UnexpectedEof {
            offset: offset_base,
        })?;
    let len = octets
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);
    Ok((input, len))
}

/// Decode exactly one definite-length BER tag, recursing into constructed
/// payloads. `input` is consumed from the front; the unconsumed remainder is
/// returned alongside the decoded tag.
pub fn parse_tag(input: &[u8]) -> Result<(&[u8], StructureTag), BerError> {
    parse_tag_at(input, 0)
}

fn parse_tag_at(input: &[u8], offset: usize) -> Result<(&[u8], StructureTag), BerError> {
    let (rest, header) =
        parse_identifier(input).map_err(|_: nom::Err<nom::error::Error<&[u8]>>| BerError::UnexpectedEof { offset })?;
    let header_consumed = input.len() - rest.len();
    let (rest, len) = parse_length(rest, offset + header_consumed)?;
    if len as usize > rest.len() {
        return Err(BerError::LengthOverrun {
            offset: offset + header_consumed,
            declared: len,
            remaining: rest.len(),
        });
    }
    let (content, remainder) = rest.split_at(len as usize);
    let payload = match header.structure {
        TagStructure::Primitive => PL::P(content.to_vec()),
        TagStructure::Constructed => {
            let mut children = Vec::new();
            let mut cur = content;
            let mut inner_offset = offset + header_consumed + (rest.len() - content.len());
            while !cur.is_empty() {
                let (next, child) = parse_tag_at(cur, inner_offset)?;
                inner_offset += cur.len() - next.len();
                children.push(child);
                cur = next;
            }
            PL::C(children)
        }
    };
    Ok((
        remainder,
        StructureTag {
            class: header.class,
            id: header.id,
            payload,
        },
    ))
}

/// Decode a complete buffer as exactly one tag, rejecting trailing bytes.
pub fn parse_tag_complete(input: &[u8]) -> Result<StructureTag, BerError> {
    let (rest, tag) = parse_tag(input)?;
    if !rest.is_empty() {
        return Err(BerError::TrailingBytes {
            remaining: rest.len(),
        });
    }
    Ok(tag)
}

/// Interpret primitive content octets as an unsigned big-endian integer.
/// Used for BER lengths; unlike [`ber_integer_to_i64`] this never reads the
/// sign bit.
pub fn parse_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Decode a primitive INTEGER/ENUMERATED payload as a signed, two's
/// complement, big-endian value, rejecting widths that don't fit in `i64`.
pub fn ber_integer_to_i64(bytes: &[u8]) -> Result<i64, BerError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(BerError::IntegerTooWide { offset: 0 });
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
    buf[8 - bytes.len()..].copy_from_slice(bytes);
    Ok(i64::from_be_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::TagClass;

    #[test]
    fn primitive_short_length() {
        let bytes = [2u8, 2, 255, 127];
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tag.class, TagClass::Universal);
        assert_eq!(tag.id, 2);
        assert_eq!(tag.as_primitive(), Some(&[255, 127][..]));
    }

    #[test]
    fn constructed_nests_one_child() {
        let bytes = [
            48, 14, 12, 12, 72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33,
        ];
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tag.id, 16);
        let children = tag.as_constructed().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, 12);
    }

    #[test]
    fn long_form_length_two_octets() {
        // tag 0x30 (SEQUENCE), length 0x81 0x02 = 2, content 2 bytes
        let bytes = [0x30, 0x81, 0x02, 0x04, 0x00];
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        let children = tag.as_constructed().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].as_primitive(), Some(&[][..]));
    }

    #[test]
    fn length_overrun_is_rejected() {
        let bytes = [4u8, 5, 1, 2];
        let err = parse_tag(&bytes).unwrap_err();
        assert!(matches!(err, BerError::LengthOverrun { .. }));
    }

    #[test]
    fn indefinite_length_is_rejected() {
        let bytes = [0x30u8, 0x80, 0x00, 0x00];
        let err = parse_tag(&bytes).unwrap_err();
        assert!(matches!(err, BerError::IndefiniteLength { .. }));
    }

    #[test]
    fn signed_integer_round_trip() {
        assert_eq!(ber_integer_to_i64(&[0x7f]).unwrap(), 127);
        assert_eq!(ber_integer_to_i64(&[0x00, 0x80]).unwrap(), 128);
        assert_eq!(ber_integer_to_i64(&[0xff]).unwrap(), -1);
        assert_eq!(ber_integer_to_i64(&[0x80]).unwrap(), -128);
    }
}
