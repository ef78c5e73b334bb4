//! Builders for the handful of ASN.1 types LDAP actually uses. Each builder
//! struct carries its own `id`/`class` so a context or application tag can
//! override the universal default, then converts into a [`StructureTag`] via
//! [`ASNTag::into_structure`].

use crate::common::TagClass;
use crate::tag::{StructureTag, PL};
use crate::universal::Types;

/// Anything that can be lowered into the tagged-octet representation the
/// writer understands.
pub trait ASNTag {
    fn into_structure(self) -> StructureTag;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Boolean {
    pub id: u64,
    pub class: TagClass,
    pub inner: bool,
}

impl Default for Boolean {
    fn default() -> Self {
        Boolean {
            id: Types::Boolean as u64,
            class: TagClass::Universal,
            inner: false,
        }
    }
}

impl ASNTag for Boolean {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(vec![if self.inner { 0xff } else { 0x00 }]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

impl Default for Integer {
    fn default() -> Self {
        Integer {
            id: Types::Integer as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl ASNTag for Integer {
    fn into_structure(self) -> StructureTag {
        integer_structure(self.id, self.class, self.inner)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

impl Default for Enumerated {
    fn default() -> Self {
        Enumerated {
            id: Types::Enumerated as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl ASNTag for Enumerated {
    fn into_structure(self) -> StructureTag {
        integer_structure(self.id, self.class, self.inner)
    }
}

/// Minimal two's-complement encoding of a signed integer, with the extra
/// leading octet BER requires whenever the natural encoding's MSB would flip
/// the sign (see ITU-T X.690 §8.3.2).
fn integer_structure(id: u64, class: TagClass, inner: i64) -> StructureTag {
    let mut count = 1usize;
    if inner >= 0 {
        while count < 8 && inner >> (8 * count - 1) != 0 {
            count += 1;
        }
    } else {
        while count < 8 && inner >> (8 * count - 1) != -1 {
            count += 1;
        }
    }
    let bytes = inner.to_be_bytes();
    let out = bytes[8 - count..].to_vec();
    StructureTag {
        id,
        class,
        payload: PL::P(out),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OctetString {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<u8>,
}

impl Default for OctetString {
    fn default() -> Self {
        OctetString {
            id: Types::OctetString as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

impl ASNTag for OctetString {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(self.inner),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Null {
    pub id: u64,
    pub class: TagClass,
    pub inner: (),
}

impl Default for Null {
    fn default() -> Self {
        Null {
            id: Types::Null as u64,
            class: TagClass::Universal,
            inner: (),
        }
    }
}

impl ASNTag for Null {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::P(Vec::new()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence {
            id: Types::Sequence as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

impl ASNTag for Sequence {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::C(self.inner.into_iter().map(ASNTag::into_structure).collect()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Set {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

impl Default for Set {
    fn default() -> Self {
        Set {
            id: Types::Set as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

impl ASNTag for Set {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::C(self.inner.into_iter().map(ASNTag::into_structure).collect()),
        }
    }
}

/// A context tag wrapping exactly one inner value (used for `[N] EXPLICIT`
/// fields such as the Not-filter and the StartTLS/Cancel extended payloads).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplicitTag {
    pub id: u64,
    pub class: TagClass,
    pub inner: Box<Tag>,
}

impl ASNTag for ExplicitTag {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: PL::C(vec![self.inner.into_structure()]),
        }
    }
}

/// A tagged union of every ASN.1 value the LDAP protocol data model needs to
/// build or inspect. `Tag::StructureTag` lets already-decoded tags
/// round-trip through the same builder interface without re-encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tag {
    Boolean(Boolean),
    Integer(Integer),
    Enumerated(Enumerated),
    OctetString(OctetString),
    Null(Null),
    Sequence(Sequence),
    Set(Set),
    ExplicitTag(ExplicitTag),
    StructureTag(StructureTag),
}

impl ASNTag for Tag {
    fn into_structure(self) -> StructureTag {
        match self {
            Tag::Boolean(t) => t.into_structure(),
            Tag::Integer(t) => t.into_structure(),
            Tag::Enumerated(t) => t.into_structure(),
            Tag::OctetString(t) => t.into_structure(),
            Tag::Null(t) => t.into_structure(),
            Tag::Sequence(t) => t.into_structure(),
            Tag::Set(t) => t.into_structure(),
            Tag::ExplicitTag(t) => t.into_structure(),
            Tag::StructureTag(t) => t,
        }
    }
}
