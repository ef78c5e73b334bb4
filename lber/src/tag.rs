//! The decoded, structural representation of a BER tag: a class, a tag number
//! and either raw octets (primitive) or a list of nested tags (constructed).

use crate::common::TagClass;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PL {
    /// Primitive payload: raw content octets.
    P(Vec<u8>),
    /// Constructed payload: nested tags.
    C(Vec<StructureTag>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: PL,
}

impl StructureTag {
    /// Returns `self` if its class matches, `None` otherwise. Chains naturally
    /// with [`match_id`](Self::match_id) via `and_then`.
    pub fn match_class(self, class: TagClass) -> Option<Self> {
        if self.class == class {
            Some(self)
        } else {
            None
        }
    }

    /// Returns `self` if its tag number matches, `None` otherwise.
    pub fn match_id(self, id: u64) -> Option<Self> {
        if self.id == id {
            Some(self)
        } else {
            None
        }
    }

    /// Consumes `self`, returning the primitive content octets if this tag is
    /// primitive.
    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            PL::P(v) => Some(v),
            PL::C(_) => None,
        }
    }

    /// Consumes `self`, returning the nested tags if this tag is constructed.
    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            PL::C(v) => Some(v),
            PL::P(_) => None,
        }
    }

    /// Borrowing equivalent of [`expect_primitive`](Self::expect_primitive).
    pub fn as_primitive(&self) -> Option<&[u8]> {
        match &self.payload {
            PL::P(v) => Some(v),
            PL::C(_) => None,
        }
    }

    /// Borrowing equivalent of [`expect_constructed`](Self::expect_constructed).
    pub fn as_constructed(&self) -> Option<&[StructureTag]> {
        match &self.payload {
            PL::C(v) => Some(v),
            PL::P(_) => None,
        }
    }
}
