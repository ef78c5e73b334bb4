//! A small, definite-length-only BER/DER codec covering exactly the ASN.1
//! subset the LDAP protocol data model (RFC 4511) needs: booleans, integers,
//! enumerated values, octet strings, null, sequences, sets, and explicit
//! context tags, each taggable with an arbitrary class and tag number.
//!
//! This crate knows nothing about LDAP itself; `StructureTag` is the
//! universal decoded representation consumers pattern-match against to build
//! their own protocol types.

pub mod common;
pub mod error;
pub mod parse;
pub mod structures;
pub mod tag;
pub mod universal;

pub use common::{TagClass, TagStructure};
pub use error::BerError;
pub use parse::{ber_integer_to_i64, parse_tag, parse_tag_complete, parse_uint};
pub use structures::{ASNTag, Boolean, Enumerated, ExplicitTag, Integer, Null, OctetString, Sequence, Set, Tag};
pub use tag::{StructureTag, PL};
pub use write::encode;

mod write;
