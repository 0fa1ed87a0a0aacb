//! Core types for the ASN.1 toolkit
//!
//! This crate holds everything the other workspace members agree on: the
//! error taxonomy and the schema-free runtime value model. It deliberately
//! has no knowledge of ASN.1 syntax or of any encoding rule.

pub mod datatypes;
pub mod error;

pub use datatypes::{BitString, Value, format_oid, parse_oid};
pub use error::{Asn1Error, Asn1Result};
