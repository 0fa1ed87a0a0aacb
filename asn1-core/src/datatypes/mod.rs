//! Data types shared by the compiler and the codecs

pub mod bit_string;
pub mod oid;
pub mod value;

pub use bit_string::BitString;
pub use oid::{format_oid, parse_oid};
pub use value::Value;
