//! BER (Basic Encoding Rules) and DER engines
//!
//! Each value is a TLV (Tag-Length-Value) triplet per ITU-T X.690. DER is
//! the same engine in canonical mode; the differences are confined to the
//! `canonical`/`strict` flags on the encoder and decoder.

pub mod decoder;
pub mod encoder;
pub mod real;
pub mod types;

pub use decoder::BerDecoder;
pub use encoder::BerEncoder;
pub use types::{BerLength, BerTag};
