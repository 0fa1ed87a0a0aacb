//! Codec engines for the ASN.1 toolkit
//!
//! Every codec walks the same compiled [`asn1_compiler::TypeGraph`] and
//! converts between wire octets and the schema-free
//! [`asn1_core::Value`] model. Encode and decode are pure functions of
//! `(graph, value_or_octets)`; the graph is shared read-only, so concurrent
//! calls need no coordination.

pub mod ber;
pub mod gser;
pub mod jer;
pub mod per;
pub mod strings;
pub mod xer;

use asn1_compiler::{TypeGraph, TypeId};
use asn1_core::{Asn1Error, Asn1Result, Value};
use std::fmt;
use std::str::FromStr;

/// Wire encodings supported by the toolkit. `gser` is output-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Ber,
    Der,
    Per,
    Uper,
    Jer,
    Xer,
    Gser,
}

impl Codec {
    /// All accepted identifiers, in CLI order.
    pub const ALL: [Codec; 7] = [
        Codec::Ber,
        Codec::Der,
        Codec::Per,
        Codec::Uper,
        Codec::Jer,
        Codec::Xer,
        Codec::Gser,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Ber => "ber",
            Codec::Der => "der",
            Codec::Per => "per",
            Codec::Uper => "uper",
            Codec::Jer => "jer",
            Codec::Xer => "xer",
            Codec::Gser => "gser",
        }
    }

    /// Text codecs print as text in the CLI; binary codecs print as hex.
    pub fn is_textual(&self) -> bool {
        matches!(self, Codec::Jer | Codec::Xer | Codec::Gser)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = Asn1Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ber" => Ok(Codec::Ber),
            "der" => Ok(Codec::Der),
            "per" => Ok(Codec::Per),
            "uper" => Ok(Codec::Uper),
            "jer" => Ok(Codec::Jer),
            "xer" => Ok(Codec::Xer),
            "gser" => Ok(Codec::Gser),
            other => Err(Asn1Error::compile(format!("unknown codec '{}'", other))),
        }
    }
}

/// Encode `value` as `type_name` with the given codec.
pub fn encode(
    graph: &TypeGraph,
    codec: Codec,
    type_name: &str,
    id: TypeId,
    value: &Value,
) -> Asn1Result<Vec<u8>> {
    match codec {
        Codec::Ber => ber::BerEncoder::new(graph, false).encode(type_name, id, value),
        Codec::Der => ber::BerEncoder::new(graph, true).encode(type_name, id, value),
        Codec::Per => per::encode(graph, true, type_name, id, value),
        Codec::Uper => per::encode(graph, false, type_name, id, value),
        Codec::Jer => jer::encode(graph, type_name, id, value),
        Codec::Xer => xer::encode(graph, type_name, id, value),
        Codec::Gser => gser::encode(graph, type_name, id, value),
    }
}

/// Decode octets as `type_name` with the given codec.
pub fn decode(
    graph: &TypeGraph,
    codec: Codec,
    type_name: &str,
    id: TypeId,
    data: &[u8],
) -> Asn1Result<Value> {
    match codec {
        Codec::Ber => ber::BerDecoder::new(graph, data, false).decode(type_name, id),
        Codec::Der => ber::BerDecoder::new(graph, data, true).decode(type_name, id),
        Codec::Per => per::decode(graph, true, type_name, id, data),
        Codec::Uper => per::decode(graph, false, type_name, id, data),
        Codec::Jer => jer::decode(graph, type_name, id, data),
        Codec::Xer => xer::decode(graph, type_name, id, data),
        Codec::Gser => Err(gser::decode_unsupported(type_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_identifiers() {
        for codec in Codec::ALL {
            assert_eq!(codec.name().parse::<Codec>().unwrap(), codec);
        }
        assert!("cer".parse::<Codec>().is_err());
    }
}
