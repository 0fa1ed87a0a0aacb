//! OBJECT IDENTIFIER helpers
//!
//! Object identifier values travel through the value model as dotted decimal
//! text (`"1.2.840.113549"`). The codecs convert to and from the arc list at
//! the wire boundary.

use crate::error::{Asn1Error, Asn1Result};

/// Parse dotted decimal text into an arc list.
pub fn parse_oid(text: &str) -> Asn1Result<Vec<u64>> {
    let mut arcs = Vec::new();
    for part in text.split('.') {
        let arc = part.parse::<u64>().map_err(|_| {
            Asn1Error::encode(
                "OBJECT IDENTIFIER",
                format!("'{}' is not a dotted object identifier", text),
            )
        })?;
        arcs.push(arc);
    }
    if arcs.len() < 2 {
        return Err(Asn1Error::encode(
            "OBJECT IDENTIFIER",
            format!("'{}' must have at least two arcs", text),
        ));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(Asn1Error::encode(
            "OBJECT IDENTIFIER",
            format!("'{}' has an invalid leading arc pair", text),
        ));
    }
    Ok(arcs)
}

/// Format an arc list as dotted decimal text.
pub fn format_oid(arcs: &[u64]) -> String {
    arcs.iter()
        .map(|arc| arc.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_oid() {
        assert_eq!(parse_oid("1.2.840.113549").unwrap(), vec![1, 2, 840, 113549]);
    }

    #[test]
    fn test_parse_oid_rejects_short() {
        assert!(parse_oid("1").is_err());
    }

    #[test]
    fn test_parse_oid_rejects_bad_second_arc() {
        assert!(parse_oid("0.40").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let arcs = parse_oid("2.5.4.3").unwrap();
        assert_eq!(format_oid(&arcs), "2.5.4.3");
    }
}
