//! BER wire primitives (tag and length octets)

use asn1_compiler::RawTag;
use asn1_core::{Asn1Error, Asn1Result};

/// A decoded or to-be-encoded BER tag octet group.
///
/// Encoding format, first octet:
///
/// ```text
/// Bits: 8 7 6 5 4 3 2 1
///       C C P T T T T T
/// ```
///
/// CC is the class, P the constructed bit, TTTTT the tag number; all ones in
/// the number field announce the long (base-128) form in following octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BerTag {
    pub class_bits: u8,
    pub constructed: bool,
    pub number: u32,
}

impl BerTag {
    pub fn new(raw: RawTag, constructed: bool) -> Self {
        Self {
            class_bits: raw.class_bits,
            constructed,
            number: raw.number,
        }
    }

    pub fn raw(&self) -> RawTag {
        RawTag {
            class_bits: self.class_bits,
            number: self.number,
        }
    }

    /// Does this wire tag carry the given class and number?
    pub fn matches(&self, raw: RawTag) -> bool {
        self.class_bits == raw.class_bits && self.number == raw.number
    }

    /// Encode to tag octets.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(1);
        let class_bits = self.class_bits << 6;
        let constructed_bit = if self.constructed { 0x20 } else { 0x00 };

        if self.number <= 30 {
            result.push(class_bits | constructed_bit | (self.number as u8 & 0x1F));
        } else {
            result.push(class_bits | constructed_bit | 0x1F);
            let mut remaining = self.number;
            let mut bytes = Vec::new();
            while remaining > 0 {
                bytes.push((remaining & 0x7F) as u8);
                remaining >>= 7;
            }
            for (i, &byte) in bytes.iter().rev().enumerate() {
                if i < bytes.len() - 1 {
                    result.push(byte | 0x80);
                } else {
                    result.push(byte);
                }
            }
        }
        result
    }

    /// Decode from the front of `data`, returning the tag and the number of
    /// octets consumed.
    pub fn decode(data: &[u8]) -> Asn1Result<(Self, usize)> {
        let first = *data
            .first()
            .ok_or_else(|| Asn1Error::decode("", "out of data reading a tag"))?;
        let class_bits = first >> 6;
        let constructed = (first & 0x20) != 0;
        let tag_bits = first & 0x1F;

        if tag_bits < 31 {
            return Ok((
                Self {
                    class_bits,
                    constructed,
                    number: tag_bits as u32,
                },
                1,
            ));
        }

        let mut number = 0u32;
        let mut pos = 1;
        loop {
            let byte = *data
                .get(pos)
                .ok_or_else(|| Asn1Error::decode("", "truncated long form tag"))?;
            if pos > 5 {
                return Err(Asn1Error::decode("", "tag number too large"));
            }
            number = (number << 7) | ((byte & 0x7F) as u32);
            pos += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok((
            Self {
                class_bits,
                constructed,
                number,
            },
            pos,
        ))
    }
}

/// BER length octets: definite (short or long form) or indefinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BerLength {
    Definite(usize),
    Indefinite,
}

impl BerLength {
    /// Encode a definite length, short form below 128, long form above.
    pub fn encode_definite(length: usize) -> Vec<u8> {
        if length < 128 {
            return vec![length as u8];
        }
        let mut num_bytes = 0;
        let mut temp = length;
        while temp > 0 {
            num_bytes += 1;
            temp >>= 8;
        }
        let mut result = Vec::with_capacity(1 + num_bytes);
        result.push(0x80 | num_bytes as u8);
        for i in (0..num_bytes).rev() {
            result.push(((length >> (i * 8)) & 0xFF) as u8);
        }
        result
    }

    /// Decode from the front of `data`. `strict` additionally rejects the
    /// indefinite form and non-minimal long forms, as DER requires.
    pub fn decode(data: &[u8], strict: bool) -> Asn1Result<(Self, usize)> {
        let first = *data
            .first()
            .ok_or_else(|| Asn1Error::decode("", "out of data reading a length"))?;

        if first & 0x80 == 0 {
            return Ok((BerLength::Definite((first & 0x7F) as usize), 1));
        }

        let num_bytes = (first & 0x7F) as usize;
        if num_bytes == 0 {
            if strict {
                return Err(Asn1Error::decode("", "indefinite length not allowed"));
            }
            return Ok((BerLength::Indefinite, 1));
        }
        if num_bytes > 8 {
            return Err(Asn1Error::decode("", "length of length too large"));
        }
        if data.len() < 1 + num_bytes {
            return Err(Asn1Error::decode("", "truncated long form length"));
        }
        let mut length = 0u64;
        for &byte in &data[1..1 + num_bytes] {
            length = (length << 8) | byte as u64;
        }
        let length = usize::try_from(length)
            .map_err(|_| Asn1Error::decode("", "length overflow"))?;
        if strict && (length < 128 || data[1] == 0) {
            return Err(Asn1Error::decode("", "non-minimal length encoding"));
        }
        Ok((BerLength::Definite(length), 1 + num_bytes))
    }
}

/// Assemble one TLV.
pub fn encode_tlv(tag: RawTag, constructed: bool, content: &[u8]) -> Vec<u8> {
    let tag_bytes = BerTag::new(tag, constructed).encode();
    let length_bytes = BerLength::encode_definite(content.len());
    let mut out = Vec::with_capacity(tag_bytes.len() + length_bytes.len() + content.len());
    out.extend_from_slice(&tag_bytes);
    out.extend_from_slice(&length_bytes);
    out.extend_from_slice(content);
    out
}

/// OBJECT IDENTIFIER content octets from an arc list. The first two arcs
/// collapse into one subidentifier (`40 * first + second`); RELATIVE-OID
/// skips that special case.
pub fn encode_oid_content(arcs: &[u64], relative: bool) -> Asn1Result<Vec<u8>> {
    let mut out = Vec::new();
    let subidentifiers: Vec<u64> = if relative {
        arcs.to_vec()
    } else {
        if arcs.len() < 2 {
            return Err(Asn1Error::encode(
                "OBJECT IDENTIFIER",
                "need at least two arcs",
            ));
        }
        let first = arcs[0]
            .checked_mul(40)
            .and_then(|v| v.checked_add(arcs[1]))
            .ok_or_else(|| Asn1Error::encode("OBJECT IDENTIFIER", "arc too large"))?;
        std::iter::once(first).chain(arcs[2..].iter().copied()).collect()
    };
    for subidentifier in subidentifiers {
        let mut bytes = Vec::new();
        let mut remaining = subidentifier;
        loop {
            bytes.push((remaining & 0x7F) as u8);
            remaining >>= 7;
            if remaining == 0 {
                break;
            }
        }
        for (i, &byte) in bytes.iter().rev().enumerate() {
            if i < bytes.len() - 1 {
                out.push(byte | 0x80);
            } else {
                out.push(byte);
            }
        }
    }
    Ok(out)
}

/// Arc list from OBJECT IDENTIFIER content octets.
pub fn decode_oid_content(content: &[u8], relative: bool) -> Asn1Result<Vec<u64>> {
    let mut subidentifiers = Vec::new();
    let mut current = 0u64;
    let mut in_progress = false;
    for &byte in content {
        if current > (u64::MAX >> 7) {
            return Err(Asn1Error::decode("", "object identifier arc overflow"));
        }
        current = (current << 7) | (byte & 0x7F) as u64;
        in_progress = true;
        if byte & 0x80 == 0 {
            subidentifiers.push(current);
            current = 0;
            in_progress = false;
        }
    }
    if in_progress {
        return Err(Asn1Error::decode("", "truncated object identifier"));
    }
    if relative {
        return Ok(subidentifiers);
    }
    let first = *subidentifiers
        .first()
        .ok_or_else(|| Asn1Error::decode("", "empty object identifier"))?;
    let mut arcs = if first < 40 {
        vec![0, first]
    } else if first < 80 {
        vec![1, first - 40]
    } else {
        vec![2, first - 80]
    };
    arcs.extend_from_slice(&subidentifiers[1..]);
    Ok(arcs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asn1_compiler::TagClass;

    #[test]
    fn test_tag_short_form() {
        let tag = BerTag::new(RawTag::universal(2), false);
        assert_eq!(tag.encode(), vec![0x02]);
    }

    #[test]
    fn test_tag_constructed() {
        let tag = BerTag::new(RawTag::universal(16), true);
        assert_eq!(tag.encode(), vec![0x30]);
    }

    #[test]
    fn test_tag_context_specific() {
        let tag = BerTag::new(RawTag::new(TagClass::ContextSpecific, 0), true);
        assert_eq!(tag.encode(), vec![0xA0]);
    }

    #[test]
    fn test_tag_long_form_round_trip() {
        let tag = BerTag::new(RawTag::new(TagClass::Application, 95), false);
        let encoded = tag.encode();
        assert_eq!(encoded[0] & 0x1F, 0x1F);
        let (decoded, consumed) = BerTag::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.number, 95);
    }

    #[test]
    fn test_length_short() {
        assert_eq!(BerLength::encode_definite(100), vec![100]);
    }

    #[test]
    fn test_length_long() {
        assert_eq!(BerLength::encode_definite(406), vec![0x82, 0x01, 0x96]);
        let (length, consumed) = BerLength::decode(&[0x82, 0x01, 0x96], false).unwrap();
        assert_eq!(length, BerLength::Definite(406));
        assert_eq!(consumed, 3);
    }

    #[test]
    fn test_indefinite_length() {
        let (length, _) = BerLength::decode(&[0x80], false).unwrap();
        assert_eq!(length, BerLength::Indefinite);
        assert!(BerLength::decode(&[0x80], true).is_err());
    }

    #[test]
    fn test_strict_rejects_non_minimal_length() {
        // 100 encoded in long form
        assert!(BerLength::decode(&[0x81, 0x64], true).is_err());
    }

    #[test]
    fn test_oid_content_round_trip() {
        let arcs = vec![1, 2, 840, 113549];
        let content = encode_oid_content(&arcs, false).unwrap();
        assert_eq!(content, vec![0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D]);
        assert_eq!(decode_oid_content(&content, false).unwrap(), arcs);
    }
}
