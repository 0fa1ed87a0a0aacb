//! Character string conversions shared by the codecs
//!
//! BMPString travels as UTF-16BE and UniversalString as UTF-32BE; every
//! other restricted string is carried as UTF-8 (a superset of the ASCII the
//! restricted alphabets actually allow).

use asn1_compiler::StringKind;
use asn1_core::{Asn1Error, Asn1Result};

pub fn string_to_bytes(kind: StringKind, text: &str) -> Vec<u8> {
    match kind {
        StringKind::Bmp => text
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
        StringKind::Universal => text
            .chars()
            .flat_map(|c| (c as u32).to_be_bytes())
            .collect(),
        _ => text.as_bytes().to_vec(),
    }
}

pub fn bytes_to_string(kind: StringKind, bytes: &[u8], location: &str) -> Asn1Result<String> {
    match kind {
        StringKind::Bmp => {
            if bytes.len() % 2 != 0 {
                return Err(Asn1Error::decode(location, "odd BMPString length"));
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units)
                .map_err(|_| Asn1Error::decode(location, "invalid BMPString"))
        }
        StringKind::Universal => {
            if bytes.len() % 4 != 0 {
                return Err(Asn1Error::decode(location, "odd UniversalString length"));
            }
            bytes
                .chunks_exact(4)
                .map(|quad| {
                    let code = u32::from_be_bytes([quad[0], quad[1], quad[2], quad[3]]);
                    char::from_u32(code)
                        .ok_or_else(|| Asn1Error::decode(location, "invalid UniversalString"))
                })
                .collect()
        }
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|_| Asn1Error::decode(location, "invalid character string")),
    }
}

/// Number of bits one character occupies for a known-multiplier string in
/// PER, together with the character mapping.
pub enum CharWidth {
    /// Character codes written directly in the given number of bits
    Codes(usize),
    /// Indices into a sorted alphabet
    Indexed(Vec<char>, usize),
}

/// PER character layout for a known-multiplier string kind, honoring an
/// effective permitted alphabet when present. Returns `None` for kinds PER
/// carries as plain length-prefixed octets (UTF8String and friends).
pub fn char_width(
    kind: StringKind,
    alphabet: Option<&[char]>,
    aligned: bool,
) -> Option<CharWidth> {
    let base: Vec<char> = match (alphabet, kind) {
        (Some(alphabet), _) => alphabet.to_vec(),
        (None, StringKind::Numeric) => " 0123456789".chars().collect(),
        (None, StringKind::Printable) => {
            let mut chars: Vec<char> = Vec::new();
            chars.extend('A'..='Z');
            chars.extend('a'..='z');
            chars.extend('0'..='9');
            chars.extend(" '()+,-./:=?".chars());
            chars
        }
        (None, StringKind::Ia5) => (0u8..=127).map(char::from).collect(),
        (None, StringKind::Visible) => (32u8..=126).map(char::from).collect(),
        (None, StringKind::Bmp) => return Some(CharWidth::Codes(16)),
        (None, StringKind::Universal) => return Some(CharWidth::Codes(32)),
        _ => return None,
    };

    let mut sorted = base;
    sorted.sort_unstable();
    sorted.dedup();
    let mut bits = usize::max(1, bit_width(sorted.len().saturating_sub(1) as u64));
    if aligned {
        bits = bits.next_power_of_two();
    }
    let max_code = sorted.last().map(|c| *c as u64).unwrap_or(0);
    if max_code < (1u64 << bits.min(63)) {
        Some(CharWidth::Codes(bits))
    } else {
        Some(CharWidth::Indexed(sorted, bits))
    }
}

/// Bits needed to represent `n` (0 needs 0 bits).
pub fn bit_width(n: u64) -> usize {
    (64 - n.leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bmp_round_trip() {
        let bytes = string_to_bytes(StringKind::Bmp, "Hi");
        assert_eq!(bytes, vec![0x00, b'H', 0x00, b'i']);
        assert_eq!(bytes_to_string(StringKind::Bmp, &bytes, "t").unwrap(), "Hi");
    }

    #[test]
    fn test_numeric_uses_indices() {
        match char_width(StringKind::Numeric, None, false) {
            Some(CharWidth::Indexed(alphabet, bits)) => {
                assert_eq!(bits, 4);
                assert_eq!(alphabet[0], ' ');
            }
            _ => panic!("expected indexed numeric alphabet"),
        }
    }

    #[test]
    fn test_ia5_uses_codes() {
        match char_width(StringKind::Ia5, None, false) {
            Some(CharWidth::Codes(bits)) => assert_eq!(bits, 7),
            _ => panic!("expected direct codes"),
        }
        match char_width(StringKind::Ia5, None, true) {
            Some(CharWidth::Codes(bits)) => assert_eq!(bits, 8),
            _ => panic!("expected direct codes"),
        }
    }

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(7), 3);
        assert_eq!(bit_width(8), 4);
        assert_eq!(bit_width(255), 8);
    }
}
