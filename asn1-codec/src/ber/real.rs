//! X.690 REAL content octets
//!
//! Encoding uses the base-2 binary form with a normalized odd mantissa, or
//! the one-octet special forms for infinities, NaN and minus zero. Decoding
//! additionally accepts base 8 and 16, scale factors, and the ISO 6093
//! decimal forms.

use asn1_core::{Asn1Error, Asn1Result};

pub fn encode_real_content(value: f64) -> Vec<u8> {
    if value == 0.0 {
        return if value.is_sign_negative() {
            vec![0x43]
        } else {
            Vec::new()
        };
    }
    if value.is_infinite() {
        return if value > 0.0 { vec![0x40] } else { vec![0x41] };
    }
    if value.is_nan() {
        return vec![0x42];
    }

    let bits = value.to_bits();
    let sign = bits >> 63 == 1;
    let biased_exponent = ((bits >> 52) & 0x7FF) as i32;
    let fraction = bits & 0x000F_FFFF_FFFF_FFFF;

    let (mut mantissa, mut exponent) = if biased_exponent == 0 {
        // subnormal
        (fraction, -1074)
    } else {
        (fraction | (1u64 << 52), biased_exponent - 1075)
    };
    while mantissa & 1 == 0 {
        mantissa >>= 1;
        exponent += 1;
    }

    let exponent_bytes = minimal_signed_bytes(exponent);
    let mut out = Vec::with_capacity(2 + exponent_bytes.len() + 7);
    out.push(0x80 | if sign { 0x40 } else { 0x00 } | (exponent_bytes.len() as u8 - 1));
    out.extend_from_slice(&exponent_bytes);

    let mut mantissa_bytes = Vec::new();
    while mantissa > 0 {
        mantissa_bytes.push((mantissa & 0xFF) as u8);
        mantissa >>= 8;
    }
    mantissa_bytes.reverse();
    out.extend_from_slice(&mantissa_bytes);
    out
}

pub fn decode_real_content(content: &[u8], location: &str) -> Asn1Result<f64> {
    let Some(&first) = content.first() else {
        return Ok(0.0);
    };

    if first & 0x80 != 0 {
        // binary form
        let sign = if first & 0x40 != 0 { -1.0 } else { 1.0 };
        let base = match (first >> 4) & 0x03 {
            0 => 2.0f64,
            1 => 8.0,
            2 => 16.0,
            _ => return Err(Asn1Error::decode(location, "reserved REAL base")),
        };
        let scale = ((first >> 2) & 0x03) as i32;
        let (exponent_len, mut pos) = match first & 0x03 {
            3 => {
                let len = *content
                    .get(1)
                    .ok_or_else(|| Asn1Error::decode(location, "truncated REAL"))?
                    as usize;
                (len, 2)
            }
            n => (n as usize + 1, 1),
        };
        if content.len() < pos + exponent_len || exponent_len == 0 || exponent_len > 4 {
            return Err(Asn1Error::decode(location, "malformed REAL exponent"));
        }
        let mut exponent = if content[pos] & 0x80 != 0 { -1i64 } else { 0i64 };
        for &byte in &content[pos..pos + exponent_len] {
            exponent = (exponent << 8) | byte as i64;
        }
        pos += exponent_len;
        if content.len() - pos > 8 {
            return Err(Asn1Error::decode(location, "REAL mantissa too large"));
        }
        let mut mantissa = 0u64;
        for &byte in &content[pos..] {
            mantissa = (mantissa << 8) | byte as u64;
        }
        let value = sign
            * mantissa as f64
            * 2f64.powi(scale)
            * base.powi(
                i32::try_from(exponent)
                    .map_err(|_| Asn1Error::decode(location, "REAL exponent overflow"))?,
            );
        return Ok(value);
    }

    if first & 0x40 != 0 {
        return match first {
            0x40 => Ok(f64::INFINITY),
            0x41 => Ok(f64::NEG_INFINITY),
            0x42 => Ok(f64::NAN),
            0x43 => Ok(-0.0),
            _ => Err(Asn1Error::decode(location, "reserved REAL special value")),
        };
    }

    // ISO 6093 decimal forms (NR1-NR3)
    let text = std::str::from_utf8(&content[1..])
        .map_err(|_| Asn1Error::decode(location, "invalid decimal REAL"))?;
    text.trim()
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| Asn1Error::decode(location, "invalid decimal REAL"))
}

fn minimal_signed_bytes(value: i32) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut remaining = value;
    loop {
        let byte = (remaining & 0xFF) as u8;
        bytes.push(byte);
        remaining >>= 8;
        let sign_done = (remaining == 0 && byte & 0x80 == 0)
            || (remaining == -1 && byte & 0x80 != 0);
        if sign_done {
            break;
        }
    }
    bytes.reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_simple() {
        for value in [1.0, -1.0, 0.5, 3.25, 1234.5678, -0.001] {
            let content = encode_real_content(value);
            let decoded = decode_real_content(&content, "t").unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn test_zero_is_empty() {
        assert!(encode_real_content(0.0).is_empty());
        assert_eq!(decode_real_content(&[], "t").unwrap(), 0.0);
    }

    #[test]
    fn test_special_values() {
        assert_eq!(encode_real_content(f64::INFINITY), vec![0x40]);
        assert_eq!(encode_real_content(f64::NEG_INFINITY), vec![0x41]);
        assert!(decode_real_content(&[0x42], "t").unwrap().is_nan());
        assert_eq!(
            decode_real_content(&[0x40], "t").unwrap(),
            f64::INFINITY
        );
    }

    #[test]
    fn test_one_encodes_normalized() {
        // 1.0 = 1 * 2^0: header, one exponent octet of zero, mantissa 1
        assert_eq!(encode_real_content(1.0), vec![0x80, 0x00, 0x01]);
    }

    #[test]
    fn test_decimal_form() {
        assert_eq!(decode_real_content(b"\x03-12.5", "t").unwrap(), -12.5);
    }
}
