//! Bit-level cursor for the (U)PER codec
//!
//! `BitWriter` grows its buffer as bits are appended; `BitReader` tracks a
//! bit position and fails with a truncation error when asked for more bits
//! than remain. Both number bits MSB-first within each octet.

use asn1_core::{Asn1Error, Asn1Result};
use num_bigint::{BigInt, BigUint};

#[derive(Debug, Default)]
pub struct BitWriter {
    buffer: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn put_bit(&mut self, bit: bool) {
        let byte_index = self.bit_len / 8;
        if byte_index == self.buffer.len() {
            self.buffer.push(0);
        }
        if bit {
            self.buffer[byte_index] |= 1 << (7 - (self.bit_len % 8));
        }
        self.bit_len += 1;
    }

    /// Append the low `count` bits of `value`, most significant first.
    pub fn put_bits(&mut self, value: u64, count: usize) {
        debug_assert!(count <= 64);
        for i in (0..count).rev() {
            self.put_bit((value >> i) & 1 == 1);
        }
    }

    /// Append `count` bits of a non-negative big integer.
    pub fn put_bigint_bits(&mut self, value: &BigInt, count: usize) {
        let magnitude = value.magnitude();
        for i in (0..count).rev() {
            self.put_bit(magnitude.bit(i as u64));
        }
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.buffer.extend_from_slice(bytes);
            self.bit_len += bytes.len() * 8;
        } else {
            for &byte in bytes {
                self.put_bits(byte as u64, 8);
            }
        }
    }

    /// Pad with zero bits to the next octet boundary.
    pub fn align(&mut self) {
        while self.bit_len % 8 != 0 {
            self.put_bit(false);
        }
    }

    /// Final octets; a zero-bit encoding becomes one zero octet so that
    /// every encoded value occupies at least one byte on the wire.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.buffer.is_empty() {
            self.buffer.push(0);
        }
        self.buffer
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    pub fn get_bit(&mut self) -> Asn1Result<bool> {
        if self.pos >= self.data.len() * 8 {
            return Err(Asn1Error::decode("", "input truncated"));
        }
        let bit = (self.data[self.pos / 8] >> (7 - (self.pos % 8))) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    pub fn get_bits(&mut self, count: usize) -> Asn1Result<u64> {
        debug_assert!(count <= 64);
        if self.remaining_bits() < count {
            return Err(Asn1Error::decode("", "input truncated"));
        }
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | self.get_bit()? as u64;
        }
        Ok(value)
    }

    pub fn get_bigint_bits(&mut self, count: usize) -> Asn1Result<BigInt> {
        if self.remaining_bits() < count {
            return Err(Asn1Error::decode("", "input truncated"));
        }
        let mut value = BigUint::default();
        for _ in 0..count {
            value = (value << 1u8) + BigUint::from(self.get_bit()? as u8);
        }
        Ok(BigInt::from(value))
    }

    pub fn get_bytes(&mut self, count: usize) -> Asn1Result<Vec<u8>> {
        if self.remaining_bits() < count * 8 {
            return Err(Asn1Error::decode("", "input truncated"));
        }
        if self.pos % 8 == 0 {
            let start = self.pos / 8;
            self.pos += count * 8;
            return Ok(self.data[start..start + count].to_vec());
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.get_bits(8)? as u8);
        }
        Ok(out)
    }

    /// Skip to the next octet boundary.
    pub fn align(&mut self) -> Asn1Result<()> {
        let misaligned = self.pos % 8;
        if misaligned != 0 {
            let skip = 8 - misaligned;
            if self.remaining_bits() < skip {
                return Err(Asn1Error::decode("", "input truncated"));
            }
            self.pos += skip;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_bits_msb_first() {
        let mut writer = BitWriter::new();
        writer.put_bits(0b101, 3);
        assert_eq!(writer.into_bytes(), vec![0xA0]);
    }

    #[test]
    fn test_empty_encoding_is_one_octet() {
        assert_eq!(BitWriter::new().into_bytes(), vec![0x00]);
    }

    #[test]
    fn test_align_pads_zeros() {
        let mut writer = BitWriter::new();
        writer.put_bit(true);
        writer.align();
        writer.put_bytes(&[0xFF]);
        assert_eq!(writer.into_bytes(), vec![0x80, 0xFF]);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut writer = BitWriter::new();
        writer.put_bit(true);
        writer.put_bytes(&[0xFF]);
        assert_eq!(writer.bit_len(), 9);
        assert_eq!(writer.into_bytes(), vec![0xFF, 0x80]);
    }

    #[test]
    fn test_reader_round_trip() {
        let mut writer = BitWriter::new();
        writer.put_bits(0b1101, 4);
        writer.put_bits(300, 12);
        let bytes = writer.into_bytes();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.get_bits(4).unwrap(), 0b1101);
        assert_eq!(reader.get_bits(12).unwrap(), 300);
    }

    #[test]
    fn test_reader_truncation() {
        let mut reader = BitReader::new(&[0xFF]);
        assert!(reader.get_bits(9).is_err());
    }

    #[test]
    fn test_bigint_round_trip() {
        let value = BigInt::from(123456789012345678u64) * 1000;
        let mut writer = BitWriter::new();
        writer.put_bigint_bits(&value, 80);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.get_bigint_bits(80).unwrap(), value);
    }
}
