//! (U)PER decoder
//!
//! Exact inverse of the encoder: a bit cursor walks the input under the
//! direction of the effective constraints. Unknown extension additions are
//! preserved as opaque open-type payloads so a re-encode emits them
//! verbatim.

use crate::ber::real::decode_real_content;
use crate::ber::types::decode_oid_content;
use crate::per::bits::BitReader;
use crate::strings::{CharWidth, bytes_to_string, char_width};
use asn1_compiler::{
    Addition, Alternative, Component, Presence, Record, SizeRange, TypeGraph, TypeId, TypeKind,
};
use asn1_core::{Asn1Error, Asn1Result, BitString, Value, format_oid};
use num_bigint::BigInt;
use num_traits::{One, ToPrimitive};

pub struct PerDecoder<'graph, 'data> {
    graph: &'graph TypeGraph,
    aligned: bool,
    path: Vec<String>,
    reader: BitReader<'data>,
}

pub fn decode(
    graph: &TypeGraph,
    aligned: bool,
    type_name: &str,
    id: TypeId,
    data: &[u8],
) -> Asn1Result<Value> {
    let mut decoder = PerDecoder {
        graph,
        aligned,
        path: vec![type_name.to_string()],
        reader: BitReader::new(data),
    };
    // trailing pad bits up to the final octet boundary are expected
    decoder.decode_value(id)
}

impl<'graph, 'data> PerDecoder<'graph, 'data> {
    fn location(&self) -> String {
        self.path.join(".")
    }

    fn err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::decode(self.location(), reason)
    }

    fn relocate(&self, error: Asn1Error) -> Asn1Error {
        match error {
            Asn1Error::Decode { location, reason } if location.is_empty() => {
                Asn1Error::decode(self.location(), reason)
            }
            other => other,
        }
    }

    fn get_bit(&mut self) -> Asn1Result<bool> {
        self.reader.get_bit().map_err(|e| self.relocate(e))
    }

    fn get_bits(&mut self, count: usize) -> Asn1Result<u64> {
        self.reader.get_bits(count).map_err(|e| self.relocate(e))
    }

    fn get_bytes(&mut self, count: usize) -> Asn1Result<Vec<u8>> {
        self.reader.get_bytes(count).map_err(|e| self.relocate(e))
    }

    fn align(&mut self) -> Asn1Result<()> {
        self.reader.align().map_err(|e| self.relocate(e))
    }

    // ------------------------------------------------------------------
    // Field primitives
    // ------------------------------------------------------------------

    /// General length determinant. The second element is true when this was
    /// a fragmentation header and more length determinants follow.
    fn get_general_length(&mut self) -> Asn1Result<(usize, bool)> {
        if self.aligned {
            self.align()?;
        }
        let first = self.get_bits(8)?;
        if first & 0x80 == 0 {
            return Ok((first as usize, false));
        }
        if first & 0x40 == 0 {
            let second = self.get_bits(8)?;
            return Ok(((((first & 0x3F) << 8) | second) as usize, false));
        }
        let chunks = (first & 0x3F) as usize;
        if chunks == 0 || chunks > 4 {
            return Err(self.err("invalid fragmentation header"));
        }
        Ok((chunks * 16384, true))
    }

    /// Drive `consume` once per length determinant until the final
    /// fragment, returning the total unit count.
    fn decode_fragmented_units(
        &mut self,
        mut consume: impl FnMut(&mut Self, usize) -> Asn1Result<()>,
    ) -> Asn1Result<usize> {
        let mut total = 0usize;
        loop {
            let (count, fragment) = self.get_general_length()?;
            consume(self, count)?;
            total += count;
            if !fragment {
                return Ok(total);
            }
        }
    }

    fn get_open_octets(&mut self) -> Asn1Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.decode_fragmented_units(|decoder, count| {
            if decoder.aligned {
                decoder.align()?;
            }
            bytes.extend(decoder.get_bytes(count)?);
            Ok(())
        })?;
        Ok(bytes)
    }

    fn get_normally_small(&mut self) -> Asn1Result<u64> {
        if !self.get_bit()? {
            return self.get_bits(6);
        }
        let (count, fragment) = self.get_general_length()?;
        if fragment || count > 8 {
            return Err(self.err("unreasonable extension index"));
        }
        if self.aligned {
            self.align()?;
        }
        let bytes = self.get_bytes(count)?;
        let mut value = 0u64;
        for byte in bytes {
            value = (value << 8) | byte as u64;
        }
        Ok(value)
    }

    fn get_constrained(&mut self, range: &BigInt) -> Asn1Result<BigInt> {
        if range <= &BigInt::one() {
            return Ok(BigInt::from(0));
        }
        let max = range - 1u8;
        if !self.aligned {
            let bits = max.bits() as usize;
            return self
                .reader
                .get_bigint_bits(bits)
                .map_err(|e| self.relocate(e));
        }
        if let Some(range_small) = range.to_u64() {
            if range_small <= 255 {
                let bits = crate::strings::bit_width(range_small - 1);
                return Ok(BigInt::from(self.get_bits(bits)?));
            }
            if range_small == 256 {
                self.align()?;
                return Ok(BigInt::from(self.get_bits(8)?));
            }
            if range_small <= 65536 {
                self.align()?;
                return Ok(BigInt::from(self.get_bits(16)?));
            }
        }
        let max_octets = max.bits().div_ceil(8).max(1);
        let count = self.get_constrained(&BigInt::from(max_octets))?;
        let count = count
            .to_usize()
            .ok_or_else(|| self.err("octet count out of range"))?
            + 1;
        self.align()?;
        let bytes = self.get_bytes(count)?;
        Ok(BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes))
    }

    fn get_unconstrained(&mut self) -> Asn1Result<BigInt> {
        let (count, fragment) = self.get_general_length()?;
        if fragment {
            return Err(self.err("unreasonable INTEGER length"));
        }
        if self.aligned {
            self.align()?;
        }
        let bytes = self.get_bytes(count)?;
        if bytes.is_empty() {
            return Err(self.err("empty INTEGER"));
        }
        Ok(BigInt::from_signed_bytes_be(&bytes))
    }

    fn get_semi_constrained(&mut self) -> Asn1Result<BigInt> {
        let (count, fragment) = self.get_general_length()?;
        if fragment {
            return Err(self.err("unreasonable INTEGER length"));
        }
        if self.aligned {
            self.align()?;
        }
        let bytes = self.get_bytes(count)?;
        Ok(BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes))
    }

    /// Decode an open-type payload with a fresh bit cursor.
    fn decode_from_octets(&mut self, id: TypeId, octets: &[u8]) -> Asn1Result<Value> {
        let mut sub = PerDecoder {
            graph: self.graph,
            aligned: self.aligned,
            path: std::mem::take(&mut self.path),
            reader: BitReader::new(octets),
        };
        let result = sub.decode_value(id);
        self.path = sub.path;
        result
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn decode_value(&mut self, id: TypeId) -> Asn1Result<Value> {
        let effective = &self.graph.node(id).effective;
        let resolved = self.graph.resolve(id);
        match &self.graph.node(resolved).kind {
            TypeKind::Boolean => Ok(Value::Boolean(self.get_bit()?)),
            TypeKind::Null => Ok(Value::Null),
            TypeKind::Integer { .. } => {
                let n = match &effective.value {
                    Some(range) => {
                        if range.extensible && self.get_bit()? {
                            self.get_unconstrained()?
                        } else {
                            match (&range.lb, &range.ub) {
                                (Some(lb), Some(ub)) => {
                                    let span = ub - lb + 1u8;
                                    lb + self.get_constrained(&span)?
                                }
                                (Some(lb), None) => lb + self.get_semi_constrained()?,
                                _ => self.get_unconstrained()?,
                            }
                        }
                    }
                    None => self.get_unconstrained()?,
                };
                Ok(Value::Integer(n))
            }
            TypeKind::Enumerated {
                root,
                extensible,
                additions,
            } => self.decode_enumerated(root, *extensible, additions),
            TypeKind::Real => {
                let content = self.get_open_octets()?;
                Ok(Value::Real(decode_real_content(&content, &self.location())?))
            }
            TypeKind::BitString { .. } => self.decode_bit_string(&effective.size),
            TypeKind::OctetString => {
                Ok(Value::Bytes(self.decode_octets(&effective.size)?))
            }
            TypeKind::CharacterString(string_kind) => {
                match char_width(*string_kind, effective.alphabet.as_deref(), self.aligned) {
                    None => {
                        let bytes = self.get_open_octets()?;
                        Ok(Value::Text(bytes_to_string(
                            *string_kind,
                            &bytes,
                            &self.location(),
                        )?))
                    }
                    Some(width) => self.decode_known_multiplier(&width, &effective.size),
                }
            }
            TypeKind::Time(_) => {
                let bytes = self.get_open_octets()?;
                let text = String::from_utf8(bytes)
                    .map_err(|_| self.err("invalid time string"))?;
                Ok(Value::Text(text))
            }
            TypeKind::ObjectIdentifier => {
                let content = self.get_open_octets()?;
                let arcs =
                    decode_oid_content(&content, false).map_err(|e| self.relocate(e))?;
                Ok(Value::Text(format_oid(&arcs)))
            }
            TypeKind::RelativeOid => {
                let content = self.get_open_octets()?;
                let arcs =
                    decode_oid_content(&content, true).map_err(|e| self.relocate(e))?;
                Ok(Value::Text(format_oid(&arcs)))
            }
            TypeKind::Sequence(record) | TypeKind::Set(record) => self.decode_record(record),
            TypeKind::SequenceOf { element } | TypeKind::SetOf { element } => {
                self.decode_list(*element, &effective.size)
            }
            TypeKind::Choice {
                root,
                extensible,
                additions,
            } => self.decode_choice(root, *extensible, additions),
            TypeKind::Any => Ok(Value::Opaque(self.get_open_octets()?)),
            TypeKind::Reference(_) => Err(self.err("unresolved reference")),
        }
    }

    fn decode_enumerated(
        &mut self,
        root: &[(String, i64)],
        extensible: bool,
        additions: &[(String, i64)],
    ) -> Asn1Result<Value> {
        if extensible && self.get_bit()? {
            let index = self.get_normally_small()? as usize;
            let (name, _) = additions
                .get(index)
                .ok_or_else(|| self.err(format!("unknown enumerated extension {}", index)))?;
            return Ok(Value::Text(name.clone()));
        }
        let mut ordered: Vec<&(String, i64)> = root.iter().collect();
        ordered.sort_by_key(|(_, v)| *v);
        let index = self
            .get_constrained(&BigInt::from(ordered.len()))?
            .to_usize()
            .unwrap_or(usize::MAX);
        let (name, _) = ordered
            .get(index)
            .ok_or_else(|| self.err(format!("enumerated index {} out of range", index)))?;
        Ok(Value::Text(name.clone()))
    }

    fn get_bit_field(&mut self, count: usize) -> Asn1Result<BitString> {
        let mut bytes = vec![0u8; count.div_ceil(8)];
        for i in 0..count {
            if self.get_bit()? {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        BitString::new(bytes, count).map_err(|e| self.err(e.to_string()))
    }

    fn decode_bit_string(&mut self, size: &Option<SizeRange>) -> Asn1Result<Value> {
        match size {
            Some(size) => {
                if size.extensible && self.get_bit()? {
                    return self.decode_fragmented_bits();
                }
                if size.ub == Some(size.lb) {
                    let n = size.lb as usize;
                    if n != 0 && self.aligned && n > 16 {
                        self.align()?;
                    }
                    return Ok(Value::BitString(self.get_bit_field(n)?));
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        let n = (self.get_constrained(&span)?
                            + BigInt::from(size.lb))
                        .to_usize()
                        .ok_or_else(|| self.err("bit string length out of range"))?;
                        if self.aligned && ub > 16 {
                            self.align()?;
                        }
                        Ok(Value::BitString(self.get_bit_field(n)?))
                    }
                    _ => self.decode_fragmented_bits(),
                }
            }
            None => self.decode_fragmented_bits(),
        }
    }

    fn decode_fragmented_bits(&mut self) -> Asn1Result<Value> {
        let mut all = Vec::new();
        self.decode_fragmented_units(|decoder, count| {
            for _ in 0..count {
                all.push(decoder.get_bit()?);
            }
            Ok(())
        })?;
        let mut bytes = vec![0u8; all.len().div_ceil(8)];
        for (i, bit) in all.iter().enumerate() {
            if *bit {
                bytes[i / 8] |= 1 << (7 - (i % 8));
            }
        }
        let bits =
            BitString::new(bytes, all.len()).map_err(|e| self.err(e.to_string()))?;
        Ok(Value::BitString(bits))
    }

    fn decode_octets(&mut self, size: &Option<SizeRange>) -> Asn1Result<Vec<u8>> {
        match size {
            Some(size) => {
                if size.extensible && self.get_bit()? {
                    return self.get_open_octets();
                }
                if size.ub == Some(size.lb) {
                    let n = size.lb as usize;
                    if n == 0 {
                        return Ok(Vec::new());
                    }
                    if self.aligned && n > 2 {
                        self.align()?;
                    }
                    return self.get_bytes(n);
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        let n = (self.get_constrained(&span)? + BigInt::from(size.lb))
                            .to_usize()
                            .ok_or_else(|| self.err("octet string length out of range"))?;
                        if self.aligned && ub > 2 {
                            self.align()?;
                        }
                        self.get_bytes(n)
                    }
                    _ => self.get_open_octets(),
                }
            }
            None => self.get_open_octets(),
        }
    }

    fn decode_known_multiplier(
        &mut self,
        width: &CharWidth,
        size: &Option<SizeRange>,
    ) -> Asn1Result<Value> {
        let bits = match width {
            CharWidth::Codes(bits) => *bits,
            CharWidth::Indexed(_, bits) => *bits,
        };
        let mut chars: Vec<char> = Vec::new();

        let mut take = |decoder: &mut Self, count: usize| -> Asn1Result<()> {
            for _ in 0..count {
                let code = decoder.get_bits(bits)?;
                let c = match width {
                    CharWidth::Codes(_) => char::from_u32(code as u32)
                        .ok_or_else(|| decoder.err("invalid character code"))?,
                    CharWidth::Indexed(alphabet, _) => *alphabet
                        .get(code as usize)
                        .ok_or_else(|| decoder.err("character index out of range"))?,
                };
                chars.push(c);
            }
            Ok(())
        };

        match size {
            Some(size) if !(size.extensible && self.get_bit()?) => {
                if size.ub == Some(size.lb) {
                    let n = size.lb as usize;
                    if n != 0 {
                        if self.aligned && n * bits > 16 {
                            self.align()?;
                        }
                        take(self, n)?;
                    }
                } else {
                    match size.ub {
                        Some(ub) if ub < 65536 => {
                            let span = BigInt::from(ub - size.lb + 1);
                            let n = (self.get_constrained(&span)?
                                + BigInt::from(size.lb))
                            .to_usize()
                            .ok_or_else(|| self.err("string length out of range"))?;
                            if self.aligned && (ub as usize * bits) > 16 {
                                self.align()?;
                            }
                            take(self, n)?;
                        }
                        _ => {
                            self.decode_fragmented_units(|decoder, count| {
                                take(decoder, count)
                            })?;
                        }
                    }
                }
            }
            _ => {
                self.decode_fragmented_units(|decoder, count| take(decoder, count))?;
            }
        }
        Ok(Value::Text(chars.into_iter().collect()))
    }

    fn decode_record(&mut self, record: &Record) -> Asn1Result<Value> {
        let ext_present = record.extensible && self.get_bit()?;

        let optional_count = record.optional_root_count();
        let mut presence = Vec::with_capacity(optional_count);
        for _ in 0..optional_count {
            presence.push(self.get_bit()?);
        }
        let mut presence = presence.into_iter();

        let mut fields: Vec<(String, Value)> = Vec::new();
        for component in &record.root {
            let present = match &component.presence {
                Presence::Required => true,
                _ => presence.next().unwrap_or(false),
            };
            if present {
                self.path.push(component.name.clone());
                let value = self.decode_value(component.ty)?;
                self.path.pop();
                fields.push((component.name.clone(), value));
            } else if let Presence::Default(default) = &component.presence {
                fields.push((component.name.clone(), default.clone()));
            }
        }

        if ext_present {
            let total = self.get_normally_small()? as usize + 1;
            let mut addition_presence = Vec::with_capacity(total);
            for _ in 0..total {
                addition_presence.push(self.get_bit()?);
            }
            for (index, present) in addition_presence.into_iter().enumerate() {
                if !present {
                    continue;
                }
                let octets = self.get_open_octets()?;
                match record.additions.get(index) {
                    Some(Addition::Single(component)) => {
                        self.path.push(component.name.clone());
                        let value = self.decode_from_octets(component.ty, &octets)?;
                        self.path.pop();
                        fields.push((component.name.clone(), value));
                    }
                    Some(Addition::Group(components)) => {
                        let group =
                            self.decode_addition_group(components, &octets)?;
                        fields.extend(group);
                    }
                    None => {
                        fields.push((
                            format!("unknown-addition-{}", index),
                            Value::Opaque(octets),
                        ));
                    }
                }
            }
        }
        Ok(Value::Record(fields))
    }

    fn decode_addition_group(
        &mut self,
        components: &[Component],
        octets: &[u8],
    ) -> Asn1Result<Vec<(String, Value)>> {
        let mut sub = PerDecoder {
            graph: self.graph,
            aligned: self.aligned,
            path: std::mem::take(&mut self.path),
            reader: BitReader::new(octets),
        };
        let result = (|| {
            let optional_count = components
                .iter()
                .filter(|c| !matches!(c.presence, Presence::Required))
                .count();
            let mut presence = Vec::with_capacity(optional_count);
            for _ in 0..optional_count {
                presence.push(sub.get_bit()?);
            }
            let mut presence = presence.into_iter();
            let mut fields = Vec::new();
            for component in components {
                let present = match &component.presence {
                    Presence::Required => true,
                    _ => presence.next().unwrap_or(false),
                };
                if present {
                    sub.path.push(component.name.clone());
                    let value = sub.decode_value(component.ty)?;
                    sub.path.pop();
                    fields.push((component.name.clone(), value));
                } else if let Presence::Default(default) = &component.presence {
                    fields.push((component.name.clone(), default.clone()));
                }
            }
            Ok(fields)
        })();
        self.path = sub.path;
        result
    }

    fn decode_list(
        &mut self,
        element: TypeId,
        size: &Option<SizeRange>,
    ) -> Asn1Result<Value> {
        let mut items: Vec<Value> = Vec::new();

        let take = |decoder: &mut Self,
                    items: &mut Vec<Value>,
                    count: usize|
         -> Asn1Result<()> {
            for _ in 0..count {
                decoder.path.push(items.len().to_string());
                let item = decoder.decode_value(element)?;
                decoder.path.pop();
                items.push(item);
            }
            Ok(())
        };

        match size {
            Some(size) if !(size.extensible && self.get_bit()?) => {
                if size.ub == Some(size.lb) {
                    let n = size.lb as usize;
                    take(self, &mut items, n)?;
                } else {
                    match size.ub {
                        Some(ub) if ub < 65536 => {
                            let span = BigInt::from(ub - size.lb + 1);
                            let n = (self.get_constrained(&span)?
                                + BigInt::from(size.lb))
                            .to_usize()
                            .ok_or_else(|| self.err("list length out of range"))?;
                            take(self, &mut items, n)?;
                        }
                        _ => {
                            self.decode_fragmented_units(|decoder, count| {
                                take(decoder, &mut items, count)
                            })?;
                        }
                    }
                }
            }
            _ => {
                self.decode_fragmented_units(|decoder, count| {
                    take(decoder, &mut items, count)
                })?;
            }
        }
        Ok(Value::List(items))
    }

    fn decode_choice(
        &mut self,
        root: &[Alternative],
        extensible: bool,
        additions: &[Alternative],
    ) -> Asn1Result<Value> {
        if extensible && self.get_bit()? {
            let index = self.get_normally_small()? as usize;
            let octets = self.get_open_octets()?;
            return match additions.get(index) {
                Some(alternative) => {
                    self.path.push(alternative.name.clone());
                    let inner = self.decode_from_octets(alternative.ty, &octets)?;
                    self.path.pop();
                    Ok(Value::Choice(alternative.name.clone(), Box::new(inner)))
                }
                None => Ok(Value::Choice(
                    format!("unknown-addition-{}", index),
                    Box::new(Value::Opaque(octets)),
                )),
            };
        }
        let index = self
            .get_constrained(&BigInt::from(root.len()))?
            .to_usize()
            .unwrap_or(usize::MAX);
        let alternative = root
            .get(index)
            .ok_or_else(|| self.err(format!("CHOICE index {} out of range", index)))?;
        self.path.push(alternative.name.clone());
        let inner = self.decode_value(alternative.ty)?;
        self.path.pop();
        Ok(Value::Choice(alternative.name.clone(), Box::new(inner)))
    }
}
