//! (U)PER encoder
//!
//! Bit-oriented encoding driven by the effective constraints precomputed on
//! the type graph. The single `aligned` flag is the only difference between
//! aligned PER and unaligned PER; every alignment decision consults it.

use crate::ber::real::encode_real_content;
use crate::ber::types::encode_oid_content;
use crate::per::bits::BitWriter;
use crate::strings::{CharWidth, bit_width, char_width, string_to_bytes};
use asn1_compiler::{
    Addition, Alternative, Component, Presence, Record, SizeRange, TypeGraph, TypeId, TypeKind,
};
use asn1_core::{Asn1Error, Asn1Result, Value, parse_oid};
use num_bigint::BigInt;
use num_traits::{One, ToPrimitive, Zero};
use std::collections::BTreeMap;

pub struct PerEncoder<'graph> {
    graph: &'graph TypeGraph,
    aligned: bool,
    path: Vec<String>,
    writer: BitWriter,
}

pub fn encode(
    graph: &TypeGraph,
    aligned: bool,
    type_name: &str,
    id: TypeId,
    value: &Value,
) -> Asn1Result<Vec<u8>> {
    let mut encoder = PerEncoder {
        graph,
        aligned,
        path: vec![type_name.to_string()],
        writer: BitWriter::new(),
    };
    encoder.encode_value(id, value)?;
    Ok(encoder.writer.into_bytes())
}

impl<'graph> PerEncoder<'graph> {
    fn location(&self) -> String {
        self.path.join(".")
    }

    fn err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::encode(self.location(), reason)
    }

    fn violation(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::constraints(self.location(), reason)
    }

    /// Encode a value into its own octet-aligned buffer (open types,
    /// extension additions).
    fn encode_to_octets(&mut self, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
        let saved = std::mem::take(&mut self.writer);
        let result = self.encode_value(id, value);
        let inner = std::mem::replace(&mut self.writer, saved);
        result?;
        Ok(inner.into_bytes())
    }

    // ------------------------------------------------------------------
    // Field primitives
    // ------------------------------------------------------------------

    /// General length determinant for a count below 16384. Larger counts go
    /// through `encode_fragmented_units`.
    fn put_general_length(&mut self, n: usize) -> Asn1Result<()> {
        if self.aligned {
            self.writer.align();
        }
        if n < 128 {
            self.writer.put_bits(n as u64, 8);
        } else if n < 16384 {
            self.writer.put_bits(0x8000 | n as u64, 16);
        } else {
            return Err(self.err("length requires fragmentation"));
        }
        Ok(())
    }

    /// Emit `total` units preceded by length determinants, fragmenting into
    /// 16K/32K/48K/64K chunks as X.691 requires for large unconstrained
    /// lengths. `emit` writes the units of the given index range.
    fn encode_fragmented_units(
        &mut self,
        total: usize,
        mut emit: impl FnMut(&mut Self, std::ops::Range<usize>) -> Asn1Result<()>,
    ) -> Asn1Result<()> {
        let mut start = 0usize;
        loop {
            let rest = total - start;
            if rest < 16384 {
                self.put_general_length(rest)?;
                emit(self, start..start + rest)?;
                return Ok(());
            }
            let chunks = (rest / 16384).min(4);
            if self.aligned {
                self.writer.align();
            }
            self.writer.put_bits(0xC0 | chunks as u64, 8);
            emit(self, start..start + chunks * 16384)?;
            start += chunks * 16384;
        }
    }

    /// Length-prefixed octet-aligned payload (open types, unconstrained
    /// OCTET STRING bodies).
    fn put_open_octets(&mut self, bytes: &[u8]) -> Asn1Result<()> {
        self.encode_fragmented_units(bytes.len(), |encoder, range| {
            if encoder.aligned {
                encoder.writer.align();
            }
            encoder.writer.put_bytes(&bytes[range]);
            Ok(())
        })
    }

    /// Normally small non-negative whole number (extension indices and
    /// bitmap lengths).
    fn put_normally_small(&mut self, n: u64) -> Asn1Result<()> {
        if n < 64 {
            self.writer.put_bit(false);
            self.writer.put_bits(n, 6);
            Ok(())
        } else {
            self.writer.put_bit(true);
            let bytes = minimal_unsigned_bytes(&BigInt::from(n));
            self.put_general_length(bytes.len())?;
            if self.aligned {
                self.writer.align();
            }
            self.writer.put_bytes(&bytes);
            Ok(())
        }
    }

    /// Constrained whole number: `offset` within `[0, range)`.
    fn put_constrained(&mut self, offset: &BigInt, range: &BigInt) -> Asn1Result<()> {
        if range <= &BigInt::one() {
            return Ok(());
        }
        let max = range - 1u8;
        if !self.aligned {
            let bits = max.bits() as usize;
            self.writer.put_bigint_bits(offset, bits);
            return Ok(());
        }
        if let Some(range_small) = range.to_u64() {
            if range_small <= 255 {
                let bits = bit_width(range_small - 1);
                self.writer
                    .put_bits(offset.to_u64().unwrap_or_default(), bits);
                return Ok(());
            }
            if range_small == 256 {
                self.writer.align();
                self.writer.put_bytes(&[offset.to_u64().unwrap_or_default() as u8]);
                return Ok(());
            }
            if range_small <= 65536 {
                self.writer.align();
                let offset = offset.to_u64().unwrap_or_default() as u16;
                self.writer.put_bytes(&offset.to_be_bytes());
                return Ok(());
            }
        }
        // indefinite-length case: octet count, then the octets
        let max_octets = max.bits().div_ceil(8).max(1);
        let octets = minimal_unsigned_bytes(offset);
        self.put_constrained(
            &BigInt::from(octets.len() as u64 - 1),
            &BigInt::from(max_octets),
        )?;
        self.writer.align();
        self.writer.put_bytes(&octets);
        Ok(())
    }

    /// Unconstrained whole number: length plus two's-complement octets.
    fn put_unconstrained(&mut self, n: &BigInt) -> Asn1Result<()> {
        let bytes = n.to_signed_bytes_be();
        self.put_general_length(bytes.len())?;
        if self.aligned {
            self.writer.align();
        }
        self.writer.put_bytes(&bytes);
        Ok(())
    }

    /// Semi-constrained whole number: non-negative offset from the lower
    /// bound, length-prefixed.
    fn put_semi_constrained(&mut self, offset: &BigInt) -> Asn1Result<()> {
        let bytes = minimal_unsigned_bytes(offset);
        self.put_general_length(bytes.len())?;
        if self.aligned {
            self.writer.align();
        }
        self.writer.put_bytes(&bytes);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn encode_value(&mut self, id: TypeId, value: &Value) -> Asn1Result<()> {
        let effective = &self.graph.node(id).effective;
        let resolved = self.graph.resolve(id);
        match &self.graph.node(resolved).kind {
            TypeKind::Boolean => {
                let b = value
                    .as_boolean()
                    .ok_or_else(|| self.err("expected boolean"))?;
                self.writer.put_bit(b);
                Ok(())
            }
            TypeKind::Null => match value {
                Value::Null => Ok(()),
                _ => Err(self.err("expected NULL")),
            },
            TypeKind::Integer { named_numbers } => {
                let n = match value {
                    Value::Integer(n) => n.clone(),
                    Value::Text(name) => named_numbers
                        .iter()
                        .find(|(candidate, _)| candidate == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            self.err(format!("unknown named number '{}'", name))
                        })?,
                    other => {
                        return Err(
                            self.err(format!("expected integer, got {}", other.kind_name()))
                        );
                    }
                };
                self.encode_integer(&n, &effective.value)
            }
            TypeKind::Enumerated {
                root,
                extensible,
                additions,
            } => self.encode_enumerated(value, root, *extensible, additions),
            TypeKind::Real => {
                let number = value
                    .as_real()
                    .or_else(|| value.as_integer().and_then(|n| n.to_f64()))
                    .ok_or_else(|| self.err("expected a real value"))?;
                self.put_open_octets(&encode_real_content(number))
            }
            TypeKind::BitString { .. } => self.encode_bit_string(value, &effective.size),
            TypeKind::OctetString => {
                let bytes = value
                    .as_bytes()
                    .ok_or_else(|| self.err("expected octets"))?
                    .to_vec();
                self.encode_octets(&bytes, &effective.size)
            }
            TypeKind::CharacterString(string_kind) => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a character string"))?;
                match char_width(*string_kind, effective.alphabet.as_deref(), self.aligned) {
                    None => {
                        let bytes = string_to_bytes(*string_kind, text);
                        self.put_open_octets(&bytes)
                    }
                    Some(width) => {
                        let text = text.to_string();
                        self.encode_known_multiplier(&text, &width, &effective.size)
                    }
                }
            }
            TypeKind::Time(_) => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a time string"))?;
                self.put_open_octets(text.as_bytes())
            }
            TypeKind::ObjectIdentifier => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a dotted object identifier"))?;
                let arcs = parse_oid(text).map_err(|e| self.err(e.to_string()))?;
                let content = encode_oid_content(&arcs, false)?;
                self.put_open_octets(&content)
            }
            TypeKind::RelativeOid => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a dotted relative OID"))?;
                let arcs: Vec<u64> = text
                    .split('.')
                    .map(|part| part.parse::<u64>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| self.err("invalid relative OID"))?;
                let content = encode_oid_content(&arcs, true)?;
                self.put_open_octets(&content)
            }
            TypeKind::Sequence(record) | TypeKind::Set(record) => {
                self.encode_record(record, value)
            }
            TypeKind::SequenceOf { element } | TypeKind::SetOf { element } => {
                self.encode_list(*element, value, &effective.size)
            }
            TypeKind::Choice {
                root,
                extensible,
                additions,
            } => self.encode_choice(value, root, *extensible, additions),
            TypeKind::Any => match value {
                Value::Opaque(bytes) | Value::Bytes(bytes) => {
                    let bytes = bytes.clone();
                    self.put_open_octets(&bytes)
                }
                other => {
                    Err(self.err(format!("expected open type octets, got {}", other.kind_name())))
                }
            },
            TypeKind::Reference(_) => Err(self.err("unresolved reference")),
        }
    }

    fn encode_integer(
        &mut self,
        n: &BigInt,
        range: &Option<asn1_compiler::ValueRange>,
    ) -> Asn1Result<()> {
        match range {
            Some(range) => {
                let in_root = range.lb.as_ref().map(|lb| n >= lb).unwrap_or(true)
                    && range.ub.as_ref().map(|ub| n <= ub).unwrap_or(true);
                if range.extensible {
                    self.writer.put_bit(!in_root);
                    if !in_root {
                        return self.put_unconstrained(n);
                    }
                } else if !in_root {
                    return Err(self.violation(format!(
                        "value {} outside the effective range",
                        n
                    )));
                }
                match (&range.lb, &range.ub) {
                    (Some(lb), Some(ub)) => {
                        let span = ub - lb + 1u8;
                        let offset = n - lb;
                        self.put_constrained(&offset, &span)
                    }
                    (Some(lb), None) => {
                        let offset = n - lb;
                        self.put_semi_constrained(&offset)
                    }
                    _ => self.put_unconstrained(n),
                }
            }
            None => self.put_unconstrained(n),
        }
    }

    fn encode_enumerated(
        &mut self,
        value: &Value,
        root: &[(String, i64)],
        extensible: bool,
        additions: &[(String, i64)],
    ) -> Asn1Result<()> {
        let name = value
            .as_text()
            .ok_or_else(|| self.err("expected an enumerated name"))?;
        // indices are assigned in ascending value order
        let mut ordered: Vec<&(String, i64)> = root.iter().collect();
        ordered.sort_by_key(|(_, v)| *v);
        if let Some(index) = ordered.iter().position(|(n, _)| n == name) {
            if extensible {
                self.writer.put_bit(false);
            }
            return self.put_constrained(
                &BigInt::from(index),
                &BigInt::from(ordered.len()),
            );
        }
        if let Some(index) = additions.iter().position(|(n, _)| n == name) {
            if !extensible {
                return Err(self.err(format!("'{}' is not a root enumerated value", name)));
            }
            self.writer.put_bit(true);
            return self.put_normally_small(index as u64);
        }
        Err(self.err(format!("unknown enumerated value '{}'", name)))
    }

    fn encode_bit_string(
        &mut self,
        value: &Value,
        size: &Option<SizeRange>,
    ) -> Asn1Result<()> {
        let bits = value
            .as_bit_string()
            .ok_or_else(|| self.err("expected a bit string"))?
            .clone()
            .normalized();
        let n = bits.num_bits();
        let flags: Vec<bool> = (0..n).map(|i| bits.get_bit(i).unwrap_or(false)).collect();

        let emit =
            |encoder: &mut Self, range: std::ops::Range<usize>| -> Asn1Result<()> {
                for &bit in &flags[range] {
                    encoder.writer.put_bit(bit);
                }
                Ok(())
            };

        match size {
            Some(size) => {
                let in_root =
                    n as u64 >= size.lb && size.ub.map(|ub| n as u64 <= ub).unwrap_or(true);
                if size.extensible {
                    self.writer.put_bit(!in_root);
                    if !in_root {
                        return self.encode_fragmented_units(n, emit);
                    }
                } else if !in_root {
                    return Err(self.violation("bit string length outside the size bound"));
                }
                if size.ub == Some(size.lb) {
                    if size.lb != 0 {
                        if self.aligned && size.lb > 16 {
                            self.writer.align();
                        }
                        emit(self, 0..n)?;
                    }
                    return Ok(());
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        self.put_constrained(&BigInt::from(n as u64 - size.lb), &span)?;
                        if self.aligned && ub > 16 {
                            self.writer.align();
                        }
                        emit(self, 0..n)
                    }
                    _ => self.encode_fragmented_units(n, emit),
                }
            }
            None => self.encode_fragmented_units(n, emit),
        }
    }

    fn encode_octets(&mut self, bytes: &[u8], size: &Option<SizeRange>) -> Asn1Result<()> {
        let n = bytes.len();
        match size {
            Some(size) => {
                let in_root =
                    n as u64 >= size.lb && size.ub.map(|ub| n as u64 <= ub).unwrap_or(true);
                if size.extensible {
                    self.writer.put_bit(!in_root);
                    if !in_root {
                        return self.put_open_octets(bytes);
                    }
                } else if !in_root {
                    return Err(self.violation("octet string length outside the size bound"));
                }
                if size.ub == Some(size.lb) {
                    // fixed size: two octets or fewer are not aligned
                    if n != 0 {
                        if self.aligned && n > 2 {
                            self.writer.align();
                        }
                        self.writer.put_bytes(bytes);
                    }
                    return Ok(());
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        self.put_constrained(&BigInt::from(n as u64 - size.lb), &span)?;
                        if self.aligned && ub > 2 {
                            self.writer.align();
                        }
                        self.writer.put_bytes(bytes);
                        Ok(())
                    }
                    _ => self.put_open_octets(bytes),
                }
            }
            None => self.put_open_octets(bytes),
        }
    }

    fn encode_known_multiplier(
        &mut self,
        text: &str,
        width: &CharWidth,
        size: &Option<SizeRange>,
    ) -> Asn1Result<()> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let bits = match width {
            CharWidth::Codes(bits) => *bits,
            CharWidth::Indexed(_, bits) => *bits,
        };

        let codes: Vec<u64> = chars
            .iter()
            .map(|&c| match width {
                CharWidth::Codes(bits) => {
                    let code = c as u64;
                    if *bits < 64 && code >= (1u64 << bits) {
                        Err(self.violation(format!("character '{}' not encodable", c)))
                    } else {
                        Ok(code)
                    }
                }
                CharWidth::Indexed(alphabet, _) => alphabet
                    .binary_search(&c)
                    .map(|index| index as u64)
                    .map_err(|_| {
                        self.violation(format!("character '{}' not in the alphabet", c))
                    }),
            })
            .collect::<Asn1Result<_>>()?;

        let emit =
            |encoder: &mut Self, range: std::ops::Range<usize>| -> Asn1Result<()> {
                for &code in &codes[range] {
                    encoder.writer.put_bits(code, bits);
                }
                Ok(())
            };

        match size {
            Some(size) => {
                let in_root =
                    n as u64 >= size.lb && size.ub.map(|ub| n as u64 <= ub).unwrap_or(true);
                if size.extensible {
                    self.writer.put_bit(!in_root);
                    if !in_root {
                        return self.encode_fragmented_units(n, emit);
                    }
                } else if !in_root {
                    return Err(self.violation("string length outside the size bound"));
                }
                if size.ub == Some(size.lb) {
                    if n != 0 {
                        if self.aligned && (n * bits) > 16 {
                            self.writer.align();
                        }
                        emit(self, 0..n)?;
                    }
                    return Ok(());
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        self.put_constrained(&BigInt::from(n as u64 - size.lb), &span)?;
                        if self.aligned && (ub as usize * bits) > 16 {
                            self.writer.align();
                        }
                        emit(self, 0..n)
                    }
                    _ => self.encode_fragmented_units(n, emit),
                }
            }
            None => self.encode_fragmented_units(n, emit),
        }
    }

    fn encode_record(&mut self, record: &Record, value: &Value) -> Asn1Result<()> {
        let fields = value
            .as_record()
            .ok_or_else(|| self.err(format!("expected a record, got {}", value.kind_name())))?;

        for (field_name, _) in fields {
            let known = record
                .root
                .iter()
                .chain(record.additions.iter().flat_map(|a| a.components()))
                .any(|c| &c.name == field_name);
            if !known && !field_name.starts_with("unknown-addition-") {
                return Err(self.err(format!("unknown component '{}'", field_name)));
            }
        }

        let field = |name: &str| fields.iter().find(|(n, _)| n == name).map(|(_, v)| v);

        let mut unknown: BTreeMap<usize, &Value> = BTreeMap::new();
        for (field_name, field_value) in fields {
            if let Some(index) = field_name
                .strip_prefix("unknown-addition-")
                .and_then(|s| s.parse::<usize>().ok())
            {
                unknown.insert(index, field_value);
            }
        }

        let addition_present = |addition: &Addition| -> bool {
            addition.components().iter().any(|c| {
                field(&c.name)
                    .map(|v| match &c.presence {
                        Presence::Default(default) => v != default,
                        _ => true,
                    })
                    .unwrap_or(false)
            })
        };
        let ext_present = record.additions.iter().any(&addition_present) || !unknown.is_empty();

        if record.extensible {
            self.writer.put_bit(ext_present);
        }

        // root preamble: one bit per OPTIONAL/DEFAULT component
        for component in &record.root {
            if matches!(component.presence, Presence::Required) {
                continue;
            }
            let present = match (&component.presence, field(&component.name)) {
                (_, None) => false,
                (Presence::Default(default), Some(v)) => v != default,
                (_, Some(_)) => true,
            };
            self.writer.put_bit(present);
        }

        for component in &record.root {
            match (&component.presence, field(&component.name)) {
                (Presence::Required, None) => {
                    return Err(self.err(format!(
                        "missing required component '{}'",
                        component.name
                    )));
                }
                (_, None) => {}
                (Presence::Default(default), Some(v)) if v == default => {}
                (_, Some(field_value)) => {
                    self.path.push(component.name.clone());
                    self.encode_value(component.ty, field_value)?;
                    self.path.pop();
                }
            }
        }

        if !ext_present {
            return Ok(());
        }

        let declared = record.additions.len();
        let total = declared.max(unknown.keys().next_back().map(|&i| i + 1).unwrap_or(0));
        self.put_normally_small(total as u64 - 1)?;

        let mut presence = Vec::with_capacity(total);
        for index in 0..total {
            let bit = if index < declared {
                addition_present(&record.additions[index])
            } else {
                unknown.contains_key(&index)
            };
            presence.push(bit);
            self.writer.put_bit(bit);
        }

        for index in 0..total {
            if !presence[index] {
                continue;
            }
            if index < declared {
                let payload = match &record.additions[index] {
                    Addition::Single(component) => {
                        let field_value = field(&component.name).ok_or_else(|| {
                            self.err(format!("missing addition '{}'", component.name))
                        })?;
                        self.path.push(component.name.clone());
                        let payload = self.encode_to_octets(component.ty, field_value)?;
                        self.path.pop();
                        payload
                    }
                    Addition::Group(components) => {
                        self.encode_addition_group(components, &field)?
                    }
                };
                self.put_open_octets(&payload)?;
            } else {
                match unknown[&index] {
                    Value::Opaque(bytes) => {
                        let bytes = bytes.clone();
                        self.put_open_octets(&bytes)?;
                    }
                    _ => {
                        return Err(
                            self.err("unknown addition must carry opaque octets")
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// An extension addition group travels as one open-type unit encoded
    /// like a small SEQUENCE of its members.
    fn encode_addition_group<'v>(
        &mut self,
        components: &[Component],
        field: &impl Fn(&str) -> Option<&'v Value>,
    ) -> Asn1Result<Vec<u8>> {
        let saved = std::mem::take(&mut self.writer);
        let result = (|| -> Asn1Result<()> {
            for component in components {
                if matches!(component.presence, Presence::Required) {
                    continue;
                }
                self.writer.put_bit(field(&component.name).is_some());
            }
            for component in components {
                match (field(&component.name), &component.presence) {
                    (Some(field_value), _) => {
                        self.path.push(component.name.clone());
                        self.encode_value(component.ty, field_value)?;
                        self.path.pop();
                    }
                    (None, Presence::Required) => {
                        return Err(self.err(format!(
                            "missing required component '{}' in extension group",
                            component.name
                        )));
                    }
                    (None, _) => {}
                }
            }
            Ok(())
        })();
        let inner = std::mem::replace(&mut self.writer, saved);
        result?;
        Ok(inner.into_bytes())
    }

    fn encode_list(
        &mut self,
        element: TypeId,
        value: &Value,
        size: &Option<SizeRange>,
    ) -> Asn1Result<()> {
        let items = value
            .as_list()
            .ok_or_else(|| self.err(format!("expected a list, got {}", value.kind_name())))?;
        let n = items.len();

        let emit = |encoder: &mut Self,
                    range: std::ops::Range<usize>|
         -> Asn1Result<()> {
            for index in range {
                encoder.path.push(index.to_string());
                encoder.encode_value(element, &items[index])?;
                encoder.path.pop();
            }
            Ok(())
        };

        match size {
            Some(size) => {
                let in_root =
                    n as u64 >= size.lb && size.ub.map(|ub| n as u64 <= ub).unwrap_or(true);
                if size.extensible {
                    self.writer.put_bit(!in_root);
                    if !in_root {
                        return self.encode_fragmented_units(n, emit);
                    }
                } else if !in_root {
                    return Err(self.violation("list length outside the size bound"));
                }
                if size.ub == Some(size.lb) {
                    return emit(self, 0..n);
                }
                match size.ub {
                    Some(ub) if ub < 65536 => {
                        let span = BigInt::from(ub - size.lb + 1);
                        self.put_constrained(&BigInt::from(n as u64 - size.lb), &span)?;
                        emit(self, 0..n)
                    }
                    _ => self.encode_fragmented_units(n, emit),
                }
            }
            None => self.encode_fragmented_units(n, emit),
        }
    }

    fn encode_choice(
        &mut self,
        value: &Value,
        root: &[Alternative],
        extensible: bool,
        additions: &[Alternative],
    ) -> Asn1Result<()> {
        let (alt_name, inner) = match value {
            Value::Choice(name, inner) => (name.as_str(), inner.as_ref()),
            other => {
                return Err(self.err(format!(
                    "expected a choice value, got {}",
                    other.kind_name()
                )));
            }
        };

        if let Some(index) = alt_name
            .strip_prefix("unknown-addition-")
            .and_then(|s| s.parse::<u64>().ok())
        {
            if !extensible {
                return Err(self.err("unknown alternative on a non-extensible CHOICE"));
            }
            let Value::Opaque(bytes) = inner else {
                return Err(self.err("unknown alternative must carry opaque octets"));
            };
            let bytes = bytes.clone();
            self.writer.put_bit(true);
            self.put_normally_small(index)?;
            return self.put_open_octets(&bytes);
        }

        if let Some(index) = root.iter().position(|a| a.name == alt_name) {
            if extensible {
                self.writer.put_bit(false);
            }
            self.put_constrained(&BigInt::from(index), &BigInt::from(root.len()))?;
            let alternative = &root[index];
            self.path.push(alternative.name.clone());
            let result = self.encode_value(alternative.ty, inner);
            self.path.pop();
            return result;
        }

        if let Some(index) = additions.iter().position(|a| a.name == alt_name) {
            self.writer.put_bit(true);
            self.put_normally_small(index as u64)?;
            let alternative = &additions[index];
            self.path.push(alternative.name.clone());
            let payload = self.encode_to_octets(alternative.ty, inner)?;
            self.path.pop();
            return self.put_open_octets(&payload);
        }

        Err(self.err(format!("unknown CHOICE alternative '{}'", alt_name)))
    }
}

fn minimal_unsigned_bytes(n: &BigInt) -> Vec<u8> {
    if n.is_zero() {
        return vec![0];
    }
    n.magnitude().to_bytes_be()
}
