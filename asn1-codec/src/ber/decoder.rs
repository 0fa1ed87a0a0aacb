//! BER/DER decoder
//!
//! Permissive for BER, strict for DER. Strict mode rejects indefinite
//! lengths, non-minimal length and INTEGER octets, constructed strings,
//! BOOLEAN bytes other than `00`/`FF`, nonzero padding in BIT STRING and
//! out-of-order SET components.

use crate::ber::real::decode_real_content;
use crate::ber::types::{BerLength, BerTag, decode_oid_content};
use crate::strings::bytes_to_string;
use asn1_compiler::{Alternative, Presence, Record, TypeGraph, TypeId, TypeKind};
use asn1_core::{Asn1Error, Asn1Result, BitString, Value, format_oid};
use num_bigint::BigInt;

pub struct BerDecoder<'graph, 'data> {
    graph: &'graph TypeGraph,
    data: &'data [u8],
    pos: usize,
    strict: bool,
    path: Vec<String>,
}

impl<'graph, 'data> BerDecoder<'graph, 'data> {
    pub fn new(graph: &'graph TypeGraph, data: &'data [u8], strict: bool) -> Self {
        Self {
            graph,
            data,
            pos: 0,
            strict,
            path: Vec::new(),
        }
    }

    pub fn decode(&mut self, type_name: &str, id: TypeId) -> Asn1Result<Value> {
        self.path.clear();
        self.path.push(type_name.to_string());
        let value = self.decode_value(id)?;
        if self.pos != self.data.len() {
            return Err(self.err("trailing octets after the value"));
        }
        Ok(value)
    }

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

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    // ------------------------------------------------------------------
    // TLV scanning
    // ------------------------------------------------------------------

    fn peek_tag(&self) -> Asn1Result<BerTag> {
        BerTag::decode(&self.data[self.pos..])
            .map(|(tag, _)| tag)
            .map_err(|e| self.relocate(e))
    }

    /// Read one complete TLV, returning its tag and content octets. For an
    /// indefinite length the content extent is found by skipping nested
    /// TLVs until the end-of-contents marker.
    fn read_tlv(&mut self) -> Asn1Result<(BerTag, &'data [u8])> {
        let (tag, tag_len) =
            BerTag::decode(&self.data[self.pos..]).map_err(|e| self.relocate(e))?;
        let (length, len_len) =
            BerLength::decode(&self.data[self.pos + tag_len..], self.strict)
                .map_err(|e| self.relocate(e))?;
        let content_start = self.pos + tag_len + len_len;
        match length {
            BerLength::Definite(n) => {
                let content_end = content_start
                    .checked_add(n)
                    .filter(|&end| end <= self.data.len())
                    .ok_or_else(|| self.err("length overruns the buffer"))?;
                self.pos = content_end;
                Ok((tag, &self.data[content_start..content_end]))
            }
            BerLength::Indefinite => {
                if !tag.constructed {
                    return Err(self.err("indefinite length on a primitive value"));
                }
                self.pos = content_start;
                let inner_start = self.pos;
                loop {
                    if self.data[self.pos..].starts_with(&[0x00, 0x00]) {
                        break;
                    }
                    if self.at_end() {
                        return Err(self.err("missing end-of-contents octets"));
                    }
                    self.read_tlv()?;
                }
                let content = &self.data[inner_start..self.pos];
                self.pos += 2;
                Ok((tag, content))
            }
        }
    }

    /// Read one TLV including its header octets, verbatim.
    fn read_raw_tlv(&mut self) -> Asn1Result<&'data [u8]> {
        let start = self.pos;
        self.read_tlv()?;
        Ok(&self.data[start..self.pos])
    }

    fn sub(&mut self, content: &'data [u8]) -> BerDecoder<'graph, 'data> {
        BerDecoder {
            graph: self.graph,
            data: content,
            pos: 0,
            strict: self.strict,
            path: std::mem::take(&mut self.path),
        }
    }

    fn restore(&mut self, sub: BerDecoder<'graph, 'data>) {
        self.path = sub.path;
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    fn decode_value(&mut self, id: TypeId) -> Asn1Result<Value> {
        self.decode_wrapped(id, 0)
    }

    fn decode_wrapped(&mut self, id: TypeId, wrap_index: usize) -> Asn1Result<Value> {
        let node = self.graph.node(id);
        if let Some(&expected) = node.ber.wraps.get(wrap_index) {
            let (tag, content) = self.read_tlv()?;
            if !tag.matches(expected) || !tag.constructed {
                return Err(self.err(format!(
                    "expected explicit tag [{} {}]",
                    expected.class_bits, expected.number
                )));
            }
            let mut sub = self.sub(content);
            let result = sub
                .decode_wrapped(id, wrap_index + 1)
                .and_then(|value| {
                    if sub.pos != sub.data.len() {
                        Err(sub.err("trailing octets inside explicit tag"))
                    } else {
                        Ok(value)
                    }
                });
            self.restore(sub);
            return result;
        }

        let resolved = self.graph.resolve(id);
        match &self.graph.node(resolved).kind {
            TypeKind::Choice {
                root,
                additions,
                extensible,
            } => self.decode_choice(root, additions, *extensible),
            TypeKind::Any => Ok(Value::Opaque(self.read_raw_tlv()?.to_vec())),
            kind => {
                let identity = node
                    .ber
                    .identity
                    .ok_or_else(|| self.err("type has no identity tag"))?;
                let (tag, content) = self.read_tlv()?;
                if !tag.matches(identity) {
                    return Err(self.err(format!(
                        "unexpected tag {:02X?} (wanted class {} number {})",
                        tag.encode(),
                        identity.class_bits,
                        identity.number
                    )));
                }
                self.decode_content(kind, content, tag.constructed)
            }
        }
    }

    fn decode_choice(
        &mut self,
        root: &[Alternative],
        additions: &[Alternative],
        extensible: bool,
    ) -> Asn1Result<Value> {
        let peek = self.peek_tag()?;
        for alternative in root.iter().chain(additions.iter()) {
            let takes = match self.graph.leading_tags(alternative.ty) {
                Some(tags) => tags.contains(&peek.raw()),
                None => true,
            };
            if takes {
                self.path.push(alternative.name.clone());
                let inner = self.decode_value(alternative.ty)?;
                self.path.pop();
                return Ok(Value::Choice(alternative.name.clone(), Box::new(inner)));
            }
        }
        if extensible {
            return Ok(Value::Opaque(self.read_raw_tlv()?.to_vec()));
        }
        Err(self.err("no CHOICE alternative matches the tag"))
    }

    fn decode_content(
        &mut self,
        kind: &TypeKind,
        content: &'data [u8],
        constructed: bool,
    ) -> Asn1Result<Value> {
        match kind {
            TypeKind::Boolean => {
                if content.len() != 1 {
                    return Err(self.err("BOOLEAN content must be one octet"));
                }
                if self.strict && content[0] != 0x00 && content[0] != 0xFF {
                    return Err(self.err("non-canonical BOOLEAN"));
                }
                Ok(Value::Boolean(content[0] != 0))
            }
            TypeKind::Integer { .. } | TypeKind::Enumerated { .. } => {
                if content.is_empty() {
                    return Err(self.err("empty INTEGER content"));
                }
                if self.strict && content.len() > 1 {
                    let non_minimal = (content[0] == 0x00 && content[1] & 0x80 == 0)
                        || (content[0] == 0xFF && content[1] & 0x80 != 0);
                    if non_minimal {
                        return Err(self.err("non-minimal INTEGER"));
                    }
                }
                let number = BigInt::from_signed_bytes_be(content);
                if let TypeKind::Enumerated {
                    root, additions, ..
                } = kind
                {
                    let name = root
                        .iter()
                        .chain(additions.iter())
                        .find(|(_, v)| BigInt::from(*v) == number)
                        .map(|(n, _)| n.clone())
                        .ok_or_else(|| {
                            self.err(format!("unknown enumerated value {}", number))
                        })?;
                    return Ok(Value::Text(name));
                }
                Ok(Value::Integer(number))
            }
            TypeKind::Real => {
                Ok(Value::Real(decode_real_content(content, &self.location())?))
            }
            TypeKind::Null => {
                if !content.is_empty() {
                    return Err(self.err("NULL content must be empty"));
                }
                Ok(Value::Null)
            }
            TypeKind::BitString { .. } => {
                let content = self.string_segments(content, constructed, true)?;
                let (&unused, bytes) = content
                    .split_first()
                    .ok_or_else(|| self.err("empty BIT STRING content"))?;
                if unused > 7 || (bytes.is_empty() && unused != 0) {
                    return Err(self.err("invalid BIT STRING padding count"));
                }
                let num_bits = bytes.len() * 8 - unused as usize;
                if self.strict && unused > 0 {
                    let mask = (1u8 << unused) - 1;
                    if bytes.last().map(|b| b & mask).unwrap_or(0) != 0 {
                        return Err(self.err("nonzero BIT STRING padding"));
                    }
                }
                let bits = BitString::new(bytes.to_vec(), num_bits)
                    .map_err(|e| self.err(e.to_string()))?
                    .normalized();
                Ok(Value::BitString(bits))
            }
            TypeKind::OctetString => {
                let content = self.string_segments(content, constructed, false)?;
                Ok(Value::Bytes(content))
            }
            TypeKind::CharacterString(string_kind) => {
                let content = self.string_segments(content, constructed, false)?;
                Ok(Value::Text(bytes_to_string(
                    *string_kind,
                    &content,
                    &self.location(),
                )?))
            }
            TypeKind::Time(_) => {
                let text = std::str::from_utf8(content)
                    .map_err(|_| self.err("invalid time string"))?;
                Ok(Value::Text(text.to_string()))
            }
            TypeKind::ObjectIdentifier => {
                let arcs = decode_oid_content(content, false)
                    .map_err(|e| self.relocate(e))?;
                Ok(Value::Text(format_oid(&arcs)))
            }
            TypeKind::RelativeOid => {
                let arcs = decode_oid_content(content, true)
                    .map_err(|e| self.relocate(e))?;
                Ok(Value::Text(format_oid(&arcs)))
            }
            TypeKind::Sequence(record) => self.decode_sequence(record, content),
            TypeKind::Set(record) => self.decode_set(record, content),
            TypeKind::SequenceOf { element } | TypeKind::SetOf { element } => {
                let mut sub = self.sub(content);
                let mut items = Vec::new();
                let mut result = Ok(());
                while !sub.at_end() {
                    sub.path.push(items.len().to_string());
                    match sub.decode_value(*element) {
                        Ok(item) => items.push(item),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                    sub.path.pop();
                }
                self.restore(sub);
                result.map(|_| Value::List(items))
            }
            TypeKind::Choice { .. } | TypeKind::Any | TypeKind::Reference(_) => {
                Err(self.err("unexpected kind in content decoder"))
            }
        }
    }

    /// Content of a possibly constructed string, reassembled. In BER a
    /// string may be split into nested segments; DER forbids that.
    fn string_segments(
        &mut self,
        content: &'data [u8],
        constructed: bool,
        bit_string: bool,
    ) -> Asn1Result<Vec<u8>> {
        if !constructed {
            return Ok(content.to_vec());
        }
        if self.strict {
            return Err(self.err("constructed string in DER"));
        }
        let mut sub = self.sub(content);
        let mut segments: Vec<Vec<u8>> = Vec::new();
        let mut result = Ok(());
        while !sub.at_end() {
            match sub.read_tlv() {
                Ok((tag, segment_content)) => {
                    match sub.string_segments(segment_content, tag.constructed, bit_string)
                    {
                        Ok(segment) => segments.push(segment),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.restore(sub);
        result?;

        if !bit_string {
            return Ok(segments.concat());
        }
        // each bit string segment carries its own padding count; only the
        // final segment may be partial
        let mut bytes = Vec::new();
        let mut unused = 0u8;
        for (index, segment) in segments.iter().enumerate() {
            let (&segment_unused, segment_bytes) = segment
                .split_first()
                .ok_or_else(|| self.err("empty BIT STRING segment"))?;
            if segment_unused != 0 && index != segments.len() - 1 {
                return Err(self.err("padding in a non-final BIT STRING segment"));
            }
            unused = segment_unused;
            bytes.extend_from_slice(segment_bytes);
        }
        let mut out = vec![unused];
        out.extend_from_slice(&bytes);
        Ok(out)
    }

    fn decode_sequence(&mut self, record: &Record, content: &'data [u8]) -> Asn1Result<Value> {
        let mut sub = self.sub(content);
        let result = sub.decode_sequence_fields(record);
        self.restore(sub);
        result
    }

    fn decode_sequence_fields(&mut self, record: &Record) -> Asn1Result<Value> {
        let mut fields: Vec<(String, Value)> = Vec::new();
        let additions: Vec<(&asn1_compiler::Component, bool)> = record
            .additions
            .iter()
            .flat_map(|a| a.components())
            .map(|c| (c, true))
            .collect();
        let components = record
            .root
            .iter()
            .map(|c| (c, false))
            .chain(additions.into_iter());

        for (component, is_addition) in components {
            let present = if self.at_end() {
                false
            } else {
                match self.graph.leading_tags(component.ty) {
                    Some(tags) => tags.contains(&self.peek_tag()?.raw()),
                    None => true,
                }
            };
            if present {
                self.path.push(component.name.clone());
                let value = self.decode_value(component.ty)?;
                self.path.pop();
                fields.push((component.name.clone(), value));
            } else {
                match &component.presence {
                    Presence::Required if !is_addition => {
                        return Err(self.err(format!(
                            "missing required component '{}'",
                            component.name
                        )));
                    }
                    Presence::Default(default) => {
                        fields.push((component.name.clone(), default.clone()));
                    }
                    _ => {}
                }
            }
        }

        let mut unknown_index = 0usize;
        while !self.at_end() {
            if !record.extensible {
                return Err(self.err("unexpected trailing component"));
            }
            let raw = self.read_raw_tlv()?.to_vec();
            fields.push((
                format!("unknown-addition-{}", unknown_index),
                Value::Opaque(raw),
            ));
            unknown_index += 1;
        }
        Ok(Value::Record(fields))
    }

    fn decode_set(&mut self, record: &Record, content: &'data [u8]) -> Asn1Result<Value> {
        let mut sub = self.sub(content);
        let result = sub.decode_set_fields(record);
        self.restore(sub);
        result
    }

    fn decode_set_fields(&mut self, record: &Record) -> Asn1Result<Value> {
        let components: Vec<&asn1_compiler::Component> = record
            .root
            .iter()
            .chain(record.additions.iter().flat_map(|a| a.components()))
            .collect();
        let mut decoded: Vec<Option<Value>> = vec![None; components.len()];
        let mut unknown: Vec<(String, Value)> = Vec::new();
        let mut unknown_index = 0usize;
        let mut last_tag: Option<(u8, u32)> = None;

        while !self.at_end() {
            let peek = self.peek_tag()?;
            if self.strict {
                let key = (peek.class_bits, peek.number);
                if let Some(last) = last_tag {
                    if key < last {
                        return Err(self.err("SET components out of canonical order"));
                    }
                }
                last_tag = Some(key);
            }
            let matched = components.iter().enumerate().find(|(i, c)| {
                decoded[*i].is_none()
                    && match self.graph.leading_tags(c.ty) {
                        Some(tags) => tags.contains(&peek.raw()),
                        None => true,
                    }
            });
            match matched {
                Some((index, component)) => {
                    self.path.push(component.name.clone());
                    let value = self.decode_value(component.ty)?;
                    self.path.pop();
                    decoded[index] = Some(value);
                }
                None => {
                    if !record.extensible {
                        return Err(self.err("unexpected component in SET"));
                    }
                    let raw = self.read_raw_tlv()?.to_vec();
                    unknown.push((
                        format!("unknown-addition-{}", unknown_index),
                        Value::Opaque(raw),
                    ));
                    unknown_index += 1;
                }
            }
        }

        let root_len = record.root.len();
        let mut fields: Vec<(String, Value)> = Vec::new();
        for (index, component) in components.iter().enumerate() {
            match decoded[index].take() {
                Some(value) => fields.push((component.name.clone(), value)),
                None => match &component.presence {
                    Presence::Required if index < root_len => {
                        return Err(self.err(format!(
                            "missing required component '{}'",
                            component.name
                        )));
                    }
                    Presence::Default(default) => {
                        fields.push((component.name.clone(), default.clone()));
                    }
                    _ => {}
                },
            }
        }
        fields.extend(unknown);
        Ok(Value::Record(fields))
    }
}
