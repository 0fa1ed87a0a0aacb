//! BER/DER encoder
//!
//! Walks the compiled type graph and assembles nested TLVs bottom-up: the
//! content octets of a value are produced first, then wrapped in the
//! identity tag and any explicit tags precomputed on the node.
//!
//! The `canonical` flag selects DER: SET components sorted by tag, SET OF
//! elements sorted by encoded octets, DEFAULT-equal components omitted,
//! named-bit BIT STRINGs trimmed of trailing zeros.

use crate::ber::real::encode_real_content;
use crate::ber::types::{BerTag, encode_oid_content, encode_tlv};
use crate::strings::string_to_bytes;
use asn1_compiler::{Presence, Record, TypeGraph, TypeId, TypeKind};
use asn1_core::{Asn1Error, Asn1Result, Value, parse_oid};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

pub struct BerEncoder<'graph> {
    graph: &'graph TypeGraph,
    canonical: bool,
    path: Vec<String>,
}

impl<'graph> BerEncoder<'graph> {
    pub fn new(graph: &'graph TypeGraph, canonical: bool) -> Self {
        Self {
            graph,
            canonical,
            path: Vec::new(),
        }
    }

    pub fn encode(&mut self, type_name: &str, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
        self.path.clear();
        self.path.push(type_name.to_string());
        self.encode_value(id, value)
    }

    fn location(&self) -> String {
        self.path.join(".")
    }

    fn err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::encode(self.location(), reason)
    }

    /// Complete encoding (identity TLV plus explicit wraps) of one value.
    fn encode_value(&mut self, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
        let node = self.graph.node(id);
        let resolved = self.graph.node(self.graph.resolve(id));

        let mut out = match (&resolved.kind, value) {
            // open types and unknown extensions pass through verbatim
            (TypeKind::Any, Value::Opaque(bytes) | Value::Bytes(bytes)) => bytes.clone(),
            (TypeKind::Choice { .. }, Value::Opaque(bytes)) => bytes.clone(),
            (
                TypeKind::Choice {
                    root, additions, ..
                },
                Value::Choice(alt_name, inner),
            ) => {
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| &a.name == alt_name)
                    .ok_or_else(|| {
                        self.err(format!("unknown CHOICE alternative '{}'", alt_name))
                    })?;
                self.path.push(alt_name.clone());
                let encoded = self.encode_value(alternative.ty, inner)?;
                self.path.pop();
                encoded
            }
            (TypeKind::Choice { .. }, other) => {
                return Err(self.err(format!(
                    "expected a choice value, got {}",
                    other.kind_name()
                )));
            }
            (TypeKind::Any, other) => {
                return Err(self.err(format!(
                    "expected open type octets, got {}",
                    other.kind_name()
                )));
            }
            (kind, value) => {
                let content = self.encode_content(kind, value)?;
                let identity = node
                    .ber
                    .identity
                    .ok_or_else(|| self.err("type has no identity tag"))?;
                encode_tlv(identity, kind.is_constructed(), &content)
            }
        };

        for wrap in node.ber.wraps.iter().rev() {
            out = encode_tlv(*wrap, true, &out);
        }
        Ok(out)
    }

    /// Content octets of a value, before any tag is applied.
    fn encode_content(&mut self, kind: &TypeKind, value: &Value) -> Asn1Result<Vec<u8>> {
        match kind {
            TypeKind::Boolean => match value {
                Value::Boolean(true) => Ok(vec![0xFF]),
                Value::Boolean(false) => Ok(vec![0x00]),
                other => Err(self.err(format!("expected boolean, got {}", other.kind_name()))),
            },
            TypeKind::Integer { named_numbers } => {
                let number = self.integer_value(value, named_numbers)?;
                Ok(number.to_signed_bytes_be())
            }
            TypeKind::Enumerated {
                root, additions, ..
            } => {
                let name = value
                    .as_text()
                    .ok_or_else(|| self.err("expected an enumerated name"))?;
                let (_, number) = root
                    .iter()
                    .chain(additions.iter())
                    .find(|(n, _)| n == name)
                    .ok_or_else(|| self.err(format!("unknown enumerated value '{}'", name)))?;
                Ok(BigInt::from(*number).to_signed_bytes_be())
            }
            TypeKind::Real => {
                let number = value
                    .as_real()
                    .or_else(|| value.as_integer().and_then(|n| n.to_f64()))
                    .ok_or_else(|| self.err("expected a real value"))?;
                Ok(encode_real_content(number))
            }
            TypeKind::Null => match value {
                Value::Null => Ok(Vec::new()),
                other => Err(self.err(format!("expected NULL, got {}", other.kind_name()))),
            },
            TypeKind::BitString { named_bits } => {
                let bits = value
                    .as_bit_string()
                    .ok_or_else(|| self.err("expected a bit string"))?
                    .clone()
                    .normalized();
                let bits = if self.canonical && !named_bits.is_empty() {
                    bits.trimmed()
                } else {
                    bits
                };
                let mut content = vec![bits.unused_bits()];
                content.extend_from_slice(bits.as_bytes());
                Ok(content)
            }
            TypeKind::OctetString => {
                let bytes = value
                    .as_bytes()
                    .ok_or_else(|| self.err("expected octets"))?;
                Ok(bytes.to_vec())
            }
            TypeKind::ObjectIdentifier => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a dotted object identifier"))?;
                let arcs = parse_oid(text)
                    .map_err(|e| self.err(e.to_string()))?;
                encode_oid_content(&arcs, false)
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
                encode_oid_content(&arcs, true)
            }
            TypeKind::CharacterString(string_kind) => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a character string"))?;
                Ok(string_to_bytes(*string_kind, text))
            }
            TypeKind::Time(_) => {
                let text = value
                    .as_text()
                    .ok_or_else(|| self.err("expected a time string"))?;
                Ok(text.as_bytes().to_vec())
            }
            TypeKind::Sequence(record) => self.encode_record(record, false, value),
            TypeKind::Set(record) => self.encode_record(record, true, value),
            TypeKind::SequenceOf { element } => self.encode_elements(*element, false, value),
            TypeKind::SetOf { element } => self.encode_elements(*element, true, value),
            TypeKind::Choice { .. } | TypeKind::Any | TypeKind::Reference(_) => {
                // handled by encode_value; references are resolved before
                // content encoding
                Err(self.err("unexpected kind in content encoder"))
            }
        }
    }

    fn integer_value(
        &self,
        value: &Value,
        named_numbers: &[(String, BigInt)],
    ) -> Asn1Result<BigInt> {
        match value {
            Value::Integer(n) => Ok(n.clone()),
            Value::Text(name) => named_numbers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| self.err(format!("unknown named number '{}'", name))),
            other => Err(self.err(format!("expected integer, got {}", other.kind_name()))),
        }
    }

    fn encode_record(
        &mut self,
        record: &Record,
        is_set: bool,
        value: &Value,
    ) -> Asn1Result<Vec<u8>> {
        let fields = value
            .as_record()
            .ok_or_else(|| self.err(format!("expected a record, got {}", value.kind_name())))?;

        // reject silently-misspelled component names up front
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

        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(fields.len());
        let components = record
            .root
            .iter()
            .chain(record.additions.iter().flat_map(|a| a.components()));
        for component in components {
            let field = fields.iter().find(|(n, _)| n == &component.name);
            match (field, &component.presence) {
                (Some((_, field_value)), presence) => {
                    if self.canonical {
                        if let Presence::Default(default) = presence {
                            if field_value == default {
                                continue;
                            }
                        }
                    }
                    self.path.push(component.name.clone());
                    let encoded = self.encode_value(component.ty, field_value)?;
                    self.path.pop();
                    parts.push(encoded);
                }
                (None, Presence::Required) => {
                    return Err(self.err(format!(
                        "missing required component '{}'",
                        component.name
                    )));
                }
                (None, Presence::Optional | Presence::Default(_)) => {}
            }
        }

        // unknown extension additions captured by a previous decode
        for (field_name, field_value) in fields {
            if field_name.starts_with("unknown-addition-") {
                match field_value {
                    Value::Opaque(bytes) => parts.push(bytes.clone()),
                    _ => {
                        return Err(
                            self.err("unknown addition must carry opaque octets")
                        );
                    }
                }
            }
        }

        if is_set && self.canonical {
            parts.sort_by_key(|part| {
                BerTag::decode(part)
                    .map(|(tag, _)| (tag.class_bits, tag.number))
                    .unwrap_or((0xFF, u32::MAX))
            });
        }

        Ok(parts.concat())
    }

    fn encode_elements(
        &mut self,
        element: TypeId,
        is_set_of: bool,
        value: &Value,
    ) -> Asn1Result<Vec<u8>> {
        let items = value
            .as_list()
            .ok_or_else(|| self.err(format!("expected a list, got {}", value.kind_name())))?;
        let mut parts = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            self.path.push(index.to_string());
            parts.push(self.encode_value(element, item)?);
            self.path.pop();
        }
        if is_set_of && self.canonical {
            parts.sort();
        }
        Ok(parts.concat())
    }
}
