//! JER (JSON Encoding Rules) codec
//!
//! Conventions: INTEGER as a JSON number (decimal text once outside the
//! 64-bit range), BIT STRING and OCTET STRING as lowercase hex text,
//! CHOICE as a single-member object keyed by the alternative name,
//! SEQUENCE/SET as objects, SEQUENCE OF as arrays. Encoded objects have
//! their keys sorted ASCII-ascending, which the default `serde_json` map
//! provides.

use asn1_compiler::{Presence, Record, TypeGraph, TypeId, TypeKind};
use asn1_core::{Asn1Error, Asn1Result, BitString, Value};
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde_json::{Map, Number, json};

pub fn encode(graph: &TypeGraph, type_name: &str, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
    let mut codec = Jer {
        graph,
        path: vec![type_name.to_string()],
    };
    let json = codec.to_json(id, value)?;
    serde_json::to_vec(&json)
        .map_err(|e| Asn1Error::encode(type_name, format!("JSON serialization: {}", e)))
}

pub fn decode(graph: &TypeGraph, type_name: &str, id: TypeId, data: &[u8]) -> Asn1Result<Value> {
    let json: serde_json::Value = serde_json::from_slice(data)
        .map_err(|e| Asn1Error::decode(type_name, format!("invalid JSON: {}", e)))?;
    let mut codec = Jer {
        graph,
        path: vec![type_name.to_string()],
    };
    codec.from_json(id, &json)
}

struct Jer<'graph> {
    graph: &'graph TypeGraph,
    path: Vec<String>,
}

impl<'graph> Jer<'graph> {
    fn location(&self) -> String {
        self.path.join(".")
    }

    fn encode_err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::encode(self.location(), reason)
    }

    fn decode_err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::decode(self.location(), reason)
    }

    // ------------------------------------------------------------------
    // Encode
    // ------------------------------------------------------------------

    fn to_json(&mut self, id: TypeId, value: &Value) -> Asn1Result<serde_json::Value> {
        let resolved = self.graph.resolve(id);
        match (&self.graph.node(resolved).kind, value) {
            (TypeKind::Boolean, Value::Boolean(b)) => Ok(json!(b)),
            (TypeKind::Integer { named_numbers }, _) => {
                let n = match value {
                    Value::Integer(n) => n.clone(),
                    Value::Text(name) => named_numbers
                        .iter()
                        .find(|(candidate, _)| candidate == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            self.encode_err(format!("unknown named number '{}'", name))
                        })?,
                    other => {
                        return Err(self.encode_err(format!(
                            "expected integer, got {}",
                            other.kind_name()
                        )));
                    }
                };
                Ok(big_to_json(&n))
            }
            (
                TypeKind::Enumerated {
                    root, additions, ..
                },
                _,
            ) => {
                let name = value
                    .as_text()
                    .ok_or_else(|| self.encode_err("expected an enumerated name"))?;
                if !root.iter().chain(additions.iter()).any(|(n, _)| n == name) {
                    return Err(
                        self.encode_err(format!("unknown enumerated value '{}'", name))
                    );
                }
                Ok(json!(name))
            }
            (TypeKind::Real, _) => {
                let number = value
                    .as_real()
                    .or_else(|| value.as_integer().and_then(|n| n.to_f64()))
                    .ok_or_else(|| self.encode_err("expected a real value"))?;
                match Number::from_f64(number) {
                    Some(n) => Ok(serde_json::Value::Number(n)),
                    None => Ok(json!(format_special_real(number))),
                }
            }
            (TypeKind::Null, Value::Null) => Ok(serde_json::Value::Null),
            (TypeKind::BitString { .. }, Value::BitString(bits)) => {
                Ok(json!(hex::encode(bits.clone().normalized().as_bytes())))
            }
            (TypeKind::OctetString, Value::Bytes(bytes)) => Ok(json!(hex::encode(bytes))),
            (
                TypeKind::CharacterString(_)
                | TypeKind::Time(_)
                | TypeKind::ObjectIdentifier
                | TypeKind::RelativeOid,
                Value::Text(text),
            ) => Ok(json!(text)),
            (TypeKind::Sequence(record) | TypeKind::Set(record), Value::Record(fields)) => {
                let mut object = Map::new();
                for (field_name, field_value) in fields {
                    if field_name.starts_with("unknown-addition-") {
                        let Value::Opaque(bytes) = field_value else {
                            return Err(self
                                .encode_err("unknown addition must carry opaque octets"));
                        };
                        object.insert(field_name.clone(), json!(hex::encode(bytes)));
                        continue;
                    }
                    let component = record
                        .root
                        .iter()
                        .chain(record.additions.iter().flat_map(|a| a.components()))
                        .find(|c| &c.name == field_name)
                        .ok_or_else(|| {
                            self.encode_err(format!("unknown component '{}'", field_name))
                        })?;
                    self.path.push(field_name.clone());
                    let encoded = self.to_json(component.ty, field_value)?;
                    self.path.pop();
                    object.insert(field_name.clone(), encoded);
                }
                for component in &record.root {
                    if matches!(component.presence, Presence::Required)
                        && !object.contains_key(&component.name)
                    {
                        return Err(self.encode_err(format!(
                            "missing required component '{}'",
                            component.name
                        )));
                    }
                }
                Ok(serde_json::Value::Object(object))
            }
            (
                TypeKind::SequenceOf { element } | TypeKind::SetOf { element },
                Value::List(items),
            ) => {
                let element = *element;
                let mut array = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    self.path.push(index.to_string());
                    array.push(self.to_json(element, item)?);
                    self.path.pop();
                }
                Ok(serde_json::Value::Array(array))
            }
            (
                TypeKind::Choice {
                    root, additions, ..
                },
                Value::Choice(alt_name, inner),
            ) => {
                if alt_name.starts_with("unknown-addition-") {
                    let Value::Opaque(bytes) = inner.as_ref() else {
                        return Err(
                            self.encode_err("unknown alternative must carry opaque octets")
                        );
                    };
                    let mut object = Map::new();
                    object.insert(alt_name.clone(), json!(hex::encode(bytes)));
                    return Ok(serde_json::Value::Object(object));
                }
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| &a.name == alt_name)
                    .ok_or_else(|| {
                        self.encode_err(format!("unknown CHOICE alternative '{}'", alt_name))
                    })?;
                self.path.push(alt_name.clone());
                let encoded = self.to_json(alternative.ty, inner)?;
                self.path.pop();
                let mut object = Map::new();
                object.insert(alt_name.clone(), encoded);
                Ok(serde_json::Value::Object(object))
            }
            (TypeKind::Any, Value::Opaque(bytes) | Value::Bytes(bytes)) => {
                Ok(json!(hex::encode(bytes)))
            }
            (kind, value) => Err(self.encode_err(format!(
                "cannot encode {} as {}",
                value.kind_name(),
                kind_label(kind)
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Decode
    // ------------------------------------------------------------------

    fn from_json(&mut self, id: TypeId, json: &serde_json::Value) -> Asn1Result<Value> {
        let resolved = self.graph.resolve(id);
        let effective = &self.graph.node(id).effective;
        match &self.graph.node(resolved).kind {
            TypeKind::Boolean => json
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| self.decode_err("expected a JSON boolean")),
            TypeKind::Integer { .. } => {
                if let Some(n) = json.as_i64() {
                    return Ok(Value::integer(n));
                }
                if let Some(n) = json.as_u64() {
                    return Ok(Value::Integer(BigInt::from(n)));
                }
                if let Some(text) = json.as_str() {
                    if let Ok(n) = text.parse::<BigInt>() {
                        return Ok(Value::Integer(n));
                    }
                }
                Err(self.decode_err("expected a JSON integer"))
            }
            TypeKind::Enumerated {
                root, additions, ..
            } => {
                let name = json
                    .as_str()
                    .ok_or_else(|| self.decode_err("expected an enumerated name"))?;
                if !root.iter().chain(additions.iter()).any(|(n, _)| n == name) {
                    return Err(
                        self.decode_err(format!("unknown enumerated value '{}'", name))
                    );
                }
                Ok(Value::Text(name.to_string()))
            }
            TypeKind::Real => {
                if let Some(n) = json.as_f64() {
                    return Ok(Value::Real(n));
                }
                if let Some(text) = json.as_str() {
                    if let Some(n) = parse_special_real(text) {
                        return Ok(Value::Real(n));
                    }
                }
                Err(self.decode_err("expected a JSON number"))
            }
            TypeKind::Null => match json {
                serde_json::Value::Null => Ok(Value::Null),
                _ => Err(self.decode_err("expected JSON null")),
            },
            TypeKind::BitString { .. } => {
                let text = json
                    .as_str()
                    .ok_or_else(|| self.decode_err("expected hex text"))?;
                let bytes = hex::decode(text)
                    .map_err(|_| self.decode_err("invalid hex text"))?;
                let num_bits = match &effective.size {
                    Some(size) => size.fixed().map(|f| f as usize),
                    None => None,
                }
                .unwrap_or(bytes.len() * 8);
                let bits = BitString::new(bytes, num_bits)
                    .map_err(|e| self.decode_err(e.to_string()))?
                    .normalized();
                Ok(Value::BitString(bits))
            }
            TypeKind::OctetString | TypeKind::Any => {
                let text = json
                    .as_str()
                    .ok_or_else(|| self.decode_err("expected hex text"))?;
                let bytes = hex::decode(text)
                    .map_err(|_| self.decode_err("invalid hex text"))?;
                match &self.graph.node(resolved).kind {
                    TypeKind::Any => Ok(Value::Opaque(bytes)),
                    _ => Ok(Value::Bytes(bytes)),
                }
            }
            TypeKind::CharacterString(_)
            | TypeKind::Time(_)
            | TypeKind::ObjectIdentifier
            | TypeKind::RelativeOid => json
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| self.decode_err("expected JSON text")),
            TypeKind::Sequence(record) | TypeKind::Set(record) => {
                self.record_from_json(record, json)
            }
            TypeKind::SequenceOf { element } | TypeKind::SetOf { element } => {
                let element = *element;
                let array = json
                    .as_array()
                    .ok_or_else(|| self.decode_err("expected a JSON array"))?;
                let mut items = Vec::with_capacity(array.len());
                for (index, item) in array.iter().enumerate() {
                    self.path.push(index.to_string());
                    items.push(self.from_json(element, item)?);
                    self.path.pop();
                }
                Ok(Value::List(items))
            }
            TypeKind::Choice {
                root, additions, ..
            } => {
                let object = json
                    .as_object()
                    .ok_or_else(|| self.decode_err("expected a JSON object"))?;
                if object.len() != 1 {
                    return Err(
                        self.decode_err("CHOICE object must have exactly one member")
                    );
                }
                let (alt_name, inner) = object.iter().next().ok_or_else(|| {
                    self.decode_err("CHOICE object must have exactly one member")
                })?;
                if alt_name.starts_with("unknown-addition-") {
                    let text = inner
                        .as_str()
                        .ok_or_else(|| self.decode_err("expected hex text"))?;
                    let bytes = hex::decode(text)
                        .map_err(|_| self.decode_err("invalid hex text"))?;
                    return Ok(Value::Choice(
                        alt_name.clone(),
                        Box::new(Value::Opaque(bytes)),
                    ));
                }
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| &a.name == alt_name)
                    .ok_or_else(|| {
                        self.decode_err(format!("unknown CHOICE alternative '{}'", alt_name))
                    })?;
                self.path.push(alt_name.clone());
                let inner = self.from_json(alternative.ty, inner)?;
                self.path.pop();
                Ok(Value::Choice(alternative.name.clone(), Box::new(inner)))
            }
            TypeKind::Reference(_) => Err(self.decode_err("unresolved reference")),
        }
    }

    fn record_from_json(
        &mut self,
        record: &Record,
        json: &serde_json::Value,
    ) -> Asn1Result<Value> {
        let object = json
            .as_object()
            .ok_or_else(|| self.decode_err("expected a JSON object"))?;
        let mut fields: Vec<(String, Value)> = Vec::new();
        for component in record
            .root
            .iter()
            .chain(record.additions.iter().flat_map(|a| a.components()))
        {
            match object.get(&component.name) {
                Some(member) => {
                    self.path.push(component.name.clone());
                    let value = self.from_json(component.ty, member)?;
                    self.path.pop();
                    fields.push((component.name.clone(), value));
                }
                None => match &component.presence {
                    Presence::Required => {
                        // extension additions are absent from old senders
                        let is_root = record
                            .root
                            .iter()
                            .any(|c| c.name == component.name);
                        if is_root {
                            return Err(self.decode_err(format!(
                                "missing required component '{}'",
                                component.name
                            )));
                        }
                    }
                    Presence::Default(default) => {
                        fields.push((component.name.clone(), default.clone()));
                    }
                    Presence::Optional => {}
                },
            }
        }
        for (key, member) in object {
            if key.starts_with("unknown-addition-") {
                let text = member
                    .as_str()
                    .ok_or_else(|| self.decode_err("expected hex text"))?;
                let bytes = hex::decode(text)
                    .map_err(|_| self.decode_err("invalid hex text"))?;
                fields.push((key.clone(), Value::Opaque(bytes)));
            }
        }
        Ok(Value::Record(fields))
    }
}

fn big_to_json(n: &BigInt) -> serde_json::Value {
    if let Some(i) = n.to_i64() {
        return json!(i);
    }
    if let Some(u) = n.to_u64() {
        return json!(u);
    }
    json!(n.to_string())
}

fn format_special_real(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn parse_special_real(text: &str) -> Option<f64> {
    match text {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => text.parse().ok(),
    }
}

fn kind_label(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Boolean => "BOOLEAN",
        TypeKind::Integer { .. } => "INTEGER",
        TypeKind::Enumerated { .. } => "ENUMERATED",
        TypeKind::Real => "REAL",
        TypeKind::Null => "NULL",
        TypeKind::BitString { .. } => "BIT STRING",
        TypeKind::OctetString => "OCTET STRING",
        TypeKind::ObjectIdentifier => "OBJECT IDENTIFIER",
        TypeKind::RelativeOid => "RELATIVE-OID",
        TypeKind::CharacterString(_) => "character string",
        TypeKind::Time(_) => "time",
        TypeKind::Sequence(_) => "SEQUENCE",
        TypeKind::Set(_) => "SET",
        TypeKind::SequenceOf { .. } => "SEQUENCE OF",
        TypeKind::SetOf { .. } => "SET OF",
        TypeKind::Choice { .. } => "CHOICE",
        TypeKind::Any => "open type",
        TypeKind::Reference(_) => "reference",
    }
}
