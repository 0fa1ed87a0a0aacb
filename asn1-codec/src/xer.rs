//! XER (XML Encoding Rules, X.693 subset) codec
//!
//! One element per value, named by the component (or the type at the top
//! level). BOOLEAN and ENUMERATED values are empty elements, BIT STRING is
//! binary digit text, OCTET STRING is hex text. The reader accepts any
//! element name for list items, so re-encoding a decoded value is stable.

use asn1_compiler::{Presence, Record, TypeGraph, TypeId, TypeKind};
use asn1_core::{Asn1Error, Asn1Result, BitString, Value};
use num_bigint::BigInt;
use num_traits::ToPrimitive;

pub fn encode(graph: &TypeGraph, type_name: &str, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
    let mut codec = Xer {
        graph,
        path: vec![type_name.to_string()],
    };
    let element = codec.to_element(type_name, id, value)?;
    let mut out = String::new();
    write_element(&element, 0, &mut out);
    Ok(out.into_bytes())
}

pub fn decode(graph: &TypeGraph, type_name: &str, id: TypeId, data: &[u8]) -> Asn1Result<Value> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Asn1Error::decode(type_name, "input is not UTF-8"))?;
    let element = parse_element(text, type_name)?;
    let mut codec = Xer {
        graph,
        path: vec![type_name.to_string()],
    };
    codec.from_element(id, &element)
}

// ----------------------------------------------------------------------
// Tiny XML tree
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct XmlElement {
    name: String,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            text: String::new(),
        }
    }

    fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            text: text.into(),
        }
    }
}

fn escape(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn write_element(element: &XmlElement, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("    ");
    }
    if element.children.is_empty() && element.text.is_empty() {
        out.push('<');
        out.push_str(&element.name);
        out.push_str(" />\n");
        return;
    }
    out.push('<');
    out.push_str(&element.name);
    out.push('>');
    if element.children.is_empty() {
        escape(&element.text, out);
    } else {
        out.push('\n');
        for child in &element.children {
            write_element(child, depth + 1, out);
        }
        for _ in 0..depth {
            out.push_str("    ");
        }
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push_str(">\n");
}

/// Parse a single root element; whitespace between elements is ignored.
fn parse_element(text: &str, location: &str) -> Asn1Result<XmlElement> {
    let mut parser = XmlParser {
        chars: text.chars().collect(),
        pos: 0,
        location: location.to_string(),
    };
    parser.skip_whitespace();
    let element = parser.element()?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(parser.err("trailing content after the root element"));
    }
    Ok(element)
}

struct XmlParser {
    chars: Vec<char>,
    pos: usize,
    location: String,
}

impl XmlParser {
    fn err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::decode(&self.location, reason)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn name(&mut self) -> Asn1Result<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected an element name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn expect(&mut self, c: char) -> Asn1Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", c)))
        }
    }

    fn element(&mut self) -> Asn1Result<XmlElement> {
        self.expect('<')?;
        let name = self.name()?;
        self.skip_whitespace();
        if self.peek() == Some('/') {
            self.pos += 1;
            self.expect('>')?;
            return Ok(XmlElement::new(name));
        }
        self.expect('>')?;

        let mut element = XmlElement::new(name);
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err("unterminated element")),
                Some('<') => {
                    if self.chars.get(self.pos + 1) == Some(&'/') {
                        self.pos += 2;
                        let close = self.name()?;
                        if close != element.name {
                            return Err(self.err(format!(
                                "mismatched closing tag '{}'",
                                close
                            )));
                        }
                        self.skip_whitespace();
                        self.expect('>')?;
                        if element.children.is_empty() {
                            element.text = unescape(text.trim());
                        }
                        return Ok(element);
                    }
                    element.children.push(self.element()?);
                }
                Some(c) => {
                    text.push(c);
                    self.pos += 1;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------
// Schema-directed conversion
// ----------------------------------------------------------------------

struct Xer<'graph> {
    graph: &'graph TypeGraph,
    path: Vec<String>,
}

impl<'graph> Xer<'graph> {
    fn location(&self) -> String {
        self.path.join(".")
    }

    fn encode_err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::encode(self.location(), reason)
    }

    fn decode_err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::decode(self.location(), reason)
    }

    /// Element name for items of a SEQUENCE OF: the referenced type's name
    /// when there is one, else a keyword-ish label.
    fn item_label(&self, id: TypeId) -> String {
        let node = self.graph.node(id);
        if let TypeKind::Reference(target) = node.kind {
            let name = &self.graph.node(target).name;
            if !name.contains('.') {
                return name.clone();
            }
        }
        let resolved = self.graph.resolve(id);
        match &self.graph.node(resolved).kind {
            TypeKind::Boolean => "BOOLEAN",
            TypeKind::Integer { .. } => "INTEGER",
            TypeKind::Enumerated { .. } => "ENUMERATED",
            TypeKind::Real => "REAL",
            TypeKind::Null => "NULL",
            TypeKind::BitString { .. } => "BIT_STRING",
            TypeKind::OctetString => "OCTET_STRING",
            TypeKind::ObjectIdentifier => "OBJECT_IDENTIFIER",
            TypeKind::RelativeOid => "RELATIVE-OID",
            TypeKind::CharacterString(_) => "STRING",
            TypeKind::Time(_) => "TIME",
            TypeKind::Sequence(_) => "SEQUENCE",
            TypeKind::Set(_) => "SET",
            TypeKind::SequenceOf { .. } => "SEQUENCE_OF",
            TypeKind::SetOf { .. } => "SET_OF",
            TypeKind::Choice { .. } => "CHOICE",
            TypeKind::Any | TypeKind::Reference(_) => "ANY",
        }
        .to_string()
    }

    fn to_element(&mut self, name: &str, id: TypeId, value: &Value) -> Asn1Result<XmlElement> {
        let resolved = self.graph.resolve(id);
        match (&self.graph.node(resolved).kind, value) {
            (TypeKind::Boolean, Value::Boolean(b)) => {
                let mut element = XmlElement::new(name);
                element
                    .children
                    .push(XmlElement::new(if *b { "true" } else { "false" }));
                Ok(element)
            }
            (TypeKind::Integer { named_numbers }, _) => {
                let n = match value {
                    Value::Integer(n) => n.clone(),
                    Value::Text(number_name) => named_numbers
                        .iter()
                        .find(|(candidate, _)| candidate == number_name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| {
                            self.encode_err(format!(
                                "unknown named number '{}'",
                                number_name
                            ))
                        })?,
                    other => {
                        return Err(self.encode_err(format!(
                            "expected integer, got {}",
                            other.kind_name()
                        )));
                    }
                };
                Ok(XmlElement::with_text(name, n.to_string()))
            }
            (
                TypeKind::Enumerated {
                    root, additions, ..
                },
                Value::Text(item),
            ) => {
                if !root.iter().chain(additions.iter()).any(|(n, _)| n == item) {
                    return Err(
                        self.encode_err(format!("unknown enumerated value '{}'", item))
                    );
                }
                let mut element = XmlElement::new(name);
                element.children.push(XmlElement::new(item.clone()));
                Ok(element)
            }
            (TypeKind::Real, _) => {
                let number = value
                    .as_real()
                    .or_else(|| value.as_integer().and_then(|n| n.to_f64()))
                    .ok_or_else(|| self.encode_err("expected a real value"))?;
                let mut element = XmlElement::new(name);
                if number.is_nan() {
                    element.children.push(XmlElement::new("NOT-A-NUMBER"));
                } else if number.is_infinite() {
                    element.children.push(XmlElement::new(if number > 0.0 {
                        "PLUS-INFINITY"
                    } else {
                        "MINUS-INFINITY"
                    }));
                } else {
                    element.text = format_real(number);
                }
                Ok(element)
            }
            (TypeKind::Null, Value::Null) => Ok(XmlElement::new(name)),
            (TypeKind::BitString { .. }, Value::BitString(bits)) => Ok(XmlElement::with_text(
                name,
                bits.clone().normalized().to_string(),
            )),
            (TypeKind::OctetString, Value::Bytes(bytes)) => {
                Ok(XmlElement::with_text(name, hex::encode_upper(bytes)))
            }
            (
                TypeKind::CharacterString(_)
                | TypeKind::Time(_)
                | TypeKind::ObjectIdentifier
                | TypeKind::RelativeOid,
                Value::Text(text),
            ) => Ok(XmlElement::with_text(name, text.clone())),
            (TypeKind::Sequence(record) | TypeKind::Set(record), Value::Record(fields)) => {
                let mut element = XmlElement::new(name);
                for (field_name, field_value) in fields {
                    if field_name.starts_with("unknown-addition-") {
                        let Value::Opaque(bytes) = field_value else {
                            return Err(self
                                .encode_err("unknown addition must carry opaque octets"));
                        };
                        element.children.push(XmlElement::with_text(
                            field_name.clone(),
                            hex::encode_upper(bytes),
                        ));
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
                    let child = self.to_element(field_name, component.ty, field_value)?;
                    self.path.pop();
                    element.children.push(child);
                }
                Ok(element)
            }
            (
                TypeKind::SequenceOf { element: item_ty }
                | TypeKind::SetOf { element: item_ty },
                Value::List(items),
            ) => {
                let item_ty = *item_ty;
                let label = self.item_label(item_ty);
                let mut element = XmlElement::new(name);
                for (index, item) in items.iter().enumerate() {
                    self.path.push(index.to_string());
                    element.children.push(self.to_element(&label, item_ty, item)?);
                    self.path.pop();
                }
                Ok(element)
            }
            (
                TypeKind::Choice {
                    root, additions, ..
                },
                Value::Choice(alt_name, inner),
            ) => {
                let mut element = XmlElement::new(name);
                if alt_name.starts_with("unknown-addition-") {
                    let Value::Opaque(bytes) = inner.as_ref() else {
                        return Err(
                            self.encode_err("unknown alternative must carry opaque octets")
                        );
                    };
                    element.children.push(XmlElement::with_text(
                        alt_name.clone(),
                        hex::encode_upper(bytes),
                    ));
                    return Ok(element);
                }
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| &a.name == alt_name)
                    .ok_or_else(|| {
                        self.encode_err(format!("unknown CHOICE alternative '{}'", alt_name))
                    })?;
                self.path.push(alt_name.clone());
                let child = self.to_element(alt_name, alternative.ty, inner)?;
                self.path.pop();
                element.children.push(child);
                Ok(element)
            }
            (TypeKind::Any, Value::Opaque(bytes) | Value::Bytes(bytes)) => {
                Ok(XmlElement::with_text(name, hex::encode_upper(bytes)))
            }
            (_, value) => Err(self.encode_err(format!(
                "cannot encode {} here",
                value.kind_name()
            ))),
        }
    }

    fn from_element(&mut self, id: TypeId, element: &XmlElement) -> Asn1Result<Value> {
        let resolved = self.graph.resolve(id);
        match &self.graph.node(resolved).kind {
            TypeKind::Boolean => {
                if let Some(child) = element.children.first() {
                    return match child.name.as_str() {
                        "true" => Ok(Value::Boolean(true)),
                        "false" => Ok(Value::Boolean(false)),
                        other => {
                            Err(self.decode_err(format!("unexpected element '{}'", other)))
                        }
                    };
                }
                match element.text.as_str() {
                    "true" | "1" => Ok(Value::Boolean(true)),
                    "false" | "0" => Ok(Value::Boolean(false)),
                    other => Err(self.decode_err(format!("invalid boolean '{}'", other))),
                }
            }
            TypeKind::Integer { .. } => element
                .text
                .parse::<BigInt>()
                .map(Value::Integer)
                .map_err(|_| self.decode_err(format!("invalid integer '{}'", element.text))),
            TypeKind::Enumerated {
                root, additions, ..
            } => {
                let name = element
                    .children
                    .first()
                    .map(|c| c.name.as_str())
                    .unwrap_or(element.text.as_str());
                if !root.iter().chain(additions.iter()).any(|(n, _)| n == name) {
                    return Err(
                        self.decode_err(format!("unknown enumerated value '{}'", name))
                    );
                }
                Ok(Value::Text(name.to_string()))
            }
            TypeKind::Real => {
                if let Some(child) = element.children.first() {
                    return match child.name.as_str() {
                        "PLUS-INFINITY" => Ok(Value::Real(f64::INFINITY)),
                        "MINUS-INFINITY" => Ok(Value::Real(f64::NEG_INFINITY)),
                        "NOT-A-NUMBER" => Ok(Value::Real(f64::NAN)),
                        other => {
                            Err(self.decode_err(format!("unexpected element '{}'", other)))
                        }
                    };
                }
                element
                    .text
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| self.decode_err(format!("invalid real '{}'", element.text)))
            }
            TypeKind::Null => Ok(Value::Null),
            TypeKind::BitString { .. } => {
                let digits = element.text.trim();
                let mut bytes = vec![0u8; digits.len().div_ceil(8)];
                for (i, c) in digits.chars().enumerate() {
                    match c {
                        '1' => bytes[i / 8] |= 1 << (7 - (i % 8)),
                        '0' => {}
                        other => {
                            return Err(self
                                .decode_err(format!("invalid binary digit '{}'", other)));
                        }
                    }
                }
                let bits = BitString::new(bytes, digits.len())
                    .map_err(|e| self.decode_err(e.to_string()))?;
                Ok(Value::BitString(bits))
            }
            TypeKind::OctetString => hex::decode(element.text.trim())
                .map(Value::Bytes)
                .map_err(|_| self.decode_err("invalid hex text")),
            TypeKind::Any => hex::decode(element.text.trim())
                .map(Value::Opaque)
                .map_err(|_| self.decode_err("invalid hex text")),
            TypeKind::CharacterString(_)
            | TypeKind::Time(_)
            | TypeKind::ObjectIdentifier
            | TypeKind::RelativeOid => Ok(Value::Text(element.text.clone())),
            TypeKind::Sequence(record) | TypeKind::Set(record) => {
                self.record_from_element(record, element)
            }
            TypeKind::SequenceOf { element: item_ty }
            | TypeKind::SetOf { element: item_ty } => {
                let item_ty = *item_ty;
                let mut items = Vec::with_capacity(element.children.len());
                for (index, child) in element.children.iter().enumerate() {
                    self.path.push(index.to_string());
                    items.push(self.from_element(item_ty, child)?);
                    self.path.pop();
                }
                Ok(Value::List(items))
            }
            TypeKind::Choice {
                root, additions, ..
            } => {
                let child = element
                    .children
                    .first()
                    .ok_or_else(|| self.decode_err("empty CHOICE element"))?;
                if child.name.starts_with("unknown-addition-") {
                    let bytes = hex::decode(child.text.trim())
                        .map_err(|_| self.decode_err("invalid hex text"))?;
                    return Ok(Value::Choice(
                        child.name.clone(),
                        Box::new(Value::Opaque(bytes)),
                    ));
                }
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| a.name == child.name)
                    .ok_or_else(|| {
                        self.decode_err(format!(
                            "unknown CHOICE alternative '{}'",
                            child.name
                        ))
                    })?;
                self.path.push(child.name.clone());
                let inner = self.from_element(alternative.ty, child)?;
                self.path.pop();
                Ok(Value::Choice(alternative.name.clone(), Box::new(inner)))
            }
            TypeKind::Reference(_) => Err(self.decode_err("unresolved reference")),
        }
    }

    fn record_from_element(
        &mut self,
        record: &Record,
        element: &XmlElement,
    ) -> Asn1Result<Value> {
        let mut fields: Vec<(String, Value)> = Vec::new();
        for component in record
            .root
            .iter()
            .chain(record.additions.iter().flat_map(|a| a.components()))
        {
            match element.children.iter().find(|c| c.name == component.name) {
                Some(child) => {
                    self.path.push(component.name.clone());
                    let value = self.from_element(component.ty, child)?;
                    self.path.pop();
                    fields.push((component.name.clone(), value));
                }
                None => match &component.presence {
                    Presence::Required => {
                        let is_root =
                            record.root.iter().any(|c| c.name == component.name);
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
        for child in &element.children {
            if child.name.starts_with("unknown-addition-") {
                let bytes = hex::decode(child.text.trim())
                    .map_err(|_| self.decode_err("invalid hex text"))?;
                fields.push((child.name.clone(), Value::Opaque(bytes)));
            }
        }
        Ok(Value::Record(fields))
    }
}

/// Plain decimal text without an exponent where possible.
fn format_real(n: f64) -> String {
    let text = format!("{}", n);
    if text.contains('.') || text.contains('e') || text.contains("inf") {
        text
    } else {
        format!("{}.0", text)
    }
}
