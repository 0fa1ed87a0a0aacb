//! GSER (Generic String Encoding Rules, RFC 3641) encoder
//!
//! Output-only textual form used by the `convert` command's default output.
//! Records print one member per line with four-space indentation; octet
//! strings print as `'...'H`, bit strings as `'...'B`.

use asn1_compiler::{TypeGraph, TypeId, TypeKind};
use asn1_core::{Asn1Error, Asn1Result, Value};
use num_traits::ToPrimitive;

pub fn encode(graph: &TypeGraph, type_name: &str, id: TypeId, value: &Value) -> Asn1Result<Vec<u8>> {
    let mut out = String::new();
    let mut codec = Gser {
        graph,
        path: vec![type_name.to_string()],
    };
    codec.write_value(id, value, 0, &mut out)?;
    Ok(out.into_bytes())
}

/// GSER is an output format only; there is no parser for it.
pub fn decode_unsupported(type_name: &str) -> Asn1Error {
    Asn1Error::decode(type_name, "the gser codec does not support decoding")
}

struct Gser<'graph> {
    graph: &'graph TypeGraph,
    path: Vec<String>,
}

impl<'graph> Gser<'graph> {
    fn err(&self, reason: impl Into<String>) -> Asn1Error {
        Asn1Error::encode(self.path.join("."), reason)
    }

    fn write_value(
        &mut self,
        id: TypeId,
        value: &Value,
        depth: usize,
        out: &mut String,
    ) -> Asn1Result<()> {
        let resolved = self.graph.resolve(id);
        match (&self.graph.node(resolved).kind, value) {
            (TypeKind::Boolean, Value::Boolean(b)) => {
                out.push_str(if *b { "TRUE" } else { "FALSE" });
                Ok(())
            }
            (TypeKind::Null, Value::Null) => {
                out.push_str("NULL");
                Ok(())
            }
            (TypeKind::Integer { .. }, Value::Integer(n)) => {
                out.push_str(&n.to_string());
                Ok(())
            }
            (TypeKind::Integer { named_numbers }, Value::Text(name)) => {
                let (_, n) = named_numbers
                    .iter()
                    .find(|(candidate, _)| candidate == name)
                    .ok_or_else(|| self.err(format!("unknown named number '{}'", name)))?;
                out.push_str(&n.to_string());
                Ok(())
            }
            (TypeKind::Enumerated { .. }, Value::Text(name)) => {
                out.push_str(name);
                Ok(())
            }
            (TypeKind::Real, _) => {
                let number = value
                    .as_real()
                    .or_else(|| value.as_integer().and_then(|n| n.to_f64()))
                    .ok_or_else(|| self.err("expected a real value"))?;
                out.push_str(&number.to_string());
                Ok(())
            }
            (TypeKind::BitString { .. }, Value::BitString(bits)) => {
                out.push('\'');
                out.push_str(&bits.clone().normalized().to_string());
                out.push_str("'B");
                Ok(())
            }
            (TypeKind::OctetString, Value::Bytes(bytes)) => {
                out.push('\'');
                out.push_str(&hex::encode_upper(bytes));
                out.push_str("'H");
                Ok(())
            }
            (TypeKind::Any, Value::Opaque(bytes) | Value::Bytes(bytes)) => {
                out.push('\'');
                out.push_str(&hex::encode_upper(bytes));
                out.push_str("'H");
                Ok(())
            }
            (TypeKind::ObjectIdentifier | TypeKind::RelativeOid, Value::Text(text)) => {
                out.push_str(text);
                Ok(())
            }
            (TypeKind::CharacterString(_) | TypeKind::Time(_), Value::Text(text)) => {
                out.push('"');
                out.push_str(&text.replace('"', "\"\""));
                out.push('"');
                Ok(())
            }
            (TypeKind::Sequence(record) | TypeKind::Set(record), Value::Record(fields)) => {
                if fields.is_empty() {
                    out.push_str("{ }");
                    return Ok(());
                }
                out.push_str("{\n");
                for (index, (field_name, field_value)) in fields.iter().enumerate() {
                    for _ in 0..=depth {
                        out.push_str("    ");
                    }
                    out.push_str(field_name);
                    out.push(' ');
                    if field_name.starts_with("unknown-addition-") {
                        match field_value {
                            Value::Opaque(bytes) => {
                                out.push('\'');
                                out.push_str(&hex::encode_upper(bytes));
                                out.push_str("'H");
                            }
                            _ => return Err(self.err("unknown addition must be opaque")),
                        }
                    } else {
                        let component = record
                            .root
                            .iter()
                            .chain(record.additions.iter().flat_map(|a| a.components()))
                            .find(|c| &c.name == field_name)
                            .ok_or_else(|| {
                                self.err(format!("unknown component '{}'", field_name))
                            })?;
                        self.path.push(field_name.clone());
                        self.write_value(component.ty, field_value, depth + 1, out)?;
                        self.path.pop();
                    }
                    if index + 1 < fields.len() {
                        out.push(',');
                    }
                    out.push('\n');
                }
                for _ in 0..depth {
                    out.push_str("    ");
                }
                out.push('}');
                Ok(())
            }
            (
                TypeKind::SequenceOf { element } | TypeKind::SetOf { element },
                Value::List(items),
            ) => {
                let element = *element;
                if items.is_empty() {
                    out.push_str("{ }");
                    return Ok(());
                }
                out.push_str("{\n");
                for (index, item) in items.iter().enumerate() {
                    for _ in 0..=depth {
                        out.push_str("    ");
                    }
                    self.path.push(index.to_string());
                    self.write_value(element, item, depth + 1, out)?;
                    self.path.pop();
                    if index + 1 < items.len() {
                        out.push(',');
                    }
                    out.push('\n');
                }
                for _ in 0..depth {
                    out.push_str("    ");
                }
                out.push('}');
                Ok(())
            }
            (
                TypeKind::Choice {
                    root, additions, ..
                },
                Value::Choice(alt_name, inner),
            ) => {
                out.push_str(alt_name);
                out.push_str(" : ");
                if alt_name.starts_with("unknown-addition-") {
                    match inner.as_ref() {
                        Value::Opaque(bytes) => {
                            out.push('\'');
                            out.push_str(&hex::encode_upper(bytes));
                            out.push_str("'H");
                            return Ok(());
                        }
                        _ => return Err(self.err("unknown alternative must be opaque")),
                    }
                }
                let alternative = root
                    .iter()
                    .chain(additions.iter())
                    .find(|a| &a.name == alt_name)
                    .ok_or_else(|| {
                        self.err(format!("unknown CHOICE alternative '{}'", alt_name))
                    })?;
                self.path.push(alt_name.clone());
                self.write_value(alternative.ty, inner, depth, out)?;
                self.path.pop();
                Ok(())
            }
            (_, value) => Err(self.err(format!("cannot encode {} here", value.kind_name()))),
        }
    }
}
