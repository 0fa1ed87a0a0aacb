//! Runtime value model shared by every codec

use crate::datatypes::bit_string::BitString;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container holding a decoded ASN.1 value, or a value to be encoded.
///
/// The representation is schema-free: the same `Value` tree can be encoded
/// with any codec the specification was compiled for. Field order in
/// `Record` follows insertion order; CHOICE values carry the alternative
/// name, so equality is alternative-name-sensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL
    Null,
    /// BOOLEAN
    Boolean(bool),
    /// INTEGER (arbitrary precision)
    Integer(BigInt),
    /// REAL
    Real(f64),
    /// OCTET STRING
    Bytes(Vec<u8>),
    /// BIT STRING
    BitString(BitString),
    /// Restricted character strings, ENUMERATED names, OBJECT IDENTIFIER
    /// dotted text and time types
    Text(String),
    /// SEQUENCE / SET: ordered name-value pairs
    Record(Vec<(String, Value)>),
    /// SEQUENCE OF / SET OF
    List(Vec<Value>),
    /// CHOICE: alternative name plus inner value
    Choice(String, Box<Value>),
    /// Open type payload carried undecoded
    Opaque(Vec<u8>),
}

impl Value {
    /// INTEGER from a machine integer.
    pub fn integer(value: i64) -> Self {
        Value::Integer(BigInt::from(value))
    }

    /// Text value.
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// CHOICE value.
    pub fn choice(name: impl Into<String>, inner: Value) -> Self {
        Value::Choice(name.into(), Box::new(inner))
    }

    /// Record from name-value pairs.
    pub fn record(fields: Vec<(&str, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect())
    }

    /// Short name of the variant, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Bytes(_) => "bytes",
            Value::BitString(_) => "bit string",
            Value::Text(_) => "text",
            Value::Record(_) => "record",
            Value::List(_) => "list",
            Value::Choice(_, _) => "choice",
            Value::Opaque(_) => "open type",
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<&BigInt> {
        match self {
            Value::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bit_string(&self) -> Option<&BitString> {
        match self {
            Value::BitString(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Record(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_choice(&self) -> Option<(&str, &Value)> {
        match self {
            Value::Choice(name, inner) => Some((name, inner)),
            _ => None,
        }
    }

    /// Look up a record field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_record()
            .and_then(|fields| fields.iter().find(|(n, _)| n == name).map(|(_, v)| v))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::integer(value)
    }
}

impl From<BigInt> for Value {
    fn from(value: BigInt) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(true) => write!(f, "TRUE"),
            Value::Boolean(false) => write!(f, "FALSE"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Bytes(b) => {
                write!(f, "'")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                write!(f, "'H")
            }
            Value::BitString(b) => write!(f, "'{}'B", b),
            Value::Text(t) => write!(f, "\"{}\"", t),
            Value::Record(fields) => {
                write!(f, "{{ ")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", name, value)?;
                }
                write!(f, " }}")
            }
            Value::List(items) => {
                write!(f, "{{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, " }}")
            }
            Value::Choice(name, inner) => write!(f, "{} : {}", name, inner),
            Value::Opaque(b) => {
                write!(f, "'")?;
                for byte in b {
                    write!(f, "{:02X}", byte)?;
                }
                write!(f, "'H")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_field_lookup() {
        let value = Value::record(vec![("a", Value::integer(1)), ("b", Value::Boolean(true))]);
        assert_eq!(value.field("b"), Some(&Value::Boolean(true)));
        assert_eq!(value.field("c"), None);
    }

    #[test]
    fn test_choice_equality_is_name_sensitive() {
        let a = Value::choice("a", Value::integer(1));
        let b = Value::choice("b", Value::integer(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        let value = Value::record(vec![("flag", Value::Boolean(true))]);
        assert_eq!(value.to_string(), "{ flag TRUE }");
    }
}
