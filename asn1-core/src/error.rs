use thiserror::Error;

/// Main error type for ASN.1 toolkit operations
///
/// Compilation failures (`Parse`, `Compile`) are fatal for the specification
/// being compiled. Runtime failures (`Encode`, `Decode`, `Constraints`) are
/// per-call and carry a dotted location path through the type graph, e.g.
/// `message.criticalExtensions.sib2`.
#[derive(Error, Debug)]
pub enum Asn1Error {
    #[error("{file}:{line}:{column}: {message}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Encode error at '{location}': {reason}")]
    Encode { location: String, reason: String },

    #[error("Decode error at '{location}': {reason}")]
    Decode { location: String, reason: String },

    #[error("Constraint violated at '{location}': {reason}")]
    Constraints { location: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Asn1Error {
    /// Parse error at a source coordinate.
    pub fn parse(file: impl Into<String>, line: usize, column: usize, message: impl Into<String>) -> Self {
        Asn1Error::Parse {
            file: file.into(),
            line,
            column,
            message: message.into(),
        }
    }

    /// Semantic error after a successful parse.
    pub fn compile(message: impl Into<String>) -> Self {
        Asn1Error::Compile(message.into())
    }

    /// Value does not conform to its declared type.
    pub fn encode(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Asn1Error::Encode {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Wire input does not conform to the declared type.
    pub fn decode(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Asn1Error::Decode {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// A constraint check failed. Callers may elect to treat this
    /// more leniently than a hard encode/decode failure.
    pub fn constraints(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Asn1Error::Constraints {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for ASN.1 toolkit operations
pub type Asn1Result<T> = Result<T, Asn1Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Asn1Error::parse("foo.asn", 3, 17, "expected '::='");
        assert_eq!(err.to_string(), "foo.asn:3:17: expected '::='");
    }

    #[test]
    fn test_decode_error_carries_location() {
        let err = Asn1Error::decode("a.b.2", "out of data");
        assert_eq!(err.to_string(), "Decode error at 'a.b.2': out of data");
    }
}
