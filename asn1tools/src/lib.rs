//! ASN.1 toolkit
//!
//! Compile ASN.1 specifications once, then encode and decode values against
//! the supported encoding rules:
//!
//! ```no_run
//! use asn1tools::{Codec, Value, compile_string};
//!
//! let spec = compile_string("M DEFINITIONS ::= BEGIN X ::= BOOLEAN END", Codec::Ber)?;
//! let encoded = spec.encode("X", &Value::Boolean(true))?;
//! let decoded = spec.decode("X", &encoded)?;
//! # Ok::<(), asn1tools::Asn1Error>(())
//! ```
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `asn1-core`: error taxonomy and the runtime value model
//! - `asn1-compiler`: lexer, parser, pre-processor and type graph compiler
//! - `asn1-codec`: the BER/DER, PER/UPER, JER, XER and GSER engines
//! - `asn1tools`: this facade
//! - `asn1-cli`: the `asn1tools` command line tool
//!
//! A compiled [`Specification`] is immutable and holds no interior state;
//! it may be shared across threads and used for any number of concurrent
//! encode/decode calls.

use std::path::Path;

pub use asn1_codec::Codec;
pub use asn1_compiler::ast::Module;
pub use asn1_core::{Asn1Error, Asn1Result, BitString, Value, format_oid, parse_oid};

/// Parse ASN.1 source text, which may contain several modules.
pub fn parse_string(text: &str) -> Asn1Result<Vec<Module>> {
    asn1_compiler::parse_string("string", text)
}

/// Parse one or more ASN.1 source files into a single parse tree.
pub fn parse_files<P: AsRef<Path>>(paths: &[P]) -> Asn1Result<Vec<Module>> {
    let mut modules = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let name = path.to_string_lossy();
        modules.extend(asn1_compiler::parse_string(&name, &text)?);
    }
    Ok(modules)
}

/// Compile a parse tree for one codec.
pub fn compile_modules(modules: Vec<Module>, codec: Codec) -> Asn1Result<Specification> {
    let graph = asn1_compiler::compile_modules(modules)?;
    Ok(Specification { graph, codec })
}

/// Parse and compile source text in one step.
pub fn compile_string(text: &str, codec: Codec) -> Asn1Result<Specification> {
    compile_modules(parse_string(text)?, codec)
}

/// Parse and compile source files in one step.
pub fn compile_files<P: AsRef<Path>>(paths: &[P], codec: Codec) -> Asn1Result<Specification> {
    compile_modules(parse_files(paths)?, codec)
}

/// A compiled specification bound to one codec.
///
/// Immutable after compilation; encode and decode are pure functions of the
/// compiled type graph and their arguments.
#[derive(Debug, Clone)]
pub struct Specification {
    graph: asn1_compiler::TypeGraph,
    codec: Codec,
}

impl Specification {
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Top-level type names in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.graph.type_names()
    }

    pub fn graph(&self) -> &asn1_compiler::TypeGraph {
        &self.graph
    }

    /// Encode a value of the named type.
    pub fn encode(&self, type_name: &str, value: &Value) -> Asn1Result<Vec<u8>> {
        let id = self
            .graph
            .lookup(type_name)
            .ok_or_else(|| Asn1Error::encode(type_name, "unknown type"))?;
        asn1_codec::encode(&self.graph, self.codec, type_name, id, value)
    }

    /// Decode octets as the named type.
    pub fn decode(&self, type_name: &str, data: &[u8]) -> Asn1Result<Value> {
        let id = self
            .graph
            .lookup(type_name)
            .ok_or_else(|| Asn1Error::decode(type_name, "unknown type"))?;
        asn1_codec::decode(&self.graph, self.codec, type_name, id, data)
    }
}
