//! Recursive-descent parser for ASN.1 modules
//!
//! Consumes the token stream from [`crate::lexer`] and produces the parse
//! tree in [`crate::ast`]. Coverage is the X.680 production set as used in
//! practice by 3GPP, SNMP, X.509 and LDAP specifications. Recovery is
//! deliberately absent: the first syntax error aborts with a `Parse` error
//! carrying the source coordinates.

use crate::ast::*;
use crate::lexer::{Lexer, Token, TokenKind};
use asn1_core::{Asn1Error, Asn1Result};
use num_bigint::BigInt;

/// Parse one source text (possibly holding several modules).
pub fn parse_string(source_name: &str, text: &str) -> Asn1Result<Vec<Module>> {
    let tokens = Lexer::new(source_name, text).tokenize()?;
    Parser::new(source_name, tokens).parse_modules()
}

struct Parser {
    source_name: String,
    tokens: Vec<Token>,
    pos: usize,
    /// Constraints written between `SEQUENCE`/`SET` and `OF`; they belong
    /// to the list type, not to its element, and are picked up by
    /// `parse_type` once the kind has been read.
    pending_constraints: Vec<AstConstraint>,
}

impl Parser {
    fn new(source_name: &str, tokens: Vec<Token>) -> Self {
        Self {
            source_name: source_name.to_string(),
            tokens,
            pos: 0,
            pending_constraints: Vec::new(),
        }
    }

    fn error(&self, message: impl Into<String>) -> Asn1Error {
        let (line, column) = self
            .tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
            .map(|t| (t.line, t.column))
            .unwrap_or((0, 0));
        Asn1Error::parse(&self.source_name, line, column, message)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn next(&mut self) -> Asn1Result<TokenKind> {
        let kind = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(kind)
    }

    fn accept(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Asn1Result<()> {
        if self.accept(kind) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    /// Word text, whether upper- or lower-case initial.
    fn word_at(&self, offset: usize) -> Option<&str> {
        match self.peek_at(offset) {
            Some(TokenKind::TypeReference(w)) | Some(TokenKind::Identifier(w)) => Some(w),
            _ => None,
        }
    }

    fn at_word(&self, word: &str) -> bool {
        self.word_at(0) == Some(word)
    }

    fn accept_word(&mut self, word: &str) -> bool {
        if self.at_word(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_word(&mut self, word: &str) -> Asn1Result<()> {
        if self.accept_word(word) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", word)))
        }
    }

    fn expect_type_reference(&mut self) -> Asn1Result<String> {
        match self.next()? {
            TokenKind::TypeReference(name) => Ok(name),
            _ => Err(self.error("expected a type reference")),
        }
    }

    fn expect_identifier(&mut self) -> Asn1Result<String> {
        match self.next()? {
            TokenKind::Identifier(name) => Ok(name),
            _ => Err(self.error("expected an identifier")),
        }
    }

    /// Skip a balanced `{ ... }` group; the opening brace must be next.
    fn skip_braced(&mut self) -> Asn1Result<()> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()? {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    fn parse_modules(&mut self) -> Asn1Result<Vec<Module>> {
        let mut modules = Vec::new();
        while self.peek().is_some() {
            modules.push(self.parse_module()?);
        }
        if modules.is_empty() {
            return Err(self.error("no module definition found"));
        }
        Ok(modules)
    }

    fn parse_module(&mut self) -> Asn1Result<Module> {
        let name = self.expect_type_reference()?;
        if self.peek() == Some(&TokenKind::LBrace) {
            // module identifier OID
            self.skip_braced()?;
        }
        self.expect_word("DEFINITIONS")?;

        let mut tag_default = TagDefault::Explicit;
        if self.accept_word("EXPLICIT") {
            self.expect_word("TAGS")?;
            tag_default = TagDefault::Explicit;
        } else if self.accept_word("IMPLICIT") {
            self.expect_word("TAGS")?;
            tag_default = TagDefault::Implicit;
        } else if self.accept_word("AUTOMATIC") {
            self.expect_word("TAGS")?;
            tag_default = TagDefault::Automatic;
        }

        let mut extensibility_implied = false;
        if self.accept_word("EXTENSIBILITY") {
            self.expect_word("IMPLIED")?;
            extensibility_implied = true;
        }

        self.expect(&TokenKind::Assign, "'::='")?;
        self.expect_word("BEGIN")?;

        if self.accept_word("EXPORTS") {
            // EXPORTS ALL; or a symbol list; either way skipped to ';'
            while !self.accept(&TokenKind::Semicolon) {
                self.next()?;
            }
        }

        let mut imports = Vec::new();
        if self.accept_word("IMPORTS") {
            imports = self.parse_imports()?;
        }

        let mut assignments = Vec::new();
        while !self.at_word("END") {
            assignments.push(self.parse_assignment()?);
        }
        self.expect_word("END")?;

        Ok(Module {
            name,
            tag_default,
            extensibility_implied,
            imports,
            assignments,
        })
    }

    fn parse_imports(&mut self) -> Asn1Result<Vec<Import>> {
        let mut imports = Vec::new();
        let mut symbols = Vec::new();
        loop {
            if self.accept(&TokenKind::Semicolon) {
                break;
            }
            if self.accept_word("FROM") {
                let from_module = self.expect_type_reference()?;
                // optional module OID or reference after the name
                if self.peek() == Some(&TokenKind::LBrace) {
                    self.skip_braced()?;
                } else if matches!(self.peek(), Some(TokenKind::Identifier(_)))
                    && self.peek_at(1) != Some(&TokenKind::Comma)
                    && self.peek_at(1) != Some(&TokenKind::Semicolon)
                    && self.word_at(1) != Some("FROM")
                {
                    self.pos += 1;
                }
                imports.push(Import {
                    symbols: std::mem::take(&mut symbols),
                    from_module,
                });
                continue;
            }
            match self.next()? {
                TokenKind::TypeReference(name) | TokenKind::Identifier(name) => {
                    // parameterized symbol reference: `Foo{}`
                    if self.peek() == Some(&TokenKind::LBrace) {
                        self.skip_braced()?;
                    }
                    symbols.push(name);
                }
                TokenKind::Comma => {}
                _ => return Err(self.error("malformed IMPORTS clause")),
            }
        }
        Ok(imports)
    }

    // ------------------------------------------------------------------
    // Assignments
    // ------------------------------------------------------------------

    fn parse_assignment(&mut self) -> Asn1Result<Assignment> {
        match self.peek() {
            Some(TokenKind::TypeReference(_)) => {
                let name = self.expect_type_reference()?;
                match self.peek() {
                    Some(TokenKind::Assign) => {
                        self.pos += 1;
                        if self.at_word("CLASS") {
                            Ok(Assignment::Class(self.parse_class_assignment(name)?))
                        } else {
                            let ty = self.parse_type()?;
                            Ok(Assignment::Type(TypeAssignment {
                                name,
                                parameters: Vec::new(),
                                ty,
                            }))
                        }
                    }
                    Some(TokenKind::LBrace) => {
                        let parameters = self.parse_formal_parameters()?;
                        self.expect(&TokenKind::Assign, "'::='")?;
                        let ty = self.parse_type()?;
                        Ok(Assignment::Type(TypeAssignment {
                            name,
                            parameters,
                            ty,
                        }))
                    }
                    Some(TokenKind::TypeReference(_)) => {
                        // `SetName CLASS-NAME ::= { ... }` object set
                        let class = self.expect_type_reference()?;
                        self.expect(&TokenKind::Assign, "'::='")?;
                        self.skip_braced()?;
                        Ok(Assignment::ObjectSet(ObjectSetAssignment { name, class }))
                    }
                    _ => Err(self.error("malformed assignment")),
                }
            }
            Some(TokenKind::Identifier(_)) => {
                let name = self.expect_identifier()?;
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Assign, "'::='")?;
                let value = self.parse_value_tolerant()?;
                Ok(Assignment::Value(ValueAssignment { name, ty, value }))
            }
            _ => Err(self.error("expected an assignment")),
        }
    }

    fn parse_formal_parameters(&mut self) -> Asn1Result<Vec<String>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut parameters = Vec::new();
        loop {
            // `Governor : Name` keeps only the name
            if matches!(self.peek(), Some(TokenKind::TypeReference(_)))
                && self.peek_at(1) == Some(&TokenKind::Colon)
            {
                self.pos += 2;
            }
            match self.next()? {
                TokenKind::TypeReference(name) | TokenKind::Identifier(name) => {
                    parameters.push(name)
                }
                _ => return Err(self.error("expected a parameter name")),
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(parameters)
    }

    fn parse_class_assignment(&mut self, name: String) -> Asn1Result<ClassAssignment> {
        self.expect_word("CLASS")?;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut fields = Vec::new();
        loop {
            match self.next()? {
                TokenKind::FieldReference(field_name) => {
                    let type_field = field_name
                        .chars()
                        .next()
                        .map(|c| c.is_ascii_uppercase())
                        .unwrap_or(false);
                    if type_field {
                        fields.push(ClassField::TypeField { name: field_name });
                        // `&Set ClassRef` object-set fields keep only the name
                        if !matches!(
                            self.peek(),
                            Some(TokenKind::Comma) | Some(TokenKind::RBrace)
                        ) {
                            self.parse_type()?;
                            while self.accept_word("UNIQUE") || self.accept_word("OPTIONAL") {}
                        }
                    } else {
                        let ty = self.parse_type()?;
                        while self.accept_word("UNIQUE") || self.accept_word("OPTIONAL") {}
                        if self.accept_word("DEFAULT") {
                            self.parse_value_tolerant()?;
                        }
                        fields.push(ClassField::ValueField {
                            name: field_name,
                            ty,
                        });
                    }
                }
                _ => return Err(self.error("expected a '&field' in CLASS definition")),
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        if self.accept_word("WITH") {
            self.expect_word("SYNTAX")?;
            self.skip_braced()?;
        }
        Ok(ClassAssignment { name, fields })
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Asn1Result<AstType> {
        let mut tags = Vec::new();
        while self.peek() == Some(&TokenKind::LBracket) {
            tags.push(self.parse_tag()?);
        }
        let kind = self.parse_type_kind()?;
        let mut constraints = std::mem::take(&mut self.pending_constraints);
        while self.peek() == Some(&TokenKind::LParen) {
            constraints.push(self.parse_constraint()?);
        }
        Ok(AstType {
            tags,
            kind,
            constraints,
        })
    }

    fn parse_tag(&mut self) -> Asn1Result<AstTag> {
        self.expect(&TokenKind::LBracket, "'['")?;
        let class = if self.accept_word("UNIVERSAL") {
            TagClass::Universal
        } else if self.accept_word("APPLICATION") {
            TagClass::Application
        } else if self.accept_word("PRIVATE") {
            TagClass::Private
        } else {
            TagClass::ContextSpecific
        };
        let number = match self.next()? {
            TokenKind::Number(n) => AstValue::Number(n),
            TokenKind::Identifier(name) => AstValue::Identifier(name),
            _ => return Err(self.error("expected a tag number")),
        };
        self.expect(&TokenKind::RBracket, "']'")?;
        let mode = if self.accept_word("IMPLICIT") {
            Some(TagMode::Implicit)
        } else if self.accept_word("EXPLICIT") {
            Some(TagMode::Explicit)
        } else {
            None
        };
        Ok(AstTag {
            class,
            number,
            mode,
        })
    }

    fn parse_type_kind(&mut self) -> Asn1Result<AstTypeKind> {
        let word = match self.peek() {
            Some(TokenKind::TypeReference(w)) => w.clone(),
            _ => return Err(self.error("expected a type")),
        };

        match word.as_str() {
            "BOOLEAN" => {
                self.pos += 1;
                Ok(AstTypeKind::Boolean)
            }
            "INTEGER" => {
                self.pos += 1;
                let named_numbers = if self.peek() == Some(&TokenKind::LBrace) {
                    self.parse_named_number_list()?
                } else {
                    Vec::new()
                };
                Ok(AstTypeKind::Integer { named_numbers })
            }
            "ENUMERATED" => {
                self.pos += 1;
                self.parse_enumerated()
            }
            "REAL" => {
                self.pos += 1;
                Ok(AstTypeKind::Real)
            }
            "NULL" => {
                self.pos += 1;
                Ok(AstTypeKind::Null)
            }
            "BIT" => {
                self.pos += 1;
                self.expect_word("STRING")?;
                let named_bits = if self.peek() == Some(&TokenKind::LBrace) {
                    self.parse_named_number_list()?
                } else {
                    Vec::new()
                };
                Ok(AstTypeKind::BitString { named_bits })
            }
            "OCTET" => {
                self.pos += 1;
                self.expect_word("STRING")?;
                Ok(AstTypeKind::OctetString)
            }
            "OBJECT" => {
                self.pos += 1;
                self.expect_word("IDENTIFIER")?;
                Ok(AstTypeKind::ObjectIdentifier)
            }
            "RELATIVE-OID" => {
                self.pos += 1;
                Ok(AstTypeKind::RelativeOid)
            }
            "ANY" => {
                self.pos += 1;
                let defined_by = if self.accept_word("DEFINED") {
                    self.expect_word("BY")?;
                    Some(self.expect_identifier()?)
                } else {
                    None
                };
                Ok(AstTypeKind::Any { defined_by })
            }
            "SEQUENCE" => {
                self.pos += 1;
                self.parse_sequence_or_set(true)
            }
            "SET" => {
                self.pos += 1;
                self.parse_sequence_or_set(false)
            }
            "CHOICE" => {
                self.pos += 1;
                self.parse_choice()
            }
            "UTF8String" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Utf8))
            }
            "IA5String" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Ia5))
            }
            "BMPString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Bmp))
            }
            "PrintableString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Printable))
            }
            "NumericString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Numeric))
            }
            "VisibleString" | "ISO646String" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Visible))
            }
            "GeneralString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::General))
            }
            "TeletexString" | "T61String" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Teletex))
            }
            "UniversalString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Universal))
            }
            "GraphicString" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::Graphic))
            }
            "ObjectDescriptor" => {
                self.pos += 1;
                Ok(AstTypeKind::CharacterString(StringKind::ObjectDescriptor))
            }
            "UTCTime" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::UtcTime))
            }
            "GeneralizedTime" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::GeneralizedTime))
            }
            "DATE" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::Date))
            }
            "TIME-OF-DAY" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::TimeOfDay))
            }
            "DATE-TIME" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::DateTime))
            }
            "DURATION" => {
                self.pos += 1;
                Ok(AstTypeKind::Time(TimeKind::Duration))
            }
            _ => self.parse_referenced_type(),
        }
    }

    fn parse_referenced_type(&mut self) -> Asn1Result<AstTypeKind> {
        let first = self.expect_type_reference()?;
        if self.accept(&TokenKind::Dot) {
            match self.next()? {
                TokenKind::TypeReference(name) => {
                    return Ok(AstTypeKind::Reference {
                        module: Some(first),
                        name,
                        arguments: Vec::new(),
                    });
                }
                TokenKind::FieldReference(field) => {
                    return Ok(AstTypeKind::FieldReference {
                        class: first,
                        field,
                    });
                }
                _ => return Err(self.error("expected a type or field after '.'")),
            }
        }

        let mut arguments = Vec::new();
        if self.peek() == Some(&TokenKind::LBrace) {
            arguments = self.parse_actual_arguments()?;
        }
        Ok(AstTypeKind::Reference {
            module: None,
            name: first,
            arguments,
        })
    }

    fn parse_actual_arguments(&mut self) -> Asn1Result<Vec<AstArgument>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut arguments = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::LBrace) => {
                    // inline object-set argument, accepted but not modeled
                    self.skip_braced()?;
                    arguments.push(AstArgument::Value(AstValue::Null));
                }
                Some(TokenKind::Identifier(_))
                | Some(TokenKind::Number(_))
                | Some(TokenKind::Minus) => {
                    arguments.push(AstArgument::Value(self.parse_value()?));
                }
                _ => {
                    arguments.push(AstArgument::Type(self.parse_type()?));
                }
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(arguments)
    }

    fn parse_sequence_or_set(&mut self, is_sequence: bool) -> Asn1Result<AstTypeKind> {
        // `SEQUENCE { ... }`, `SEQUENCE OF T`, `SEQUENCE (SIZE (...)) OF T`
        // and `SEQUENCE SIZE (...) OF T` all start here.
        let mut of_constraints = Vec::new();
        loop {
            match self.peek() {
                Some(TokenKind::LBrace) => {
                    let list = self.parse_component_list()?;
                    return Ok(if is_sequence {
                        AstTypeKind::Sequence(list)
                    } else {
                        AstTypeKind::Set(list)
                    });
                }
                Some(TokenKind::LParen) => {
                    of_constraints.push(self.parse_constraint()?);
                }
                _ if self.at_word("SIZE") => {
                    self.pos += 1;
                    self.expect(&TokenKind::LParen, "'('")?;
                    let inner = self.parse_constraint_union()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    of_constraints.push(AstConstraint::Size(inner));
                }
                _ if self.at_word("OF") => {
                    self.pos += 1;
                    // optional element name: `SEQUENCE OF ident Type`
                    if matches!(self.peek(), Some(TokenKind::Identifier(_))) {
                        self.pos += 1;
                    }
                    let element = Box::new(self.parse_type()?);
                    self.pending_constraints = of_constraints;
                    return Ok(if is_sequence {
                        AstTypeKind::SequenceOf(element)
                    } else {
                        AstTypeKind::SetOf(element)
                    });
                }
                _ => return Err(self.error("malformed SEQUENCE/SET type")),
            }
        }
    }

    fn parse_component_list(&mut self) -> Asn1Result<ComponentList> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut list = ComponentList::default();
        let mut in_additions = false;

        if self.accept(&TokenKind::RBrace) {
            return Ok(list);
        }

        loop {
            match self.peek() {
                Some(TokenKind::Ellipsis) => {
                    self.pos += 1;
                    if self.accept(&TokenKind::Exclamation) {
                        self.parse_value()?;
                    }
                    if !list.extensible {
                        list.extensible = true;
                        in_additions = true;
                    } else {
                        // second marker: back to the (trailing) root
                        in_additions = false;
                    }
                }
                Some(TokenKind::LVersionBracket) => {
                    self.pos += 1;
                    // optional `version :` prefix
                    if matches!(self.peek(), Some(TokenKind::Number(_)))
                        && self.peek_at(1) == Some(&TokenKind::Colon)
                    {
                        self.pos += 2;
                    }
                    let mut group = Vec::new();
                    loop {
                        group.push(self.parse_component()?);
                        if self.accept(&TokenKind::Comma) {
                            continue;
                        }
                        self.expect(&TokenKind::RVersionBracket, "']]'")?;
                        break;
                    }
                    list.additions.push(AdditionEntry::Group(group));
                }
                _ if self.at_word("COMPONENTS") => {
                    self.pos += 1;
                    self.expect_word("OF")?;
                    let ty = self.parse_type()?;
                    list.root.push(ComponentEntry::ComponentsOf(ty));
                }
                _ => {
                    let component = self.parse_component()?;
                    if in_additions {
                        list.additions.push(AdditionEntry::Single(component));
                    } else {
                        list.root.push(ComponentEntry::Component(component));
                    }
                }
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(list)
    }

    fn parse_component(&mut self) -> Asn1Result<Component> {
        let name = self.expect_identifier()?;
        let ty = self.parse_type()?;
        let presence = if self.accept_word("OPTIONAL") {
            Presence::Optional
        } else if self.accept_word("DEFAULT") {
            Presence::Default(self.parse_value()?)
        } else {
            Presence::Required
        };
        Ok(Component { name, ty, presence })
    }

    fn parse_choice(&mut self) -> Asn1Result<AstTypeKind> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut root = Vec::new();
        let mut additions = Vec::new();
        let mut extensible = false;
        let mut in_additions = false;
        loop {
            match self.peek() {
                Some(TokenKind::Ellipsis) => {
                    self.pos += 1;
                    if self.accept(&TokenKind::Exclamation) {
                        self.parse_value()?;
                    }
                    if !extensible {
                        extensible = true;
                        in_additions = true;
                    } else {
                        in_additions = false;
                    }
                }
                Some(TokenKind::LVersionBracket) => {
                    self.pos += 1;
                    if matches!(self.peek(), Some(TokenKind::Number(_)))
                        && self.peek_at(1) == Some(&TokenKind::Colon)
                    {
                        self.pos += 2;
                    }
                    loop {
                        let name = self.expect_identifier()?;
                        let ty = self.parse_type()?;
                        additions.push(NamedType { name, ty });
                        if self.accept(&TokenKind::Comma) {
                            continue;
                        }
                        self.expect(&TokenKind::RVersionBracket, "']]'")?;
                        break;
                    }
                }
                _ => {
                    let name = self.expect_identifier()?;
                    let ty = self.parse_type()?;
                    if in_additions {
                        additions.push(NamedType { name, ty });
                    } else {
                        root.push(NamedType { name, ty });
                    }
                }
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(AstTypeKind::Choice {
            root,
            extensible,
            additions,
        })
    }

    fn parse_enumerated(&mut self) -> Asn1Result<AstTypeKind> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut root = Vec::new();
        let mut additions = Vec::new();
        let mut extensible = false;
        let mut in_additions = false;
        loop {
            match self.peek() {
                Some(TokenKind::Ellipsis) => {
                    self.pos += 1;
                    if self.accept(&TokenKind::Exclamation) {
                        self.parse_value()?;
                    }
                    extensible = true;
                    in_additions = true;
                }
                _ => {
                    let name = self.expect_identifier()?;
                    let value = if self.accept(&TokenKind::LParen) {
                        let v = self.parse_value()?;
                        self.expect(&TokenKind::RParen, "')'")?;
                        Some(v)
                    } else {
                        None
                    };
                    if in_additions {
                        additions.push((name, value));
                    } else {
                        root.push((name, value));
                    }
                }
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(AstTypeKind::Enumerated {
            root,
            extensible,
            additions,
        })
    }

    fn parse_named_number_list(&mut self) -> Asn1Result<Vec<(String, AstValue)>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut named = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            self.expect(&TokenKind::LParen, "'('")?;
            let value = self.parse_value()?;
            self.expect(&TokenKind::RParen, "')'")?;
            named.push((name, value));
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(named)
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    fn parse_constraint(&mut self) -> Asn1Result<AstConstraint> {
        self.expect(&TokenKind::LParen, "'('")?;
        let items = self.parse_constraint_union()?;
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(if items.len() == 1 {
            items.into_iter().next().unwrap()
        } else {
            AstConstraint::Union(items)
        })
    }

    fn parse_constraint_union(&mut self) -> Asn1Result<Vec<AstConstraint>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_constraint_element()?);
            if self.accept(&TokenKind::Pipe)
                || self.accept(&TokenKind::Caret)
                || self.accept(&TokenKind::Comma)
                || self.accept_word("UNION")
                || self.accept_word("INTERSECTION")
            {
                continue;
            }
            break;
        }
        Ok(items)
    }

    fn parse_constraint_element(&mut self) -> Asn1Result<AstConstraint> {
        if self.accept(&TokenKind::Ellipsis) {
            return Ok(AstConstraint::Extensible);
        }
        if self.accept_word("SIZE") {
            self.expect(&TokenKind::LParen, "'('")?;
            let inner = self.parse_constraint_union()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(AstConstraint::Size(inner));
        }
        if self.accept_word("FROM") {
            self.expect(&TokenKind::LParen, "'('")?;
            let inner = self.parse_constraint_union()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(AstConstraint::PermittedAlphabet(inner));
        }
        if self.accept_word("CONTAINING") {
            let ty = self.parse_type()?;
            if self.accept_word("ENCODED") {
                self.expect_word("BY")?;
                self.parse_value()?;
            }
            return Ok(AstConstraint::Containing(Box::new(ty)));
        }
        if self.accept_word("ENCODED") {
            self.expect_word("BY")?;
            self.parse_value()?;
            return Ok(AstConstraint::WithComponents);
        }
        if self.accept_word("PATTERN") {
            self.parse_value()?;
            return Ok(AstConstraint::WithComponents);
        }
        if self.accept_word("WITH") {
            if self.accept_word("COMPONENTS") {
                self.skip_braced()?;
            } else {
                self.expect_word("COMPONENT")?;
                self.parse_constraint_element()?;
            }
            return Ok(AstConstraint::WithComponents);
        }
        if self.peek() == Some(&TokenKind::LBrace) {
            return self.parse_table_constraint();
        }

        // value, or a value range
        let lo = if self.accept_word("MIN") {
            RangeEndpoint::Min
        } else {
            RangeEndpoint::Value(self.parse_value()?)
        };
        self.accept(&TokenKind::LessThan);
        if self.accept(&TokenKind::Range) {
            self.accept(&TokenKind::LessThan);
            let hi = if self.accept_word("MAX") {
                RangeEndpoint::Max
            } else {
                RangeEndpoint::Value(self.parse_value()?)
            };
            return Ok(AstConstraint::ValueRange { lo, hi });
        }
        match lo {
            RangeEndpoint::Value(v) => Ok(AstConstraint::SingleValue(v)),
            _ => Err(self.error("MIN must be the lower endpoint of a range")),
        }
    }

    fn parse_table_constraint(&mut self) -> Asn1Result<AstConstraint> {
        // `{ ObjectSet }` optionally followed by `{ @component }`
        let start = self.pos;
        self.expect(&TokenKind::LBrace, "'{'")?;
        let object_set = match (self.peek().cloned(), self.peek_at(1)) {
            (Some(TokenKind::TypeReference(name)), Some(&TokenKind::RBrace)) => {
                self.pos += 2;
                name
            }
            _ => {
                self.pos = start;
                self.skip_braced()?;
                String::new()
            }
        };
        let mut at_field = None;
        if self.peek() == Some(&TokenKind::LBrace)
            && self.peek_at(1) == Some(&TokenKind::At)
        {
            self.pos += 2;
            self.accept(&TokenKind::Dot);
            let mut field = self.expect_identifier()?;
            while self.accept(&TokenKind::Dot) {
                field.push('.');
                field.push_str(&self.expect_identifier()?);
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            at_field = Some(field);
        }
        Ok(AstConstraint::Table {
            object_set,
            at_field,
        })
    }

    // ------------------------------------------------------------------
    // Values
    // ------------------------------------------------------------------

    /// Parse a value, falling back to skipping one braced group when the
    /// content uses information-object syntax this parser does not model.
    fn parse_value_tolerant(&mut self) -> Asn1Result<AstValue> {
        let start = self.pos;
        match self.parse_value() {
            Ok(value) => Ok(value),
            Err(err) => {
                self.pos = start;
                if self.peek() == Some(&TokenKind::LBrace) {
                    self.skip_braced()?;
                    Ok(AstValue::Null)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn parse_value(&mut self) -> Asn1Result<AstValue> {
        match self.peek().cloned() {
            Some(TokenKind::Number(n)) => {
                self.pos += 1;
                Ok(AstValue::Number(n))
            }
            Some(TokenKind::RealNumber(r)) => {
                self.pos += 1;
                Ok(AstValue::Real(r))
            }
            Some(TokenKind::Minus) => {
                self.pos += 1;
                match self.next()? {
                    TokenKind::Number(n) => Ok(AstValue::Number(-n)),
                    TokenKind::RealNumber(r) => Ok(AstValue::Real(-r)),
                    _ => Err(self.error("expected a number after '-'")),
                }
            }
            Some(TokenKind::CString(s)) => {
                self.pos += 1;
                Ok(AstValue::CString(s))
            }
            Some(TokenKind::BString(s)) => {
                self.pos += 1;
                Ok(AstValue::BString(s))
            }
            Some(TokenKind::HString(s)) => {
                self.pos += 1;
                let mut digits = s.clone();
                if digits.len() % 2 == 1 {
                    digits.push('0');
                }
                let mut bytes = Vec::with_capacity(digits.len() / 2);
                let chars: Vec<char> = digits.chars().collect();
                for pair in chars.chunks(2) {
                    let hi = pair[0]
                        .to_digit(16)
                        .ok_or_else(|| self.error("invalid hex digit"))?;
                    let lo = pair[1]
                        .to_digit(16)
                        .ok_or_else(|| self.error("invalid hex digit"))?;
                    bytes.push(((hi << 4) | lo) as u8);
                }
                Ok(AstValue::HString(bytes))
            }
            Some(TokenKind::TypeReference(w)) => match w.as_str() {
                "TRUE" => {
                    self.pos += 1;
                    Ok(AstValue::Boolean(true))
                }
                "FALSE" => {
                    self.pos += 1;
                    Ok(AstValue::Boolean(false))
                }
                "NULL" => {
                    self.pos += 1;
                    Ok(AstValue::Null)
                }
                "PLUS-INFINITY" => {
                    self.pos += 1;
                    Ok(AstValue::Real(f64::INFINITY))
                }
                "MINUS-INFINITY" => {
                    self.pos += 1;
                    Ok(AstValue::Real(f64::NEG_INFINITY))
                }
                "NOT-A-NUMBER" => {
                    self.pos += 1;
                    Ok(AstValue::Real(f64::NAN))
                }
                _ => {
                    self.pos += 1;
                    Ok(AstValue::Identifier(w))
                }
            },
            Some(TokenKind::Identifier(name)) => {
                self.pos += 1;
                if self.accept(&TokenKind::Colon) {
                    let inner = self.parse_value()?;
                    Ok(AstValue::Choice(name, Box::new(inner)))
                } else {
                    Ok(AstValue::Identifier(name))
                }
            }
            Some(TokenKind::LBrace) => self.parse_braced_value(),
            _ => Err(self.error("expected a value")),
        }
    }

    /// Does the braced group starting at the current `{` contain a comma at
    /// its top nesting level? Object identifier values (`{ iso standard 8571 }`)
    /// do not; record and list values do.
    fn braced_has_comma(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::LBrace | TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RBrace | TokenKind::RParen | TokenKind::RBracket => {
                    if depth <= 1 {
                        return false;
                    }
                    depth -= 1;
                }
                TokenKind::Comma if depth == 1 => return true,
                _ => {}
            }
        }
        false
    }

    fn parse_braced_value(&mut self) -> Asn1Result<AstValue> {
        if !self.braced_has_comma() {
            return self.parse_space_separated_braced_value();
        }
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut items = Vec::new();
        if self.accept(&TokenKind::RBrace) {
            return Ok(AstValue::Braced(items));
        }
        loop {
            match self.peek().cloned() {
                Some(TokenKind::Identifier(name)) => {
                    // `name(1)` OID arc, `name value` sequence member, or
                    // a bare identifier (named bit / enum / arc name)
                    match self.peek_at(1) {
                        Some(TokenKind::LParen) => {
                            self.pos += 2;
                            let number = match self.next()? {
                                TokenKind::Number(n) => n,
                                _ => return Err(self.error("expected a number")),
                            };
                            self.expect(&TokenKind::RParen, "')'")?;
                            items.push(BracedItem::NamedNumber(name, number));
                        }
                        Some(TokenKind::Comma) | Some(TokenKind::RBrace) => {
                            self.pos += 1;
                            items.push(BracedItem::Value(AstValue::Identifier(name)));
                        }
                        _ => {
                            self.pos += 1;
                            let value = self.parse_value()?;
                            items.push(BracedItem::Named(name, value));
                        }
                    }
                }
                _ => {
                    items.push(BracedItem::Value(self.parse_value()?));
                }
            }
            if self.accept(&TokenKind::Comma) {
                continue;
            }
            self.expect(&TokenKind::RBrace, "'}'")?;
            break;
        }
        Ok(AstValue::Braced(items))
    }

    /// A braced value with no top-level commas: an object identifier value
    /// or a single-member record value. Items are kept flat; the compiler
    /// pairs them up once the target type is known.
    fn parse_space_separated_braced_value(&mut self) -> Asn1Result<AstValue> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        let mut items = Vec::new();
        while !self.accept(&TokenKind::RBrace) {
            match self.peek().cloned() {
                Some(TokenKind::Identifier(name))
                    if self.peek_at(1) == Some(&TokenKind::LParen) =>
                {
                    self.pos += 2;
                    let number = match self.next()? {
                        TokenKind::Number(n) => n,
                        _ => return Err(self.error("expected a number")),
                    };
                    self.expect(&TokenKind::RParen, "')'")?;
                    items.push(BracedItem::NamedNumber(name, number));
                }
                Some(TokenKind::Identifier(name)) => {
                    self.pos += 1;
                    items.push(BracedItem::Value(AstValue::Identifier(name)));
                }
                _ => items.push(BracedItem::Value(self.parse_value()?)),
            }
        }
        Ok(AstValue::Braced(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> Module {
        let mut modules = parse_string("test.asn", text).unwrap();
        assert_eq!(modules.len(), 1);
        modules.remove(0)
    }

    #[test]
    fn test_minimal_module() {
        let module = parse_one("M DEFINITIONS ::= BEGIN X ::= BOOLEAN END");
        assert_eq!(module.name, "M");
        assert_eq!(module.tag_default, TagDefault::Explicit);
        assert_eq!(module.assignments.len(), 1);
    }

    #[test]
    fn test_automatic_tags_and_extensibility() {
        let module = parse_one(
            "M DEFINITIONS AUTOMATIC TAGS EXTENSIBILITY IMPLIED ::= BEGIN \
             X ::= SEQUENCE { a BOOLEAN } END",
        );
        assert_eq!(module.tag_default, TagDefault::Automatic);
        assert!(module.extensibility_implied);
    }

    #[test]
    fn test_sequence_with_optional_and_default() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { a INTEGER (0..3), b INTEGER OPTIONAL, c BOOLEAN DEFAULT TRUE } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!("expected a type assignment");
        };
        let AstTypeKind::Sequence(list) = &assignment.ty.kind else {
            panic!("expected a SEQUENCE");
        };
        assert_eq!(list.root.len(), 3);
        let ComponentEntry::Component(c) = &list.root[2] else {
            panic!("expected a plain component");
        };
        assert_eq!(c.presence, Presence::Default(AstValue::Boolean(true)));
    }

    #[test]
    fn test_extension_marker_and_additions() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { a BOOLEAN, ..., b INTEGER OPTIONAL, [[ c BOOLEAN, d INTEGER ]] } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        let AstTypeKind::Sequence(list) = &assignment.ty.kind else {
            panic!();
        };
        assert!(list.extensible);
        assert_eq!(list.root.len(), 1);
        assert_eq!(list.additions.len(), 2);
        assert!(matches!(list.additions[1], AdditionEntry::Group(ref g) if g.len() == 2));
    }

    #[test]
    fn test_sequence_of_with_size() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN X ::= SEQUENCE (SIZE (1..4)) OF INTEGER END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        // the SIZE applies to the list, not to its element
        assert!(matches!(assignment.ty.constraints[0], AstConstraint::Size(_)));
        let AstTypeKind::SequenceOf(element) = &assignment.ty.kind else {
            panic!("expected SEQUENCE OF");
        };
        assert!(element.constraints.is_empty());
    }

    #[test]
    fn test_choice_with_tags() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             X ::= CHOICE { a [0] INTEGER, b [1] BOOLEAN, ... } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        let AstTypeKind::Choice {
            root, extensible, ..
        } = &assignment.ty.kind
        else {
            panic!();
        };
        assert_eq!(root.len(), 2);
        assert!(extensible);
        assert_eq!(root[0].ty.tags.len(), 1);
    }

    #[test]
    fn test_imports() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             IMPORTS A, B FROM Other C FROM Third; \
             X ::= A \
             END",
        );
        assert_eq!(module.imports.len(), 2);
        assert_eq!(module.imports[0].symbols, vec!["A", "B"]);
        assert_eq!(module.imports[0].from_module, "Other");
        assert_eq!(module.imports[1].symbols, vec!["C"]);
    }

    #[test]
    fn test_enumerated_with_values() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             X ::= ENUMERATED { red(0), green(1), ..., blue(2) } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        let AstTypeKind::Enumerated {
            root,
            extensible,
            additions,
        } = &assignment.ty.kind
        else {
            panic!();
        };
        assert_eq!(root.len(), 2);
        assert!(extensible);
        assert_eq!(additions.len(), 1);
    }

    #[test]
    fn test_value_assignment() {
        let module = parse_one("M DEFINITIONS ::= BEGIN lb INTEGER ::= -5 END");
        let Assignment::Value(assignment) = &module.assignments[0] else {
            panic!();
        };
        assert_eq!(assignment.name, "lb");
        assert_eq!(assignment.value, AstValue::Number(BigInt::from(-5)));
    }

    #[test]
    fn test_components_of() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { COMPONENTS OF Y, c BOOLEAN } \
             Y ::= SEQUENCE { a INTEGER, b INTEGER } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        let AstTypeKind::Sequence(list) = &assignment.ty.kind else {
            panic!();
        };
        assert!(matches!(list.root[0], ComponentEntry::ComponentsOf(_)));
    }

    #[test]
    fn test_parameterized_assignment() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             Wrapper { Inner } ::= SEQUENCE { body Inner } \
             X ::= Wrapper { INTEGER } \
             END",
        );
        let Assignment::Type(assignment) = &module.assignments[0] else {
            panic!();
        };
        assert_eq!(assignment.parameters, vec!["Inner"]);
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = parse_string("bad.asn", "M DEFINITIONS ::= BEGIN X ::= END").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("bad.asn:"), "{}", text);
    }

    #[test]
    fn test_class_assignment() {
        let module = parse_one(
            "M DEFINITIONS ::= BEGIN \
             ATTRIBUTE ::= CLASS { &id OBJECT IDENTIFIER UNIQUE, &Type } \
             WITH SYNTAX { TYPE &Type ID &id } \
             X ::= SEQUENCE { id ATTRIBUTE.&id, value ATTRIBUTE.&Type } \
             END",
        );
        let Assignment::Class(class) = &module.assignments[0] else {
            panic!("expected CLASS assignment");
        };
        assert_eq!(class.fields.len(), 2);
        assert!(matches!(class.fields[1], ClassField::TypeField { .. }));
    }
}
