//! Lowering from the pre-processed universe to the compiled type graph
//!
//! Runs in phases so that forward and cyclic references work:
//!
//! 1. allocate one arena slot per top-level type,
//! 2. fill every slot, creating anonymous nodes for inner types and
//!    instantiating parameterized templates at their call sites,
//! 3. reject definition cycles (`A ::= B`, `B ::= A`), evaluate DEFAULT
//!    values, then precompute the BER tag plan and the effective
//!    constraints of every node.

use crate::ast::{
    self, AdditionEntry, AstArgument, AstConstraint, AstTag, AstType, AstTypeKind, AstValue,
    BracedItem, ComponentEntry, Module, RangeEndpoint, TagMode, TypeAssignment,
};
use crate::graph::*;
use crate::preprocess::{Universe, preprocess, walk_type_mut};
use asn1_core::{Asn1Error, Asn1Result, BitString, Value};
use log::debug;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};
use std::collections::{HashMap, HashSet};

/// Compile parsed modules into a type graph.
pub fn compile_modules(modules: Vec<Module>) -> Asn1Result<TypeGraph> {
    let universe = preprocess(modules)?;
    Compiler::new(universe).run()
}

/// Where a pending DEFAULT lives inside its record node.
enum ComponentSlot {
    Root(usize),
    AdditionSingle(usize),
    AdditionGroup(usize, usize),
}

struct PendingDefault {
    node: TypeId,
    slot: ComponentSlot,
    child: TypeId,
    ast: AstValue,
}

struct Compiler {
    universe: Universe,
    nodes: Vec<TypeNode>,
    index: HashMap<String, TypeId>,
    top: Vec<(String, TypeId)>,
    pending_defaults: Vec<PendingDefault>,
    instantiation_depth: usize,
}

impl Compiler {
    fn new(universe: Universe) -> Self {
        Self {
            universe,
            nodes: Vec::new(),
            index: HashMap::new(),
            top: Vec::new(),
            pending_defaults: Vec::new(),
            instantiation_depth: 0,
        }
    }

    fn run(mut self) -> Asn1Result<TypeGraph> {
        // phase 1: allocate arena slots for all top-level types
        for name in self.universe.order.clone() {
            let id = self.alloc(&name);
            self.index.insert(name.clone(), id);
            self.top.push((name, id));
        }

        // phase 2: fill them
        for (name, id) in self.top.clone() {
            let assignment = self.universe.types[&name].clone();
            self.fill(id, &assignment.ty, &name)?;
        }

        // phase 3: finalize
        self.check_reference_cycles()?;
        self.evaluate_pending_defaults()?;
        self.compute_ber_plans();
        self.compute_effective()?;

        debug!("compiled {} type graph nodes", self.nodes.len());

        let graph = TypeGraph {
            nodes: self.nodes,
            top: self.top,
            index: self.index,
        };
        check_distinct_tags(&graph)?;
        Ok(graph)
    }

    fn alloc(&mut self, name: &str) -> TypeId {
        let id = self.nodes.len();
        self.nodes.push(TypeNode {
            name: name.to_string(),
            kind: TypeKind::Null,
            tags: Vec::new(),
            constraints: Vec::new(),
            ber: BerPlan::default(),
            effective: Effective::default(),
        });
        id
    }

    // ------------------------------------------------------------------
    // Filling nodes
    // ------------------------------------------------------------------

    fn lower_type(&mut self, ast: &AstType, name: &str) -> Asn1Result<TypeId> {
        let id = self.alloc(name);
        self.fill(id, ast, name)?;
        Ok(id)
    }

    fn fill(&mut self, id: TypeId, ast: &AstType, name: &str) -> Asn1Result<()> {
        let tags = self.lower_tags(&ast.tags)?;
        let kind = self.lower_kind(&ast.kind, id, name)?;
        let named = integer_named_map(&kind);
        let constraints = self.lower_constraints(&ast.constraints, &named)?;
        let node = &mut self.nodes[id];
        node.kind = kind;
        node.tags = tags;
        node.constraints = constraints;
        Ok(())
    }

    fn lower_tags(&self, tags: &[AstTag]) -> Asn1Result<Vec<Tag>> {
        tags.iter()
            .map(|tag| {
                let number = self
                    .eval_int(&tag.number, 0)?
                    .to_u32()
                    .ok_or_else(|| Asn1Error::compile("tag number out of range"))?;
                Ok(Tag {
                    class: match tag.class {
                        ast::TagClass::Universal => TagClass::Universal,
                        ast::TagClass::Application => TagClass::Application,
                        ast::TagClass::ContextSpecific => TagClass::ContextSpecific,
                        ast::TagClass::Private => TagClass::Private,
                    },
                    number,
                    explicit: tag.mode != Some(TagMode::Implicit),
                })
            })
            .collect()
    }

    fn lower_kind(&mut self, kind: &AstTypeKind, id: TypeId, name: &str) -> Asn1Result<TypeKind> {
        match kind {
            AstTypeKind::Boolean => Ok(TypeKind::Boolean),
            AstTypeKind::Real => Ok(TypeKind::Real),
            AstTypeKind::Null => Ok(TypeKind::Null),
            AstTypeKind::OctetString => Ok(TypeKind::OctetString),
            AstTypeKind::ObjectIdentifier => Ok(TypeKind::ObjectIdentifier),
            AstTypeKind::RelativeOid => Ok(TypeKind::RelativeOid),
            AstTypeKind::CharacterString(kind) => Ok(TypeKind::CharacterString(*kind)),
            AstTypeKind::Time(kind) => Ok(TypeKind::Time(*kind)),
            AstTypeKind::Any { .. } => Ok(TypeKind::Any),
            AstTypeKind::Integer { named_numbers } => {
                let named_numbers = named_numbers
                    .iter()
                    .map(|(n, v)| Ok((n.clone(), self.eval_int(v, 0)?)))
                    .collect::<Asn1Result<Vec<_>>>()?;
                Ok(TypeKind::Integer { named_numbers })
            }
            AstTypeKind::BitString { named_bits } => {
                let named_bits = named_bits
                    .iter()
                    .map(|(n, v)| {
                        let bit = self.eval_int(v, 0)?.to_u64().ok_or_else(|| {
                            Asn1Error::compile(format!("named bit '{}' out of range", n))
                        })?;
                        Ok((n.clone(), bit))
                    })
                    .collect::<Asn1Result<Vec<_>>>()?;
                Ok(TypeKind::BitString { named_bits })
            }
            AstTypeKind::Enumerated {
                root,
                extensible,
                additions,
            } => {
                let mut used: HashSet<i64> = HashSet::new();
                let mut lowered_root = Vec::with_capacity(root.len());
                for (item_name, value) in root {
                    let value = match value {
                        Some(v) => self.eval_int(v, 0)?.to_i64().ok_or_else(|| {
                            Asn1Error::compile(format!(
                                "enumerated value '{}' out of range",
                                item_name
                            ))
                        })?,
                        None => {
                            let mut candidate = 0i64;
                            while used.contains(&candidate) {
                                candidate += 1;
                            }
                            candidate
                        }
                    };
                    if !used.insert(value) {
                        return Err(Asn1Error::compile(format!(
                            "duplicate enumerated value {} in '{}'",
                            value, name
                        )));
                    }
                    lowered_root.push((item_name.clone(), value));
                }
                let mut lowered_additions = Vec::with_capacity(additions.len());
                for (item_name, value) in additions {
                    let value = match value {
                        Some(v) => self.eval_int(v, 0)?.to_i64().ok_or_else(|| {
                            Asn1Error::compile(format!(
                                "enumerated value '{}' out of range",
                                item_name
                            ))
                        })?,
                        None => used.iter().copied().max().unwrap_or(-1) + 1,
                    };
                    if !used.insert(value) {
                        return Err(Asn1Error::compile(format!(
                            "duplicate enumerated value {} in '{}'",
                            value, name
                        )));
                    }
                    lowered_additions.push((item_name.clone(), value));
                }
                Ok(TypeKind::Enumerated {
                    root: lowered_root,
                    extensible: *extensible,
                    additions: lowered_additions,
                })
            }
            AstTypeKind::Sequence(list) => {
                let record = self.lower_record(list, id, name)?;
                Ok(TypeKind::Sequence(record))
            }
            AstTypeKind::Set(list) => {
                let record = self.lower_record(list, id, name)?;
                Ok(TypeKind::Set(record))
            }
            AstTypeKind::SequenceOf(element) => {
                let element = self.lower_type(element, &format!("{}.element", name))?;
                Ok(TypeKind::SequenceOf { element })
            }
            AstTypeKind::SetOf(element) => {
                let element = self.lower_type(element, &format!("{}.element", name))?;
                Ok(TypeKind::SetOf { element })
            }
            AstTypeKind::Choice {
                root,
                extensible,
                additions,
            } => {
                let root = root
                    .iter()
                    .map(|alt| {
                        Ok(Alternative {
                            name: alt.name.clone(),
                            ty: self.lower_type(&alt.ty, &format!("{}.{}", name, alt.name))?,
                        })
                    })
                    .collect::<Asn1Result<Vec<_>>>()?;
                let additions = additions
                    .iter()
                    .map(|alt| {
                        Ok(Alternative {
                            name: alt.name.clone(),
                            ty: self.lower_type(&alt.ty, &format!("{}.{}", name, alt.name))?,
                        })
                    })
                    .collect::<Asn1Result<Vec<_>>>()?;
                Ok(TypeKind::Choice {
                    root,
                    extensible: *extensible,
                    additions,
                })
            }
            AstTypeKind::Reference {
                name: ref_name,
                arguments,
                ..
            } => {
                if !arguments.is_empty() {
                    if self.instantiation_depth >= 32 {
                        return Err(Asn1Error::compile(format!(
                            "parameterized type '{}' nests too deeply",
                            ref_name
                        )));
                    }
                    self.instantiation_depth += 1;
                    let inner = self.instantiate(ref_name, arguments).and_then(
                        |instance| {
                            self.lower_type(&instance, &format!("{}.{}", name, ref_name))
                        },
                    );
                    self.instantiation_depth -= 1;
                    return Ok(TypeKind::Reference(inner?));
                }
                if let Some(&target) = self.index.get(ref_name) {
                    return Ok(TypeKind::Reference(target));
                }
                if self.universe.classes.contains_key(ref_name) {
                    // a bare CLASS reference used as a type is an open type
                    return Ok(TypeKind::Any);
                }
                if self.universe.templates.contains_key(ref_name) {
                    return Err(Asn1Error::compile(format!(
                        "parameterized type '{}' used without actual parameters",
                        ref_name
                    )));
                }
                Err(Asn1Error::compile(format!(
                    "undefined type '{}' referenced from '{}'",
                    ref_name, name
                )))
            }
            AstTypeKind::FieldReference { class, field } => {
                let class_assignment =
                    self.universe.classes.get(class).cloned().ok_or_else(|| {
                        Asn1Error::compile(format!("undefined class '{}'", class))
                    })?;
                let class_field = class_assignment
                    .fields
                    .iter()
                    .find(|f| match f {
                        ast::ClassField::TypeField { name } => name == field,
                        ast::ClassField::ValueField { name, .. } => name == field,
                    })
                    .ok_or_else(|| {
                        Asn1Error::compile(format!(
                            "class '{}' has no field '&{}'",
                            class, field
                        ))
                    })?;
                match class_field {
                    ast::ClassField::TypeField { .. } => Ok(TypeKind::Any),
                    ast::ClassField::ValueField { ty, .. } => {
                        let ty = ty.clone();
                        let inner =
                            self.lower_type(&ty, &format!("{}.&{}", class, field))?;
                        Ok(TypeKind::Reference(inner))
                    }
                }
            }
        }
    }

    fn lower_record(
        &mut self,
        list: &ast::ComponentList,
        id: TypeId,
        name: &str,
    ) -> Asn1Result<Record> {
        let mut record = Record {
            root: Vec::with_capacity(list.root.len()),
            extensible: list.extensible,
            additions: Vec::with_capacity(list.additions.len()),
        };
        for entry in &list.root {
            match entry {
                ComponentEntry::Component(c) => {
                    let slot = ComponentSlot::Root(record.root.len());
                    let component = self.lower_component(c, id, slot, name)?;
                    record.root.push(component);
                }
                ComponentEntry::ComponentsOf(_) => {
                    return Err(Asn1Error::compile(format!(
                        "unexpanded COMPONENTS OF in '{}'",
                        name
                    )));
                }
            }
        }
        for (addition_index, addition) in list.additions.iter().enumerate() {
            match addition {
                AdditionEntry::Single(c) => {
                    let slot = ComponentSlot::AdditionSingle(addition_index);
                    let component = self.lower_component(c, id, slot, name)?;
                    record.additions.push(Addition::Single(component));
                }
                AdditionEntry::Group(cs) => {
                    let mut group = Vec::with_capacity(cs.len());
                    for (member_index, c) in cs.iter().enumerate() {
                        let slot =
                            ComponentSlot::AdditionGroup(addition_index, member_index);
                        group.push(self.lower_component(c, id, slot, name)?);
                    }
                    record.additions.push(Addition::Group(group));
                }
            }
        }
        Ok(record)
    }

    fn lower_component(
        &mut self,
        component: &ast::Component,
        record_node: TypeId,
        slot: ComponentSlot,
        record_name: &str,
    ) -> Asn1Result<Component> {
        let child = self.lower_type(
            &component.ty,
            &format!("{}.{}", record_name, component.name),
        )?;
        let presence = match &component.presence {
            ast::Presence::Required => Presence::Required,
            ast::Presence::Optional => Presence::Optional,
            ast::Presence::Default(value) => {
                // kinds may not all be known yet; evaluated in phase 3
                self.pending_defaults.push(PendingDefault {
                    node: record_node,
                    slot,
                    child,
                    ast: value.clone(),
                });
                Presence::Default(Value::Null)
            }
        };
        Ok(Component {
            name: component.name.clone(),
            ty: child,
            presence,
        })
    }

    // ------------------------------------------------------------------
    // Parameterization
    // ------------------------------------------------------------------

    fn instantiate(
        &mut self,
        template_name: &str,
        arguments: &[AstArgument],
    ) -> Asn1Result<AstType> {
        let template: TypeAssignment = self
            .universe
            .templates
            .get(template_name)
            .cloned()
            .ok_or_else(|| {
                Asn1Error::compile(format!(
                    "undefined parameterized type '{}'",
                    template_name
                ))
            })?;
        if template.parameters.len() != arguments.len() {
            return Err(Asn1Error::compile(format!(
                "'{}' expects {} parameters, got {}",
                template_name,
                template.parameters.len(),
                arguments.len()
            )));
        }

        let mut type_args: HashMap<&str, &AstType> = HashMap::new();
        let mut value_args: HashMap<&str, &AstValue> = HashMap::new();
        for (formal, actual) in template.parameters.iter().zip(arguments) {
            match actual {
                AstArgument::Type(ty) => {
                    type_args.insert(formal.as_str(), ty);
                }
                AstArgument::Value(value) => {
                    value_args.insert(formal.as_str(), value);
                }
            }
        }

        let mut body = template.ty.clone();
        walk_type_mut(&mut body, &mut |ty| {
            if let AstTypeKind::Reference { name, arguments, .. } = &ty.kind {
                if arguments.is_empty() {
                    if let Some(actual) = type_args.get(name.as_str()) {
                        let mut merged = (*actual).clone();
                        // the use site keeps its own tags outermost and its
                        // own constraints in addition to the actual's
                        merged.tags.splice(0..0, ty.tags.drain(..));
                        merged.constraints.extend(ty.constraints.drain(..));
                        *ty = merged;
                    }
                }
            }
            substitute_values_in_type(ty, &value_args);
        });

        Ok(body)
    }

    // ------------------------------------------------------------------
    // Constraints
    // ------------------------------------------------------------------

    fn lower_constraints(
        &mut self,
        constraints: &[AstConstraint],
        named: &HashMap<String, BigInt>,
    ) -> Asn1Result<Vec<Constraint>> {
        constraints
            .iter()
            .map(|c| self.lower_constraint(c, named))
            .collect()
    }

    fn lower_constraint(
        &mut self,
        constraint: &AstConstraint,
        named: &HashMap<String, BigInt>,
    ) -> Asn1Result<Constraint> {
        match constraint {
            AstConstraint::Extensible => Ok(Constraint::Extensible),
            AstConstraint::WithComponents => Ok(Constraint::Opaque),
            AstConstraint::Containing(_) => Ok(Constraint::Opaque),
            AstConstraint::Table { .. } => Ok(Constraint::Table),
            AstConstraint::Union(items) => Ok(Constraint::Union(
                self.lower_constraints(items, named)?,
            )),
            AstConstraint::Size(items) => {
                Ok(Constraint::Size(self.lower_constraints(items, named)?))
            }
            AstConstraint::PermittedAlphabet(items) => Ok(Constraint::PermittedAlphabet(
                self.lower_constraints(items, named)?,
            )),
            AstConstraint::SingleValue(value) => match value {
                AstValue::CString(s) => Ok(Constraint::SingleValue(Value::Text(s.clone()))),
                value => match self.eval_int_with_named(value, named) {
                    Ok(n) => Ok(Constraint::SingleValue(Value::Integer(n))),
                    Err(_) => Ok(Constraint::Opaque),
                },
            },
            AstConstraint::ValueRange { lo, hi } => {
                // single-character string endpoints form an alphabet range
                if let (
                    RangeEndpoint::Value(AstValue::CString(a)),
                    RangeEndpoint::Value(AstValue::CString(b)),
                ) = (lo, hi)
                {
                    let mut a_chars = a.chars();
                    let mut b_chars = b.chars();
                    if let (Some(a0), None, Some(b0), None) = (
                        a_chars.next(),
                        a_chars.next(),
                        b_chars.next(),
                        b_chars.next(),
                    ) {
                        return Ok(Constraint::AlphabetRange(a0, b0));
                    }
                }
                let lo = match lo {
                    RangeEndpoint::Min => None,
                    RangeEndpoint::Max => {
                        return Err(Asn1Error::compile("MAX as a lower bound"));
                    }
                    RangeEndpoint::Value(v) => Some(self.eval_int_with_named(v, named)?),
                };
                let hi = match hi {
                    RangeEndpoint::Max => None,
                    RangeEndpoint::Min => {
                        return Err(Asn1Error::compile("MIN as an upper bound"));
                    }
                    RangeEndpoint::Value(v) => Some(self.eval_int_with_named(v, named)?),
                };
                Ok(Constraint::ValueRange { lo, hi })
            }
        }
    }

    // ------------------------------------------------------------------
    // Value evaluation
    // ------------------------------------------------------------------

    fn eval_int_with_named(
        &self,
        value: &AstValue,
        named: &HashMap<String, BigInt>,
    ) -> Asn1Result<BigInt> {
        if let AstValue::Identifier(name) = value {
            if let Some(n) = named.get(name) {
                return Ok(n.clone());
            }
        }
        self.eval_int(value, 0)
    }

    fn eval_int(&self, value: &AstValue, depth: usize) -> Asn1Result<BigInt> {
        if depth > 32 {
            return Err(Asn1Error::compile("value reference chain too deep"));
        }
        match value {
            AstValue::Number(n) => Ok(n.clone()),
            AstValue::Identifier(name) => match self.universe.values.get(name) {
                Some(assignment) => self.eval_int(&assignment.value, depth + 1),
                None => Err(Asn1Error::compile(format!(
                    "undefined value reference '{}'",
                    name
                ))),
            },
            _ => Err(Asn1Error::compile("expected an integer value")),
        }
    }

    fn resolve_id(&self, mut id: TypeId) -> TypeId {
        let mut hops = 0;
        while let TypeKind::Reference(target) = self.nodes[id].kind {
            id = target;
            hops += 1;
            if hops > self.nodes.len() {
                break;
            }
        }
        id
    }

    fn eval_value(&self, ast: &AstValue, target: TypeId, depth: usize) -> Asn1Result<Value> {
        if depth > 32 {
            return Err(Asn1Error::compile("DEFAULT value reference chain too deep"));
        }
        let kind = &self.nodes[self.resolve_id(target)].kind;
        match ast {
            AstValue::Number(n) => match kind {
                TypeKind::Real => Ok(Value::Real(n.to_f64().unwrap_or(0.0))),
                _ => Ok(Value::Integer(n.clone())),
            },
            AstValue::Real(r) => Ok(Value::Real(*r)),
            AstValue::Boolean(b) => Ok(Value::Boolean(*b)),
            AstValue::Null => Ok(Value::Null),
            AstValue::CString(s) => Ok(Value::Text(s.clone())),
            AstValue::BString(digits) => {
                let mut bytes = vec![0u8; digits.len().div_ceil(8)];
                for (i, c) in digits.chars().enumerate() {
                    match c {
                        '1' => bytes[i / 8] |= 1 << (7 - (i % 8)),
                        '0' => {}
                        _ => {
                            return Err(Asn1Error::compile(format!(
                                "invalid binary digit '{}'",
                                c
                            )));
                        }
                    }
                }
                Ok(Value::BitString(
                    BitString::new(bytes, digits.len())
                        .map_err(|e| Asn1Error::compile(e.to_string()))?,
                ))
            }
            AstValue::HString(bytes) => match kind {
                TypeKind::BitString { .. } => Ok(Value::BitString(
                    BitString::new(bytes.clone(), bytes.len() * 8)
                        .map_err(|e| Asn1Error::compile(e.to_string()))?,
                )),
                _ => Ok(Value::Bytes(bytes.clone())),
            },
            AstValue::Identifier(name) => {
                match kind {
                    TypeKind::Enumerated {
                        root, additions, ..
                    } => {
                        if root.iter().chain(additions.iter()).any(|(n, _)| n == name) {
                            return Ok(Value::Text(name.clone()));
                        }
                    }
                    TypeKind::Integer { named_numbers } => {
                        if let Some((_, n)) =
                            named_numbers.iter().find(|(n, _)| n == name)
                        {
                            return Ok(Value::Integer(n.clone()));
                        }
                    }
                    _ => {}
                }
                match self.universe.values.get(name) {
                    Some(assignment) => {
                        self.eval_value(&assignment.value, target, depth + 1)
                    }
                    None => Err(Asn1Error::compile(format!(
                        "undefined value reference '{}'",
                        name
                    ))),
                }
            }
            AstValue::Choice(alt_name, inner) => match kind {
                TypeKind::Choice {
                    root, additions, ..
                } => {
                    let alternative = root
                        .iter()
                        .chain(additions.iter())
                        .find(|a| &a.name == alt_name)
                        .ok_or_else(|| {
                            Asn1Error::compile(format!(
                                "unknown CHOICE alternative '{}'",
                                alt_name
                            ))
                        })?;
                    Ok(Value::Choice(
                        alt_name.clone(),
                        Box::new(self.eval_value(inner, alternative.ty, depth + 1)?),
                    ))
                }
                _ => Err(Asn1Error::compile(
                    "choice value for a non-CHOICE type",
                )),
            },
            AstValue::Braced(items) => self.eval_braced(items, kind, target, depth),
        }
    }

    fn eval_braced(
        &self,
        items: &[BracedItem],
        kind: &TypeKind,
        target: TypeId,
        depth: usize,
    ) -> Asn1Result<Value> {
        match kind {
            TypeKind::BitString { named_bits } => {
                let mut highest = 0usize;
                let mut bits = Vec::new();
                for item in items {
                    let BracedItem::Value(AstValue::Identifier(name)) = item else {
                        return Err(Asn1Error::compile("malformed named bit list"));
                    };
                    let (_, bit) = named_bits
                        .iter()
                        .find(|(n, _)| n == name)
                        .ok_or_else(|| {
                            Asn1Error::compile(format!("unknown named bit '{}'", name))
                        })?;
                    let bit = *bit as usize;
                    highest = highest.max(bit + 1);
                    bits.push(bit);
                }
                let mut bytes = vec![0u8; highest.div_ceil(8)];
                for bit in bits {
                    bytes[bit / 8] |= 1 << (7 - (bit % 8));
                }
                Ok(Value::BitString(
                    BitString::new(bytes, highest)
                        .map_err(|e| Asn1Error::compile(e.to_string()))?,
                ))
            }
            TypeKind::SequenceOf { element } | TypeKind::SetOf { element } => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    let BracedItem::Value(value) = item else {
                        return Err(Asn1Error::compile("malformed list value"));
                    };
                    list.push(self.eval_value(value, *element, depth + 1)?);
                }
                Ok(Value::List(list))
            }
            TypeKind::Sequence(record) | TypeKind::Set(record) => {
                // comma-less single-member values arrive as a flat
                // [identifier, value] pair
                let mut pairs: Vec<(&String, &AstValue)> = Vec::new();
                let mut index = 0;
                while index < items.len() {
                    match &items[index] {
                        BracedItem::Named(name, value) => {
                            pairs.push((name, value));
                            index += 1;
                        }
                        BracedItem::Value(AstValue::Identifier(name))
                            if index + 1 < items.len() =>
                        {
                            let BracedItem::Value(value) = &items[index + 1] else {
                                return Err(Asn1Error::compile("malformed record value"));
                            };
                            pairs.push((name, value));
                            index += 2;
                        }
                        _ => return Err(Asn1Error::compile("malformed record value")),
                    }
                }
                let mut fields = Vec::with_capacity(pairs.len());
                for (name, value) in pairs {
                    let component = record
                        .root
                        .iter()
                        .chain(record.additions.iter().flat_map(|a| a.components()))
                        .find(|c| &c.name == name)
                        .ok_or_else(|| {
                            Asn1Error::compile(format!("unknown component '{}'", name))
                        })?;
                    fields.push((
                        name.clone(),
                        self.eval_value(value, component.ty, depth + 1)?,
                    ));
                }
                Ok(Value::Record(fields))
            }
            TypeKind::ObjectIdentifier | TypeKind::RelativeOid => {
                let mut arcs: Vec<u64> = Vec::with_capacity(items.len());
                for (position, item) in items.iter().enumerate() {
                    match item {
                        BracedItem::NamedNumber(_, n) => {
                            arcs.push(n.to_u64().ok_or_else(|| {
                                Asn1Error::compile("object identifier arc out of range")
                            })?);
                        }
                        BracedItem::Value(AstValue::Number(n)) => {
                            arcs.push(n.to_u64().ok_or_else(|| {
                                Asn1Error::compile("object identifier arc out of range")
                            })?);
                        }
                        BracedItem::Value(AstValue::Identifier(name)) => {
                            if let Some(arc) = well_known_arc(position, arcs.first(), name) {
                                arcs.push(arc);
                            } else if let Some(assignment) =
                                self.universe.values.get(name)
                            {
                                match self.eval_value(
                                    &assignment.value,
                                    target,
                                    depth + 1,
                                )? {
                                    Value::Text(text) => {
                                        for part in text.split('.') {
                                            arcs.push(part.parse().map_err(|_| {
                                                Asn1Error::compile(
                                                    "bad object identifier prefix",
                                                )
                                            })?);
                                        }
                                    }
                                    Value::Integer(n) => {
                                        arcs.push(n.to_u64().ok_or_else(|| {
                                            Asn1Error::compile(
                                                "object identifier arc out of range",
                                            )
                                        })?);
                                    }
                                    _ => {
                                        return Err(Asn1Error::compile(
                                            "bad object identifier component",
                                        ));
                                    }
                                }
                            } else {
                                return Err(Asn1Error::compile(format!(
                                    "unknown object identifier arc '{}'",
                                    name
                                )));
                            }
                        }
                        _ => {
                            return Err(Asn1Error::compile(
                                "malformed object identifier value",
                            ));
                        }
                    }
                }
                Ok(Value::Text(
                    arcs.iter()
                        .map(|a| a.to_string())
                        .collect::<Vec<_>>()
                        .join("."),
                ))
            }
            _ => Err(Asn1Error::compile("unexpected braced value")),
        }
    }

    // ------------------------------------------------------------------
    // Phase 3
    // ------------------------------------------------------------------

    fn check_reference_cycles(&self) -> Asn1Result<()> {
        for start in 0..self.nodes.len() {
            let mut id = start;
            let mut visited = HashSet::new();
            while let TypeKind::Reference(target) = self.nodes[id].kind {
                if !visited.insert(id) {
                    return Err(Asn1Error::compile(format!(
                        "circular type definition involving '{}'",
                        self.nodes[start].name
                    )));
                }
                id = target;
            }
        }
        Ok(())
    }

    fn evaluate_pending_defaults(&mut self) -> Asn1Result<()> {
        let pending = std::mem::take(&mut self.pending_defaults);
        let mut evaluated = Vec::with_capacity(pending.len());
        for default in &pending {
            evaluated.push(self.eval_value(&default.ast, default.child, 0)?);
        }
        for (default, value) in pending.into_iter().zip(evaluated) {
            let node = &mut self.nodes[default.node];
            let component = match (&mut node.kind, &default.slot) {
                (
                    TypeKind::Sequence(record) | TypeKind::Set(record),
                    ComponentSlot::Root(i),
                ) => &mut record.root[*i],
                (
                    TypeKind::Sequence(record) | TypeKind::Set(record),
                    ComponentSlot::AdditionSingle(i),
                ) => match &mut record.additions[*i] {
                    Addition::Single(c) => c,
                    Addition::Group(_) => unreachable!(),
                },
                (
                    TypeKind::Sequence(record) | TypeKind::Set(record),
                    ComponentSlot::AdditionGroup(i, j),
                ) => match &mut record.additions[*i] {
                    Addition::Group(cs) => &mut cs[*j],
                    Addition::Single(_) => unreachable!(),
                },
                _ => unreachable!(),
            };
            component.presence = Presence::Default(value);
        }
        Ok(())
    }

    fn compute_ber_plans(&mut self) {
        for id in 0..self.nodes.len() {
            let mut chain: Vec<Tag> = Vec::new();
            let mut current = id;
            loop {
                chain.extend(self.nodes[current].tags.iter().copied());
                match self.nodes[current].kind {
                    TypeKind::Reference(target) => current = target,
                    _ => break,
                }
            }
            let universal = self.nodes[current].kind.universal_tag();
            self.nodes[id].ber = resolve_ber_plan(&chain, universal);
        }
    }

    fn compute_effective(&mut self) -> Asn1Result<()> {
        for id in 0..self.nodes.len() {
            // collect the reference chain, outermost first
            let mut chain = vec![id];
            let mut current = id;
            while let TypeKind::Reference(target) = self.nodes[current].kind {
                chain.push(target);
                current = target;
            }
            // innermost constraints apply first, outer ones narrow them
            let mut effective = Effective::default();
            for &node in chain.iter().rev() {
                apply_constraints(&self.nodes[node].constraints, &mut effective);
            }
            self.nodes[id].effective = effective;
        }
        Ok(())
    }

}

/// Reject duplicate identity tags where the encoding rules require distinct
/// ones: CHOICE alternatives and SET members.
fn check_distinct_tags(graph: &TypeGraph) -> Asn1Result<()> {
    for id in 0..graph.len() {
        let node = graph.node(id);
        match &node.kind {
            TypeKind::Choice {
                root, additions, ..
            } => {
                let mut seen = HashSet::new();
                for alternative in root.iter().chain(additions.iter()) {
                    if let Some(tags) = graph.leading_tags(alternative.ty) {
                        for tag in tags {
                            if !seen.insert(tag) {
                                return Err(Asn1Error::compile(format!(
                                    "duplicate tag in CHOICE '{}'",
                                    node.name
                                )));
                            }
                        }
                    }
                }
            }
            TypeKind::Set(record) => {
                let mut seen = HashSet::new();
                for component in record
                    .root
                    .iter()
                    .chain(record.additions.iter().flat_map(|a| a.components()))
                {
                    if let Some(tags) = graph.leading_tags(component.ty) {
                        for tag in tags {
                            if !seen.insert(tag) {
                                return Err(Asn1Error::compile(format!(
                                    "duplicate tag in SET '{}'",
                                    node.name
                                )));
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Map of an INTEGER kind's named numbers, used when lowering constraints
/// whose bounds reference them.
fn integer_named_map(kind: &TypeKind) -> HashMap<String, BigInt> {
    match kind {
        TypeKind::Integer { named_numbers } => named_numbers.iter().cloned().collect(),
        TypeKind::Enumerated {
            root, additions, ..
        } => root
            .iter()
            .chain(additions.iter())
            .map(|(n, v)| (n.clone(), BigInt::from(*v)))
            .collect(),
        _ => HashMap::new(),
    }
}

/// Resolve a declared tag chain (outermost first) plus the universal tag of
/// the underlying kind into the encoded wrap/identity plan.
fn resolve_ber_plan(chain: &[Tag], universal: Option<RawTag>) -> BerPlan {
    let mut identity = universal;
    // wraps collected innermost-first, reversed at the end
    let mut wraps: Vec<RawTag> = Vec::new();
    for tag in chain.iter().rev() {
        let raw = RawTag::new(tag.class, tag.number);
        if tag.explicit || (identity.is_none() && wraps.is_empty()) {
            // explicit wrap; an IMPLICIT tag over an untagged CHOICE or
            // open type also has nothing to replace, so it wraps too
            wraps.push(raw);
        } else if let Some(last) = wraps.last_mut() {
            *last = raw;
        } else {
            identity = Some(raw);
        }
    }
    wraps.reverse();
    BerPlan { wraps, identity }
}

fn collect_alphabet(items: &[Constraint], alphabet: &mut Vec<char>) {
    for item in items {
        match item {
            Constraint::SingleValue(Value::Text(text)) => alphabet.extend(text.chars()),
            Constraint::AlphabetRange(lo, hi) => {
                let (lo, hi) = (*lo as u32, *hi as u32);
                for code in lo..=hi {
                    if let Some(c) = char::from_u32(code) {
                        alphabet.push(c);
                    }
                }
            }
            Constraint::Union(inner)
            | Constraint::Size(inner)
            | Constraint::PermittedAlphabet(inner) => collect_alphabet(inner, alphabet),
            _ => {}
        }
    }
}

/// Substitute value parameters into every value position of a type: tag
/// numbers, constraint bounds, named numbers and DEFAULTs.
fn substitute_values_in_type(ty: &mut AstType, value_args: &HashMap<&str, &AstValue>) {
    if value_args.is_empty() {
        return;
    }
    for tag in &mut ty.tags {
        substitute_value(&mut tag.number, value_args);
    }
    for constraint in &mut ty.constraints {
        substitute_in_constraint(constraint, value_args);
    }
    match &mut ty.kind {
        AstTypeKind::Integer { named_numbers } => {
            for (_, value) in named_numbers {
                substitute_value(value, value_args);
            }
        }
        AstTypeKind::BitString { named_bits } => {
            for (_, value) in named_bits {
                substitute_value(value, value_args);
            }
        }
        AstTypeKind::Enumerated {
            root, additions, ..
        } => {
            for (_, value) in root.iter_mut().chain(additions.iter_mut()) {
                if let Some(value) = value {
                    substitute_value(value, value_args);
                }
            }
        }
        AstTypeKind::Sequence(list) | AstTypeKind::Set(list) => {
            let components = list
                .root
                .iter_mut()
                .filter_map(|e| match e {
                    ComponentEntry::Component(c) => Some(c),
                    ComponentEntry::ComponentsOf(_) => None,
                })
                .chain(list.additions.iter_mut().flat_map(|a| match a {
                    AdditionEntry::Single(c) => std::slice::from_mut(c).iter_mut(),
                    AdditionEntry::Group(cs) => cs.iter_mut(),
                }));
            for component in components {
                if let ast::Presence::Default(value) = &mut component.presence {
                    substitute_value(value, value_args);
                }
            }
        }
        _ => {}
    }
}

fn substitute_in_constraint(
    constraint: &mut AstConstraint,
    value_args: &HashMap<&str, &AstValue>,
) {
    match constraint {
        AstConstraint::SingleValue(value) => substitute_value(value, value_args),
        AstConstraint::ValueRange { lo, hi } => {
            if let RangeEndpoint::Value(value) = lo {
                substitute_value(value, value_args);
            }
            if let RangeEndpoint::Value(value) = hi {
                substitute_value(value, value_args);
            }
        }
        AstConstraint::Size(items)
        | AstConstraint::PermittedAlphabet(items)
        | AstConstraint::Union(items) => {
            for item in items {
                substitute_in_constraint(item, value_args);
            }
        }
        _ => {}
    }
}

fn substitute_value(value: &mut AstValue, value_args: &HashMap<&str, &AstValue>) {
    match value {
        AstValue::Identifier(name) => {
            if let Some(&actual) = value_args.get(name.as_str()) {
                *value = actual.clone();
            }
        }
        AstValue::Braced(items) => {
            for item in items {
                match item {
                    BracedItem::Value(v) | BracedItem::Named(_, v) => {
                        substitute_value(v, value_args)
                    }
                    BracedItem::NamedNumber(_, _) => {}
                }
            }
        }
        AstValue::Choice(_, inner) => substitute_value(inner, value_args),
        _ => {}
    }
}

fn well_known_arc(position: usize, first: Option<&u64>, name: &str) -> Option<u64> {
    match position {
        0 => match name {
            "itu-t" | "ccitt" => Some(0),
            "iso" => Some(1),
            "joint-iso-itu-t" | "joint-iso-ccitt" => Some(2),
            _ => None,
        },
        1 => match (first, name) {
            (Some(0), "recommendation") => Some(0),
            (Some(0), "question") => Some(1),
            (Some(0), "administration") => Some(2),
            (Some(0), "network-operator") => Some(3),
            (Some(0), "identified-organization") => Some(4),
            (Some(1), "standard") => Some(0),
            (Some(1), "registration-authority") => Some(1),
            (Some(1), "member-body") => Some(2),
            (Some(1), "identified-organization") => Some(3),
            _ => None,
        },
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Effective constraint folding
// ----------------------------------------------------------------------

fn apply_constraints(constraints: &[Constraint], effective: &mut Effective) {
    for constraint in constraints {
        apply_constraint(constraint, effective);
    }
}

fn apply_constraint(constraint: &Constraint, effective: &mut Effective) {
    match constraint {
        Constraint::SingleValue(Value::Integer(n)) => {
            intersect_value(effective, Some(n.clone()), Some(n.clone()), false);
        }
        Constraint::ValueRange { lo, hi } => {
            intersect_value(effective, lo.clone(), hi.clone(), false);
        }
        Constraint::Size(items) => {
            if let Some((lb, ub, extensible)) = int_hull(items) {
                intersect_size(effective, lb, ub, extensible);
            }
        }
        Constraint::PermittedAlphabet(items) => {
            let mut alphabet = Vec::new();
            collect_alphabet(items, &mut alphabet);
            alphabet.sort_unstable();
            alphabet.dedup();
            effective.alphabet = Some(match effective.alphabet.take() {
                Some(existing) => existing
                    .into_iter()
                    .filter(|c| alphabet.contains(c))
                    .collect(),
                None => alphabet,
            });
        }
        Constraint::Union(items) => {
            let extensible = items.iter().any(|c| matches!(c, Constraint::Extensible));
            // a union of sizes narrows the size; a union of values narrows
            // the value range; both reduce to the hull of their members
            let size_items: Vec<Constraint> = items
                .iter()
                .filter_map(|c| match c {
                    Constraint::Size(inner) => Some(Constraint::Size(inner.clone())),
                    _ => None,
                })
                .collect();
            for item in &size_items {
                if let Constraint::Size(inner) = item {
                    if let Some((lb, ub, inner_ext)) = int_hull(inner) {
                        intersect_size(effective, lb, ub, inner_ext || extensible);
                    }
                }
            }
            let value_items: Vec<&Constraint> = items
                .iter()
                .filter(|c| {
                    matches!(
                        c,
                        Constraint::SingleValue(Value::Integer(_))
                            | Constraint::ValueRange { .. }
                    )
                })
                .collect();
            if !value_items.is_empty() {
                let mut lo: Option<Option<BigInt>> = None;
                let mut hi: Option<Option<BigInt>> = None;
                for item in value_items {
                    let (item_lo, item_hi) = match item {
                        Constraint::SingleValue(Value::Integer(n)) => {
                            (Some(n.clone()), Some(n.clone()))
                        }
                        Constraint::ValueRange { lo, hi } => (lo.clone(), hi.clone()),
                        _ => continue,
                    };
                    lo = Some(match lo {
                        None => item_lo,
                        Some(None) => None,
                        Some(Some(current)) => match item_lo {
                            None => None,
                            Some(n) => Some(current.min(n)),
                        },
                    });
                    hi = Some(match hi {
                        None => item_hi,
                        Some(None) => None,
                        Some(Some(current)) => match item_hi {
                            None => None,
                            Some(n) => Some(current.max(n)),
                        },
                    });
                }
                intersect_value(
                    effective,
                    lo.unwrap_or(None),
                    hi.unwrap_or(None),
                    extensible,
                );
            } else if extensible && size_items.is_empty() {
                // bare `(..., ...)` style marker on a value constraint
                if let Some(range) = effective.value.as_mut() {
                    range.extensible = true;
                }
            }
        }
        Constraint::Extensible => {
            if let Some(range) = effective.value.as_mut() {
                range.extensible = true;
            }
            if let Some(size) = effective.size.as_mut() {
                size.extensible = true;
            }
        }
        _ => {}
    }
}

fn intersect_value(
    effective: &mut Effective,
    lb: Option<BigInt>,
    ub: Option<BigInt>,
    extensible: bool,
) {
    let current = effective.value.take();
    let merged = match current {
        None => ValueRange { lb, ub, extensible },
        Some(existing) => ValueRange {
            lb: max_bound(existing.lb, lb),
            ub: min_bound(existing.ub, ub),
            extensible: existing.extensible || extensible,
        },
    };
    effective.value = Some(merged);
}

fn intersect_size(effective: &mut Effective, lb: u64, ub: Option<u64>, extensible: bool) {
    let current = effective.size.take();
    let merged = match current {
        None => SizeRange { lb, ub, extensible },
        Some(existing) => SizeRange {
            lb: existing.lb.max(lb),
            ub: match (existing.ub, ub) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            },
            extensible: existing.extensible || extensible,
        },
    };
    effective.size = Some(merged);
}

fn max_bound(a: Option<BigInt>, b: Option<BigInt>) -> Option<BigInt> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn min_bound(a: Option<BigInt>, b: Option<BigInt>) -> Option<BigInt> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

/// Hull of the integer values admitted by the given constraint items:
/// `(lb, ub, extensible)` with sizes clamped at zero.
fn int_hull(items: &[Constraint]) -> Option<(u64, Option<u64>, bool)> {
    let mut lb: Option<u64> = None;
    let mut ub: Option<Option<u64>> = None;
    let mut extensible = false;
    for item in items {
        match item {
            Constraint::Extensible => extensible = true,
            Constraint::SingleValue(Value::Integer(n)) => {
                let n = n.max(&BigInt::from(0)).to_u64()?;
                lb = Some(lb.map_or(n, |current| current.min(n)));
                ub = Some(match ub {
                    None => Some(n),
                    Some(None) => None,
                    Some(Some(current)) => Some(current.max(n)),
                });
            }
            Constraint::ValueRange { lo, hi } => {
                let item_lb = match lo {
                    Some(n) if n.is_negative() => 0,
                    Some(n) => n.to_u64()?,
                    None => 0,
                };
                lb = Some(lb.map_or(item_lb, |current| current.min(item_lb)));
                let item_ub = match hi {
                    Some(n) => Some(n.to_u64()?),
                    None => None,
                };
                ub = Some(match (ub, item_ub) {
                    (None, item) => item,
                    (Some(None), _) | (_, None) => None,
                    (Some(Some(current)), Some(item)) => Some(current.max(item)),
                });
            }
            Constraint::Union(inner) => {
                if let Some((inner_lb, inner_ub, inner_ext)) = int_hull(inner) {
                    extensible |= inner_ext;
                    lb = Some(lb.map_or(inner_lb, |current| current.min(inner_lb)));
                    ub = Some(match (ub, inner_ub) {
                        (None, item) => item,
                        (Some(None), _) | (_, None) => None,
                        (Some(Some(current)), Some(item)) => Some(current.max(item)),
                    });
                }
            }
            _ => {}
        }
    }
    lb.map(|lb| (lb, ub.unwrap_or(None), extensible))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_string;

    fn compile_text(text: &str) -> TypeGraph {
        compile_modules(parse_string("test.asn", text).unwrap()).unwrap()
    }

    #[test]
    fn test_simple_graph() {
        let graph = compile_text("M DEFINITIONS ::= BEGIN X ::= BOOLEAN END");
        let id = graph.lookup("X").unwrap();
        assert_eq!(graph.node(id).kind, TypeKind::Boolean);
        assert_eq!(
            graph.node(id).ber.identity,
            Some(RawTag::universal(1))
        );
    }

    #[test]
    fn test_effective_value_range() {
        let graph = compile_text("M DEFINITIONS ::= BEGIN X ::= INTEGER (0..7) END");
        let id = graph.lookup("X").unwrap();
        let range = graph.node(id).effective.value.as_ref().unwrap();
        assert_eq!(range.lb, Some(BigInt::from(0)));
        assert_eq!(range.ub, Some(BigInt::from(7)));
        assert!(!range.extensible);
    }

    #[test]
    fn test_extensible_value_range() {
        let graph = compile_text("M DEFINITIONS ::= BEGIN X ::= INTEGER (0..7, ...) END");
        let id = graph.lookup("X").unwrap();
        let range = graph.node(id).effective.value.as_ref().unwrap();
        assert!(range.extensible);
    }

    #[test]
    fn test_constraint_through_reference() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             Y ::= INTEGER (0..255) \
             X ::= Y (0..7) \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let range = graph.node(id).effective.value.as_ref().unwrap();
        assert_eq!(range.lb, Some(BigInt::from(0)));
        assert_eq!(range.ub, Some(BigInt::from(7)));
    }

    #[test]
    fn test_size_constraint() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN X ::= OCTET STRING (SIZE (2..8)) END",
        );
        let id = graph.lookup("X").unwrap();
        let size = graph.node(id).effective.size.as_ref().unwrap();
        assert_eq!(size.lb, 2);
        assert_eq!(size.ub, Some(8));
    }

    #[test]
    fn test_recursive_type() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             A ::= SEQUENCE { next A OPTIONAL } \
             END",
        );
        let id = graph.lookup("A").unwrap();
        let TypeKind::Sequence(record) = &graph.node(id).kind else {
            panic!();
        };
        assert_eq!(graph.resolve(record.root[0].ty), id);
    }

    #[test]
    fn test_definition_cycle_rejected() {
        let modules = parse_string(
            "test.asn",
            "M DEFINITIONS ::= BEGIN A ::= B B ::= A END",
        )
        .unwrap();
        assert!(compile_modules(modules).is_err());
    }

    #[test]
    fn test_undefined_reference() {
        let modules =
            parse_string("test.asn", "M DEFINITIONS ::= BEGIN A ::= Missing END").unwrap();
        let err = compile_modules(modules).unwrap_err();
        assert!(err.to_string().contains("Missing"));
    }

    #[test]
    fn test_explicit_tag_plan() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN X ::= [5] EXPLICIT INTEGER END",
        );
        let id = graph.lookup("X").unwrap();
        let plan = &graph.node(id).ber;
        assert_eq!(plan.wraps.len(), 1);
        assert_eq!(plan.wraps[0].number, 5);
        assert_eq!(plan.identity, Some(RawTag::universal(2)));
    }

    #[test]
    fn test_implicit_tag_plan() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN X ::= [5] IMPLICIT INTEGER END",
        );
        let id = graph.lookup("X").unwrap();
        let plan = &graph.node(id).ber;
        assert!(plan.wraps.is_empty());
        assert_eq!(
            plan.identity,
            Some(RawTag::new(TagClass::ContextSpecific, 5))
        );
    }

    #[test]
    fn test_implicit_tag_on_choice_wraps() {
        let graph = compile_text(
            "M DEFINITIONS IMPLICIT TAGS ::= BEGIN \
             X ::= [5] CHOICE { a INTEGER, b BOOLEAN } \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let plan = &graph.node(id).ber;
        assert_eq!(plan.wraps.len(), 1);
        assert_eq!(plan.identity, None);
    }

    #[test]
    fn test_default_value_evaluated() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { a INTEGER DEFAULT 7, b E DEFAULT red } \
             E ::= ENUMERATED { red(0), green(1) } \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let TypeKind::Sequence(record) = &graph.node(id).kind else {
            panic!();
        };
        assert_eq!(
            record.root[0].presence,
            Presence::Default(Value::integer(7))
        );
        assert_eq!(
            record.root[1].presence,
            Presence::Default(Value::text("red"))
        );
    }

    #[test]
    fn test_duplicate_choice_tags_rejected() {
        let modules = parse_string(
            "test.asn",
            "M DEFINITIONS ::= BEGIN \
             X ::= CHOICE { a INTEGER, b INTEGER } \
             END",
        )
        .unwrap();
        assert!(compile_modules(modules).is_err());
    }

    #[test]
    fn test_parameterized_instantiation() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             Wrapper { Inner } ::= SEQUENCE { body Inner } \
             X ::= Wrapper { INTEGER } \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let resolved = graph.resolve(id);
        let TypeKind::Sequence(record) = &graph.node(resolved).kind else {
            panic!("expected instantiated SEQUENCE");
        };
        assert!(matches!(
            graph.node(graph.resolve(record.root[0].ty)).kind,
            TypeKind::Integer { .. }
        ));
    }

    #[test]
    fn test_enumerated_values_assigned() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             E ::= ENUMERATED { a, b(5), c } \
             END",
        );
        let id = graph.lookup("E").unwrap();
        let TypeKind::Enumerated { root, .. } = &graph.node(id).kind else {
            panic!();
        };
        assert_eq!(root[0], ("a".to_string(), 0));
        assert_eq!(root[1], ("b".to_string(), 5));
        assert_eq!(root[2], ("c".to_string(), 1));
    }

    #[test]
    fn test_class_field_reference_is_open_type() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             ATTRIBUTE ::= CLASS { &id OBJECT IDENTIFIER UNIQUE, &Type } \
             X ::= SEQUENCE { id ATTRIBUTE.&id, value ATTRIBUTE.&Type } \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let TypeKind::Sequence(record) = &graph.node(id).kind else {
            panic!();
        };
        assert!(matches!(
            graph.node(graph.resolve(record.root[0].ty)).kind,
            TypeKind::ObjectIdentifier
        ));
        assert!(matches!(
            graph.node(graph.resolve(record.root[1].ty)).kind,
            TypeKind::Any
        ));
    }

    #[test]
    fn test_oid_value_assignment() {
        let graph = compile_text(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { oid OBJECT IDENTIFIER DEFAULT { iso member-body 840 } } \
             END",
        );
        let id = graph.lookup("X").unwrap();
        let TypeKind::Sequence(record) = &graph.node(id).kind else {
            panic!();
        };
        assert_eq!(
            record.root[0].presence,
            Presence::Default(Value::text("1.2.840"))
        );
    }
}
