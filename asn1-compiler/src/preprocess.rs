//! Pre-processor: from parsed modules to a normalized, single-namespace
//! universe of type assignments
//!
//! Steps, in order: import resolution, `COMPONENTS OF` splicing, tag-mode
//! normalization, AUTOMATIC tag assignment, EXTENSIBILITY IMPLIED marking.
//! Class/object-set flattening and DEFAULT evaluation need resolved types
//! and happen during lowering. Every step is idempotent.
//!
//! `COMPONENTS OF` is expanded before tags are assigned, so spliced
//! components participate in AUTOMATIC numbering exactly as if they had
//! been written in place.

use crate::ast::*;
use asn1_core::{Asn1Error, Asn1Result};
use log::warn;
use num_bigint::BigInt;
use std::collections::{HashMap, HashSet};

/// All modules flattened into one namespace, ready for lowering.
#[derive(Debug, Default)]
pub struct Universe {
    pub types: HashMap<String, TypeAssignment>,
    /// Declaration order of non-parameterized type assignments
    pub order: Vec<String>,
    pub templates: HashMap<String, TypeAssignment>,
    pub values: HashMap<String, ValueAssignment>,
    pub classes: HashMap<String, ClassAssignment>,
}

pub fn preprocess(modules: Vec<Module>) -> Asn1Result<Universe> {
    resolve_imports(&modules)?;

    let mut universe = Universe::default();
    let mut tag_defaults: HashMap<String, TagDefault> = HashMap::new();

    for module in &modules {
        for assignment in &module.assignments {
            match assignment {
                Assignment::Type(assignment) => {
                    let mut assignment = assignment.clone();
                    if module.extensibility_implied {
                        walk_type_mut(&mut assignment.ty, &mut imply_extensibility);
                    }
                    let implicit_default =
                        !matches!(module.tag_default, TagDefault::Explicit);
                    walk_type_mut(&mut assignment.ty, &mut |ty| {
                        normalize_tag_modes(ty, implicit_default)
                    });
                    let is_template = !assignment.parameters.is_empty();
                    let target = if is_template {
                        &mut universe.templates
                    } else {
                        &mut universe.types
                    };
                    if target.contains_key(&assignment.name) {
                        warn!("duplicate type definition '{}' ignored", assignment.name);
                    } else {
                        if !is_template {
                            universe.order.push(assignment.name.clone());
                        }
                        tag_defaults.insert(assignment.name.clone(), module.tag_default);
                        target.insert(assignment.name.clone(), assignment);
                    }
                }
                Assignment::Value(assignment) => {
                    universe
                        .values
                        .entry(assignment.name.clone())
                        .or_insert_with(|| assignment.clone());
                }
                Assignment::Class(assignment) => {
                    universe
                        .classes
                        .entry(assignment.name.clone())
                        .or_insert_with(|| assignment.clone());
                }
                Assignment::ObjectSet(_) => {
                    // object sets only matter through table constraints,
                    // which flatten to open types
                }
            }
        }
    }

    splice_components_of(&mut universe)?;
    apply_automatic_tags(&mut universe, &tag_defaults)?;

    Ok(universe)
}

// ----------------------------------------------------------------------
// Imports
// ----------------------------------------------------------------------

fn resolve_imports(modules: &[Module]) -> Asn1Result<()> {
    let by_name: HashMap<&str, &Module> =
        modules.iter().map(|m| (m.name.as_str(), m)).collect();

    for module in modules {
        for import in &module.imports {
            for symbol in &import.symbols {
                let mut visited = HashSet::new();
                let mut current = import.from_module.as_str();
                loop {
                    if !visited.insert(current.to_string()) {
                        return Err(Asn1Error::compile(format!(
                            "circular import of '{}' via module '{}'",
                            symbol, current
                        )));
                    }
                    let Some(target) = by_name.get(current) else {
                        return Err(Asn1Error::compile(format!(
                            "'{}' imports '{}' from unknown module '{}'",
                            module.name, symbol, current
                        )));
                    };
                    if defines_symbol(target, symbol) {
                        break;
                    }
                    // the target may re-import the symbol from elsewhere
                    match target
                        .imports
                        .iter()
                        .find(|i| i.symbols.iter().any(|s| s == symbol))
                    {
                        Some(next) => current = next.from_module.as_str(),
                        None => {
                            return Err(Asn1Error::compile(format!(
                                "'{}' imports undefined symbol '{}' from '{}'",
                                module.name, symbol, import.from_module
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn defines_symbol(module: &Module, symbol: &str) -> bool {
    module.assignments.iter().any(|a| match a {
        Assignment::Type(t) => t.name == symbol,
        Assignment::Value(v) => v.name == symbol,
        Assignment::Class(c) => c.name == symbol,
        Assignment::ObjectSet(o) => o.name == symbol,
    })
}

// ----------------------------------------------------------------------
// AST walking
// ----------------------------------------------------------------------

/// Apply `f` to `ty` and every nested type, pre-order.
pub fn walk_type_mut(ty: &mut AstType, f: &mut impl FnMut(&mut AstType)) {
    f(ty);
    match &mut ty.kind {
        AstTypeKind::Sequence(list) | AstTypeKind::Set(list) => {
            for entry in &mut list.root {
                match entry {
                    ComponentEntry::Component(c) => walk_type_mut(&mut c.ty, f),
                    ComponentEntry::ComponentsOf(t) => walk_type_mut(t, f),
                }
            }
            for addition in &mut list.additions {
                match addition {
                    AdditionEntry::Single(c) => walk_type_mut(&mut c.ty, f),
                    AdditionEntry::Group(cs) => {
                        for c in cs {
                            walk_type_mut(&mut c.ty, f);
                        }
                    }
                }
            }
        }
        AstTypeKind::SequenceOf(element) | AstTypeKind::SetOf(element) => {
            walk_type_mut(element, f);
        }
        AstTypeKind::Choice {
            root, additions, ..
        } => {
            for alt in root.iter_mut().chain(additions.iter_mut()) {
                walk_type_mut(&mut alt.ty, f);
            }
        }
        AstTypeKind::Reference { arguments, .. } => {
            for argument in arguments {
                if let AstArgument::Type(t) = argument {
                    walk_type_mut(t, f);
                }
            }
        }
        _ => {}
    }
}

fn imply_extensibility(ty: &mut AstType) {
    match &mut ty.kind {
        AstTypeKind::Sequence(list) | AstTypeKind::Set(list) => list.extensible = true,
        AstTypeKind::Choice { extensible, .. } => *extensible = true,
        AstTypeKind::Enumerated { extensible, .. } => *extensible = true,
        _ => {}
    }
}

fn normalize_tag_modes(ty: &mut AstType, implicit_default: bool) {
    for tag in &mut ty.tags {
        if tag.mode.is_none() {
            tag.mode = Some(if implicit_default {
                TagMode::Implicit
            } else {
                TagMode::Explicit
            });
        }
    }
}

// ----------------------------------------------------------------------
// COMPONENTS OF
// ----------------------------------------------------------------------

/// Replace `COMPONENTS OF X` entries with the root components of `X`.
/// Runs to a fixpoint so chains resolve; lack of progress means a cycle.
fn splice_components_of(universe: &mut Universe) -> Asn1Result<()> {
    for _ in 0..32 {
        let snapshot: HashMap<String, AstType> = universe
            .types
            .iter()
            .map(|(name, a)| (name.clone(), a.ty.clone()))
            .collect();

        let mut remaining = false;
        let mut progressed = false;

        let names: Vec<String> = universe
            .types
            .keys()
            .chain(universe.templates.keys())
            .cloned()
            .collect();
        for name in names {
            let assignment = universe
                .types
                .get_mut(&name)
                .or_else(|| universe.templates.get_mut(&name));
            let Some(assignment) = assignment else {
                continue;
            };
            walk_type_mut(&mut assignment.ty, &mut |ty| {
                if let AstTypeKind::Sequence(list) | AstTypeKind::Set(list) = &mut ty.kind {
                    let mut new_root = Vec::with_capacity(list.root.len());
                    for entry in list.root.drain(..) {
                        match entry {
                            ComponentEntry::ComponentsOf(target) => {
                                match components_root(&target, &snapshot) {
                                    Some(components) => {
                                        progressed = true;
                                        new_root.extend(
                                            components
                                                .into_iter()
                                                .map(ComponentEntry::Component),
                                        );
                                    }
                                    None => {
                                        remaining = true;
                                        new_root
                                            .push(ComponentEntry::ComponentsOf(target));
                                    }
                                }
                            }
                            entry => new_root.push(entry),
                        }
                    }
                    list.root = new_root;
                }
            });
        }

        if !remaining {
            return Ok(());
        }
        if !progressed {
            return Err(Asn1Error::compile(
                "unresolvable COMPONENTS OF (undefined type or inclusion cycle)",
            ));
        }
    }
    Err(Asn1Error::compile("COMPONENTS OF nesting too deep"))
}

/// Root components of the target type, if it is already free of
/// `COMPONENTS OF` entries itself.
fn components_root(
    target: &AstType,
    types: &HashMap<String, AstType>,
) -> Option<Vec<Component>> {
    let mut current = target.clone();
    for _ in 0..32 {
        match current.kind {
            AstTypeKind::Sequence(ref list) | AstTypeKind::Set(ref list) => {
                let mut components = Vec::with_capacity(list.root.len());
                for entry in &list.root {
                    match entry {
                        ComponentEntry::Component(c) => components.push(c.clone()),
                        ComponentEntry::ComponentsOf(_) => return None,
                    }
                }
                return Some(components);
            }
            AstTypeKind::Reference { ref name, .. } => {
                current = types.get(name)?.clone();
            }
            _ => return None,
        }
    }
    None
}

// ----------------------------------------------------------------------
// AUTOMATIC tags
// ----------------------------------------------------------------------

fn apply_automatic_tags(
    universe: &mut Universe,
    tag_defaults: &HashMap<String, TagDefault>,
) -> Asn1Result<()> {
    // resolver snapshot for deciding IMPLICIT vs EXPLICIT per component
    let type_kinds: HashMap<String, AstType> = universe
        .types
        .iter()
        .chain(universe.templates.iter())
        .map(|(name, a)| (name.clone(), a.ty.clone()))
        .collect();
    let classes = universe.classes.clone();

    let names: Vec<String> = universe
        .types
        .keys()
        .chain(universe.templates.keys())
        .cloned()
        .collect();
    for name in names {
        if tag_defaults.get(&name) != Some(&TagDefault::Automatic) {
            continue;
        }
        let assignment = universe
            .types
            .get_mut(&name)
            .or_else(|| universe.templates.get_mut(&name));
        let Some(assignment) = assignment else {
            continue;
        };
        walk_type_mut(&mut assignment.ty, &mut |ty| {
            auto_tag_type(ty, &type_kinds, &classes)
        });
    }
    Ok(())
}

fn auto_tag_type(
    ty: &mut AstType,
    types: &HashMap<String, AstType>,
    classes: &HashMap<String, ClassAssignment>,
) {
    match &mut ty.kind {
        AstTypeKind::Sequence(list) | AstTypeKind::Set(list) => {
            let any_tagged = list
                .root
                .iter()
                .filter_map(|e| match e {
                    ComponentEntry::Component(c) => Some(c),
                    ComponentEntry::ComponentsOf(_) => None,
                })
                .any(|c| !c.ty.tags.is_empty())
                || list
                    .additions
                    .iter()
                    .flat_map(|a| match a {
                        AdditionEntry::Single(c) => std::slice::from_ref(c).iter(),
                        AdditionEntry::Group(cs) => cs.iter(),
                    })
                    .any(|c| !c.ty.tags.is_empty());
            if any_tagged {
                return;
            }
            let mut number = 0u32;
            for entry in &mut list.root {
                if let ComponentEntry::Component(c) = entry {
                    assign_tag(&mut c.ty, &mut number, types, classes);
                }
            }
            for addition in &mut list.additions {
                match addition {
                    AdditionEntry::Single(c) => {
                        assign_tag(&mut c.ty, &mut number, types, classes)
                    }
                    AdditionEntry::Group(cs) => {
                        for c in cs {
                            assign_tag(&mut c.ty, &mut number, types, classes);
                        }
                    }
                }
            }
        }
        AstTypeKind::Choice {
            root, additions, ..
        } => {
            let any_tagged = root
                .iter()
                .chain(additions.iter())
                .any(|alt| !alt.ty.tags.is_empty());
            if any_tagged {
                return;
            }
            let mut number = 0u32;
            for alt in root.iter_mut().chain(additions.iter_mut()) {
                assign_tag(&mut alt.ty, &mut number, types, classes);
            }
        }
        _ => {}
    }
}

fn assign_tag(
    ty: &mut AstType,
    number: &mut u32,
    types: &HashMap<String, AstType>,
    classes: &HashMap<String, ClassAssignment>,
) {
    let mode = if is_untagged_open(ty, types, classes, 0) {
        TagMode::Explicit
    } else {
        TagMode::Implicit
    };
    ty.tags.push(AstTag {
        class: TagClass::ContextSpecific,
        number: AstValue::Number(BigInt::from(*number)),
        mode: Some(mode),
    });
    *number += 1;
}

/// Does this type resolve to an untagged CHOICE or open type? Those must be
/// tagged EXPLICIT under AUTOMATIC tagging because they have no identity
/// tag an IMPLICIT tag could replace.
fn is_untagged_open(
    ty: &AstType,
    types: &HashMap<String, AstType>,
    classes: &HashMap<String, ClassAssignment>,
    depth: usize,
) -> bool {
    if depth > 32 || !ty.tags.is_empty() {
        return false;
    }
    match &ty.kind {
        AstTypeKind::Choice { .. } | AstTypeKind::Any { .. } => true,
        AstTypeKind::FieldReference { class, field } => {
            match classes.get(class).and_then(|c| {
                c.fields.iter().find(|f| match f {
                    ClassField::TypeField { name } => name == field,
                    ClassField::ValueField { name, .. } => name == field,
                })
            }) {
                Some(ClassField::TypeField { .. }) => true,
                Some(ClassField::ValueField { ty, .. }) => {
                    is_untagged_open(ty, types, classes, depth + 1)
                }
                // unresolvable: EXPLICIT is safe either way
                None => true,
            }
        }
        AstTypeKind::Reference { name, .. } => match types.get(name) {
            Some(target) => is_untagged_open(target, types, classes, depth + 1),
            None => true,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_string;

    fn preprocess_text(text: &str) -> Universe {
        preprocess(parse_string("test.asn", text).unwrap()).unwrap()
    }

    #[test]
    fn test_missing_import_fails() {
        let modules = parse_string(
            "test.asn",
            "M DEFINITIONS ::= BEGIN IMPORTS X FROM Other; Y ::= X END",
        )
        .unwrap();
        let err = preprocess(modules).unwrap_err();
        assert!(err.to_string().contains("unknown module"));
    }

    #[test]
    fn test_import_across_modules() {
        let universe = preprocess_text(
            "A DEFINITIONS ::= BEGIN IMPORTS X FROM B; Y ::= X END \
             B DEFINITIONS ::= BEGIN X ::= INTEGER END",
        );
        assert!(universe.types.contains_key("X"));
        assert!(universe.types.contains_key("Y"));
    }

    #[test]
    fn test_components_of_splicing() {
        let universe = preprocess_text(
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { COMPONENTS OF Y, c BOOLEAN } \
             Y ::= SEQUENCE { a INTEGER, b INTEGER } \
             END",
        );
        let AstTypeKind::Sequence(list) = &universe.types["X"].ty.kind else {
            panic!();
        };
        assert_eq!(list.root.len(), 3);
        let ComponentEntry::Component(first) = &list.root[0] else {
            panic!();
        };
        assert_eq!(first.name, "a");
    }

    #[test]
    fn test_components_of_cycle_fails() {
        let modules = parse_string(
            "test.asn",
            "M DEFINITIONS ::= BEGIN \
             X ::= SEQUENCE { COMPONENTS OF Y } \
             Y ::= SEQUENCE { COMPONENTS OF X } \
             END",
        )
        .unwrap();
        assert!(preprocess(modules).is_err());
    }

    #[test]
    fn test_automatic_tags_assigned() {
        let universe = preprocess_text(
            "M DEFINITIONS AUTOMATIC TAGS ::= BEGIN \
             X ::= SEQUENCE { a INTEGER, b CHOICE { x INTEGER, y BOOLEAN }, c BOOLEAN } \
             END",
        );
        let AstTypeKind::Sequence(list) = &universe.types["X"].ty.kind else {
            panic!();
        };
        let components: Vec<&Component> = list
            .root
            .iter()
            .map(|e| match e {
                ComponentEntry::Component(c) => c,
                _ => panic!(),
            })
            .collect();
        assert_eq!(components[0].ty.tags[0].mode, Some(TagMode::Implicit));
        // CHOICE gets an EXPLICIT automatic tag
        assert_eq!(components[1].ty.tags[0].mode, Some(TagMode::Explicit));
        assert_eq!(
            components[2].ty.tags[0].number,
            AstValue::Number(BigInt::from(2))
        );
    }

    #[test]
    fn test_automatic_tags_skip_user_tagged_lists() {
        let universe = preprocess_text(
            "M DEFINITIONS AUTOMATIC TAGS ::= BEGIN \
             X ::= SEQUENCE { a [5] INTEGER, b BOOLEAN } \
             END",
        );
        let AstTypeKind::Sequence(list) = &universe.types["X"].ty.kind else {
            panic!();
        };
        let ComponentEntry::Component(b) = &list.root[1] else {
            panic!();
        };
        assert!(b.ty.tags.is_empty());
    }

    #[test]
    fn test_extensibility_implied() {
        let universe = preprocess_text(
            "M DEFINITIONS EXTENSIBILITY IMPLIED ::= BEGIN \
             X ::= SEQUENCE { a INTEGER } \
             END",
        );
        let AstTypeKind::Sequence(list) = &universe.types["X"].ty.kind else {
            panic!();
        };
        assert!(list.extensible);
    }
}
