//! Abstract type model: type nodes, fields, records, and the frozen schema.
//!
//! Design goals:
//! - Library-agnostic: any concrete schema source (hand-written JSON documents,
//!   another tool's output) is adapted into `Record`/`TypeNode` at the boundary.
//! - Write-once: records are defined during a single build phase, then the
//!   whole model is frozen; emitters and decoders only ever see `&Schema`.
//! - Deterministic: insertion order of records and fields is preserved and is
//!   the order everything downstream observes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

// ------------------------------- Type nodes ------------------------------- //

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Prim {
    String,
    Number,
    Boolean,
    /// File-like blob; passes through decoding unconverted.
    Binary,
    Null,
    Any,
}

/// One type occurrence in the schema. Records are referenced by name, never
/// inlined, so self-reference terminates trivially.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TypeNode {
    Prim { prim: Prim },
    /// Reference to a named record, resolved by lookup.
    Ref { name: String },
    /// Occurrence of a generic type parameter inside a generic record body.
    Var { name: String },
    List { item: Box<TypeNode> },
    Tuple { items: Vec<TypeNode> },
    /// Members tried in declaration order; no discriminant.
    Union { members: Vec<TypeNode> },
    /// Generic record reference with concrete bindings, e.g. `Box<number>`.
    Generic { base: String, args: Vec<TypeNode> },
}

impl TypeNode {
    pub fn string() -> Self { TypeNode::Prim { prim: Prim::String } }
    pub fn number() -> Self { TypeNode::Prim { prim: Prim::Number } }
    pub fn boolean() -> Self { TypeNode::Prim { prim: Prim::Boolean } }
    pub fn binary() -> Self { TypeNode::Prim { prim: Prim::Binary } }
    pub fn null() -> Self { TypeNode::Prim { prim: Prim::Null } }
    pub fn any() -> Self { TypeNode::Prim { prim: Prim::Any } }

    pub fn reference(name: impl Into<String>) -> Self {
        TypeNode::Ref { name: name.into() }
    }
    pub fn var(name: impl Into<String>) -> Self {
        TypeNode::Var { name: name.into() }
    }
    pub fn list(item: TypeNode) -> Self {
        TypeNode::List { item: Box::new(item) }
    }
    pub fn tuple(items: Vec<TypeNode>) -> Self {
        TypeNode::Tuple { items }
    }
    pub fn union(members: Vec<TypeNode>) -> Self {
        TypeNode::Union { members }
    }
    pub fn generic(base: impl Into<String>, args: Vec<TypeNode>) -> Self {
        TypeNode::Generic { base: base.into(), args }
    }

    /// `T | null` shorthand, still rendered as an explicit union.
    pub fn nullable(inner: TypeNode) -> Self {
        TypeNode::union(vec![inner, TypeNode::null()])
    }

    /// Does this type admit a null value without looking through refs?
    pub fn admits_null(&self) -> bool {
        match self {
            TypeNode::Prim { prim: Prim::Null } | TypeNode::Prim { prim: Prim::Any } => true,
            TypeNode::Union { members } => members.iter().any(TypeNode::admits_null),
            _ => false,
        }
    }

    /// Visit every record name referenced from this node (refs and generic bases).
    pub fn walk_refs(&self, f: &mut impl FnMut(&str)) {
        match self {
            TypeNode::Prim { .. } | TypeNode::Var { .. } => {}
            TypeNode::Ref { name } => f(name),
            TypeNode::List { item } => item.walk_refs(f),
            TypeNode::Tuple { items } => {
                for t in items { t.walk_refs(f); }
            }
            TypeNode::Union { members } => {
                for t in members { t.walk_refs(f); }
            }
            TypeNode::Generic { base, args } => {
                f(base);
                for t in args { t.walk_refs(f); }
            }
        }
    }

    /// Replace type-parameter occurrences by their bindings. Unbound vars are
    /// left in place; the caller decides how to treat them.
    pub fn substitute(&self, bindings: &IndexMap<String, TypeNode>) -> TypeNode {
        match self {
            TypeNode::Var { name } => match bindings.get(name) {
                Some(t) => t.clone(),
                None => self.clone(),
            },
            TypeNode::Prim { .. } | TypeNode::Ref { .. } => self.clone(),
            TypeNode::List { item } => TypeNode::list(item.substitute(bindings)),
            TypeNode::Tuple { items } => {
                TypeNode::tuple(items.iter().map(|t| t.substitute(bindings)).collect())
            }
            TypeNode::Union { members } => {
                TypeNode::union(members.iter().map(|t| t.substitute(bindings)).collect())
            }
            TypeNode::Generic { base, args } => TypeNode::generic(
                base.clone(),
                args.iter().map(|t| t.substitute(bindings)).collect(),
            ),
        }
    }
}

// ------------------------------ Fields/records ---------------------------- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
    #[serde(default)]
    pub optional: bool,
    /// Serialized default literal. Only legal on optional fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl Field {
    pub fn required(name: impl Into<String>, ty: TypeNode) -> Self {
        Field { name: name.into(), ty, optional: false, default: None }
    }

    pub fn optional(
        name: impl Into<String>,
        ty: TypeNode,
        default: Option<serde_json::Value>,
    ) -> Self {
        Field { name: name.into(), ty, optional: true, default }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeParam {
    pub name: String,
    /// Default binding for an unbound parameter, e.g. `T = number | string`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<TypeNode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TypeParam>,
}

impl Record {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Record { name: name.into(), fields, params: Vec::new() }
    }

    pub fn with_params(mut self, params: Vec<TypeParam>) -> Self {
        self.params = params;
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.params.is_empty()
    }
}

// -------------------------------- Errors ---------------------------------- //

/// Schema-build-time errors: fatal, caught at startup/generation, never
/// deferred to a live request.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown record `{0}`")]
    UnknownRecord(String),

    #[error("conflicting definitions for record `{0}`")]
    RecordConflict(String),

    #[error("duplicate field `{field}` in record `{record}`")]
    DuplicateField { record: String, field: String },

    #[error("field `{field}` of record `{record}` has a default but is not optional")]
    DefaultOnRequired { record: String, field: String },

    #[error("`{base}` takes at most {expect} type argument(s), got {got}")]
    GenericArity { base: String, expect: usize, got: usize },

    #[error("malformed url rule `{rule}`: {reason}")]
    MalformedRule { rule: String, reason: String },

    #[error("endpoint `{namespace}.{name}` registered twice")]
    DuplicateEndpoint { namespace: String, name: String },

    #[error("no endpoint `{namespace}.{name}` is registered")]
    UnknownEndpoint { namespace: String, name: String },

    #[error(
        "optional parameter `{field}` of `{owner}` needs a default or a null-admitting type"
    )]
    NonNullableOptional { owner: String, field: String },
}

// ------------------------------- Builder ---------------------------------- //

/// Accumulates record definitions during the single-threaded build phase.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    records: IndexMap<String, Record>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write-once definition. Redefining a name with an identical shape is a
    /// no-op; a structurally different shape is a conflict, never a silent pick.
    pub fn define_record(&mut self, record: Record) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for f in &record.fields {
            if !seen.insert(f.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    record: record.name.clone(),
                    field: f.name.clone(),
                });
            }
            if !f.optional && f.default.is_some() {
                return Err(SchemaError::DefaultOnRequired {
                    record: record.name.clone(),
                    field: f.name.clone(),
                });
            }
        }
        match self.records.get(&record.name) {
            None => {
                self.records.insert(record.name.clone(), record);
                Ok(())
            }
            Some(existing) if *existing == record => Ok(()),
            Some(_) => Err(SchemaError::RecordConflict(record.name.clone())),
        }
    }

    /// Validate cross-references and produce the immutable schema.
    pub fn freeze(self) -> Result<Schema, SchemaError> {
        for record in self.records.values() {
            for field in &record.fields {
                self.check_node(&field.ty)?;
            }
            for param in &record.params {
                if let Some(def) = &param.default {
                    self.check_node(def)?;
                }
            }
        }
        Ok(Schema { records: self.records })
    }

    fn check_node(&self, ty: &TypeNode) -> Result<(), SchemaError> {
        let mut missing: Option<String> = None;
        ty.walk_refs(&mut |name| {
            if missing.is_none() && !self.records.contains_key(name) {
                missing = Some(name.to_string());
            }
        });
        if let Some(name) = missing {
            return Err(SchemaError::UnknownRecord(name));
        }
        // generic arity against the definition
        if let TypeNode::Generic { base, args } = ty {
            let record = &self.records[base.as_str()];
            if args.len() > record.params.len() {
                return Err(SchemaError::GenericArity {
                    base: base.clone(),
                    expect: record.params.len(),
                    got: args.len(),
                });
            }
        }
        match ty {
            TypeNode::List { item } => self.check_node(item)?,
            TypeNode::Tuple { items } => {
                for t in items { self.check_node(t)?; }
            }
            TypeNode::Union { members } => {
                for t in members { self.check_node(t)?; }
            }
            TypeNode::Generic { args, .. } => {
                for t in args { self.check_node(t)?; }
            }
            _ => {}
        }
        Ok(())
    }
}

// -------------------------------- Schema ---------------------------------- //

/// Frozen record definitions. Read-only and `Send + Sync`; every emitter run
/// and every request-time decode is a pure function over `&Schema`.
#[derive(Clone, Debug)]
pub struct Schema {
    records: IndexMap<String, Record>,
}

impl Schema {
    pub fn resolve(&self, name: &str) -> Result<&Record, SchemaError> {
        self.records
            .get(name)
            .ok_or_else(|| SchemaError::UnknownRecord(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Record {
        Record::new("Point", vec![
            Field::required("x", TypeNode::number()),
            Field::required("y", TypeNode::number()),
        ])
    }

    #[test]
    fn identical_redefinition_is_a_noop() {
        let mut b = SchemaBuilder::new();
        b.define_record(point()).unwrap();
        b.define_record(point()).unwrap();
        let schema = b.freeze().unwrap();
        assert_eq!(schema.records().count(), 1);
    }

    #[test]
    fn conflicting_redefinition_fails() {
        let mut b = SchemaBuilder::new();
        b.define_record(point()).unwrap();
        let other = Record::new("Point", vec![Field::required("x", TypeNode::string())]);
        let err = b.define_record(other).unwrap_err();
        assert!(matches!(err, SchemaError::RecordConflict(name) if name == "Point"));
    }

    #[test]
    fn freeze_rejects_dangling_refs() {
        let mut b = SchemaBuilder::new();
        b.define_record(Record::new("Holder", vec![
            Field::required("inner", TypeNode::reference("Nowhere")),
        ]))
        .unwrap();
        let err = b.freeze().unwrap_err();
        assert!(matches!(err, SchemaError::UnknownRecord(name) if name == "Nowhere"));
    }

    #[test]
    fn default_on_required_field_is_rejected() {
        let mut b = SchemaBuilder::new();
        let bad = Record::new("Bad", vec![Field {
            name: "x".into(),
            ty: TypeNode::number(),
            optional: false,
            default: Some(serde_json::json!(1)),
        }]);
        assert!(matches!(
            b.define_record(bad),
            Err(SchemaError::DefaultOnRequired { .. })
        ));
    }

    #[test]
    fn generic_arity_checked_at_freeze() {
        let mut b = SchemaBuilder::new();
        b.define_record(
            Record::new("Box", vec![Field::required("value", TypeNode::var("T"))])
                .with_params(vec![TypeParam { name: "T".into(), default: None }]),
        )
        .unwrap();
        b.define_record(Record::new("Holder", vec![Field::required(
            "b",
            TypeNode::generic("Box", vec![TypeNode::number(), TypeNode::string()]),
        )]))
        .unwrap();
        assert!(matches!(b.freeze(), Err(SchemaError::GenericArity { .. })));
    }

    #[test]
    fn self_reference_freezes() {
        let mut b = SchemaBuilder::new();
        b.define_record(Record::new("LinkedList", vec![
            Field::required("val", TypeNode::number()),
            Field::optional(
                "next",
                TypeNode::nullable(TypeNode::reference("LinkedList")),
                Some(serde_json::Value::Null),
            ),
        ]))
        .unwrap();
        assert!(b.freeze().is_ok());
    }

    #[test]
    fn type_nodes_round_trip_through_json() {
        let ty = TypeNode::union(vec![
            TypeNode::generic("Box", vec![TypeNode::number()]),
            TypeNode::list(TypeNode::string()),
            TypeNode::null(),
        ]);
        let text = serde_json::to_string(&ty).unwrap();
        let back: TypeNode = serde_json::from_str(&text).unwrap();
        assert_eq!(ty, back);
    }
}
