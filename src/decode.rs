//! Decode/validate engine: turn semi-structured input into typed values.
//!
//! Given a declared `TypeNode` and raw input (a nested map from the flattener,
//! or a parsed JSON document), produce either a conforming value or a list of
//! field-level errors. Errors are collected exhaustively per request, never
//! short-circuited, so a client sees every problem in one round trip.
//!
//! The engine holds no state beyond its call stack; each invocation is an
//! independent pure function over the frozen schema.

use indexmap::IndexMap;
use serde::Serialize;

use crate::model::{Prim, Record, Schema, TypeNode};
use crate::registry::Param;
use crate::value::Value;

// ------------------------------ Field errors ------------------------------ //

/// One step of a location path, mirroring the nesting used for dotted-key
/// reconstruction so a client can map the error back to an input control.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PathKey {
    Key(String),
    Index(usize),
}

impl std::fmt::Display for PathKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathKey::Key(k) => write!(f, "{k}"),
            PathKey::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Request-time, recoverable: collected into a `failure` envelope while the
/// process keeps serving.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    TypeMismatch,
    MissingField,
    ArityMismatch,
    NoUnionMemberMatched,
    /// Strict mode only: input carried a key the record does not declare.
    UnexpectedField,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldError {
    pub loc: Vec<PathKey>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
}

impl FieldError {
    pub fn new(loc: &[PathKey], kind: ErrorKind, msg: impl Into<String>) -> Self {
        FieldError { loc: loc.to_vec(), msg: msg.into(), kind }
    }
}

fn one(loc: &[PathKey], kind: ErrorKind, msg: impl Into<String>) -> Vec<FieldError> {
    vec![FieldError::new(loc, kind, msg)]
}

// -------------------------------- Decoder --------------------------------- //

#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    /// Reject input keys the record does not declare.
    pub strict: bool,
    /// Apply the lexical coercions form submissions need (text → number/bool,
    /// lone scalar → one-element list).
    pub coerce: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions { strict: false, coerce: true }
    }
}

pub struct Decoder<'a> {
    schema: &'a Schema,
    options: DecodeOptions,
}

impl<'a> Decoder<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Decoder { schema, options: DecodeOptions::default() }
    }

    pub fn with_options(schema: &'a Schema, options: DecodeOptions) -> Self {
        Decoder { schema, options }
    }

    /// Decode one value against a declared type, extending `path` as we go.
    pub fn decode(
        &self,
        ty: &TypeNode,
        input: Option<&Value>,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        let Some(input) = input else {
            return Err(one(path, ErrorKind::MissingField, "field required"));
        };
        match ty {
            TypeNode::Prim { prim } => self.decode_prim(*prim, input, path),
            TypeNode::Ref { name } => self.decode_record(name, &[], input, path),
            TypeNode::Generic { base, args } => self.decode_record(base, args, input, path),
            // an unbound type parameter constrains nothing
            TypeNode::Var { .. } => Ok(input.clone()),
            TypeNode::List { item } => self.decode_list(item, input, path),
            TypeNode::Tuple { items } => self.decode_tuple(items, input, path),
            TypeNode::Union { members } => self.decode_union(members, input, path),
        }
    }

    /// Decode an endpoint's whole parameter list by name against a request
    /// body. Errors are the union across all parameters.
    pub fn decode_args(
        &self,
        params: &[Param],
        body: &Value,
    ) -> Result<Vec<Value>, Vec<FieldError>> {
        let Some(map) = body.as_map() else {
            return Err(one(
                &[],
                ErrorKind::TypeMismatch,
                format!("expected object body, got {}", body.kind_name()),
            ));
        };
        let mut out = Vec::with_capacity(params.len());
        let mut errors = Vec::new();
        for p in params {
            let path = [PathKey::Key(p.name.clone())];
            match map.get(&p.name) {
                Some(v) => match self.decode(&p.ty, Some(v), &path) {
                    Ok(v) => out.push(v),
                    Err(mut e) => errors.append(&mut e),
                },
                None => {
                    if let Some(default) = &p.default {
                        out.push(Value::from_json(default));
                    } else if p.optional && p.ty.admits_null() {
                        // registration requires omittable parameters to be
                        // defaulted or null-admitting, so this covers them all
                        out.push(Value::Null);
                    } else {
                        errors.push(FieldError::new(
                            &path,
                            ErrorKind::MissingField,
                            "field required",
                        ));
                    }
                }
            }
        }
        if errors.is_empty() { Ok(out) } else { Err(errors) }
    }

    /// JSON bodies bypass the key-path flattener entirely.
    pub fn decode_json_args(
        &self,
        params: &[Param],
        doc: &serde_json::Value,
    ) -> Result<Vec<Value>, Vec<FieldError>> {
        self.decode_args(params, &Value::from_json(doc))
    }

    // ------------------------- per-kind dispatch -------------------------- //

    fn decode_prim(
        &self,
        prim: Prim,
        input: &Value,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        let coerce = self.options.coerce;
        match (prim, input) {
            (Prim::Any, v) => Ok(v.clone()),
            (Prim::Null, Value::Null) => Ok(Value::Null),
            (Prim::String, Value::Text(_)) => Ok(input.clone()),
            (Prim::Number, Value::Int(_) | Value::Float(_)) => Ok(input.clone()),
            (Prim::Boolean, Value::Bool(_)) => Ok(input.clone()),
            (Prim::Binary, Value::Blob(_)) => Ok(input.clone()),

            // lexical coercions: form fields always arrive as text
            (Prim::Number, Value::Text(s)) if coerce => parse_number(s).map_or_else(
                || Err(one(path, ErrorKind::TypeMismatch, format!("`{s}` is not a number"))),
                Ok,
            ),
            (Prim::Boolean, Value::Text(s)) if coerce => parse_boolean(s).map_or_else(
                || Err(one(path, ErrorKind::TypeMismatch, format!("`{s}` is not a boolean"))),
                Ok,
            ),
            (Prim::Null, Value::Text(s)) if coerce && (s.is_empty() || s == "null") => {
                Ok(Value::Null)
            }

            _ => Err(one(
                path,
                ErrorKind::TypeMismatch,
                format!("expected {}, got {}", prim_label(prim), input.kind_name()),
            )),
        }
    }

    fn decode_record(
        &self,
        name: &str,
        args: &[TypeNode],
        input: &Value,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        let record = match self.schema.resolve(name) {
            Ok(r) => r,
            Err(_) => {
                // frozen schemas cannot reach here; surfaced defensively anyway
                return Err(one(
                    path,
                    ErrorKind::TypeMismatch,
                    format!("unknown record `{name}`"),
                ));
            }
        };
        let Some(map) = input.as_map() else {
            return Err(one(
                path,
                ErrorKind::TypeMismatch,
                format!("expected object, got {}", input.kind_name()),
            ));
        };

        let bindings = bindings_for(record, args);
        let mut out: IndexMap<String, Value> = IndexMap::new();
        let mut errors = Vec::new();

        for field in &record.fields {
            let fty = if bindings.is_empty() {
                field.ty.clone()
            } else {
                field.ty.substitute(&bindings)
            };
            let mut fpath = path.to_vec();
            fpath.push(PathKey::Key(field.name.clone()));

            match map.get(&field.name) {
                Some(v) => match self.decode(&fty, Some(v), &fpath) {
                    Ok(v) => {
                        out.insert(field.name.clone(), v);
                    }
                    Err(mut e) => errors.append(&mut e),
                },
                None => {
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), Value::from_json(default));
                    } else if field.optional {
                        if fty.admits_null() {
                            out.insert(field.name.clone(), Value::Null);
                        }
                        // optional, no default, not nullable: leave absent
                    } else {
                        errors.push(FieldError::new(
                            &fpath,
                            ErrorKind::MissingField,
                            "field required",
                        ));
                    }
                }
            }
        }

        if self.options.strict {
            let declared: std::collections::HashSet<&str> =
                record.fields.iter().map(|f| f.name.as_str()).collect();
            for key in map.keys() {
                if !declared.contains(key.as_str()) {
                    let mut fpath = path.to_vec();
                    fpath.push(PathKey::Key(key.clone()));
                    errors.push(FieldError::new(
                        &fpath,
                        ErrorKind::UnexpectedField,
                        format!("record `{name}` has no field `{key}`"),
                    ));
                }
            }
        }

        if errors.is_empty() { Ok(Value::Map(out)) } else { Err(errors) }
    }

    fn decode_list(
        &self,
        item: &TypeNode,
        input: &Value,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        // single-value form submissions arrive as a lone scalar
        let lone_scalar;
        let items: &[Value] = match input {
            Value::List(xs) => xs,
            v if self.options.coerce && v.is_scalar() => {
                lone_scalar = [v.clone()];
                &lone_scalar
            }
            _ => {
                return Err(one(
                    path,
                    ErrorKind::TypeMismatch,
                    format!("expected list, got {}", input.kind_name()),
                ));
            }
        };

        let mut out = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, v) in items.iter().enumerate() {
            let mut epath = path.to_vec();
            epath.push(PathKey::Index(i));
            match self.decode(item, Some(v), &epath) {
                Ok(v) => out.push(v),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if errors.is_empty() { Ok(Value::List(out)) } else { Err(errors) }
    }

    fn decode_tuple(
        &self,
        items: &[TypeNode],
        input: &Value,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        let Value::List(xs) = input else {
            return Err(one(
                path,
                ErrorKind::TypeMismatch,
                format!("expected tuple, got {}", input.kind_name()),
            ));
        };
        if xs.len() != items.len() {
            // no per-slot decoding on arity mismatch
            return Err(one(
                path,
                ErrorKind::ArityMismatch,
                format!("expected {} elements, got {}", items.len(), xs.len()),
            ));
        }
        let mut out = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (i, (ty, v)) in items.iter().zip(xs).enumerate() {
            let mut epath = path.to_vec();
            epath.push(PathKey::Index(i));
            match self.decode(ty, Some(v), &epath) {
                Ok(v) => out.push(v),
                Err(mut e) => errors.append(&mut e),
            }
        }
        if errors.is_empty() { Ok(Value::List(out)) } else { Err(errors) }
    }

    /// First member to decode without error wins, in declaration order.
    /// Member-level sub-errors are deliberately not surfaced.
    fn decode_union(
        &self,
        members: &[TypeNode],
        input: &Value,
        path: &[PathKey],
    ) -> Result<Value, Vec<FieldError>> {
        for member in members {
            if let Ok(v) = self.decode(member, Some(input), path) {
                return Ok(v);
            }
        }
        Err(one(
            path,
            ErrorKind::NoUnionMemberMatched,
            format!("no union member matched {}", input.kind_name()),
        ))
    }
}

// ------------------------------- Lexical ---------------------------------- //

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Int(i));
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(Value::Float(f)),
        _ => None,
    }
}

/// Fixed lexical rule set for checkbox/flag submissions.
fn parse_boolean(s: &str) -> Option<Value> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(Value::Bool(true)),
        "false" | "0" | "off" | "no" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn prim_label(prim: Prim) -> &'static str {
    match prim {
        Prim::String => "string",
        Prim::Number => "number",
        Prim::Boolean => "boolean",
        Prim::Binary => "file",
        Prim::Null => "null",
        Prim::Any => "any",
    }
}

fn bindings_for(record: &Record, args: &[TypeNode]) -> IndexMap<String, TypeNode> {
    let mut bindings = IndexMap::new();
    for (i, param) in record.params.iter().enumerate() {
        let bound = match args.get(i) {
            Some(t) => t.clone(),
            None => param.default.clone().unwrap_or_else(TypeNode::any),
        };
        bindings.insert(param.name.clone(), bound);
    }
    bindings
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;
    use crate::model::{Field, Record, SchemaBuilder, TypeParam};

    fn schema() -> Schema {
        let mut b = SchemaBuilder::new();
        b.define_record(Record::new("Point", vec![
            Field::required("x", TypeNode::number()),
            Field::required("y", TypeNode::number()),
        ]))
        .unwrap();
        b.define_record(Record::new("Arg5", vec![
            Field::required("query", TypeNode::string()),
        ]))
        .unwrap();
        b.define_record(Record::new("Arg", vec![
            Field::required("query", TypeNode::string()),
            Field::required("selected", TypeNode::list(TypeNode::number())),
            Field::optional("doit", TypeNode::boolean(), Some(serde_json::json!(false))),
            Field::optional(
                "checked",
                TypeNode::list(TypeNode::string()),
                Some(serde_json::json!(["aaa"])),
            ),
        ]))
        .unwrap();
        b.define_record(
            Record::new("Box", vec![Field::required("value", TypeNode::var("T"))])
                .with_params(vec![TypeParam { name: "T".into(), default: None }]),
        )
        .unwrap();
        b.freeze().unwrap()
    }

    fn key(k: &str) -> PathKey {
        PathKey::Key(k.to_string())
    }

    #[test]
    fn point_partial_failure_reports_only_bad_field() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let input = Value::from_json(&serde_json::json!({"x": "abc", "y": 3}));
        let errors = d
            .decode(&TypeNode::reference("Point"), Some(&input), &[])
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].loc, vec![key("x")]);
        assert_eq!(errors[0].kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn two_invalid_fields_yield_two_errors_in_declaration_order() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let input = Value::from_json(&serde_json::json!({"x": "abc", "y": true}));
        let errors = d
            .decode(&TypeNode::reference("Point"), Some(&input), &[])
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].loc, vec![key("x")]);
        assert_eq!(errors[1].loc, vec![key("y")]);
    }

    #[test]
    fn flattened_form_decodes_into_nested_record() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let body = flatten(vec![("arg5.query".to_string(), Value::text("p"))]).unwrap();
        let params = [Param::required("arg5", TypeNode::reference("Arg5"))];
        let args = d.decode_args(&params, &Value::Map(body)).unwrap();
        assert_eq!(
            args[0],
            Value::from_json(&serde_json::json!({"query": "p"}))
        );
    }

    #[test]
    fn missing_checkbox_group_takes_declared_default() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let input = Value::from_json(&serde_json::json!({"query": "q", "selected": [1, 2]}));
        let out = d
            .decode(&TypeNode::reference("Arg"), Some(&input), &[])
            .unwrap();
        let map = out.as_map().unwrap();
        assert_eq!(map.get("checked"), Some(&Value::from_json(&serde_json::json!(["aaa"]))));
        assert_eq!(map.get("doit"), Some(&Value::Bool(false)));
    }

    #[test]
    fn lone_scalar_widens_to_one_element_list() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let out = d
            .decode(
                &TypeNode::list(TypeNode::number()),
                Some(&Value::text("7")),
                &[],
            )
            .unwrap();
        assert_eq!(out, Value::List(vec![Value::Int(7)]));
    }

    #[test]
    fn list_errors_carry_element_indices_and_are_exhaustive() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let input = Value::from_json(&serde_json::json!(["1", "zap", "pow"]));
        let errors = d
            .decode(&TypeNode::list(TypeNode::number()), Some(&input), &[key("sel")])
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].loc, vec![key("sel"), PathKey::Index(1)]);
        assert_eq!(errors[1].loc, vec![key("sel"), PathKey::Index(2)]);
    }

    #[test]
    fn tuple_arity_mismatch_stops_per_slot_decoding() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let ty = TypeNode::tuple(vec![TypeNode::number(), TypeNode::string()]);
        let input = Value::from_json(&serde_json::json!([1]));
        let errors = d.decode(&ty, Some(&input), &[]).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::ArityMismatch);
    }

    #[test]
    fn union_first_match_wins_in_declaration_order() {
        let schema = schema();
        let d = Decoder::new(&schema);
        // number first: text "1" coerces to Int, string member never consulted
        let ty = TypeNode::union(vec![TypeNode::number(), TypeNode::string()]);
        let out = d.decode(&ty, Some(&Value::text("1")), &[]).unwrap();
        assert_eq!(out, Value::Int(1));

        // string first: same input stays text
        let ty = TypeNode::union(vec![TypeNode::string(), TypeNode::number()]);
        let out = d.decode(&ty, Some(&Value::text("1")), &[]).unwrap();
        assert_eq!(out, Value::text("1"));
    }

    #[test]
    fn union_all_fail_aggregates_one_error() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let ty = TypeNode::union(vec![TypeNode::number(), TypeNode::boolean()]);
        let errors = d
            .decode(&ty, Some(&Value::text("zzz")), &[key("u")])
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::NoUnionMemberMatched);
        assert_eq!(errors[0].loc, vec![key("u")]);
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let schema = schema();
        let input = Value::from_json(&serde_json::json!({"x": 1, "y": 2, "z": 3}));

        let lax = Decoder::new(&schema);
        assert!(lax.decode(&TypeNode::reference("Point"), Some(&input), &[]).is_ok());

        let strict = Decoder::with_options(
            &schema,
            DecodeOptions { strict: true, ..DecodeOptions::default() },
        );
        let errors = strict
            .decode(&TypeNode::reference("Point"), Some(&input), &[])
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::UnexpectedField);
        assert_eq!(errors[0].loc, vec![key("z")]);
    }

    #[test]
    fn generic_record_binds_type_parameters() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let ty = TypeNode::generic("Box", vec![TypeNode::number()]);
        let ok = d
            .decode(&ty, Some(&Value::from_json(&serde_json::json!({"value": "3"}))), &[])
            .unwrap();
        assert_eq!(
            ok.as_map().unwrap().get("value"),
            Some(&Value::Int(3))
        );

        let errors = d
            .decode(&ty, Some(&Value::from_json(&serde_json::json!({"value": "x"}))), &[])
            .unwrap_err();
        assert_eq!(errors[0].loc, vec![key("value")]);
        assert_eq!(errors[0].kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn boolean_lexicon_accepts_form_spellings() {
        let schema = schema();
        let d = Decoder::new(&schema);
        for (s, expected) in [("on", true), ("TRUE", true), ("0", false), ("No", false)] {
            let out = d
                .decode(&TypeNode::boolean(), Some(&Value::text(s)), &[])
                .unwrap();
            assert_eq!(out, Value::Bool(expected), "lexeme {s}");
        }
        assert!(d.decode(&TypeNode::boolean(), Some(&Value::text("maybe")), &[]).is_err());
    }

    #[test]
    fn no_coercion_mode_requires_exact_kinds() {
        let schema = schema();
        let d = Decoder::with_options(
            &schema,
            DecodeOptions { strict: false, coerce: false },
        );
        assert!(d.decode(&TypeNode::number(), Some(&Value::text("3")), &[]).is_err());
        assert!(d.decode(&TypeNode::number(), Some(&Value::Int(3)), &[]).is_ok());
        assert!(d
            .decode(&TypeNode::list(TypeNode::number()), Some(&Value::Int(3)), &[])
            .is_err());
    }

    #[test]
    fn args_errors_collect_across_parameters() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let params = [
            Param::required("a", TypeNode::number()),
            Param::required("b", TypeNode::number()),
            Param {
                name: "c".into(),
                ty: TypeNode::number(),
                optional: true,
                default: Some(serde_json::json!(5)),
            },
        ];
        let body = Value::from_json(&serde_json::json!({"a": "nope"}));
        let errors = d.decode_args(&params, &body).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].loc, vec![key("a")]);
        assert_eq!(errors[1].loc, vec![key("b")]);
        assert_eq!(errors[1].kind, ErrorKind::MissingField);

        let body = Value::from_json(&serde_json::json!({"a": 1, "b": 2}));
        let args = d.decode_args(&params, &body).unwrap();
        assert_eq!(args, vec![Value::Int(1), Value::Int(2), Value::Int(5)]);
    }

    #[test]
    fn missing_optional_param_substitutes_null_only_when_nullable() {
        let schema = schema();
        let d = Decoder::new(&schema);
        let body = Value::from_json(&serde_json::json!({}));

        let nullable = [Param::optional(
            "b",
            TypeNode::nullable(TypeNode::number()),
            None,
        )];
        assert_eq!(d.decode_args(&nullable, &body).unwrap(), vec![Value::Null]);

        // a plain number never materializes as null; registration rejects
        // this parameter shape, and decoding refuses it too
        let bare = [Param::optional("b", TypeNode::number(), None)];
        let errors = d.decode_args(&bare, &body).unwrap_err();
        assert_eq!(errors[0].kind, ErrorKind::MissingField);
        assert_eq!(errors[0].loc, vec![key("b")]);
    }

    #[test]
    fn field_error_wire_shape() {
        let e = FieldError::new(
            &[key("x"), PathKey::Index(2)],
            ErrorKind::TypeMismatch,
            "expected number, got string",
        );
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "loc": ["x", 2],
                "msg": "expected number, got string",
                "type": "TypeMismatch",
            })
        );
    }
}
