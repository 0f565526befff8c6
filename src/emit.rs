//! TypeScript emitter: walk the frozen type model and render declarations.
//!
//! Two independently requestable outputs:
//! - types: pure `export type` declarations, safe to import without pulling
//!   any runtime code into a client bundle;
//! - endpoints: per-namespace const maps carrying url builders, plus an api
//!   interface of `(params) => Promise<Return>` signatures.
//!
//! Output is deterministic for a given schema (first-discovery order, or
//! lexicographic with `sort_by_name`), so re-generation is byte-identical.
//! Emission is all-or-nothing: any schema error aborts with no partial text.

use std::collections::{HashSet, VecDeque};

use crate::model::{Prim, Record, Schema, SchemaError, TypeNode};
use crate::registry::{Endpoint, EndpointRegistry, RuleSeg};

const INDENT: &str = "    ";

/// Shared contract for every emitted endpoint const.
pub const ENDPOINT_PREAMBLE: &str = "export type Endpoint = {
    methods: (\"GET\" | \"POST\")[]
    url: (...args: any[]) => string
    doc?: string
}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmitMode {
    TypesOnly,
    EndpointsOnly,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EmitOptions {
    /// Lexicographic record order instead of first-discovery order.
    pub sort_by_name: bool,
}

pub struct Emitter<'a> {
    schema: &'a Schema,
    options: EmitOptions,
}

impl<'a> Emitter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Emitter { schema, options: EmitOptions::default() }
    }

    pub fn with_options(schema: &'a Schema, options: EmitOptions) -> Self {
        Emitter { schema, options }
    }

    pub fn emit(
        &self,
        registry: &EndpointRegistry,
        mode: EmitMode,
    ) -> Result<String, SchemaError> {
        match mode {
            EmitMode::TypesOnly => self.emit_types(registry),
            EmitMode::EndpointsOnly => self.emit_endpoints(registry),
        }
    }

    // ------------------------------ closure ------------------------------- //

    /// Records reachable from the endpoints' parameter/return types,
    /// breadth-first over ref edges. Each record appears exactly once.
    fn reachable(&self, registry: &EndpointRegistry) -> Result<Vec<&'a Record>, SchemaError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let enqueue = |name: &str, queue: &mut VecDeque<String>, seen: &mut HashSet<String>| {
            if seen.insert(name.to_string()) {
                queue.push_back(name.to_string());
            }
        };

        for ep in registry.endpoints() {
            for p in &ep.params {
                p.ty.walk_refs(&mut |n| enqueue(n, &mut queue, &mut seen));
            }
            ep.returns.walk_refs(&mut |n| enqueue(n, &mut queue, &mut seen));
        }

        let mut order: Vec<String> = Vec::new();
        while let Some(name) = queue.pop_front() {
            // UnknownRecord propagates and aborts emission
            let record = self.schema.resolve(&name)?;
            order.push(name);
            for field in &record.fields {
                field.ty.walk_refs(&mut |n| enqueue(n, &mut queue, &mut seen));
            }
            for param in &record.params {
                if let Some(def) = &param.default {
                    def.walk_refs(&mut |n| enqueue(n, &mut queue, &mut seen));
                }
            }
        }

        if self.options.sort_by_name {
            order.sort();
        }
        order.iter().map(|n| self.schema.resolve(n)).collect()
    }

    // ------------------------------- types -------------------------------- //

    fn emit_types(&self, registry: &EndpointRegistry) -> Result<String, SchemaError> {
        let records = self.reachable(registry)?;
        let decls: Vec<String> = records.iter().map(|r| self.render_record(r)).collect();
        Ok(decls.join("\n\n") + "\n")
    }

    fn render_record(&self, record: &Record) -> String {
        let generics = if record.params.is_empty() {
            String::new()
        } else {
            let args: Vec<String> = record
                .params
                .iter()
                .map(|p| match &p.default {
                    Some(def) => format!("{} = {}", p.name, self.render_type(def)),
                    None => p.name.clone(),
                })
                .collect();
            format!("<{}>", args.join(", "))
        };

        let rows: Vec<String> = record
            .fields
            .iter()
            .map(|f| {
                let ty = self.render_type(&f.ty);
                if f.optional {
                    // the default is declared explicitly even when implicit null
                    let default = f
                        .default
                        .as_ref()
                        .map_or_else(|| "null".to_string(), ts_repr);
                    format!("{INDENT}{}?: {ty} /* ={default} */", f.name)
                } else {
                    format!("{INDENT}{}: {ty}", f.name)
                }
            })
            .collect();

        format!(
            "export type {}{generics} = {{\n{}\n}}",
            record.name,
            rows.join("\n")
        )
    }

    pub fn render_type(&self, ty: &TypeNode) -> String {
        match ty {
            TypeNode::Prim { prim } => match prim {
                Prim::String => "string".to_string(),
                Prim::Number => "number".to_string(),
                Prim::Boolean => "boolean".to_string(),
                Prim::Binary => "File".to_string(),
                Prim::Null => "null".to_string(),
                Prim::Any => "any".to_string(),
            },
            // recursion stays a named reference, never an inlined body
            TypeNode::Ref { name } => name.clone(),
            TypeNode::Var { name } => name.clone(),
            TypeNode::List { item } => {
                let inner = self.render_type(item);
                if inner.contains('|') {
                    format!("({inner})[]")
                } else {
                    format!("{inner}[]")
                }
            }
            TypeNode::Tuple { items } => {
                let inner: Vec<String> = items.iter().map(|t| self.render_type(t)).collect();
                format!("[{}]", inner.join(","))
            }
            TypeNode::Union { members } => {
                // dedupe on rendered text, null stays last
                let mut parts: Vec<String> = Vec::new();
                let mut saw_null = false;
                for m in members {
                    let s = self.render_type(m);
                    if s == "null" {
                        saw_null = true;
                        continue;
                    }
                    if !parts.contains(&s) {
                        parts.push(s);
                    }
                }
                if saw_null {
                    parts.push("null".to_string());
                }
                parts.join(" | ")
            }
            TypeNode::Generic { base, args } => {
                if args.is_empty() {
                    base.clone()
                } else {
                    let inner: Vec<String> = args.iter().map(|t| self.render_type(t)).collect();
                    format!("{base}<{}>", inner.join(", "))
                }
            }
        }
    }

    // ----------------------------- endpoints ------------------------------ //

    fn emit_endpoints(&self, registry: &EndpointRegistry) -> Result<String, SchemaError> {
        // validate reachability up-front so nothing is written on error
        self.reachable(registry)?;

        let mut out = String::new();
        out.push_str("// generated by tslink\n\n");
        out.push_str(ENDPOINT_PREAMBLE);
        out.push('\n');

        for (ns, endpoints) in registry.namespaces() {
            out.push('\n');
            out.push_str(&self.render_api_interface(ns, &endpoints)?);
            out.push('\n');
            out.push_str(&self.render_namespace(ns, &endpoints)?);
        }
        Ok(out)
    }

    /// `export interface <Ns>Api` mapping endpoint name to a function type,
    /// parameter order and optionality preserved exactly as declared.
    fn render_api_interface(
        &self,
        ns: &str,
        endpoints: &[&Endpoint],
    ) -> Result<String, SchemaError> {
        let mut rows = Vec::new();
        for ep in endpoints {
            let args: Vec<String> = ep
                .params
                .iter()
                .map(|p| {
                    let ty = self.render_type(&p.ty);
                    if p.optional {
                        let default = p
                            .default
                            .as_ref()
                            .map_or_else(|| "null".to_string(), ts_repr);
                        format!("{}?: {ty} /* ={default} */", p.name)
                    } else {
                        format!("{}: {ty}", p.name)
                    }
                })
                .collect();
            let ret = match self.render_type(&ep.returns).as_str() {
                // a null return type means the endpoint returns nothing useful
                "null" => "void".to_string(),
                other => other.to_string(),
            };
            rows.push(format!(
                "{INDENT}{}: ({}) => Promise<{ret}>",
                ep.name,
                args.join(", ")
            ));
        }
        Ok(format!(
            "export interface {}Api {{\n{}\n}}",
            pascal(ns),
            rows.join("\n")
        ))
    }

    fn render_namespace(
        &self,
        ns: &str,
        endpoints: &[&Endpoint],
    ) -> Result<String, SchemaError> {
        let mut bodies = Vec::new();
        for ep in endpoints {
            bodies.push(self.render_endpoint_const(ep)?);
        }
        Ok(format!(
            "export namespace {ns} {{\n{}\n}}\n",
            bodies.join("\n")
        ))
    }

    fn render_endpoint_const(&self, ep: &Endpoint) -> Result<String, SchemaError> {
        let segs = ep.url_segments()?;

        let mut url_args = Vec::new();
        let mut template = String::new();
        for seg in &segs {
            match seg {
                RuleSeg::Static(s) => template.push_str(s),
                RuleSeg::Variable { name, converter, choices } => {
                    let ty = if !choices.is_empty() {
                        choices
                            .iter()
                            .map(|c| format!("\"{c}\""))
                            .collect::<Vec<_>>()
                            .join(" | ")
                    } else {
                        converter.ts_type().to_string()
                    };
                    url_args.push(format!("{name}: {ty}"));
                    template.push_str(&format!("${{{name}}}"));
                }
            }
        }

        let methods: Vec<String> = ep
            .methods
            .iter()
            .map(|m| format!("\"{}\"", m.as_str()))
            .collect();

        let tab = INDENT.repeat(2);
        let mut fields = vec![
            format!("methods: [{}]", methods.join(", ")),
            format!("url({}) {{ return `{template}` }}", url_args.join(", ")),
        ];
        if let Some(doc) = &ep.doc {
            fields.push(format!("doc: `{}`", doc.replace('`', "\\`")));
        }

        Ok(format!(
            "{INDENT}export const {} = {{\n{tab}{}\n{INDENT}}} satisfies Endpoint",
            ep.name,
            fields.join(&format!(",\n{tab}")),
        ))
    }
}

// ------------------------- Default literal rendering ----------------------- //

/// Render a serialized default as a TS literal: strings quoted, numbers and
/// booleans bare, lists with their element literals, nested record defaults
/// as `{field: value}` object notation, absent → `null`.
pub fn ts_repr(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(_) => serde_json::to_string(value).unwrap_or_default(),
        serde_json::Value::Array(xs) => {
            let inner: Vec<String> = xs.iter().map(ts_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        serde_json::Value::Object(m) => {
            let inner: Vec<String> = m.iter().map(|(k, v)| format!("{k}: {}", ts_repr(v))).collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn pascal(ns: &str) -> String {
    ns.split(['_', '-'])
        .filter(|s| !s.is_empty())
        .map(|s| {
            let mut chars = s.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

// ------------------------------- Tests ------------------------------------ //
