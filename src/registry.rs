//! Endpoint registry: callables with declared parameter/return types.
//!
//! Populated imperatively during startup, read-only afterwards. Feeds the
//! emitter (which records are reachable, what the client surface looks like)
//! and the decoder (what to decode a request body into).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::model::{SchemaError, TypeNode};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeNode,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl Param {
    pub fn required(name: impl Into<String>, ty: TypeNode) -> Self {
        Param { name: name.into(), ty, optional: false, default: None }
    }

    pub fn optional(
        name: impl Into<String>,
        ty: TypeNode,
        default: Option<serde_json::Value>,
    ) -> Self {
        Param { name: name.into(), ty, optional: true, default }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Owning group; two endpoints may share a name only across namespaces.
    pub namespace: String,
    pub name: String,
    /// Flask-style URL rule, e.g. `/user/<int:user_id>`. When absent the
    /// emitted url falls back to `/<namespace>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default = "default_methods")]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub params: Vec<Param>,
    pub returns: TypeNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

fn default_methods() -> Vec<Method> {
    vec![Method::Post]
}

impl Endpoint {
    /// Parsed URL segments, synthesizing a static rule when none is declared.
    pub fn url_segments(&self) -> Result<Vec<RuleSeg>, SchemaError> {
        match &self.rule {
            Some(rule) => parse_rule(rule),
            None => Ok(vec![RuleSeg::Static(format!("/{}/{}", self.namespace, self.name))]),
        }
    }
}

// ------------------------------ URL rules --------------------------------- //

/// `<converter(args):variable>` placeholders inside an otherwise static rule.
static RULE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)
        (?P<static>[^<]*)                           # static rule data
        <
        (?:
            (?P<converter>[a-zA-Z_][a-zA-Z0-9_]*)   # converter name
            (?:\((?P<arguments>.*?)\))?             # converter arguments
            :                                       # variable delimiter
        )?
        (?P<variable>[a-zA-Z_][a-zA-Z0-9_]*)        # variable name
        >
        ",
    )
    .expect("rule regex compiles")
});

#[derive(Clone, Debug, PartialEq)]
pub enum RuleSeg {
    Static(String),
    Variable {
        name: String,
        converter: Converter,
        /// `any('a', 'b')` literals, emitted as a union of string literals.
        choices: Vec<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Converter {
    Default,
    Int,
    Float,
    Any,
    Path,
}

impl Converter {
    fn parse(name: &str) -> Converter {
        match name {
            "int" => Converter::Int,
            "float" => Converter::Float,
            "any" => Converter::Any,
            "path" => Converter::Path,
            _ => Converter::Default,
        }
    }

    pub fn ts_type(self) -> &'static str {
        match self {
            Converter::Int | Converter::Float => "number",
            Converter::Default | Converter::Any | Converter::Path => "string",
        }
    }
}

pub fn parse_rule(rule: &str) -> Result<Vec<RuleSeg>, SchemaError> {
    let malformed = |reason: &str| SchemaError::MalformedRule {
        rule: rule.to_string(),
        reason: reason.to_string(),
    };

    let mut segs = Vec::new();
    let mut used = std::collections::HashSet::new();
    let mut pos = 0;

    while pos < rule.len() {
        let Some(caps) = RULE_RE.captures(&rule[pos..]) else { break };
        let whole = caps.get(0).expect("capture 0 always present");
        if whole.start() != 0 {
            break;
        }
        if let Some(m) = caps.name("static") {
            if !m.is_empty() {
                segs.push(RuleSeg::Static(m.as_str().to_string()));
            }
        }
        let variable = caps.name("variable").expect("variable group").as_str();
        if !used.insert(variable.to_string()) {
            return Err(malformed(&format!("variable name `{variable}` used twice")));
        }
        let converter = caps
            .name("converter")
            .map_or(Converter::Default, |m| Converter::parse(m.as_str()));
        // only `any(...)` arguments are value literals; for the other
        // converters they are formatting options (e.g. `int(5)` fixed digits)
        // and must not narrow the variable's type
        let choices = match converter {
            Converter::Any => caps
                .name("arguments")
                .map_or_else(Vec::new, |m| split_choices(m.as_str())),
            _ => Vec::new(),
        };
        segs.push(RuleSeg::Variable {
            name: variable.to_string(),
            converter,
            choices,
        });
        pos += whole.end();
    }

    if pos < rule.len() {
        let remaining = &rule[pos..];
        if remaining.contains('<') || remaining.contains('>') {
            return Err(malformed("unbalanced placeholder brackets"));
        }
        segs.push(RuleSeg::Static(remaining.to_string()));
    }
    Ok(segs)
}

/// Split `any(...)` arguments on commas outside quotes, so a quoted literal
/// may itself contain a comma.
fn split_choices(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in args.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => quote = Some(c),
                ',' => {
                    let token = current.trim().to_string();
                    if !token.is_empty() {
                        out.push(token);
                    }
                    current.clear();
                }
                _ => current.push(c),
            },
        }
    }
    let token = current.trim().to_string();
    if !token.is_empty() {
        out.push(token);
    }
    out
}

// ------------------------------- Registry --------------------------------- //

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, endpoint: Endpoint) -> Result<(), SchemaError> {
        if self
            .endpoints
            .iter()
            .any(|e| e.namespace == endpoint.namespace && e.name == endpoint.name)
        {
            return Err(SchemaError::DuplicateEndpoint {
                namespace: endpoint.namespace,
                name: endpoint.name,
            });
        }
        for p in &endpoint.params {
            if !p.optional && p.default.is_some() {
                return Err(SchemaError::DefaultOnRequired {
                    record: format!("{}.{}", endpoint.namespace, endpoint.name),
                    field: p.name.clone(),
                });
            }
            // arguments are handed to handlers positionally, so an omitted
            // optional parameter must have a value to substitute
            if p.optional && p.default.is_none() && !p.ty.admits_null() {
                return Err(SchemaError::NonNullableOptional {
                    owner: format!("{}.{}", endpoint.namespace, endpoint.name),
                    field: p.name.clone(),
                });
            }
        }
        // surface rule errors at registration, not at emission
        endpoint.url_segments()?;
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<&Endpoint> {
        self.endpoints
            .iter()
            .find(|e| e.namespace == namespace && e.name == name)
    }

    /// Namespaces in first-registration order, endpoints in registration order.
    pub fn namespaces(&self) -> indexmap::IndexMap<&str, Vec<&Endpoint>> {
        let mut out: indexmap::IndexMap<&str, Vec<&Endpoint>> = indexmap::IndexMap::new();
        for e in &self.endpoints {
            out.entry(e.namespace.as_str()).or_default().push(e);
        }
        out
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_and_typed_variables_parse() {
        let segs = parse_rule("/user/<int:user_id>/posts/<slug>").unwrap();
        assert_eq!(segs, vec![
            RuleSeg::Static("/user/".into()),
            RuleSeg::Variable {
                name: "user_id".into(),
                converter: Converter::Int,
                choices: vec![],
            },
            RuleSeg::Static("/posts/".into()),
            RuleSeg::Variable {
                name: "slug".into(),
                converter: Converter::Default,
                choices: vec![],
            },
        ]);
    }

    #[test]
    fn any_converter_keeps_choices() {
        let segs = parse_rule("/page/<any('about', 'help'):section>").unwrap();
        match &segs[1] {
            RuleSeg::Variable { converter, choices, .. } => {
                assert_eq!(*converter, Converter::Any);
                assert_eq!(choices, &["about", "help"]);
            }
            other => panic!("expected variable, got {other:?}"),
        }
    }

    #[test]
    fn converter_options_do_not_become_choices() {
        // int(5) is a fixed-digits option, not a value literal
        let segs = parse_rule("/n/<int(5):x>").unwrap();
        assert_eq!(
            segs[1],
            RuleSeg::Variable {
                name: "x".into(),
                converter: Converter::Int,
                choices: vec![],
            }
        );
    }

    #[test]
    fn quoted_choice_literal_may_contain_a_comma() {
        let segs = parse_rule("/page/<any('a,b', 'c'):section>").unwrap();
        match &segs[1] {
            RuleSeg::Variable { choices, .. } => assert_eq!(choices, &["a,b", "c"]),
            other => panic!("expected variable, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_variable_is_malformed() {
        let err = parse_rule("/a/<x>/b/<x>").unwrap_err();
        assert!(matches!(err, SchemaError::MalformedRule { .. }));
    }

    #[test]
    fn unbalanced_brackets_are_malformed() {
        assert!(parse_rule("/a/<int:x").is_err());
    }

    #[test]
    fn duplicate_endpoint_per_namespace_only() {
        let ep = |ns: &str, name: &str| Endpoint {
            namespace: ns.into(),
            name: name.into(),
            rule: None,
            methods: default_methods(),
            params: vec![],
            returns: TypeNode::null(),
            doc: None,
        };
        let mut reg = EndpointRegistry::new();
        reg.register(ep("app", "ping")).unwrap();
        reg.register(ep("admin", "ping")).unwrap();
        assert!(matches!(
            reg.register(ep("app", "ping")),
            Err(SchemaError::DuplicateEndpoint { .. })
        ));
    }

    #[test]
    fn omittable_param_needs_default_or_nullable_type() {
        let ep = |param: Param| Endpoint {
            namespace: "app".into(),
            name: "f".into(),
            rule: None,
            methods: default_methods(),
            params: vec![param],
            returns: TypeNode::null(),
            doc: None,
        };
        let mut reg = EndpointRegistry::new();
        assert!(matches!(
            reg.register(ep(Param::optional("b", TypeNode::number(), None))),
            Err(SchemaError::NonNullableOptional { .. })
        ));
        reg.register(ep(Param::optional(
            "b",
            TypeNode::nullable(TypeNode::number()),
            None,
        )))
        .unwrap();
    }

    #[test]
    fn missing_rule_synthesizes_static_url() {
        let ep = Endpoint {
            namespace: "app".into(),
            name: "ping".into(),
            rule: None,
            methods: default_methods(),
            params: vec![],
            returns: TypeNode::null(),
            doc: None,
        };
        assert_eq!(
            ep.url_segments().unwrap(),
            vec![RuleSeg::Static("/app/ping".into())]
        );
    }
}
