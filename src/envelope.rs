//! Response envelope and endpoint dispatch.
//!
//! Every invocation produces exactly one of three outcomes, discriminated by a
//! `type` tag a client can switch on:
//! - `success`: the handler ran and its result conformed to the declared
//!   return type;
//! - `failure`: the input did not decode; the handler was never called and the
//!   errors list every offending field;
//! - `error`: the handler itself failed, panicked, or returned a value of the
//!   wrong type. Detail strings stay minimal; internals never leak.
//!
//! Handlers receive decoded arguments positionally, in declared parameter
//! order, so the calling convention matches the emitted client signatures.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;

use crate::decode::{DecodeOptions, Decoder, FieldError};
use crate::flatten::flatten;
use crate::model::{Schema, SchemaError};
use crate::registry::{Endpoint, EndpointRegistry};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResultEnvelope {
    Success { result: Value },
    Failure { errors: Vec<FieldError> },
    Error { error: String },
}

impl ResultEnvelope {
    /// The HTTP status a transport adapter should pair with this envelope.
    pub fn http_status(&self) -> u16 {
        match self {
            ResultEnvelope::Success { .. } => 200,
            ResultEnvelope::Failure { .. } => 400,
            ResultEnvelope::Error { .. } => 500,
        }
    }
}

/// Application logic behind an endpoint. Arguments arrive already decoded and
/// validated; an `Err` becomes an `error` envelope with the error's message.
pub type Handler = dyn Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync;

/// Decode a request body and run a handler against one endpoint.
pub fn invoke(
    schema: &Schema,
    endpoint: &Endpoint,
    handler: &Handler,
    body: &Value,
) -> ResultEnvelope {
    let decoder = Decoder::new(schema);
    let args = match decoder.decode_args(&endpoint.params, body) {
        Ok(args) => args,
        // the handler is never called on bad input
        Err(errors) => return ResultEnvelope::Failure { errors },
    };

    let result = match catch_unwind(AssertUnwindSafe(|| handler(args))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => return ResultEnvelope::Error { error: e.to_string() },
        Err(_) => {
            tracing::error!("handler for `{}.{}` panicked", endpoint.namespace, endpoint.name);
            return ResultEnvelope::Error { error: "internal error".to_string() };
        }
    };

    // the declared return type is a contract on the handler, not a coercion
    let checker = Decoder::with_options(
        schema,
        DecodeOptions { strict: false, coerce: false },
    );
    match checker.decode(&endpoint.returns, Some(&result), &[]) {
        Ok(result) => ResultEnvelope::Success { result },
        Err(_) => {
            tracing::error!(
                "handler for `{}.{}` returned a value not matching its declared type",
                endpoint.namespace,
                endpoint.name
            );
            ResultEnvelope::Error { error: "internal error".to_string() }
        }
    }
}

/// Form-submission entry point: reconstruct nesting from dotted/bracketed
/// keys, then decode. A malformed key path is fatal for the whole request.
pub fn invoke_form<I>(
    schema: &Schema,
    endpoint: &Endpoint,
    handler: &Handler,
    entries: I,
) -> ResultEnvelope
where
    I: IntoIterator<Item = (String, Value)>,
{
    match flatten(entries) {
        Ok(map) => invoke(schema, endpoint, handler, &Value::Map(map)),
        Err(e) => ResultEnvelope::Error { error: e.to_string() },
    }
}

/// JSON entry point: the document is decoded as-is, no key-path handling.
pub fn invoke_json(
    schema: &Schema,
    endpoint: &Endpoint,
    handler: &Handler,
    doc: &serde_json::Value,
) -> ResultEnvelope {
    invoke(schema, endpoint, handler, &Value::from_json(doc))
}

// -------------------------------- Service --------------------------------- //

/// Bundles a frozen schema, the endpoint registry, and the handlers behind
/// them. This is the piece a transport adapter (an HTTP framework route, a
/// test harness) talks to.
pub struct Service<'a> {
    schema: &'a Schema,
    registry: &'a EndpointRegistry,
    handlers: HashMap<(String, String), Box<Handler>>,
}

impl<'a> Service<'a> {
    pub fn new(schema: &'a Schema, registry: &'a EndpointRegistry) -> Self {
        Service { schema, registry, handlers: HashMap::new() }
    }

    /// Attach application logic to a registered endpoint.
    pub fn handle<F>(
        &mut self,
        namespace: &str,
        name: &str,
        handler: F,
    ) -> Result<(), SchemaError>
    where
        F: Fn(Vec<Value>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        if self.registry.get(namespace, name).is_none() {
            return Err(SchemaError::UnknownEndpoint {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        self.handlers
            .insert((namespace.to_string(), name.to_string()), Box::new(handler));
        Ok(())
    }

    fn dispatch(
        &self,
        namespace: &str,
        name: &str,
        body: &Value,
    ) -> ResultEnvelope {
        let Some(endpoint) = self.registry.get(namespace, name) else {
            return ResultEnvelope::Error {
                error: format!("no such endpoint `{namespace}.{name}`"),
            };
        };
        let Some(handler) = self.handlers.get(&(namespace.to_string(), name.to_string()))
        else {
            return ResultEnvelope::Error {
                error: format!("endpoint `{namespace}.{name}` has no handler"),
            };
        };
        invoke(self.schema, endpoint, handler.as_ref(), body)
    }

    pub fn call_form<I>(&self, namespace: &str, name: &str, entries: I) -> ResultEnvelope
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        match flatten(entries) {
            Ok(map) => self.dispatch(namespace, name, &Value::Map(map)),
            Err(e) => ResultEnvelope::Error { error: e.to_string() },
        }
    }

    pub fn call_json(
        &self,
        namespace: &str,
        name: &str,
        doc: &serde_json::Value,
    ) -> ResultEnvelope {
        self.dispatch(namespace, name, &Value::from_json(doc))
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::model::{Field, Record, SchemaBuilder, TypeNode};
    use crate::registry::{Method, Param};

    fn schema() -> Schema {
        let mut b = SchemaBuilder::new();
        b.define_record(Record::new("Point", vec![
            Field::required("x", TypeNode::number()),
            Field::required("y", TypeNode::number()),
        ]))
        .unwrap();
        b.freeze().unwrap()
    }

    fn norm_endpoint() -> Endpoint {
        Endpoint {
            namespace: "app".into(),
            name: "norm".into(),
            rule: None,
            methods: vec![Method::Post],
            params: vec![Param::required("p", TypeNode::reference("Point"))],
            returns: TypeNode::number(),
            doc: None,
        }
    }

    fn norm(args: Vec<Value>) -> anyhow::Result<Value> {
        let map = args[0].as_map().expect("decoded Point is a map");
        let get = |k: &str| match map.get(k) {
            Some(Value::Int(i)) => *i as f64,
            Some(Value::Float(f)) => *f,
            other => panic!("unexpected component {other:?}"),
        };
        let (x, y) = (get("x"), get("y"));
        Ok(Value::Float((x * x + y * y).sqrt()))
    }

    #[test]
    fn success_envelope_and_status() {
        let schema = schema();
        let ep = norm_endpoint();
        let out = invoke_json(&schema, &ep, &norm, &serde_json::json!({"p": {"x": 3, "y": 4}}));
        assert_eq!(out, ResultEnvelope::Success { result: Value::Float(5.0) });
        assert_eq!(out.http_status(), 200);
        let wire = serde_json::to_value(&out).unwrap();
        assert_eq!(wire, serde_json::json!({"type": "success", "result": 5.0}));
    }

    #[test]
    fn decode_failure_never_calls_the_handler() {
        let schema = schema();
        let ep = norm_endpoint();
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let handler = move |_: Vec<Value>| -> anyhow::Result<Value> {
            flag.store(true, Ordering::SeqCst);
            Ok(Value::Float(0.0))
        };
        let out = invoke_json(
            &schema,
            &ep,
            &handler,
            &serde_json::json!({"p": {"x": "abc", "y": true}}),
        );
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(out.http_status(), 400);
        let ResultEnvelope::Failure { errors } = out else {
            panic!("expected failure envelope");
        };
        assert_eq!(errors.len(), 2);
        let wire = serde_json::to_value(&errors[0]).unwrap();
        assert_eq!(wire["loc"], serde_json::json!(["p", "x"]));
    }

    #[test]
    fn handler_error_becomes_error_envelope() {
        let schema = schema();
        let ep = norm_endpoint();
        let handler = |_: Vec<Value>| -> anyhow::Result<Value> {
            anyhow::bail!("point rejected")
        };
        let out = invoke_json(&schema, &ep, &handler, &serde_json::json!({"p": {"x": 1, "y": 2}}));
        assert_eq!(out, ResultEnvelope::Error { error: "point rejected".into() });
        assert_eq!(out.http_status(), 500);
    }

    #[test]
    fn handler_panic_is_contained() {
        let schema = schema();
        let ep = norm_endpoint();
        let handler = |_: Vec<Value>| -> anyhow::Result<Value> { panic!("boom") };
        let out = invoke_json(&schema, &ep, &handler, &serde_json::json!({"p": {"x": 1, "y": 2}}));
        // the panic message itself never reaches the client
        assert_eq!(out, ResultEnvelope::Error { error: "internal error".into() });
    }

    #[test]
    fn wrong_return_type_is_an_internal_error() {
        let schema = schema();
        let ep = norm_endpoint();
        let handler = |_: Vec<Value>| -> anyhow::Result<Value> { Ok(Value::text("5")) };
        let out = invoke_json(&schema, &ep, &handler, &serde_json::json!({"p": {"x": 1, "y": 2}}));
        // no coercion on the way out: text "5" does not satisfy number
        assert_eq!(out, ResultEnvelope::Error { error: "internal error".into() });
    }

    #[test]
    fn form_entries_flatten_before_decoding() {
        let schema = schema();
        let ep = norm_endpoint();
        let out = invoke_form(
            &schema,
            &ep,
            &norm,
            vec![
                ("p.x".to_string(), Value::text("3")),
                ("p.y".to_string(), Value::text("4")),
            ],
        );
        assert_eq!(out, ResultEnvelope::Success { result: Value::Float(5.0) });
    }

    #[test]
    fn malformed_key_path_is_request_fatal() {
        let schema = schema();
        let ep = norm_endpoint();
        let out = invoke_form(
            &schema,
            &ep,
            &norm,
            vec![("[0]".to_string(), Value::text("x"))],
        );
        assert_eq!(out.http_status(), 500);
        assert!(matches!(out, ResultEnvelope::Error { .. }));
    }

    #[test]
    fn service_routes_by_namespace_and_name() {
        let schema = schema();
        let mut reg = EndpointRegistry::new();
        reg.register(norm_endpoint()).unwrap();

        let mut svc = Service::new(&schema, &reg);
        svc.handle("app", "norm", norm).unwrap();
        assert!(matches!(
            svc.handle("app", "nope", norm),
            Err(SchemaError::UnknownEndpoint { .. })
        ));

        let out = svc.call_json("app", "norm", &serde_json::json!({"p": {"x": 3, "y": 4}}));
        assert_eq!(out, ResultEnvelope::Success { result: Value::Float(5.0) });

        let out = svc.call_json("app", "missing", &serde_json::json!({}));
        assert!(matches!(out, ResultEnvelope::Error { .. }));
    }

    #[test]
    fn failure_envelope_wire_shape() {
        let schema = schema();
        let ep = norm_endpoint();
        let out = invoke_json(&schema, &ep, &norm, &serde_json::json!({}));
        let wire = serde_json::to_value(&out).unwrap();
        assert_eq!(wire["type"], "failure");
        assert_eq!(
            wire["errors"][0],
            serde_json::json!({"loc": ["p"], "msg": "field required", "type": "MissingField"})
        );
    }
}
