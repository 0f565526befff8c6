//! Schema document loader: JSON files in, frozen schema + registry out.
//!
//! A document carries `records` and `endpoints` arrays. Several documents may
//! be merged; write-once record semantics make the merge order-insensitive
//! for identical definitions and loud for conflicting ones.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::model::{Record, Schema, SchemaBuilder, SchemaError, TypeNode};
use crate::registry::{Endpoint, EndpointRegistry};

#[derive(Debug, Default, Deserialize)]
pub struct SchemaDoc {
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Parse errors carry the JSON path to the offending node.
    #[error("at JSON path {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Deserialize one document with JSON-path context in error messages.
pub fn parse_doc(src: &str) -> Result<SchemaDoc, LoadError> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let path = err.path().to_string();
        LoadError::Parse { path, source: err.into_inner() }
    })
}

/// Merge documents and validate the whole: record cross-references, endpoint
/// parameter/return references, duplicate endpoints.
pub fn build(docs: impl IntoIterator<Item = SchemaDoc>) -> Result<(Schema, EndpointRegistry), LoadError> {
    let mut builder = SchemaBuilder::new();
    let mut registry = EndpointRegistry::new();
    for doc in docs {
        for record in doc.records {
            builder.define_record(record)?;
        }
        for endpoint in doc.endpoints {
            registry.register(endpoint)?;
        }
    }
    let schema = builder.freeze()?;

    // endpoint types resolve against the frozen record set
    for ep in registry.endpoints() {
        for p in &ep.params {
            check_refs(&schema, &p.ty)?;
        }
        check_refs(&schema, &ep.returns)?;
    }
    Ok((schema, registry))
}

fn check_refs(schema: &Schema, ty: &TypeNode) -> Result<(), SchemaError> {
    let mut missing: Option<String> = None;
    ty.walk_refs(&mut |name| {
        if missing.is_none() && !schema.contains(name) {
            missing = Some(name.to_string());
        }
    });
    match missing {
        Some(name) => Err(SchemaError::UnknownRecord(name)),
        None => Ok(()),
    }
}

/// Read, parse, and merge a set of document files in order.
pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<(Schema, EndpointRegistry), LoadError> {
    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        docs.push(parse_doc(&src)?);
    }
    build(docs)
}

// ------------------------------- Tests ------------------------------------ //
