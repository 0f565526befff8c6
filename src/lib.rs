//! Typed endpoint bridge: declare records and endpoints once, emit TypeScript
//! declarations for clients, and decode/validate incoming request bodies
//! against the same declarations.
//!
//! Design goals:
//! - Single source of truth: the frozen [`model::Schema`] feeds both the
//!   [`emit`] code generator and the [`decode`] request validator, so the
//!   emitted client types and the server's accepted inputs cannot drift.
//! - Deterministic output: record and field order is insertion order, emission
//!   is byte-identical across runs.
//! - Exhaustive diagnostics: a request either decodes fully or reports every
//!   offending field at once, never just the first.

pub mod cli;
pub mod decode;
pub mod emit;
pub mod envelope;
pub mod flatten;
pub mod loader;
pub mod model;
pub mod registry;
pub mod value;
