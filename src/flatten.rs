//! Key-path flattener: rebuild nested structures from flat form submissions.
//!
//! Form bodies arrive as an ordered list of `(key, value)` pairs. Keys may be
//! dotted (`a.b.c`) or PHP/jQuery bracket style (`columns[0][search][value]`,
//! `tags[]`); repeated full keys model multi-select/checkbox groups.
//!
//! Transitions are explicit and validated: scalar → list promotion on a
//! repeated key is the only allowed widening; an object/scalar collision is
//! always an error, never a silent overwrite. The whole call fails atomically
//! on the first malformed path.

use indexmap::IndexMap;

use crate::value::Value;

/// Request-time, fatal for the request: surfaced as an `error` envelope.
#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("malformed key path `{key}`: {reason}")]
    MalformedKeyPath { key: String, reason: String },
}

fn malformed(key: &str, reason: impl Into<String>) -> FlattenError {
    FlattenError::MalformedKeyPath { key: key.to_string(), reason: reason.into() }
}

// ----------------------------- Key parsing -------------------------------- //

#[derive(Clone, Debug, PartialEq)]
enum Seg {
    Key(String),
    Index(usize),
    /// From `a[]`: append to the list at this position.
    Append,
}

/// Split a raw form key into path segments. The part before the first bracket
/// may itself be dotted; bracket contents are taken verbatim.
fn key_segments(key: &str) -> Result<Vec<Seg>, FlattenError> {
    let (head, mut rest) = match key.find('[') {
        Some(pos) => key.split_at(pos),
        None => (key, ""),
    };
    if head.is_empty() {
        return Err(malformed(key, "key must not start with a bracket"));
    }

    // dotted segments are always map keys; only bracket contents can index
    let mut segs: Vec<Seg> = head.split('.').map(|s| Seg::Key(s.to_string())).collect();

    while !rest.is_empty() {
        let Some(inner) = rest.strip_prefix('[') else {
            return Err(malformed(key, "unexpected text after `]`"));
        };
        let Some(close) = inner.find(']') else {
            return Err(malformed(key, "unclosed `[`"));
        };
        let seg = &inner[..close];
        if seg.is_empty() {
            segs.push(Seg::Append);
        } else {
            segs.push(to_seg(seg));
        }
        rest = &inner[close + 1..];
    }
    Ok(segs)
}

fn to_seg(s: &str) -> Seg {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        match s.parse::<usize>() {
            Ok(i) => Seg::Index(i),
            Err(_) => Seg::Key(s.to_string()),
        }
    } else {
        Seg::Key(s.to_string())
    }
}

// ------------------------------- Flatten ---------------------------------- //

/// Reconstruct a nested map from flat `(key, value)` entries, in order.
pub fn flatten<I>(entries: I) -> Result<IndexMap<String, Value>, FlattenError>
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut root = Value::Map(IndexMap::new());
    for (key, value) in entries {
        let segs = key_segments(&key)?;
        insert(&mut root, &segs, value, &key)?;
    }
    match root {
        Value::Map(m) => Ok(m),
        _ => unreachable!("root stays a map"),
    }
}

/// Placeholder for the container a segment wants to descend into.
fn container_for(seg: &Seg) -> Value {
    match seg {
        Seg::Key(_) => Value::Map(IndexMap::new()),
        Seg::Index(_) | Seg::Append => Value::List(Vec::new()),
    }
}

fn insert(target: &mut Value, segs: &[Seg], value: Value, fullkey: &str) -> Result<(), FlattenError> {
    let (head, rest) = segs.split_first().expect("segments are never empty");
    match (target, head) {
        (Value::Map(map), Seg::Key(k)) => {
            if rest.is_empty() {
                return set_leaf(map, k, value, fullkey);
            }
            let slot = map
                .entry(k.clone())
                .or_insert_with(|| container_for(&rest[0]));
            check_container(slot, &rest[0], fullkey)?;
            insert(slot, rest, value, fullkey)
        }
        (Value::List(list), Seg::Index(i)) => {
            // pad with empty maps, like PHP-style form encoders expect
            while list.len() <= *i {
                list.push(Value::Map(IndexMap::new()));
            }
            if rest.is_empty() {
                list[*i] = value;
                return Ok(());
            }
            let slot = &mut list[*i];
            check_container(slot, &rest[0], fullkey)?;
            insert(slot, rest, value, fullkey)
        }
        (Value::List(list), Seg::Append) => {
            if rest.is_empty() {
                list.push(value);
                return Ok(());
            }
            list.push(container_for(&rest[0]));
            let slot = list.last_mut().expect("just pushed");
            insert(slot, rest, value, fullkey)
        }
        (other, Seg::Key(_)) => Err(malformed(
            fullkey,
            format!("cannot descend into {} with a named segment", other.kind_name()),
        )),
        (other, _) => Err(malformed(
            fullkey,
            format!("cannot index into {}", other.kind_name()),
        )),
    }
}

/// A freshly-created or pre-existing slot must match the container kind the
/// next segment needs; a scalar (or wrong container) in the way is an error.
fn check_container(slot: &Value, next: &Seg, fullkey: &str) -> Result<(), FlattenError> {
    let ok = match next {
        Seg::Key(_) => matches!(slot, Value::Map(_)),
        Seg::Index(_) | Seg::Append => matches!(slot, Value::List(_)),
    };
    if ok {
        Ok(())
    } else {
        Err(malformed(
            fullkey,
            format!("path segment already holds a {}", slot.kind_name()),
        ))
    }
}

/// Leaf write with the multi-value accumulation rules: first occurrence sets a
/// scalar, the second promotes to a 2-element list, further ones append.
fn set_leaf(
    map: &mut IndexMap<String, Value>,
    key: &str,
    value: Value,
    fullkey: &str,
) -> Result<(), FlattenError> {
    match map.get_mut(key) {
        None => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Some(Value::List(xs)) => {
            xs.push(value);
            Ok(())
        }
        Some(Value::Map(_)) => Err(malformed(
            fullkey,
            "key already holds an object".to_string(),
        )),
        Some(slot) => {
            let first = std::mem::replace(slot, Value::Null);
            *slot = Value::List(vec![first, value]);
            Ok(())
        }
    }
}

// ---------------------------- Dotted inverse ------------------------------ //

/// Flatten a nested map back into dotted `(key, value)` entries. Lists are
/// left in place (they round-trip through the repeated-key rule).
pub fn dotted_entries(map: &IndexMap<String, Value>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, val) in map {
        match val {
            Value::Map(inner) => {
                for (k, v) in dotted_entries(inner) {
                    out.push((format!("{key}.{k}"), v));
                }
            }
            other => out.push((key.clone(), other.clone())),
        }
    }
    out
}

// ------------------------------- Tests ------------------------------------ //
