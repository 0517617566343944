//! Canonical serialization and digests of signal data.
//!
//! Two logically identical signal sets must hash identically regardless of the
//! order in which their keys were inserted. Object keys are therefore sorted
//! before serialization while arrays keep their order.
//!
//! [`Signal`] is the value tree fed to the serializer. Besides plain JSON it
//! can hold [`SharedSignal`] nodes, reference-counted values with identity.
//! A shared node reached a second time within one traversal serializes as
//! `null`, which is what makes cyclic graphs terminate.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Largest integer a JSON number can carry without precision loss (2^53 - 1).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A signal value, possibly containing shared or cyclic nodes.
#[derive(Debug, Clone, Default)]
pub enum Signal {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// Ordered list.
    Array(Vec<Signal>),
    /// Object entries in insertion order. A repeated key keeps its last value.
    Object(Vec<(String, Signal)>),
    /// Node with identity, may be referenced from several places.
    Shared(SharedSignal),
}

/// Reference-counted signal node compared by identity.
///
/// Cloning a `SharedSignal` yields another handle to the same node. Nodes that
/// reference themselves form `Arc` cycles and are never freed; keep such graphs
/// short-lived.
#[derive(Clone, Default)]
pub struct SharedSignal(Arc<RwLock<Signal>>);

impl std::fmt::Debug for SharedSignal {
    // The node may contain itself, so only its identity is printed.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedSignal")
            .field(&format_args!("{:#x}", self.identity()))
            .finish()
    }
}

impl SharedSignal {
    /// Creates a node holding `value`.
    #[must_use]
    pub fn new(value: Signal) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Replaces the node's value. Used to close cycles after construction.
    pub fn set(&self, value: Signal) {
        if let Ok(mut guard) = self.0.write() {
            *guard = value;
        }
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl From<Value> for Signal {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<SharedSignal> for Signal {
    fn from(node: SharedSignal) -> Self {
        Self::Shared(node)
    }
}

impl Signal {
    /// Builds an object from `(key, value)` pairs, keeping their order.
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        )
    }

    /// Resolves shared nodes into a plain, acyclic JSON tree.
    ///
    /// Revisited shared nodes become `null`.
    #[must_use]
    pub fn to_canonical_value(&self) -> Value {
        let mut seen = HashSet::new();
        self.resolve(&mut seen)
    }

    fn resolve(&self, seen: &mut HashSet<usize>) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Array(items) => {
                Value::Array(items.iter().map(|item| item.resolve(seen)).collect())
            }
            Self::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.resolve(seen));
                }
                Value::Object(map)
            }
            Self::Shared(node) => {
                if !seen.insert(node.identity()) {
                    return Value::Null;
                }
                node.0
                    .read()
                    .map_or(Value::Null, |inner| inner.resolve(seen))
            }
        }
    }
}

/// Canonical string of a signal: sorted keys, ordered arrays, revisits as `null`.
#[must_use]
pub fn stable_stringify(signal: &Signal) -> String {
    canonical_json(&signal.to_canonical_value())
}

/// Canonical string of a plain JSON value.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // BTreeMap pins the order even when serde_json preserves insertion order.
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display of a JSON string value is its escaped, quoted form.
    let _ = write!(out, "{}", Value::from(s));
}

/// Integral floats are written as integers, the way a browser prints `1.0`.
#[allow(clippy::cast_possible_truncation)]
fn write_number(n: &Number, out: &mut String) {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
                let _ = write!(out, "{}", f as i64);
                return;
            }
        }
    }
    let _ = write!(out, "{n}");
}

/// SHA-256 of `input`, URL-safe base64 without padding.
#[must_use]
pub fn sha256_base64url(input: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_ref()))
}

/// Digest of the canonical form of a JSON value.
#[must_use]
pub fn digest_json(value: &Value) -> String {
    sha256_base64url(canonical_json(value))
}

/// Digest of the canonical form of a signal.
#[must_use]
pub fn digest_signal(signal: &Signal) -> String {
    sha256_base64url(stable_stringify(signal))
}
