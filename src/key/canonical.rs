//! Canonical serialization of structured key material.
//!
//! [`canonicalize`] turns a [`KeyValue`] tree into a stable byte sequence
//! suitable for hashing:
//!
//! - object keys are sorted, so insertion order never matters;
//! - [`KeyValue::Absent`] fields are dropped from objects, so adding an
//!   unset optional field never changes the output;
//! - timestamps are written as RFC 3339 UTC strings with millisecond
//!   precision, so the same instant in any offset canonicalizes identically;
//! - arrays keep their order;
//! - numbers with no fractional part are written as integers (`1.0` == `1`).
//!
//! Shared nodes ([`SharedNode`]) can form cycles. The canonicalizer
//! remembers every node it has entered and writes [`CIRCULAR_MARKER`] in
//! place of any later visit, so output is always finite. A node reached
//! twice without a cycle is also written as the marker on its second visit.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Number;

use crate::Result;

/// Marker written in place of a node that is already being serialized.
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Largest integer-valued float written in integer form (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Structured key material.
///
/// Mirrors a JSON value with two additions: [`Absent`](Self::Absent) for
/// unset optional fields and [`Shared`](Self::Shared) for reference-shared
/// (possibly cyclic) nodes.
#[derive(Debug, Clone, Default)]
pub enum KeyValue {
    /// An unset field. Dropped from objects, written as `null` elsewhere.
    #[default]
    Absent,
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Timestamp(DateTime<Utc>),
    Array(Vec<KeyValue>),
    /// Fields in insertion order. Duplicate keys resolve to the last one.
    Object(Vec<(String, KeyValue)>),
    Shared(SharedNode),
}

impl KeyValue {
    /// Build an object from `(key, value)` pairs.
    pub fn object<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<KeyValue>,
    {
        KeyValue::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build an array from any iterator of convertible values.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<KeyValue>,
    {
        KeyValue::Array(items.into_iter().map(Into::into).collect())
    }

    /// Convert any serde-serializable value.
    ///
    /// Fails when the value cannot be represented as JSON (e.g. a map with
    /// non-string keys). That is a programming error in the caller, and is
    /// surfaced instead of producing a lossy key.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, KeyValue::Absent)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::String(v.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::String(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Number(v.into())
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Number(v.into())
    }
}

impl From<u32> for KeyValue {
    fn from(v: u32) -> Self {
        KeyValue::Number(v.into())
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        KeyValue::Number(v.into())
    }
}

impl From<f64> for KeyValue {
    /// Non-finite floats have no JSON form and become `Null`.
    fn from(v: f64) -> Self {
        Number::from_f64(v).map_or(KeyValue::Null, KeyValue::Number)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for KeyValue {
    fn from(v: DateTime<Tz>) -> Self {
        KeyValue::Timestamp(v.with_timezone(&Utc))
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(KeyValue::Absent, Into::into)
    }
}

impl From<Vec<KeyValue>> for KeyValue {
    fn from(v: Vec<KeyValue>) -> Self {
        KeyValue::Array(v)
    }
}

impl From<SharedNode> for KeyValue {
    fn from(v: SharedNode) -> Self {
        KeyValue::Shared(v)
    }
}

impl From<serde_json::Value> for KeyValue {
    fn from(v: serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(b),
            Value::Number(n) => KeyValue::Number(n),
            Value::String(s) => KeyValue::String(s),
            Value::Array(items) => KeyValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                KeyValue::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// A reference-shared, mutable node.
///
/// Cloning a `SharedNode` clones the reference, not the contents, so a node
/// can be placed inside itself to build a cyclic graph. Identity (not
/// contents) is what the canonicalizer uses for cycle detection.
#[derive(Clone, Default)]
pub struct SharedNode(Arc<RwLock<KeyValue>>);

impl SharedNode {
    pub fn new(value: impl Into<KeyValue>) -> Self {
        Self(Arc::new(RwLock::new(value.into())))
    }

    /// Replace the node's contents.
    pub fn set(&self, value: impl Into<KeyValue>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = value.into();
    }

    /// Set a field on an object node, replacing an existing field of the
    /// same name.
    ///
    /// Returns `false` (and changes nothing) if the node is not an object.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<KeyValue>) -> bool {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        let KeyValue::Object(fields) = &mut *guard else {
            return false;
        };
        let key = key.into();
        let value = value.into();
        match fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => fields.push((key, value)),
        }
        true
    }

    /// Append to an array node. Returns `false` if the node is not an array.
    pub fn push(&self, value: impl Into<KeyValue>) -> bool {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        match &mut *guard {
            KeyValue::Array(items) => {
                items.push(value.into());
                true
            }
            _ => false,
        }
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for SharedNode {
    // Contents may be cyclic; print identity only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedNode({:#x})", self.id())
    }
}

/// Serialize a value into its canonical byte form.
///
/// Pure and total: every finite graph, cyclic or not, produces a finite
/// output.
pub fn canonicalize(value: &KeyValue) -> Vec<u8> {
    let mut out = String::new();
    let mut visited = HashSet::new();
    write_value(value, &mut out, &mut visited);
    out.into_bytes()
}

fn write_value(value: &KeyValue, out: &mut String, visited: &mut HashSet<usize>) {
    match value {
        KeyValue::Absent | KeyValue::Null => out.push_str("null"),
        KeyValue::Bool(true) => out.push_str("true"),
        KeyValue::Bool(false) => out.push_str("false"),
        KeyValue::Number(n) => write_number(n, out),
        KeyValue::String(s) => write_string(s, out),
        KeyValue::Timestamp(t) => {
            write_string(&t.to_rfc3339_opts(SecondsFormat::Millis, true), out)
        }
        KeyValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out, visited);
            }
            out.push(']');
        }
        KeyValue::Object(fields) => {
            // Collect before dropping absent fields so a later absent value
            // still overrides an earlier duplicate.
            let sorted: BTreeMap<&str, &KeyValue> =
                fields.iter().map(|(k, v)| (k.as_str(), v)).collect();
            out.push('{');
            let present = sorted.into_iter().filter(|(_, v)| !v.is_absent());
            for (i, (k, v)) in present.enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(k, out);
                out.push(':');
                write_value(v, out, visited);
            }
            out.push('}');
        }
        KeyValue::Shared(node) => {
            if !visited.insert(node.id()) {
                write_string(CIRCULAR_MARKER, out);
                return;
            }
            let guard = node.0.read().unwrap_or_else(PoisonError::into_inner);
            write_value(&guard, out, visited);
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&f.to_string());
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}
