//! Runtime attribute values and identity keys.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value as Json;

/// Process-unique client id. Assigned to every record and collection node
/// from a monotonic per-[`Store`](crate::store::Store) counter, present
/// before (and independently of) any domain id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(pub(crate) u64);

impl Cid {
    /// Raw key used for listener tables.
    pub fn key(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Dynamic value of one record attribute.
///
/// `Undefined` ("no value") is distinct from `Null` and from every defined
/// value; change detection never conflates the two. Plain `Object`/`Array`
/// payloads carry raw JSON; nested records and collections are held by
/// reference into the store, never inline.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Date(DateTime<Utc>),
    Object(serde_json::Map<String, Json>),
    Array(Vec<Json>),
    Record(Cid),
    Collection(Cid),
}

impl Value {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Collection(_) => "collection",
        }
    }

    /// Identity comparison used by change detection. Equivalent to `==`
    /// except that two NaN numbers compare as the same value, so a NaN
    /// attribute cannot re-dirty itself on every write.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits() || a == b,
            _ => self == other,
        }
    }

    /// Maps raw JSON into a value. Dates never come from JSON directly; the
    /// date metatype casts strings and epoch numbers on conversion.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Object(map) => Value::Object(map.clone()),
            Json::Array(items) => Value::Array(items.clone()),
        }
    }

    /// Scalar serialization for everything that does not need store access.
    /// Node references are serialized by the store, which owns the nodes.
    pub(crate) fn scalar_to_json(&self) -> Option<Json> {
        match self {
            Value::Undefined => None,
            Value::Null => Some(Json::Null),
            Value::Bool(b) => Some(Json::Bool(*b)),
            Value::Number(n) => Some(number_to_json(*n)),
            Value::Str(s) => Some(Json::String(s.clone())),
            Value::Date(d) => Some(Json::String(d.to_rfc3339())),
            Value::Object(map) => Some(Json::Object(map.clone())),
            Value::Array(items) => Some(Json::Array(items.clone())),
            Value::Record(_) | Value::Collection(_) => None,
        }
    }

    /// Ordering used by attribute/key comparators. Mixed kinds order by kind
    /// rank; NaN sorts after every number.
    pub fn cmp_sort(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => {
                a.partial_cmp(b).unwrap_or_else(|| match (a.is_nan(), b.is_nan()) {
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    _ => Ordering::Equal,
                })
            }
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Undefined => 0,
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Number(_) => 3,
            Value::Date(_) => 4,
            Value::Str(_) => 5,
            Value::Object(_) => 6,
            Value::Array(_) => 7,
            Value::Record(_) => 8,
            Value::Collection(_) => 9,
        }
    }
}

pub(crate) fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < (i64::MAX as f64) {
        Json::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

pub(crate) fn date_from_millis(ms: f64) -> Option<DateTime<Utc>> {
    if !ms.is_finite() {
        return None;
    }
    Utc.timestamp_millis_opt(ms as i64).single()
}

/// Hashable canonical form of a domain id. `Undefined` and `Null` ids are
/// never indexed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdKey {
    Int(i64),
    Bits(u64),
    Str(String),
    Bool(bool),
}

impl IdKey {
    pub fn of(value: &Value) -> Option<IdKey> {
        match value {
            Value::Number(n) => Some(Self::of_number(*n)),
            Value::Str(s) => Some(IdKey::Str(s.clone())),
            Value::Bool(b) => Some(IdKey::Bool(*b)),
            _ => None,
        }
    }

    pub fn of_json(json: &Json) -> Option<IdKey> {
        match json {
            Json::Number(n) => n.as_f64().map(Self::of_number),
            Json::String(s) => Some(IdKey::Str(s.clone())),
            Json::Bool(b) => Some(IdKey::Bool(*b)),
            _ => None,
        }
    }

    fn of_number(n: f64) -> IdKey {
        if n.fract() == 0.0 && n.is_finite() && n.abs() < (i64::MAX as f64) {
            IdKey::Int(n as i64)
        } else {
            IdKey::Bits(n.to_bits())
        }
    }
}

impl std::fmt::Display for IdKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKey::Int(n) => write!(f, "{n}"),
            IdKey::Bits(bits) => write!(f, "{}", f64::from_bits(*bits)),
            IdKey::Str(s) => write!(f, "{s}"),
            IdKey::Bool(b) => write!(f, "{b}"),
        }
    }
}
