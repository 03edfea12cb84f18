//! Attribute metatypes: per-attribute casting, change-detection, and
//! ownership-wiring policy.
//!
//! One closed variant set replaces the dynamic per-constructor dispatch of
//! the original system. A metatype is selected exactly once, at record-type
//! definition time, and stored in the attribute definition; nothing is
//! re-resolved per instance or per call.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::store::{Owner, Store};
use crate::value::{date_from_millis, Cid, Value};

/// Key of a record type in the [`TypeRegistry`](crate::schema::TypeRegistry).
pub type TypeKey = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metatype {
    /// `f64` primitive, identity change detection.
    Number,
    /// String primitive.
    Str,
    /// Boolean primitive.
    Bool,
    /// UTC timestamp; casts RFC 3339 strings and epoch-millisecond numbers.
    Date,
    /// Plain JSON object payload, deep-equality change detection.
    Object,
    /// Plain JSON array payload, deep-equality change detection.
    Array,
    /// Owned nested record of the named type. Deep-updatable.
    Record(TypeKey),
    /// Owned nested collection of records of the named type. Deep-updatable.
    Collection(TypeKey),
    /// Non-owning reference to a record or collection. Never constructs,
    /// never wires ownership, compares by node identity.
    Shared,
    /// Opaque value: no cast, identity comparison.
    Any,
}

/// A cast that could not be performed. Recovered locally: the attribute
/// keeps its previous value and the failure lands in the record's
/// validation state, never unwinding the surrounding batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot cast {got} to {expected}")]
pub struct CastError {
    pub expected: &'static str,
    pub got: &'static str,
}

fn cast_error(expected: &'static str, got: &Value) -> CastError {
    CastError {
        expected,
        got: got.kind(),
    }
}

impl Metatype {
    /// Whether a raw partial payload for this attribute is delegated to the
    /// existing child's own transaction instead of replacing the child.
    pub fn deep_update(&self) -> bool {
        matches!(self, Metatype::Record(_) | Metatype::Collection(_))
    }

    /// Whether `value` is already an acceptable stored form for this
    /// metatype, needing no cast and no construction.
    pub fn is_compatible(&self, value: &Value, store: &Store) -> bool {
        match self {
            Metatype::Number => matches!(value, Value::Undefined | Value::Null | Value::Number(_)),
            Metatype::Str => matches!(value, Value::Undefined | Value::Null | Value::Str(_)),
            Metatype::Bool => matches!(value, Value::Undefined | Value::Null | Value::Bool(_)),
            Metatype::Date => matches!(value, Value::Undefined | Value::Null | Value::Date(_)),
            Metatype::Object => matches!(value, Value::Undefined | Value::Null | Value::Object(_)),
            Metatype::Array => matches!(value, Value::Undefined | Value::Null | Value::Array(_)),
            Metatype::Record(key) => match value {
                Value::Undefined | Value::Null => true,
                Value::Record(cid) => store.record_type(*cid).is_some_and(|name| name == &**key),
                _ => false,
            },
            Metatype::Collection(key) => match value {
                Value::Undefined | Value::Null => true,
                Value::Collection(cid) => {
                    store.collection_type(*cid).is_some_and(|name| name == &**key)
                }
                _ => false,
            },
            Metatype::Shared | Metatype::Any => true,
        }
    }

    /// Casts an incoming value to the stored form. Pure except for the owned
    /// composite variants, which construct a brand-new child instance when
    /// the incoming value is not already a compatible instance; a compatible
    /// instance passes through unchanged, without a defensive copy.
    pub fn convert(&self, next: Value, store: &mut Store) -> Result<Value, CastError> {
        if matches!(next, Value::Undefined | Value::Null) {
            return Ok(next);
        }
        match self {
            Metatype::Number => match next {
                Value::Number(_) => Ok(next),
                Value::Str(ref s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| cast_error("number", &next)),
                Value::Bool(b) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
                Value::Date(d) => Ok(Value::Number(d.timestamp_millis() as f64)),
                other => Err(cast_error("number", &other)),
            },
            Metatype::Str => match next {
                Value::Str(_) => Ok(next),
                Value::Number(n) => Ok(Value::Str(match crate::value::number_to_json(n) {
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => n.to_string(),
                })),
                Value::Bool(b) => Ok(Value::Str(b.to_string())),
                Value::Date(d) => Ok(Value::Str(d.to_rfc3339())),
                other => Err(cast_error("string", &other)),
            },
            Metatype::Bool => match next {
                Value::Bool(_) => Ok(next),
                Value::Number(n) => Ok(Value::Bool(n != 0.0 && !n.is_nan())),
                Value::Str(s) => Ok(Value::Bool(!s.is_empty())),
                other => Err(cast_error("boolean", &other)),
            },
            Metatype::Date => match next {
                Value::Date(_) => Ok(next),
                Value::Number(ms) => date_from_millis(ms)
                    .map(Value::Date)
                    .ok_or(CastError {
                        expected: "date",
                        got: "number",
                    }),
                Value::Str(ref s) => chrono::DateTime::parse_from_rfc3339(s)
                    .map(|d| Value::Date(d.with_timezone(&chrono::Utc)))
                    .map_err(|_| cast_error("date", &next)),
                other => Err(cast_error("date", &other)),
            },
            Metatype::Object => match next {
                Value::Object(_) => Ok(next),
                other => Err(cast_error("object", &other)),
            },
            Metatype::Array => match next {
                Value::Array(_) => Ok(next),
                other => Err(cast_error("array", &other)),
            },
            Metatype::Record(key) => {
                if self.is_compatible(&next, store) {
                    return Ok(next);
                }
                match next {
                    Value::Object(map) => store
                        .create_record(key, serde_json::Value::Object(map))
                        .map(Value::Record)
                        .map_err(|_| CastError {
                            expected: "record",
                            got: "object",
                        }),
                    other => Err(cast_error("record", &other)),
                }
            }
            Metatype::Collection(key) => {
                if self.is_compatible(&next, store) {
                    return Ok(next);
                }
                match next {
                    Value::Array(items) => store
                        .create_collection(key, &items)
                        .map(Value::Collection)
                        .map_err(|_| CastError {
                            expected: "collection",
                            got: "array",
                        }),
                    other => Err(cast_error("collection", &other)),
                }
            }
            Metatype::Shared | Metatype::Any => Ok(next),
        }
    }

    /// Change detection. `Undefined` is distinct from `Null` and from every
    /// defined value; primitives and node references compare by identity,
    /// plain object/array payloads by deep equality.
    pub fn is_changed(&self, next: &Value, prev: &Value) -> bool {
        match self {
            Metatype::Object | Metatype::Array => next != prev,
            _ => !next.same(prev),
        }
    }

    /// Side effects of "this value became the new value of this attribute".
    /// Invoked only after the value has been stored, and only when
    /// [`is_changed`](Self::is_changed) reported a change. The owned
    /// composite variants move the ownership link here; everything else is
    /// inert.
    pub fn handle_change(
        &self,
        store: &mut Store,
        record: Cid,
        name: &str,
        next: &Value,
        prev: &Value,
    ) {
        if !matches!(self, Metatype::Record(_) | Metatype::Collection(_)) {
            return;
        }
        let owner = Owner::Attr {
            record,
            name: name.to_string(),
        };
        match prev {
            Value::Record(old) | Value::Collection(old) => store.release(*old, &owner),
            _ => {}
        }
        match next {
            Value::Record(child) | Value::Collection(child) => {
                if let Err(stolen_from) = store.claim(*child, owner) {
                    warn!(
                        child = %child,
                        attr = name,
                        previous_owner = ?stolen_from,
                        "re-parenting node that already had an owner"
                    );
                }
            }
            _ => {}
        }
    }
}
