//! Record type definitions: attribute declarations, metatype inference, and
//! the per-application type registry.
//!
//! Every declaration resolves to exactly one metatype here, at definition
//! time; an unsupported declaration form is a [`DefinitionError`] and can
//! never surface at instance construction. Composite attributes name their
//! element type by key; the key must be registered already, or be the type
//! currently being defined (self-referential trees are legal).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::metatype::{Metatype, TypeKey};
use crate::value::Value;

pub type Validator = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;
pub type ToJsonHook = Arc<dyn Fn(&Value) -> Option<serde_json::Value> + Send + Sync>;
pub type ParseHook = Arc<dyn Fn(serde_json::Value) -> serde_json::Value + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("type `{type_name}` declares attribute `{attr}` twice")]
    DuplicateAttribute { type_name: String, attr: String },
    #[error("type `{type_name}` attribute `{attr}` has no metatype and no inferable default")]
    Uninferable { type_name: String, attr: String },
    #[error("type `{type_name}` attribute `{attr}` refers to unknown type `{key}`")]
    UnknownType {
        type_name: String,
        attr: String,
        key: String,
    },
    #[error("type `{0}` is already defined")]
    Redefined(String),
}

/// Default-value policy of one attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrDefault {
    /// No value; the attribute starts `Undefined`.
    Undefined,
    /// A concrete value, cloned per instance.
    Value(Value),
    /// Owned composites only: construct an empty child per instance.
    Construct,
}

/// Fully resolved attribute definition. Built once per record type and
/// shared by every instance through the schema `Arc`.
#[derive(Clone)]
pub struct AttrDef {
    pub name: String,
    pub metatype: Metatype,
    pub default: AttrDefault,
    pub required: bool,
    pub validate: Option<Validator>,
    pub to_json: Option<ToJsonHook>,
}

impl std::fmt::Debug for AttrDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttrDef")
            .field("name", &self.name)
            .field("metatype", &self.metatype)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("validate", &self.validate.is_some())
            .field("to_json", &self.to_json.is_some())
            .finish()
    }
}

/// Chainable attribute declaration, resolved into an [`AttrDef`] when the
/// schema is registered.
#[derive(Clone, Default)]
pub struct AttrSpec {
    metatype: Option<Metatype>,
    default: Option<AttrDefault>,
    required: bool,
    validate: Option<Validator>,
    to_json: Option<ToJsonHook>,
}

impl AttrSpec {
    pub fn number() -> Self {
        Self::of(Metatype::Number)
    }

    pub fn string() -> Self {
        Self::of(Metatype::Str)
    }

    pub fn boolean() -> Self {
        Self::of(Metatype::Bool)
    }

    pub fn date() -> Self {
        Self::of(Metatype::Date)
    }

    pub fn object() -> Self {
        Self::of(Metatype::Object)
    }

    pub fn array() -> Self {
        Self::of(Metatype::Array)
    }

    /// Owned nested record of the named type; defaults to constructing an
    /// empty child per instance.
    pub fn record_of(key: &str) -> Self {
        Self::of(Metatype::Record(TypeKey::from(key)))
    }

    /// Owned nested collection of records of the named type; defaults to an
    /// empty collection per instance.
    pub fn collection_of(key: &str) -> Self {
        Self::of(Metatype::Collection(TypeKey::from(key)))
    }

    /// Non-owning reference to a record or collection.
    pub fn shared() -> Self {
        Self::of(Metatype::Shared).value(Value::Null)
    }

    /// Opaque value attribute: no cast, identity change detection.
    pub fn any() -> Self {
        Self::of(Metatype::Any)
    }

    fn of(metatype: Metatype) -> Self {
        Self {
            metatype: Some(metatype),
            ..Self::default()
        }
    }

    /// Declares an attribute by a bare default value, inferring the metatype
    /// from the value's runtime kind.
    pub fn from_value(value: Value) -> Self {
        let metatype = infer_metatype(&value);
        Self {
            metatype,
            default: Some(AttrDefault::Value(value)),
            ..Self::default()
        }
    }

    pub fn value(mut self, value: Value) -> Self {
        self.default = Some(AttrDefault::Value(value));
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Appends a validation check; checks compose, first failure wins.
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        let next: Validator = Arc::new(check);
        self.validate = Some(match self.validate.take() {
            None => next,
            Some(prev) => Arc::new(move |value| prev(value).or_else(|| next(value))),
        });
        self
    }

    /// Overrides serialization of this attribute; returning `None` omits it.
    pub fn to_json_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value) -> Option<serde_json::Value> + Send + Sync + 'static,
    {
        self.to_json = Some(Arc::new(hook));
        self
    }

    fn resolve(self, type_name: &str, attr: &str) -> Result<AttrDef, DefinitionError> {
        let metatype = self.metatype.ok_or_else(|| DefinitionError::Uninferable {
            type_name: type_name.to_string(),
            attr: attr.to_string(),
        })?;
        let default = self.default.unwrap_or(match metatype {
            Metatype::Record(_) | Metatype::Collection(_) => AttrDefault::Construct,
            _ => AttrDefault::Undefined,
        });
        Ok(AttrDef {
            name: attr.to_string(),
            metatype,
            default,
            required: self.required,
            validate: self.validate,
            to_json: self.to_json,
        })
    }
}

/// Composite instances declared by bare value become shared references, the
/// rest infer their primitive/plain metatype; `Null`/`Undefined` defaults
/// carry no type information and fail at definition time.
fn infer_metatype(value: &Value) -> Option<Metatype> {
    match value {
        Value::Number(_) => Some(Metatype::Number),
        Value::Str(_) => Some(Metatype::Str),
        Value::Bool(_) => Some(Metatype::Bool),
        Value::Date(_) => Some(Metatype::Date),
        Value::Object(_) => Some(Metatype::Object),
        Value::Array(_) => Some(Metatype::Array),
        Value::Record(_) | Value::Collection(_) => Some(Metatype::Shared),
        Value::Undefined | Value::Null => None,
    }
}

/// One record type: name, identity attribute, ordered attribute definitions,
/// and the pluggable input transform.
pub struct RecordSchema {
    pub name: String,
    pub id_attribute: String,
    pub attrs: IndexMap<String, AttrDef>,
    pub parse: Option<ParseHook>,
}

impl std::fmt::Debug for RecordSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSchema")
            .field("name", &self.name)
            .field("id_attribute", &self.id_attribute)
            .field("attrs", &self.attrs.keys().collect::<Vec<_>>())
            .field("parse", &self.parse.is_some())
            .finish()
    }
}

impl RecordSchema {
    pub fn define(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: name.to_string(),
            id_attribute: "id".to_string(),
            attrs: Vec::new(),
            parse: None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&AttrDef> {
        self.attrs.get(name)
    }
}

pub struct SchemaBuilder {
    name: String,
    id_attribute: String,
    attrs: Vec<(String, AttrSpec)>,
    parse: Option<ParseHook>,
}

impl SchemaBuilder {
    /// Chooses the identity attribute (default `"id"`). Declared implicitly
    /// when the attribute map does not name it.
    pub fn id_attribute(mut self, name: &str) -> Self {
        self.id_attribute = name.to_string();
        self
    }

    pub fn attr(mut self, name: &str, spec: AttrSpec) -> Self {
        self.attrs.push((name.to_string(), spec));
        self
    }

    /// Pluggable raw-input transform, applied when a caller passes
    /// `parse: true`.
    pub fn parse_with<F>(mut self, hook: F) -> Self
    where
        F: Fn(serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.parse = Some(Arc::new(hook));
        self
    }

    /// Resolves every declaration and registers the schema. All definition
    /// failures happen here, never later.
    pub fn register(self, registry: &mut TypeRegistry) -> Result<Arc<RecordSchema>, DefinitionError> {
        if registry.types.contains_key(&self.name) {
            return Err(DefinitionError::Redefined(self.name));
        }
        let mut attrs: IndexMap<String, AttrDef> = IndexMap::new();
        for (name, spec) in self.attrs {
            if attrs.contains_key(&name) {
                return Err(DefinitionError::DuplicateAttribute {
                    type_name: self.name,
                    attr: name,
                });
            }
            let def = spec.resolve(&self.name, &name)?;
            if let Metatype::Record(key) | Metatype::Collection(key) = &def.metatype {
                if &**key != self.name && !registry.types.contains_key(&**key) {
                    return Err(DefinitionError::UnknownType {
                        type_name: self.name,
                        attr: name,
                        key: key.to_string(),
                    });
                }
            }
            attrs.insert(name, def);
        }
        if !attrs.contains_key(&self.id_attribute) {
            let def = AttrSpec::any().resolve(&self.name, &self.id_attribute)?;
            attrs.insert(self.id_attribute.clone(), def);
        }
        let schema = Arc::new(RecordSchema {
            name: self.name.clone(),
            id_attribute: self.id_attribute,
            attrs,
            parse: self.parse,
        });
        registry.types.insert(self.name, Arc::clone(&schema));
        Ok(schema)
    }
}

/// Explicit per-application registry: declared-type key to schema. Owned by
/// the store; there is no global registration anywhere.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<RecordSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Arc<RecordSchema>> {
        self.types.get(key)
    }
}
