//! The store: an arena owning every record and collection node.
//!
//! All nodes live in id-keyed maps; the ownership tree is plain data on the
//! nodes (a child's backlink to its owner is an index used to route dirty
//! signals, never a second strong reference). External callers mutate nodes
//! only through the store's operations, `&mut Store` being the single unit
//! of exclusive access.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use recast_events::Emitter;
use serde_json::Value as Json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::collection::Comparator;
use crate::events::Event;
use crate::schema::{AttrDefault, RecordSchema, TypeRegistry};
use crate::transaction::{CollectionTxn, RecordTxn};
use crate::value::{Cid, IdKey, Value};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("unknown record {0}")]
    UnknownRecord(Cid),
    #[error("unknown collection {0}")]
    UnknownCollection(Cid),
}

/// An element that could not be turned into a valid record. During
/// collection reconciliation this aborts the remaining unapplied portion of
/// the batch; already-applied operations stand.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("unknown record type `{0}`")]
    UnknownType(String),
    #[error("record payload must be an object, got {0}")]
    Malformed(&'static str),
    #[error("expected a record of type `{expected}`, got `{got}`")]
    WrongType { expected: String, got: String },
}

/// Recognized options for `set`/`add`/`remove`/`reset`/`sort`.
#[derive(Debug, Clone)]
pub struct Options {
    /// Suppress every notification for this call. Mutation and ownership
    /// side effects still apply.
    pub silent: bool,
    /// Run raw input through the schema's parse transform first.
    pub parse: bool,
    /// Collection `set` only: `false` disables implicit structural removal,
    /// turning the call into a merge/add.
    pub remove: bool,
    /// Insertion index for push/unshift-style adds.
    pub at: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            silent: false,
            parse: false,
            remove: true,
            at: None,
        }
    }
}

/// The forward-owning edge, stored on the child as a backlink. A node has at
/// most one owner at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Owned through a record attribute.
    Attr { record: Cid, name: String },
    /// Owned through collection membership.
    Collection(Cid),
}

#[derive(Debug)]
pub(crate) struct RecordNode {
    pub schema: Arc<RecordSchema>,
    pub attributes: IndexMap<String, Value>,
    pub txn: Option<RecordTxn>,
    pub owner: Option<Owner>,
    pub validation: IndexMap<String, String>,
}

#[derive(Debug)]
pub(crate) struct CollectionNode {
    pub schema: Arc<RecordSchema>,
    pub models: Vec<Cid>,
    pub by_id: HashMap<IdKey, Cid>,
    pub comparator: Option<Comparator>,
    pub txn: Option<CollectionTxn>,
    pub owner: Option<Owner>,
}

#[derive(Debug)]
pub struct Store {
    pub(crate) registry: TypeRegistry,
    pub(crate) records: HashMap<Cid, RecordNode>,
    pub(crate) collections: HashMap<Cid, CollectionNode>,
    pub(crate) hub: Emitter<Store, Event>,
    next_cid: u64,
}

impl Store {
    pub fn new(registry: TypeRegistry) -> Self {
        Self {
            registry,
            records: HashMap::new(),
            collections: HashMap::new(),
            hub: Emitter::new(),
            next_cid: 1,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    fn alloc_cid(&mut self) -> Cid {
        let cid = Cid(self.next_cid);
        self.next_cid += 1;
        cid
    }

    pub(crate) fn rec(&self, cid: Cid) -> Result<&RecordNode, StoreError> {
        self.records.get(&cid).ok_or(StoreError::UnknownRecord(cid))
    }

    pub(crate) fn rec_mut(&mut self, cid: Cid) -> Result<&mut RecordNode, StoreError> {
        self.records
            .get_mut(&cid)
            .ok_or(StoreError::UnknownRecord(cid))
    }

    pub(crate) fn col(&self, cid: Cid) -> Result<&CollectionNode, StoreError> {
        self.collections
            .get(&cid)
            .ok_or(StoreError::UnknownCollection(cid))
    }

    pub(crate) fn col_mut(&mut self, cid: Cid) -> Result<&mut CollectionNode, StoreError> {
        self.collections
            .get_mut(&cid)
            .ok_or(StoreError::UnknownCollection(cid))
    }

    pub fn is_record(&self, cid: Cid) -> bool {
        self.records.contains_key(&cid)
    }

    pub fn is_collection(&self, cid: Cid) -> bool {
        self.collections.contains_key(&cid)
    }

    /// Type name of a record node.
    pub fn record_type(&self, cid: Cid) -> Option<&str> {
        self.records.get(&cid).map(|n| n.schema.name.as_str())
    }

    /// Model type name of a collection node.
    pub fn collection_type(&self, cid: Cid) -> Option<&str> {
        self.collections.get(&cid).map(|n| n.schema.name.as_str())
    }

    pub fn owner_of(&self, cid: Cid) -> Option<&Owner> {
        self.records
            .get(&cid)
            .map(|n| n.owner.as_ref())
            .or_else(|| self.collections.get(&cid).map(|n| n.owner.as_ref()))
            .flatten()
    }

    /// The collection a record currently belongs to, when its owner is one.
    pub fn collection_of(&self, record: Cid) -> Option<Cid> {
        match self.owner_of(record) {
            Some(Owner::Collection(col)) => Some(*col),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Constructs a record of the named type from a JSON payload (`null` for
    /// an all-defaults instance). No notifications fire during construction.
    pub fn create_record(&mut self, type_key: &str, attrs: Json) -> Result<Cid, ConstructionError> {
        let schema = self
            .registry
            .get(type_key)
            .cloned()
            .ok_or_else(|| ConstructionError::UnknownType(type_key.to_string()))?;
        let mut payload = match attrs {
            Json::Null => serde_json::Map::new(),
            Json::Object(map) => map,
            other => return Err(ConstructionError::Malformed(json_kind(&other))),
        };

        let cid = self.alloc_cid();
        let attributes: IndexMap<String, Value> = schema
            .attrs
            .keys()
            .map(|name| (name.clone(), Value::Undefined))
            .collect();
        self.records.insert(
            cid,
            RecordNode {
                schema: Arc::clone(&schema),
                attributes,
                txn: None,
                owner: None,
                validation: IndexMap::new(),
            },
        );

        for def in schema.attrs.values() {
            let raw = match payload.remove(&def.name) {
                Some(json) => Value::from_json(&json),
                None => match &def.default {
                    AttrDefault::Undefined => Value::Undefined,
                    AttrDefault::Value(v) => v.clone(),
                    AttrDefault::Construct => match self.construct_default(&def.metatype) {
                        Ok(v) => v,
                        Err(err) => {
                            self.records.remove(&cid);
                            return Err(err);
                        }
                    },
                },
            };
            let value = match def.metatype.convert(raw, self) {
                Ok(v) => v,
                Err(cast) => {
                    if let Some(node) = self.records.get_mut(&cid) {
                        node.validation.insert(def.name.clone(), cast.to_string());
                    }
                    continue;
                }
            };
            if let Some(message) = crate::record::validate(def, &value) {
                if let Some(node) = self.records.get_mut(&cid) {
                    node.validation.insert(def.name.clone(), message);
                }
                continue;
            }
            if value.is_defined() {
                if let Some(node) = self.records.get_mut(&cid) {
                    node.attributes.insert(def.name.clone(), value.clone());
                }
                def.metatype
                    .handle_change(self, cid, &def.name, &value, &Value::Undefined);
            }
        }

        for skipped in payload.keys() {
            warn!(record = %cid, attr = %skipped, "unknown attribute in payload, skipped");
        }
        Ok(cid)
    }

    /// Constructs a collection of the named model type, optionally populated
    /// from raw elements. No notifications fire during construction.
    pub fn create_collection(
        &mut self,
        type_key: &str,
        elements: &[Json],
    ) -> Result<Cid, ConstructionError> {
        let schema = self
            .registry
            .get(type_key)
            .cloned()
            .ok_or_else(|| ConstructionError::UnknownType(type_key.to_string()))?;
        let cid = self.alloc_cid();
        self.collections.insert(
            cid,
            CollectionNode {
                schema,
                models: Vec::new(),
                by_id: HashMap::new(),
                comparator: None,
                txn: None,
                owner: None,
            },
        );
        if !elements.is_empty() {
            let elements: Vec<crate::collection::Element> =
                elements.iter().cloned().map(crate::collection::Element::Json).collect();
            if let Err(err) = crate::collection::set::populate(self, cid, elements) {
                self.collections.remove(&cid);
                return Err(err);
            }
        }
        Ok(cid)
    }

    fn construct_default(&mut self, metatype: &crate::metatype::Metatype) -> Result<Value, ConstructionError> {
        match metatype {
            crate::metatype::Metatype::Record(key) => {
                self.create_record(key, Json::Null).map(Value::Record)
            }
            crate::metatype::Metatype::Collection(key) => {
                self.create_collection(key, &[]).map(Value::Collection)
            }
            _ => Ok(Value::Undefined),
        }
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Makes `owner` the single owner of `child`. If the child was owned by
    /// a collection, it leaves that collection's membership and index; the
    /// previous owner is returned so callers can report the re-parenting.
    pub(crate) fn claim(&mut self, child: Cid, owner: Owner) -> Result<(), Owner> {
        let previous = self.owner_slot(child).cloned();
        match previous {
            None => {
                self.set_owner(child, Some(owner));
                Ok(())
            }
            Some(prev) if prev == owner => Ok(()),
            Some(prev) => {
                if let Owner::Collection(col) = &prev {
                    self.detach_member(*col, child);
                    debug!(child = %child, collection = %col, "record moved out of collection");
                }
                self.set_owner(child, Some(owner));
                Err(prev)
            }
        }
    }

    /// Clears the ownership link when it still points at `expected`.
    pub(crate) fn release(&mut self, child: Cid, expected: &Owner) {
        if self.owner_slot(child) == Some(expected) {
            self.set_owner(child, None);
        }
    }

    fn owner_slot(&self, cid: Cid) -> Option<&Owner> {
        self.owner_of(cid)
    }

    fn set_owner(&mut self, cid: Cid, owner: Option<Owner>) {
        if let Some(node) = self.records.get_mut(&cid) {
            node.owner = owner;
        } else if let Some(node) = self.collections.get_mut(&cid) {
            node.owner = owner;
        }
    }

    /// Silent structural removal used when a record is re-parented away from
    /// a collection mid-operation.
    fn detach_member(&mut self, col: Cid, record: Cid) {
        if let Some(node) = self.collections.get_mut(&col) {
            node.models.retain(|m| *m != record);
            node.by_id.retain(|_, v| *v != record);
        }
    }
}

pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
