//! Record operations: the attribute set path, validation state,
//! serialization, and cloning.

use indexmap::IndexMap;
use serde_json::Value as Json;
use tracing::{error, warn};

use crate::schema::AttrDef;
use crate::store::{Options, Store, StoreError};
use crate::transaction::{begin_record, commit_record, Nested, Transaction};
use crate::value::{Cid, Value};

impl Store {
    /// Batch attribute write. The payload must be a JSON object; entries
    /// apply in payload order, unknown names are skipped. One transaction
    /// covers the whole batch: one `change:<name>` per changed attribute,
    /// then at most one `change` for the record.
    pub fn set(&mut self, record: Cid, attrs: Json, options: &Options) -> Result<(), StoreError> {
        let attrs = if options.parse {
            self.apply_parse(record, attrs)?
        } else {
            attrs
        };
        let Json::Object(map) = attrs else {
            error!(record = %record, "set payload must be an object");
            return Ok(());
        };
        let entries = map
            .iter()
            .map(|(name, json)| (name.clone(), Value::from_json(json)))
            .collect();
        self.set_values(record, entries, options)
    }

    /// Single-attribute fast path.
    pub fn set_attr(
        &mut self,
        record: Cid,
        name: &str,
        value: Value,
        options: &Options,
    ) -> Result<(), StoreError> {
        self.set_values(record, vec![(name.to_string(), value)], options)
    }

    /// Batch write of already-cast-free runtime values (use this to assign
    /// node references, which JSON cannot express).
    pub fn set_values(
        &mut self,
        record: Cid,
        entries: Vec<(String, Value)>,
        options: &Options,
    ) -> Result<(), StoreError> {
        let txn = set_transaction(self, record, entries, options)?;
        txn.commit(self, options);
        Ok(())
    }

    /// Runs `f` inside one transaction on `record`: every write `f` makes on
    /// that record coalesces into a single `change`.
    pub fn transaction<F>(&mut self, record: Cid, options: &Options, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Store),
    {
        self.rec(record)?;
        let is_root = begin_record(self, record);
        f(self);
        if is_root {
            commit_record(self, record, options);
        }
        Ok(())
    }

    pub fn get(&self, record: Cid, name: &str) -> Option<&Value> {
        self.rec(record).ok()?.attributes.get(name)
    }

    /// Value of the declared id attribute, once known. `Undefined` and
    /// `Null` ids read as "not yet known".
    pub fn id_of(&self, record: Cid) -> Option<&Value> {
        let node = self.rec(record).ok()?;
        match node.attributes.get(&node.schema.id_attribute) {
            Some(Value::Undefined) | Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Whether `name` changed during the currently open transaction.
    pub fn has_changed(&self, record: Cid, name: &str) -> bool {
        let Ok(node) = self.rec(record) else {
            return false;
        };
        let Some(txn) = node.txn.as_ref() else {
            return false;
        };
        let prev = txn.previous.get(name).unwrap_or(&Value::Undefined);
        let now = node.attributes.get(name).unwrap_or(&Value::Undefined);
        !prev.same(now)
    }

    /// Snapshot value of `name` at transaction start; `None` outside of a
    /// transaction.
    pub fn previous(&self, record: Cid, name: &str) -> Option<Value> {
        let node = self.rec(record).ok()?;
        let txn = node.txn.as_ref()?;
        Some(txn.previous.get(name).cloned().unwrap_or(Value::Undefined))
    }

    /// Per-attribute validation failures, `None` when the record is valid.
    pub fn validation_error(&self, record: Cid) -> Option<&IndexMap<String, String>> {
        let node = self.rec(record).ok()?;
        if node.validation.is_empty() {
            None
        } else {
            Some(&node.validation)
        }
    }

    pub fn is_valid(&self, record: Cid) -> bool {
        self.validation_error(record).is_none()
    }

    /// Serializes a record to JSON. `Undefined` attributes are omitted,
    /// nested composites recurse, attribute-level hooks override.
    pub fn record_to_json(&self, record: Cid) -> Result<Json, StoreError> {
        let node = self.rec(record)?;
        let mut out = serde_json::Map::new();
        for (name, def) in &node.schema.attrs {
            let value = node.attributes.get(name).unwrap_or(&Value::Undefined);
            let json = if let Some(hook) = &def.to_json {
                hook(value)
            } else {
                match value {
                    Value::Record(child) => Some(self.record_to_json(*child)?),
                    Value::Collection(child) => Some(self.collection_to_json(*child)?),
                    scalar => scalar.scalar_to_json(),
                }
            };
            if let Some(json) = json {
                out.insert(name.clone(), json);
            }
        }
        Ok(Json::Object(out))
    }

    /// Deep clone: owned nested composites are cloned recursively, shared
    /// references and plain values are copied. The clone has a fresh `cid`
    /// and no owner.
    pub fn clone_record(&mut self, record: Cid) -> Result<Cid, StoreError> {
        let node = self.rec(record)?;
        let schema = node.schema.clone();
        let attrs: Vec<(String, Value)> = node
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let clone = self
            .create_record(&schema.name, Json::Null)
            .map_err(|_| StoreError::UnknownRecord(record))?;
        let mut entries = Vec::with_capacity(attrs.len());
        for (name, value) in attrs {
            let def = schema.attr(&name);
            let owned_composite = def.is_some_and(|d| d.metatype.deep_update());
            let value = match (&value, owned_composite) {
                (Value::Record(child), true) => Value::Record(self.clone_record(*child)?),
                (Value::Collection(child), true) => {
                    Value::Collection(self.clone_collection(*child)?)
                }
                _ => value,
            };
            entries.push((name, value));
        }
        let silent = Options {
            silent: true,
            ..Options::default()
        };
        self.set_values(clone, entries, &silent)?;
        Ok(clone)
    }

    fn apply_parse(&self, record: Cid, raw: Json) -> Result<Json, StoreError> {
        let node = self.rec(record)?;
        Ok(match &node.schema.parse {
            Some(hook) => hook(raw),
            None => raw,
        })
    }
}

/// Required-flag and custom checks for an accepted cast. A rejection leaves
/// the previous value in place and is recorded on the record, never thrown.
pub(crate) fn validate(def: &AttrDef, value: &Value) -> Option<String> {
    if def.required && matches!(value, Value::Undefined | Value::Null) {
        return Some(format!("{} is required", def.name));
    }
    if let Some(check) = &def.validate {
        if value.is_defined() {
            return check(value);
        }
    }
    None
}

/// The mutation phase of a record batch write: casts and stores each entry,
/// recording changed names and nested child transactions. Notifications are
/// deferred to [`Transaction::commit`].
pub(crate) fn set_transaction(
    store: &mut Store,
    record: Cid,
    entries: Vec<(String, Value)>,
    options: &Options,
) -> Result<Transaction, StoreError> {
    store.rec(record)?;
    let schema = store.rec(record)?.schema.clone();
    let mut txn = Transaction::new(store, record);

    for (name, raw) in entries {
        let Some(def) = schema.attr(&name) else {
            warn!(record = %record, attr = %name, "unknown attribute in payload, skipped");
            continue;
        };
        let prev = store
            .rec(record)?
            .attributes
            .get(&name)
            .cloned()
            .unwrap_or(Value::Undefined);

        // Deep update: a raw partial payload aimed at an existing owned
        // composite goes through the child's own transaction.
        if def.metatype.deep_update() {
            match (&prev, &raw) {
                (Value::Record(child), Value::Object(map)) => {
                    let child_entries = map
                        .iter()
                        .map(|(k, v)| (k.clone(), Value::from_json(v)))
                        .collect();
                    let child_txn = set_transaction(store, *child, child_entries, options)?;
                    txn.nested.push(Nested::Record(child_txn));
                    continue;
                }
                (Value::Collection(child), Value::Array(items)) => {
                    let elements = items
                        .iter()
                        .cloned()
                        .map(crate::collection::Element::Json)
                        .collect();
                    let child_txn =
                        crate::collection::set::create_transaction(store, *child, elements, options);
                    txn.nested.push(Nested::Collection(child_txn));
                    continue;
                }
                _ => {}
            }
        }

        let next = match def.metatype.convert(raw, store) {
            Ok(next) => next,
            Err(cast) => {
                store
                    .rec_mut(record)?
                    .validation
                    .insert(name.clone(), cast.to_string());
                continue;
            }
        };
        if let Some(message) = validate(def, &next) {
            store.rec_mut(record)?.validation.insert(name.clone(), message);
            continue;
        }
        let node = store.rec_mut(record)?;
        node.validation.shift_remove(&name);
        if def.metatype.is_changed(&next, &prev) {
            node.attributes.insert(name.clone(), next.clone());
            txn.push_changed(&name);
            def.metatype.handle_change(store, record, &name, &next, &prev);
        }
    }

    Ok(txn)
}
