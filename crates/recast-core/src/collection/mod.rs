//! Collections: ordered, identity-indexed sets of records of one model
//! type, reconciled against target element lists with minimal structural
//! change.

pub(crate) mod add;
pub(crate) mod remove;
pub(crate) mod set;

use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;
use tracing::warn;

use crate::events::Event;
use crate::store::{ConstructionError, Options, Owner, Store, StoreError};
use crate::transaction::{begin_collection, commit_collection, Transaction};
use crate::value::{Cid, IdKey, Value};

/// One element of a target list: raw JSON or an already-constructed record.
#[derive(Debug, Clone)]
pub enum Element {
    Json(Json),
    Record(Cid),
}

impl From<Json> for Element {
    fn from(json: Json) -> Self {
        Element::Json(json)
    }
}

impl From<Cid> for Element {
    fn from(cid: Cid) -> Self {
        Element::Record(cid)
    }
}

/// Splits a raw JSON payload into elements: an array yields one element per
/// item, anything else is a single element.
pub fn elements(json: Json) -> Vec<Element> {
    match json {
        Json::Array(items) => items.into_iter().map(Element::Json).collect(),
        other => vec![Element::Json(other)],
    }
}

/// Collection ordering policy: by attribute name, by one-argument sort key,
/// or by two-argument comparator. Sorting is stable, so the incoming order
/// is the tiebreak for equal keys.
#[derive(Clone)]
pub enum Comparator {
    Attr(String),
    Key(Arc<dyn Fn(&Store, Cid) -> Value + Send + Sync>),
    Cmp(Arc<dyn Fn(&Store, Cid, Cid) -> Ordering + Send + Sync>),
}

impl Comparator {
    fn compare(&self, store: &Store, a: Cid, b: Cid) -> Ordering {
        match self {
            Comparator::Attr(name) => {
                let left = store.get(a, name).unwrap_or(&Value::Undefined);
                let right = store.get(b, name).unwrap_or(&Value::Undefined);
                left.cmp_sort(right)
            }
            Comparator::Key(key) => key(store, a).cmp_sort(&key(store, b)),
            Comparator::Cmp(cmp) => cmp(store, a, b),
        }
    }
}

impl std::fmt::Debug for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Attr(name) => f.debug_tuple("Attr").field(name).finish(),
            Comparator::Key(_) => f.write_str("Key(..)"),
            Comparator::Cmp(_) => f.write_str("Cmp(..)"),
        }
    }
}

/// Bookkeeping of one collection mutation episode. Mutation happens while
/// the transaction is built; `commit` commits nested (child) record
/// transactions first, then fires the batch structural events, then the
/// node-level commit.
#[derive(Debug)]
pub(crate) struct ColTransaction {
    pub node: Cid,
    pub is_root: bool,
    pub added: Vec<Cid>,
    pub removed: Vec<Cid>,
    pub sorted: bool,
    pub reordered: bool,
    pub reset_previous: Option<Vec<Cid>>,
    pub nested: Vec<Transaction>,
    pub error: Option<ConstructionError>,
}

impl ColTransaction {
    pub(crate) fn open(store: &mut Store, node: Cid) -> Self {
        Self {
            node,
            is_root: begin_collection(store, node),
            added: Vec::new(),
            removed: Vec::new(),
            sorted: false,
            reordered: false,
            reset_previous: None,
            nested: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn commit(self, store: &mut Store, options: &Options) {
        for nested in self.nested {
            nested.commit(store, options);
        }
        let structural = !self.added.is_empty()
            || !self.removed.is_empty()
            || self.sorted
            || self.reordered
            || self.reset_previous.is_some();
        if structural {
            if let Ok(node) = store.col_mut(self.node) {
                if let Some(txn) = node.txn.as_mut() {
                    txn.dirty = true;
                    if !options.silent {
                        txn.pending = true;
                    }
                }
            }
        }
        if !options.silent {
            if let Some(previous) = self.reset_previous {
                store.emit(
                    self.node,
                    &Event::Reset {
                        collection: self.node,
                        previous,
                    },
                );
            } else {
                if !self.removed.is_empty() {
                    store.emit(
                        self.node,
                        &Event::Remove {
                            collection: self.node,
                            removed: self.removed,
                        },
                    );
                }
                if !self.added.is_empty() {
                    store.emit(
                        self.node,
                        &Event::Add {
                            collection: self.node,
                            added: self.added,
                        },
                    );
                }
                if self.sorted {
                    store.emit(
                        self.node,
                        &Event::Sort {
                            collection: self.node,
                        },
                    );
                }
            }
        }
        if self.is_root {
            commit_collection(store, self.node, options);
        }
    }
}

/// How one target element relates to the current collection state.
pub(crate) enum Resolution {
    /// Identity match with a member; optional payload to merge in place.
    Member(Cid, Option<serde_json::Map<String, Json>>),
    /// Unmatched raw payload: a record must be constructed.
    New(serde_json::Map<String, Json>),
    /// Unmatched, already-constructed record to admit.
    Admit(Cid),
    Invalid(ConstructionError),
}

pub(crate) fn resolve(store: &Store, col: Cid, element: &Element) -> Resolution {
    let Ok(node) = store.col(col) else {
        return Resolution::Invalid(ConstructionError::Malformed("unknown collection"));
    };
    match element {
        Element::Record(cid) => {
            let Some(got) = store.record_type(*cid) else {
                return Resolution::Invalid(ConstructionError::Malformed("unknown record"));
            };
            if got != node.schema.name {
                return Resolution::Invalid(ConstructionError::WrongType {
                    expected: node.schema.name.clone(),
                    got: got.to_string(),
                });
            }
            if node.models.contains(cid) {
                Resolution::Member(*cid, None)
            } else {
                Resolution::Admit(*cid)
            }
        }
        Element::Json(Json::Object(map)) => {
            let id = map
                .get(&node.schema.id_attribute)
                .and_then(IdKey::of_json);
            match id.and_then(|key| node.by_id.get(&key).copied()) {
                Some(member) => Resolution::Member(member, Some(map.clone())),
                None => Resolution::New(map.clone()),
            }
        }
        Element::Json(other) => {
            Resolution::Invalid(ConstructionError::Malformed(crate::store::json_kind(other)))
        }
    }
}

/// Admits a record into the collection's ownership and identity index (the
/// ordering slot is the caller's business).
pub(crate) fn admit(store: &mut Store, col: Cid, record: Cid) {
    if let Err(previous) = store.claim(record, Owner::Collection(col)) {
        warn!(record = %record, collection = %col, ?previous, "record re-parented into collection");
    }
    index_record(store, col, record);
}

pub(crate) fn index_record(store: &mut Store, col: Cid, record: Cid) {
    let key = store.id_of(record).and_then(IdKey::of);
    let Some(key) = key else {
        return;
    };
    let Ok(node) = store.col_mut(col) else {
        return;
    };
    if let Some(displaced) = node.by_id.insert(key.clone(), record) {
        if displaced != record {
            warn!(
                collection = %col,
                id = %key,
                displaced = %displaced,
                winner = %record,
                "identity conflict: last write wins on the index"
            );
        }
    }
}

pub(crate) fn unindex_record(store: &mut Store, col: Cid, record: Cid) {
    if let Ok(node) = store.col_mut(col) {
        node.by_id.retain(|_, v| *v != record);
    }
}

/// Sorts `models` by the configured comparator; returns whether the order
/// changed. No-op without a comparator.
pub(crate) fn sort_models(store: &mut Store, col: Cid) -> bool {
    let Ok(node) = store.col(col) else {
        return false;
    };
    let Some(comparator) = node.comparator.clone() else {
        return false;
    };
    let mut models = match store.col_mut(col) {
        Ok(node) => std::mem::take(&mut node.models),
        Err(_) => return false,
    };
    let before = models.clone();
    models.sort_by(|a, b| comparator.compare(store, *a, *b));
    let changed = models != before;
    if let Ok(node) = store.col_mut(col) {
        node.models = models;
    }
    changed
}

impl Store {
    // --------------------------------------------------------------
    // Structural operations
    // --------------------------------------------------------------

    /// Full reconciliation: merges identity matches in place (preserving
    /// each matched record's `cid`), constructs records for unmatched
    /// elements, removes members absent from the target list (unless
    /// `remove: false`, which turns the call into an add), and reorders to
    /// the target/comparator order. Returns the newly admitted records.
    pub fn set_elements(
        &mut self,
        col: Cid,
        elements: Vec<Element>,
        options: &Options,
    ) -> Result<Vec<Cid>, ConstructionError> {
        self.col(col).map_err(arena_error)?;
        let elements = self.parse_elements(col, elements, options);
        let txn = set::create_transaction(self, col, elements, options);
        finish(self, txn, options)
    }

    /// Non-removing merge/insert. Never removes a member, regardless of
    /// whether it appears in the batch; honors `at` as the insertion index.
    /// Returns the newly admitted records.
    pub fn add(
        &mut self,
        col: Cid,
        elements: Vec<Element>,
        options: &Options,
    ) -> Result<Vec<Cid>, ConstructionError> {
        self.col(col).map_err(arena_error)?;
        let elements = self.parse_elements(col, elements, options);
        let txn = if self.col(col).map(|n| n.models.is_empty()).unwrap_or(true) {
            set::empty_set_transaction(self, col, elements, options)
        } else {
            add::add_transaction(self, col, elements, options)
        };
        finish(self, txn, options)
    }

    /// Removes elements given as record instances, raw objects carrying the
    /// id attribute, or bare identity values. Elements with no match are
    /// skipped without error. Returns the removed records.
    pub fn remove(&mut self, col: Cid, elements: Vec<Element>, options: &Options) -> Vec<Cid> {
        if self.col(col).is_err() {
            return Vec::new();
        }
        let txn = remove::remove_transaction(self, col, elements, options);
        let removed = txn.removed.clone();
        txn.commit(self, options);
        removed
    }

    /// Full silent replacement: every member is released, the new elements
    /// populate the collection without `add`/`remove`/`sort` notifications,
    /// and a single `reset` event carries the previous `models` snapshot.
    pub fn reset(
        &mut self,
        col: Cid,
        elements: Vec<Element>,
        options: &Options,
    ) -> Result<Vec<Cid>, ConstructionError> {
        self.col(col).map_err(arena_error)?;
        let elements = self.parse_elements(col, elements, options);
        set::reset(self, col, elements, options)
    }

    /// Re-sorts `models` by the configured comparator. Fires one `sort`
    /// event when the order actually changed, nothing when it was already
    /// sorted. Returns whether the order changed.
    pub fn sort(&mut self, col: Cid, options: &Options) -> bool {
        if self.col(col).is_err() {
            return false;
        }
        if self.col(col).is_ok_and(|n| n.comparator.is_none()) {
            warn!(collection = %col, "sort without a comparator is a no-op");
            return false;
        }
        if !sort_models(self, col) {
            return false;
        }
        let is_root = begin_collection(self, col);
        if let Ok(node) = self.col_mut(col) {
            if let Some(txn) = node.txn.as_mut() {
                txn.dirty = true;
                if !options.silent {
                    txn.pending = true;
                }
            }
        }
        if !options.silent {
            self.emit(col, &Event::Sort { collection: col });
        }
        if is_root {
            commit_collection(self, col, options);
        }
        true
    }

    /// Sets or clears the ordering policy. Does not re-sort by itself.
    pub fn set_comparator(&mut self, col: Cid, comparator: Option<Comparator>) -> Result<(), StoreError> {
        self.col_mut(col)?.comparator = comparator;
        Ok(())
    }

    pub fn push(&mut self, col: Cid, element: Element, options: &Options) -> Result<Vec<Cid>, ConstructionError> {
        let at = self.models(col).len();
        self.add(col, vec![element], &Options { at: Some(at), ..options.clone() })
    }

    pub fn pop(&mut self, col: Cid, options: &Options) -> Option<Cid> {
        let last = *self.models(col).last()?;
        self.remove(col, vec![Element::Record(last)], options);
        Some(last)
    }

    pub fn unshift(&mut self, col: Cid, element: Element, options: &Options) -> Result<Vec<Cid>, ConstructionError> {
        self.add(col, vec![element], &Options { at: Some(0), ..options.clone() })
    }

    pub fn shift(&mut self, col: Cid, options: &Options) -> Option<Cid> {
        let first = *self.models(col).first()?;
        self.remove(col, vec![Element::Record(first)], options);
        Some(first)
    }

    // --------------------------------------------------------------
    // Accessors
    // --------------------------------------------------------------

    pub fn models(&self, col: Cid) -> &[Cid] {
        self.col(col).map(|n| n.models.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self, col: Cid) -> usize {
        self.models(col).len()
    }

    pub fn is_empty(&self, col: Cid) -> bool {
        self.models(col).is_empty()
    }

    /// Index access; negative indexes count from the end.
    pub fn at(&self, col: Cid, index: i64) -> Option<Cid> {
        let models = self.models(col);
        let index = if index < 0 {
            index + models.len() as i64
        } else {
            index
        };
        usize::try_from(index).ok().and_then(|i| models.get(i)).copied()
    }

    pub fn first(&self, col: Cid) -> Option<Cid> {
        self.models(col).first().copied()
    }

    pub fn last(&self, col: Cid) -> Option<Cid> {
        self.models(col).last().copied()
    }

    pub fn contains(&self, col: Cid, record: Cid) -> bool {
        self.models(col).contains(&record)
    }

    /// Identity lookup by raw id value.
    pub fn get_by_id(&self, col: Cid, id: &Json) -> Option<Cid> {
        let node = self.col(col).ok()?;
        IdKey::of_json(id).and_then(|key| node.by_id.get(&key).copied())
    }

    /// Attribute values of every member, in model order.
    pub fn pluck(&self, col: Cid, name: &str) -> Vec<Value> {
        self.models(col)
            .iter()
            .map(|cid| self.get(*cid, name).cloned().unwrap_or(Value::Undefined))
            .collect()
    }

    pub fn collection_to_json(&self, col: Cid) -> Result<Json, StoreError> {
        let node = self.col(col)?;
        let mut out = Vec::with_capacity(node.models.len());
        for cid in &node.models {
            out.push(self.record_to_json(*cid)?);
        }
        Ok(Json::Array(out))
    }

    /// Deep clone: every member record is cloned, the comparator is copied,
    /// and the clone has a fresh `cid` and no owner.
    pub fn clone_collection(&mut self, col: Cid) -> Result<Cid, StoreError> {
        let node = self.col(col)?;
        let type_key = node.schema.name.clone();
        let comparator = node.comparator.clone();
        let members = node.models.clone();
        let clone = self
            .create_collection(&type_key, &[])
            .map_err(|_| StoreError::UnknownCollection(col))?;
        self.set_comparator(clone, comparator)?;
        let mut elements = Vec::with_capacity(members.len());
        for member in members {
            elements.push(Element::Record(self.clone_record(member)?));
        }
        let silent = Options {
            silent: true,
            ..Options::default()
        };
        let _ = self.add(clone, elements, &silent);
        Ok(clone)
    }

    /// Validation failures of every invalid member.
    pub fn validation_errors(&self, col: Cid) -> Vec<(Cid, IndexMap<String, String>)> {
        self.models(col)
            .iter()
            .filter_map(|cid| self.validation_error(*cid).map(|e| (*cid, e.clone())))
            .collect()
    }

    fn parse_elements(&self, col: Cid, elements: Vec<Element>, options: &Options) -> Vec<Element> {
        if !options.parse {
            return elements;
        }
        let Ok(node) = self.col(col) else {
            return elements;
        };
        let Some(hook) = node.schema.parse.clone() else {
            return elements;
        };
        elements
            .into_iter()
            .map(|el| match el {
                Element::Json(json) => Element::Json(hook(json)),
                record => record,
            })
            .collect()
    }
}

fn arena_error(err: StoreError) -> ConstructionError {
    ConstructionError::Malformed(match err {
        StoreError::UnknownRecord(_) => "unknown record",
        StoreError::UnknownCollection(_) => "unknown collection",
    })
}

fn finish(
    store: &mut Store,
    mut txn: ColTransaction,
    options: &Options,
) -> Result<Vec<Cid>, ConstructionError> {
    let error = txn.error.take();
    let added = txn.added.clone();
    txn.commit(store, options);
    match error {
        Some(err) => Err(err),
        None => Ok(added),
    }
}
