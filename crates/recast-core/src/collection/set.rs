//! The `set` reconciliation path: diff the target element list against the
//! current members by identity, merge matches in place, construct or admit
//! the rest, remove the unlisted, reorder to the target (or comparator)
//! order.

use serde_json::Value as Json;

use crate::record;
use crate::store::{ConstructionError, Options, Owner, Store};
use crate::transaction::begin_collection;
use crate::value::{Cid, Value};

use super::{admit, resolve, sort_models, unindex_record, ColTransaction, Element, Resolution};

/// Picks the cheapest applicable strategy for a `set` call.
pub(crate) fn create_transaction(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
    options: &Options,
) -> ColTransaction {
    let empty = store.col(col).map(|n| n.models.is_empty()).unwrap_or(true);
    if empty {
        empty_set_transaction(store, col, elements, options)
    } else if !options.remove {
        super::add::add_transaction(store, col, elements, options)
    } else {
        set_transaction(store, col, elements, options)
    }
}

/// Fast path for a set into an empty collection: pure admission, no diff.
pub(crate) fn empty_set_transaction(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
    options: &Options,
) -> ColTransaction {
    let mut txn = ColTransaction::open(store, col);
    let type_key = match store.col(col) {
        Ok(node) => node.schema.name.clone(),
        Err(_) => return txn,
    };

    for element in elements {
        match resolve(store, col, &element) {
            Resolution::New(map) => match store.create_record(&type_key, Json::Object(map)) {
                Ok(record) => {
                    admit(store, col, record);
                    if let Ok(node) = store.col_mut(col) {
                        node.models.push(record);
                    }
                    txn.added.push(record);
                }
                Err(err) => {
                    txn.error = Some(err);
                    break;
                }
            },
            Resolution::Admit(record) => {
                if txn.added.contains(&record) {
                    continue;
                }
                admit(store, col, record);
                if let Ok(node) = store.col_mut(col) {
                    node.models.push(record);
                }
                txn.added.push(record);
            }
            // A later batch entry re-keyed to an already admitted record:
            // merge it in place instead of admitting a duplicate.
            Resolution::Member(member, payload) => {
                merge(store, &mut txn, member, payload, options);
            }
            Resolution::Invalid(err) => {
                txn.error = Some(err);
                break;
            }
        }
    }

    if txn.error.is_none() && sort_models(store, col) {
        txn.sorted = true;
    }
    txn
}

/// Full reconciliation against a non-empty collection.
fn set_transaction(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
    options: &Options,
) -> ColTransaction {
    let mut txn = ColTransaction::open(store, col);
    let (type_key, old) = match store.col(col) {
        Ok(node) => (node.schema.name.clone(), node.models.clone()),
        Err(_) => return txn,
    };

    let mut target: Vec<Cid> = Vec::with_capacity(elements.len());
    for element in elements {
        match resolve(store, col, &element) {
            Resolution::Member(member, payload) => {
                if !target.contains(&member) {
                    target.push(member);
                }
                merge(store, &mut txn, member, payload, options);
            }
            Resolution::New(map) => match store.create_record(&type_key, Json::Object(map)) {
                Ok(record) => {
                    admit(store, col, record);
                    txn.added.push(record);
                    target.push(record);
                }
                Err(err) => {
                    txn.error = Some(err);
                    break;
                }
            },
            Resolution::Admit(record) => {
                if target.contains(&record) {
                    continue;
                }
                admit(store, col, record);
                txn.added.push(record);
                target.push(record);
            }
            Resolution::Invalid(err) => {
                txn.error = Some(err);
                break;
            }
        }
    }

    if txn.error.is_some() {
        // Partial application: admitted records stay, appended in admission
        // order; no removal, no reorder.
        if let Ok(node) = store.col_mut(col) {
            node.models.extend(txn.added.iter().copied());
        }
        return txn;
    }

    for member in &old {
        if !target.contains(member) {
            unindex_record(store, col, *member);
            store.release(*member, &Owner::Collection(col));
            txn.removed.push(*member);
        }
    }

    if let Ok(node) = store.col_mut(col) {
        node.models = target;
    }
    let has_comparator = store.col(col).is_ok_and(|n| n.comparator.is_some());
    if has_comparator {
        txn.sorted = sort_models(store, col);
    } else if txn.added.is_empty()
        && txn.removed.is_empty()
        && store.col(col).is_ok_and(|n| n.models != old)
    {
        txn.reordered = true;
    }
    txn
}

pub(crate) fn merge(
    store: &mut Store,
    txn: &mut ColTransaction,
    member: Cid,
    payload: Option<serde_json::Map<String, Json>>,
    options: &Options,
) {
    let Some(map) = payload else {
        return;
    };
    let entries = map
        .iter()
        .map(|(name, json)| (name.clone(), Value::from_json(json)))
        .collect();
    if let Ok(nested) = record::set_transaction(store, member, entries, options) {
        txn.nested.push(nested);
    }
}

/// Silent admission used by collection construction and `reset`: no events,
/// no transaction bookkeeping, first construction failure aborts.
pub(crate) fn populate(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
) -> Result<(), ConstructionError> {
    let type_key = match store.col(col) {
        Ok(node) => node.schema.name.clone(),
        Err(_) => return Ok(()),
    };
    let silent = Options {
        silent: true,
        ..Options::default()
    };
    for element in elements {
        match resolve(store, col, &element) {
            Resolution::New(map) => {
                let record = store.create_record(&type_key, Json::Object(map))?;
                admit(store, col, record);
                if let Ok(node) = store.col_mut(col) {
                    node.models.push(record);
                }
            }
            Resolution::Admit(record) => {
                admit(store, col, record);
                if let Ok(node) = store.col_mut(col) {
                    node.models.push(record);
                }
            }
            Resolution::Member(member, Some(map)) => {
                let _ = store.set(member, Json::Object(map), &silent);
            }
            Resolution::Member(_, None) => {}
            Resolution::Invalid(err) => return Err(err),
        }
    }
    sort_models(store, col);
    Ok(())
}

/// Full replacement. Members are released and the target list populates the
/// collection silently; the single `reset` event carries the previous
/// member list. On a construction failure the collection keeps the elements
/// admitted so far.
pub(crate) fn reset(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
    options: &Options,
) -> Result<Vec<Cid>, ConstructionError> {
    let previous = store.models(col).to_vec();
    let is_root = begin_collection(store, col);
    for member in &previous {
        store.release(*member, &Owner::Collection(col));
    }
    if let Ok(node) = store.col_mut(col) {
        node.models.clear();
        node.by_id.clear();
    }

    let result = populate(store, col, elements);

    let mut txn = ColTransaction::open(store, col);
    txn.is_root = is_root;
    txn.reset_previous = Some(previous);
    txn.commit(store, options);

    result.map(|()| store.models(col).to_vec())
}
