//! The non-removing `add` path: identity matches merge in place, everything
//! else is admitted at the requested index (or the comparator slot).

use serde_json::Value as Json;

use crate::store::{Options, Store};
use crate::value::Cid;

use super::{admit, resolve, set::merge, sort_models, ColTransaction, Element, Resolution};

pub(crate) fn add_transaction(
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
            Resolution::Member(member, payload) => {
                merge(store, &mut txn, member, payload, options);
            }
            Resolution::New(map) => match store.create_record(&type_key, Json::Object(map)) {
                Ok(record) => {
                    admit(store, col, record);
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
                txn.added.push(record);
            }
            Resolution::Invalid(err) => {
                txn.error = Some(err);
                break;
            }
        }
    }

    // Records admitted before an abort keep their membership.
    if !txn.added.is_empty() {
        if let Ok(node) = store.col_mut(col) {
            let at = options.at.unwrap_or(node.models.len()).min(node.models.len());
            node.models.splice(at..at, txn.added.iter().copied());
        }
        let sortable = store.col(col).is_ok_and(|n| n.comparator.is_some());
        if txn.error.is_none() && sortable && options.at.is_none() {
            txn.sorted = sort_models(store, col);
        }
    }
    txn
}
