//! The `remove` path: elements may be record instances, objects carrying
//! the id attribute, or bare identity values. Misses are skipped silently.

use serde_json::Value as Json;

use crate::store::{Options, Owner, Store};
use crate::value::{Cid, IdKey};

use super::{unindex_record, ColTransaction, Element};

pub(crate) fn remove_transaction(
    store: &mut Store,
    col: Cid,
    elements: Vec<Element>,
    _options: &Options,
) -> ColTransaction {
    let mut txn = ColTransaction::open(store, col);
    for element in elements {
        let Some(member) = locate(store, col, &element) else {
            continue;
        };
        if txn.removed.contains(&member) {
            continue;
        }
        if let Ok(node) = store.col_mut(col) {
            node.models.retain(|m| *m != member);
        }
        unindex_record(store, col, member);
        store.release(member, &Owner::Collection(col));
        txn.removed.push(member);
    }
    txn
}

fn locate(store: &Store, col: Cid, element: &Element) -> Option<Cid> {
    let node = store.col(col).ok()?;
    match element {
        Element::Record(cid) => node.models.contains(cid).then_some(*cid),
        Element::Json(Json::Object(map)) => {
            let id = map.get(&node.schema.id_attribute)?;
            IdKey::of_json(id).and_then(|key| node.by_id.get(&key).copied())
        }
        Element::Json(scalar) => {
            IdKey::of_json(scalar).and_then(|key| node.by_id.get(&key).copied())
        }
    }
}
