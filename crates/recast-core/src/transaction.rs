//! The two-phase change-transaction engine.
//!
//! A node's transaction state is explicit data: `Some(txn)` while a mutation
//! episode is open, `None` otherwise, so "am I root" is a property read off
//! the node instead of a flag toggled by side effect. The previous-attributes
//! snapshot lives inside the record's transaction state and therefore exists
//! exactly as long as the episode does. Commit order is a post-order walk:
//! child transactions first, then the node's per-attribute notifications,
//! then, at most once per episode, the node's `change`, then the dirty
//! bubble to the owner.

use indexmap::IndexMap;
use tracing::warn;

use crate::collection::ColTransaction;
use crate::events::Event;
use crate::store::{Options, Owner, Store};
use crate::value::{Cid, IdKey, Value};

#[derive(Debug)]
pub(crate) struct RecordTxn {
    /// Shallow snapshot of the attributes at episode start.
    pub previous: IndexMap<String, Value>,
    /// A node-level `change` is queued.
    pub pending: bool,
    /// Something changed during this episode (drives owner bubbling).
    pub dirty: bool,
    /// Attribute names already announced through a child bubble, so one
    /// attribute bubbles at most once per episode.
    pub bubbled: Vec<String>,
    /// Attribute names whose `change:<name>` already fired this episode.
    /// Joining transactions consult this list, so a batch that writes the
    /// same attribute through two paths still announces it once.
    pub announced: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct CollectionTxn {
    pub pending: bool,
    pub dirty: bool,
}

/// Opens or joins a transaction on a record. Returns whether the caller is
/// the root; only the root snapshots previous attributes, joiners never
/// re-snapshot.
pub(crate) fn begin_record(store: &mut Store, cid: Cid) -> bool {
    let Ok(node) = store.rec_mut(cid) else {
        return false;
    };
    if node.txn.is_some() {
        return false;
    }
    node.txn = Some(RecordTxn {
        previous: node.attributes.clone(),
        pending: false,
        dirty: false,
        bubbled: Vec::new(),
        announced: Vec::new(),
    });
    true
}

pub(crate) fn begin_collection(store: &mut Store, cid: Cid) -> bool {
    let Ok(node) = store.col_mut(cid) else {
        return false;
    };
    if node.txn.is_some() {
        return false;
    }
    node.txn = Some(CollectionTxn::default());
    true
}

/// Root commit of a record episode. Safe to call on a node with no open
/// transaction (no-op). Fires the queued `change` while the transaction is
/// still open, so reentrant writes from handlers join the episode instead of
/// opening (and notifying) a second one; afterwards the transaction is
/// closed and the dirty signal bubbles to the owner.
pub(crate) fn commit_record(store: &mut Store, cid: Cid, options: &Options) {
    let fire = match store.rec_mut(cid) {
        Ok(node) => match node.txn.as_mut() {
            Some(txn) if !options.silent && txn.pending => {
                txn.pending = false;
                true
            }
            Some(_) => false,
            None => return,
        },
        Err(_) => return,
    };
    if fire {
        store.emit(cid, &Event::Change { node: cid });
    }

    let Ok(node) = store.rec_mut(cid) else {
        return;
    };
    let Some(txn) = node.txn.take() else {
        return;
    };
    let dirty = txn.dirty;
    let id_attr = node.schema.id_attribute.clone();
    let old_id = txn.previous.get(&id_attr).cloned().unwrap_or(Value::Undefined);
    let new_id = node
        .attributes
        .get(&id_attr)
        .cloned()
        .unwrap_or(Value::Undefined);
    let id_change = if !old_id.same(&new_id) {
        Some((IdKey::of(&old_id), IdKey::of(&new_id)))
    } else {
        None
    };
    let owner = node.owner.clone();
    if dirty || id_change.is_some() {
        if let Some(owner) = owner {
            children_changed(store, owner, cid, id_change, options);
        }
    }
}

/// Root commit of a collection episode; same shape as the record commit,
/// minus snapshot handling.
pub(crate) fn commit_collection(store: &mut Store, cid: Cid, options: &Options) {
    let fire = match store.col_mut(cid) {
        Ok(node) => match node.txn.as_mut() {
            Some(txn) if !options.silent && txn.pending => {
                txn.pending = false;
                true
            }
            Some(_) => false,
            None => return,
        },
        Err(_) => return,
    };
    if fire {
        store.emit(cid, &Event::Change { node: cid });
    }

    let Ok(node) = store.col_mut(cid) else {
        return;
    };
    let Some(txn) = node.txn.take() else {
        return;
    };
    let dirty = txn.dirty;
    let owner = node.owner.clone();
    if dirty {
        if let Some(owner) = owner {
            children_changed(store, owner, cid, None, options);
        }
    }
}

/// The dirty signal an owner receives when an owned child committed a dirty
/// episode. Opens or joins the owner's own transaction, folds the child's
/// change into it, and for collection owners re-keys the identity index
/// when the child's id attribute changed.
pub(crate) fn children_changed(
    store: &mut Store,
    owner: Owner,
    child: Cid,
    id_change: Option<(Option<IdKey>, Option<IdKey>)>,
    options: &Options,
) {
    match owner {
        Owner::Attr { record, name } => {
            let is_root = begin_record(store, record);
            let announce = {
                let Ok(node) = store.rec_mut(record) else {
                    return;
                };
                let Some(txn) = node.txn.as_mut() else {
                    return;
                };
                txn.dirty = true;
                if options.silent {
                    false
                } else {
                    txn.pending = true;
                    if txn.bubbled.iter().any(|n| n == &name) {
                        false
                    } else {
                        txn.bubbled.push(name.clone());
                        true
                    }
                }
            };
            if announce {
                let value = store
                    .rec(record)
                    .ok()
                    .and_then(|n| n.attributes.get(&name).cloned())
                    .unwrap_or(Value::Undefined);
                store.emit(
                    record,
                    &Event::ChangeAttr {
                        node: record,
                        attr: name,
                        value,
                    },
                );
            }
            if is_root {
                commit_record(store, record, options);
            }
        }
        Owner::Collection(col) => {
            let is_root = begin_collection(store, col);
            let Ok(node) = store.col_mut(col) else {
                return;
            };
            if let Some((old_key, new_key)) = id_change {
                if let Some(old_key) = old_key {
                    if node.by_id.get(&old_key) == Some(&child) {
                        node.by_id.remove(&old_key);
                    }
                }
                if let Some(new_key) = new_key {
                    if let Some(displaced) = node.by_id.insert(new_key.clone(), child) {
                        if displaced != child {
                            warn!(
                                collection = %col,
                                id = %new_key,
                                displaced = %displaced,
                                winner = %child,
                                "identity conflict: last write wins on the index"
                            );
                        }
                    }
                }
            }
            if let Some(txn) = node.txn.as_mut() {
                if !options.silent {
                    txn.dirty = true;
                    txn.pending = true;
                }
            }
            if is_root {
                commit_collection(store, col, options);
            }
        }
    }
}

/// One record mutation episode: the ordered dedup list of changed attribute
/// names plus the child transactions opened on nested composites. Mutation
/// happens while the transaction is built; `commit` only notifies.
#[derive(Debug)]
pub(crate) struct Transaction {
    pub node: Cid,
    pub is_root: bool,
    pub changed: Vec<String>,
    pub nested: Vec<Nested>,
}

#[derive(Debug)]
pub(crate) enum Nested {
    Record(Transaction),
    Collection(ColTransaction),
}

impl Transaction {
    pub(crate) fn new(store: &mut Store, node: Cid) -> Self {
        Self {
            node,
            is_root: begin_record(store, node),
            changed: Vec::new(),
            nested: Vec::new(),
        }
    }

    pub(crate) fn push_changed(&mut self, name: &str) {
        if !self.changed.iter().any(|n| n == name) {
            self.changed.push(name.to_string());
        }
    }

    /// Commits children first, then this node's per-attribute notifications,
    /// then (root only) the node-level commit.
    pub(crate) fn commit(self, store: &mut Store, options: &Options) {
        for nested in self.nested {
            match nested {
                Nested::Record(txn) => txn.commit(store, options),
                Nested::Collection(txn) => txn.commit(store, options),
            }
        }
        if !self.changed.is_empty() {
            // Announcements go through the episode's bookkeeping: a second
            // transaction joining the same open episode must not re-fire a
            // name the root already announced, and once the episode is
            // closed its names have been dealt with entirely.
            let mut to_fire = Vec::new();
            if let Ok(node) = store.rec_mut(self.node) {
                if let Some(txn) = node.txn.as_mut() {
                    txn.dirty = true;
                    if !options.silent {
                        txn.pending = true;
                        for name in &self.changed {
                            if !txn.announced.iter().any(|n| n == name) {
                                txn.announced.push(name.clone());
                                to_fire.push(name.clone());
                            }
                        }
                    }
                }
            }
            for name in to_fire {
                let value = store
                    .rec(self.node)
                    .ok()
                    .and_then(|n| n.attributes.get(&name).cloned())
                    .unwrap_or(Value::Undefined);
                store.emit(
                    self.node,
                    &Event::ChangeAttr {
                        node: self.node,
                        attr: name,
                        value,
                    },
                );
            }
        }
        if self.is_root {
            commit_record(store, self.node, options);
        }
    }
}
