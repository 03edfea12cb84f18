//! Domain events and store-level subscriptions.
//!
//! Listeners receive `&mut Store` so a handler may call back into the store;
//! a reentrant `set` on a node mid-notification joins that node's in-flight
//! transaction instead of opening a second one. Per batch the order is
//! fixed: notifications of merged child records first (children commit
//! before the owner), then the structural events (`Remove`, `Add`,
//! `Sort`/`Reset`), then at most one collection-level `Change`.

use recast_events::{ListenerId, NodeKey};

use crate::store::Store;
use crate::value::{Cid, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Exactly one per affected node per mutation episode.
    Change { node: Cid },
    /// One per changed attribute name per episode; also fired on an owner
    /// when an owned child changed through that attribute.
    ChangeAttr {
        node: Cid,
        attr: String,
        value: Value,
    },
    /// Once per batch, listing exactly the newly admitted records.
    Add { collection: Cid, added: Vec<Cid> },
    /// Once per batch, listing exactly the removed records.
    Remove { collection: Cid, removed: Vec<Cid> },
    /// The comparator reordered `models` without any add/remove.
    Sort { collection: Cid },
    /// Fired in place of `Add`/`Remove`/`Sort` by `reset`, carrying the
    /// previous `models` snapshot.
    Reset { collection: Cid, previous: Vec<Cid> },
}

impl Store {
    /// Subscribes to every event of one node.
    pub fn on<F>(&mut self, node: Cid, listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, &Event) + Send + Sync + 'static,
    {
        self.hub.on(node.key(), listener)
    }

    pub fn off(&mut self, node: Cid, id: ListenerId) -> bool {
        self.hub.off(node.key(), id)
    }

    /// Node-level `change`.
    pub fn on_change<F>(&mut self, node: Cid, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, Cid) + Send + Sync + 'static,
    {
        self.on(node, move |store, event| {
            if let Event::Change { node } = event {
                listener(store, *node);
            }
        })
    }

    /// `change:<name>` for one attribute.
    pub fn on_change_attr<F>(&mut self, node: Cid, attr: &str, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, &Value) + Send + Sync + 'static,
    {
        let attr = attr.to_string();
        self.on(node, move |store, event| {
            if let Event::ChangeAttr { attr: name, value, .. } = event {
                if *name == attr {
                    listener(store, value);
                }
            }
        })
    }

    pub fn on_add<F>(&mut self, collection: Cid, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, &[Cid]) + Send + Sync + 'static,
    {
        self.on(collection, move |store, event| {
            if let Event::Add { added, .. } = event {
                listener(store, added);
            }
        })
    }

    pub fn on_remove<F>(&mut self, collection: Cid, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, &[Cid]) + Send + Sync + 'static,
    {
        self.on(collection, move |store, event| {
            if let Event::Remove { removed, .. } = event {
                listener(store, removed);
            }
        })
    }

    pub fn on_sort<F>(&mut self, collection: Cid, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, Cid) + Send + Sync + 'static,
    {
        self.on(collection, move |store, event| {
            if let Event::Sort { collection } = event {
                listener(store, *collection);
            }
        })
    }

    pub fn on_reset<F>(&mut self, collection: Cid, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut Store, &[Cid]) + Send + Sync + 'static,
    {
        self.on(collection, move |store, event| {
            if let Event::Reset { previous, .. } = event {
                listener(store, previous);
            }
        })
    }

    /// Dispatches one event to the node's listeners. The listener snapshot
    /// is taken up front: listeners added during dispatch do not observe the
    /// in-flight event, removed ones stop firing immediately. Events a
    /// listener's own reentrant call produces for that listener are queued
    /// and delivered to it as soon as its current call returns.
    pub(crate) fn emit(&mut self, node: Cid, event: &Event) {
        for id in self.hub.listener_ids(node.key()) {
            self.dispatch(node.key(), id, event);
        }
    }

    fn dispatch(&mut self, node: NodeKey, id: ListenerId, event: &Event) {
        if let Some(mut listener) = self.hub.take(node, id) {
            listener(self, event);
            self.hub.restore(node, id, listener);
            for deferred in self.hub.take_deferred(node, id) {
                self.dispatch(node, id, &deferred);
            }
        } else if self.hub.is_in_flight(node, id) {
            self.hub.defer(node, id, event.clone());
        }
    }
}
