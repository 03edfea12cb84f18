//! Per-node event emitter for recast.
//!
//! Listeners are registered against an opaque node key and receive a mutable
//! context alongside the event, so a handler may call back into the structure
//! that owns this emitter. To make that possible the emitter never holds a
//! borrow across a listener call: dispatch works by taking one listener out,
//! invoking it, and restoring it afterwards (`listener_ids` / `take` /
//! `restore`). Removal of a listener that is currently taken out is recorded
//! and honored on restore. Events emitted at a taken-out listener are queued
//! (`defer`) and handed back to the dispatcher after the restore
//! (`take_deferred`), so a listener still observes what its own reentrant
//! call produced.

use std::collections::{BTreeMap, HashMap, HashSet};

/// Node key in the owning structure's id space.
pub type NodeKey = u64;

/// Handle returned by [`Emitter::on`], used to unsubscribe.
pub type ListenerId = u64;

pub type BoxListener<C, E> = Box<dyn FnMut(&mut C, &E) + Send + Sync>;

pub struct Emitter<C, E> {
    next_id: ListenerId,
    tables: HashMap<NodeKey, BTreeMap<ListenerId, BoxListener<C, E>>>,
    in_flight: HashSet<(NodeKey, ListenerId)>,
    revoked: HashSet<(NodeKey, ListenerId)>,
    deferred: Vec<(NodeKey, ListenerId, E)>,
}

impl<C, E> Default for Emitter<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E> Emitter<C, E> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            tables: HashMap::new(),
            in_flight: HashSet::new(),
            revoked: HashSet::new(),
            deferred: Vec::new(),
        }
    }

    pub fn on<F>(&mut self, node: NodeKey, listener: F) -> ListenerId
    where
        F: FnMut(&mut C, &E) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.tables
            .entry(node)
            .or_default()
            .insert(id, Box::new(listener));
        id
    }

    /// Removes a listener. Returns `true` if it existed, including the case
    /// where it is currently taken out for dispatch.
    pub fn off(&mut self, node: NodeKey, id: ListenerId) -> bool {
        if let Some(table) = self.tables.get_mut(&node) {
            if table.remove(&id).is_some() {
                if table.is_empty() {
                    self.tables.remove(&node);
                }
                return true;
            }
        }
        if self.in_flight.contains(&(node, id)) {
            self.revoked.insert((node, id));
            self.deferred.retain(|(n, i, _)| (*n, *i) != (node, id));
            return true;
        }
        false
    }

    /// Drops every listener of a node. Listeners of the node that are taken
    /// out for dispatch are revoked and will not be restored.
    pub fn drop_node(&mut self, node: NodeKey) {
        self.tables.remove(&node);
        self.deferred.retain(|(n, _, _)| *n != node);
        for key in self.in_flight.iter().filter(|(n, _)| *n == node) {
            self.revoked.insert(*key);
        }
    }

    /// Snapshot of listener ids for one node, in registration order.
    /// Listeners registered after the snapshot are not part of it; listeners
    /// currently taken out for dispatch are.
    pub fn listener_ids(&self, node: NodeKey) -> Vec<ListenerId> {
        let mut ids: Vec<ListenerId> = self
            .tables
            .get(&node)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        for (n, id) in &self.in_flight {
            if *n == node && !self.revoked.contains(&(node, *id)) {
                ids.push(*id);
            }
        }
        ids.sort_unstable();
        ids
    }

    pub fn take(&mut self, node: NodeKey, id: ListenerId) -> Option<BoxListener<C, E>> {
        let table = self.tables.get_mut(&node)?;
        let listener = table.remove(&id)?;
        self.in_flight.insert((node, id));
        Some(listener)
    }

    /// Puts a taken listener back, unless it was removed while out.
    pub fn restore(&mut self, node: NodeKey, id: ListenerId, listener: BoxListener<C, E>) {
        self.in_flight.remove(&(node, id));
        if self.revoked.remove(&(node, id)) {
            return;
        }
        self.tables.entry(node).or_default().insert(id, listener);
    }

    pub fn has_listeners(&self, node: NodeKey) -> bool {
        self.tables.get(&node).is_some_and(|t| !t.is_empty())
    }

    /// Whether a listener is currently taken out for dispatch.
    pub fn is_in_flight(&self, node: NodeKey, id: ListenerId) -> bool {
        self.in_flight.contains(&(node, id))
    }

    /// Queues an event for a listener that is taken out for dispatch.
    pub fn defer(&mut self, node: NodeKey, id: ListenerId, event: E) {
        self.deferred.push((node, id, event));
    }

    /// Drains the queued events of one listener, in arrival order.
    pub fn take_deferred(&mut self, node: NodeKey, id: ListenerId) -> Vec<E> {
        let mut out = Vec::new();
        let mut kept = Vec::with_capacity(self.deferred.len());
        for entry in self.deferred.drain(..) {
            if (entry.0, entry.1) == (node, id) {
                out.push(entry.2);
            } else {
                kept.push(entry);
            }
        }
        self.deferred = kept;
        out
    }
}

impl<C, E> std::fmt::Debug for Emitter<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("nodes", &self.tables.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ctx {
        seen: Vec<&'static str>,
    }

    fn emit(emitter: &mut Emitter<Ctx, &'static str>, ctx: &mut Ctx, node: NodeKey, ev: &'static str) {
        for id in emitter.listener_ids(node) {
            if let Some(mut listener) = emitter.take(node, id) {
                listener(ctx, &ev);
                emitter.restore(node, id, listener);
                for deferred in emitter.take_deferred(node, id) {
                    if let Some(mut listener) = emitter.take(node, id) {
                        listener(ctx, &deferred);
                        emitter.restore(node, id, listener);
                    }
                }
            } else if emitter.is_in_flight(node, id) {
                emitter.defer(node, id, ev);
            }
        }
    }

    #[test]
    fn on_emit_off() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        let mut ctx = Ctx { seen: Vec::new() };
        let id = emitter.on(7, |ctx: &mut Ctx, ev: &&'static str| ctx.seen.push(ev));
        emit(&mut emitter, &mut ctx, 7, "a");
        assert!(emitter.off(7, id));
        emit(&mut emitter, &mut ctx, 7, "b");
        assert_eq!(ctx.seen, vec!["a"]);
        assert!(!emitter.off(7, id));
    }

    #[test]
    fn off_while_taken_is_honored_on_restore() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        let mut ctx = Ctx { seen: Vec::new() };
        let id = emitter.on(1, |ctx: &mut Ctx, ev: &&'static str| ctx.seen.push(ev));
        let listener = emitter.take(1, id).unwrap();
        assert!(emitter.off(1, id));
        emitter.restore(1, id, listener);
        assert!(!emitter.has_listeners(1));
    }

    #[test]
    fn listeners_are_scoped_per_node() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        let mut ctx = Ctx { seen: Vec::new() };
        emitter.on(1, |ctx: &mut Ctx, _: &&'static str| ctx.seen.push("one"));
        emitter.on(2, |ctx: &mut Ctx, _: &&'static str| ctx.seen.push("two"));
        emit(&mut emitter, &mut ctx, 2, "x");
        assert_eq!(ctx.seen, vec!["two"]);
    }

    #[test]
    fn taken_out_listener_is_still_visible_and_deferrable() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        let mut ctx = Ctx { seen: Vec::new() };
        let id = emitter.on(5, |ctx: &mut Ctx, ev: &&'static str| ctx.seen.push(ev));
        let listener = emitter.take(5, id).unwrap();
        assert!(emitter.listener_ids(5).contains(&id));
        assert!(emitter.is_in_flight(5, id));
        emitter.defer(5, id, "queued");
        emitter.restore(5, id, listener);
        assert_eq!(emitter.take_deferred(5, id), vec!["queued"]);
        assert!(emitter.take_deferred(5, id).is_empty());
        assert_eq!(ctx.seen, Vec::<&str>::new());
    }

    #[test]
    fn off_while_taken_discards_deferred_events() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        let id = emitter.on(6, |_: &mut Ctx, _: &&'static str| {});
        let listener = emitter.take(6, id).unwrap();
        emitter.defer(6, id, "stale");
        assert!(emitter.off(6, id));
        emitter.restore(6, id, listener);
        assert!(emitter.take_deferred(6, id).is_empty());
        assert!(!emitter.has_listeners(6));
    }

    #[test]
    fn drop_node_clears_all() {
        let mut emitter: Emitter<Ctx, &'static str> = Emitter::new();
        emitter.on(3, |_: &mut Ctx, _: &&'static str| {});
        emitter.on(3, |_: &mut Ctx, _: &&'static str| {});
        emitter.drop_node(3);
        assert!(!emitter.has_listeners(3));
        assert!(emitter.listener_ids(3).is_empty());
    }
}
