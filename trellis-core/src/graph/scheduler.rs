//! Update Scheduler
//!
//! The scheduler owns the node and owner arenas and decides which nodes need
//! attention after a source changes.
//!
//! # Algorithm
//!
//! Propagation is split into a push phase and a pull phase:
//!
//! 1. When a source changes, its direct dependents are marked `Dirty` and
//!    everything further downstream is marked `MaybeDirty`. Every effect
//!    reached on the way is queued. No user code runs during this phase.
//! 2. When the queue is flushed, each effect pulls: for a `MaybeDirty` node,
//!    its dependencies are brought up to date first, in the order they were
//!    read. A derived node whose value actually changed marks its own
//!    dependents `Dirty`. A node still `MaybeDirty` after the check is clean.
//!
//! Because a node is only re-run after all of its inputs have settled, a
//! node reachable along several paths from the same change runs once.

use std::cell::{Cell, RefCell};

use indexmap::IndexSet;
use slotmap::SlotMap;

use super::node::{DirtyState, NodeId, NodeKind, ReactiveNode};
use super::owner::{OwnerContents, OwnerId, OwnerNode};

/// The dependency graph: node arena, owner arena, and the edges between nodes.
pub(crate) struct UpdateScheduler {
    nodes: SlotMap<NodeId, ReactiveNode>,
    owners: SlotMap<OwnerId, OwnerNode>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub(crate) fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            owners: SlotMap::with_key(),
        }
    }

    /// Add a node to the graph, registered with `owner` if it is still alive.
    pub(crate) fn add_node(&mut self, mut node: ReactiveNode, owner: Option<OwnerId>) -> NodeId {
        let owner = owner.filter(|owner| self.owners.contains_key(*owner));
        node.owner = owner;
        let id = self.nodes.insert(node);
        if let Some(owner) = owner {
            self.owners[owner].nodes.insert(id);
        }
        id
    }

    /// Add an owner nested under `parent`.
    ///
    /// When `attach` is set, the owner is also recorded as one of the parent's
    /// children so that disposing the parent disposes it. Computation scopes
    /// are not attached: they are reached through their node instead.
    pub(crate) fn add_owner(&mut self, parent: Option<OwnerId>, attach: bool) -> OwnerId {
        let parent = parent.filter(|parent| self.owners.contains_key(*parent));
        let id = self.owners.insert(OwnerNode::new(parent));
        if let (true, Some(parent)) = (attach, parent) {
            self.owners[parent].children.insert(id);
        }
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node and unregisters it from its owner.
    pub(crate) fn remove_node(&mut self, node_id: NodeId) -> Option<ReactiveNode> {
        let node = self.nodes.remove(node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(*dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(*dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        if let Some(owner) = node.owner.and_then(|owner| self.owners.get_mut(owner)) {
            owner.nodes.shift_remove(&node_id);
        }

        Some(node)
    }

    /// Remove an owner, returning what it held so the caller can dispose it.
    pub(crate) fn remove_owner(&mut self, owner_id: OwnerId) -> Option<OwnerContents> {
        let mut owner = self.owners.remove(owner_id)?;
        if let Some(parent) = owner.parent.and_then(|parent| self.owners.get_mut(parent)) {
            parent.children.shift_remove(&owner_id);
        }
        Some(owner.take_contents())
    }

    /// Empty an owner in place, returning what it held.
    pub(crate) fn reset_owner(&mut self, owner_id: OwnerId) -> Option<OwnerContents> {
        self.owners
            .get_mut(owner_id)
            .map(OwnerNode::take_contents)
            .filter(|contents| !contents.is_empty())
    }

    /// Get a reference to a node.
    pub(crate) fn get_node(&self, node_id: NodeId) -> Option<&ReactiveNode> {
        self.nodes.get(node_id)
    }

    /// Get a mutable reference to a node.
    pub(crate) fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut ReactiveNode> {
        self.nodes.get_mut(node_id)
    }

    /// Get a reference to an owner.
    pub(crate) fn get_owner(&self, owner_id: OwnerId) -> Option<&OwnerNode> {
        self.owners.get(owner_id)
    }

    /// Get a mutable reference to an owner.
    pub(crate) fn get_owner_mut(&mut self, owner_id: OwnerId) -> Option<&mut OwnerNode> {
        self.owners.get_mut(owner_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    ///
    /// This means when `dependency` changes, `dependent` may need to update.
    /// Edges to or from freed slots are ignored.
    pub(crate) fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if dependency == dependent
            || !self.nodes.contains_key(dependency)
            || !self.nodes.contains_key(dependent)
        {
            return;
        }
        self.nodes[dependency].add_dependent(dependent);
        self.nodes[dependent].add_dependency(dependency);
    }

    /// Sever every edge from `node_id` to the nodes it read.
    ///
    /// Costs one constant-time removal per dependency.
    pub(crate) fn clear_dependencies(&mut self, node_id: NodeId) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return;
        };
        for dep_id in node.take_dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }
    }

    /// Mark the direct dependents of a changed node `Dirty`, everything
    /// further downstream `MaybeDirty`.
    ///
    /// Returns the effects reached, in discovery order.
    pub(crate) fn mark_changed(&mut self, source_id: NodeId) -> Vec<NodeId> {
        let mut effects = Vec::new();
        let Some(source) = self.nodes.get(source_id) else {
            return effects;
        };

        let mut stack: Vec<(NodeId, DirtyState)> = source
            .dependents()
            .iter()
            .rev()
            .map(|id| (*id, DirtyState::Dirty))
            .collect();

        // Depth-first so that effects are queued in subscription order
        while let Some((node_id, level)) = stack.pop() {
            let Some(node) = self.nodes.get_mut(node_id) else {
                continue;
            };

            let was_clean = node.is_clean();
            let propagate = was_clean || std::mem::take(&mut node.unwound);
            match level {
                DirtyState::Dirty => node.mark_dirty(),
                _ => node.mark_maybe_dirty(),
            }

            if node.kind() == NodeKind::Effect {
                effects.push(node_id);
            }

            // A node that was already stale has already marked its dependents,
            // unless the pass that staled it was cut short by a panic
            if propagate {
                stack.extend(
                    node.dependents()
                        .iter()
                        .rev()
                        .map(|id| (*id, DirtyState::MaybeDirty)),
                );
            }
        }

        effects
    }

    /// Current dirty state of a node, if it is alive.
    pub(crate) fn dirty_state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(node_id).map(ReactiveNode::dirty_state)
    }

    /// Snapshot of a node's dependencies, in read order.
    pub(crate) fn dependencies_of(&self, node_id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node_id)
            .map(|node| node.dependencies().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of live nodes of the given kind.
    pub(crate) fn count_kind(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|node| node.kind() == kind).count()
    }

    /// Get the total number of live owners, computation scopes included.
    pub(crate) fn owner_count(&self) -> usize {
        self.owners.len()
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Effects waiting to run, plus the batching state that decides when they do.
#[derive(Default)]
pub(crate) struct EffectQueue {
    /// Nesting depth of `batch` calls and node runs.
    depth: Cell<usize>,

    /// Set while the queue is being drained.
    flushing: Cell<bool>,

    /// Effects to run, deduplicated, in the order they were queued.
    pending: RefCell<IndexSet<NodeId>>,

    /// Total computation runs on this thread.
    runs: Cell<u64>,
}

impl EffectQueue {
    /// Queue effects for the next flush. Duplicates are dropped.
    pub(crate) fn enqueue(&self, effects: impl IntoIterator<Item = NodeId>) {
        self.pending.borrow_mut().extend(effects);
    }

    /// Take everything queued so far.
    pub(crate) fn take_pending(&self) -> IndexSet<NodeId> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    /// Drop a single effect from the queue.
    pub(crate) fn remove(&self, node_id: NodeId) {
        self.pending.borrow_mut().shift_remove(&node_id);
    }

    /// Drop everything queued, returning how many effects were discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut pending = self.pending.borrow_mut();
        let dropped = pending.len();
        pending.clear();
        dropped
    }

    /// Number of queued effects.
    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether writes should only queue effects right now.
    pub(crate) fn is_batching(&self) -> bool {
        self.depth.get() > 0
    }

    /// Whether a flush may start: no batch open and no flush in progress.
    pub(crate) fn is_idle(&self) -> bool {
        self.depth.get() == 0 && !self.flushing.get()
    }

    pub(crate) fn record_run(&self) {
        self.runs.set(self.runs.get() + 1);
    }

    pub(crate) fn runs(&self) -> u64 {
        self.runs.get()
    }
}

/// Holds the queue in batching mode until dropped, including during unwinding.
pub(crate) struct BatchGuard<'a> {
    queue: &'a EffectQueue,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn enter(queue: &'a EffectQueue) -> Self {
        queue.depth.set(queue.depth.get() + 1);
        Self { queue }
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.queue.depth.set(self.queue.depth.get().saturating_sub(1));
    }
}

/// Marks the queue as draining until dropped.
pub(crate) struct FlushGuard<'a> {
    queue: &'a EffectQueue,
}

impl<'a> FlushGuard<'a> {
    pub(crate) fn enter(queue: &'a EffectQueue) -> Self {
        queue.flushing.set(true);
        Self { queue }
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.queue.flushing.set(false);
    }
}

/// One drained batch of queued effects.
///
/// Whatever has not been handed out when the wave is dropped goes back on the
/// queue, so an effect that panics mid-flush does not strand the effects
/// behind it.
pub(crate) struct PendingWave<'a> {
    queue: &'a EffectQueue,
    ids: Vec<NodeId>,
    cursor: usize,
}

impl<'a> PendingWave<'a> {
    /// Drain the queue into a new wave.
    pub(crate) fn take(queue: &'a EffectQueue) -> Self {
        Self {
            ids: queue.take_pending().into_iter().collect(),
            queue,
            cursor: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Forget the rest of the wave instead of re-queueing it.
    pub(crate) fn discard(&mut self) {
        self.cursor = self.ids.len();
    }
}

impl Iterator for PendingWave<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.ids.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(id)
    }
}

impl Drop for PendingWave<'_> {
    fn drop(&mut self) {
        if self.cursor < self.ids.len() {
            self.queue.enqueue(self.ids[self.cursor..].iter().copied());
        }
    }
}
