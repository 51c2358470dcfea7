//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//!
//! Nodes are stored in a generational arena. A [`NodeId`] stays valid only
//! as long as the slot it names; once a node is disposed, the slot's
//! generation moves on and every outstanding handle becomes a detectable
//! stale key instead of a dangling reference.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

use super::owner::OwnerId;
use crate::error::ReactiveError;
use crate::reactive::Listener;

new_key_type! {
    /// Generational index of a node in the dependency graph.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (memo). These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Effect,
}

impl NodeKind {
    /// Name used in diagnostics and error messages.
    pub fn label(self) -> &'static str {
        match self {
            NodeKind::Source => "signal",
            NodeKind::Derived => "memo",
            NodeKind::Effect => "effect",
        }
    }
}

/// Dirty state of a node.
///
/// The ordering matters: marking only ever raises a node's state within a
/// propagation wave, and a run resets it to `Clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirtyState {
    /// The node's value is up-to-date.
    Clean,

    /// The node might need to recompute. One of its upstream nodes changed,
    /// but we have not yet verified whether its direct inputs are different.
    MaybeDirty,

    /// The node definitely needs to recompute. A direct input has changed.
    Dirty,
}

/// Where a computation is within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum RunPhase {
    #[default]
    Idle,

    /// Disposing what the previous run created. Reads see the previous value.
    CleaningUp,

    /// The body is executing.
    Running,
}

/// Type-erased value slot shared between the arena and typed handles.
pub(crate) type AnyValue = Rc<RefCell<dyn Any>>;

/// The body of a memo or effect, with its output type erased.
pub(crate) trait AnyComputation {
    /// Run the body of node `id` against its value slot.
    ///
    /// Returns whether the node's output changed; effects always report `true`.
    fn run(&self, id: NodeId, value: Option<&AnyValue>) -> Result<bool, ReactiveError>;
}

/// A node in the dependency graph.
pub(crate) struct ReactiveNode {
    kind: NodeKind,
    dirty: DirtyState,

    /// Value slot for sources and derived nodes. Effects hold none.
    pub(crate) value: Option<AnyValue>,

    /// Body for derived and effect nodes.
    pub(crate) computation: Option<Rc<dyn AnyComputation>>,

    /// The owner this node was created under, if any.
    pub(crate) owner: Option<OwnerId>,

    /// Scope owning everything created while this node's body runs.
    pub(crate) scope: Option<OwnerId>,

    /// Nodes that this node read during its last run.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read this node during their last run.
    dependents: IndexSet<NodeId>,

    /// External observers registered through `Signal::subscribe`.
    pub(crate) listeners: SmallVec<[Listener; 1]>,

    pub(crate) phase: RunPhase,

    /// Set when a run or check of this node panicked. Its dependents may not
    /// have been marked since it went stale.
    pub(crate) unwound: bool,

    /// Number of completed or attempted runs.
    pub(crate) runs: u64,

    /// Number of changes written to a source.
    pub(crate) version: u64,
}

impl ReactiveNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            dirty: match kind {
                NodeKind::Source => DirtyState::Clean,
                NodeKind::Derived => DirtyState::Dirty, // Start dirty to ensure first computation
                NodeKind::Effect => DirtyState::Dirty,
            },
            value: None,
            computation: None,
            owner: None,
            scope: None,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            listeners: SmallVec::new(),
            phase: RunPhase::Idle,
            unwound: false,
            runs: 0,
            version: 0,
        }
    }

    /// Create a new source (signal) node holding `value`.
    pub(crate) fn source(value: AnyValue) -> Self {
        Self {
            value: Some(value),
            ..Self::new(NodeKind::Source)
        }
    }

    /// Create a new derived (memo) node.
    pub(crate) fn derived(value: AnyValue, computation: Rc<dyn AnyComputation>) -> Self {
        Self {
            value: Some(value),
            computation: Some(computation),
            ..Self::new(NodeKind::Derived)
        }
    }

    /// Create a new effect node.
    pub(crate) fn effect(computation: Rc<dyn AnyComputation>) -> Self {
        Self {
            computation: Some(computation),
            ..Self::new(NodeKind::Effect)
        }
    }

    /// Get the node's kind.
    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub(crate) fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub(crate) fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as clean.
    pub(crate) fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty (an upstream node might have changed).
    pub(crate) fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty (needs recomputation).
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    /// Add a dependency (a node that this node reads from).
    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    /// Remove a dependency.
    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.swap_remove(&node_id);
    }

    /// Get all dependencies, in the order they were first read.
    pub(crate) fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Take the dependency set, leaving it empty.
    pub(crate) fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }

    /// Add a dependent (a node that reads from this node).
    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.swap_remove(&node_id);
    }

    /// Get all dependents.
    pub(crate) fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl AnyComputation for Noop {
        fn run(&self, _id: NodeId, _value: Option<&AnyValue>) -> Result<bool, ReactiveError> {
            Ok(true)
        }
    }

    fn slot() -> AnyValue {
        Rc::new(RefCell::new(0u8))
    }

    #[test]
    fn source_node_starts_clean() {
        let node = ReactiveNode::source(slot());
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert!(node.computation.is_none());
    }

    #[test]
    fn derived_and_effect_nodes_start_dirty() {
        let derived = ReactiveNode::derived(slot(), Rc::new(Noop));
        assert_eq!(derived.kind(), NodeKind::Derived);
        assert_eq!(derived.dirty_state(), DirtyState::Dirty);

        let effect = ReactiveNode::effect(Rc::new(Noop));
        assert_eq!(effect.kind(), NodeKind::Effect);
        assert_eq!(effect.dirty_state(), DirtyState::Dirty);
        assert!(effect.value.is_none());
    }

    #[test]
    fn dependency_management() {
        let mut arena = slotmap::SlotMap::<NodeId, ()>::with_key();
        let dep1 = arena.insert(());
        let dep2 = arena.insert(());

        let mut node = ReactiveNode::derived(slot(), Rc::new(Noop));
        node.add_dependency(dep1);
        node.add_dependency(dep2);
        node.add_dependency(dep1);

        assert_eq!(node.dependencies().len(), 2);

        node.remove_dependency(dep1);
        assert!(!node.dependencies().contains(&dep1));

        let taken = node.take_dependencies();
        assert_eq!(taken.len(), 1);
        assert!(node.dependencies().is_empty());
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = ReactiveNode::derived(slot(), Rc::new(Noop));

        node.mark_clean();
        assert_eq!(node.dirty_state(), DirtyState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        // maybe-dirty never downgrades a dirty node
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }
}
