//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph and schedules updates when signals
//! change.
//!
//! # How It Works
//!
//! 1. When a signal, memo or effect is created, it is inserted into the graph
//!    under the current owner.
//!
//! 2. When a memo or effect reads a signal (or another memo), the runtime
//!    records the edge.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents dirty and everything downstream maybe-dirty
//!    b. Queues every effect it reached
//!    c. Flushes the queue unless a batch or a computation is in progress
//!    d. Memos are lazy: they only recompute when something pulls them
//!
//! # Thread Confinement
//!
//! There is one runtime per thread, reached through [`with_runtime`]. Handles
//! are plain keys into that thread's arenas; using a handle on another thread
//! finds nothing there and reports it as disposed.
//!
//! # Borrowing
//!
//! The graph sits behind a `RefCell`. No borrow is ever held across a call
//! into user code: values, computations and cleanups are cloned or moved out
//! of the arena first.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::config::config;
use crate::error::ReactiveError;
use crate::graph::{
    AnyValue, BatchGuard, Cleanup, DirtyState, EffectQueue, FlushGuard, NodeId, NodeKind,
    OwnerContents, OwnerId, PendingWave, ReactiveNode, RunPhase, UpdateScheduler,
};

use super::context::ReactiveContext;
use super::subscriber::{Listener, SubscriberId};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Run `f` against this thread's runtime.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// A point-in-time summary of this thread's reactive graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    /// Live signals (including triggers and resource state cells).
    pub sources: usize,
    /// Live memos.
    pub derived: usize,
    /// Live effects.
    pub effects: usize,
    /// Live owner scopes, roots and computation scopes alike.
    pub owners: usize,
    /// Effects queued but not yet run.
    pub pending_effects: usize,
    /// Memo and effect runs since the thread started.
    pub runs: u64,
}

/// Snapshot the current thread's runtime.
pub fn runtime_stats() -> RuntimeStats {
    with_runtime(Runtime::stats)
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    graph: RefCell<UpdateScheduler>,
    queue: EffectQueue,
    observer: Cell<Option<NodeId>>,
    owner: Cell<Option<OwnerId>>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            graph: RefCell::new(UpdateScheduler::new()),
            queue: EffectQueue::default(),
            observer: Cell::new(None),
            owner: Cell::new(None),
        }
    }

    pub(crate) fn stats(&self) -> RuntimeStats {
        let graph = self.graph.borrow();
        RuntimeStats {
            sources: graph.count_kind(NodeKind::Source),
            derived: graph.count_kind(NodeKind::Derived),
            effects: graph.count_kind(NodeKind::Effect),
            owners: graph.owner_count(),
            pending_effects: self.queue.len(),
            runs: self.queue.runs(),
        }
    }

    pub(crate) fn observer(&self) -> Option<NodeId> {
        self.observer.get()
    }

    pub(crate) fn set_observer(&self, observer: Option<NodeId>) -> Option<NodeId> {
        self.observer.replace(observer)
    }

    pub(crate) fn owner(&self) -> Option<OwnerId> {
        self.owner.get()
    }

    pub(crate) fn set_owner(&self, owner: Option<OwnerId>) -> Option<OwnerId> {
        self.owner.replace(owner)
    }

    pub(crate) fn queue(&self) -> &EffectQueue {
        &self.queue
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Insert a signal under the current owner.
    pub(crate) fn create_source(&self, value: AnyValue) -> NodeId {
        self.graph
            .borrow_mut()
            .add_node(ReactiveNode::source(value), self.owner.get())
    }

    /// Insert a memo or effect under the current owner, with a fresh scope
    /// for whatever its body creates.
    pub(crate) fn create_computation(&self, node: ReactiveNode) -> NodeId {
        let mut graph = self.graph.borrow_mut();
        let owner = self.owner.get();
        let id = graph.add_node(node, owner);
        let scope = graph.add_owner(owner, false);
        if let Some(node) = graph.get_node_mut(id) {
            node.scope = Some(scope);
        }
        trace!(?id, ?scope, "created computation");
        id
    }

    /// Create an owner nested under the current one.
    pub(crate) fn create_owner(&self) -> OwnerId {
        self.graph.borrow_mut().add_owner(self.owner.get(), true)
    }

    // ------------------------------------------------------------------
    // Node access
    // ------------------------------------------------------------------

    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&ReactiveNode) -> R) -> Option<R> {
        self.graph.borrow().get_node(id).map(f)
    }

    pub(crate) fn with_node_mut<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut ReactiveNode) -> R,
    ) -> Option<R> {
        self.graph.borrow_mut().get_node_mut(id).map(f)
    }

    pub(crate) fn contains_node(&self, id: NodeId) -> bool {
        self.graph.borrow().get_node(id).is_some()
    }

    pub(crate) fn contains_owner(&self, id: OwnerId) -> bool {
        self.graph.borrow().get_owner(id).is_some()
    }

    /// The node's value slot.
    pub(crate) fn value(&self, id: NodeId, kind: NodeKind) -> Result<AnyValue, ReactiveError> {
        self.graph
            .borrow()
            .get_node(id)
            .and_then(|node| node.value.clone())
            .ok_or_else(|| ReactiveError::disposed(kind.label(), id))
    }

    pub(crate) fn dirty_state(&self, id: NodeId) -> Option<DirtyState> {
        self.graph.borrow().dirty_state(id)
    }

    /// Record that the current observer read `source`.
    pub(crate) fn track(&self, source: NodeId) {
        if let Some(observer) = self.observer.get() {
            self.graph.borrow_mut().add_edge(source, observer);
        }
    }

    /// Bring a memo up to date and record the read.
    ///
    /// The edge is recorded even when the memo's body panics, so the reader
    /// hears about the memo's next change.
    pub(crate) fn read_derived(&self, id: NodeId) -> Result<(), ReactiveError> {
        let pending = TrackOnUnwind {
            runtime: self,
            source: id,
            observer: self.observer.get(),
        };
        self.update_if_necessary(id)?;
        drop(pending);
        self.track(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Push
    // ------------------------------------------------------------------

    /// A signal's value was replaced: notify listeners, mark the graph and
    /// flush unless something upstream is already doing so.
    pub(crate) fn source_changed(&self, source: NodeId) -> Result<(), ReactiveError> {
        let (effects, listeners) = {
            let mut graph = self.graph.borrow_mut();
            let node = graph
                .get_node_mut(source)
                .ok_or_else(|| ReactiveError::disposed(NodeKind::Source.label(), source))?;
            node.version += 1;
            let listeners: SmallVec<[Rc<dyn Fn()>; 1]> = node
                .listeners
                .iter()
                .map(|listener| listener.notify.clone())
                .collect();
            (graph.mark_changed(source), listeners)
        };

        trace!(?source, effects = effects.len(), "source changed");
        self.queue.enqueue(effects);

        for notify in listeners {
            notify();
        }

        self.flush_if_idle()
    }

    pub(crate) fn add_listener(
        &self,
        source: NodeId,
        listener: Listener,
    ) -> Result<(), ReactiveError> {
        self.with_node_mut(source, |node| node.listeners.push(listener))
            .ok_or_else(|| ReactiveError::disposed(NodeKind::Source.label(), source))
    }

    pub(crate) fn remove_listener(&self, source: NodeId, id: SubscriberId) -> bool {
        let removed = self.with_node_mut(source, |node| {
            let index = node.listeners.iter().position(|listener| listener.id == id)?;
            Some(node.listeners.remove(index))
        });
        // Drop the closure outside the arena borrow.
        matches!(removed, Some(Some(_)))
    }

    // ------------------------------------------------------------------
    // Pull
    // ------------------------------------------------------------------

    /// Bring a node up to date, re-running it only if one of its inputs
    /// actually changed.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (state, phase, kind) = self
            .with_node(id, |node| (node.dirty_state(), node.phase, node.kind()))
            .ok_or_else(|| ReactiveError::disposed("node", id))?;

        match phase {
            RunPhase::Running => {
                return Err(ReactiveError::Cycle {
                    id: format!("{id:?}"),
                })
            }
            // Cleanups of the previous run see the value that run produced.
            RunPhase::CleaningUp => return Ok(()),
            RunPhase::Idle => {}
        }

        if state == DirtyState::Clean {
            return Ok(());
        }

        let _unwind = UnwindGuard { runtime: self, id };

        if state == DirtyState::MaybeDirty {
            let dependencies = self.graph.borrow().dependencies_of(id);
            for dependency in dependencies {
                match self.update_if_necessary(dependency) {
                    Ok(()) => {}
                    Err(err) if err.is_disposed() => continue,
                    Err(err) => return Err(err),
                }
                // A recomputed input that changed marks us dirty; no need to
                // check the rest.
                if self.dirty_state(id) == Some(DirtyState::Dirty) {
                    break;
                }
            }
        }

        match self.dirty_state(id) {
            Some(DirtyState::Dirty) => self.run_node(id),
            Some(_) => {
                self.with_node_mut(id, ReactiveNode::mark_clean);
                trace!(?id, kind = kind.label(), "inputs unchanged");
                Ok(())
            }
            None => Err(ReactiveError::disposed(kind.label(), id)),
        }
    }

    /// Run a memo or effect body: dispose what its previous run created,
    /// sever its old edges and re-track from scratch.
    fn run_node(&self, id: NodeId) -> Result<(), ReactiveError> {
        let (computation, value, scope, kind) = self
            .with_node(id, |node| {
                (
                    node.computation.clone(),
                    node.value.clone(),
                    node.scope,
                    node.kind(),
                )
            })
            .ok_or_else(|| ReactiveError::disposed("node", id))?;

        let Some(computation) = computation else {
            return Ok(());
        };

        let outcome = {
            let _batch = BatchGuard::enter(&self.queue);

            if self
                .with_node_mut(id, |node| node.phase = RunPhase::CleaningUp)
                .is_none()
            {
                return Ok(());
            }
            let _phase = PhaseGuard { runtime: self, id };

            if let Some(scope) = scope {
                self.reset_owner(scope);
            }

            {
                let mut graph = self.graph.borrow_mut();
                graph.clear_dependencies(id);
                match graph.get_node_mut(id) {
                    Some(node) => {
                        node.mark_clean();
                        node.phase = RunPhase::Running;
                        node.runs += 1;
                    }
                    // A previous cleanup disposed the node.
                    None => return Ok(()),
                }
            }

            self.queue.record_run();
            trace!(?id, kind = kind.label(), "running computation");

            let _context = ReactiveContext::enter(Some(id), scope);
            computation.run(id, value.as_ref())
        };

        let changed = match outcome {
            Ok(changed) => changed,
            Err(err) => {
                // The result was not stored; run again on the next read.
                self.with_node_mut(id, ReactiveNode::mark_dirty);
                return Err(err);
            }
        };

        if changed && kind == NodeKind::Derived {
            let effects = self.graph.borrow_mut().mark_changed(id);
            self.queue.enqueue(effects);
        }

        self.flush_if_idle()
    }

    /// Drain the effect queue, unless a batch is open or a flush is already
    /// running further up the stack.
    pub(crate) fn flush_if_idle(&self) -> Result<(), ReactiveError> {
        if !self.queue.is_idle() || self.queue.len() == 0 {
            return Ok(());
        }

        let _flushing = FlushGuard::enter(&self.queue);
        let limit = config().max_flush_iterations;
        let mut processed = 0usize;

        loop {
            let mut wave = PendingWave::take(&self.queue);
            if wave.is_empty() {
                break;
            }
            trace!(effects = wave.len(), "flushing effects");

            while let Some(id) = wave.next() {
                if processed >= limit {
                    wave.discard();
                    let dropped = self.queue.clear();
                    debug!(limit, dropped, "flush limit reached");
                    return Err(ReactiveError::FlushLimit { limit });
                }
                processed += 1;

                match self.update_if_necessary(id) {
                    Ok(()) => {}
                    Err(err) if err.is_disposed() => {}
                    Err(err) => return Err(err),
                }
            }
        }

        trace!(processed, "flush finished");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Disposal
    // ------------------------------------------------------------------

    /// Dispose a node and everything its body created. Returns `false` if
    /// it was already gone.
    pub(crate) fn dispose_node(&self, id: NodeId) -> Result<bool, ReactiveError> {
        let disposed = {
            let _batch = BatchGuard::enter(&self.queue);
            self.release_node(id)
        };
        self.flush_if_idle()?;
        Ok(disposed)
    }

    /// Dispose an owner and everything under it. Returns `false` if it was
    /// already gone.
    pub(crate) fn dispose_owner(&self, id: OwnerId) -> Result<bool, ReactiveError> {
        let disposed = {
            let _batch = BatchGuard::enter(&self.queue);
            self.release_owner(id)
        };
        self.flush_if_idle()?;
        Ok(disposed)
    }

    fn release_node(&self, id: NodeId) -> bool {
        let removed = self.graph.borrow_mut().remove_node(id);
        let Some(node) = removed else {
            return false;
        };
        self.queue.remove(id);
        debug!(?id, kind = node.kind().label(), "disposed node");

        if let Some(scope) = node.scope {
            self.release_owner(scope);
        }
        // The node's value and body are dropped here, after the borrow ends.
        drop(node);
        true
    }

    fn release_owner(&self, id: OwnerId) -> bool {
        let removed = self.graph.borrow_mut().remove_owner(id);
        match removed {
            Some(contents) => {
                debug!(owner = ?id, "disposed owner");
                self.release_contents(contents);
                true
            }
            None => false,
        }
    }

    fn reset_owner(&self, id: OwnerId) {
        let contents = self.graph.borrow_mut().reset_owner(id);
        if let Some(contents) = contents {
            self.release_contents(contents);
        }
    }

    /// Child owners first, then nodes, then cleanups, each newest first.
    fn release_contents(&self, contents: OwnerContents) {
        let _context = ReactiveContext::enter(None, None);
        let OwnerContents {
            children,
            nodes,
            cleanups,
        } = contents;

        for child in children.into_iter().rev() {
            self.release_owner(child);
        }
        for node in nodes.into_iter().rev() {
            self.release_node(node);
        }
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
    }

    // ------------------------------------------------------------------
    // Owner data
    // ------------------------------------------------------------------

    pub(crate) fn register_cleanup(&self, cleanup: Cleanup) -> Result<(), ReactiveError> {
        let owner = self.owner.get().ok_or(ReactiveError::NoOwner {
            operation: "on_cleanup",
        })?;
        let mut graph = self.graph.borrow_mut();
        let node = graph
            .get_owner_mut(owner)
            .ok_or_else(|| ReactiveError::disposed("owner", owner))?;
        node.cleanups.push(cleanup);
        Ok(())
    }

    pub(crate) fn provide_context(
        &self,
        type_id: TypeId,
        value: Rc<dyn Any>,
    ) -> Result<Option<Rc<dyn Any>>, ReactiveError> {
        let owner = self.owner.get().ok_or(ReactiveError::NoOwner {
            operation: "provide_context",
        })?;
        let mut graph = self.graph.borrow_mut();
        let node = graph
            .get_owner_mut(owner)
            .ok_or_else(|| ReactiveError::disposed("owner", owner))?;
        Ok(node.contexts.insert(type_id, value))
    }

    /// Nearest value of the given type provided on the current owner or one
    /// of its ancestors.
    pub(crate) fn lookup_context(&self, type_id: TypeId) -> Option<Rc<dyn Any>> {
        let graph = self.graph.borrow();
        let mut cursor = self.owner.get();
        while let Some(id) = cursor {
            let owner = graph.get_owner(id)?;
            if let Some(value) = owner.contexts.get(&type_id) {
                return Some(value.clone());
            }
            cursor = owner.parent;
        }
        None
    }
}

/// Returns a node to `RunPhase::Idle` when its run finishes or unwinds.
struct PhaseGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut graph) = self.runtime.graph.try_borrow_mut() {
            if let Some(node) = graph.get_node_mut(self.id) {
                node.phase = RunPhase::Idle;
            }
        }
    }
}

/// Leaves a node dirty when bringing it up to date panics, so the next read
/// or notification retries it.
///
/// The node is also flagged as unwound: the next change that reaches it
/// marks its dependents again even though it is already stale.
struct UnwindGuard<'a> {
    runtime: &'a Runtime,
    id: NodeId,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        if let Ok(mut graph) = self.runtime.graph.try_borrow_mut() {
            if let Some(node) = graph.get_node_mut(self.id) {
                node.mark_dirty();
                node.unwound = true;
            }
        }
    }
}

/// Records a memo read whose update is unwinding.
struct TrackOnUnwind<'a> {
    runtime: &'a Runtime,
    source: NodeId,
    observer: Option<NodeId>,
}

impl Drop for TrackOnUnwind<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        if let (Some(observer), Ok(mut graph)) =
            (self.observer, self.runtime.graph.try_borrow_mut())
        {
            graph.add_edge(self.source, observer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{configure, MisusePolicy};
    use crate::reactive::{batch, create_root, on_cleanup, Effect, Memo, Signal};

    #[test]
    fn stats_count_live_nodes() {
        let before = runtime_stats();

        create_root(|owner| {
            let signal = Signal::new(1);
            let memo = Memo::new(move || signal.get() + 1);
            let _effect = Effect::new(move || {
                memo.get();
            });

            let during = runtime_stats();
            assert_eq!(during.sources, before.sources + 1);
            assert_eq!(during.derived, before.derived + 1);
            assert_eq!(during.effects, before.effects + 1);
            assert!(during.runs >= before.runs + 2);

            owner.dispose();
        });

        let after = runtime_stats();
        assert_eq!(after.sources, before.sources);
        assert_eq!(after.derived, before.derived);
        assert_eq!(after.effects, before.effects);
        assert_eq!(after.owners, before.owners);
    }

    #[test]
    fn pending_effects_visible_inside_batch() {
        let signal = Signal::new(0);
        let _effect = Effect::new(move || {
            signal.get();
        });

        batch(|| {
            signal.set(1);
            assert_eq!(runtime_stats().pending_effects, 1);
        });
        assert_eq!(runtime_stats().pending_effects, 0);
    }

    #[test]
    fn runaway_effects_hit_the_flush_limit() {
        configure(|cfg| {
            cfg.max_flush_iterations = 10;
            cfg.misuse = MisusePolicy::Warn;
        });

        let a = Signal::new(0u32);
        let b = Signal::new(0u32);
        let ping = Effect::new(move || b.set(a.get() + 1));
        let pong = Effect::new(move || a.set(b.get() + 1));

        // Creating `pong` closed the loop; the flush gave up and dropped the queue.
        assert_eq!(runtime_stats().pending_effects, 0);
        assert!(ping.run_count() + pong.run_count() <= 12);

        assert_eq!(a.try_set(1_000), Err(ReactiveError::FlushLimit { limit: 10 }));
        assert_eq!(runtime_stats().pending_effects, 0);
    }

    #[test]
    fn cleanup_reads_the_previous_value_without_rerunning() {
        let source = Signal::new(1);
        let slot: Rc<Cell<Option<Memo<i32>>>> = Rc::new(Cell::new(None));
        let seen = Rc::new(Cell::new(0));

        let slot_clone = slot.clone();
        let seen_clone = seen.clone();
        let memo = Memo::new(move || {
            let value = source.get() * 10;
            if let Some(me) = slot_clone.get() {
                let seen = seen_clone.clone();
                on_cleanup(move || seen.set(me.try_get().unwrap_or(-1)));
            }
            value
        });
        slot.set(Some(memo));

        assert_eq!(memo.get(), 10);
        source.set(2);
        assert_eq!(memo.get(), 20);
        assert_eq!(memo.run_count(), 2);
        assert_eq!(seen.get(), 10);
    }

    #[test]
    fn memo_reading_itself_is_a_cycle() {
        let slot: Rc<Cell<Option<Memo<u32>>>> = Rc::new(Cell::new(None));
        let slot_clone = slot.clone();
        let memo = Memo::new(move || match slot_clone.get() {
            Some(me) => me.try_get().map(|v| v + 1).unwrap_or(0),
            None => 1,
        });
        slot.set(Some(memo));

        assert_eq!(memo.get(), 0);
        assert!(memo.try_get().is_ok_and(|value| value == 0));
    }
}
