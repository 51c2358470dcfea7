//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and re-run before
//!    the write returns (or when the outermost batch finishes).
//!
//! 3. Before re-running, the effect runs the cleanups registered during its
//!    previous run, disposes whatever that run created, and clears its old
//!    dependencies. It then tracks new ones during execution.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Teardown is registered from inside the body with
//! [`on_cleanup`](super::on_cleanup). It runs before the next run and when
//! the effect is disposed.

use std::cell::RefCell;
use std::rc::Rc;

use crate::config::report_misuse;
use crate::error::ReactiveError;
use crate::graph::{AnyComputation, AnyValue, NodeId, ReactiveNode};

use super::context::untrack;
use super::runtime::with_runtime;

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use trellis_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Rc::new(Cell::new(-1));
///
/// let seen_clone = seen.clone();
/// let _effect = Effect::new(move || seen_clone.set(count.get()));
/// assert_eq!(seen.get(), 0);
///
/// count.set(5);
/// assert_eq!(seen.get(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

struct EffectComputation<F> {
    run: RefCell<F>,
}

impl<F: FnMut()> AnyComputation for EffectComputation<F> {
    fn run(&self, _id: NodeId, _value: Option<&AnyValue>) -> Result<bool, ReactiveError> {
        // The runtime never re-enters a running node.
        (self.run.borrow_mut())();
        Ok(true)
    }
}

impl Effect {
    /// Create a new effect under the current owner and run it once.
    ///
    /// A panic in the first run propagates to the caller; the effect stays
    /// registered with whatever dependencies it read before panicking.
    pub fn new(run: impl FnMut() + 'static) -> Self {
        let computation = Rc::new(EffectComputation {
            run: RefCell::new(run),
        });

        let (id, result) = with_runtime(|rt| {
            let id = rt.create_computation(ReactiveNode::effect(computation));
            (id, rt.update_if_necessary(id))
        });
        if let Err(err) = result {
            report_misuse(err);
        }

        Self { id }
    }

    /// Create an effect that runs `run` a single time, untracked.
    ///
    /// Nothing it reads is tracked, so it never re-runs. Cleanups it
    /// registers run when the effect or its owner is disposed.
    pub fn once(run: impl FnOnce() + 'static) -> Self {
        let mut run = Some(run);
        Self::new(move || {
            if let Some(run) = run.take() {
                untrack(run);
            }
        })
    }

    /// Get the effect's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the number of times this effect has run.
    pub fn run_count(&self) -> u64 {
        with_runtime(|rt| rt.with_node(self.id, |node| node.runs)).unwrap_or(0)
    }

    /// Get the number of dependencies read on the last run.
    pub fn dependency_count(&self) -> usize {
        with_runtime(|rt| rt.with_node(self.id, |node| node.dependencies().len())).unwrap_or(0)
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.contains_node(self.id))
    }

    /// Dispose of the effect.
    ///
    /// Runs pending cleanups, severs every dependency edge and removes the
    /// effect from its owner. Disposing twice is a no-op.
    pub fn dispose(&self) {
        if let Err(err) = with_runtime(|rt| rt.dispose_node(self.id)) {
            report_misuse(err);
        }
    }
}

/// Create an effect.
pub fn create_effect(run: impl FnMut() + 'static) -> Effect {
    Effect::new(run)
}

/// Run `callback` whenever the value produced by `source` changes.
///
/// Only `source` is tracked; `callback` runs untracked with the new value
/// and the previous one (`None` on the first run).
pub fn watch<T, S, C>(source: S, mut callback: C) -> Effect
where
    T: PartialEq + 'static,
    S: Fn() -> T + 'static,
    C: FnMut(&T, Option<&T>) + 'static,
{
    let mut previous: Option<T> = None;
    Effect::new(move || {
        let next = source();
        if previous.as_ref() == Some(&next) {
            return;
        }
        untrack(|| callback(&next, previous.as_ref()));
        previous = Some(next);
    })
}
