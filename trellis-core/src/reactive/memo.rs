//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. Creating a memo does not run it. It starts dirty.
//!
//! 2. On first access, the memo runs its computation and caches the result.
//!
//! 3. When a dependency changes, the memo is marked dirty (direct input) or
//!    maybe-dirty (something further upstream). Nothing runs yet.
//!
//! 4. On next access, a maybe-dirty memo first brings its own inputs up to
//!    date. It only recomputes if one of them actually produced a new value.
//!
//! 5. If the recomputed value equals the cached one, dependents are left
//!    alone.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay dirty (no wasted work)

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::config::report_misuse;
use crate::error::ReactiveError;
use crate::graph::{AnyComputation, AnyValue, DirtyState, NodeId, NodeKind, ReactiveNode};

use super::batch::defer_effects;
use super::context::untrack;
use super::runtime::with_runtime;

/// A cached derived value that recomputes only when dependencies change.
///
/// Dependents are only notified when a recomputed value differs from the
/// cached one. [`Memo::new`] compares with `PartialEq`;
/// [`Memo::new_with_compare`] takes the comparison as a closure.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{Memo, Signal};
///
/// let count = Signal::new(2);
/// let doubled = Memo::new(move || count.get() * 2);
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5);
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T: 'static> {
    id: NodeId,
    ty: PhantomData<fn() -> T>,
}

/// Memo body with its output type restored.
struct MemoComputation<T, F, E> {
    compute: F,
    equal: E,
    ty: PhantomData<fn() -> T>,
}

impl<T, F, E> AnyComputation for MemoComputation<T, F, E>
where
    T: 'static,
    F: Fn() -> T,
    E: Fn(&T, &T) -> bool,
{
    fn run(&self, id: NodeId, value: Option<&AnyValue>) -> Result<bool, ReactiveError> {
        let next = (self.compute)();
        let Some(slot) = value else {
            return Ok(true);
        };

        let previous = {
            let mut slot = slot
                .try_borrow_mut()
                .map_err(|_| ReactiveError::borrowed(NodeKind::Derived.label(), id))?;
            let current = slot
                .downcast_mut::<Option<T>>()
                .ok_or_else(ReactiveError::type_mismatch::<T>)?;
            if current.as_ref().is_some_and(|current| (self.equal)(current, &next)) {
                return Ok(false);
            }
            current.replace(next)
        };
        drop(previous);
        Ok(true)
    }
}

impl<T: PartialEq + 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::new_with_compare(compute, T::eq)
    }
}

impl<T: 'static> Memo<T> {
    /// Create a memo that decides with `equal(previous, next)` whether a
    /// recomputed value counts as unchanged.
    ///
    /// # Example
    ///
    /// ```rust
    /// use trellis_core::reactive::{Memo, Signal};
    ///
    /// let items = Signal::new(vec![1, 2, 3]);
    /// // Only the length matters to readers.
    /// let sized = Memo::new_with_compare(move || items.get(), |a, b| a.len() == b.len());
    /// assert_eq!(sized.with(Vec::len), 3);
    /// ```
    pub fn new_with_compare(
        compute: impl Fn() -> T + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let slot: AnyValue = Rc::new(RefCell::new(None::<T>));
        let computation = Rc::new(MemoComputation {
            compute,
            equal,
            ty: PhantomData,
        });
        let id = with_runtime(|rt| rt.create_computation(ReactiveNode::derived(slot, computation)));
        Self {
            id,
            ty: PhantomData,
        }
    }

    /// Get the memo's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the value, recomputing it first if necessary, and subscribe
    /// the running computation.
    ///
    /// Effects triggered by writes inside `f` run after `f` returns.
    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        let slot = with_runtime(|rt| {
            let slot = rt.value(self.id, NodeKind::Derived)?;
            rt.read_derived(self.id)?;
            Ok::<_, ReactiveError>(slot)
        })?;

        defer_effects(|| {
            let value = slot.borrow();
            let value = value
                .downcast_ref::<Option<T>>()
                .ok_or_else(ReactiveError::type_mismatch::<T>)?;
            // Only a read from the memo's own first cleanup finds no value.
            let value = value.as_ref().ok_or_else(|| ReactiveError::Cycle {
                id: format!("{:?}", self.id),
            })?;
            Ok(f(value))
        })
    }

    /// Borrow the value, recomputing it first if necessary.
    ///
    /// # Panics
    ///
    /// Panics if the memo has been disposed, if it reads itself while
    /// computing, or if its computation panics.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.try_with(f).unwrap_or_else(|err| panic!("{err}"))
    }

    /// Borrow the value without subscribing anything.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        untrack(|| self.with(f))
    }

    /// Current dirty state, or `None` once disposed.
    pub fn state(&self) -> Option<DirtyState> {
        with_runtime(|rt| rt.dirty_state(self.id))
    }

    /// Check if the cached value may be out of date.
    pub fn is_stale(&self) -> bool {
        self.state().is_some_and(|state| state != DirtyState::Clean)
    }

    /// Number of times the computation has run.
    pub fn run_count(&self) -> u64 {
        with_runtime(|rt| rt.with_node(self.id, |node| node.runs)).unwrap_or(0)
    }

    /// Number of computations that read this memo on their last run.
    pub fn dependent_count(&self) -> usize {
        with_runtime(|rt| rt.with_node(self.id, |node| node.dependents().len())).unwrap_or(0)
    }

    /// Number of nodes this memo read on its last run.
    pub fn dependency_count(&self) -> usize {
        with_runtime(|rt| rt.with_node(self.id, |node| node.dependencies().len())).unwrap_or(0)
    }

    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.contains_node(self.id))
    }

    /// Free the memo, its cached value and anything its computation created.
    pub fn dispose(&self) {
        if let Err(err) = with_runtime(|rt| rt.dispose_node(self.id)) {
            report_misuse(err);
        }
    }
}

impl<T: Clone + 'static> Memo<T> {
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.try_with(T::clone)
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a memo's value.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for Memo<T> {}

impl<T: 'static> PartialEq for Memo<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for Memo<T> {}

impl<T: 'static> Hash for Memo<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("run_count", &self.run_count())
            .finish()
    }
}

/// Create a memo.
pub fn create_memo<T: PartialEq + 'static>(compute: impl Fn() -> T + 'static) -> Memo<T> {
    Memo::new(compute)
}

/// Create a memo with a custom equality check.
pub fn create_memo_with_compare<T: 'static>(
    compute: impl Fn() -> T + 'static,
    equal: impl Fn(&T, &T) -> bool + 'static,
) -> Memo<T> {
    Memo::new_with_compare(compute, equal)
}
