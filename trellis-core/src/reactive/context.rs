//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which owner new nodes are attached to. When a signal is read, the current
//! observer (if any) is registered as a dependent.
//!
//! # Implementation
//!
//! Both slots live on the thread's runtime. Entering a context swaps new
//! values in and the returned guard swaps the previous values back when it
//! is dropped, so nesting (a memo read from inside an effect, an `untrack`
//! inside a memo) restores the outer context on every exit path, including
//! a panic unwinding through the computation.

use crate::graph::{NodeId, OwnerId};

use super::runtime::with_runtime;

/// Guard that restores the previous observer and owner when dropped.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct ReactiveContext {
    observer: Option<NodeId>,
    prev_observer: Option<NodeId>,
    prev_owner: Option<OwnerId>,
}

impl ReactiveContext {
    /// Make `observer` the tracking computation and `owner` the current
    /// owner until the guard is dropped.
    pub(crate) fn enter(observer: Option<NodeId>, owner: Option<OwnerId>) -> Self {
        with_runtime(|rt| Self {
            observer,
            prev_observer: rt.set_observer(observer),
            prev_owner: rt.set_owner(owner),
        })
    }

    /// Stop tracking until the guard is dropped. The current owner is kept.
    pub fn untracked() -> Self {
        with_runtime(|rt| {
            let owner = rt.owner();
            Self {
                observer: None,
                prev_observer: rt.set_observer(None),
                prev_owner: rt.set_owner(owner),
            }
        })
    }

    /// Check if a computation is currently tracking reads.
    pub fn is_active() -> bool {
        Self::current_observer().is_some()
    }

    /// The computation that reads are currently attributed to, if any.
    pub fn current_observer() -> Option<NodeId> {
        with_runtime(|rt| rt.observer())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        with_runtime(|rt| {
            let current = rt.set_observer(self.prev_observer);
            rt.set_owner(self.prev_owner);

            debug_assert_eq!(
                current, self.observer,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.observer, current
            );
        });
    }
}

/// Run `f` without registering any dependencies.
///
/// Reads inside `f` see current values but do not subscribe the enclosing
/// computation, so later writes to them do not re-run it.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _untracked = ReactiveContext::untracked();
    f()
}

/// Check if a computation is currently tracking reads.
pub fn is_tracking() -> bool {
    ReactiveContext::is_active()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_root, Effect, Owner, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn no_context_outside_computations() {
        assert!(!is_tracking());
        assert!(ReactiveContext::current_observer().is_none());
    }

    #[test]
    fn effect_body_is_tracking_and_untrack_is_not() {
        let seen = Rc::new(Cell::new((false, true)));
        let seen_clone = seen.clone();

        let _effect = Effect::new(move || {
            let inside = is_tracking();
            let untracked = untrack(is_tracking);
            seen_clone.set((inside, untracked));
        });

        assert_eq!(seen.get(), (true, false));
        assert!(!is_tracking());
    }

    #[test]
    fn untrack_keeps_the_owner() {
        create_root(|owner| {
            let inner = untrack(Owner::current);
            assert_eq!(inner, Some(owner));
        });
    }

    #[test]
    fn nested_contexts_restore_on_panic() {
        let signal = Signal::new(0);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            untrack(|| {
                let _ = signal.get();
                panic!("boom");
            })
        }));

        assert!(result.is_err());
        assert!(!is_tracking());
        assert!(Owner::current().is_none());
    }
}
