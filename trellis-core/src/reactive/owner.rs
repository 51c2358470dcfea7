//! Ownership and disposal.
//!
//! Every signal, memo and effect is created under the owner that is current
//! at the time. Disposing an owner disposes everything beneath it: child
//! owners, then nodes, then registered cleanups, newest first. Memos and
//! effects carry their own scope, which is emptied before each re-run, so
//! whatever a computation creates lives exactly as long as that run.

use std::any::{Any, TypeId};
use std::rc::Rc;

use crate::config::report_misuse;
use crate::graph::OwnerId;

use super::context::ReactiveContext;
use super::runtime::with_runtime;

/// Handle to a disposal scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: OwnerId,
}

impl Owner {
    /// The owner new nodes are currently attached to, if any.
    pub fn current() -> Option<Owner> {
        with_runtime(|rt| rt.owner()).map(|id| Owner { id })
    }

    /// Get the owner's ID.
    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Check whether the owner has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.contains_owner(self.id))
    }

    /// Dispose everything created under this owner.
    ///
    /// Idempotent: only the first call does anything.
    pub fn dispose(&self) {
        match with_runtime(|rt| rt.dispose_owner(self.id)) {
            Ok(_) => {}
            Err(err) => report_misuse(err),
        }
    }

    /// Run `f` with this owner current and tracking off.
    ///
    /// Useful for creating nodes under an owner from a callback that runs
    /// later, such as an async continuation.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> R {
        let _context = ReactiveContext::enter(None, Some(self.id));
        f()
    }
}

/// Create a new owner scope and run `f` inside it.
///
/// The scope is a child of the current owner (or a new root if there is
/// none). `f` receives the scope's [`Owner`]; calling
/// [`Owner::dispose`] tears down everything created inside.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{create_root, Effect, Signal};
///
/// let count = Signal::new(0);
/// create_root(|owner| {
///     Effect::new(move || {
///         count.get();
///     });
///     owner.dispose();
/// });
/// assert_eq!(count.subscriber_count(), 0);
/// ```
pub fn create_root<T>(f: impl FnOnce(Owner) -> T) -> T {
    let id = with_runtime(|rt| rt.create_owner());
    let _context = ReactiveContext::enter(None, Some(id));
    f(Owner { id })
}

/// Register `f` to run when the current scope is torn down.
///
/// Inside a memo or effect this is the next re-run or disposal of that
/// computation. Inside `create_root` (but outside any computation) it is the
/// disposal of the root. With no owner at all the callback is dropped and
/// the misuse is reported.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    if let Err(err) = with_runtime(|rt| rt.register_cleanup(Box::new(f))) {
        report_misuse(err);
    }
}

/// Make `value` available to everything created under the current owner.
///
/// Providing a second value of the same type on the same owner replaces the
/// first.
pub fn provide_context<T: 'static>(value: T) {
    let value: Rc<dyn Any> = Rc::new(value);
    match with_runtime(|rt| rt.provide_context(TypeId::of::<T>(), value)) {
        // The replaced value is dropped here, outside the arena borrow.
        Ok(_previous) => {}
        Err(err) => report_misuse(err),
    }
}

/// Look up the nearest `T` provided on the current owner or its ancestors.
pub fn use_context<T: Clone + 'static>() -> Option<T> {
    let value = with_runtime(|rt| rt.lookup_context(TypeId::of::<T>()))?;
    value.downcast_ref::<T>().cloned()
}
