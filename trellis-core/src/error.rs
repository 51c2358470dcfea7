//! Error types for the reactive runtime.

use thiserror::Error;

/// Errors reported by the reactive runtime.
///
/// Most of these are programmer errors (reading a disposed handle, calling an
/// owner-scoped operation outside of any owner). The `try_*` accessors return
/// them directly; the plain accessors either panic or route them through the
/// configured [`MisusePolicy`](crate::MisusePolicy).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// The handle refers to a slot that has already been freed.
    #[error("{kind} {id} has been disposed")]
    Disposed {
        /// What kind of handle was used ("signal", "memo", "effect", "owner").
        kind: &'static str,
        /// Debug rendering of the stale key.
        id: String,
    },

    /// An owner-scoped operation ran with no owner active.
    #[error("`{operation}` called outside of any reactive owner")]
    NoOwner {
        /// The operation that needed an owner.
        operation: &'static str,
    },

    /// A computation tried to read its own value while it was running.
    #[error("cycle detected: {id} read itself while computing")]
    Cycle {
        /// Debug rendering of the node key.
        id: String,
    },

    /// A write reached a value that a `with` call is still borrowing.
    #[error("{kind} {id} is borrowed; write it after the borrow ends")]
    Borrowed {
        /// What kind of handle was written ("signal", "memo", "stored value").
        kind: &'static str,
        /// Debug rendering of the node key.
        id: String,
    },

    /// The value slot did not hold the type the handle expected.
    #[error("stored value is not a `{expected}`")]
    TypeMismatch {
        /// Type name the handle expected.
        expected: &'static str,
    },

    /// Effects kept re-scheduling each other past the configured limit.
    #[error("propagation did not settle after {limit} effect runs")]
    FlushLimit {
        /// The `max_flush_iterations` in effect at the time.
        limit: usize,
    },
}

impl ReactiveError {
    pub(crate) fn disposed(kind: &'static str, id: impl std::fmt::Debug) -> Self {
        Self::Disposed {
            kind,
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn borrowed(kind: &'static str, id: impl std::fmt::Debug) -> Self {
        Self::Borrowed {
            kind,
            id: format!("{id:?}"),
        }
    }

    pub(crate) fn type_mismatch<T>() -> Self {
        Self::TypeMismatch {
            expected: std::any::type_name::<T>(),
        }
    }

    /// Whether this error only says that a handle outlived its slot.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }
}
