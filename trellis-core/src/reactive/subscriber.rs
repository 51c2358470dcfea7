//! External listeners.
//!
//! A listener is a plain callback attached to a signal from outside the
//! dependency graph. It is not a computation: it is never scheduled, never
//! batched, and has no dependencies of its own. Boundary code uses it to
//! observe a signal and hand the new value to something non-reactive.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::NodeId;

use super::runtime::with_runtime;

/// Unique identifier for a listener.
///
/// Each call to `subscribe` gets a fresh ID, so the same closure can be
/// attached twice and removed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A listener as stored on its source node.
#[derive(Clone)]
pub(crate) struct Listener {
    pub(crate) id: SubscriberId,
    pub(crate) notify: Rc<dyn Fn()>,
}

impl Listener {
    pub(crate) fn new(notify: impl Fn() + 'static) -> Self {
        Self {
            id: SubscriberId::new(),
            notify: Rc::new(notify),
        }
    }
}

/// Handle returned by `Signal::subscribe`.
///
/// Dropping the handle does not detach the listener; call
/// [`unsubscribe`](Subscription::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "a listener stays attached until `unsubscribe` is called"]
pub struct Subscription {
    source: NodeId,
    id: SubscriberId,
}

impl Subscription {
    pub(crate) fn new(source: NodeId, id: SubscriberId) -> Self {
        Self { source, id }
    }

    /// The listener's ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the listener is still attached to a live signal.
    pub fn is_active(&self) -> bool {
        with_runtime(|rt| {
            rt.with_node(self.source, |node| {
                node.listeners.iter().any(|listener| listener.id == self.id)
            })
            .unwrap_or(false)
        })
    }

    /// Detach the listener. Returns `false` if it was already detached or
    /// the signal has been disposed.
    pub fn unsubscribe(self) -> bool {
        with_runtime(|rt| rt.remove_listener(self.source, self.id))
    }
}
