//! A signal with no value.

use crate::error::ReactiveError;
use crate::graph::NodeId;

use super::signal::Signal;

/// A value-less notifier.
///
/// `track` subscribes the running computation, `notify` re-runs everything
/// that tracked it. Useful for invalidating computations that read state
/// living outside the reactive graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trigger {
    signal: Signal<()>,
}

impl Trigger {
    pub fn new() -> Self {
        Self {
            signal: Signal::new(()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.signal.id()
    }

    /// Subscribe the running computation.
    pub fn try_track(&self) -> Result<(), ReactiveError> {
        self.signal.try_with(|_| ())
    }

    /// Subscribe the running computation.
    ///
    /// # Panics
    ///
    /// Panics if the trigger has been disposed.
    pub fn track(&self) {
        self.signal.with(|_| ())
    }

    /// Notify everything that tracked this trigger.
    pub fn notify(&self) {
        self.signal.modify(|_| ())
    }

    pub fn is_disposed(&self) -> bool {
        self.signal.is_disposed()
    }

    pub fn dispose(&self) {
        self.signal.dispose()
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a trigger.
pub fn create_trigger() -> Trigger {
    Trigger::new()
}
