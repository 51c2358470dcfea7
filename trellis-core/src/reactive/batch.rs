//! Batching multiple signal updates.

use tracing::{debug, trace};

use crate::config::report_misuse;
use crate::graph::BatchGuard;

use super::runtime::with_runtime;

/// Batch multiple signal updates together.
///
/// Writes inside `f` mark the graph as usual but queued effects only run
/// once the outermost batch returns, each of them at most once. Nested
/// batches flatten into the outermost one.
///
/// # Example
///
/// ```rust
/// use trellis_core::reactive::{batch, Signal};
///
/// let first = Signal::new("John");
/// let last = Signal::new("Doe");
///
/// // Effects reading both names run once, after both writes.
/// batch(|| {
///     first.set("Jane");
///     last.set("Smith");
/// });
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    if with_runtime(|rt| rt.queue().is_batching()) {
        trace!("nested batch");
    }
    defer_effects(f)
}

/// Run `f` with effects held back, then flush whatever it queued.
///
/// Reads that lend out a borrowed value run under this, so a write made
/// while the borrow is alive cannot re-run the node being borrowed.
pub(crate) fn defer_effects<R>(f: impl FnOnce() -> R) -> R {
    let result = with_runtime(|rt| {
        let _batch = BatchGuard::enter(rt.queue());
        f()
    });

    let flushed = with_runtime(|rt| {
        if rt.queue().is_idle() && rt.queue().len() > 0 {
            debug!(pending = rt.queue().len(), "releasing deferred effects");
        }
        rt.flush_if_idle()
    });
    if let Err(err) = flushed {
        report_misuse(err);
    }

    result
}
