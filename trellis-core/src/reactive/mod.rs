//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects,
//! plus the batching, ownership and async layers built on them. These
//! primitives form the foundation of Trellis's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when something reads it.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems.
//!
//! ## Owners
//!
//! Every node belongs to the owner that was current when it was created.
//! Disposing an owner disposes its nodes and runs their cleanups.
//!
//! ## Resources
//!
//! A Resource drives an async fetcher from an effect and exposes its
//! progress as signals.
//!
//! ## Stored Values
//!
//! A StoredValue is owned like a signal but never tracked or notified.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local tracking context to automatically
//! detect dependencies. When a signal is read, we check if there is an active
//! tracking context and, if so, register the dependency.
//!
//! Handles (`Signal`, `Memo`, `Effect`, ...) are `Copy` keys into the
//! thread's runtime, so closures can capture them freely.

mod batch;
mod context;
mod effect;
mod memo;
mod owner;
mod resource;
mod runtime;
mod signal;
mod stored;
mod subscriber;
mod trigger;

pub use batch::batch;
pub use context::{is_tracking, untrack, ReactiveContext};
pub use effect::{create_effect, watch, Effect};
pub use memo::{create_memo, create_memo_with_compare, Memo};
pub use owner::{create_root, on_cleanup, provide_context, use_context, Owner};
pub use resource::{create_resource, Fetch, Refresh, Resource, ResourceState};
pub use runtime::{runtime_stats, RuntimeStats};
pub use signal::{create_signal, ReadSignal, Signal, WriteSignal};
pub use stored::{create_stored_value, StoredValue};
pub use subscriber::{SubscriberId, Subscription};
pub use trigger::{create_trigger, Trigger};

pub(crate) use subscriber::Listener;
