//! Trellis Core
//!
//! This crate provides the fine-grained reactive runtime that the rest of
//! Trellis builds on. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Glitch-free push/pull propagation over an arena-backed dependency graph
//! - Batching, untracked reads and cleanup registration
//! - Ownership scopes with deterministic disposal
//! - Async resources with stale-result cancellation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `graph`: Computational dependency graph implementation
//!
//! The runtime is confined to the thread that uses it. Each thread has its
//! own graph, its own configuration and its own effect queue.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::prelude::*;
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Memo::new(move || count.get() * 2);
//!
//! // Create an effect
//! let _log = Effect::new(move || {
//!     println!("Count: {}, Doubled: {}", count.get(), doubled.get());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{config, configure, MisusePolicy, RuntimeConfig, DEFAULT_MAX_FLUSH_ITERATIONS};
pub use error::ReactiveError;

/// The types and functions most applications need.
pub mod prelude {
    pub use crate::reactive::{
        batch, create_effect, create_memo, create_memo_with_compare, create_resource, create_root,
        create_signal, create_stored_value, on_cleanup, provide_context, untrack, use_context,
        watch, Effect, Memo, Owner, ReadSignal, Resource, ResourceState, Signal, StoredValue,
        Trigger, WriteSignal,
    };
    pub use crate::ReactiveError;
}
