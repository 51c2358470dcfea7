//! Runtime Configuration
//!
//! The reactive runtime is confined to a single thread, so its configuration
//! is too: every thread starts from [`RuntimeConfig::default`] and can adjust
//! its own copy through [`configure`].

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default upper bound on effect runs within a single flush.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 100_000;

/// How programmer errors detected at runtime are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisusePolicy {
    /// Panic with the error message.
    Panic,
    /// Emit a `tracing` warning and carry on.
    Warn,
}

impl Default for MisusePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Panic
        } else {
            Self::Warn
        }
    }
}

/// Per-thread runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// What to do on misuse (writing a disposed signal, `on_cleanup` with no owner, ...).
    pub misuse: MisusePolicy,

    /// Effects processed in one flush before propagation is abandoned.
    pub max_flush_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            misuse: MisusePolicy::default(),
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
        }
    }
}

thread_local! {
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

/// Current configuration of this thread's runtime.
pub fn config() -> RuntimeConfig {
    CONFIG.with(|cfg| *cfg.borrow())
}

/// Adjust this thread's runtime configuration in place.
pub fn configure(f: impl FnOnce(&mut RuntimeConfig)) {
    CONFIG.with(|cfg| f(&mut cfg.borrow_mut()));
}

/// Report a programmer error according to the active [`MisusePolicy`].
pub(crate) fn report_misuse(error: ReactiveError) {
    match config().misuse {
        MisusePolicy::Panic => panic!("reactive misuse: {error}"),
        MisusePolicy::Warn => tracing::warn!(%error, "reactive misuse"),
    }
}
