//! Dependency Graph
//!
//! This module implements the computational dependency graph that tracks
//! relationships between reactive values and computations.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (memos, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! Alongside it sits the ownership tree: owners hold the nodes created under
//! them and are disposed as a unit.
//!
//! # Design Decisions
//!
//! 1. Nodes and owners live in generational arenas (`slotmap`). Handles are
//!    keys, never references, so a disposed node leaves behind a stale key
//!    that lookups reject instead of a dangling pointer, and the two-way
//!    edges between nodes never form reference cycles.
//!
//! 2. We maintain both forward (dependencies) and reverse (dependents) edges
//!    as insertion-ordered sets, so severing a node's edges before a re-run
//!    costs one constant-time removal per edge.
//!
//! 3. Marking (push) is separated from re-running (pull); the scheduler
//!    module documents the algorithm.

mod node;
mod owner;
mod scheduler;

pub use node::{DirtyState, NodeId, NodeKind};
pub use owner::OwnerId;

pub(crate) use node::{AnyComputation, AnyValue, ReactiveNode, RunPhase};
pub(crate) use owner::{Cleanup, OwnerContents};
pub(crate) use scheduler::{BatchGuard, EffectQueue, FlushGuard, PendingWave, UpdateScheduler};
