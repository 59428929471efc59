//! # fxt-core
//!
//! Core crate for the FX rate throttler, providing:
//!
//! - **Types** (`types`) — interned symbol universe and `SymbolId`
//! - **Rate registry** (`rate`) — per-symbol versioned rate cells
//! - **Sharding** (`shard`) — deterministic symbol hashing and shard selection
//! - **Configuration** (`config`) — JSON config + env overrides
//! - **Error types** (`error`) — domain-specific `ThrottleError` via thiserror
//! - **CPU affinity** (`cpu_affinity`) — thread-to-core pinning for workers
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod cpu_affinity;
pub mod error;
pub mod logging;
pub mod rate;
pub mod shard;
pub mod types;

pub use error::{Result, ThrottleError};
// Re-export types at crate root for convenience.
pub use types::*;
