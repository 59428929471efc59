//! Typed error definitions for the rate throttler.
//!
//! Provides [`ThrottleError`] for the failures callers can act on. All
//! variants implement `std::error::Error` via `thiserror`, so they integrate
//! seamlessly with `anyhow::Result` in binaries.

use thiserror::Error;

/// Domain-specific errors for the rate throttler.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// The symbol is not part of the configured universe. This is a
    /// programming error on the caller's side and is never retried.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// The engine has been shut down and no longer accepts work.
    #[error("engine stopped")]
    EngineStopped,

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, ThrottleError>;
