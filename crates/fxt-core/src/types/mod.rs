//! Core data types shared by the engine crates.

pub mod symbol;

pub use symbol::*;
