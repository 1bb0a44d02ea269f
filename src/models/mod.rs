//! Data Models
//!
//! Contains the data structures exchanged with callers and the project store.

pub mod generation;
pub mod project;

pub use generation::*;
pub use project::*;
