//! Storage Layer
//!
//! Engine configuration and the project store interface.

pub mod config;
pub mod store;

pub use config::*;
pub use store::*;
