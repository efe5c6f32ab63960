//! Configuration
//!
//! The resolved security snapshot and the shared types the bootstrap core
//! speaks in, plus the JSON loader the binary uses to produce that snapshot.

pub mod loader;
pub mod types;
