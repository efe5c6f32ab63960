//! Execution control
//!
//! Orchestrates kernel primitives into a hardened process with type-state enforcement.

pub mod bootstrap;
