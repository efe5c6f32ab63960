//! Observability
//!
//! Structured diagnostic events and the sinks that receive them.

pub mod events;
