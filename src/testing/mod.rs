//! Testing infrastructure
//!
//! An in-memory process model for driving bootstrap without touching the
//! host's credentials, limits or filesystem root.

pub mod fake_system;

pub use fake_system::{Call, FakeSystem, Op};
