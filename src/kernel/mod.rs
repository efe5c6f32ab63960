//! Thin wrappers around the process-level kernel primitives bootstrap uses.
//!
//! All `unsafe` code is concentrated in `system` with explicit SAFETY comments.
//! Dependency direction: system -> umask -> rlimit -> jail -> daemon -> credentials

pub mod credentials;
pub mod daemon;
pub mod jail;
pub mod process;
pub mod rlimit;
pub mod system;
pub mod umask;
