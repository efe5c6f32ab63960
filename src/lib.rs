//! daemonguard: secure process bootstrap for privileged network daemons
//! Turns a freshly launched, typically root process into a jailed, detached,
//! unprivileged service before any listener socket or worker thread exists.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::system`]: The syscall seam (`SystemOps`) and its Linux implementation
//! - [`kernel::umask`]: File-creation mask normalization
//! - [`kernel::rlimit`]: Resource ceiling queries, hardening and reporting
//! - [`kernel::jail`]: Filesystem root confinement
//! - [`kernel::daemon`]: Background detachment
//! - [`kernel::credentials`]: Account lookup and permanent privilege transition
//! - [`kernel::process`]: Cached process identity
//!
//! ## Execution Control ([`exec`])
//! - [`exec::bootstrap`]: Type-state enforced bootstrap ordering and the orchestrator
//!
//! ## Observability ([`observability`])
//! - [`observability::events`]: Diagnostic events and sinks (log, JSON-lines audit, memory)
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Shared type definitions, closed enums and the error taxonomy
//! - [`config::loader`]: daemonguard.json loading
//!
//! ## Testing Infrastructure ([`testing`])
//! - [`testing::fake_system`]: In-memory process model recording every syscall
//!
//! # Design Principles
//!
//! 1. **Order is the contract** - jail, then detach, then drop; gid before uid
//! 2. **Types prevent errors** - Misordered steps do not compile
//! 3. **Fatal means fatal** - A failed jail, detach or drop aborts startup
//! 4. **Best-effort is reported** - No failure is silently swallowed
//! 5. **Minimal unsafe** - Confined to `kernel::system`

// Kernel Primitives
pub mod kernel;

// Execution Control
pub mod exec;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Testing Infrastructure
pub mod testing;

// CLI entrypoint wiring for the daemonguard binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use exec::bootstrap::{BootstrapOrchestrator, BootstrapOutcome};
