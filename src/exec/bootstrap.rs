//! Bootstrap Ordering Enforcement
//!
//! The hardening sequence is FIXED and must not drift:
//! 1. umask normalization
//! 2. resource-limit hardening (best-effort)
//! 3. directory jail (fatal)
//! 4. daemonization (fatal)
//! 5. privilege transition (fatal)
//! 6. core-dump policy (best-effort)
//! 7. resource-limit report (diagnostic)
//!
//! Everything here runs single-threaded, before any listener socket, worker
//! thread or lock exists.
use crate::config::types::{
    BootstrapError, BootstrapStage, FailureKind, ProcessSecurityConfig, ResourceKind,
};
use crate::kernel::credentials::PrivilegeTransitioner;
use crate::kernel::daemon::Daemonizer;
use crate::kernel::jail::DirectoryJail;
use crate::kernel::process::ProcessIdentity;
use crate::kernel::rlimit::{
    CoreDumpPolicy, HardeningReport, LimitSnapshot, ResourceLimitController, REPORT_HEADER,
};
use crate::kernel::system::SystemOps;
use crate::kernel::umask::{normalize_umask, DAEMON_UMASK};
use crate::observability::events::{BootstrapEvent, CorrelatedSink, DiagnosticSink, Severity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

// ============================================================================
// Type-State Bootstrap Chain
// ============================================================================
//
// Init -> UmaskSet -> LimitsHardened -> Jailed -> Daemonized ->
// PrivilegeDropped -> CoreDumpPolicySet -> Ready
//
// Each step consumes the prior state and returns exactly one next state on
// success. Skipping or reordering a step does not compile.

/// Type-state marker: freshly launched, nothing applied yet
pub struct Init;

/// Type-state marker: file-creation mask normalized
pub struct UmaskSet;

/// Type-state marker: resource ceilings raised (or hardening skipped)
pub struct LimitsHardened;

/// Type-state marker: filesystem root confined (or jail not configured)
pub struct Jailed;

/// Type-state marker: detached into the background (or staying foreground)
pub struct Daemonized;

/// Type-state marker: running as the target account (or launch identity kept)
pub struct PrivilegeDropped;

/// Type-state marker: RLIMIT_CORE policy applied
pub struct CoreDumpPolicySet;

/// Type-state marker: all gates passed, the service may start
pub struct Ready;

/// Process under bootstrap, tracking which hardening step it reached.
///
/// Privilege cannot be dropped before the jail is entered:
///
/// ```compile_fail
/// use daemonguard::exec::bootstrap::Bootstrap;
/// use daemonguard::observability::events::MemorySink;
/// use daemonguard::testing::FakeSystem;
///
/// let system = FakeSystem::root();
/// let sink = MemorySink::new();
/// let boot = Bootstrap::new(&system, &sink).normalize_umask().harden_limits(false);
/// let _ = boot.drop_privileges(Some("nobody"));
/// ```
///
/// The jail cannot be entered after daemonization:
///
/// ```compile_fail
/// use daemonguard::exec::bootstrap::Bootstrap;
/// use daemonguard::observability::events::MemorySink;
/// use daemonguard::testing::FakeSystem;
///
/// let system = FakeSystem::root();
/// let sink = MemorySink::new();
/// let boot = Bootstrap::new(&system, &sink)
///     .normalize_umask()
///     .harden_limits(false)
///     .enter_jail(None)
///     .unwrap()
///     .daemonize(false)
///     .unwrap();
/// let _ = boot.enter_jail(None);
/// ```
///
/// A consumed state cannot be reused:
///
/// ```compile_fail
/// use daemonguard::exec::bootstrap::Bootstrap;
/// use daemonguard::observability::events::MemorySink;
/// use daemonguard::testing::FakeSystem;
///
/// let system = FakeSystem::root();
/// let sink = MemorySink::new();
/// let boot = Bootstrap::new(&system, &sink);
/// let _first = boot.normalize_umask();
/// let _second = boot.normalize_umask();
/// ```
///
/// The full chain in order:
///
/// ```
/// use daemonguard::exec::bootstrap::Bootstrap;
/// use daemonguard::observability::events::MemorySink;
/// use daemonguard::testing::FakeSystem;
///
/// let system = FakeSystem::root();
/// let sink = MemorySink::new();
/// let ready = Bootstrap::new(&system, &sink)
///     .normalize_umask()
///     .harden_limits(false)
///     .enter_jail(None)?
///     .daemonize(false)?
///     .drop_privileges(None)?
///     .apply_core_dump_policy(false, 0)
///     .finish(false);
/// assert_eq!(ready.identity().uid, 0);
/// # Ok::<(), daemonguard::config::types::BootstrapError>(())
/// ```
pub struct Bootstrap<'a, Sys: SystemOps + ?Sized, State> {
    system: &'a Sys,
    sink: &'a dyn DiagnosticSink,
    identity: ProcessIdentity,
    umask_verified: bool,
    hardening: Option<HardeningReport>,
    core_dumps: CoreDumpPolicy,
    limits: Option<LimitSnapshot>,
    _state: PhantomData<State>,
}

impl<'a, Sys: SystemOps + ?Sized, State> Bootstrap<'a, Sys, State> {
    /// Last observed identity of the process.
    pub fn identity(&self) -> &ProcessIdentity {
        &self.identity
    }

    fn advance<Next>(self) -> Bootstrap<'a, Sys, Next> {
        Bootstrap {
            system: self.system,
            sink: self.sink,
            identity: self.identity,
            umask_verified: self.umask_verified,
            hardening: self.hardening,
            core_dumps: self.core_dumps,
            limits: self.limits,
            _state: PhantomData,
        }
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, Init> {
    /// Start a bootstrap in the Init state, capturing the launch identity.
    pub fn new(system: &'a Sys, sink: &'a dyn DiagnosticSink) -> Self {
        Self {
            system,
            sink,
            identity: system.identity(),
            umask_verified: false,
            hardening: None,
            core_dumps: CoreDumpPolicy::OsDefault,
            limits: None,
            _state: PhantomData,
        }
    }

    /// Step 1: umask. Never fails; a mask that does not stick is reported.
    pub fn normalize_umask(mut self) -> Bootstrap<'a, Sys, UmaskSet> {
        self.umask_verified = normalize_umask(self.system, self.sink, DAEMON_UMASK);
        self.advance()
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, UmaskSet> {
    /// Step 2: raise resource ceilings when `enabled`. Best-effort.
    pub fn harden_limits(mut self, enabled: bool) -> Bootstrap<'a, Sys, LimitsHardened> {
        if enabled {
            let report = ResourceLimitController::new(self.system, self.sink)
                .harden(&ResourceKind::HARDENED);
            self.hardening = Some(report);
        } else {
            log::debug!("Resource limit hardening not requested");
        }
        self.advance()
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, LimitsHardened> {
    /// Step 3: confine the filesystem root. Fatal on failure.
    pub fn enter_jail(
        self,
        root: Option<&Path>,
    ) -> Result<Bootstrap<'a, Sys, Jailed>, BootstrapError> {
        DirectoryJail::new(self.system, self.sink).enter(root)?;
        Ok(self.advance())
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, Jailed> {
    /// Step 4: detach into the background. Only the child returns.
    pub fn daemonize(
        mut self,
        enabled: bool,
    ) -> Result<Bootstrap<'a, Sys, Daemonized>, BootstrapError> {
        Daemonizer::new(self.system, self.sink).detach(enabled, &mut self.identity)?;
        Ok(self.advance())
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, Daemonized> {
    /// Step 5: permanent identity change. Fatal on failure.
    pub fn drop_privileges(
        mut self,
        username: Option<&str>,
    ) -> Result<Bootstrap<'a, Sys, PrivilegeDropped>, BootstrapError> {
        PrivilegeTransitioner::new(self.system, self.sink).impersonate(username, &mut self.identity)?;
        Ok(self.advance())
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, PrivilegeDropped> {
    /// Step 6: RLIMIT_CORE policy. Best-effort.
    pub fn apply_core_dump_policy(
        mut self,
        enabled: bool,
        size_limit: u64,
    ) -> Bootstrap<'a, Sys, CoreDumpPolicySet> {
        self.core_dumps = ResourceLimitController::new(self.system, self.sink)
            .set_core_dump_policy(enabled, size_limit);
        self.advance()
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, CoreDumpPolicySet> {
    /// Step 7: optional operator report of the resulting ceilings.
    pub fn finish(mut self, report: bool) -> Bootstrap<'a, Sys, Ready> {
        if report {
            let snapshot =
                ResourceLimitController::new(self.system, self.sink).report(&ResourceKind::REPORTED);
            self.sink
                .emit(&BootstrapEvent::info(BootstrapStage::Report, REPORT_HEADER));
            for line in snapshot.lines() {
                self.sink
                    .emit(&BootstrapEvent::info(BootstrapStage::Report, line));
            }
            self.limits = Some(snapshot);
        }
        self.advance()
    }
}

impl<'a, Sys: SystemOps + ?Sized> Bootstrap<'a, Sys, Ready> {
    /// Summary of everything the chain did.
    pub fn into_summary(self, run_id: impl Into<String>) -> ReadySummary {
        ReadySummary {
            run_id: run_id.into(),
            identity: self.identity,
            umask_verified: self.umask_verified,
            hardening: self.hardening,
            core_dumps: self.core_dumps,
            limits: self.limits,
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// State of a process that completed bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadySummary {
    pub run_id: String,
    pub identity: ProcessIdentity,
    pub umask_verified: bool,
    pub hardening: Option<HardeningReport>,
    pub core_dumps: CoreDumpPolicy,
    pub limits: Option<LimitSnapshot>,
}

/// Why bootstrap stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub stage: BootstrapStage,
    pub kind: FailureKind,
    pub message: String,
}

impl AbortReason {
    fn new(stage: BootstrapStage, error: &BootstrapError) -> Self {
        Self {
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {}: {}", self.kind, self.stage, self.message)
    }
}

/// Terminal result of [`BootstrapOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BootstrapOutcome {
    Ready(ReadySummary),
    Aborted(AbortReason),
}

impl BootstrapOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapOutcome::Ready(_))
    }

    /// Exit status the caller should terminate with when not continuing.
    pub fn exit_code(&self) -> i32 {
        match self {
            BootstrapOutcome::Ready(_) => 0,
            BootstrapOutcome::Aborted(_) => 1,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            BootstrapOutcome::Aborted(reason) => Some(reason),
            BootstrapOutcome::Ready(_) => None,
        }
    }
}

/// Drives the type-state chain from a resolved configuration snapshot.
pub struct BootstrapOrchestrator<'a, S: SystemOps + ?Sized> {
    system: &'a S,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, S: SystemOps + ?Sized> BootstrapOrchestrator<'a, S> {
    pub fn new(system: &'a S, sink: &'a dyn DiagnosticSink) -> Self {
        Self { system, sink }
    }

    /// Run the fixed sequence once. Every event carries a fresh run id.
    ///
    /// On `Aborted` the caller must terminate with a non-zero status before
    /// opening any listener.
    pub fn run(&self, config: &ProcessSecurityConfig) -> BootstrapOutcome {
        let run_id = uuid::Uuid::new_v4().to_string();
        let sink = CorrelatedSink::new(run_id.clone(), self.sink);

        log::info!(
            "Starting process bootstrap (run {}) as {}",
            run_id,
            self.system.identity()
        );

        match Self::drive(self.system, &sink, config) {
            Ok(ready) => {
                let summary = ready.into_summary(run_id);
                sink.emit(&BootstrapEvent::info(
                    BootstrapStage::Complete,
                    format!("Bootstrap complete, running as {}", summary.identity),
                ));
                BootstrapOutcome::Ready(summary)
            }
            Err(reason) => {
                sink.emit(
                    &BootstrapEvent::new(
                        BootstrapStage::Complete,
                        Severity::Critical,
                        format!("Bootstrap aborted: {}", reason),
                    )
                    .with_kind(reason.kind),
                );
                BootstrapOutcome::Aborted(reason)
            }
        }
    }

    fn drive<'b>(
        system: &'b S,
        sink: &'b dyn DiagnosticSink,
        config: &ProcessSecurityConfig,
    ) -> Result<Bootstrap<'b, S, Ready>, AbortReason> {
        let jailed = Bootstrap::new(system, sink)
            .normalize_umask()
            .harden_limits(config.increase_resource_limits)
            .enter_jail(config.root_directory())
            .map_err(|e| AbortReason::new(BootstrapStage::Jail, &e))?;

        let daemonized = jailed
            .daemonize(config.daemonize)
            .map_err(|e| AbortReason::new(BootstrapStage::Daemonize, &e))?;

        let dropped = daemonized
            .drop_privileges(config.impersonate_user())
            .map_err(|e| AbortReason::new(BootstrapStage::Privileges, &e))?;

        Ok(dropped
            .apply_core_dump_policy(config.enable_core_dumps, config.core_dump_size_limit)
            .finish(config.report_resource_limits))
    }
}
