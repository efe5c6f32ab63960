//! Background detachment.
//!
//! Fork, become session leader, point stdout/stderr at /dev/null, close stdin
//! and mark the process non-dumpable. Must run before any thread, listener
//! socket or lock exists: only the forking thread survives in the child.

use crate::config::types::{BootstrapError, BootstrapStage, FailureKind, Result};
use crate::kernel::process::ProcessIdentity;
use crate::kernel::system::{ForkOutcome, StdStream, SystemOps};
use crate::observability::events::{BootstrapEvent, DiagnosticSink, Severity};

pub struct Daemonizer<'a, S: SystemOps + ?Sized> {
    system: &'a S,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, S: SystemOps + ?Sized> Daemonizer<'a, S> {
    pub fn new(system: &'a S, sink: &'a dyn DiagnosticSink) -> Self {
        Self { system, sink }
    }

    /// Detach into the background when `enabled`.
    ///
    /// The parent never returns from this call: it exits with status 0 as
    /// soon as the child exists. Only the child sees `Ok(())`, with
    /// `identity` refreshed to its new pid and session.
    pub fn detach(&self, enabled: bool, identity: &mut ProcessIdentity) -> Result<()> {
        if !enabled {
            self.sink.emit(&BootstrapEvent::info(
                BootstrapStage::Daemonize,
                "Daemonization disabled, staying in the foreground",
            ));
            return Ok(());
        }

        match self.system.fork() {
            Ok(ForkOutcome::Parent { child }) => {
                self.sink.emit(&BootstrapEvent::info(
                    BootstrapStage::Daemonize,
                    format!("Forked background process {}, parent exiting", child),
                ));
                self.system.exit_success();
            }
            Ok(ForkOutcome::Child) => {}
            Err(e) => {
                return Err(self.fail(BootstrapError::Daemonize(format!(
                    "Could not fork a background daemon process: {}",
                    e
                ))));
            }
        }

        if let Err(e) = self.system.setsid() {
            return Err(self.fail(BootstrapError::Daemonize(format!(
                "Could not become the session group leader: {}",
                e
            ))));
        }

        for stream in [StdStream::Stdout, StdStream::Stderr] {
            if let Err(e) = self.system.redirect_to_null(stream) {
                return Err(self.fail(BootstrapError::Daemonize(format!(
                    "Could not redirect {} to /dev/null: {}",
                    stream.name(),
                    e
                ))));
            }
        }

        if let Err(e) = self.system.close_stdin() {
            self.sink.emit(
                &BootstrapEvent::new(
                    BootstrapStage::Daemonize,
                    Severity::Warning,
                    format!("Could not close stdin: {}", e),
                )
                .with_kind(FailureKind::TransientHardeningFailure),
            );
        }

        if let Err(e) = self.system.set_dumpable(false) {
            return Err(self.fail(BootstrapError::Daemonize(format!(
                "Failed to block debuggers from attaching to the process: {}",
                e
            ))));
        }

        *identity = self.system.identity();
        self.sink.emit(&BootstrapEvent::info(
            BootstrapStage::Daemonize,
            format!(
                "Running in the background as pid {} (session {})",
                identity.pid,
                identity
                    .session_id
                    .map(|sid| sid.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        ));
        Ok(())
    }

    fn fail(&self, error: BootstrapError) -> BootstrapError {
        self.sink
            .emit(&BootstrapEvent::failure(BootstrapStage::Daemonize, &error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::MemorySink;
    use crate::testing::{Call, FakeSystem, Op};

    #[test]
    fn disabled_never_forks() {
        let system = FakeSystem::root();
        let sink = MemorySink::new();
        let before = system.identity();
        let mut identity = before;

        Daemonizer::new(&system, &sink)
            .detach(false, &mut identity)
            .unwrap();

        assert!(!system.calls().contains(&Call::Fork));
        assert_eq!(identity.pid, before.pid);
        assert_eq!(system.identity().pid, before.pid);
    }

    #[test]
    fn child_runs_steps_in_order() {
        let system = FakeSystem::root();
        let sink = MemorySink::new();
        let before = system.identity();
        let mut identity = before;

        Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap();

        assert_eq!(
            system.mutations(),
            vec![
                Call::Fork,
                Call::Setsid,
                Call::RedirectToNull(StdStream::Stdout),
                Call::RedirectToNull(StdStream::Stderr),
                Call::CloseStdin,
                Call::SetDumpable(false),
            ]
        );
        assert_ne!(identity.pid, before.pid);
        assert_eq!(identity.session_id, Some(identity.pid));
        assert!(!system.stdin_open());
        assert!(!system.is_dumpable());
    }

    #[test]
    #[should_panic(expected = "exited with success status")]
    fn parent_exits_successfully() {
        let system = FakeSystem::root().fork_as_parent();
        let sink = MemorySink::new();
        let mut identity = system.identity();

        let _ = Daemonizer::new(&system, &sink).detach(true, &mut identity);
    }

    #[test]
    fn fork_failure_is_fatal() {
        let system = FakeSystem::root().failing(Op::Fork);
        let sink = MemorySink::new();
        let mut identity = system.identity();

        let err = Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalDaemonizeFailure);
    }

    #[test]
    fn setsid_failure_stops_before_redirection() {
        let system = FakeSystem::root().failing(Op::Setsid);
        let sink = MemorySink::new();
        let mut identity = system.identity();

        let err = Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalDaemonizeFailure);
        assert!(!system
            .calls()
            .iter()
            .any(|c| matches!(c, Call::RedirectToNull(_))));
    }

    #[test]
    fn stderr_redirection_failure_is_fatal() {
        let system = FakeSystem::root().failing(Op::RedirectStderr);
        let sink = MemorySink::new();
        let mut identity = system.identity();

        let err = Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalDaemonizeFailure);
        assert!(err.to_string().contains("stderr"));
    }

    #[test]
    fn stdin_close_failure_is_reported_not_fatal() {
        let system = FakeSystem::root().failing(Op::CloseStdin);
        let sink = MemorySink::new();
        let mut identity = system.identity();

        Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap();
        assert_eq!(sink.with_kind(FailureKind::TransientHardeningFailure).len(), 1);
    }

    #[test]
    fn dumpable_failure_is_fatal() {
        let system = FakeSystem::root().failing(Op::SetDumpable);
        let sink = MemorySink::new();
        let mut identity = system.identity();

        let err = Daemonizer::new(&system, &sink)
            .detach(true, &mut identity)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalDaemonizeFailure);
    }
}
