//! Filesystem root confinement (chroot).
//!
//! Must run before the privilege transition: chroot(2) needs CAP_SYS_CHROOT,
//! which the process gives up for good when it drops to the target account.

use crate::config::types::{BootstrapError, BootstrapStage, Result};
use crate::kernel::system::SystemOps;
use crate::observability::events::{BootstrapEvent, DiagnosticSink};
use std::path::Path;

pub struct DirectoryJail<'a, S: SystemOps + ?Sized> {
    system: &'a S,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, S: SystemOps + ?Sized> DirectoryJail<'a, S> {
    pub fn new(system: &'a S, sink: &'a dyn DiagnosticSink) -> Self {
        Self { system, sink }
    }

    /// Confine the process to `path`. Unset or empty `path` is a no-op.
    ///
    /// The working directory is moved to the new root so no handle to the
    /// old tree survives the jail.
    pub fn enter(&self, path: Option<&Path>) -> Result<()> {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            self.sink.emit(&BootstrapEvent::info(
                BootstrapStage::Jail,
                "No root directory configured, skipping jail",
            ));
            return Ok(());
        };

        if let Err(e) = self.system.chroot(path) {
            return Err(self.fail(BootstrapError::Containment(format!(
                "Could not jail the process inside {}: {}",
                path.display(),
                e
            ))));
        }

        if let Err(e) = self.system.chdir(Path::new("/")) {
            return Err(self.fail(BootstrapError::Containment(format!(
                "Failed to change to the jail root of {}: {}",
                path.display(),
                e
            ))));
        }

        self.sink.emit(&BootstrapEvent::info(
            BootstrapStage::Jail,
            format!("Jailed the process inside {}", path.display()),
        ));
        Ok(())
    }

    fn fail(&self, error: BootstrapError) -> BootstrapError {
        self.sink.emit(&BootstrapEvent::failure(BootstrapStage::Jail, &error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FailureKind;
    use crate::observability::events::{MemorySink, Severity};
    use crate::testing::{Call, FakeSystem, Op};
    use std::path::PathBuf;

    #[test]
    fn unset_path_is_noop() {
        let system = FakeSystem::root();
        let sink = MemorySink::new();
        let jail = DirectoryJail::new(&system, &sink);

        jail.enter(None).unwrap();
        jail.enter(Some(Path::new(""))).unwrap();

        assert!(system.mutations().is_empty());
        assert_eq!(system.root_dir(), PathBuf::from("/"));
    }

    #[test]
    fn enters_existing_directory_and_resets_cwd() {
        let system = FakeSystem::root().with_directory("/srv/jail");
        let sink = MemorySink::new();

        DirectoryJail::new(&system, &sink)
            .enter(Some(Path::new("/srv/jail")))
            .unwrap();

        assert_eq!(
            system.mutations(),
            vec![
                Call::Chroot(PathBuf::from("/srv/jail")),
                Call::Chdir(PathBuf::from("/")),
            ]
        );
        assert_eq!(system.root_dir(), PathBuf::from("/srv/jail"));
        assert_eq!(system.cwd(), PathBuf::from("/"));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let system = FakeSystem::root();
        let sink = MemorySink::new();

        let err = DirectoryJail::new(&system, &sink)
            .enter(Some(Path::new("/nonexistent")))
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::FatalContainmentFailure);
        assert!(err.to_string().contains("/nonexistent"));
        assert_eq!(sink.at_least(Severity::Critical).len(), 1);
        assert_eq!(system.root_dir(), PathBuf::from("/"));
    }

    #[test]
    fn unprivileged_chroot_is_fatal() {
        let system = FakeSystem::unprivileged(1000, 1000).with_directory("/srv/jail");
        let sink = MemorySink::new();

        let err = DirectoryJail::new(&system, &sink)
            .enter(Some(Path::new("/srv/jail")))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalContainmentFailure);
    }

    #[test]
    fn failed_chdir_after_chroot_is_fatal() {
        let system = FakeSystem::root()
            .with_directory("/srv/jail")
            .failing(Op::Chdir);
        let sink = MemorySink::new();

        let err = DirectoryJail::new(&system, &sink)
            .enter(Some(Path::new("/srv/jail")))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalContainmentFailure);
    }
}
