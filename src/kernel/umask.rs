//! File-creation mask normalization.

use crate::config::types::{BootstrapStage, FailureKind};
use crate::kernel::system::SystemOps;
use crate::observability::events::{BootstrapEvent, DiagnosticSink, Severity};

/// Mask applied at startup: new files are never world-writable.
pub const DAEMON_UMASK: u32 = 0o002;

/// Apply `mask` and read it back. Returns whether the mask stuck; a mismatch
/// is reported but never aborts bootstrap.
pub fn normalize_umask<S: SystemOps + ?Sized>(
    system: &S,
    sink: &dyn DiagnosticSink,
    mask: u32,
) -> bool {
    let previous = system.set_umask(mask);
    // umask(2) cannot fail, so a second call is the only way to observe it.
    let observed = system.set_umask(mask);

    if observed != mask {
        sink.emit(
            &BootstrapEvent::new(
                BootstrapStage::Umask,
                Severity::Warning,
                format!(
                    "Could not set the process umask: requested {:03o}, observed {:03o}",
                    mask, observed
                ),
            )
            .with_kind(FailureKind::TransientHardeningFailure),
        );
        return false;
    }

    sink.emit(&BootstrapEvent::info(
        BootstrapStage::Umask,
        format!("Set umask to {:03o} (was {:03o})", mask, previous),
    ));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::MemorySink;
    use crate::testing::{Call, FakeSystem};

    #[test]
    fn sets_and_verifies_mask() {
        let system = FakeSystem::root();
        let sink = MemorySink::new();

        assert!(normalize_umask(&system, &sink, DAEMON_UMASK));
        assert_eq!(system.umask(), DAEMON_UMASK);
        assert_eq!(
            system.mutations(),
            vec![Call::SetUmask(DAEMON_UMASK), Call::SetUmask(DAEMON_UMASK)]
        );
        assert!(sink.events()[0].message.contains("was 022"));
    }

    #[test]
    fn mask_that_does_not_stick_is_reported() {
        let system = FakeSystem::root().with_sticky_umask(0o022);
        let sink = MemorySink::new();

        assert!(!normalize_umask(&system, &sink, DAEMON_UMASK));
        assert_eq!(sink.with_kind(FailureKind::TransientHardeningFailure).len(), 1);
    }
}
