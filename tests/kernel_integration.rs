//! Integration tests against the real kernel
//!
//! Only read-only queries and operations that fail before touching process
//! state: these run inside the test harness process.

use daemonguard::config::types::{Ceiling, FailureKind, ResourceKind};
use daemonguard::kernel::credentials::PrivilegeTransitioner;
use daemonguard::kernel::jail::DirectoryJail;
use daemonguard::kernel::rlimit::ResourceLimitController;
use daemonguard::kernel::system::{LinuxSystem, SystemOps};
use daemonguard::observability::events::{MemorySink, Severity};
use std::path::Path;

#[test]
fn test_report_is_idempotent_on_real_limits() {
    let system = LinuxSystem::new();
    let sink = MemorySink::new();
    let controller = ResourceLimitController::new(&system, &sink);

    let first = controller.report(&ResourceKind::REPORTED);
    let second = controller.report(&ResourceKind::REPORTED);

    assert_eq!(first, second);
    assert_eq!(first.entries.len(), ResourceKind::REPORTED.len());
}

#[test]
fn test_soft_limit_never_exceeds_hard_limit() {
    let system = LinuxSystem::new();
    let sink = MemorySink::new();
    let controller = ResourceLimitController::new(&system, &sink);

    for resource in ResourceKind::REPORTED {
        let spec = controller.query(resource).unwrap();
        assert!(spec.soft <= spec.hard, "{} soft above hard", resource);
    }
}

#[test]
fn test_report_text_names_every_resource() {
    let system = LinuxSystem::new();
    let sink = MemorySink::new();

    let text = ResourceLimitController::new(&system, &sink)
        .report(&ResourceKind::REPORTED)
        .to_string();

    for resource in ResourceKind::REPORTED {
        assert!(text.contains(resource.rlimit_name()));
    }
}

#[test]
fn test_identity_matches_libc() {
    let identity = LinuxSystem::new().identity();

    assert_eq!(identity.uid, unsafe { libc::getuid() });
    assert_eq!(identity.euid, unsafe { libc::geteuid() });
    assert_eq!(identity.gid, unsafe { libc::getgid() });
    assert_eq!(identity.pid, std::process::id());
}

#[test]
fn test_jail_into_missing_directory_fails_on_real_kernel() {
    let system = LinuxSystem::new();
    let sink = MemorySink::new();

    let err = DirectoryJail::new(&system, &sink)
        .enter(Some(Path::new("/nonexistent/daemonguard-jail")))
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::FatalContainmentFailure);
    assert_eq!(sink.at_least(Severity::Critical).len(), 1);
}

#[test]
fn test_missing_account_leaves_real_identity_untouched() {
    let system = LinuxSystem::new();
    let sink = MemorySink::new();
    let before = system.identity();
    let mut identity = before;

    let err = PrivilegeTransitioner::new(&system, &sink)
        .impersonate(Some("daemonguard_no_such_account"), &mut identity)
        .unwrap_err();

    assert_eq!(err.kind(), FailureKind::FatalAccountLookupFailure);
    assert_eq!(system.identity().uid, before.uid);
    assert_eq!(system.identity().gid, before.gid);
}

#[test]
fn test_unlimited_is_rendered_as_infinity() {
    assert_eq!(Ceiling::Unlimited.to_string(), "RLIM64_INFINITY");
    assert_eq!(Ceiling::from_raw(libc::RLIM_INFINITY as u64), Ceiling::Unlimited);
}
