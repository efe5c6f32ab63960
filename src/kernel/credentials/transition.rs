//! Permanent UID/GID transition to the configured account.
//!
//! CRITICAL: setgid MUST be called BEFORE setuid. Once the uid is no longer
//! privileged the kernel refuses the group change.

use super::account::resolve_account;
use super::validation::privileged_target_warning;
use crate::config::types::{BootstrapError, BootstrapStage, Result};
use crate::kernel::process::ProcessIdentity;
use crate::kernel::system::SystemOps;
use crate::observability::events::{BootstrapEvent, DiagnosticSink, Severity};

pub struct PrivilegeTransitioner<'a, S: SystemOps + ?Sized> {
    system: &'a S,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, S: SystemOps + ?Sized> PrivilegeTransitioner<'a, S> {
    pub fn new(system: &'a S, sink: &'a dyn DiagnosticSink) -> Self {
        Self { system, sink }
    }

    /// Switch to `username` for good, refreshing `identity` on success.
    ///
    /// Steps: resolve -> chdir home -> setgid -> setgroups -> setuid ->
    /// verify -> non-dumpable. Aborts on the first failure. There is no
    /// inverse operation.
    pub fn impersonate(&self, username: Option<&str>, identity: &mut ProcessIdentity) -> Result<()> {
        let Some(username) = username.filter(|name| !name.is_empty()) else {
            self.sink.emit(&BootstrapEvent::info(
                BootstrapStage::Privileges,
                "No impersonation target configured, keeping launch identity",
            ));
            return Ok(());
        };

        let account = resolve_account(self.system, username).map_err(|e| self.fail(e))?;
        if let Some(warning) = privileged_target_warning(account.uid, account.gid) {
            self.sink.emit(&BootstrapEvent::new(
                BootstrapStage::Privileges,
                Severity::Warning,
                warning,
            ));
        }

        // Still privileged here, so an inaccessible home fails deterministically.
        self.system.chdir(&account.home).map_err(|e| {
            self.fail(BootstrapError::PrivilegeDrop(format!(
                "Unable to change into {} which is the home for the user {}: {}",
                account.home.display(),
                username,
                e
            )))
        })?;

        let current = self.system.identity();

        // CRITICAL: GID before UID
        if current.gid != account.gid || current.egid != account.gid {
            self.system.set_gid(account.gid).map_err(|e| {
                self.fail(BootstrapError::PrivilegeDrop(format!(
                    "Unable to assume the group id {}: {}",
                    account.gid, e
                )))
            })?;
            log::debug!("Set GID to {}", account.gid);
        }

        if current.is_privileged() {
            self.system
                .set_supplementary_groups(&[account.gid])
                .map_err(|e| {
                    self.fail(BootstrapError::PrivilegeDrop(format!(
                        "Unable to reset supplementary groups to [{}]: {}",
                        account.gid, e
                    )))
                })?;
        }

        if current.uid != account.uid || current.euid != account.uid {
            self.system.set_uid(account.uid).map_err(|e| {
                self.fail(BootstrapError::PrivilegeDrop(format!(
                    "Unable to begin impersonating the user {}: {}",
                    username, e
                )))
            })?;
            log::debug!("Set UID to {}", account.uid);
        }

        let after = self.system.identity();
        if !after.matches(account.uid, account.gid) {
            return Err(self.fail(BootstrapError::PrivilegeDrop(format!(
                "Identity verification failed: expected uid={} gid={}, got {}",
                account.uid, account.gid, after
            ))));
        }

        // Credential changes can reset the dumpable flag.
        self.system.set_dumpable(false).map_err(|e| {
            self.fail(BootstrapError::PrivilegeDrop(format!(
                "Failed to block debuggers from attaching to the process: {}",
                e
            )))
        })?;

        *identity = self.system.identity();
        self.sink.emit(&BootstrapEvent::info(
            BootstrapStage::Privileges,
            format!(
                "Now running as {} (uid={}, gid={}, cwd={})",
                username,
                identity.uid,
                identity.gid,
                account.home.display()
            ),
        ));
        Ok(())
    }

    fn fail(&self, error: BootstrapError) -> BootstrapError {
        self.sink
            .emit(&BootstrapEvent::failure(BootstrapStage::Privileges, &error));
        error
    }
}
