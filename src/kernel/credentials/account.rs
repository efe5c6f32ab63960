//! Account directory lookups.

use crate::config::types::{BootstrapError, Result};
use crate::kernel::system::SystemOps;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An entry from the system account directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

/// Resolve `name` to its uid, gid and home directory.
pub fn resolve_account<S: SystemOps + ?Sized>(system: &S, name: &str) -> Result<Account> {
    match system.lookup_account(name) {
        Ok(Some(account)) => Ok(account),
        Ok(None) => Err(BootstrapError::AccountLookup(format!(
            "The user account {} does not exist",
            name
        ))),
        Err(e) => Err(BootstrapError::AccountLookup(format!(
            "Unable to retrieve information for the user account {}: {}",
            name, e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::FailureKind;
    use crate::testing::{FakeSystem, Op};

    #[test]
    fn resolves_known_account() {
        let system = FakeSystem::root().with_account("magma", 1001, 1001, "/var/lib/magma");
        let account = resolve_account(&system, "magma").unwrap();
        assert_eq!(account.uid, 1001);
        assert_eq!(account.gid, 1001);
        assert_eq!(account.home, PathBuf::from("/var/lib/magma"));
    }

    #[test]
    fn missing_account_is_lookup_failure() {
        let system = FakeSystem::root();
        let err = resolve_account(&system, "no_such_account").unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalAccountLookupFailure);
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn directory_error_is_lookup_failure() {
        let system = FakeSystem::root()
            .with_account("magma", 1001, 1001, "/var/lib/magma")
            .failing(Op::LookupAccount);
        let err = resolve_account(&system, "magma").unwrap_err();
        assert_eq!(err.kind(), FailureKind::FatalAccountLookupFailure);
        assert!(err.to_string().contains("Unable to retrieve"));
    }
}
