//! Permanent identity change to an unprivileged account.
//!
//! CRITICAL: the group id MUST be changed BEFORE the user id.

mod account;
mod transition;
mod validation;

pub use account::{resolve_account, Account};
pub use transition::PrivilegeTransitioner;
pub use validation::privileged_target_warning;
