//! Cached description of the running process.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the current process as last observed.
///
/// Only the daemonizer (pid/session) and the privilege transition (uid/gid)
/// refresh this; every other component treats it as read-only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIdentity {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
    pub pid: u32,
    pub session_id: Option<u32>,
}

impl ProcessIdentity {
    /// Effective uid 0.
    pub fn is_privileged(&self) -> bool {
        self.euid == 0
    }

    /// Real and effective ids both equal the target.
    pub fn matches(&self, uid: u32, gid: u32) -> bool {
        self.uid == uid && self.euid == uid && self.gid == gid && self.egid == gid
    }
}

impl fmt::Display for ProcessIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pid={} sid={} uid={} euid={} gid={} egid={}",
            self.pid,
            self.session_id
                .map(|sid| sid.to_string())
                .unwrap_or_else(|| "?".to_string()),
            self.uid,
            self.euid,
            self.gid,
            self.egid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: u32, euid: u32, gid: u32, egid: u32) -> ProcessIdentity {
        ProcessIdentity {
            uid,
            gid,
            euid,
            egid,
            pid: 10,
            session_id: Some(10),
        }
    }

    #[test]
    fn privilege_follows_effective_uid() {
        assert!(identity(1000, 0, 1000, 1000).is_privileged());
        assert!(!identity(0, 1000, 0, 0).is_privileged());
    }

    #[test]
    fn matches_requires_real_and_effective() {
        assert!(identity(1001, 1001, 1001, 1001).matches(1001, 1001));
        assert!(!identity(1001, 0, 1001, 1001).matches(1001, 1001));
        assert!(!identity(1001, 1001, 1001, 0).matches(1001, 1001));
    }

    #[test]
    fn display_marks_unknown_session() {
        let mut id = identity(0, 0, 0, 0);
        id.session_id = None;
        assert!(id.to_string().contains("sid=?"));
    }
}
