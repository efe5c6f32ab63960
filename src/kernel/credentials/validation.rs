//! Credential validation logic.

/// Warning text when the impersonation target still holds root ids.
///
/// Such a target is honoured as configured; the caller only reports it.
pub fn privileged_target_warning(uid: u32, gid: u32) -> Option<String> {
    if uid == 0 || gid == 0 {
        Some(format!(
            "Impersonation target keeps root credentials (uid={}, gid={})",
            uid, gid
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_on_root_uid() {
        assert!(privileged_target_warning(0, 1000).is_some());
    }

    #[test]
    fn warns_on_root_gid() {
        assert!(privileged_target_warning(1000, 0).is_some());
    }

    #[test]
    fn silent_for_unprivileged_target() {
        assert!(privileged_target_warning(1000, 1000).is_none());
    }
}
