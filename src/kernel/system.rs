//! The syscall seam.
//!
//! Every OS interaction the bootstrap core performs goes through [`SystemOps`].
//! [`LinuxSystem`] is the real implementation; `crate::testing::FakeSystem`
//! models a process in memory and records the order of calls.
//!
//! All `unsafe` in the crate lives in this file.

use crate::config::types::{Ceiling, ResourceKind};
use crate::kernel::credentials::Account;
use crate::kernel::process::ProcessIdentity;
use std::io;
use std::path::Path;

/// Which side of a fork the caller ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkOutcome {
    Parent { child: u32 },
    Child,
}

/// Output streams detached by daemonization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StdStream {
    Stdout,
    Stderr,
}

impl StdStream {
    pub fn name(self) -> &'static str {
        match self {
            StdStream::Stdout => "stdout",
            StdStream::Stderr => "stderr",
        }
    }
}

pub trait SystemOps {
    fn get_rlimit(&self, resource: ResourceKind) -> io::Result<(Ceiling, Ceiling)>;
    fn set_rlimit(&self, resource: ResourceKind, soft: Ceiling, hard: Ceiling) -> io::Result<()>;
    /// Set the file-creation mask, returning the previous one.
    fn set_umask(&self, mask: u32) -> u32;
    fn chroot(&self, path: &Path) -> io::Result<()>;
    fn chdir(&self, path: &Path) -> io::Result<()>;
    fn fork(&self) -> io::Result<ForkOutcome>;
    /// Terminate the calling process with a success status.
    fn exit_success(&self) -> !;
    fn setsid(&self) -> io::Result<u32>;
    fn redirect_to_null(&self, stream: StdStream) -> io::Result<()>;
    fn close_stdin(&self) -> io::Result<()>;
    fn set_dumpable(&self, dumpable: bool) -> io::Result<()>;
    /// `Ok(None)` when the account does not exist.
    fn lookup_account(&self, name: &str) -> io::Result<Option<Account>>;
    fn set_gid(&self, gid: u32) -> io::Result<()>;
    fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()>;
    fn set_uid(&self, uid: u32) -> io::Result<()>;
    fn identity(&self) -> ProcessIdentity;
}

/// Real syscalls via nix/libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxSystem;

impl LinuxSystem {
    pub fn new() -> Self {
        LinuxSystem
    }
}

fn nix_resource(resource: ResourceKind) -> nix::sys::resource::Resource {
    use nix::sys::resource::Resource;

    match resource {
        ResourceKind::CoreSize => Resource::RLIMIT_CORE,
        ResourceKind::AddressSpace => Resource::RLIMIT_AS,
        ResourceKind::DataSegment => Resource::RLIMIT_DATA,
        ResourceKind::Stack => Resource::RLIMIT_STACK,
        ResourceKind::FileSize => Resource::RLIMIT_FSIZE,
        ResourceKind::Processes => Resource::RLIMIT_NPROC,
        ResourceKind::LockedMemory => Resource::RLIMIT_MEMLOCK,
        ResourceKind::OpenFiles => Resource::RLIMIT_NOFILE,
    }
}

#[cfg(not(target_os = "linux"))]
fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is only available on Linux", operation),
    )
}

impl SystemOps for LinuxSystem {
    fn get_rlimit(&self, resource: ResourceKind) -> io::Result<(Ceiling, Ceiling)> {
        let (soft, hard) = nix::sys::resource::getrlimit(nix_resource(resource))?;
        Ok((Ceiling::from_raw(soft as u64), Ceiling::from_raw(hard as u64)))
    }

    fn set_rlimit(&self, resource: ResourceKind, soft: Ceiling, hard: Ceiling) -> io::Result<()> {
        nix::sys::resource::setrlimit(
            nix_resource(resource),
            soft.to_raw() as libc::rlim_t,
            hard.to_raw() as libc::rlim_t,
        )?;
        Ok(())
    }

    fn set_umask(&self, mask: u32) -> u32 {
        use nix::sys::stat::{umask, Mode};

        let previous = umask(Mode::from_bits_truncate(mask as libc::mode_t));
        previous.bits() as u32
    }

    fn chroot(&self, path: &Path) -> io::Result<()> {
        nix::unistd::chroot(path)?;
        Ok(())
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        nix::unistd::chdir(path)?;
        Ok(())
    }

    fn fork(&self) -> io::Result<ForkOutcome> {
        use nix::unistd::ForkResult;

        // SAFETY: bootstrap runs before any thread, listener or lock exists,
        // so the child inherits a single-threaded, consistent address space.
        let outcome = unsafe { nix::unistd::fork() }?;
        match outcome {
            ForkResult::Parent { child } => Ok(ForkOutcome::Parent {
                child: child.as_raw() as u32,
            }),
            ForkResult::Child => Ok(ForkOutcome::Child),
        }
    }

    fn exit_success(&self) -> ! {
        std::process::exit(0)
    }

    fn setsid(&self) -> io::Result<u32> {
        let sid = nix::unistd::setsid()?;
        Ok(sid.as_raw() as u32)
    }

    fn redirect_to_null(&self, stream: StdStream) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;

        let null = std::fs::OpenOptions::new()
            .read(true)
            .append(true)
            .open("/dev/null")?;
        let target = match stream {
            StdStream::Stdout => libc::STDOUT_FILENO,
            StdStream::Stderr => libc::STDERR_FILENO,
        };

        // SAFETY: both descriptors are valid for the duration of the call;
        // `null` is closed on drop and the duplicate stays on `target`.
        let rc = unsafe { libc::dup2(null.as_raw_fd(), target) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn close_stdin(&self) -> io::Result<()> {
        nix::unistd::close(libc::STDIN_FILENO)?;
        Ok(())
    }

    fn set_dumpable(&self, dumpable: bool) -> io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            nix::sys::prctl::set_dumpable(dumpable)?;
            Ok(())
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = dumpable;
            Err(unsupported("PR_SET_DUMPABLE"))
        }
    }

    fn lookup_account(&self, name: &str) -> io::Result<Option<Account>> {
        let user = nix::unistd::User::from_name(name)?;
        Ok(user.map(|user| Account {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
            home: user.dir,
        }))
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        nix::unistd::setgid(nix::unistd::Gid::from_raw(gid))?;
        Ok(())
    }

    fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()> {
        #[cfg(target_os = "linux")]
        {
            let groups: Vec<nix::unistd::Gid> =
                groups.iter().copied().map(nix::unistd::Gid::from_raw).collect();
            nix::unistd::setgroups(&groups)?;
            Ok(())
        }

        #[cfg(not(target_os = "linux"))]
        {
            let _ = groups;
            Err(unsupported("setgroups"))
        }
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        nix::unistd::setuid(nix::unistd::Uid::from_raw(uid))?;
        Ok(())
    }

    fn identity(&self) -> ProcessIdentity {
        use nix::unistd::{getegid, geteuid, getgid, getpid, getsid, getuid};

        ProcessIdentity {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            euid: geteuid().as_raw(),
            egid: getegid().as_raw(),
            pid: getpid().as_raw() as u32,
            session_id: getsid(None).ok().map(|sid| sid.as_raw() as u32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_real_limits_without_mutation() {
        let system = LinuxSystem::new();
        let (soft, hard) = system
            .get_rlimit(ResourceKind::OpenFiles)
            .expect("getrlimit(RLIMIT_NOFILE) should succeed");
        assert!(soft <= hard);
    }

    #[test]
    fn identity_reports_current_pid() {
        let identity = LinuxSystem::new().identity();
        assert_eq!(identity.pid, std::process::id());
    }

    #[test]
    fn lookup_of_missing_account_is_none() {
        let account = LinuxSystem::new()
            .lookup_account("daemonguard-no-such-account")
            .expect("passwd lookup should not error");
        assert!(account.is_none());
    }

    #[test]
    fn stream_names() {
        assert_eq!(StdStream::Stdout.name(), "stdout");
        assert_eq!(StdStream::Stderr.name(), "stderr");
    }
}
