/// In-memory process model implementing [`SystemOps`]
///
/// Records every call in order and mimics the kernel's permission rules
/// closely enough that ordering mistakes show up as failures: a process
/// whose uid is no longer 0 cannot change its gid, chroot, or raise a hard
/// ceiling.
use crate::config::types::{Ceiling, ResourceKind, ResourceLimitSpec};
use crate::kernel::credentials::Account;
use crate::kernel::process::ProcessIdentity;
use crate::kernel::system::{ForkOutcome, StdStream, SystemOps};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// A recorded syscall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetRlimit(ResourceKind),
    SetRlimit(ResourceLimitSpec),
    SetUmask(u32),
    Chroot(PathBuf),
    Chdir(PathBuf),
    Fork,
    ExitSuccess,
    Setsid,
    RedirectToNull(StdStream),
    CloseStdin,
    SetDumpable(bool),
    LookupAccount(String),
    SetGid(u32),
    SetGroups(Vec<u32>),
    SetUid(u32),
    Identity,
}

impl Call {
    /// Whether the call changes process state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::GetRlimit(_) | Call::LookupAccount(_) | Call::Identity
        )
    }
}

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetRlimit,
    SetRlimit,
    Chroot,
    Chdir,
    Fork,
    Setsid,
    RedirectStdout,
    RedirectStderr,
    CloseStdin,
    SetDumpable,
    LookupAccount,
    SetGid,
    SetGroups,
    SetUid,
}

#[derive(Debug, Clone)]
struct ProcessState {
    uid: u32,
    gid: u32,
    euid: u32,
    egid: u32,
    pid: u32,
    session_id: u32,
    groups: Vec<u32>,
    umask: u32,
    root: PathBuf,
    cwd: PathBuf,
    dumpable: bool,
    stdin_open: bool,
    nulled: HashSet<StdStream>,
    limits: BTreeMap<ResourceKind, (Ceiling, Ceiling)>,
    directories: BTreeSet<PathBuf>,
}

pub struct FakeSystem {
    state: RefCell<ProcessState>,
    calls: RefCell<Vec<Call>>,
    accounts: HashMap<String, Account>,
    failing: HashSet<Op>,
    failing_limits: HashSet<ResourceKind>,
    failing_queries: HashSet<ResourceKind>,
    fork_as_parent: bool,
    sticky_umask: Option<u32>,
}

fn denied() -> io::Error {
    io::Error::from_raw_os_error(libc::EPERM)
}

fn injected(op: Op) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("injected failure: {:?}", op))
}

impl FakeSystem {
    fn with_ids(uid: u32, gid: u32) -> Self {
        let limits = ResourceKind::REPORTED
            .iter()
            .map(|&resource| {
                let pair = match resource {
                    ResourceKind::CoreSize => (Ceiling::Limited(0), Ceiling::Unlimited),
                    _ => (Ceiling::Limited(1024), Ceiling::Limited(4096)),
                };
                (resource, pair)
            })
            .collect();

        let mut directories = BTreeSet::new();
        directories.insert(PathBuf::from("/"));

        Self {
            state: RefCell::new(ProcessState {
                uid,
                gid,
                euid: uid,
                egid: gid,
                pid: 4242,
                session_id: 4000,
                groups: vec![gid],
                umask: 0o022,
                root: PathBuf::from("/"),
                cwd: PathBuf::from("/"),
                dumpable: true,
                stdin_open: true,
                nulled: HashSet::new(),
                limits,
                directories,
            }),
            calls: RefCell::new(Vec::new()),
            accounts: HashMap::new(),
            failing: HashSet::new(),
            failing_limits: HashSet::new(),
            failing_queries: HashSet::new(),
            fork_as_parent: false,
            sticky_umask: None,
        }
    }

    /// A process launched as root.
    pub fn root() -> Self {
        Self::with_ids(0, 0)
    }

    /// A process launched as an ordinary user.
    pub fn unprivileged(uid: u32, gid: u32) -> Self {
        Self::with_ids(uid, gid)
    }

    /// Register an account and create its home directory.
    pub fn with_account(mut self, name: &str, uid: u32, gid: u32, home: &str) -> Self {
        self.accounts.insert(
            name.to_string(),
            Account {
                name: name.to_string(),
                uid,
                gid,
                home: PathBuf::from(home),
            },
        );
        self.with_directory(home)
    }

    pub fn with_directory(self, path: &str) -> Self {
        self.state.borrow_mut().directories.insert(PathBuf::from(path));
        self
    }

    pub fn remove_directory(&self, path: &str) {
        self.state.borrow_mut().directories.remove(Path::new(path));
    }

    pub fn with_limit(self, resource: ResourceKind, soft: Ceiling, hard: Ceiling) -> Self {
        self.state.borrow_mut().limits.insert(resource, (soft, hard));
        self
    }

    /// Make every call of `op` fail.
    pub fn failing(mut self, op: Op) -> Self {
        self.failing.insert(op);
        self
    }

    /// Make setrlimit fail for one resource class only.
    pub fn failing_rlimit(mut self, resource: ResourceKind) -> Self {
        self.failing_limits.insert(resource);
        self
    }

    /// Make getrlimit fail for one resource class only.
    pub fn failing_query(mut self, resource: ResourceKind) -> Self {
        self.failing_queries.insert(resource);
        self
    }

    /// Continue as the parent after fork instead of the child.
    pub fn fork_as_parent(mut self) -> Self {
        self.fork_as_parent = true;
        self
    }

    /// A umask that ignores every update.
    pub fn with_sticky_umask(mut self, mask: u32) -> Self {
        self.sticky_umask = Some(mask);
        self.state.borrow_mut().umask = mask;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_mutation())
            .cloned()
            .collect()
    }

    pub fn umask(&self) -> u32 {
        self.state.borrow().umask
    }

    pub fn root_dir(&self) -> PathBuf {
        self.state.borrow().root.clone()
    }

    pub fn cwd(&self) -> PathBuf {
        self.state.borrow().cwd.clone()
    }

    pub fn groups(&self) -> Vec<u32> {
        self.state.borrow().groups.clone()
    }

    pub fn is_dumpable(&self) -> bool {
        self.state.borrow().dumpable
    }

    pub fn stdin_open(&self) -> bool {
        self.state.borrow().stdin_open
    }

    pub fn is_nulled(&self, stream: StdStream) -> bool {
        self.state.borrow().nulled.contains(&stream)
    }

    pub fn limit(&self, resource: ResourceKind) -> (Ceiling, Ceiling) {
        self.state
            .borrow()
            .limits
            .get(&resource)
            .copied()
            .unwrap_or((Ceiling::Unlimited, Ceiling::Unlimited))
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, op: Op) -> io::Result<()> {
        if self.failing.contains(&op) {
            Err(injected(op))
        } else {
            Ok(())
        }
    }

    fn privileged(&self) -> bool {
        self.state.borrow().euid == 0
    }
}

impl SystemOps for FakeSystem {
    fn get_rlimit(&self, resource: ResourceKind) -> io::Result<(Ceiling, Ceiling)> {
        self.record(Call::GetRlimit(resource));
        self.check(Op::GetRlimit)?;
        if self.failing_queries.contains(&resource) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        Ok(self.limit(resource))
    }

    fn set_rlimit(&self, resource: ResourceKind, soft: Ceiling, hard: Ceiling) -> io::Result<()> {
        self.record(Call::SetRlimit(ResourceLimitSpec::new(resource, soft, hard)));
        self.check(Op::SetRlimit)?;
        if self.failing_limits.contains(&resource) {
            return Err(injected(Op::SetRlimit));
        }
        if soft > hard {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let (_, current_hard) = self.limit(resource);
        if hard > current_hard && !self.privileged() {
            return Err(denied());
        }
        self.state.borrow_mut().limits.insert(resource, (soft, hard));
        Ok(())
    }

    fn set_umask(&self, mask: u32) -> u32 {
        self.record(Call::SetUmask(mask));
        let mut state = self.state.borrow_mut();
        let previous = state.umask;
        state.umask = self.sticky_umask.unwrap_or(mask & 0o777);
        previous
    }

    fn chroot(&self, path: &Path) -> io::Result<()> {
        self.record(Call::Chroot(path.to_path_buf()));
        self.check(Op::Chroot)?;
        if !self.state.borrow().directories.contains(path) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        if !self.privileged() {
            return Err(denied());
        }
        self.state.borrow_mut().root = path.to_path_buf();
        Ok(())
    }

    fn chdir(&self, path: &Path) -> io::Result<()> {
        self.record(Call::Chdir(path.to_path_buf()));
        self.check(Op::Chdir)?;
        if !self.state.borrow().directories.contains(path) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.state.borrow_mut().cwd = path.to_path_buf();
        Ok(())
    }

    fn fork(&self) -> io::Result<ForkOutcome> {
        self.record(Call::Fork);
        self.check(Op::Fork)?;
        let mut state = self.state.borrow_mut();
        let child = state.pid + 1;
        if self.fork_as_parent {
            return Ok(ForkOutcome::Parent { child });
        }
        state.pid = child;
        Ok(ForkOutcome::Child)
    }

    fn exit_success(&self) -> ! {
        self.record(Call::ExitSuccess);
        panic!("parent process exited with success status");
    }

    fn setsid(&self) -> io::Result<u32> {
        self.record(Call::Setsid);
        self.check(Op::Setsid)?;
        let mut state = self.state.borrow_mut();
        if state.session_id == state.pid {
            return Err(denied());
        }
        state.session_id = state.pid;
        Ok(state.session_id)
    }

    fn redirect_to_null(&self, stream: StdStream) -> io::Result<()> {
        self.record(Call::RedirectToNull(stream));
        match stream {
            StdStream::Stdout => self.check(Op::RedirectStdout)?,
            StdStream::Stderr => self.check(Op::RedirectStderr)?,
        }
        self.state.borrow_mut().nulled.insert(stream);
        Ok(())
    }

    fn close_stdin(&self) -> io::Result<()> {
        self.record(Call::CloseStdin);
        self.check(Op::CloseStdin)?;
        self.state.borrow_mut().stdin_open = false;
        Ok(())
    }

    fn set_dumpable(&self, dumpable: bool) -> io::Result<()> {
        self.record(Call::SetDumpable(dumpable));
        self.check(Op::SetDumpable)?;
        self.state.borrow_mut().dumpable = dumpable;
        Ok(())
    }

    fn lookup_account(&self, name: &str) -> io::Result<Option<Account>> {
        self.record(Call::LookupAccount(name.to_string()));
        self.check(Op::LookupAccount)?;
        Ok(self.accounts.get(name).cloned())
    }

    fn set_gid(&self, gid: u32) -> io::Result<()> {
        self.record(Call::SetGid(gid));
        self.check(Op::SetGid)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 && gid != state.gid {
            return Err(denied());
        }
        state.gid = gid;
        state.egid = gid;
        Ok(())
    }

    fn set_supplementary_groups(&self, groups: &[u32]) -> io::Result<()> {
        self.record(Call::SetGroups(groups.to_vec()));
        self.check(Op::SetGroups)?;
        if !self.privileged() {
            return Err(denied());
        }
        self.state.borrow_mut().groups = groups.to_vec();
        Ok(())
    }

    fn set_uid(&self, uid: u32) -> io::Result<()> {
        self.record(Call::SetUid(uid));
        self.check(Op::SetUid)?;
        let mut state = self.state.borrow_mut();
        if state.euid != 0 && uid != state.uid {
            return Err(denied());
        }
        state.uid = uid;
        state.euid = uid;
        Ok(())
    }

    fn identity(&self) -> ProcessIdentity {
        self.record(Call::Identity);
        let state = self.state.borrow();
        ProcessIdentity {
            uid: state.uid,
            gid: state.gid,
            euid: state.euid,
            egid: state.egid,
            pid: state.pid,
            session_id: Some(state.session_id),
        }
    }
}
