/// Core types shared by every bootstrap component
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Immutable security snapshot handed to the bootstrap orchestrator.
///
/// Values are trusted as given; nothing here is re-read or re-validated once
/// bootstrap starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSecurityConfig {
    /// Directory to chroot into (optional)
    pub root_directory: Option<PathBuf>,
    /// Fork into the background and release the console session
    pub daemonize: bool,
    /// Apply `core_dump_size_limit` to RLIMIT_CORE
    pub enable_core_dumps: bool,
    /// Core dump ceiling in bytes, used only when core dumps are enabled
    pub core_dump_size_limit: u64,
    /// Account to permanently switch to (optional)
    pub impersonate_user: Option<String>,
    /// Raise memory/file/process ceilings before dropping privileges
    pub increase_resource_limits: bool,
    /// Emit the resource limit table once bootstrap completes
    pub report_resource_limits: bool,
}

impl ProcessSecurityConfig {
    /// Jail root, treating an empty path as unset.
    pub fn root_directory(&self) -> Option<&Path> {
        self.root_directory
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Impersonation target, treating an empty name as unset. Any other
    /// value is passed to the account directory as given.
    pub fn impersonate_user(&self) -> Option<&str> {
        self.impersonate_user
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Drop empty optional strings so serialized snapshots show `null`.
    pub fn normalized(mut self) -> Self {
        if self.root_directory().is_none() {
            self.root_directory = None;
        }
        self.impersonate_user = self.impersonate_user().map(str::to_string);
        self
    }
}

/// OS resource classes the bootstrap core touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    CoreSize,
    AddressSpace,
    DataSegment,
    Stack,
    FileSize,
    Processes,
    LockedMemory,
    OpenFiles,
}

impl ResourceKind {
    /// Classes raised by [`crate::kernel::rlimit::ResourceLimitController::harden`].
    pub const HARDENED: [ResourceKind; 7] = [
        ResourceKind::AddressSpace,
        ResourceKind::DataSegment,
        ResourceKind::Stack,
        ResourceKind::FileSize,
        ResourceKind::Processes,
        ResourceKind::LockedMemory,
        ResourceKind::OpenFiles,
    ];

    /// Classes shown in the operator report, in display order.
    pub const REPORTED: [ResourceKind; 8] = [
        ResourceKind::CoreSize,
        ResourceKind::AddressSpace,
        ResourceKind::DataSegment,
        ResourceKind::Stack,
        ResourceKind::FileSize,
        ResourceKind::Processes,
        ResourceKind::LockedMemory,
        ResourceKind::OpenFiles,
    ];

    /// Descriptor ceiling used instead of "unlimited"; kernels reject
    /// RLIM_INFINITY for RLIMIT_NOFILE.
    pub const OPEN_FILES_CEILING: u64 = 1_048_576;

    pub fn rlimit_name(self) -> &'static str {
        match self {
            ResourceKind::CoreSize => "RLIMIT_CORE",
            ResourceKind::AddressSpace => "RLIMIT_AS",
            ResourceKind::DataSegment => "RLIMIT_DATA",
            ResourceKind::Stack => "RLIMIT_STACK",
            ResourceKind::FileSize => "RLIMIT_FSIZE",
            ResourceKind::Processes => "RLIMIT_NPROC",
            ResourceKind::LockedMemory => "RLIMIT_MEMLOCK",
            ResourceKind::OpenFiles => "RLIMIT_NOFILE",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ResourceKind::CoreSize => "core dump size",
            ResourceKind::AddressSpace => "address space",
            ResourceKind::DataSegment => "data segment",
            ResourceKind::Stack => "stack size",
            ResourceKind::FileSize => "file size",
            ResourceKind::Processes => "thread",
            ResourceKind::LockedMemory => "locked memory",
            ResourceKind::OpenFiles => "file descriptor",
        }
    }

    /// Target ceiling when hardening, `None` for classes hardening leaves alone.
    pub fn hardened_ceiling(self) -> Option<Ceiling> {
        match self {
            ResourceKind::CoreSize => None,
            ResourceKind::OpenFiles => Some(Ceiling::Limited(Self::OPEN_FILES_CEILING)),
            _ => Some(Ceiling::Unlimited),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rlimit_name())
    }
}

/// A single rlimit value. `Limited` sorts below `Unlimited`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Ceiling {
    Limited(u64),
    Unlimited,
}

impl Ceiling {
    pub fn from_raw(raw: u64) -> Self {
        if raw == libc::RLIM_INFINITY as u64 {
            Ceiling::Unlimited
        } else {
            Ceiling::Limited(raw)
        }
    }

    pub fn to_raw(self) -> u64 {
        match self {
            Ceiling::Limited(value) => value,
            Ceiling::Unlimited => libc::RLIM_INFINITY as u64,
        }
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Ceiling::Unlimited)
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Limited(value) => write!(f, "{}", value),
            Ceiling::Unlimited => f.write_str("RLIM64_INFINITY"),
        }
    }
}

/// Resource identifier plus its (soft, hard) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimitSpec {
    pub resource: ResourceKind,
    pub soft: Ceiling,
    pub hard: Ceiling,
}

impl ResourceLimitSpec {
    pub fn new(resource: ResourceKind, soft: Ceiling, hard: Ceiling) -> Self {
        Self {
            resource,
            soft,
            hard,
        }
    }

    /// Same value for both soft and hard.
    pub fn pinned(resource: ResourceKind, ceiling: Ceiling) -> Self {
        Self::new(resource, ceiling, ceiling)
    }
}

/// Bootstrap steps, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootstrapStage {
    Init,
    Umask,
    ResourceLimits,
    Jail,
    Daemonize,
    Privileges,
    CoreDumps,
    Report,
    Complete,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapStage::Init => "init",
            BootstrapStage::Umask => "umask",
            BootstrapStage::ResourceLimits => "resource-limits",
            BootstrapStage::Jail => "jail",
            BootstrapStage::Daemonize => "daemonize",
            BootstrapStage::Privileges => "privileges",
            BootstrapStage::CoreDumps => "core-dumps",
            BootstrapStage::Report => "report",
            BootstrapStage::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// Closed failure taxonomy. Only the `Fatal*` kinds abort bootstrap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    QueryError,
    TransientHardeningFailure,
    FatalContainmentFailure,
    FatalDaemonizeFailure,
    FatalAccountLookupFailure,
    FatalPrivilegeDropFailure,
    ConfigurationError,
}

impl FailureKind {
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FailureKind::FatalContainmentFailure
                | FailureKind::FatalDaemonizeFailure
                | FailureKind::FatalAccountLookupFailure
                | FailureKind::FatalPrivilegeDropFailure
                | FailureKind::ConfigurationError
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error types for the bootstrap core
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Resource limit query error: {0}")]
    Query(String),

    #[error("Resource hardening error: {0}")]
    TransientHardening(String),

    #[error("Containment error: {0}")]
    Containment(String),

    #[error("Daemonize error: {0}")]
    Daemonize(String),

    #[error("Account lookup error: {0}")]
    AccountLookup(String),

    #[error("Privilege drop error: {0}")]
    PrivilegeDrop(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BootstrapError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BootstrapError::Query(_) => FailureKind::QueryError,
            BootstrapError::TransientHardening(_) => FailureKind::TransientHardeningFailure,
            BootstrapError::Containment(_) => FailureKind::FatalContainmentFailure,
            BootstrapError::Daemonize(_) => FailureKind::FatalDaemonizeFailure,
            BootstrapError::AccountLookup(_) => FailureKind::FatalAccountLookupFailure,
            BootstrapError::PrivilegeDrop(_) => FailureKind::FatalPrivilegeDropFailure,
            BootstrapError::Config(_) | BootstrapError::Io(_) => FailureKind::ConfigurationError,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;
