use crate::config::loader::DaemonConfig;
use crate::config::types::{ProcessSecurityConfig, ResourceKind};
use crate::exec::bootstrap::{BootstrapOrchestrator, BootstrapOutcome};
use crate::kernel::rlimit::ResourceLimitController;
use crate::kernel::system::{LinuxSystem, SystemOps};
use crate::observability::events::{AuditFileSink, FanoutSink, LogSink};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::ffi::CString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Harden this process, then exec COMMAND (or exit) once ready
    Run(RunArgs),
    /// Print the current resource limits
    Limits,
    /// Print the resolved configuration as JSON
    ShowConfig {
        /// Configuration file (defaults to ./daemonguard.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Configuration file (defaults to ./daemonguard.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Jail the process inside this directory
    #[arg(long)]
    root_dir: Option<PathBuf>,
    /// Detach into the background
    #[arg(long)]
    daemonize: bool,
    /// Account to permanently switch to
    #[arg(long)]
    user: Option<String>,
    /// Raise resource ceilings before starting
    #[arg(long)]
    increase_limits: bool,
    /// Report resource ceilings once ready
    #[arg(long)]
    report_limits: bool,
    /// Enable core dumps up to SIZE bytes
    #[arg(long, value_name = "SIZE")]
    core_dumps: Option<u64>,
    /// Append bootstrap events as JSON lines to this file
    #[arg(long)]
    audit_log: Option<PathBuf>,
    /// Command to exec once bootstrap is complete. Refused together with
    /// --daemonize or --user: execve makes the process dumpable again
    #[arg(last = true)]
    command: Vec<String>,
}

impl RunArgs {
    /// Command-line flags win over the configuration file.
    fn apply(&self, config: &mut DaemonConfig) {
        let security = &mut config.security;
        if let Some(root_dir) = &self.root_dir {
            security.root_directory = Some(root_dir.clone());
        }
        if self.daemonize {
            security.daemonize = true;
        }
        if let Some(user) = &self.user {
            security.impersonate_user = Some(user.clone());
        }
        if self.increase_limits {
            security.increase_resource_limits = true;
        }
        if self.report_limits {
            security.report_resource_limits = true;
        }
        if let Some(size) = self.core_dumps {
            security.enable_core_dumps = true;
            security.core_dump_size_limit = size;
        }
        if let Some(audit_log) = &self.audit_log {
            config.logging.audit_log = Some(audit_log.clone());
        }
    }
}

/// Reject exec when bootstrap marks the process non-dumpable.
///
/// execve(2) resets PR_SET_DUMPABLE to 1 for an ordinary binary, so an
/// exec'd payload would run without the anti-debug protection that
/// daemonization and the privilege transition report as applied.
fn check_payload_allowed(security: &ProcessSecurityConfig, command: &[String]) -> Result<()> {
    if command.is_empty() {
        return Ok(());
    }
    let mut reasons = Vec::new();
    if security.daemonize {
        reasons.push("daemonize");
    }
    if security.impersonate_user().is_some() {
        reasons.push("impersonate_user");
    }
    if reasons.is_empty() {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "refusing to exec {} with {} set: execve resets the non-dumpable flag; \
         run the service in-process or have it call prctl(PR_SET_DUMPABLE, 0) itself",
        command[0],
        reasons.join(" and ")
    ))
}

fn load_config(path: Option<&PathBuf>) -> Result<DaemonConfig> {
    let config = match path {
        Some(path) => DaemonConfig::load_from_file(path)?,
        None => DaemonConfig::load_default()?,
    };
    Ok(config)
}

pub fn run() -> Result<()> {
    // Initialize structured logging (RUST_LOG)
    env_logger::init();

    if !cfg!(unix) {
        eprintln!("Error: daemonguard requires a Unix-like system");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_bootstrap(args),
        Commands::Limits => {
            let system = LinuxSystem::new();
            let snapshot = ResourceLimitController::new(&system, &LogSink)
                .report(&ResourceKind::REPORTED);
            print!("{}", snapshot);
            Ok(())
        }
        Commands::ShowConfig { config } => {
            let config = load_config(config.as_ref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run_bootstrap(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_ref())?;
    args.apply(&mut config);
    let config = config.normalized();
    check_payload_allowed(&config.security, &args.command)?;

    let system = LinuxSystem::new();
    warn_if_unprivileged(&system, &config.security);

    // Opened before the jail and the privilege drop, which may make the path
    // unreachable afterwards.
    let audit = match &config.logging.audit_log {
        Some(path) => Some(
            AuditFileSink::open(path)
                .with_context(|| format!("opening audit log {}", path.display()))?,
        ),
        None => None,
    };

    let mut sink = FanoutSink::new().with(LogSink);
    if let Some(audit) = audit {
        sink = sink.with(audit);
    }

    match BootstrapOrchestrator::new(&system, &sink).run(&config.security) {
        BootstrapOutcome::Ready(summary) => {
            log::info!("Process ready (run {}): {}", summary.run_id, summary.identity);
            if args.command.is_empty() {
                return Ok(());
            }
            exec_payload(&args.command)
        }
        outcome @ BootstrapOutcome::Aborted(_) => {
            if let Some(reason) = outcome.abort_reason() {
                eprintln!("daemonguard: bootstrap aborted: {}", reason);
            }
            std::process::exit(outcome.exit_code());
        }
    }
}

fn warn_if_unprivileged(system: &LinuxSystem, security: &ProcessSecurityConfig) {
    if system.identity().is_privileged() {
        return;
    }
    if security.root_directory().is_some() || security.impersonate_user().is_some() {
        eprintln!("Warning: daemonguard is not running as root");
        eprintln!("Running without root will make these steps fail:");
        if security.root_directory().is_some() {
            eprintln!("  - Chroot into the configured root directory");
        }
        if security.impersonate_user().is_some() {
            eprintln!("  - Switching to the configured user account");
        }
    }
}

/// Replace this process with `command`. Returns only on failure.
fn exec_payload(command: &[String]) -> Result<()> {
    let argv = command
        .iter()
        .map(|arg| CString::new(arg.as_str()))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("command argument contains a NUL byte")?;
    let program = argv
        .first()
        .ok_or_else(|| anyhow::anyhow!("missing command"))?;

    log::debug!("Executing payload {:?}", command);
    let err = match nix::unistd::execvp(program, &argv) {
        Ok(never) => match never {},
        Err(e) => e,
    };
    Err(anyhow::anyhow!("failed to exec {}: {}", command[0], err))
}
