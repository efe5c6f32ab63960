/// Diagnostic events emitted by the bootstrap core
///
/// The core calls a [`DiagnosticSink`] synchronously for every progress step
/// and every failure. Where the events end up (the `log` facade, a JSON-lines
/// audit file, memory) is decided by whoever constructs the sink.
use crate::config::types::{BootstrapError, BootstrapStage, FailureKind, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log target used by [`LogSink`].
pub const LOG_TARGET: &str = "daemonguard::bootstrap";

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Severity a failure kind is reported at.
    pub fn for_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::QueryError => Severity::Info,
            FailureKind::TransientHardeningFailure => Severity::Warning,
            _ => Severity::Critical,
        }
    }
}

/// A single diagnostic event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapEvent {
    pub timestamp: DateTime<Utc>,
    /// Correlates every event of one bootstrap run
    pub run_id: Option<String>,
    pub stage: BootstrapStage,
    pub severity: Severity,
    pub kind: Option<FailureKind>,
    pub message: String,
    pub pid: u32,
}

impl BootstrapEvent {
    pub fn new(stage: BootstrapStage, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: None,
            stage,
            severity,
            kind: None,
            message: message.into(),
            pid: std::process::id(),
        }
    }

    pub fn info(stage: BootstrapStage, message: impl Into<String>) -> Self {
        Self::new(stage, Severity::Info, message)
    }

    /// Event describing a failure, at the severity its kind implies.
    pub fn failure(stage: BootstrapStage, error: &BootstrapError) -> Self {
        let kind = error.kind();
        Self::new(stage, Severity::for_failure(kind), error.to_string()).with_kind(kind)
    }

    pub fn with_kind(mut self, kind: FailureKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Receiver for diagnostic events.
pub trait DiagnosticSink {
    fn emit(&self, event: &BootstrapEvent);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, event: &BootstrapEvent) {
        let kind = event
            .kind
            .map(|kind| format!(" [{}]", kind))
            .unwrap_or_default();
        match event.severity {
            Severity::Info => {
                log::info!(target: LOG_TARGET, "{}: {}{}", event.stage, event.message, kind)
            }
            Severity::Warning => {
                log::warn!(target: LOG_TARGET, "{}: {}{}", event.stage, event.message, kind)
            }
            Severity::Critical => {
                log::error!(target: LOG_TARGET, "{}: {}{}", event.stage, event.message, kind)
            }
        }
    }
}

/// Appends events as JSON lines to an audit file.
pub struct AuditFileSink {
    audit_file: Mutex<File>,
    audit_path: PathBuf,
}

impl AuditFileSink {
    pub fn open(audit_path: impl Into<PathBuf>) -> Result<Self> {
        let audit_path = audit_path.into();

        if let Some(parent) = audit_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BootstrapError::Config(format!("Failed to create audit log directory: {}", e))
                })?;
            }
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&audit_path)
            .map_err(|e| {
                BootstrapError::Config(format!(
                    "Failed to open audit log {}: {}",
                    audit_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            audit_file: Mutex::new(audit_file),
            audit_path,
        })
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }
}

impl DiagnosticSink for AuditFileSink {
    fn emit(&self, event: &BootstrapEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize bootstrap event: {}", e);
                return;
            }
        };

        match self.audit_file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                    log::error!(
                        "Failed to write audit log {}: {}",
                        self.audit_path.display(),
                        e
                    );
                }
            }
            Err(_) => log::error!("Audit log mutex poisoned, dropping event"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<BootstrapEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BootstrapEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn with_kind(&self, kind: FailureKind) -> Vec<BootstrapEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == Some(kind))
            .collect()
    }

    pub fn at_least(&self, severity: Severity) -> Vec<BootstrapEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.severity >= severity)
            .collect()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, event: &BootstrapEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Delivers each event to several sinks, in order.
#[derive(Default)]
pub struct FanoutSink<'a> {
    sinks: Vec<Box<dyn DiagnosticSink + 'a>>,
}

impl<'a> FanoutSink<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl DiagnosticSink + 'a) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl DiagnosticSink for FanoutSink<'_> {
    fn emit(&self, event: &BootstrapEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &T {
    fn emit(&self, event: &BootstrapEvent) {
        (**self).emit(event)
    }
}

/// Stamps a run id on every event before forwarding it.
pub struct CorrelatedSink<'a> {
    run_id: String,
    inner: &'a dyn DiagnosticSink,
}

impl<'a> CorrelatedSink<'a> {
    pub fn new(run_id: impl Into<String>, inner: &'a dyn DiagnosticSink) -> Self {
        Self {
            run_id: run_id.into(),
            inner,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl DiagnosticSink for CorrelatedSink<'_> {
    fn emit(&self, event: &BootstrapEvent) {
        if event.run_id.is_some() {
            self.inner.emit(event);
        } else {
            self.inner
                .emit(&event.clone().with_run_id(self.run_id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_severity_follows_kind() {
        assert_eq!(Severity::for_failure(FailureKind::QueryError), Severity::Info);
        assert_eq!(
            Severity::for_failure(FailureKind::TransientHardeningFailure),
            Severity::Warning
        );
        assert_eq!(
            Severity::for_failure(FailureKind::FatalContainmentFailure),
            Severity::Critical
        );
    }

    #[test]
    fn failure_event_carries_kind_and_message() {
        let err = BootstrapError::Containment("chroot(/srv/jail) failed".to_string());
        let event = BootstrapEvent::failure(BootstrapStage::Jail, &err);
        assert_eq!(event.kind, Some(FailureKind::FatalContainmentFailure));
        assert_eq!(event.severity, Severity::Critical);
        assert!(event.message.contains("/srv/jail"));
        assert_eq!(event.pid, std::process::id());
    }

    #[test]
    fn memory_sink_filters() {
        let sink = MemorySink::new();
        sink.emit(&BootstrapEvent::info(BootstrapStage::Umask, "umask set"));
        sink.emit(
            &BootstrapEvent::new(BootstrapStage::ResourceLimits, Severity::Warning, "denied")
                .with_kind(FailureKind::TransientHardeningFailure),
        );

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.at_least(Severity::Warning).len(), 1);
        assert_eq!(sink.with_kind(FailureKind::TransientHardeningFailure).len(), 1);
        assert!(sink.with_kind(FailureKind::QueryError).is_empty());
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let fanout = FanoutSink::new().with(&first).with(&second);
        assert_eq!(fanout.len(), 2);

        fanout.emit(&BootstrapEvent::info(BootstrapStage::Init, "start"));
        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn correlated_sink_stamps_run_id() {
        let memory = MemorySink::new();
        let correlated = CorrelatedSink::new("run-42", &memory);
        correlated.emit(&BootstrapEvent::info(BootstrapStage::Init, "start"));

        let events = memory.events();
        assert_eq!(events[0].run_id.as_deref(), Some("run-42"));
    }

    #[test]
    fn audit_sink_writes_json_lines() {
        let path = std::env::temp_dir().join(format!(
            "daemonguard-test-audit-{}.log",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let sink = AuditFileSink::open(&path).unwrap();
        assert_eq!(sink.audit_path(), path.as_path());
        sink.emit(&BootstrapEvent::info(BootstrapStage::Umask, "umask set"));
        sink.emit(
            &BootstrapEvent::new(BootstrapStage::Jail, Severity::Critical, "jail failed")
                .with_kind(FailureKind::FatalContainmentFailure),
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: BootstrapEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.stage, BootstrapStage::Jail);
        assert_eq!(parsed.kind, Some(FailureKind::FatalContainmentFailure));

        let _ = std::fs::remove_file(path);
    }
}
