//! Resource ceilings (getrlimit/setrlimit).
//!
//! Everything here is best-effort: a failure on one resource class is
//! reported and the next class is still attempted.

use crate::config::types::{
    BootstrapError, BootstrapStage, Ceiling, ResourceKind, ResourceLimitSpec, Result,
};
use crate::kernel::system::SystemOps;
use crate::observability::events::{BootstrapEvent, DiagnosticSink};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a hardening pass did, per resource class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardeningReport {
    pub applied: Vec<ResourceLimitSpec>,
    pub failed: Vec<(ResourceKind, String)>,
    pub skipped: Vec<ResourceKind>,
}

impl HardeningReport {
    pub fn attempted(&self) -> usize {
        self.applied.len() + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resulting RLIMIT_CORE policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreDumpPolicy {
    /// Core dumps disabled in config; the OS default is untouched.
    OsDefault,
    /// Soft and hard ceiling pinned to this many bytes.
    Limited(u64),
    /// The kernel refused the ceiling; the OS default remains.
    Rejected,
}

/// One row of the operator report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitEntry {
    pub resource: ResourceKind,
    pub soft: std::result::Result<Ceiling, String>,
}

/// First line of the operator report.
pub const REPORT_HEADER: &str =
    "---------------------------- RESOURCES LIMITS ----------------------------";

/// Soft ceilings at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    pub entries: Vec<LimitEntry>,
}

impl LimitSnapshot {
    pub fn soft(&self, resource: ResourceKind) -> Option<Ceiling> {
        self.entries
            .iter()
            .find(|entry| entry.resource == resource)
            .and_then(|entry| entry.soft.as_ref().ok().copied())
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| match &entry.soft {
                Ok(ceiling) => format!("{} = {}", entry.resource, ceiling),
                Err(reason) => format!("{} = unavailable ({})", entry.resource, reason),
            })
            .collect()
    }
}

impl fmt::Display for LimitSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", REPORT_HEADER)?;
        for line in self.lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

pub struct ResourceLimitController<'a, S: SystemOps + ?Sized> {
    system: &'a S,
    sink: &'a dyn DiagnosticSink,
}

impl<'a, S: SystemOps + ?Sized> ResourceLimitController<'a, S> {
    pub fn new(system: &'a S, sink: &'a dyn DiagnosticSink) -> Self {
        Self { system, sink }
    }

    /// Current (soft, hard) pair. Failures are reported, never fatal.
    pub fn query(&self, resource: ResourceKind) -> Result<ResourceLimitSpec> {
        match self.system.get_rlimit(resource) {
            Ok((soft, hard)) => Ok(ResourceLimitSpec::new(resource, soft, hard)),
            Err(e) => {
                let error = BootstrapError::Query(format!(
                    "Unable to retrieve the {} limit ({}): {}",
                    resource.description(),
                    resource,
                    e
                ));
                self.sink
                    .emit(&BootstrapEvent::failure(BootstrapStage::ResourceLimits, &error));
                Err(error)
            }
        }
    }

    pub fn query_hard(&self, resource: ResourceKind) -> Result<Ceiling> {
        self.query(resource).map(|spec| spec.hard)
    }

    pub fn query_soft(&self, resource: ResourceKind) -> Result<Ceiling> {
        self.query(resource).map(|spec| spec.soft)
    }

    /// Raise every class in `resources` to its hardened ceiling.
    ///
    /// Each class is attempted independently; there is no early return.
    pub fn harden(&self, resources: &[ResourceKind]) -> HardeningReport {
        let mut report = HardeningReport::default();

        for &resource in resources {
            let Some(ceiling) = resource.hardened_ceiling() else {
                log::debug!("{} is not a hardening target, skipping", resource);
                report.skipped.push(resource);
                continue;
            };

            match self.system.set_rlimit(resource, ceiling, ceiling) {
                Ok(()) => {
                    log::debug!("Raised {} to {}", resource, ceiling);
                    report.applied.push(ResourceLimitSpec::pinned(resource, ceiling));
                }
                Err(e) => {
                    let error = BootstrapError::TransientHardening(format!(
                        "Unable to increase the {} limit ({}) to {}: {}",
                        resource.description(),
                        resource,
                        ceiling,
                        e
                    ));
                    self.sink
                        .emit(&BootstrapEvent::failure(BootstrapStage::ResourceLimits, &error));
                    report.failed.push((resource, e.to_string()));
                }
            }
        }

        self.sink.emit(&BootstrapEvent::info(
            BootstrapStage::ResourceLimits,
            format!(
                "Raised {} of {} resource limits",
                report.applied.len(),
                report.attempted()
            ),
        ));
        report
    }

    /// Pin RLIMIT_CORE to `size_limit` when enabled; otherwise leave the OS
    /// default alone.
    pub fn set_core_dump_policy(&self, enabled: bool, size_limit: u64) -> CoreDumpPolicy {
        if !enabled {
            self.sink.emit(&BootstrapEvent::info(
                BootstrapStage::CoreDumps,
                "Core dumps not enabled, keeping the system default",
            ));
            return CoreDumpPolicy::OsDefault;
        }

        let ceiling = Ceiling::Limited(size_limit);
        match self
            .system
            .set_rlimit(ResourceKind::CoreSize, ceiling, ceiling)
        {
            Ok(()) => {
                self.sink.emit(&BootstrapEvent::info(
                    BootstrapStage::CoreDumps,
                    format!("Core dumps enabled up to {} bytes", size_limit),
                ));
                CoreDumpPolicy::Limited(size_limit)
            }
            Err(e) => {
                let error = BootstrapError::TransientHardening(format!(
                    "The system does not allow core dumps of {} bytes: {}",
                    size_limit, e
                ));
                self.sink
                    .emit(&BootstrapEvent::failure(BootstrapStage::CoreDumps, &error));
                CoreDumpPolicy::Rejected
            }
        }
    }

    /// Soft ceilings of `resources`. Read-only.
    pub fn report(&self, resources: &[ResourceKind]) -> LimitSnapshot {
        let entries = resources
            .iter()
            .map(|&resource| LimitEntry {
                resource,
                soft: self.query_soft(resource).map_err(|e| e.to_string()),
            })
            .collect();
        LimitSnapshot { entries }
    }
}
