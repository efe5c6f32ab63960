/// Configuration loading from daemonguard.json
use crate::config::types::{BootstrapError, ProcessSecurityConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up by [`DaemonConfig::load_default`].
pub const DEFAULT_CONFIG_FILE: &str = "daemonguard.json";

/// Where diagnostic events go besides the `log` facade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON-lines audit file. Opened before daemonization so events survive
    /// stderr being pointed at /dev/null.
    pub audit_log: Option<PathBuf>,
}

/// Full daemonguard.json structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub security: ProcessSecurityConfig,
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Parse configuration from a JSON document
    pub fn from_json(content: &str) -> Result<Self> {
        let config: DaemonConfig = serde_json::from_str(content)
            .map_err(|e| BootstrapError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config.normalized())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BootstrapError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config = Self::from_json(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load ./daemonguard.json, falling back to defaults when it is absent.
    pub fn load_default() -> Result<Self> {
        let config_path = std::env::current_dir()
            .map_err(|e| BootstrapError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_CONFIG_FILE);

        if !config_path.exists() {
            log::debug!(
                "{} not found in current directory, using defaults",
                DEFAULT_CONFIG_FILE
            );
            return Ok(Self::default());
        }

        Self::load_from_file(config_path)
    }

    pub fn normalized(mut self) -> Self {
        self.security = self.security.normalized();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_use_defaults() {
        let config = DaemonConfig::from_json("{}").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(!config.security.daemonize);
        assert!(config.logging.audit_log.is_none());
    }

    #[test]
    fn parses_security_section() {
        let config = DaemonConfig::from_json(
            r#"{
                "security": {
                    "root_directory": "/var/jail",
                    "daemonize": true,
                    "enable_core_dumps": true,
                    "core_dump_size_limit": 1073741824,
                    "impersonate_user": "magma",
                    "increase_resource_limits": true,
                    "report_resource_limits": true
                },
                "logging": { "audit_log": "/var/log/daemonguard.audit" }
            }"#,
        )
        .unwrap();

        let security = &config.security;
        assert_eq!(security.root_directory(), Some(Path::new("/var/jail")));
        assert!(security.daemonize);
        assert!(security.enable_core_dumps);
        assert_eq!(security.core_dump_size_limit, 1 << 30);
        assert_eq!(security.impersonate_user(), Some("magma"));
        assert!(security.increase_resource_limits);
        assert!(security.report_resource_limits);
        assert_eq!(
            config.logging.audit_log,
            Some(PathBuf::from("/var/log/daemonguard.audit"))
        );
    }

    #[test]
    fn empty_strings_are_normalized_away() {
        let config = DaemonConfig::from_json(
            r#"{ "security": { "root_directory": "", "impersonate_user": "" } }"#,
        )
        .unwrap();
        assert_eq!(config.security.root_directory, None);
        assert_eq!(config.security.impersonate_user, None);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = DaemonConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn unreadable_file_is_a_config_error() {
        let path = std::env::temp_dir().join("daemonguard-test-missing-config.json");
        let _ = std::fs::remove_file(&path);
        let err = DaemonConfig::load_from_file(&path).unwrap_err();
        assert!(matches!(err, BootstrapError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!(
            "daemonguard-test-config-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, r#"{ "security": { "daemonize": true } }"#).unwrap();

        let config = DaemonConfig::load_from_file(&path).unwrap();
        assert!(config.security.daemonize);

        let _ = std::fs::remove_file(path);
    }
}
