//! Service configuration via `hearth.toml`
//!
//! On first start a commented default `hearth.toml` is written next to the
//! data. To change settings, edit the file and restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hearth_core::{Error, Result};

use crate::defaults::{merged_defaults, validate_defaults, SeedMode};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "hearth.toml";

/// Which orchestrator backs secret provisioning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningBackend {
    /// Secrets are stored locally; provisioning routes are unavailable
    #[default]
    None,
    /// In-process orchestrator (development and tests)
    Memory,
    /// Local Docker daemon in swarm mode
    Docker,
}

/// `[provisioning]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Orchestrator backend
    #[serde(default)]
    pub backend: ProvisioningBackend,
    /// Label attached to every external secret, valued with its logical name
    #[serde(default = "default_label")]
    pub label: String,
    /// Network worker services are attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Service name used when provisioning the worker at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_service: Option<String>,
    /// Image of the worker service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_image: Option<String>,
}

fn default_label() -> String {
    "hearth.secret".to_string()
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            backend: ProvisioningBackend::None,
            label: default_label(),
            network: None,
            worker_service: None,
            worker_image: None,
        }
    }
}

/// Service configuration loaded from `hearth.toml`
///
/// # Example
///
/// ```toml
/// listen = "0.0.0.0:8443"
/// data_dir = "/var/lib/hearth"
///
/// [provisioning]
/// backend = "docker"
/// network = "telemetry"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HearthConfig {
    /// Address the HTTP server binds
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Store directory; unset keeps everything in memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// HTTP worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// fsync the value log after every commit
    #[serde(default = "default_true")]
    pub sync_writes: bool,
    /// Seconds between value log GC passes (0 disables the worker)
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Stale-record ratio at which the value log is rewritten
    #[serde(default = "default_gc_discard_ratio")]
    pub gc_discard_ratio: f64,
    /// Default seeding mode
    #[serde(default)]
    pub seed_mode: SeedMode,
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Secret provisioning
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
    /// Extra or replacement defaults, merged over the built-in set
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

fn default_listen() -> String {
    "0.0.0.0:8443".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_gc_interval_secs() -> u64 {
    3600
}

fn default_gc_discard_ratio() -> f64 {
    0.7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: None,
            workers: default_workers(),
            sync_writes: true,
            gc_interval_secs: default_gc_interval_secs(),
            gc_discard_ratio: default_gc_discard_ratio(),
            seed_mode: SeedMode::default(),
            log_level: default_log_level(),
            provisioning: ProvisioningConfig::default(),
            defaults: BTreeMap::new(),
        }
    }
}

impl HearthConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Hearth configuration
#
# Address the HTTP server binds
listen = "0.0.0.0:8443"

# Store directory. Leave unset to keep everything in memory.
# data_dir = "/var/lib/hearth"

# HTTP worker threads
workers = 4

# fsync the value log after every commit
sync_writes = true

# Value log GC: interval in seconds (0 disables) and the stale-record
# ratio at which the log is rewritten
gc_interval_secs = 3600
gc_discard_ratio = 0.7

# Default seeding: "if-absent" keeps stored defaults, "reset" rewrites
# them on every start
seed_mode = "if-absent"

# Log filter when RUST_LOG is unset
log_level = "info"

[provisioning]
# "none" stores secrets locally, "memory" uses an in-process
# orchestrator, "docker" uses the local Docker daemon (swarm mode)
backend = "none"
label = "hearth.secret"
# network = "telemetry"
# worker_service = "telemetry-worker"
# worker_image = "registry.local/telemetry-worker:latest"

# Overrides for the built-in defaults
[defaults]
# tHomeRadiusFt = "150"
"#
    }

    /// Check value ranges and the defaults table
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if !(self.gc_discard_ratio > 0.0 && self.gc_discard_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "gc_discard_ratio must be in (0, 1], got {}",
                self.gc_discard_ratio
            )));
        }
        if self.provisioning.label.is_empty() {
            return Err(Error::Config("provisioning.label cannot be empty".to_string()));
        }
        if self.provisioning.worker_service.is_some() != self.provisioning.worker_image.is_some()
        {
            return Err(Error::Config(
                "provisioning.worker_service and worker_image must be set together".to_string(),
            ));
        }
        validate_defaults(&self.defaults).map_err(|e| Error::Config(e.to_string()))
    }

    /// GC interval, or `None` when the worker is disabled
    pub fn gc_interval(&self) -> Option<Duration> {
        match self.gc_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Built-in defaults with the `[defaults]` table applied
    pub fn effective_defaults(&self) -> BTreeMap<String, String> {
        merged_defaults(&self.defaults)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: HearthConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::Config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
