//! Orchestrator settings.
//!
//! Settings are plain data loaded from TOML. Every field has a default so a
//! partial file (or none at all) yields a usable local configuration.

use labwire_core::DriverVariant;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

/// Default host path of the xtables lock shared with the bridged driver.
pub const DEFAULT_LOCK_FILE_PATH: &str = "/run/xtables.lock";

/// Settings for the [`Manager`](crate::Manager) and its backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Backend selector. Only `docker` is available.
    pub manager_type: String,

    /// Driver base name, e.g. `kathara/katharanp`. A `_vde` suffix makes the
    /// userspace variant the default for links without an override.
    pub network_plugin: String,

    /// Remote engine URL. When set, the driver is never mutated.
    pub remote_url: Option<String>,

    /// Whether resource names are scoped by the deploying user.
    pub multiuser: bool,

    /// Image used by devices that do not set one.
    pub image: String,

    /// Default for the `hosthome_mount` lab option.
    pub hosthome_mount: bool,

    /// Maximum number of devices deployed concurrently.
    pub max_workers: usize,

    /// Deadline for scheduling devices during lab deployment.
    pub deploy_timeout_secs: Option<u64>,

    /// Host path of the xtables lock file.
    pub lock_file_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            manager_type: "docker".to_string(),
            network_plugin: "kathara/katharanp_vde".to_string(),
            remote_url: None,
            multiuser: false,
            image: "kathara/base".to_string(),
            hosthome_mount: false,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            deploy_timeout_secs: None,
            lock_file_path: PathBuf::from(DEFAULT_LOCK_FILE_PATH),
        }
    }
}

impl Settings {
    /// Parses settings from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Checks the settings for values no backend can work with.
    pub fn validate(&self) -> Result<()> {
        if self.manager_type.trim().is_empty() {
            return Err(OrchestratorError::configuration("manager_type is empty"));
        }

        let (base, _) = self.plugin();
        match base.split_once('/') {
            Some((org, name)) if !org.is_empty() && !name.is_empty() && !name.contains(':') => {}
            _ => {
                return Err(OrchestratorError::configuration(format!(
                    "network_plugin must be <org>/<name> without a tag: {}",
                    self.network_plugin
                )))
            }
        }

        if self.image.trim().is_empty() {
            return Err(OrchestratorError::configuration("image is empty"));
        }
        if self.max_workers == 0 {
            return Err(OrchestratorError::configuration(
                "max_workers must be at least 1",
            ));
        }
        if self.deploy_timeout_secs == Some(0) {
            return Err(OrchestratorError::configuration(
                "deploy_timeout_secs must be positive when set",
            ));
        }
        Ok(())
    }

    /// Returns true if the engine is remote.
    pub fn is_remote(&self) -> bool {
        self.remote_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    /// Returns the driver base name and the default variant.
    pub fn plugin(&self) -> (&str, DriverVariant) {
        DriverVariant::from_plugin_name(&self.network_plugin)
    }

    /// Returns the variant used by links without an override.
    pub fn default_variant(&self) -> DriverVariant {
        self.plugin().1
    }

    /// Returns the lab deployment deadline.
    pub fn deploy_timeout(&self) -> Option<Duration> {
        self.deploy_timeout_secs.map(Duration::from_secs)
    }
}
