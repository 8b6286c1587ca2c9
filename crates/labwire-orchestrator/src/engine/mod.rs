//! Container engine client surface.
//!
//! [`EngineClient`] is the narrow set of engine calls the driver lifecycle
//! manager and the deployment engine need. Implementations report a missing
//! object as [`OrchestratorError::ResourceNotFound`] and a name collision as
//! [`OrchestratorError::ResourceConflict`]; callers rely on both to stay
//! idempotent.
//!
//! [`OrchestratorError::ResourceNotFound`]: crate::OrchestratorError::ResourceNotFound
//! [`OrchestratorError::ResourceConflict`]: crate::OrchestratorError::ResourceConflict

mod docker;

pub use docker::DockerEngine;

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;
use crate::naming::Labels;

/// Installed driver plugin as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin reference (`org/name:tag`).
    pub reference: String,
    /// Whether the plugin is enabled.
    pub enabled: bool,
}

/// A `key=value` plugin setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSetting {
    /// Setting key, e.g. `xtables_lock.source`.
    pub key: String,
    /// Setting value.
    pub value: String,
}

impl PluginSetting {
    /// Creates a setting.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for PluginSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Request to create a link network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Network name.
    pub name: String,
    /// Driver plugin reference.
    pub driver: String,
    /// Labels.
    pub labels: Labels,
}

/// Network as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Engine ID.
    pub id: String,
    /// Network name.
    pub name: String,
    /// Driver name.
    pub driver: String,
    /// Labels.
    pub labels: Labels,
    /// IDs of attached containers.
    pub containers: Vec<String>,
}

/// Request to create a device container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Hostname inside the container.
    pub hostname: String,
    /// Network the container is created on; `None` creates it without networking.
    pub network: Option<String>,
    /// Labels.
    pub labels: Labels,
    /// Environment as `KEY=value`.
    pub env: Vec<String>,
    /// Command override.
    pub command: Option<Vec<String>>,
    /// Bind mounts as `src:dst[:ro]`.
    pub binds: Vec<String>,
    /// Run privileged.
    pub privileged: bool,
    /// Added capabilities.
    pub cap_add: Vec<String>,
}

/// Container as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    /// Engine ID.
    pub id: String,
    /// Container name without the leading slash.
    pub name: String,
    /// Whether the container is running.
    pub running: bool,
    /// Labels.
    pub labels: Labels,
    /// Names of attached networks.
    pub networks: Vec<String>,
}

/// Engine operations used by the orchestrator.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Looks up a plugin; `None` when it is not installed.
    async fn inspect_plugin(&self, reference: &str) -> Result<Option<PluginInfo>>;

    /// Installs a plugin, granting its privileges and applying settings.
    async fn install_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()>;

    /// Upgrades a plugin in place to the latest image of its reference.
    async fn upgrade_plugin(&self, reference: &str) -> Result<()>;

    /// Enables a plugin.
    async fn enable_plugin(&self, reference: &str) -> Result<()>;

    /// Disables a plugin.
    async fn disable_plugin(&self, reference: &str) -> Result<()>;

    /// Applies settings to a disabled plugin.
    async fn configure_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()>;

    /// Creates a network and returns its ID.
    async fn create_network(&self, spec: &NetworkSpec) -> Result<String>;

    /// Inspects a network by name or ID.
    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo>;

    /// Lists networks carrying all of the given labels.
    async fn list_networks(&self, labels: &Labels) -> Result<Vec<NetworkInfo>>;

    /// Removes a network.
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Creates a container and returns its ID.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Inspects a container by name or ID.
    async fn inspect_container(&self, name: &str) -> Result<ContainerInfo>;

    /// Lists containers, running or not, carrying all of the given labels.
    async fn list_containers(&self, labels: &Labels) -> Result<Vec<ContainerInfo>>;

    /// Starts a container.
    async fn start_container(&self, name: &str) -> Result<()>;

    /// Stops a container.
    async fn stop_container(&self, name: &str) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, name: &str) -> Result<()>;

    /// Attaches a container to a network.
    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;

    /// Returns the engine release version.
    async fn engine_version(&self) -> Result<String>;
}

/// Formats labels as engine `label` filters.
pub(crate) fn label_filters(labels: &Labels) -> Vec<String> {
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}
