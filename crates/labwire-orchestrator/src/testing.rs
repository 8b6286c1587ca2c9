//! In-memory engine and lock file used by unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::driver::LockFile;
use crate::engine::{
    ContainerInfo, ContainerSpec, EngineClient, NetworkInfo, NetworkSpec, PluginInfo,
    PluginSetting,
};
use crate::error::{OrchestratorError, ResourceKind, Result};
use crate::naming::Labels;

/// An engine call as observed by [`FakeEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    InspectPlugin(String),
    InstallPlugin(String, Vec<String>),
    UpgradePlugin(String),
    EnablePlugin(String),
    DisablePlugin(String),
    ConfigurePlugin(String, Vec<String>),
    CreateNetwork(String),
    RemoveNetwork(String),
    CreateContainer { name: String, network: Option<String> },
    StartContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    ConnectNetwork { network: String, container: String },
}

impl Call {
    /// Returns true for calls that change plugin state.
    pub fn mutates_plugin(&self) -> bool {
        matches!(
            self,
            Self::InstallPlugin(..)
                | Self::UpgradePlugin(_)
                | Self::EnablePlugin(_)
                | Self::DisablePlugin(_)
                | Self::ConfigurePlugin(..)
        )
    }
}

#[derive(Default)]
struct State {
    plugins: BTreeMap<String, bool>,
    networks: BTreeMap<String, NetworkInfo>,
    containers: BTreeMap<String, ContainerInfo>,
    calls: Vec<Call>,
    network_races: BTreeSet<String>,
    failing_containers: BTreeSet<String>,
    failing_removals: BTreeSet<String>,
    create_delay: Option<Duration>,
    unreachable: bool,
}

/// Recording in-memory [`EngineClient`].
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

fn matches_labels(actual: &Labels, wanted: &Labels) -> bool {
    wanted.iter().all(|(k, v)| actual.get(k) == Some(v))
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut state = self.state();
        if state.unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        state.calls.push(call);
        Ok(())
    }

    pub fn with_plugin(self, reference: &str, enabled: bool) -> Self {
        self.state().plugins.insert(reference.to_string(), enabled);
        self
    }

    /// Makes the next creation of `network` lose a race to another client.
    pub fn race_network(&self, network: &str) {
        self.state().network_races.insert(network.to_string());
    }

    /// Makes creating `container` fail.
    pub fn fail_container(&self, container: &str) {
        self.state().failing_containers.insert(container.to_string());
    }

    /// Makes removing `container` fail; the container stays in place.
    pub fn fail_remove(&self, container: &str) {
        self.state().failing_removals.insert(container.to_string());
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    pub fn set_unreachable(&self) {
        self.state().unreachable = true;
    }

    /// Stops a container behind the orchestrator's back.
    pub fn stop_externally(&self, container: &str) {
        if let Some(info) = self.state().containers.get_mut(container) {
            info.running = false;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn plugin_enabled(&self, reference: &str) -> Option<bool> {
        self.state().plugins.get(reference).copied()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state().networks.keys().cloned().collect()
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    /// Adds a container created by someone else.
    pub fn insert_container(&self, name: &str, labels: Labels, networks: Vec<String>) {
        self.state().containers.insert(
            name.to_string(),
            ContainerInfo {
                id: format!("id-{}", name),
                name: name.to_string(),
                running: true,
                labels,
                networks,
            },
        );
    }

    /// Adds a network created by someone else.
    pub fn insert_network(&self, name: &str, labels: Labels) {
        self.state().networks.insert(
            name.to_string(),
            NetworkInfo {
                id: format!("net-{}", name),
                name: name.to_string(),
                driver: "bridge".to_string(),
                labels,
                containers: Vec::new(),
            },
        );
    }

    fn network_with_members(state: &State, mut info: NetworkInfo) -> NetworkInfo {
        info.containers = state
            .containers
            .values()
            .filter(|c| c.networks.contains(&info.name))
            .map(|c| c.id.clone())
            .collect();
        info
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn inspect_plugin(&self, reference: &str) -> Result<Option<PluginInfo>> {
        self.record(Call::InspectPlugin(reference.to_string()))?;
        Ok(self.state().plugins.get(reference).map(|enabled| PluginInfo {
            reference: reference.to_string(),
            enabled: *enabled,
        }))
    }

    async fn install_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()> {
        self.record(Call::InstallPlugin(
            reference.to_string(),
            settings.iter().map(ToString::to_string).collect(),
        ))?;
        self.state().plugins.insert(reference.to_string(), false);
        Ok(())
    }

    async fn upgrade_plugin(&self, reference: &str) -> Result<()> {
        self.record(Call::UpgradePlugin(reference.to_string()))
    }

    async fn enable_plugin(&self, reference: &str) -> Result<()> {
        self.record(Call::EnablePlugin(reference.to_string()))?;
        match self.state().plugins.get_mut(reference) {
            Some(enabled) => {
                *enabled = true;
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Plugin, reference)),
        }
    }

    async fn disable_plugin(&self, reference: &str) -> Result<()> {
        self.record(Call::DisablePlugin(reference.to_string()))?;
        match self.state().plugins.get_mut(reference) {
            Some(enabled) => {
                *enabled = false;
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Plugin, reference)),
        }
    }

    async fn configure_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()> {
        self.record(Call::ConfigurePlugin(
            reference.to_string(),
            settings.iter().map(ToString::to_string).collect(),
        ))
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        self.record(Call::CreateNetwork(spec.name.clone()))?;
        let mut state = self.state();
        if state.network_races.remove(&spec.name) {
            let winner = NetworkInfo {
                id: format!("net-{}", spec.name),
                name: spec.name.clone(),
                driver: spec.driver.clone(),
                labels: spec.labels.clone(),
                containers: Vec::new(),
            };
            state.networks.insert(spec.name.clone(), winner);
            return Err(OrchestratorError::conflict(ResourceKind::Network, &spec.name));
        }
        if state.networks.contains_key(&spec.name) {
            return Err(OrchestratorError::conflict(ResourceKind::Network, &spec.name));
        }
        let id = format!("net-{}", spec.name);
        state.networks.insert(
            spec.name.clone(),
            NetworkInfo {
                id: id.clone(),
                name: spec.name.clone(),
                driver: spec.driver.clone(),
                labels: spec.labels.clone(),
                containers: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo> {
        let state = self.state();
        if state.unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        match state.networks.get(name) {
            Some(info) => Ok(Self::network_with_members(&state, info.clone())),
            None => Err(OrchestratorError::not_found(ResourceKind::Network, name)),
        }
    }

    async fn list_networks(&self, labels: &Labels) -> Result<Vec<NetworkInfo>> {
        let state = self.state();
        if state.unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        Ok(state
            .networks
            .values()
            .filter(|n| matches_labels(&n.labels, labels))
            .map(|n| Self::network_with_members(&state, n.clone()))
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.record(Call::RemoveNetwork(name.to_string()))?;
        let mut state = self.state();
        if state.containers.values().any(|c| c.networks.iter().any(|n| n == name)) {
            return Err(OrchestratorError::engine_api(format!(
                "network {} has active endpoints",
                name
            )));
        }
        state
            .networks
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Network, name))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(Call::CreateContainer {
            name: spec.name.clone(),
            network: spec.network.clone(),
        })?;
        let delay = self.state().create_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if state.failing_containers.contains(&spec.name) {
            return Err(OrchestratorError::engine_api(format!(
                "image {} could not be started",
                spec.image
            )));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(OrchestratorError::conflict(ResourceKind::Container, &spec.name));
        }
        if let Some(network) = &spec.network {
            if !state.networks.contains_key(network) {
                return Err(OrchestratorError::not_found(ResourceKind::Network, network));
            }
        }
        let id = format!("id-{}", spec.name);
        state.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                running: false,
                labels: spec.labels.clone(),
                networks: spec.network.iter().cloned().collect(),
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInfo> {
        let state = self.state();
        if state.unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        state
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Container, name))
    }

    async fn list_containers(&self, labels: &Labels) -> Result<Vec<ContainerInfo>> {
        let state = self.state();
        if state.unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        Ok(state
            .containers
            .values()
            .filter(|c| matches_labels(&c.labels, labels))
            .cloned()
            .collect())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record(Call::StartContainer(name.to_string()))?;
        match self.state().containers.get_mut(name) {
            Some(info) => {
                info.running = true;
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Container, name)),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.record(Call::StopContainer(name.to_string()))?;
        match self.state().containers.get_mut(name) {
            Some(info) => {
                info.running = false;
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Container, name)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.record(Call::RemoveContainer(name.to_string()))?;
        let mut state = self.state();
        if state.failing_removals.contains(name) {
            return Err(OrchestratorError::engine_api(format!(
                "container {} is marked for removal but the driver refused",
                name
            )));
        }
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::not_found(ResourceKind::Container, name))
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        self.record(Call::ConnectNetwork {
            network: network.to_string(),
            container: container.to_string(),
        })?;
        let mut state = self.state();
        if !state.networks.contains_key(network) {
            return Err(OrchestratorError::not_found(ResourceKind::Network, network));
        }
        match state.containers.get_mut(container) {
            Some(info) if info.networks.iter().any(|n| n == network) => Err(
                OrchestratorError::conflict(ResourceKind::Network, network),
            ),
            Some(info) => {
                info.networks.push(network.to_string());
                Ok(())
            }
            None => Err(OrchestratorError::not_found(ResourceKind::Container, container)),
        }
    }

    async fn engine_version(&self) -> Result<String> {
        if self.state().unreachable {
            return Err(OrchestratorError::unreachable("connection refused"));
        }
        Ok("27.3.1".to_string())
    }
}

/// Lock file that only counts how often it was ensured.
pub struct FakeLock {
    path: PathBuf,
    ensured: AtomicUsize,
    fail: bool,
}

impl FakeLock {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/run/xtables.lock"),
            ensured: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn ensure_count(&self) -> usize {
        self.ensured.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockFile for FakeLock {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure(&self) -> std::io::Result<()> {
        self.ensured.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only file system",
            ));
        }
        Ok(())
    }
}
