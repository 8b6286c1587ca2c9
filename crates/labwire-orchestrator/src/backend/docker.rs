//! Docker lab backend.
//!
//! Each device becomes one container and each link one network backed by the
//! driver plugin. Objects are named and labeled deterministically (see
//! [`ResourceNamer`]) so that repeated deployments converge on the same
//! objects and undeploy can find everything a lab left behind.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use labwire_core::{Device, DriverVariant, Lab};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::r#trait::LabBackend;
use crate::arch::Architecture;
use crate::container::{DeviceRegistry, DeviceState};
use crate::driver::{DriverLifecycleManager, LockFile, XtablesLock};
use crate::engine::{ContainerInfo, ContainerSpec, DockerEngine, EngineClient, NetworkSpec};
use crate::error::{DeviceFailure, OrchestratorError, ResourceKind, Result};
use crate::naming::ResourceNamer;
use crate::settings::Settings;

/// Capabilities granted to unprivileged devices.
const DEFAULT_CAPABILITIES: [&str; 5] = [
    "NET_ADMIN",
    "NET_RAW",
    "NET_BROADCAST",
    "NET_BIND_SERVICE",
    "SYS_ADMIN",
];

/// Lab option that mounts the user's home directory into every device.
pub const HOSTHOME_MOUNT_OPTION: &str = "hosthome_mount";

/// Mount point of the user's home directory inside devices.
const HOSTHOME_TARGET: &str = "/hosthome";

/// Docker lab backend.
pub struct DockerBackend {
    engine: Arc<dyn EngineClient>,
    driver: DriverLifecycleManager,
    namer: ResourceNamer,
    registry: DeviceRegistry,
    settings: Settings,
    deploy_timeout: Option<Duration>,
    home_dir: Option<PathBuf>,
}

impl DockerBackend {
    /// Connects to the engine named by the settings.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let engine = DockerEngine::connect(settings.remote_url.as_deref()).await?;
        let lock = XtablesLock::new(&settings.lock_file_path);
        Ok(Self::new(
            Arc::new(engine),
            Arc::new(lock),
            settings,
            ResourceNamer::from_env(settings.multiuser),
        ))
    }

    /// Creates a backend over an existing engine client.
    pub fn new(
        engine: Arc<dyn EngineClient>,
        lock: Arc<dyn LockFile>,
        settings: &Settings,
        namer: ResourceNamer,
    ) -> Self {
        let (plugin_base, _) = settings.plugin();
        let driver = DriverLifecycleManager::new(engine.clone(), lock, plugin_base);

        Self {
            engine,
            driver,
            namer,
            registry: DeviceRegistry::new(),
            settings: settings.clone(),
            deploy_timeout: settings.deploy_timeout(),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    /// Pins the driver architecture instead of resolving it from the host.
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.driver = self.driver.with_architecture(architecture);
        self
    }

    /// Overrides the lab deployment deadline.
    pub fn with_deploy_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deploy_timeout = timeout;
        self
    }

    /// Overrides the home directory used for the host home mount.
    pub fn with_home_dir(mut self, home_dir: Option<PathBuf>) -> Self {
        self.home_dir = home_dir;
        self
    }

    /// Returns the namer used for engine objects.
    pub fn namer(&self) -> &ResourceNamer {
        &self.namer
    }

    /// Returns the device state registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn default_variant(&self) -> DriverVariant {
        self.settings.default_variant()
    }

    /// Ensures the driver for each variant, in order, before any network is touched.
    async fn ensure_drivers(&self, variants: BTreeSet<DriverVariant>) -> Result<()> {
        let is_remote = self.settings.is_remote();
        for variant in variants {
            self.driver.ensure_driver_ready(variant, is_remote).await?;
        }
        Ok(())
    }

    /// Creates the network of a link, reusing one that already exists.
    async fn ensure_network(&self, lab: &Lab, link: &str) -> Result<String> {
        let name = self.namer.network_name(lab.name(), link);
        let variant = lab.link_variant(link, self.default_variant());
        let spec = NetworkSpec {
            name: name.clone(),
            driver: self.driver.plugin_reference(variant)?,
            labels: self.namer.link_labels(lab.name(), link),
        };

        match self.engine.create_network(&spec).await {
            Ok(id) => {
                info!(network = %name, id = %id, driver = %spec.driver, "Created network");
            }
            Err(e) if e.is_conflict() => {
                let existing = self.engine.inspect_network(&name).await?;
                if !self.namer.owns(&existing.labels, lab.name()) {
                    return Err(OrchestratorError::foreign(ResourceKind::Network, name, lab.name()));
                }
                debug!(network = %name, id = %existing.id, "Using existing network");
            }
            Err(e) => return Err(e),
        }
        Ok(name)
    }

    fn hosthome_enabled(&self, lab: &Lab) -> bool {
        lab.bool_option(HOSTHOME_MOUNT_OPTION)
            .unwrap_or(self.settings.hosthome_mount)
    }

    fn container_spec(
        &self,
        lab: &Lab,
        device: &Device,
        name: &str,
        network: Option<String>,
    ) -> ContainerSpec {
        let options = &device.options;

        let mut labels = options.labels.clone();
        labels.extend(self.namer.device_labels(lab.name(), device.name()));

        let mut binds: Vec<String> = options.mounts.iter().map(|m| m.as_bind()).collect();
        if self.hosthome_enabled(lab) {
            match &self.home_dir {
                Some(home) => binds.push(format!("{}:{}", home.display(), HOSTHOME_TARGET)),
                None => warn!(device = %device.name(), "Home directory unknown, skipping host home mount"),
            }
        }

        let cap_add = if options.privileged {
            Vec::new()
        } else {
            DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect()
        };

        ContainerSpec {
            name: name.to_string(),
            image: options
                .image
                .clone()
                .unwrap_or_else(|| self.settings.image.clone()),
            hostname: device.name().to_string(),
            network,
            labels,
            env: options
                .env
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect(),
            command: options.command.clone(),
            binds,
            privileged: options.privileged,
            cap_add,
        }
    }

    /// Starts an existing container of `lab` unless it already runs.
    async fn start_existing(&self, lab: &Lab, existing: &ContainerInfo) -> Result<()> {
        if !self.namer.owns(&existing.labels, lab.name()) {
            return Err(OrchestratorError::foreign(
                ResourceKind::Container,
                existing.name.clone(),
                lab.name(),
            ));
        }
        if existing.running {
            debug!(container = %existing.name, "Container already running");
            Ok(())
        } else {
            self.engine.start_container(&existing.name).await
        }
    }

    /// Creates the networks and container of a device and starts it.
    async fn realize_device(&self, lab: &Lab, device: &Device, container: &str) -> Result<()> {
        let mut networks = Vec::with_capacity(device.interface_count());
        for link in device.links() {
            networks.push(self.ensure_network(lab, link).await?);
        }

        match self.engine.inspect_container(container).await {
            Ok(existing) => return self.start_existing(lab, &existing).await,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let spec = self.container_spec(lab, device, container, networks.first().cloned());
        match self.engine.create_container(&spec).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                let existing = self.engine.inspect_container(container).await?;
                return self.start_existing(lab, &existing).await;
            }
            Err(e) => return Err(e),
        }

        // The first network is attached at creation; the rest follow in interface order.
        for network in networks.iter().skip(1) {
            match self.engine.connect_network(network, container).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    debug!(network = %network, container = %container, "Already connected");
                }
                Err(e) => return Err(e),
            }
        }

        self.engine.start_container(container).await
    }

    /// Deploys one device without touching the driver.
    async fn deploy_device(&self, lab: &Lab, device: &Device) -> Result<()> {
        let container = self.namer.container_name(lab.name(), device.name());

        if self.registry.state(&container).await == DeviceState::Running {
            match self.engine.inspect_container(&container).await {
                Ok(info) if info.running => {
                    debug!(device = %device.name(), container = %container, "Device already running");
                    return Ok(());
                }
                Ok(_) => {
                    self.registry.forget(&container).await;
                }
                Err(e) if e.is_not_found() => {
                    self.registry.forget(&container).await;
                }
                Err(e) => return Err(e),
            }
        }

        self.registry
            .transition(&container, DeviceState::Deploying)
            .await?;

        debug!(lab = %lab.name(), device = %device.name(), container = %container, "Deploying device");
        match self.realize_device(lab, device, &container).await {
            Ok(()) => {
                self.registry
                    .transition(&container, DeviceState::Running)
                    .await?;
                info!(lab = %lab.name(), device = %device.name(), "Device deployed");
                Ok(())
            }
            Err(e) => {
                self.registry
                    .transition(&container, DeviceState::Undeployed)
                    .await?;
                error!(lab = %lab.name(), device = %device.name(), error = %e, "Failed to deploy device");
                Err(e)
            }
        }
    }

    /// Deploys a device taken off the lab pool unless the deadline has passed.
    async fn deploy_scheduled(
        &self,
        lab: &Lab,
        device: &Device,
        deadline: Option<Instant>,
    ) -> (String, Result<()>) {
        let name = device.name().to_string();
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!(lab = %lab.name(), device = %name, "Deployment deadline passed, skipping device");
            let err = OrchestratorError::timeout(format!(
                "deployment of lab {} (device not started)",
                lab.name()
            ));
            return (name, Err(err));
        }
        let result = self.deploy_device(lab, device).await;
        (name, result)
    }

    async fn undeploy_scheduled(&self, lab: &str, container: String) -> (String, Result<()>) {
        let result = self.remove_device(lab, &container).await;
        (container, result)
    }

    /// Stops and removes a container of `lab`; absence is success.
    ///
    /// A container under this name that another lab or user owns is left alone.
    async fn remove_device(&self, lab: &str, container: &str) -> Result<()> {
        self.registry
            .transition(container, DeviceState::Undeploying)
            .await?;

        let result = async {
            match self.engine.inspect_container(container).await {
                Ok(info) if !self.namer.owns(&info.labels, lab) => {
                    warn!(container = %container, lab = %lab, "Container belongs to another lab, leaving it");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(container = %container, "Container already gone");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
            match self.engine.stop_container(container).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(container = %container, "Container already gone");
                    return Ok(());
                }
                Err(e) if e.is_unreachable() => return Err(e),
                Err(e) => warn!(container = %container, error = %e, "Failed to stop container"),
            }
            match self.engine.remove_container(container).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        }
        .await;

        self.registry
            .transition(container, DeviceState::Undeployed)
            .await?;
        result
    }
}

#[async_trait]
impl LabBackend for DockerBackend {
    async fn deploy_machine(&self, lab: &Lab, device: &str) -> Result<()> {
        let device = lab
            .device(device)
            .ok_or_else(|| OrchestratorError::UnknownDevice {
                lab: lab.name().to_string(),
                device: device.to_string(),
            })?;

        self.ensure_drivers(lab.device_variants(device, self.default_variant()))
            .await?;
        self.deploy_device(lab, device)
            .await
            .map_err(|e| OrchestratorError::device_failed(device.name(), e))
    }

    async fn undeploy_machine(&self, lab: &Lab, device: &str) -> Result<()> {
        let container = self.namer.container_name(lab.name(), device);
        self.remove_device(lab.name(), &container)
            .await
            .map_err(|e| OrchestratorError::device_failed(device, e))?;
        info!(lab = %lab.name(), device = %device, "Device undeployed");
        Ok(())
    }

    async fn deploy_lab(&self, lab: &Lab) -> Result<()> {
        info!(
            lab = %lab.name(),
            devices = lab.device_count(),
            workers = self.settings.max_workers,
            "Deploying lab"
        );

        self.ensure_drivers(lab.variants(self.default_variant()))
            .await?;

        let deadline = self.deploy_timeout.map(|timeout| Instant::now() + timeout);

        let scheduled: Vec<_> = lab
            .devices()
            .map(|device| self.deploy_scheduled(lab, device, deadline))
            .collect();
        let results: Vec<(String, Result<()>)> = stream::iter(scheduled)
            .buffer_unordered(self.settings.max_workers.max(1))
            .collect()
            .await;

        let mut failures: Vec<DeviceFailure> = results
            .into_iter()
            .filter_map(|(device, result)| {
                result.err().map(|e| DeviceFailure {
                    device,
                    reason: e.to_string(),
                })
            })
            .collect();

        if failures.is_empty() {
            info!(lab = %lab.name(), "Lab deployed successfully");
            Ok(())
        } else {
            failures.sort_by(|a, b| a.device.cmp(&b.device));
            error!(lab = %lab.name(), failed = failures.len(), "Lab deployment incomplete");
            Err(OrchestratorError::LabDeploymentFailed {
                lab: lab.name().to_string(),
                failures,
            })
        }
    }

    async fn undeploy_lab(&self, lab: &Lab) -> Result<()> {
        info!(lab = %lab.name(), user = %self.namer.user(), "Undeploying lab");

        let labels = self.namer.lab_labels(lab.name());

        let mut containers: BTreeSet<String> = lab
            .devices()
            .map(|device| self.namer.container_name(lab.name(), device.name()))
            .collect();
        for info in self.engine.list_containers(&labels).await? {
            containers.insert(info.name);
        }

        let results: Vec<(String, Result<()>)> = stream::iter(containers)
            .map(|container| self.undeploy_scheduled(lab.name(), container))
            .buffer_unordered(self.settings.max_workers.max(1))
            .collect()
            .await;

        let mut errors = Vec::new();
        for (container, result) in results {
            if let Err(e) = result {
                error!(container = %container, error = %e, "Failed to remove container");
                errors.push(format!("container {}: {}", container, e));
            }
        }

        for network in self.engine.list_networks(&labels).await? {
            let info = match self.engine.inspect_network(&network.name).await {
                Ok(info) => info,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    errors.push(format!("network {}: {}", network.name, e));
                    continue;
                }
            };

            if !info.containers.is_empty() {
                debug!(network = %info.name, attached = info.containers.len(), "Network still in use");
                continue;
            }

            match self.engine.remove_network(&info.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(network = %info.name, error = %e, "Failed to remove network");
                    errors.push(format!("network {}: {}", info.name, e));
                }
            }
        }

        if errors.is_empty() {
            info!(lab = %lab.name(), "Lab undeployed");
            Ok(())
        } else {
            Err(OrchestratorError::UndeployFailed {
                lab: lab.name().to_string(),
                errors,
            })
        }
    }

    fn name(&self) -> &str {
        "Docker"
    }

    async fn release_version(&self) -> Result<String> {
        self.engine.engine_version().await
    }
}
