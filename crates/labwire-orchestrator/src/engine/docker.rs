//! Docker engine client.
//!
//! Containers and networks go through the Engine API via bollard. Plugin
//! management is not exposed by bollard, so plugin calls run the `docker
//! plugin` CLI against the same daemon (`DOCKER_HOST` is set for remote
//! engines).

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, Ipam};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{
    label_filters, ContainerInfo, ContainerSpec, EngineClient, NetworkInfo, NetworkSpec,
    PluginInfo, PluginSetting,
};
use crate::error::{OrchestratorError, ResourceKind, Result};
use crate::naming::Labels;

/// Seconds to wait for a container to stop before it is killed.
const STOP_TIMEOUT_SECS: i64 = 10;

/// Seconds before a request to a remote engine times out.
const REMOTE_TIMEOUT_SECS: u64 = 120;

/// IPAM driver for link networks; addressing is left to the devices.
const NULL_IPAM_DRIVER: &str = "null";

/// Maps a bollard error onto the orchestrator taxonomy.
fn map_bollard(kind: ResourceKind, name: &str, err: bollard::errors::Error) -> OrchestratorError {
    use bollard::errors::Error as E;

    match err {
        E::DockerResponseServerError {
            status_code: 404, ..
        } => OrchestratorError::not_found(kind, name),
        E::DockerResponseServerError {
            status_code: 409, ..
        } => OrchestratorError::conflict(kind, name),
        E::DockerResponseServerError {
            status_code,
            message,
        } => OrchestratorError::engine_api(format!("{} {}: {} ({})", kind, name, message, status_code)),
        E::IOError { err } => OrchestratorError::unreachable(err.to_string()),
        E::SocketNotFoundError(path) => {
            OrchestratorError::unreachable(format!("socket not found: {}", path))
        }
        E::RequestTimeoutError => OrchestratorError::unreachable("request timed out"),
        E::HyperResponseError { err } => OrchestratorError::unreachable(err.to_string()),
        other => OrchestratorError::engine_api(other.to_string()),
    }
}

/// Converts labels to the owned map bollard expects.
fn to_hash_map(labels: &Labels) -> HashMap<String, String> {
    labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn to_labels(map: Option<HashMap<String, String>>) -> Labels {
    map.unwrap_or_default().into_iter().collect()
}

fn label_filter_map(labels: &Labels) -> HashMap<String, Vec<String>> {
    [("label".to_string(), label_filters(labels))]
        .into_iter()
        .collect()
}

/// Classifies a failed `docker plugin` invocation by its stderr.
fn classify_cli_error(reference: &str, action: &str, stderr: &str) -> OrchestratorError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("cannot connect to the docker daemon") || lower.contains("error during connect")
    {
        OrchestratorError::unreachable(stderr.to_string())
    } else if is_plugin_absent(&lower) {
        OrchestratorError::not_found(ResourceKind::Plugin, reference)
    } else if lower.contains("already exists") {
        OrchestratorError::conflict(ResourceKind::Plugin, reference)
    } else {
        OrchestratorError::engine_api(format!("docker plugin {} {}: {}", action, reference, stderr))
    }
}

/// Returns true if lowercased stderr says the plugin itself does not exist.
///
/// Registry failures ("manifest ... not found") must not read as an absent
/// plugin, or inspect would trigger an install.
fn is_plugin_absent(lower: &str) -> bool {
    if lower.contains("no such plugin") {
        return true;
    }
    lower.lines().any(|line| {
        line.find("plugin")
            .is_some_and(|at| line[at..].contains("not found") && !line.contains("manifest"))
    })
}

/// Returns true if an upgrade failure means there was nothing to do.
fn is_benign_upgrade_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("must be disabled") || lower.contains("up to date") || lower.contains("up-to-date")
}

/// [`EngineClient`] backed by a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
    remote_url: Option<String>,
}

impl DockerEngine {
    /// Connects to the local daemon, or to `remote_url` when given, and pings it.
    pub async fn connect(remote_url: Option<&str>) -> Result<Self> {
        let remote_url = remote_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string);

        let docker = match &remote_url {
            Some(url) => Docker::connect_with_http(url, REMOTE_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION),
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| OrchestratorError::unreachable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, "daemon", e))?;

        info!(
            remote = remote_url.as_deref().unwrap_or("local"),
            "Connected to Docker daemon"
        );

        Ok(Self { docker, remote_url })
    }

    /// Runs `docker plugin <args>` and returns trimmed stdout.
    async fn plugin_command(&self, reference: &str, args: &[&str]) -> Result<String> {
        let action = args.first().copied().unwrap_or_default();
        let mut command = Command::new("docker");
        command
            .arg("plugin")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(url) = &self.remote_url {
            command.env("DOCKER_HOST", url);
        }

        debug!(plugin = %reference, args = ?args, "Running docker plugin command");
        let output = command.output().await.map_err(|e| {
            OrchestratorError::unreachable(format!("failed to run docker CLI: {}", e))
        })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(classify_cli_error(reference, action, &stderr))
        }
    }

    /// Pulls an image, draining the progress stream.
    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        debug!(image = %image, status = %status, "Pull progress");
                    }
                }
                Err(e) => return Err(map_bollard(ResourceKind::Container, image, e)),
            }
        }
        Ok(())
    }

    async fn try_create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone().unwrap_or_else(|| "none".to_string())),
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            privileged: Some(spec.privileged),
            cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            env: Some(spec.env.clone()),
            labels: Some(to_hash_map(&spec.labels)),
            cmd: spec.command.clone(),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, &spec.name, e))?;
        Ok(response.id)
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn inspect_plugin(&self, reference: &str) -> Result<Option<PluginInfo>> {
        match self
            .plugin_command(reference, &["inspect", "--format", "{{.Enabled}}", reference])
            .await
        {
            Ok(enabled) => Ok(Some(PluginInfo {
                reference: reference.to_string(),
                enabled: enabled == "true",
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn install_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()> {
        let settings: Vec<String> = settings.iter().map(ToString::to_string).collect();
        let mut args = vec!["install", "--disable", "--grant-all-permissions", reference];
        args.extend(settings.iter().map(String::as_str));
        self.plugin_command(reference, &args).await?;
        info!(plugin = %reference, "Installed plugin");
        Ok(())
    }

    async fn upgrade_plugin(&self, reference: &str) -> Result<()> {
        match self
            .plugin_command(reference, &["upgrade", "--grant-all-permissions", reference])
            .await
        {
            Ok(_) => {
                info!(plugin = %reference, "Upgraded plugin");
                Ok(())
            }
            Err(OrchestratorError::EngineApi(reason)) if is_benign_upgrade_failure(&reason) => {
                debug!(plugin = %reference, reason = %reason, "Plugin upgrade skipped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn enable_plugin(&self, reference: &str) -> Result<()> {
        self.plugin_command(reference, &["enable", reference]).await?;
        info!(plugin = %reference, "Enabled plugin");
        Ok(())
    }

    async fn disable_plugin(&self, reference: &str) -> Result<()> {
        self.plugin_command(reference, &["disable", reference]).await?;
        info!(plugin = %reference, "Disabled plugin");
        Ok(())
    }

    async fn configure_plugin(&self, reference: &str, settings: &[PluginSetting]) -> Result<()> {
        let settings: Vec<String> = settings.iter().map(ToString::to_string).collect();
        let mut args = vec!["set", reference];
        args.extend(settings.iter().map(String::as_str));
        self.plugin_command(reference, &args).await?;
        debug!(plugin = %reference, settings = ?settings, "Configured plugin");
        Ok(())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<String> {
        let labels: HashMap<&str, &str> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let config = CreateNetworkOptions {
            name: spec.name.as_str(),
            driver: spec.driver.as_str(),
            ipam: Ipam {
                driver: Some(NULL_IPAM_DRIVER.to_string()),
                ..Default::default()
            },
            labels,
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(config)
            .await
            .map_err(|e| map_bollard(ResourceKind::Network, &spec.name, e))?;

        let id = response.id.unwrap_or_default();
        if id.is_empty() {
            return Err(OrchestratorError::engine_api(format!(
                "network {} created without an ID",
                spec.name
            )));
        }
        Ok(id)
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkInfo> {
        let network = self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| map_bollard(ResourceKind::Network, name, e))?;

        Ok(NetworkInfo {
            id: network.id.unwrap_or_default(),
            name: network.name.unwrap_or_else(|| name.to_string()),
            driver: network.driver.unwrap_or_default(),
            labels: to_labels(network.labels),
            containers: network
                .containers
                .map(|containers| containers.into_keys().collect())
                .unwrap_or_default(),
        })
    }

    async fn list_networks(&self, labels: &Labels) -> Result<Vec<NetworkInfo>> {
        let options = ListNetworksOptions {
            filters: label_filter_map(labels),
        };
        let networks = self
            .docker
            .list_networks(Some(options))
            .await
            .map_err(|e| map_bollard(ResourceKind::Network, "list", e))?;

        Ok(networks
            .into_iter()
            .map(|network| NetworkInfo {
                id: network.id.unwrap_or_default(),
                name: network.name.unwrap_or_default(),
                driver: network.driver.unwrap_or_default(),
                labels: to_labels(network.labels),
                containers: network
                    .containers
                    .map(|containers| containers.into_keys().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker
            .remove_network(name)
            .await
            .map_err(|e| map_bollard(ResourceKind::Network, name, e))?;
        info!(network = %name, "Removed network");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let id = match self.try_create_container(spec).await {
            // A missing image surfaces as a 404 on create.
            Err(e) if e.is_not_found() => {
                self.pull_image(&spec.image).await?;
                self.try_create_container(spec).await?
            }
            other => other?,
        };
        info!(container = %spec.name, id = %id, "Created container");
        Ok(id)
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerInfo> {
        let container = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, name, e))?;

        Ok(ContainerInfo {
            id: container.id.unwrap_or_default(),
            name: container
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| name.to_string()),
            running: container
                .state
                .and_then(|state| state.running)
                .unwrap_or(false),
            labels: to_labels(container.config.and_then(|config| config.labels)),
            networks: container
                .network_settings
                .and_then(|settings| settings.networks)
                .map(|networks| networks.into_keys().collect())
                .unwrap_or_default(),
        })
    }

    async fn list_containers(&self, labels: &Labels) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all: true,
            filters: label_filter_map(labels),
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, "list", e))?;

        Ok(containers
            .into_iter()
            .map(|container| ContainerInfo {
                id: container.id.unwrap_or_default(),
                name: container
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                running: container.state.as_deref() == Some("running"),
                labels: to_labels(container.labels),
                networks: container
                    .network_settings
                    .and_then(|settings| settings.networks)
                    .map(|networks| networks.into_keys().collect())
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, name, e))?;
        info!(container = %name, "Started container");
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_bollard(ResourceKind::Container, name, e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, name, e))?;
        info!(container = %name, "Removed container");
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        let options = ConnectNetworkOptions {
            container,
            endpoint_config: EndpointSettings::default(),
        };
        self.docker
            .connect_network(network, options)
            .await
            .map_err(|e| map_bollard(ResourceKind::Network, network, e))?;
        debug!(network = %network, container = %container, "Connected container to network");
        Ok(())
    }

    async fn engine_version(&self) -> Result<String> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| map_bollard(ResourceKind::Container, "version", e))?;
        match version.version {
            Some(version) => Ok(version),
            None => {
                warn!("Engine did not report a version");
                Ok("unknown".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_bollard_status_codes() {
        let err = |status_code| bollard::errors::Error::DockerResponseServerError {
            status_code,
            message: "msg".to_string(),
        };

        assert!(map_bollard(ResourceKind::Network, "n", err(404)).is_not_found());
        assert!(map_bollard(ResourceKind::Network, "n", err(409)).is_conflict());
        assert!(matches!(
            map_bollard(ResourceKind::Network, "n", err(500)),
            OrchestratorError::EngineApi(_)
        ));
        assert!(map_bollard(
            ResourceKind::Container,
            "c",
            bollard::errors::Error::RequestTimeoutError
        )
        .is_unreachable());
    }

    #[test]
    fn test_classify_cli_error() {
        let reference = "kathara/katharanp:amd64";
        assert!(classify_cli_error(
            reference,
            "inspect",
            "Error: No such plugin: kathara/katharanp:amd64"
        )
        .is_not_found());
        assert!(classify_cli_error(
            reference,
            "inspect",
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock."
        )
        .is_unreachable());
        assert!(matches!(
            classify_cli_error(reference, "enable", "permission denied"),
            OrchestratorError::EngineApi(ref m) if m.contains("enable")
        ));

        assert!(classify_cli_error(
            reference,
            "enable",
            "Error response from daemon: plugin \"kathara/katharanp:amd64\" not found"
        )
        .is_not_found());
    }

    #[test]
    fn test_registry_not_found_is_not_plugin_absence() {
        let reference = "kathara/katharanp:amd64";
        let err = classify_cli_error(
            reference,
            "inspect",
            "Error response from daemon: manifest for kathara/katharanp:amd64 not found: manifest unknown",
        );
        assert!(!err.is_not_found());
        assert!(matches!(err, OrchestratorError::EngineApi(_)));

        let err = classify_cli_error(reference, "inspect", "Error: image layer not found");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_benign_upgrade_failure() {
        assert!(is_benign_upgrade_failure(
            "Error response from daemon: plugin must be disabled before upgrading"
        ));
        assert!(!is_benign_upgrade_failure("denied: requested access to the resource is denied"));
    }
}
