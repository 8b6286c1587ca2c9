//! Manager facade.
//!
//! A [`Manager`] is built once from [`Settings`] and handed to whoever needs
//! to deploy labs. It owns the selected backend; there is no process-wide
//! instance.

use labwire_core::Lab;
use tracing::info;

use crate::backend::{BoxedBackend, DockerBackend};
use crate::error::{OrchestratorError, Result};
use crate::naming::APP_NAME;
use crate::settings::Settings;

/// Entry point for lab deployment.
pub struct Manager {
    backend: BoxedBackend,
    settings: Settings,
}

impl Manager {
    /// Validates the settings and connects the backend they select.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;

        let backend: BoxedBackend = match settings.manager_type.trim().to_ascii_lowercase().as_str() {
            "docker" => Box::new(DockerBackend::connect(&settings).await?),
            other => {
                return Err(OrchestratorError::configuration(format!(
                    "unknown manager type: {}",
                    other
                )))
            }
        };

        info!(
            manager = %backend.name(),
            remote = settings.is_remote(),
            plugin = %settings.network_plugin,
            "Manager initialized"
        );
        Ok(Self::with_backend(backend, settings))
    }

    /// Wraps an already constructed backend.
    pub fn with_backend(backend: BoxedBackend, settings: Settings) -> Self {
        Self { backend, settings }
    }

    /// Returns the settings the manager was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Deploys one device of a lab.
    pub async fn deploy_machine(&self, lab: &Lab, device: &str) -> Result<()> {
        self.backend.deploy_machine(lab, device).await
    }

    /// Undeploys one device of a lab.
    pub async fn undeploy_machine(&self, lab: &Lab, device: &str) -> Result<()> {
        self.backend.undeploy_machine(lab, device).await
    }

    /// Deploys a whole lab.
    pub async fn deploy_lab(&self, lab: &Lab) -> Result<()> {
        self.backend.deploy_lab(lab).await
    }

    /// Undeploys a whole lab.
    pub async fn undeploy_lab(&self, lab: &Lab) -> Result<()> {
        self.backend.undeploy_lab(lab).await
    }

    /// Returns the backend name for display, e.g. `Docker (labwire)`.
    pub fn get_formatted_manager_name(&self) -> String {
        format!("{} ({})", self.backend.name(), APP_NAME)
    }

    /// Returns the release version of the backend's runtime.
    pub async fn get_release_version(&self) -> Result<String> {
        self.backend.release_version().await
    }
}
