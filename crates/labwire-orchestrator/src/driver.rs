//! Network driver plugin lifecycle.
//!
//! Before any link network is created, the driver plugin for each variant in
//! use must be installed and enabled on the engine. [`DriverLifecycleManager`]
//! reconciles the observed plugin state towards that goal on every call; the
//! state is never cached because another client may change it at any time.
//!
//! Remote engines are inspected only. Locally the plugin is installed when
//! absent and upgraded when present. The bridged variant additionally needs
//! the host xtables lock file mounted into the plugin, which can only be
//! changed while the plugin is disabled.

use async_trait::async_trait;
use labwire_core::DriverVariant;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::arch::{resolve_architecture, Architecture};
use crate::engine::{EngineClient, PluginSetting};
use crate::error::{DriverError, OrchestratorError, Result};

/// Plugin setting that points the driver at the host xtables lock.
pub const XTABLES_LOCK_SETTING: &str = "xtables_lock.source";

/// Host file shared with the bridged driver to serialize iptables access.
#[async_trait]
pub trait LockFile: Send + Sync {
    /// Host path of the lock file.
    fn path(&self) -> &Path;

    /// Creates the lock file if it does not exist.
    async fn ensure(&self) -> std::io::Result<()>;
}

/// The xtables lock on the local filesystem.
#[derive(Debug, Clone)]
pub struct XtablesLock {
    path: PathBuf,
}

impl XtablesLock {
    /// Creates a lock file handle.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LockFile for XtablesLock {
    fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure(&self) -> std::io::Result<()> {
        // Append mode never truncates a lock held by iptables.
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }
}

/// Reconciles the driver plugin of each variant towards installed and enabled.
pub struct DriverLifecycleManager {
    engine: Arc<dyn EngineClient>,
    lock: Arc<dyn LockFile>,
    plugin_base: String,
    architecture: Option<Architecture>,
}

impl DriverLifecycleManager {
    /// Creates a manager for the driver named `plugin_base` (`org/name`, no variant suffix).
    pub fn new(
        engine: Arc<dyn EngineClient>,
        lock: Arc<dyn LockFile>,
        plugin_base: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            lock,
            plugin_base: plugin_base.into(),
            architecture: None,
        }
    }

    /// Pins the architecture instead of resolving it from the host.
    pub fn with_architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    fn architecture(&self) -> Result<Architecture> {
        match self.architecture {
            Some(architecture) => Ok(architecture),
            None => resolve_architecture(),
        }
    }

    /// Returns the plugin reference for a variant: `<org>/<name>[_vde]:<arch>`.
    pub fn plugin_reference(&self, variant: DriverVariant) -> Result<String> {
        Ok(format!(
            "{}{}:{}",
            self.plugin_base,
            variant.name_suffix(),
            self.architecture()?
        ))
    }

    /// Brings the plugin for `variant` to the enabled state.
    ///
    /// On a remote engine nothing is mutated: a missing or disabled plugin is
    /// reported as [`DriverError::NotFoundRemote`] or
    /// [`DriverError::NotEnabledRemote`].
    pub async fn ensure_driver_ready(&self, variant: DriverVariant, is_remote: bool) -> Result<()> {
        let reference = self.plugin_reference(variant)?;
        let plugin = self.engine.inspect_plugin(&reference).await?;

        debug!(
            plugin = %reference,
            %variant,
            remote = is_remote,
            installed = plugin.is_some(),
            enabled = plugin.as_ref().is_some_and(|p| p.enabled),
            "Reconciling network driver"
        );

        match (plugin, is_remote) {
            (None, true) => Err(DriverError::NotFoundRemote { plugin: reference }.into()),
            (Some(plugin), true) if !plugin.enabled => {
                Err(DriverError::NotEnabledRemote { plugin: reference }.into())
            }
            (Some(_), true) => Ok(()),
            (None, false) => self.install(&reference, variant).await,
            (Some(plugin), false) => self.upgrade(&reference, variant, plugin.enabled).await,
        }
    }

    async fn install(&self, reference: &str, variant: DriverVariant) -> Result<()> {
        info!(plugin = %reference, "Installing network driver");

        let settings = if variant.requires_firewall_lock() {
            self.ensure_lock(reference).await?;
            vec![self.lock_setting()]
        } else {
            Vec::new()
        };

        self.engine
            .install_plugin(reference, &settings)
            .await
            .map_err(step_failed(reference, "install"))?;
        self.engine
            .enable_plugin(reference)
            .await
            .map_err(step_failed(reference, "enable"))?;

        info!(plugin = %reference, "Network driver installed and enabled");
        Ok(())
    }

    async fn upgrade(&self, reference: &str, variant: DriverVariant, enabled: bool) -> Result<()> {
        self.engine
            .upgrade_plugin(reference)
            .await
            .map_err(step_failed(reference, "upgrade"))?;

        if variant.requires_firewall_lock() {
            self.ensure_lock(reference).await?;
            if enabled {
                self.engine
                    .disable_plugin(reference)
                    .await
                    .map_err(step_failed(reference, "disable"))?;
            }
            self.engine
                .configure_plugin(reference, &[self.lock_setting()])
                .await
                .map_err(|e| mount_failed(reference, e))?;
            self.engine
                .enable_plugin(reference)
                .await
                .map_err(step_failed(reference, "enable"))?;
        } else if !enabled {
            self.engine
                .enable_plugin(reference)
                .await
                .map_err(step_failed(reference, "enable"))?;
        }

        info!(plugin = %reference, "Network driver ready");
        Ok(())
    }

    async fn ensure_lock(&self, reference: &str) -> Result<()> {
        self.lock.ensure().await.map_err(|e| {
            OrchestratorError::from(DriverError::MountConfigurationFailed {
                plugin: reference.to_string(),
                reason: format!("{}: {}", self.lock.path().display(), e),
            })
        })
    }

    fn lock_setting(&self) -> PluginSetting {
        PluginSetting::new(XTABLES_LOCK_SETTING, self.lock.path().display().to_string())
    }
}

/// Wraps a failed lifecycle step; connectivity loss passes through unchanged.
fn step_failed<'a>(
    reference: &'a str,
    step: &'static str,
) -> impl FnOnce(OrchestratorError) -> OrchestratorError + 'a {
    move |err| {
        if err.is_unreachable() {
            err
        } else {
            DriverError::InstallFailed {
                plugin: reference.to_string(),
                step,
                reason: err.to_string(),
            }
            .into()
        }
    }
}

fn mount_failed(reference: &str, err: OrchestratorError) -> OrchestratorError {
    if err.is_unreachable() {
        err
    } else {
        DriverError::MountConfigurationFailed {
            plugin: reference.to_string(),
            reason: err.to_string(),
        }
        .into()
    }
}
