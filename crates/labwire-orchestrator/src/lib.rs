//! Lab deployment onto a container engine.
//!
//! This crate turns a [`labwire_core::Lab`] into engine objects: one container
//! per device and one driver-backed network per link. Before any network is
//! created the Layer-2 driver plugin for every variant in use is reconciled
//! to the installed and enabled state.
//!
//! # Architecture
//!
//! - [`arch`]: host architecture to driver image tag
//! - [`engine`]: the engine client trait and its Docker implementation
//! - [`driver`]: driver plugin lifecycle and the xtables lock file
//! - [`naming`]: deterministic names and labels for engine objects
//! - [`container`]: device state tracking
//! - [`backend`]: the lab backend trait and the Docker backend
//! - [`manager`]: the facade callers construct from [`Settings`]
//!
//! # Example
//!
//! ```no_run
//! use labwire_core::Lab;
//! use labwire_orchestrator::{Manager, Settings};
//!
//! # async fn run() -> labwire_orchestrator::Result<()> {
//! let manager = Manager::from_settings(Settings::default()).await?;
//!
//! let mut lab = Lab::new("triangle");
//! lab.connect("r1", 0, "A")?;
//! lab.connect("r2", 0, "A")?;
//!
//! manager.deploy_lab(&lab).await?;
//! manager.undeploy_lab(&lab).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod arch;
pub mod backend;
pub mod container;
pub mod driver;
pub mod engine;
pub mod error;
pub mod manager;
pub mod naming;
pub mod settings;

#[cfg(test)]
#[allow(missing_docs)]
pub(crate) mod testing;

// Re-export commonly used types at the crate root
pub use arch::{resolve_architecture, Architecture};
pub use backend::{BoxedBackend, DockerBackend, LabBackend};
pub use container::{DeviceRegistry, DeviceState};
pub use driver::{DriverLifecycleManager, LockFile, XtablesLock};
pub use engine::{DockerEngine, EngineClient};
pub use error::{DeviceFailure, DriverError, OrchestratorError, ResourceKind, Result};
pub use manager::Manager;
pub use naming::ResourceNamer;
pub use settings::Settings;
