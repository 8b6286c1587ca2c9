//! Lab backend trait definition.

use async_trait::async_trait;
use labwire_core::Lab;

use crate::error::Result;

/// Core trait for lab deployment backends.
///
/// A backend realizes the devices and links of a [`Lab`] on a container
/// runtime. Every operation is idempotent: deploying what already runs and
/// undeploying what is already gone both succeed.
///
/// # Failure semantics
///
/// Partial failures are never rolled back. Resources created before an error
/// stay in place and are reused by the next deployment or swept by
/// [`undeploy_lab`](LabBackend::undeploy_lab).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; lab operations drive device
/// deployments concurrently through a shared reference.
#[async_trait]
pub trait LabBackend: Send + Sync {
    /// Deploys a single device of `lab` together with the networks of its links.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownDevice`](crate::OrchestratorError::UnknownDevice) if
    /// the lab has no such device, a driver error if the network driver cannot
    /// be made ready, or [`DeviceFailed`](crate::OrchestratorError::DeviceFailed)
    /// wrapping the engine error.
    async fn deploy_machine(&self, lab: &Lab, device: &str) -> Result<()>;

    /// Stops and removes the container of a device. Link networks are kept.
    async fn undeploy_machine(&self, lab: &Lab, device: &str) -> Result<()>;

    /// Deploys every device of a lab.
    ///
    /// Every device is attempted; failures are reported together as
    /// [`LabDeploymentFailed`](crate::OrchestratorError::LabDeploymentFailed).
    async fn deploy_lab(&self, lab: &Lab) -> Result<()>;

    /// Removes every container and unused network labeled for the lab.
    async fn undeploy_lab(&self, lab: &Lab) -> Result<()>;

    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Returns the release version of the underlying runtime.
    async fn release_version(&self) -> Result<String>;
}

/// A boxed lab backend for dynamic dispatch.
pub type BoxedBackend = Box<dyn LabBackend>;
