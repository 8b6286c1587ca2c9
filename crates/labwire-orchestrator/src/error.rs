//! Error types for the orchestrator crate.
//!
//! Engine failures are classified so callers can tell "already exists" and
//! "not found" (both routine on a shared engine) apart from driver problems
//! and connectivity loss.

use labwire_core::TopologyError;
use std::fmt;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Kind of engine object an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A network driver plugin.
    Plugin,
    /// A virtual network.
    Network,
    /// A container.
    Container,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::Network => write!(f, "network"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Reasons the network driver could not be brought to the enabled state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The plugin is absent and the engine is remote.
    #[error("network plugin {plugin} not found on remote connection")]
    NotFoundRemote {
        /// Plugin reference.
        plugin: String,
    },

    /// The plugin is installed but disabled and the engine is remote.
    #[error("network plugin {plugin} not enabled on remote connection")]
    NotEnabledRemote {
        /// Plugin reference.
        plugin: String,
    },

    /// Installing, upgrading, enabling or disabling the plugin failed.
    #[error("failed to {step} network plugin {plugin}: {reason}")]
    InstallFailed {
        /// Plugin reference.
        plugin: String,
        /// The lifecycle step that failed.
        step: &'static str,
        /// Engine-reported reason.
        reason: String,
    },

    /// Preparing or applying the xtables lock mount failed.
    #[error("failed to configure lock mount for network plugin {plugin}: {reason}")]
    MountConfigurationFailed {
        /// Plugin reference.
        plugin: String,
        /// Underlying reason.
        reason: String,
    },
}

/// Per-device failure collected during a lab operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFailure {
    /// Device name.
    pub device: String,
    /// Failure description.
    pub reason: String,
}

impl fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device, self.reason)
    }
}

fn join_failures(failures: &[DeviceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The network driver could not be made ready.
    #[error("network driver unavailable: {0}")]
    DriverUnavailable(#[from] DriverError),

    /// The host architecture has no driver build.
    #[error("unsupported host architecture: {0}")]
    ArchitectureUnsupported(String),

    /// The engine has no such object.
    #[error("{kind} not found: {name}")]
    ResourceNotFound {
        /// Object kind.
        kind: ResourceKind,
        /// Object name or reference.
        name: String,
    },

    /// The engine already has an object with this name.
    #[error("{kind} already exists: {name}")]
    ResourceConflict {
        /// Object kind.
        kind: ResourceKind,
        /// Object name or reference.
        name: String,
    },

    /// An object with the expected name belongs to another lab or user.
    #[error("{kind} {name} is not owned by lab {lab}")]
    ForeignResource {
        /// Object kind.
        kind: ResourceKind,
        /// Object name.
        name: String,
        /// Lab that expected to own it.
        lab: String,
    },

    /// The engine could not be reached.
    #[error("engine unreachable: {0}")]
    EngineUnreachable(String),

    /// The engine rejected a request.
    #[error("engine API error: {0}")]
    EngineApi(String),

    /// The topology is invalid for the requested operation.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// The lab has no device with this name.
    #[error("unknown device {device} in lab {lab}")]
    UnknownDevice {
        /// Lab name.
        lab: String,
        /// Requested device name.
        device: String,
    },

    /// Deploying or undeploying a single device failed.
    #[error("device {device} failed: {source}")]
    DeviceFailed {
        /// Device name.
        device: String,
        /// Underlying error.
        #[source]
        source: Box<OrchestratorError>,
    },

    /// One or more devices of a lab could not be deployed.
    #[error("deployment of lab {lab} failed: {}", join_failures(.failures))]
    LabDeploymentFailed {
        /// Lab name.
        lab: String,
        /// Failed devices.
        failures: Vec<DeviceFailure>,
    },

    /// Some resources could not be removed.
    #[error("undeploy of lab {lab} incomplete: {}", .errors.join("; "))]
    UndeployFailed {
        /// Lab name.
        lab: String,
        /// Removal errors.
        errors: Vec<String>,
    },

    /// A caller deadline expired.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// A device was asked to move to a state it cannot reach from its current one.
    #[error("invalid state transition for device {device}: {from} -> {to}")]
    InvalidStateTransition {
        /// Device resource name.
        device: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Creates a not found error.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind,
            name: name.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::ResourceConflict {
            kind,
            name: name.into(),
        }
    }

    /// Creates a foreign resource error.
    pub fn foreign(kind: ResourceKind, name: impl Into<String>, lab: impl Into<String>) -> Self {
        Self::ForeignResource {
            kind,
            name: name.into(),
            lab: lab.into(),
        }
    }

    /// Creates an engine unreachable error.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::EngineUnreachable(reason.into())
    }

    /// Creates an engine API error.
    pub fn engine_api(reason: impl Into<String>) -> Self {
        Self::EngineApi(reason.into())
    }

    /// Wraps an error with the device it happened on.
    pub fn device_failed(device: impl Into<String>, source: OrchestratorError) -> Self {
        Self::DeviceFailed {
            device: device.into(),
            source: Box::new(source),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state_transition(
        device: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            device: device.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Returns true if the engine reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }

    /// Returns true if the engine reported a name collision.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ResourceConflict { .. })
    }

    /// Returns true if the engine could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::EngineUnreachable(_))
    }

    /// Returns the driver error, looking through device wrappers.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::DriverUnavailable(err) => Some(err),
            Self::DeviceFailed { source, .. } => source.driver_error(),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for OrchestratorError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::NotFoundRemote {
            plugin: "kathara/katharanp:amd64".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "network plugin kathara/katharanp:amd64 not found on remote connection"
        );

        let err = OrchestratorError::from(DriverError::NotEnabledRemote {
            plugin: "kathara/katharanp_vde:arm64".to_string(),
        });
        assert!(err.to_string().contains("not enabled on remote connection"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(OrchestratorError::not_found(ResourceKind::Network, "n").is_not_found());
        assert!(OrchestratorError::conflict(ResourceKind::Network, "n").is_conflict());
        assert!(OrchestratorError::unreachable("refused").is_unreachable());
        assert!(!OrchestratorError::configuration("x").is_not_found());
    }

    #[test]
    fn test_driver_error_through_device_wrapper() {
        let err = OrchestratorError::device_failed(
            "r1",
            DriverError::NotEnabledRemote {
                plugin: "p".to_string(),
            }
            .into(),
        );
        assert!(matches!(
            err.driver_error(),
            Some(DriverError::NotEnabledRemote { .. })
        ));
        assert_eq!(
            err.to_string(),
            "device r1 failed: network driver unavailable: network plugin p not enabled on remote connection"
        );
    }

    #[test]
    fn test_lab_failure_display() {
        let err = OrchestratorError::LabDeploymentFailed {
            lab: "l".to_string(),
            failures: vec![
                DeviceFailure {
                    device: "a".to_string(),
                    reason: "boom".to_string(),
                },
                DeviceFailure {
                    device: "b".to_string(),
                    reason: "bang".to_string(),
                },
            ],
        };
        assert_eq!(err.to_string(), "deployment of lab l failed: a: boom; b: bang");
    }
}
