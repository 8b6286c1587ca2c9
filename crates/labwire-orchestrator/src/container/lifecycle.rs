//! Device lifecycle tracking.
//!
//! The registry tracks the deployment state of each device container known to
//! this process and rejects transitions that would let two operations work on
//! the same device at once.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Deployment state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceState {
    /// No container is known to exist.
    Undeployed,

    /// Networks and container are being created.
    Deploying,

    /// The container is running.
    Running,

    /// The container is being stopped and removed.
    Undeploying,
}

impl DeviceState {
    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (self, next),
            (Undeployed, Deploying)
                | (Deploying, Running)
                | (Deploying, Undeployed)
                | (Running, Undeploying)
                | (Undeployed, Undeploying)
                | (Undeploying, Undeployed)
        )
    }

    /// Returns true while an operation holds the device.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Deploying | Self::Undeploying)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undeployed => write!(f, "undeployed"),
            Self::Deploying => write!(f, "deploying"),
            Self::Running => write!(f, "running"),
            Self::Undeploying => write!(f, "undeploying"),
        }
    }
}

/// In-process registry of device states, keyed by container name.
pub struct DeviceRegistry {
    states: Arc<RwLock<HashMap<String, DeviceState>>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the state of a device; unknown devices are undeployed.
    pub async fn state(&self, device: &str) -> DeviceState {
        let states = self.states.read().await;
        states
            .get(device)
            .copied()
            .unwrap_or(DeviceState::Undeployed)
    }

    /// Moves a device to `next`, returning the previous state.
    pub async fn transition(&self, device: &str, next: DeviceState) -> Result<DeviceState> {
        let mut states = self.states.write().await;
        let current = states
            .get(device)
            .copied()
            .unwrap_or(DeviceState::Undeployed);

        if !current.can_transition_to(next) {
            return Err(OrchestratorError::invalid_state_transition(
                device,
                current.to_string(),
                next.to_string(),
            ));
        }

        if next == DeviceState::Undeployed {
            states.remove(device);
        } else {
            states.insert(device.to_string(), next);
        }
        drop(states);

        debug!(device = %device, from = %current, to = %next, "Device state changed");
        Ok(current)
    }

    /// Forgets a device whose recorded state no longer matches the engine.
    pub async fn forget(&self, device: &str) -> Option<DeviceState> {
        let mut states = self.states.write().await;
        states.remove(device)
    }

    /// Returns the devices currently tracked and their states.
    pub async fn all(&self) -> HashMap<String, DeviceState> {
        self.states.read().await.clone()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use DeviceState::*;
        assert!(Undeployed.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Running));
        assert!(Running.can_transition_to(Undeploying));
        assert!(Undeploying.can_transition_to(Undeployed));

        assert!(!Running.can_transition_to(Deploying));
        assert!(!Deploying.can_transition_to(Deploying));
        assert!(!Undeploying.can_transition_to(Deploying));
        assert!(!Deploying.can_transition_to(Undeploying));
    }

    #[tokio::test]
    async fn test_full_cycle() {
        let registry = DeviceRegistry::new();
        assert_eq!(registry.state("r1").await, DeviceState::Undeployed);

        registry.transition("r1", DeviceState::Deploying).await.unwrap();
        registry.transition("r1", DeviceState::Running).await.unwrap();
        assert_eq!(registry.state("r1").await, DeviceState::Running);

        registry.transition("r1", DeviceState::Undeploying).await.unwrap();
        let previous = registry.transition("r1", DeviceState::Undeployed).await.unwrap();
        assert_eq!(previous, DeviceState::Undeploying);
        assert!(registry.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_running_to_deploying_rejected() {
        let registry = DeviceRegistry::new();
        registry.transition("r1", DeviceState::Deploying).await.unwrap();
        registry.transition("r1", DeviceState::Running).await.unwrap();

        let err = registry
            .transition("r1", DeviceState::Deploying)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::InvalidStateTransition { ref from, ref to, .. }
                if from == "running" && to == "deploying"
        ));
        assert_eq!(registry.state("r1").await, DeviceState::Running);
    }

    #[tokio::test]
    async fn test_concurrent_operations_rejected() {
        let registry = DeviceRegistry::new();
        registry.transition("r1", DeviceState::Deploying).await.unwrap();
        assert!(registry.state("r1").await.is_busy());
        assert!(registry
            .transition("r1", DeviceState::Undeploying)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_forget() {
        let registry = DeviceRegistry::new();
        registry.transition("r1", DeviceState::Deploying).await.unwrap();
        registry.transition("r1", DeviceState::Running).await.unwrap();
        assert_eq!(registry.forget("r1").await, Some(DeviceState::Running));
        assert_eq!(registry.state("r1").await, DeviceState::Undeployed);
    }
}
