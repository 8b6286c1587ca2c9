//! Error types for topology construction.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors raised while building a lab topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// A device, link or lab name is empty or contains unusable characters.
    #[error("invalid {kind} name: {name:?}")]
    InvalidName {
        /// What was being named (device, link, lab).
        kind: &'static str,
        /// The rejected name.
        name: String,
    },

    /// An interface index is already bound to another link.
    #[error("interface eth{index} of device {device} is already connected to link {existing}")]
    InterfaceConflict {
        /// The device owning the interface.
        device: String,
        /// The interface index.
        index: u32,
        /// The link the interface is already bound to.
        existing: String,
    },
}

impl TopologyError {
    /// Creates an invalid name error.
    pub fn invalid_name(kind: &'static str, name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind,
            name: name.into(),
        }
    }
}

/// Checks that a name can be used to derive engine resource identifiers.
pub(crate) fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    let usable = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if usable {
        Ok(())
    } else {
        Err(TopologyError::invalid_name(kind, name))
    }
}
