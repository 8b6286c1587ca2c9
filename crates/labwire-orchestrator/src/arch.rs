//! Host architecture resolution for driver image selection.

use std::fmt;

use crate::error::{OrchestratorError, Result};

/// CPU architecture tag of a driver plugin image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// 64-bit x86.
    Amd64,
    /// 64-bit ARM.
    Arm64,
}

impl Architecture {
    /// Maps a machine string (as reported by `uname -m` or the Rust target) to a tag.
    pub fn from_machine(machine: &str) -> Result<Self> {
        match machine.to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "aarch64" | "arm64" => Ok(Self::Arm64),
            _ => Err(OrchestratorError::ArchitectureUnsupported(machine.to_string())),
        }
    }

    /// Returns the image tag.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves the architecture of the executing host.
pub fn resolve_architecture() -> Result<Architecture> {
    Architecture::from_machine(std::env::consts::ARCH)
}
