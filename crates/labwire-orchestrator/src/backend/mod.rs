//! Lab backend implementations.
//!
//! This module provides the trait lab backends implement and the Docker
//! backend, currently the only one.

mod docker;
mod r#trait;

pub use docker::{DockerBackend, HOSTHOME_MOUNT_OPTION};
pub use r#trait::{BoxedBackend, LabBackend};
