//! Device container lifecycle.

mod lifecycle;

pub use lifecycle::{DeviceRegistry, DeviceState};
