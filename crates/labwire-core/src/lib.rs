//! Core topology types for labwire.
//!
//! This crate provides the runtime-independent model of an emulated network:
//! a [`Lab`] owns a set of [`Device`]s, and every device interface is bound to
//! a [`Link`] (a collision domain). Nothing in here talks to a container
//! engine; the orchestrator crate turns these types into engine resources.
//!
//! # Modules
//!
//! - [`lab`]: the lab scenario, its options and the device/link accessors
//! - [`device`]: virtual network nodes and their runtime options
//! - [`link`]: collision domains and the network driver variant they use
//! - [`error`]: topology validation errors
//!
//! # Example
//!
//! ```
//! use labwire_core::Lab;
//!
//! let mut lab = Lab::new("triangle");
//! lab.connect("r1", 0, "A").unwrap();
//! lab.connect("r2", 0, "A").unwrap();
//! lab.set_option("hosthome_mount", false);
//!
//! assert_eq!(lab.device_count(), 2);
//! assert_eq!(lab.link("A").unwrap().endpoints().len(), 2);
//! ```

#![warn(missing_docs)]

pub mod device;
pub mod error;
pub mod lab;
pub mod link;

pub use device::{BindMount, Device, DeviceOptions};
pub use error::{Result, TopologyError};
pub use lab::{Lab, OptionValue};
pub use link::{DriverVariant, Endpoint, Link};
