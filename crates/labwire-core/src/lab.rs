//! Lab scenarios.
//!
//! A [`Lab`] is the unit of deployment: a named set of devices and the links
//! between them, plus options that tune how it is deployed. Devices and links
//! are created lazily through the lab's accessors, so a device name is unique
//! within a lab and a link only exists once an interface references it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::device::Device;
use crate::error::{validate_name, Result, TopologyError};
use crate::link::{DriverVariant, Link};

/// Value of a lab option.
pub type OptionValue = serde_json::Value;

/// A named emulation scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    name: String,
    devices: BTreeMap<String, Device>,
    links: BTreeMap<String, Link>,
    options: BTreeMap<String, OptionValue>,
}

impl Lab {
    /// Creates an empty lab.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: BTreeMap::new(),
            links: BTreeMap::new(),
            options: BTreeMap::new(),
        }
    }

    /// Returns the lab name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device with the given name, creating it if absent.
    pub fn get_or_new_device(&mut self, name: &str) -> &mut Device {
        self.devices
            .entry(name.to_string())
            .or_insert_with(|| Device::new(name))
    }

    /// Binds interface `index` of `device` to `link`, creating both lazily.
    pub fn connect(&mut self, device: &str, index: u32, link: &str) -> Result<()> {
        validate_name("device", device)?;
        validate_name("link", link)?;

        if let Some(existing) = self.get_or_new_device(device).bind_interface(index, link) {
            return Err(TopologyError::InterfaceConflict {
                device: device.to_string(),
                index,
                existing,
            });
        }

        self.links
            .entry(link.to_string())
            .or_insert_with(|| Link::new(link))
            .attach(device, index);
        Ok(())
    }

    /// Sets a lab option.
    pub fn set_option(&mut self, key: impl Into<String>, value: impl Into<OptionValue>) {
        self.options.insert(key.into(), value.into());
    }

    /// Returns a lab option.
    pub fn option(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }

    /// Returns a boolean lab option, if set to a boolean.
    pub fn bool_option(&self, key: &str) -> Option<bool> {
        self.option(key).and_then(OptionValue::as_bool)
    }

    /// Returns a device by name.
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    /// Returns an iterator over all devices, ordered by name.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Returns the number of devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns a link by name.
    pub fn link(&self, name: &str) -> Option<&Link> {
        self.links.get(name)
    }

    /// Returns a mutable link by name.
    pub fn link_mut(&mut self, name: &str) -> Option<&mut Link> {
        self.links.get_mut(name)
    }

    /// Returns an iterator over all links, ordered by name.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Returns the driver variant a link resolves to.
    pub fn link_variant(&self, link: &str, default: DriverVariant) -> DriverVariant {
        self.links
            .get(link)
            .map(|l| l.effective_variant(default))
            .unwrap_or(default)
    }

    /// Returns the driver variants a device needs: `default` plus whatever its links use.
    pub fn device_variants(&self, device: &Device, default: DriverVariant) -> BTreeSet<DriverVariant> {
        device
            .links()
            .into_iter()
            .map(|link| self.link_variant(link, default))
            .chain(std::iter::once(default))
            .collect()
    }

    /// Returns the driver variants the lab needs: `default` plus whatever its links use.
    pub fn variants(&self, default: DriverVariant) -> BTreeSet<DriverVariant> {
        self.links
            .values()
            .map(|l| l.effective_variant(default))
            .chain(std::iter::once(default))
            .collect()
    }
}
