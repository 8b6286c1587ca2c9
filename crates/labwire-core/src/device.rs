//! Virtual network devices.
//!
//! A device is realized as one container. Its interfaces are kept ordered by
//! index because attachment order decides which network becomes the
//! container's primary interface.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A virtual network node within a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    name: String,
    interfaces: BTreeMap<u32, String>,

    /// Runtime options used when creating the container.
    pub options: DeviceOptions,
}

impl Device {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interfaces: BTreeMap::new(),
            options: DeviceOptions::default(),
        }
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the link bound to an interface index.
    pub fn interface(&self, index: u32) -> Option<&str> {
        self.interfaces.get(&index).map(String::as_str)
    }

    /// Returns `(index, link)` pairs in interface order.
    pub fn interfaces(&self) -> impl Iterator<Item = (u32, &str)> {
        self.interfaces
            .iter()
            .map(|(index, link)| (*index, link.as_str()))
    }

    /// Returns the distinct links this device references, in interface order.
    pub fn links(&self) -> Vec<&str> {
        let mut links: Vec<&str> = Vec::with_capacity(self.interfaces.len());
        for link in self.interfaces.values() {
            if !links.contains(&link.as_str()) {
                links.push(link.as_str());
            }
        }
        links
    }

    /// Returns the number of interfaces.
    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    /// Binds an interface, returning the conflicting link if the index is taken.
    pub(crate) fn bind_interface(&mut self, index: u32, link: &str) -> Option<String> {
        if let Some(existing) = self.interfaces.get(&index) {
            return (existing != link).then(|| existing.clone());
        }
        self.interfaces.insert(index, link.to_string());
        None
    }
}

/// Container options for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// Image reference; the configured default image is used when unset.
    pub image: Option<String>,

    /// Run the container privileged.
    pub privileged: bool,

    /// Extra bind mounts.
    pub mounts: Vec<BindMount>,

    /// Environment variables.
    pub env: BTreeMap<String, String>,

    /// Command override.
    pub command: Option<Vec<String>>,

    /// Additional labels applied to the container.
    pub labels: BTreeMap<String, String>,
}

impl DeviceOptions {
    /// Sets the image.
    pub fn image(&mut self, image: impl Into<String>) -> &mut Self {
        self.image = Some(image.into());
        self
    }

    /// Adds a bind mount.
    pub fn mount(&mut self, mount: BindMount) -> &mut Self {
        self.mounts.push(mount);
        self
    }

    /// Adds an environment variable.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Host path mounted into a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Path on the engine host.
    pub source: String,

    /// Path inside the container.
    pub target: String,

    /// Whether the mount is read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Creates a read-write bind mount.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Marks the mount read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Returns the Docker bind string (`src:dst[:ro]`).
    pub fn as_bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interfaces_are_ordered_by_index() {
        let mut device = Device::new("r1");
        device.bind_interface(2, "C");
        device.bind_interface(0, "A");
        device.bind_interface(1, "B");

        let order: Vec<_> = device.interfaces().collect();
        assert_eq!(order, vec![(0, "A"), (1, "B"), (2, "C")]);
    }

    #[test]
    fn test_bind_interface_conflict() {
        let mut device = Device::new("r1");
        assert_eq!(device.bind_interface(0, "A"), None);
        assert_eq!(device.bind_interface(0, "A"), None);
        assert_eq!(device.bind_interface(0, "B"), Some("A".to_string()));
        assert_eq!(device.interface(0), Some("A"));
    }

    #[test]
    fn test_links_deduplicated() {
        let mut device = Device::new("r1");
        device.bind_interface(0, "A");
        device.bind_interface(1, "B");
        device.bind_interface(2, "A");
        assert_eq!(device.links(), vec!["A", "B"]);
    }

    #[test]
    fn test_bind_mount_string() {
        assert_eq!(BindMount::new("/home/u", "/hosthome").as_bind(), "/home/u:/hosthome");
        assert_eq!(
            BindMount::new("/etc/x", "/x").read_only().as_bind(),
            "/etc/x:/x:ro"
        );
    }
}
