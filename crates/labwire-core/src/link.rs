//! Collision domains.
//!
//! A link is a broadcast domain joining one or more device interfaces. At
//! deployment time each link becomes exactly one driver-backed network.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Implementation of the Layer-2 network driver backing a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverVariant {
    /// Kernel bridges; the driver manipulates host iptables and needs the
    /// host xtables lock mounted into its runtime.
    Bridged,

    /// Userspace switching through VDE; no kernel firewall interaction.
    Userspace,
}

impl DriverVariant {
    /// Suffix appended to the driver base name for this variant.
    pub const fn name_suffix(self) -> &'static str {
        match self {
            Self::Bridged => "",
            Self::Userspace => "_vde",
        }
    }

    /// Whether the variant needs the host firewall lock file mounted.
    pub const fn requires_firewall_lock(self) -> bool {
        matches!(self, Self::Bridged)
    }

    /// Splits a configured plugin name into its base name and variant.
    ///
    /// ```
    /// use labwire_core::DriverVariant;
    ///
    /// assert_eq!(
    ///     DriverVariant::from_plugin_name("kathara/katharanp_vde"),
    ///     ("kathara/katharanp", DriverVariant::Userspace)
    /// );
    /// assert_eq!(
    ///     DriverVariant::from_plugin_name("kathara/katharanp"),
    ///     ("kathara/katharanp", DriverVariant::Bridged)
    /// );
    /// ```
    pub fn from_plugin_name(name: &str) -> (&str, Self) {
        match name.strip_suffix(Self::Userspace.name_suffix()) {
            Some(base) => (base, Self::Userspace),
            None => (name, Self::Bridged),
        }
    }
}

impl Default for DriverVariant {
    fn default() -> Self {
        Self::Bridged
    }
}

impl fmt::Display for DriverVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridged => write!(f, "bridged"),
            Self::Userspace => write!(f, "userspace"),
        }
    }
}

/// A device interface attached to a link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    /// Name of the device.
    pub device: String,

    /// Interface index on the device.
    pub interface: u32,
}

/// A collision domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    name: String,
    variant: Option<DriverVariant>,
    endpoints: Vec<Endpoint>,
}

impl Link {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: None,
            endpoints: Vec::new(),
        }
    }

    /// Returns the link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the driver variant override, if any.
    pub fn variant(&self) -> Option<DriverVariant> {
        self.variant
    }

    /// Returns the variant to use given the configured default.
    pub fn effective_variant(&self, default: DriverVariant) -> DriverVariant {
        self.variant.unwrap_or(default)
    }

    /// Forces this link onto a specific driver variant.
    pub fn set_variant(&mut self, variant: DriverVariant) {
        self.variant = Some(variant);
    }

    /// Returns the interfaces attached to this link.
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub(crate) fn attach(&mut self, device: &str, interface: u32) {
        let endpoint = Endpoint {
            device: device.to_string(),
            interface,
        };
        if !self.endpoints.contains(&endpoint) {
            self.endpoints.push(endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_suffix() {
        assert_eq!(DriverVariant::Bridged.name_suffix(), "");
        assert_eq!(DriverVariant::Userspace.name_suffix(), "_vde");
        assert!(DriverVariant::Bridged.requires_firewall_lock());
        assert!(!DriverVariant::Userspace.requires_firewall_lock());
    }

    #[test]
    fn test_link_attach_is_idempotent() {
        let mut link = Link::new("A");
        link.attach("r1", 0);
        link.attach("r1", 0);
        link.attach("r2", 1);
        assert_eq!(link.endpoints().len(), 2);
    }

    #[test]
    fn test_effective_variant() {
        let mut link = Link::new("A");
        assert_eq!(
            link.effective_variant(DriverVariant::Bridged),
            DriverVariant::Bridged
        );
        link.set_variant(DriverVariant::Userspace);
        assert_eq!(
            link.effective_variant(DriverVariant::Bridged),
            DriverVariant::Userspace
        );
    }
}
