//! Deterministic resource names and labels.
//!
//! Containers and networks are found again by name and label alone, so a
//! second deployment of the same lab by the same user resolves to the same
//! engine objects and undeploy can sweep everything one lab/user pair owns.
//!
//! Names read as `labwire_[user_]<object>_<digest>`. The readable part is
//! lossy (sanitized, `_`-joined), so the digest covers the raw user, lab and
//! object names and keeps names of different labs apart.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Prefix of every engine object name.
pub const APP_NAME: &str = "labwire";

/// Marks an object as managed by this crate.
pub const LABEL_APP: &str = "labwire.app";
/// Lab the object belongs to.
pub const LABEL_LAB: &str = "labwire.lab";
/// User that deployed the object.
pub const LABEL_USER: &str = "labwire.user";
/// Device a container realizes.
pub const LABEL_DEVICE: &str = "labwire.device";
/// Link a network realizes.
pub const LABEL_LINK: &str = "labwire.link";

/// Hex digits of the scope digest kept in object names.
const SCOPE_DIGEST_LEN: usize = 12;

/// Label set attached to engine objects.
pub type Labels = BTreeMap<String, String>;

/// Derives names and labels for one deploying user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNamer {
    user: String,
    multiuser: bool,
}

impl ResourceNamer {
    /// Creates a namer for an explicit user.
    pub fn new(user: impl AsRef<str>, multiuser: bool) -> Self {
        Self {
            user: sanitize(user.as_ref()),
            multiuser,
        }
    }

    /// Creates a namer for the user running this process.
    pub fn from_env(multiuser: bool) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        Self::new(user, multiuser)
    }

    /// Returns the sanitized user name.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Digest of the (user, lab, object) scope, each part length-prefixed.
    fn scope_digest(&self, lab: &str, object: &str) -> String {
        let user = if self.multiuser { self.user.as_str() } else { "" };

        let mut hasher = Sha256::new();
        hasher.update([u8::from(self.multiuser)]);
        for part in [user, lab, object] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(SCOPE_DIGEST_LEN);
        digest
    }

    fn object_name(&self, lab: &str, object: &str) -> String {
        let digest = self.scope_digest(lab, object);
        if self.multiuser {
            format!("{}_{}_{}_{}", APP_NAME, self.user, sanitize(object), digest)
        } else {
            format!("{}_{}_{}", APP_NAME, sanitize(object), digest)
        }
    }

    /// Container name of a device.
    pub fn container_name(&self, lab: &str, device: &str) -> String {
        self.object_name(lab, device)
    }

    /// Network name of a link.
    pub fn network_name(&self, lab: &str, link: &str) -> String {
        self.object_name(lab, link)
    }

    /// Returns true if `labels` mark an object of `lab` deployed by this user.
    pub fn owns(&self, labels: &Labels, lab: &str) -> bool {
        labels.get(LABEL_APP).map(String::as_str) == Some(APP_NAME)
            && labels.get(LABEL_LAB).map(String::as_str) == Some(lab)
            && labels.get(LABEL_USER) == Some(&self.user)
    }

    /// Labels shared by every object of a lab for this user.
    pub fn lab_labels(&self, lab: &str) -> Labels {
        [
            (LABEL_APP.to_string(), APP_NAME.to_string()),
            (LABEL_LAB.to_string(), lab.to_string()),
            (LABEL_USER.to_string(), self.user.clone()),
        ]
        .into_iter()
        .collect()
    }

    /// Labels of a device container.
    pub fn device_labels(&self, lab: &str, device: &str) -> Labels {
        let mut labels = self.lab_labels(lab);
        labels.insert(LABEL_DEVICE.to_string(), device.to_string());
        labels
    }

    /// Labels of a link network.
    pub fn link_labels(&self, lab: &str, link: &str) -> Labels {
        let mut labels = self.lab_labels(lab);
        labels.insert(LABEL_LINK.to_string(), link.to_string());
        labels
    }
}

/// Replaces characters the engine rejects in object names.
fn sanitize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
