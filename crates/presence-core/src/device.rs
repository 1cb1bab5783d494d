//! Network device representation

use crate::sighting::Sighting;
use serde::{Deserialize, Serialize};

/// Network identity of a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkId {
    pub ip: String,
    pub mac: String,
    /// Stable identity key the record is stored under
    pub uuid: String,
}

/// A free-form label attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: String,
}

impl Metadata {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A device seen on a home network
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: NetworkId,
    pub home: String,
    /// Last sighting (unix seconds)
    pub last_seen: i64,
    /// Cached "no live lease" projection; recomputed on read
    #[serde(default)]
    pub away: bool,
    pub name: String,
    /// Whether this device counts toward occupancy
    #[serde(default)]
    pub is_person: bool,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Whether the device is switched off when its home empties
    #[serde(default)]
    pub presence_aware: bool,
    /// Latency reported with the last sighting
    #[serde(default)]
    pub latency: f32,
    /// Assistant query answering "is this device on?"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_command: Option<String>,
    #[serde(default)]
    pub metadata: Vec<Metadata>,
}

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Previous home, when the device moved
    pub moved_from: Option<String>,
    /// Whether the merged record may be written back
    pub persist: bool,
}

impl Device {
    /// Stable identity key
    #[must_use]
    pub fn key(&self) -> &str {
        &self.id.uuid
    }

    /// Merge a sighting into this record
    ///
    /// The merged record may only be persisted when the sighting carried a
    /// hardware address equal to the stored one; an IP-only sighting matched
    /// to this record updates it in memory only.
    pub fn merge_sighting(
        &mut self,
        sighting: &Sighting,
        home: &str,
        now: i64,
        metadata: Vec<Metadata>,
    ) -> MergeOutcome {
        let stored_mac = self.id.mac.clone();
        let incoming_mac = sighting.mac.trim();

        if let Some(vendor) = sighting.vendor.as_deref().filter(|v| !v.is_empty()) {
            if vendor != self.manufacturer {
                self.manufacturer = vendor.to_string();
            }
        }

        if !incoming_mac.is_empty() {
            self.id.mac = incoming_mac.to_string();
        } else if sighting.ip == self.id.uuid {
            self.id.ip = sighting.ip.clone();
        }

        if !sighting.ip.is_empty() && sighting.ip != self.id.ip {
            self.id.ip = sighting.ip.clone();
        }

        let moved_from = if home != self.home {
            Some(std::mem::replace(&mut self.home, home.to_string()))
        } else {
            None
        };

        for host in &sighting.hostnames {
            if !self.hostnames.contains(host) {
                self.hostnames.push(host.clone());
            }
        }

        self.last_seen = now;
        self.latency = sighting.distance;
        self.metadata = metadata;

        MergeOutcome {
            moved_from,
            persist: !incoming_mac.is_empty() && incoming_mac == stored_mac,
        }
    }
}

/// Identity key for a sighting: its mac, or one synthesized from home and ip
#[must_use]
pub fn identity_key(home: &str, sighting: &Sighting) -> String {
    let mac = sighting.mac.trim();
    if mac.is_empty() {
        format!("{}/{}", home, sanitize(&sighting.ip))
    } else {
        mac.to_string()
    }
}

/// Replace address separators so the value is safe inside keys and names
#[must_use]
pub fn sanitize(value: &str) -> String {
    value.replace(['.', ':'], "_")
}

/// Whether a value looks like a hardware address
#[must_use]
pub fn is_hardware_address(mac: &str) -> bool {
    mac.contains(':') || mac.contains('-')
}

/// Name for a new device: first hostname, else its mac, else its ip
#[must_use]
pub fn derive_name(sighting: &Sighting, key: &str) -> String {
    if let Some(host) = sighting.hostnames.first().filter(|h| !h.is_empty()) {
        return host.clone();
    }
    let mac = sighting.mac.trim();
    if !mac.is_empty() {
        return sanitize(mac);
    }
    if !sighting.ip.is_empty() {
        return sanitize(&sighting.ip);
    }
    sanitize(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> Device {
        Device {
            id: NetworkId {
                ip: "10.0.0.7".to_string(),
                mac: "AA:BB".to_string(),
                uuid: "10.0.0.5".to_string(),
            },
            home: "office".to_string(),
            last_seen: 100,
            name: "laptop".to_string(),
            hostnames: vec!["laptop.lan".to_string()],
            ..Device::default()
        }
    }

    #[test]
    fn test_identity_key() {
        let with_mac = Sighting {
            ip: "10.0.0.5".to_string(),
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            ..Sighting::default()
        };
        assert_eq!(identity_key("office", &with_mac), "aa:bb:cc:dd:ee:ff");

        let ip_only = Sighting {
            ip: "10.0.0.5".to_string(),
            ..Sighting::default()
        };
        assert_eq!(identity_key("office", &ip_only), "office/10_0_0_5");
        assert_eq!(identity_key("cabin", &ip_only), "cabin/10_0_0_5");
    }

    #[test]
    fn test_derive_name_priority() {
        let mut sighting = Sighting {
            ip: "10.0.0.5".to_string(),
            mac: "aa:bb".to_string(),
            hostnames: vec!["phone.lan".to_string()],
            ..Sighting::default()
        };
        assert_eq!(derive_name(&sighting, "aa:bb"), "phone.lan");
        sighting.hostnames.clear();
        assert_eq!(derive_name(&sighting, "aa:bb"), "aa_bb");
        sighting.mac.clear();
        assert_eq!(derive_name(&sighting, "office/10_0_0_5"), "10_0_0_5");
    }

    #[test]
    fn test_ip_only_merge_is_not_persisted() {
        let mut device = stored();
        let sighting = Sighting {
            ip: "10.0.0.5".to_string(),
            ..Sighting::default()
        };
        let outcome = device.merge_sighting(&sighting, "office", 200, Vec::new());
        assert_eq!(device.id.ip, "10.0.0.5");
        assert_eq!(device.id.mac, "AA:BB");
        assert_eq!(device.last_seen, 200);
        assert!(!outcome.persist);
    }

    #[test]
    fn test_matching_mac_merge_is_persisted() {
        let mut device = stored();
        let sighting = Sighting {
            ip: "10.0.0.9".to_string(),
            mac: "AA:BB".to_string(),
            hostnames: vec!["laptop.lan".to_string(), "laptop.local".to_string()],
            distance: 3.5,
            ..Sighting::default()
        };
        let outcome = device.merge_sighting(&sighting, "office", 200, Vec::new());
        assert!(outcome.persist);
        assert_eq!(outcome.moved_from, None);
        assert_eq!(device.id.ip, "10.0.0.9");
        assert_eq!(device.hostnames, vec!["laptop.lan", "laptop.local"]);
        assert_eq!(device.latency, 3.5);
    }

    #[test]
    fn test_different_mac_is_adopted_but_not_persisted() {
        let mut device = stored();
        let sighting = Sighting {
            ip: "10.0.0.7".to_string(),
            mac: "CC:DD".to_string(),
            ..Sighting::default()
        };
        let outcome = device.merge_sighting(&sighting, "office", 200, Vec::new());
        assert_eq!(device.id.mac, "CC:DD");
        assert!(!outcome.persist);
    }

    #[test]
    fn test_home_change_is_reported() {
        let mut device = stored();
        let sighting = Sighting {
            ip: "10.0.0.7".to_string(),
            mac: "AA:BB".to_string(),
            ..Sighting::default()
        };
        let outcome = device.merge_sighting(&sighting, "cabin", 200, Vec::new());
        assert_eq!(outcome.moved_from.as_deref(), Some("office"));
        assert_eq!(device.home, "cabin");
    }
}
