//! Devices seen during the current scan window

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Insertion-ordered set of discovered peripherals, keyed by id
#[derive(Debug, Default)]
pub struct ScanRegistry {
    devices: Vec<DeviceIdentity>,
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already present; the first sighting wins
    pub fn insert(&mut self, identity: DeviceIdentity) -> bool {
        if self.contains(&identity.id) {
            return false;
        }
        self.devices.push(identity);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&DeviceIdentity> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn snapshot(&self) -> Vec<DeviceIdentity> {
        self.devices.clone()
    }
}
