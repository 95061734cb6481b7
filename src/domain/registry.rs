//! Device Registry
//!
//! First-seen ordered list of peripherals whose advertised name matches
//! the configured allow-list.

use crate::domain::models::{DeviceSummary, PeripheralHandle, PeripheralId};
use serde::{Deserialize, Serialize};

/// Which advertised name fields must contain the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatch {
    /// Local name or device name
    AnyField,
    /// Local name and device name
    AllFields,
}

/// One allow-listed name token. Matching is a case-sensitive substring test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    pub token: String,
    pub mode: NameMatch,
}

impl NameFilter {
    pub fn any_field(token: &str) -> Self {
        Self {
            token: token.to_string(),
            mode: NameMatch::AnyField,
        }
    }

    pub fn all_fields(token: &str) -> Self {
        Self {
            token: token.to_string(),
            mode: NameMatch::AllFields,
        }
    }

    pub fn matches(&self, candidate: &PeripheralHandle) -> bool {
        let contains = |field: &Option<String>| {
            field
                .as_deref()
                .map(|name| name.contains(self.token.as_str()))
                .unwrap_or(false)
        };

        match self.mode {
            NameMatch::AnyField => contains(&candidate.local_name) || contains(&candidate.name),
            NameMatch::AllFields => contains(&candidate.local_name) && contains(&candidate.name),
        }
    }
}

/// Allow-list used when no settings override it.
pub fn default_name_filters() -> Vec<NameFilter> {
    vec![NameFilter::any_field("WIDI"), NameFilter::all_fields("PuckCC")]
}

#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    filters: Vec<NameFilter>,
    devices: Vec<PeripheralHandle>,
}

impl DeviceRegistry {
    pub fn new(filters: Vec<NameFilter>) -> Self {
        Self {
            filters,
            devices: Vec::new(),
        }
    }

    /// Offer a scan result to the registry.
    ///
    /// Returns `true` when the candidate was appended, i.e. the registry changed.
    pub fn observe(&mut self, candidate: PeripheralHandle) -> bool {
        if !self.filters.iter().any(|f| f.matches(&candidate)) {
            return false;
        }
        if self.contains(&candidate.id) {
            return false;
        }
        self.devices.push(candidate);
        true
    }

    pub fn contains(&self, id: &PeripheralId) -> bool {
        self.devices.iter().any(|d| &d.id == id)
    }

    pub fn get(&self, id: &PeripheralId) -> Option<&PeripheralHandle> {
        self.devices.iter().find(|d| &d.id == id)
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

    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.devices.iter().map(PeripheralHandle::summary).collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(default_name_filters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, local_name: Option<&str>, name: Option<&str>) -> PeripheralHandle {
        PeripheralHandle {
            id: id.into(),
            local_name: local_name.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    #[test]
    fn test_duplicate_ids_are_dropped() {
        let mut registry = DeviceRegistry::default();
        assert!(registry.observe(device("1", Some("WIDI Jack"), None)));
        assert!(!registry.observe(device("1", Some("WIDI Jack"), None)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_first_seen_order() {
        let mut registry = DeviceRegistry::default();
        registry.observe(device("b", None, Some("WIDI Master")));
        registry.observe(device("a", Some("PuckCC-1"), Some("PuckCC-1")));
        registry.observe(device("b", None, Some("WIDI Master")));

        let ids: Vec<_> = registry.summaries().into_iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_unmatched_names_never_added() {
        let mut registry = DeviceRegistry::default();
        for _ in 0..5 {
            assert!(!registry.observe(device("x", Some("Headphones"), Some("Headphones"))));
        }
        assert!(!registry.observe(device("y", None, None)));
        assert!(!registry.observe(device("z", Some("widi"), None)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_all_fields_filter_needs_both_names() {
        let mut registry = DeviceRegistry::default();
        assert!(!registry.observe(device("1", Some("PuckCC-1"), None)));
        assert!(!registry.observe(device("1", None, Some("PuckCC-1"))));
        assert!(registry.observe(device("1", Some("PuckCC-1"), Some("PuckCC"))));
    }

    #[test]
    fn test_configurable_filters() {
        let mut registry = DeviceRegistry::new(vec![NameFilter::any_field("Pedal")]);
        assert!(registry.observe(device("1", None, Some("My Pedal"))));
        assert!(!registry.observe(device("2", Some("WIDI Jack"), None)));
        assert!(registry.get(&"1".into()).is_some());

        registry.clear();
        assert!(registry.is_empty());
    }
}
