//! In-memory device lists.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::DeviceSource;
use crate::core::DispatchError;

/// Device lists held in memory, keyed by name.
#[derive(Default)]
pub struct MemorySource {
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemorySource {
    /// Source answering every key with `devices`.
    #[must_use]
    pub fn new(devices: Vec<String>) -> Self {
        let source = Self::default();
        source.insert("", devices);
        source
    }

    /// Register `devices` under `key`.
    pub fn insert(&self, key: impl Into<String>, devices: Vec<String>) {
        self.lists.write().insert(key.into(), devices);
    }
}

impl DeviceSource for MemorySource {
    fn fetch(&self, key: &str) -> Result<Vec<String>, DispatchError> {
        let lists = self.lists.read();
        lists
            .get(key)
            .or_else(|| lists.get(""))
            .cloned()
            .ok_or_else(|| DispatchError::SourceUnavailable(format!("no device list for key `{key}`")))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_and_fallback() {
        let source = MemorySource::new(vec!["all".into()]);
        source.insert("vip", vec!["v1".into(), "v2".into()]);
        assert_eq!(source.fetch("vip").unwrap().len(), 2);
        assert_eq!(source.fetch("other").unwrap(), vec!["all".to_string()]);
    }

    #[test]
    fn test_missing_key_without_fallback() {
        let source = MemorySource::default();
        assert!(matches!(source.fetch("x"), Err(DispatchError::SourceUnavailable(_))));
    }
}
