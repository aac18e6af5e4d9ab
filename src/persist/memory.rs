use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::KvBackend;
use crate::errors::StorageError;

/// In-process backend. Clones share the same map, so a test can hand one
/// clone to a workspace and inspect what was written through another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.inner.lock() {
            Ok(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let map = self.inner.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut map = self.inner.lock().map_err(|_| StorageError::LockPoisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let mut map = self.inner.lock().map_err(|_| StorageError::LockPoisoned)?;
        map.remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_storage() -> anyhow::Result<()> {
        let a = MemoryBackend::new();
        let mut b = a.clone();
        b.set("deal-store", "{}")?;
        assert_eq!(a.get("deal-store")?.as_deref(), Some("{}"));
        assert_eq!(a.keys(), vec!["deal-store".to_string()]);
        b.remove("deal-store")?;
        assert!(a.get("deal-store")?.is_none());
        Ok(())
    }
}
