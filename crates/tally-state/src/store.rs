//! Player storage - per-player persistent key/value bytes

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Persistent byte storage of the local player, keyed by currency name
pub trait PlayerStore {
    fn has_key(&self, key: &str) -> bool;
    fn get_bytes(&self, key: &str) -> Option<Vec<u8>>;
    fn set_bytes(&mut self, key: &str, bytes: &[u8]);
}

/// In-memory store. Clones share the same backing map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl PlayerStore for MemoryStore {
    fn has_key(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().get(key).cloned()
    }

    fn set_bytes(&mut self, key: &str, bytes: &[u8]) {
        self.inner.lock().insert(key.to_owned(), bytes.to_vec());
    }
}
