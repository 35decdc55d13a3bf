use hashbrown::HashMap;
use std::sync::{Arc, Mutex};

use crate::support::lock;

/// Name to serialized-response map. GET requests whose query-stripped url
/// hits an entry are answered straight from here by the session.
pub struct ContentCache {
    entries: Mutex<HashMap<String, Arc<Vec<u8>>>>,
}

impl ContentCache {
    #[inline]
    pub fn new() -> ContentCache {
        ContentCache {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stores the wire bytes of a response under the given url path.
    pub fn insert(&self, key: &str, value: Vec<u8>) {
        lock(&self.entries).insert(key.to_string(), Arc::new(value));
    }

    pub fn find(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        lock(&self.entries).get(key).cloned()
    }

    /// Removes an entry. Returns false when the key was absent.
    pub fn remove(&self, key: &str) -> bool {
        lock(&self.entries).remove(key).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}
