use crate::registry::{self, Persistence};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

/// Persistence that keeps memberships in memory.
#[derive(Clone, Default)]
pub struct Storage {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl Storage {
    /// Returns the keys of every stored membership.
    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    /// Returns the data stored under `key`.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

impl Persistence for Storage {
    fn save(&self, data: &[u8], key: &str) -> Result<(), registry::Error> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
