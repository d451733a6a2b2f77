//! Small key-value preference store used to remember the selected model.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Key under which the selected model id is persisted.
pub const SELECTED_MODEL_KEY: &str = "zenchat.selected_model";

/// Preference store trait
pub trait PreferenceStore: Send + Sync {
    /// Returns the stored value, if any.
    fn get(&self, key: &str) -> Option<String>;
    /// Stores a value.
    fn set(&self, key: &str, value: &str) -> std::io::Result<()>;
}

/// Process-local preferences.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with one entry.
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.values.lock().insert(key.to_string(), value.to_string());
        store
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
