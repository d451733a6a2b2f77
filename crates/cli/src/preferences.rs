use std::collections::BTreeMap;
use std::path::PathBuf;

use chat::PreferenceStore;
use tracing::debug;

use crate::config::state_dir;

/// Preferences persisted as a flat TOML table.
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    /// Default file path: `~/.zenchat/preferences.toml`.
    pub fn default_path() -> PathBuf {
        state_dir().join("preferences.toml")
    }

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the table, returning an empty one on any error.
    fn load(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }
}

impl Default for FilePreferences {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut values = self.load();
        values.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(&values).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), key, "Preference saved");
        Ok(())
    }
}
