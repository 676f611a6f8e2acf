use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use tempfile::Builder;
use tracing::debug;

use crate::error::SyncError;

pub const ORGANIZATION_KEY: &str = "organization_id";
pub const THEME_KEY: &str = "theme";

pub type Preferences = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct PreferenceStore {
    path: Utf8PathBuf,
}

impl PreferenceStore {
    pub fn new() -> Result<Self, SyncError> {
        let path = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.config_dir().join("perfboard").join("preferences.json"),
                )
                .ok()
            })
            .ok_or_else(|| {
                SyncError::Preferences("unable to resolve config directory".to_string())
            })?;
        Ok(Self { path })
    }

    pub fn new_with_path(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> Result<Preferences, SyncError> {
        if !self.path.as_std_path().exists() {
            return Ok(Preferences::new());
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Preferences::new());
        }
        serde_json::from_str(&content)
            .map_err(|err| SyncError::Preferences(format!("{}: {err}", self.path)))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        Ok(self.load()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let mut prefs = self.load()?;
        if prefs.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        prefs.insert(key.to_string(), value.to_string());
        self.write(&prefs)
    }

    pub fn remove(&self, key: &str) -> Result<bool, SyncError> {
        let mut prefs = self.load()?;
        if prefs.remove(key).is_none() {
            return Ok(false);
        }
        self.write(&prefs)?;
        Ok(true)
    }

    fn write(&self, prefs: &Preferences) -> Result<(), SyncError> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SyncError::Filesystem("invalid preferences path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec_pretty(prefs)
            .map_err(|err| SyncError::Preferences(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("perfboard-prefs")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, &content)
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        debug!(path = %self.path, "preferences written");
        Ok(())
    }
}
