use crate::configurator::{RegistryWait, DEFAULT_REGISTRY_WAIT_MILLIS};
use crate::CoreError;
use berth_schema::{ArtifactId, Variables};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Caller-side knobs for a one-shot launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// `> 0` timed wait, `0` synchronous, negative no wait.
    pub registry_wait_millis: i64,
    /// Override decorated host properties. `null` removes a property.
    pub host_properties: BTreeMap<String, Option<String>>,
    /// Override manifest variables.
    pub variables: Variables,
    /// Registry module installed eagerly under the synchronous wait policy.
    pub default_registry_module: Option<ArtifactId>,
    /// Use this directory instead of a fresh temporary one.
    pub storage_dir: Option<PathBuf>,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            registry_wait_millis: DEFAULT_REGISTRY_WAIT_MILLIS,
            host_properties: BTreeMap::new(),
            variables: Variables::new(),
            default_registry_module: None,
            storage_dir: None,
        }
    }
}

impl LaunchSettings {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_registry_wait(mut self, millis: i64) -> Self {
        self.registry_wait_millis = millis;
        self
    }

    #[must_use]
    pub fn with_host_property(mut self, key: &str, value: Option<&str>) -> Self {
        self.host_properties
            .insert(key.to_owned(), value.map(str::to_owned));
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(name.to_owned(), value.into());
        self
    }

    #[must_use]
    pub fn with_default_registry_module(mut self, id: ArtifactId) -> Self {
        self.default_registry_module = Some(id);
        self
    }

    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(dir.into());
        self
    }

    pub fn registry_wait(&self) -> RegistryWait {
        RegistryWait::from_millis(self.registry_wait_millis)
    }

    /// Load settings from `~/.config/berth/launch.json`.
    pub fn load_default() -> Result<Self, CoreError> {
        Self::load(&default_settings_path()?)
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn default_settings_path() -> Result<PathBuf, CoreError> {
    let home =
        std::env::var("HOME").map_err(|_| CoreError::Settings("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/berth/launch.json"))
}
