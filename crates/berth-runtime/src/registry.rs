use crate::RuntimeError;
use berth_schema::{Pid, Properties};
use serde::{Deserialize, Serialize};

/// Binding location used for configurations created by Berth. `?` leaves
/// the configuration unbound so any module may consume it.
pub const DEFAULT_LOCATION: &str = "?";

/// Snapshot of a configuration object held by a registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub pid: Pid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// `None` until the configuration has been updated at least once.
    #[serde(default)]
    pub properties: Option<Properties>,
    #[serde(default)]
    pub read_only: bool,
}

/// A configuration registry service published inside a container.
pub trait ConfigRegistry: Send + Sync {
    /// Fetch the configuration for `pid`, creating an empty one bound to
    /// `location` if it does not exist yet.
    fn configuration(&self, pid: &str, location: &str) -> Result<ConfigRecord, RuntimeError>;

    /// Fetch or create the factory instance `name` of `factory_pid`.
    fn factory_configuration(
        &self,
        factory_pid: &str,
        name: &str,
        location: &str,
    ) -> Result<ConfigRecord, RuntimeError>;

    /// Look up a configuration that holds properties. Empty placeholders
    /// created by `configuration` but never updated are not reported.
    fn find(&self, pid: &str) -> Result<Option<ConfigRecord>, RuntimeError>;

    fn update(&self, pid: &str, properties: &Properties) -> Result<(), RuntimeError>;

    fn delete(&self, pid: &str) -> Result<(), RuntimeError>;

    fn list(&self) -> Result<Vec<ConfigRecord>, RuntimeError>;
}
