//! Core orchestration for Berth manifest deployment.
//!
//! This crate ties the schema and runtime layers together: the decoration
//! pipeline that lets decorators and extension handlers transform a manifest,
//! the reconciliation `Engine` that installs, updates and removes manifests
//! against a live container while tracking shared ownership, the one-shot
//! `Launcher` with ordered rollback, and the configuration registry watcher.

pub mod configurator;
pub mod decorate;
pub mod engine;
pub mod handlers;
pub mod launch;
pub mod lifecycle;
pub mod merge;
pub mod settings;
pub mod substitute;

pub use configurator::{ConfigurationWatcher, CreationReport, RegistryWait};
pub use decorate::{decorate, Decoration, DecorationContext, Decorator, ExtensionHandler, LaunchHints};
pub use engine::{
    Engine, InstalledConfiguration, InstalledManifest, InstalledModule, Plugins, RemovalReport,
};
pub use launch::{LaunchResult, Launcher, UndoLog, UndoStep};
pub use lifecycle::{validate_transition, LaunchState};
pub use merge::{
    ConfigConflict, ConfigMergeResolver, ConfigResolution, ModuleConflict, ModuleMergeResolver,
    ModuleResolution,
};
pub use settings::LaunchSettings;
pub use substitute::{substitute_properties, substitute_string, substitute_value};

use berth_schema::ArtifactId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("operation aborted: {0}")]
    Abort(String),
    #[error("manifest error: {0}")]
    Manifest(#[from] berth_schema::ManifestError),
    #[error("runtime error: {0}")]
    Runtime(#[from] berth_runtime::RuntimeError),
    #[error("artifact {0} not found in any source")]
    ArtifactNotFound(ArtifactId),
    #[error("variable '{0}' has no value")]
    UnsetVariable(String),
    #[error("cannot substitute variables in '{input}': {reason}")]
    Substitution { input: String, reason: String },
    #[error("manifest not installed: {0}")]
    ManifestNotFound(ArtifactId),
    #[error("manifest {0} has configurations but no configuration registry is available")]
    RegistryUnavailable(ArtifactId),
    #[error("container is no longer available")]
    ContainerGone,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("no container factory available")]
    NoContainerFactory,
    #[error("invalid launch settings: {0}")]
    Settings(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
