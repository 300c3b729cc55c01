//! Host-side contracts and test doubles for Berth.
//!
//! This crate implements the boundary to everything Berth drives but does not
//! own: the pluggable `Container` trait (module install/start/stop/uninstall,
//! activation ranks, lifecycle events), the dynamically appearing
//! `ConfigRegistry` service, ordered `ArtifactSource` chains, container
//! factories, and an in-memory mock host used by tests and benches.

pub mod container;
pub mod factory;
pub mod mock;
pub mod registry;
pub mod source;

pub use container::{
    Container, ContainerEvent, ContainerListener, HostProperties, ListenerId, ModuleHandle,
    ModuleState, RankAck,
};
pub use factory::{ContainerFactory, FactoryCatalog, FactoryOrigin};
pub use registry::{ConfigRecord, ConfigRegistry, DEFAULT_LOCATION};
pub use source::{ArtifactSource, SourceChain};

use berth_schema::{ManifestError, SymbolicName};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("module '{symbolic_name}' from {location} is already installed as {}", .existing.location)]
    DuplicateIdentity {
        location: String,
        symbolic_name: SymbolicName,
        existing: Box<ModuleHandle>,
    },
    #[error("failed to install module from {location}: {reason}")]
    InstallFailed { location: String, reason: String },
    #[error("module {0} is not installed")]
    ModuleNotFound(String),
    #[error("module {module} failed: {reason}")]
    ModuleFailed { module: String, reason: String },
    #[error("container is not in a valid state: {0}")]
    InvalidState(String),
    #[error("configuration registry error: {0}")]
    Registry(String),
    #[error("artifact source '{source_name}' failed: {reason}")]
    Source { source_name: String, reason: String },
}
