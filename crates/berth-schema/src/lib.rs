//! Manifest data model, artifact coordinates, and manifest builder for Berth.
//!
//! This crate defines the schema layer: artifact coordinates (`ArtifactId`),
//! deployment manifests with their modules, configurations, extensions and
//! variables (`Manifest`), JSON decoding with validation (`parse_manifest_str`),
//! and the identity-tracking `ManifestBuilder` used by the decoration pipeline.

pub mod builder;
pub mod coordinate;
pub mod manifest;
pub mod types;

pub use builder::{BuildSlot, ManifestBuilder};
pub use coordinate::ArtifactId;
pub use manifest::{
    parse_manifest_file, parse_manifest_str, Configuration, Extension, ExtensionContent,
    ExtensionKind, ExtensionType, Manifest, ManifestError, ModuleRef, Properties, Variables,
    ACTIVATION_RANK_KEY,
};
pub use types::{Pid, SymbolicName, FACTORY_SEPARATOR};
