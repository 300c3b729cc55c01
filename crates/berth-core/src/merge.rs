//! Pluggable conflict resolution for shared modules and configurations.
//!
//! Closures of the right shape implement both resolver traits.

use berth_schema::{ArtifactId, ModuleRef, Pid, Properties};

/// An incoming module whose coordinate is not tracked while another
/// manifest owns a module of the same logical artifact.
#[derive(Debug)]
pub struct ModuleConflict<'a> {
    pub manifest: &'a ArtifactId,
    pub incoming: &'a ModuleRef,
    pub existing: &'a ArtifactId,
    pub existing_owners: &'a [ArtifactId],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleResolution {
    /// Share the tracked module; the incoming coordinate becomes an alias.
    KeepExisting,
    /// Replace the tracked module with the incoming one, transferring its
    /// owners.
    UseIncoming,
    /// Track both side by side.
    KeepBoth,
}

pub trait ModuleMergeResolver: Send + Sync {
    fn resolve(&self, conflict: &ModuleConflict<'_>) -> ModuleResolution;
}

impl<F> ModuleMergeResolver for F
where
    F: Fn(&ModuleConflict<'_>) -> ModuleResolution + Send + Sync,
{
    fn resolve(&self, conflict: &ModuleConflict<'_>) -> ModuleResolution {
        self(conflict)
    }
}

/// A configuration pid already tracked for another manifest. `incoming`
/// has variables substituted.
#[derive(Debug)]
pub struct ConfigConflict<'a> {
    pub manifest: &'a ArtifactId,
    pub pid: &'a Pid,
    pub existing: &'a Properties,
    pub incoming: &'a Properties,
    pub existing_owners: &'a [ArtifactId],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigResolution {
    KeepExisting,
    /// Write these properties to the registry.
    Write(Properties),
}

pub trait ConfigMergeResolver: Send + Sync {
    fn resolve(&self, conflict: &ConfigConflict<'_>) -> ConfigResolution;
}

impl<F> ConfigMergeResolver for F
where
    F: Fn(&ConfigConflict<'_>) -> ConfigResolution + Send + Sync,
{
    fn resolve(&self, conflict: &ConfigConflict<'_>) -> ConfigResolution {
        self(conflict)
    }
}
