use crate::configurator::{write_configuration, WriteOutcome};
use crate::decorate::{decorate, Decorator, ExtensionHandler, LaunchHints};
use crate::launch::LaunchResult;
use crate::merge::{
    ConfigConflict, ConfigMergeResolver, ConfigResolution, ModuleConflict, ModuleMergeResolver,
    ModuleResolution,
};
use crate::substitute::substitute_properties;
use crate::CoreError;
use berth_runtime::{
    ConfigRecord, ConfigRegistry, Container, ModuleHandle, RuntimeError, SourceChain,
};
use berth_schema::{ArtifactId, Configuration, Manifest, ModuleRef, Pid, Properties};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// A module tracked by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledModule {
    pub reference: ModuleRef,
    /// `None` when the module could not be attributed to a live container
    /// module.
    pub handle: Option<ModuleHandle>,
    /// Manifests depending on this module, in the order they claimed it.
    pub owners: Vec<ArtifactId>,
    /// Other coordinates that resolved to this same module.
    pub aliases: Vec<ArtifactId>,
}

impl InstalledModule {
    pub fn id(&self) -> &ArtifactId {
        &self.reference.id
    }

    pub fn is_owned_by(&self, manifest: &ArtifactId) -> bool {
        self.owners.contains(manifest)
    }

    /// Present in the container before this engine asked for it.
    pub fn is_external(&self) -> bool {
        self.owners.iter().any(ArtifactId::is_external)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstalledConfiguration {
    pub configuration: Configuration,
    /// Registry state as last written or found.
    pub record: Option<ConfigRecord>,
    pub owners: Vec<ArtifactId>,
}

impl InstalledConfiguration {
    pub fn is_external(&self) -> bool {
        self.owners.iter().any(ArtifactId::is_external)
    }
}

/// Snapshot of an installed manifest and everything it owns.
#[derive(Debug, Clone)]
pub struct InstalledManifest {
    pub original: Arc<Manifest>,
    /// The manifest after decoration.
    pub manifest: Arc<Manifest>,
    pub decorated: bool,
    /// Deployed by the launch sequencer and adopted afterwards.
    pub initial_launch: bool,
    pub hints: LaunchHints,
    /// In declaration order.
    pub modules: Vec<InstalledModule>,
    pub configurations: Vec<InstalledConfiguration>,
}

impl InstalledManifest {
    pub fn id(&self) -> &ArtifactId {
        &self.original.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    pub manifest: ArtifactId,
    /// Stopped and uninstalled, in that order.
    pub uninstalled: Vec<ArtifactId>,
    /// Still owned by other manifests.
    pub retained: Vec<ArtifactId>,
    /// The container refused to uninstall these; they stay tracked.
    pub failed: Vec<ArtifactId>,
    /// No longer tracked, left in the container for its external owner.
    pub released: Vec<ArtifactId>,
    pub deleted_configurations: Vec<Pid>,
}

/// Caller extensions for a single install or update.
#[derive(Clone, Default)]
pub struct Plugins {
    pub decorators: Vec<Arc<dyn Decorator>>,
    pub handlers: BTreeMap<String, Arc<dyn ExtensionHandler>>,
    pub module_merge: Option<Arc<dyn ModuleMergeResolver>>,
    pub config_merge: Option<Arc<dyn ConfigMergeResolver>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_decorator(mut self, decorator: Arc<dyn Decorator>) -> Self {
        self.decorators.push(decorator);
        self
    }

    #[must_use]
    pub fn with_handler(mut self, name: &str, handler: Arc<dyn ExtensionHandler>) -> Self {
        self.handlers.insert(name.to_owned(), handler);
        self
    }

    #[must_use]
    pub fn with_module_merge(mut self, resolver: Arc<dyn ModuleMergeResolver>) -> Self {
        self.module_merge = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_config_merge(mut self, resolver: Arc<dyn ConfigMergeResolver>) -> Self {
        self.config_merge = Some(resolver);
        self
    }
}

struct TrackedManifest {
    original: Arc<Manifest>,
    manifest: Arc<Manifest>,
    decorated: bool,
    initial_launch: bool,
    hints: LaunchHints,
    /// Keys into `Engine::modules`, in declaration order.
    modules: Vec<ArtifactId>,
    configurations: Vec<Pid>,
    /// False when the install stopped partway; the next install of the same
    /// coordinate then always replaces it.
    complete: bool,
}

/// Reconciles a live container with a set of installed manifests.
///
/// Modules and configurations shared between manifests are reference
/// counted through explicit owners lists and only leave the container when
/// the last owner goes. Anything found in the container that this engine did
/// not put there is owned by [`ArtifactId::external`] and never removed.
pub struct Engine {
    container: Weak<dyn Container>,
    sources: SourceChain,
    manifests: BTreeMap<ArtifactId, TrackedManifest>,
    modules: BTreeMap<ArtifactId, InstalledModule>,
    configurations: BTreeMap<Pid, InstalledConfiguration>,
}

fn add_owner(owners: &mut Vec<ArtifactId>, owner: &ArtifactId) {
    if !owners.contains(owner) {
        owners.push(owner.clone());
    }
}

fn stop_and_uninstall(container: &dyn Container, handle: &ModuleHandle) -> bool {
    if !handle.fragment {
        if let Err(e) = container.stop_module(handle) {
            warn!("failed to stop module {handle}: {e}");
        }
    }
    match container.uninstall_module(handle) {
        Ok(()) => {
            debug!("uninstalled module {handle}");
            true
        }
        Err(e) => {
            warn!("failed to uninstall module {handle}: {e}");
            false
        }
    }
}

impl Engine {
    pub fn new(container: &Arc<dyn Container>, sources: SourceChain) -> Self {
        Self {
            container: Arc::downgrade(container),
            sources,
            manifests: BTreeMap::new(),
            modules: BTreeMap::new(),
            configurations: BTreeMap::new(),
        }
    }

    pub fn sources(&self) -> &SourceChain {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut SourceChain {
        &mut self.sources
    }

    fn container(&self) -> Result<Arc<dyn Container>, CoreError> {
        self.container.upgrade().ok_or(CoreError::ContainerGone)
    }

    pub fn install(&mut self, manifest: Manifest) -> Result<InstalledManifest, CoreError> {
        self.install_with(manifest, &Plugins::default())
    }

    pub fn update(&mut self, manifest: Manifest) -> Result<InstalledManifest, CoreError> {
        self.update_with(manifest, &Plugins::default())
    }

    /// Same as [`Engine::install_with`]; an untracked coordinate is simply
    /// installed.
    pub fn update_with(
        &mut self,
        manifest: Manifest,
        plugins: &Plugins,
    ) -> Result<InstalledManifest, CoreError> {
        if !self.manifests.contains_key(&manifest.id) {
            debug!("manifest {} is not installed yet; installing", manifest.id);
        }
        self.install_with(manifest, plugins)
    }

    /// Decorate and install `manifest`.
    ///
    /// Reinstalling a tracked coordinate with the same ordered module list is
    /// a no-op. A different module list replaces the previous installation.
    /// All validation happens before the container is touched. A failure after
    /// that point leaves already committed changes in place, tracked under
    /// the manifest's coordinate so a later `remove` or `install` cleans up.
    pub fn install_with(
        &mut self,
        manifest: Manifest,
        plugins: &Plugins,
    ) -> Result<InstalledManifest, CoreError> {
        manifest.validate()?;
        let container = self.container()?;
        let key = manifest.id.clone();
        info!("installing manifest {key}");

        let original = Arc::new(manifest);
        let decoration = decorate(
            Arc::clone(&original),
            &mut self.sources,
            &plugins.decorators,
            &plugins.handlers,
        )?;
        let decorated = Arc::clone(&decoration.manifest);
        decorated.validate()?;
        if decorated.id != key {
            return Err(CoreError::Abort(format!(
                "decoration changed the coordinate of {key} to {}",
                decorated.id
            )));
        }

        if let Some(tracked) = self.manifests.get(&key) {
            if tracked.complete && tracked.manifest.module_ids() == decorated.module_ids() {
                info!("manifest {key} is unchanged");
                return self.snapshot(&key).ok_or(CoreError::ManifestNotFound(key));
            }
        }

        if !decorated.configurations.is_empty() && container.registry().is_none() {
            return Err(CoreError::RegistryUnavailable(key));
        }
        let properties = decorated
            .configurations
            .iter()
            .map(|(pid, config)| {
                Ok((
                    pid.clone(),
                    substitute_properties(&config.properties, &decorated.variables)?,
                ))
            })
            .collect::<Result<BTreeMap<Pid, Properties>, CoreError>>()?;

        if self.manifests.contains_key(&key) {
            info!("module list of {key} changed; replacing the installed version");
            self.remove(&key)?;
        }

        let mut fresh = Vec::new();
        let mut module_keys = Vec::with_capacity(decorated.modules.len());
        let mut outcome = Ok(());
        for reference in &decorated.modules {
            match self.install_module(container.as_ref(), &key, reference, plugins, &mut fresh) {
                Ok(tracked) => module_keys.push(tracked),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let mut pids = Vec::new();
        if outcome.is_ok() {
            match self.install_configurations(
                container.as_ref(),
                &key,
                &decorated,
                &properties,
                plugins,
            ) {
                Ok(installed) => pids = installed,
                Err(e) => outcome = Err(e),
            }
        }

        for handle in &fresh {
            if handle.fragment {
                debug!("module {handle} is a fragment; not started");
                continue;
            }
            if let Err(e) = container.start_module(handle) {
                warn!("failed to start module {handle}: {e}");
            }
        }

        if let Err(e) = &outcome {
            warn!(
                "install of {key} stopped after {} of {} modules: {e}",
                module_keys.len(),
                decorated.modules.len()
            );
        } else {
            info!(
                "installed manifest {key}: {} modules ({} new), {} configurations",
                module_keys.len(),
                fresh.len(),
                pids.len()
            );
        }
        if outcome.is_ok() || !module_keys.is_empty() || !pids.is_empty() {
            self.manifests.insert(
                key.clone(),
                TrackedManifest {
                    original,
                    manifest: decorated,
                    decorated: decoration.decorated,
                    initial_launch: false,
                    hints: decoration.hints,
                    modules: module_keys,
                    configurations: pids,
                    complete: outcome.is_ok(),
                },
            );
        }
        outcome?;
        self.snapshot(&key).ok_or(CoreError::ManifestNotFound(key))
    }

    /// Track `reference` for `owner`, installing it if needed. Returns the key
    /// the module is tracked under.
    fn install_module(
        &mut self,
        container: &dyn Container,
        owner: &ArtifactId,
        reference: &ModuleRef,
        plugins: &Plugins,
        fresh: &mut Vec<ModuleHandle>,
    ) -> Result<ArtifactId, CoreError> {
        let id = &reference.id;
        if let Some(module) = self.modules.get_mut(id) {
            debug!("module {id} already tracked; adding owner {owner}");
            if module.owners.is_empty() {
                // Left behind by a failed uninstall and already stopped.
                fresh.extend(module.handle.clone());
            }
            add_owner(&mut module.owners, owner);
            return Ok(id.clone());
        }
        if let Some(module) = self.modules.values_mut().find(|m| m.aliases.contains(id)) {
            debug!("module {id} is an alias of {}; adding owner {owner}", module.id());
            add_owner(&mut module.owners, owner);
            return Ok(module.id().clone());
        }

        if let Some(resolver) = &plugins.module_merge {
            if let Some(existing) = self.conflicting_module(owner, id) {
                let resolution = match self.modules.get(&existing) {
                    Some(module) => resolver.resolve(&ModuleConflict {
                        manifest: owner,
                        incoming: reference,
                        existing: &existing,
                        existing_owners: &module.owners,
                    }),
                    None => ModuleResolution::KeepBoth,
                };
                debug!("module conflict {id} vs {existing}: {resolution:?}");
                match resolution {
                    ModuleResolution::KeepExisting => {
                        if let Some(module) = self.modules.get_mut(&existing) {
                            add_owner(&mut module.owners, owner);
                            add_owner(&mut module.aliases, id);
                        }
                        return Ok(existing);
                    }
                    ModuleResolution::UseIncoming => {
                        return self.replace_module(container, owner, reference, &existing, fresh);
                    }
                    ModuleResolution::KeepBoth => {}
                }
            }
        }

        self.install_fresh(container, owner, reference, fresh)
    }

    /// A tracked module of the same logical artifact under another
    /// coordinate, owned by some other manifest.
    fn conflicting_module(&self, owner: &ArtifactId, id: &ArtifactId) -> Option<ArtifactId> {
        self.modules
            .iter()
            .find(|(key, module)| {
                *key != id
                    && key.same_artifact(id)
                    && module.owners.iter().any(|o| o != owner && !o.is_external())
            })
            .map(|(key, _)| key.clone())
    }

    fn install_fresh(
        &mut self,
        container: &dyn Container,
        owner: &ArtifactId,
        reference: &ModuleRef,
        fresh: &mut Vec<ModuleHandle>,
    ) -> Result<ArtifactId, CoreError> {
        let id = &reference.id;
        let mut stream = self
            .sources
            .get(id)
            .ok_or_else(|| CoreError::ArtifactNotFound(id.clone()))?;
        match container.install(&id.to_string(), &mut stream) {
            Ok(handle) => {
                if let Some(rank) = reference.activation_rank()? {
                    container.set_module_rank(&handle, rank)?;
                }
                debug!("installed module {handle}");
                fresh.push(handle.clone());
                self.modules.insert(
                    id.clone(),
                    InstalledModule {
                        reference: reference.clone(),
                        handle: Some(handle),
                        owners: vec![owner.clone()],
                        aliases: Vec::new(),
                    },
                );
                Ok(id.clone())
            }
            Err(RuntimeError::DuplicateIdentity { existing, .. }) => {
                if let Some(module) = self
                    .modules
                    .values_mut()
                    .find(|m| m.handle.as_ref().is_some_and(|h| h.id == existing.id))
                {
                    debug!("module {id} resolves to tracked module {}", module.id());
                    add_owner(&mut module.owners, owner);
                    add_owner(&mut module.aliases, id);
                    return Ok(module.id().clone());
                }
                info!("module {id} is already present as {existing}; recording external ownership");
                let aliases = existing
                    .coordinate()
                    .filter(|coordinate| coordinate != id)
                    .into_iter()
                    .collect();
                self.modules.insert(
                    id.clone(),
                    InstalledModule {
                        reference: reference.clone(),
                        handle: Some(*existing),
                        owners: vec![owner.clone(), ArtifactId::external()],
                        aliases,
                    },
                );
                Ok(id.clone())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn replace_module(
        &mut self,
        container: &dyn Container,
        owner: &ArtifactId,
        reference: &ModuleRef,
        existing: &ArtifactId,
        fresh: &mut Vec<ModuleHandle>,
    ) -> Result<ArtifactId, CoreError> {
        let Some(old) = self.modules.remove(existing) else {
            return self.install_fresh(container, owner, reference, fresh);
        };
        info!("replacing module {existing} with {}", reference.id);
        match (&old.handle, old.is_external()) {
            (Some(_), true) => warn!("module {existing} is not owned by this engine; left in place"),
            (Some(handle), false) => {
                if !stop_and_uninstall(container, handle) {
                    warn!("module {existing} is still in the container after replacement");
                }
            }
            (None, _) => {}
        }

        let key = self.install_fresh(container, owner, reference, fresh)?;
        if let Some(module) = self.modules.get_mut(&key) {
            for previous in &old.owners {
                add_owner(&mut module.owners, previous);
            }
            for alias in old.aliases.iter().chain(std::iter::once(existing)) {
                if *alias != key {
                    add_owner(&mut module.aliases, alias);
                }
            }
        }
        for tracked in self.manifests.values_mut() {
            for module in &mut tracked.modules {
                if module == existing {
                    module.clone_from(&key);
                }
            }
        }
        Ok(key)
    }

    fn install_configurations(
        &mut self,
        container: &dyn Container,
        owner: &ArtifactId,
        manifest: &Manifest,
        properties: &BTreeMap<Pid, Properties>,
        plugins: &Plugins,
    ) -> Result<Vec<Pid>, CoreError> {
        if manifest.configurations.is_empty() {
            return Ok(Vec::new());
        }
        let registry = container
            .registry()
            .ok_or_else(|| CoreError::RegistryUnavailable(owner.clone()))?;
        let empty = Properties::new();

        let mut pids = Vec::new();
        for (pid, config) in &manifest.configurations {
            let incoming = properties.get(pid).unwrap_or(&empty);

            if let Some(tracked) = self.configurations.get(pid) {
                let shared = tracked.owners.iter().any(|o| o != owner);
                if let (Some(resolver), true) = (&plugins.config_merge, shared) {
                    let existing = tracked
                        .record
                        .as_ref()
                        .and_then(|r| r.properties.clone())
                        .unwrap_or_else(|| tracked.configuration.properties.clone());
                    let resolution = resolver.resolve(&ConfigConflict {
                        manifest: owner,
                        pid,
                        existing: &existing,
                        incoming,
                        existing_owners: &tracked.owners,
                    });
                    if let ConfigResolution::Write(merged) = resolution {
                        self.rewrite_configuration(registry.as_ref(), config, &merged);
                    }
                }
                if let Some(tracked) = self.configurations.get_mut(pid) {
                    debug!("configuration {pid} already tracked; adding owner {owner}");
                    add_owner(&mut tracked.owners, owner);
                }
                pids.push(pid.clone());
                continue;
            }

            match registry.find(pid) {
                Ok(Some(record)) => {
                    info!("configuration {pid} already exists; recording external ownership");
                    self.configurations.insert(
                        pid.clone(),
                        InstalledConfiguration {
                            configuration: config.clone(),
                            record: Some(record),
                            owners: vec![owner.clone(), ArtifactId::external()],
                        },
                    );
                    pids.push(pid.clone());
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to look up configuration {pid}: {e}; skipped");
                    continue;
                }
            }

            match write_configuration(registry.as_ref(), config, incoming) {
                Ok(WriteOutcome::Written(record)) => {
                    debug!("configuration {pid} written");
                    self.configurations.insert(
                        pid.clone(),
                        InstalledConfiguration {
                            configuration: config.clone(),
                            record: Some(record),
                            owners: vec![owner.clone()],
                        },
                    );
                    pids.push(pid.clone());
                }
                Ok(WriteOutcome::ReadOnly) => info!("configuration {pid} is read-only; skipped"),
                Err(e) => warn!("failed to write configuration {pid}: {e}; skipped"),
            }
        }
        Ok(pids)
    }

    fn rewrite_configuration(
        &mut self,
        registry: &dyn ConfigRegistry,
        config: &Configuration,
        properties: &Properties,
    ) {
        match write_configuration(registry, config, properties) {
            Ok(WriteOutcome::Written(record)) => {
                debug!("configuration {} rewritten by merge resolver", config.pid);
                if let Some(tracked) = self.configurations.get_mut(&config.pid) {
                    tracked.record = Some(record);
                }
            }
            Ok(WriteOutcome::ReadOnly) => info!("configuration {} is read-only; skipped", config.pid),
            Err(e) => warn!("failed to rewrite configuration {}: {e}", config.pid),
        }
    }

    /// Remove a manifest, uninstalling exactly the modules and deleting
    /// exactly the configurations no other manifest still owns.
    pub fn remove(&mut self, id: &ArtifactId) -> Result<RemovalReport, CoreError> {
        if !self.manifests.contains_key(id) {
            return Err(CoreError::ManifestNotFound(id.clone()));
        }
        let container = self.container()?;
        let tracked = self
            .manifests
            .remove(id)
            .ok_or_else(|| CoreError::ManifestNotFound(id.clone()))?;
        info!("removing manifest {id}");

        let mut report = RemovalReport {
            manifest: id.clone(),
            uninstalled: Vec::new(),
            retained: Vec::new(),
            failed: Vec::new(),
            released: Vec::new(),
            deleted_configurations: Vec::new(),
        };

        for key in tracked.modules.iter().rev() {
            let Some(module) = self.modules.get_mut(key) else {
                continue;
            };
            module.owners.retain(|o| o != id);
            if module.owners.is_empty() {
                let removed = match &module.handle {
                    Some(handle) => stop_and_uninstall(container.as_ref(), handle),
                    None => true,
                };
                if removed {
                    self.modules.remove(key);
                    report.uninstalled.push(key.clone());
                } else {
                    report.failed.push(key.clone());
                }
            } else if module.owners.iter().all(ArtifactId::is_external) {
                debug!("module {key} belongs to another party; left in place");
                self.modules.remove(key);
                report.released.push(key.clone());
            } else {
                report.retained.push(key.clone());
            }
        }

        let registry = container.registry();
        for pid in &tracked.configurations {
            let Some(config) = self.configurations.get_mut(pid) else {
                continue;
            };
            config.owners.retain(|o| o != id);
            if config.owners.is_empty() {
                self.configurations.remove(pid);
                match &registry {
                    Some(registry) => match registry.delete(pid) {
                        Ok(()) => {
                            debug!("deleted configuration {pid}");
                            report.deleted_configurations.push(pid.clone());
                        }
                        Err(e) => warn!("failed to delete configuration {pid}: {e}"),
                    },
                    None => warn!("no configuration registry; {pid} left in place"),
                }
            } else if config.owners.iter().all(ArtifactId::is_external) {
                self.configurations.remove(pid);
            }
        }

        for module in self.modules.values_mut() {
            module.owners.retain(|o| o != id);
        }
        for config in self.configurations.values_mut() {
            config.owners.retain(|o| o != id);
        }

        info!(
            "removed manifest {id}: {} uninstalled, {} retained, {} failed",
            report.uninstalled.len(),
            report.retained.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Start tracking a manifest the launch sequencer already deployed into
    /// this engine's container.
    pub fn adopt_launched(&mut self, launch: &LaunchResult) -> Result<InstalledManifest, CoreError> {
        let key = launch.original.id.clone();
        if self.manifests.contains_key(&key) {
            debug!("launched manifest {key} is already tracked");
            return self.snapshot(&key).ok_or(CoreError::ManifestNotFound(key));
        }
        let container = self.container()?;
        let existing = container.existing_modules()?;
        info!("adopting launched manifest {key}");

        let mut module_keys = Vec::with_capacity(launch.manifest.modules.len());
        for reference in &launch.manifest.modules {
            let id = &reference.id;
            module_keys.push(id.clone());
            if let Some(module) = self.modules.get_mut(id) {
                add_owner(&mut module.owners, &key);
                continue;
            }
            let location = id.to_string();
            let mut owners = vec![key.clone()];
            let (handle, aliases) = match existing.iter().find(|h| h.location == location) {
                Some(handle) => (Some(handle.clone()), Vec::new()),
                None => match launch.aliases.iter().find(|(alias, _)| alias == id) {
                    Some((_, handle)) => {
                        owners.push(ArtifactId::external());
                        (Some(handle.clone()), handle.coordinate().into_iter().collect())
                    }
                    None => {
                        warn!("module {id} of launched manifest {key} not found in the container");
                        (None, Vec::new())
                    }
                },
            };
            self.modules.insert(
                id.clone(),
                InstalledModule {
                    reference: reference.clone(),
                    handle,
                    owners,
                    aliases,
                },
            );
        }

        let registry = container.registry();
        let mut pids = Vec::new();
        for (pid, config) in &launch.manifest.configurations {
            pids.push(pid.clone());
            if let Some(tracked) = self.configurations.get_mut(pid) {
                add_owner(&mut tracked.owners, &key);
                continue;
            }
            let record = match registry.as_ref().map(|r| r.find(pid)) {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    warn!("failed to look up configuration {pid}: {e}");
                    None
                }
                None => None,
            };
            self.configurations.insert(
                pid.clone(),
                InstalledConfiguration {
                    configuration: config.clone(),
                    record,
                    owners: vec![key.clone()],
                },
            );
        }

        self.manifests.insert(
            key.clone(),
            TrackedManifest {
                original: Arc::clone(&launch.original),
                manifest: Arc::clone(&launch.manifest),
                decorated: launch.decorated,
                initial_launch: true,
                hints: launch.hints.clone(),
                modules: module_keys,
                configurations: pids,
                complete: true,
            },
        );
        self.snapshot(&key).ok_or(CoreError::ManifestNotFound(key))
    }

    fn snapshot(&self, id: &ArtifactId) -> Option<InstalledManifest> {
        let tracked = self.manifests.get(id)?;
        Some(InstalledManifest {
            original: Arc::clone(&tracked.original),
            manifest: Arc::clone(&tracked.manifest),
            decorated: tracked.decorated,
            initial_launch: tracked.initial_launch,
            hints: tracked.hints.clone(),
            modules: tracked
                .modules
                .iter()
                .filter_map(|key| self.modules.get(key).cloned())
                .collect(),
            configurations: tracked
                .configurations
                .iter()
                .filter_map(|pid| self.configurations.get(pid).cloned())
                .collect(),
        })
    }

    pub fn installed(&self, id: &ArtifactId) -> Option<InstalledManifest> {
        self.snapshot(id)
    }

    pub fn manifests(&self) -> impl Iterator<Item = &ArtifactId> {
        self.manifests.keys()
    }

    /// Look up a module by its tracked coordinate or one of its aliases.
    pub fn module(&self, id: &ArtifactId) -> Option<&InstalledModule> {
        self.modules
            .get(id)
            .or_else(|| self.modules.values().find(|m| m.aliases.contains(id)))
    }

    pub fn modules(&self) -> impl Iterator<Item = &InstalledModule> {
        self.modules.values()
    }

    pub fn configuration(&self, pid: &str) -> Option<&InstalledConfiguration> {
        self.configurations.get(pid)
    }

    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.modules.is_empty() && self.configurations.is_empty()
    }
}
