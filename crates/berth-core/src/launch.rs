//! One-shot launch of a manifest into a freshly created container.
//!
//! Every side effect that must be undone on failure is appended to an
//! [`UndoLog`]; rollback stops the container and then walks the log
//! backwards.

use crate::configurator::{ConfigurationWatcher, RegistryWait};
use crate::decorate::{decorate, Decoration, Decorator, ExtensionHandler, LaunchHints};
use crate::lifecycle::{validate_transition, LaunchState};
use crate::settings::LaunchSettings;
use crate::substitute::substitute_string;
use crate::CoreError;
use berth_runtime::{
    Container, ContainerEvent, ContainerFactory, ContainerListener, FactoryCatalog,
    HostProperties, ListenerId, ModuleHandle, RuntimeError, SourceChain,
};
use berth_schema::{ArtifactId, Manifest, Variables};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Host property holding the container storage directory.
pub const STORAGE_PROPERTY: &str = "berth.storage";
/// Host property controlling when the storage directory is wiped.
pub const STORAGE_CLEAN_PROPERTY: &str = "berth.storage.clean";
pub const CLEAN_ON_FIRST_INIT: &str = "onFirstInit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoStep {
    UninstallModule(ModuleHandle),
    /// Only recorded when the storage is cleaned on first init.
    RemoveStorage(PathBuf),
}

/// Append-only record of launch side effects.
#[derive(Debug, Default)]
pub struct UndoLog {
    steps: Vec<UndoStep>,
}

impl UndoLog {
    pub fn push(&mut self, step: UndoStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[UndoStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Stop the container, then undo every step in reverse order. Failures
    /// are logged and do not interrupt the rollback.
    pub fn rollback(self, container: Option<&dyn Container>) {
        if let Some(container) = container {
            if let Err(e) = container.stop() {
                warn!("rollback: failed to stop container: {e}");
            }
        }
        for step in self.steps.iter().rev() {
            match step {
                UndoStep::UninstallModule(handle) => {
                    let Some(container) = container else {
                        continue;
                    };
                    match container.uninstall_module(handle) {
                        Ok(()) => debug!("rollback: uninstalled module {handle}"),
                        Err(e) => warn!("rollback: failed to uninstall module {handle}: {e}"),
                    }
                }
                UndoStep::RemoveStorage(path) => remove_storage(path),
            }
        }
    }
}

fn remove_storage(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("rollback: failed to remove storage {}: {e}", path.display());
    } else {
        debug!("rollback: removed storage {}", path.display());
    }
}

/// Everything a partial deploy attached to the container.
#[derive(Default)]
struct Deployment {
    container: Option<Arc<dyn Container>>,
    listener: Option<ListenerId>,
    watcher: Option<Arc<ConfigurationWatcher>>,
}

struct ModuleEventLogger;

impl ContainerListener for ModuleEventLogger {
    fn on_event(&self, event: &ContainerEvent) {
        match event {
            ContainerEvent::ModuleInstalled(m) => debug!("module installed: {m}"),
            ContainerEvent::ModuleStarted(m) => debug!("module started: {m}"),
            ContainerEvent::ModuleStopped(m) => debug!("module stopped: {m}"),
            ContainerEvent::ModuleUninstalled(m) => debug!("module uninstalled: {m}"),
            ContainerEvent::ModuleError {
                module: Some(m),
                message,
            } => error!("module {m}: {message}"),
            ContainerEvent::ModuleError {
                module: None,
                message,
            } => error!("container error: {message}"),
            ContainerEvent::RegistryAvailable(_) => debug!("configuration registry available"),
            ContainerEvent::RegistryWithdrawn => debug!("configuration registry withdrawn"),
            ContainerEvent::HostRankChanged(rank) => debug!("host activation rank is now {rank}"),
            ContainerEvent::Stopped => info!("container stopped"),
        }
    }
}

/// Request a host rank change and block until the container acknowledges it.
fn apply_host_rank(container: &dyn Container, rank: u32) -> Result<(), CoreError> {
    let (tx, rx) = mpsc::sync_channel(1);
    container.set_host_rank(
        rank,
        Box::new(move || {
            let _ = tx.send(());
        }),
    )?;
    rx.recv().map_err(|_| {
        RuntimeError::InvalidState(format!("host rank change to {rank} was never acknowledged"))
    })?;
    debug!("host activation rank set to {rank}");
    Ok(())
}

/// A running container produced by [`Launcher::launch`].
pub struct LaunchResult {
    container: Arc<dyn Container>,
    pub original: Arc<Manifest>,
    pub manifest: Arc<Manifest>,
    pub decorated: bool,
    pub hints: LaunchHints,
    /// Modules installed by the launch, in install order.
    pub modules: Vec<ModuleHandle>,
    /// Coordinates whose module identity was already present, with the
    /// module that answered for them.
    pub aliases: Vec<(ArtifactId, ModuleHandle)>,
    pub properties: HostProperties,
    pub storage: Option<PathBuf>,
    watcher: Option<Arc<ConfigurationWatcher>>,
    listener: ListenerId,
}

impl LaunchResult {
    pub fn container(&self) -> &Arc<dyn Container> {
        &self.container
    }

    /// Block until the container stops. `false` means the timeout elapsed.
    pub fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<bool, CoreError> {
        Ok(self.container.wait_for_stop(timeout)?)
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        if let Some(watcher) = &self.watcher {
            watcher.stop();
        }
        self.container.remove_listener(self.listener);
        self.container.stop()?;
        Ok(())
    }

    pub fn watcher(&self) -> Option<&Arc<ConfigurationWatcher>> {
        self.watcher.as_ref()
    }

    /// True when the manifest has no configurations or they were created.
    pub fn configurations_created(&self) -> bool {
        match &self.watcher {
            Some(watcher) => watcher.is_created(),
            None => true,
        }
    }
}

impl fmt::Debug for LaunchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchResult")
            .field("container", &self.container.name())
            .field("manifest", &self.manifest.id)
            .field("modules", &self.modules)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

struct Prepared {
    original: Arc<Manifest>,
    decoration: Decoration,
    variables: Variables,
    properties: HostProperties,
    storage: Option<PathBuf>,
    clean_storage: bool,
    factory: Arc<dyn ContainerFactory>,
}

/// Launches one manifest into a new container. A launcher is single use.
pub struct Launcher {
    manifest: Manifest,
    sources: SourceChain,
    factories: FactoryCatalog,
    settings: LaunchSettings,
    decorators: Vec<Arc<dyn Decorator>>,
    handlers: BTreeMap<String, Arc<dyn ExtensionHandler>>,
    state: LaunchState,
}

impl Launcher {
    pub fn new(manifest: Manifest, sources: SourceChain, factories: FactoryCatalog) -> Self {
        Self {
            manifest,
            sources,
            factories,
            settings: LaunchSettings::default(),
            decorators: Vec::new(),
            handlers: BTreeMap::new(),
            state: LaunchState::Created,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: LaunchSettings) -> Self {
        self.settings = settings;
        self
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

    pub fn state(&self) -> LaunchState {
        self.state
    }

    fn advance(&mut self, to: LaunchState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("launch state {} -> {to}", self.state);
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, to: LaunchState) {
        if let Err(e) = self.advance(to) {
            warn!("{e}");
        }
    }

    /// Create, populate and start a container for the manifest.
    ///
    /// Any failure once the container exists is rolled back before the
    /// error is returned. A second call fails without side effects.
    pub fn launch(&mut self) -> Result<LaunchResult, CoreError> {
        validate_transition(self.state, LaunchState::ContainerInitialized)?;
        info!("launching manifest {}", self.manifest.id);

        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(e) => {
                self.fail(LaunchState::Failed);
                return Err(e);
            }
        };

        let mut undo = UndoLog::default();
        if prepared.clean_storage {
            if let Some(dir) = &prepared.storage {
                undo.push(UndoStep::RemoveStorage(dir.clone()));
            }
        }
        let mut deployment = Deployment::default();
        match self.deploy(prepared, &mut deployment, &mut undo) {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("launch of {} failed: {e}; rolling back", self.manifest.id);
                self.fail(LaunchState::Failed);
                if let Some(watcher) = &deployment.watcher {
                    watcher.stop();
                }
                let container = deployment.container.as_deref();
                undo.rollback(container);
                if let (Some(container), Some(listener)) = (container, deployment.listener) {
                    container.remove_listener(listener);
                }
                self.fail(LaunchState::CleanedUp);
                Err(e)
            }
        }
    }

    fn prepare(&mut self) -> Result<Prepared, CoreError> {
        self.manifest.validate()?;
        let original = Arc::new(self.manifest.clone());
        let decoration = decorate(
            Arc::clone(&original),
            &mut self.sources,
            &self.decorators,
            &self.handlers,
        )?;
        decoration.manifest.validate()?;

        let mut variables = decoration.manifest.variables.clone();
        variables.extend(self.settings.variables.clone());
        if let Some((name, _)) = variables.iter().find(|(_, value)| value.is_null()) {
            return Err(CoreError::UnsetVariable(name.clone()));
        }

        let (origin, factory) = self
            .factories
            .select(decoration.hints.preferred_factory.as_ref())
            .ok_or(CoreError::NoContainerFactory)?;
        info!("using container factory '{}' ({origin})", factory.name());

        let mut merged = HostProperties::new();
        merged.insert(
            STORAGE_CLEAN_PROPERTY.to_owned(),
            CLEAN_ON_FIRST_INIT.to_owned(),
        );
        merged.extend(decoration.hints.host_properties.clone());
        for (key, value) in &self.settings.host_properties {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        let mut properties = merged
            .into_iter()
            .map(|(key, value)| Ok((key, substitute_string(&value, &variables)?)))
            .collect::<Result<HostProperties, CoreError>>()?;

        let storage_removed = self
            .settings
            .host_properties
            .get(STORAGE_PROPERTY)
            .is_some_and(Option::is_none);
        let storage = match properties.get(STORAGE_PROPERTY) {
            Some(dir) => Some(PathBuf::from(dir)),
            None if storage_removed => None,
            None => {
                let dir = match &self.settings.storage_dir {
                    Some(dir) => {
                        std::fs::create_dir_all(dir)?;
                        dir.clone()
                    }
                    None => tempfile::Builder::new()
                        .prefix("berth-storage-")
                        .tempdir()?
                        .keep(),
                };
                properties.insert(
                    STORAGE_PROPERTY.to_owned(),
                    dir.to_string_lossy().into_owned(),
                );
                Some(dir)
            }
        };
        let clean_storage = properties
            .get(STORAGE_CLEAN_PROPERTY)
            .is_some_and(|v| v == CLEAN_ON_FIRST_INIT);

        Ok(Prepared {
            original,
            decoration,
            variables,
            properties,
            storage,
            clean_storage,
            factory,
        })
    }

    fn deploy(
        &mut self,
        prepared: Prepared,
        slot: &mut Deployment,
        undo: &mut UndoLog,
    ) -> Result<LaunchResult, CoreError> {
        let Prepared {
            original,
            decoration,
            variables,
            properties,
            storage,
            factory,
            ..
        } = prepared;
        let manifest = decoration.manifest;
        let hints = decoration.hints;

        let container = factory.create(&properties)?;
        slot.container = Some(Arc::clone(&container));
        container.init(&properties)?;
        self.advance(LaunchState::ContainerInitialized)?;
        let listener = container.add_listener(Arc::new(ModuleEventLogger));
        slot.listener = Some(listener);

        if let Some(rank) = hints.module_rank {
            container.set_default_module_rank(rank)?;
        }
        let mut modules = Vec::with_capacity(manifest.modules.len());
        let mut aliases = Vec::new();
        for reference in &manifest.modules {
            let id = &reference.id;
            let mut stream = self
                .sources
                .get(id)
                .ok_or_else(|| CoreError::ArtifactNotFound(id.clone()))?;
            match container.install(&id.to_string(), &mut stream) {
                Ok(handle) => {
                    undo.push(UndoStep::UninstallModule(handle.clone()));
                    if let Some(rank) = reference.activation_rank()? {
                        container.set_module_rank(&handle, rank)?;
                    }
                    debug!("installed module {handle}");
                    modules.push(handle);
                }
                Err(RuntimeError::DuplicateIdentity { existing, .. }) => {
                    warn!("module {id} duplicates {existing}; keeping the existing module");
                    aliases.push((id.clone(), *existing));
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.advance(LaunchState::ModulesInstalled)?;

        let watcher = (!manifest.configurations.is_empty())
            .then(|| ConfigurationWatcher::watch(&container, &manifest, variables));
        slot.watcher.clone_from(&watcher);

        container.start()?;
        let policy = self.settings.registry_wait();
        if policy == RegistryWait::Synchronous && watcher.is_some() && container.registry().is_none()
        {
            let handle = self.install_default_registry(container.as_ref(), undo)?;
            modules.insert(0, handle);
        }
        for handle in modules.iter().filter(|h| !h.fragment) {
            container.start_module(handle)?;
        }
        self.advance(LaunchState::Started)?;

        if let Some(rank) = hints.host_rank {
            apply_host_rank(container.as_ref(), rank)?;
        }

        if let Some(watcher) = &watcher {
            if watcher.wait(policy) {
                info!("manifest configurations created");
            } else {
                match policy {
                    RegistryWait::Timed(timeout) => warn!(
                        "no configuration registry after {}ms; configurations will be created when one appears",
                        timeout.as_millis()
                    ),
                    RegistryWait::NoWait => {
                        debug!("not waiting for a configuration registry");
                    }
                    RegistryWait::Synchronous => {
                        warn!("container went away before configurations were created");
                    }
                }
            }
        }
        self.advance(LaunchState::Running)?;
        info!(
            "manifest {} running in container '{}' with {} modules",
            manifest.id,
            container.name(),
            modules.len()
        );

        Ok(LaunchResult {
            container,
            decorated: decoration.decorated,
            original,
            manifest,
            hints,
            modules,
            aliases,
            properties,
            storage,
            watcher,
            listener,
        })
    }

    fn install_default_registry(
        &self,
        container: &dyn Container,
        undo: &mut UndoLog,
    ) -> Result<ModuleHandle, CoreError> {
        let id = self
            .settings
            .default_registry_module
            .clone()
            .ok_or_else(|| CoreError::RegistryUnavailable(self.manifest.id.clone()))?;
        info!("installing default configuration registry {id}");
        let mut stream = self
            .sources
            .get(&id)
            .ok_or_else(|| CoreError::ArtifactNotFound(id.clone()))?;
        let handle = container.install(&id.to_string(), &mut stream)?;
        undo.push(UndoStep::UninstallModule(handle.clone()));
        Ok(handle)
    }
}
