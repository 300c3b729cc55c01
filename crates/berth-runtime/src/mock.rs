//! In-memory container, registry, artifact source and factory.
//!
//! Module artifacts served to the mock container are JSON
//! [`ModuleDescriptor`]s; the container reads symbolic identity and flags
//! from them the way a real host reads module metadata.

use crate::container::{
    Container, ContainerEvent, ContainerListener, HostProperties, ListenerId, ModuleHandle,
    ModuleState, RankAck,
};
use crate::factory::ContainerFactory;
use crate::registry::{ConfigRecord, ConfigRegistry};
use crate::source::ArtifactSource;
use crate::RuntimeError;
use berth_schema::{ArtifactId, Pid, Properties, SymbolicName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Metadata of a module artifact understood by [`MockContainer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub symbolic_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub fragment: bool,
    /// Starting this module publishes the configuration registry.
    #[serde(default)]
    pub provides_registry: bool,
}

fn default_version() -> String {
    "0.0.0".to_owned()
}

impl ModuleDescriptor {
    pub fn new(symbolic_name: &str) -> Self {
        Self {
            symbolic_name: symbolic_name.to_owned(),
            version: default_version(),
            fragment: false,
            provides_registry: false,
        }
    }

    #[must_use]
    pub fn fragment(mut self) -> Self {
        self.fragment = true;
        self
    }

    #[must_use]
    pub fn registry_provider(mut self) -> Self {
        self.provides_registry = true;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

struct MockModule {
    handle: ModuleHandle,
    state: ModuleState,
    rank: u32,
    provides_registry: bool,
}

#[derive(Default)]
struct MockState {
    initialized: bool,
    running: bool,
    stopped: bool,
    properties: HostProperties,
    modules: BTreeMap<u64, MockModule>,
    next_id: u64,
    default_rank: u32,
    host_rank: u32,
    registry_published: bool,
    failing_installs: BTreeSet<String>,
    failing_starts: BTreeSet<String>,
    failing_uninstalls: BTreeSet<String>,
    journal: Vec<String>,
}

pub struct MockContainer {
    name: String,
    state: Mutex<MockState>,
    stop_signal: Condvar,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ContainerListener>)>>,
    next_listener: AtomicU64,
    registry: Arc<MockRegistry>,
}

impl Default for MockContainer {
    fn default() -> Self {
        Self::named("mock")
    }
}

impl MockContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Mutex::new(MockState {
                default_rank: 1,
                ..MockState::default()
            }),
            stop_signal: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            registry: Arc::new(MockRegistry::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::InvalidState(format!("mutex poisoned: {e}")))
    }

    fn listeners(&self) -> Vec<Arc<dyn ContainerListener>> {
        self.listeners
            .lock()
            .map(|l| l.iter().map(|(_, listener)| Arc::clone(listener)).collect())
            .unwrap_or_default()
    }

    fn notify(&self, event: &ContainerEvent) {
        for listener in self.listeners() {
            listener.on_event(event);
        }
    }

    /// Install a module as if some other party had done it, outside any
    /// Berth operation.
    pub fn preinstall(
        &self,
        location: &str,
        descriptor: &ModuleDescriptor,
    ) -> Result<ModuleHandle, RuntimeError> {
        let mut state = self.lock()?;
        let handle = Self::insert_module(&mut state, location, descriptor);
        Ok(handle)
    }

    fn insert_module(
        state: &mut MockState,
        location: &str,
        descriptor: &ModuleDescriptor,
    ) -> ModuleHandle {
        state.next_id += 1;
        let handle = ModuleHandle {
            id: state.next_id,
            symbolic_name: SymbolicName::new(descriptor.symbolic_name.clone()),
            version: descriptor.version.clone(),
            location: location.to_owned(),
            fragment: descriptor.fragment,
        };
        let rank = state.default_rank;
        state.modules.insert(
            handle.id,
            MockModule {
                handle: handle.clone(),
                state: ModuleState::Installed,
                rank,
                provides_registry: descriptor.provides_registry,
            },
        );
        handle
    }

    /// Publish the configuration registry, as a module providing it would.
    pub fn publish_registry(&self) {
        let newly = match self.lock() {
            Ok(mut state) => !std::mem::replace(&mut state.registry_published, true),
            Err(_) => false,
        };
        if newly {
            let registry: Arc<dyn ConfigRegistry> = self.registry.clone();
            self.notify(&ContainerEvent::RegistryAvailable(registry));
        }
    }

    pub fn withdraw_registry(&self) {
        let was = match self.lock() {
            Ok(mut state) => std::mem::replace(&mut state.registry_published, false),
            Err(_) => false,
        };
        if was {
            self.notify(&ContainerEvent::RegistryWithdrawn);
        }
    }

    /// The registry instance, published or not.
    pub fn registry_handle(&self) -> Arc<MockRegistry> {
        Arc::clone(&self.registry)
    }

    /// Make every install from `location` fail.
    pub fn fail_install(&self, location: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_installs.insert(location.to_owned());
        }
    }

    /// Make every start of the module installed from `location` fail.
    pub fn fail_start(&self, location: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_starts.insert(location.to_owned());
        }
    }

    /// Make every uninstall of the module installed from `location` fail.
    /// The module stays installed.
    pub fn fail_uninstall(&self, location: &str) {
        if let Ok(mut state) = self.lock() {
            state.failing_uninstalls.insert(location.to_owned());
        }
    }

    /// Number of registered container listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or_default()
    }

    /// Ordered record of lifecycle calls, e.g. `install g:a:1`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().map(|s| s.journal.clone()).unwrap_or_default()
    }

    pub fn properties(&self) -> HostProperties {
        self.lock().map(|s| s.properties.clone()).unwrap_or_default()
    }

    pub fn host_rank(&self) -> u32 {
        self.lock().map(|s| s.host_rank).unwrap_or_default()
    }

    pub fn default_rank(&self) -> u32 {
        self.lock().map(|s| s.default_rank).unwrap_or_default()
    }

    pub fn module_rank(&self, module: &ModuleHandle) -> Option<u32> {
        let state = self.lock().ok()?;
        state.modules.get(&module.id).map(|m| m.rank)
    }

    pub fn is_running(&self) -> bool {
        self.lock().map(|s| s.running).unwrap_or(false)
    }

    pub fn find_by_location(&self, location: &str) -> Option<ModuleHandle> {
        let state = self.lock().ok()?;
        state
            .modules
            .values()
            .find(|m| m.handle.location == location)
            .map(|m| m.handle.clone())
    }

    /// Locations of active modules, in install order.
    pub fn active_locations(&self) -> Vec<String> {
        self.lock()
            .map(|s| {
                s.modules
                    .values()
                    .filter(|m| m.state == ModuleState::Active)
                    .map(|m| m.handle.location.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn module_count(&self) -> usize {
        self.lock().map(|s| s.modules.len()).unwrap_or_default()
    }
}

impl Container for MockContainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&self, properties: &HostProperties) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        state.initialized = true;
        state.stopped = false;
        state.properties = properties.clone();
        state.journal.push("init".to_owned());
        Ok(())
    }

    fn start(&self) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        if !state.initialized {
            return Err(RuntimeError::InvalidState(
                "container must be initialized before start".to_owned(),
            ));
        }
        state.running = true;
        state.journal.push("start".to_owned());
        Ok(())
    }

    fn stop(&self) -> Result<(), RuntimeError> {
        {
            let mut state = self.lock()?;
            state.running = false;
            state.stopped = true;
            for module in state.modules.values_mut() {
                if module.state == ModuleState::Active {
                    module.state = ModuleState::Resolved;
                }
            }
            state.journal.push("stop".to_owned());
        }
        self.stop_signal.notify_all();
        self.notify(&ContainerEvent::Stopped);
        Ok(())
    }

    fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<bool, RuntimeError> {
        let state = self.lock()?;
        let poisoned = |e: String| RuntimeError::InvalidState(format!("mutex poisoned: {e}"));
        match timeout {
            None => {
                let _state = self
                    .stop_signal
                    .wait_while(state, |s| !s.stopped)
                    .map_err(|e| poisoned(e.to_string()))?;
                Ok(true)
            }
            Some(limit) => {
                let (_state, result) = self
                    .stop_signal
                    .wait_timeout_while(state, limit, |s| !s.stopped)
                    .map_err(|e| poisoned(e.to_string()))?;
                Ok(!result.timed_out())
            }
        }
    }

    fn install(&self, location: &str, content: &mut dyn Read) -> Result<ModuleHandle, RuntimeError> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;
        let descriptor: ModuleDescriptor =
            serde_json::from_slice(&bytes).map_err(|e| RuntimeError::InstallFailed {
                location: location.to_owned(),
                reason: format!("unreadable module metadata: {e}"),
            })?;

        let handle = {
            let mut state = self.lock()?;
            if !state.initialized {
                return Err(RuntimeError::InvalidState(
                    "container must be initialized before installing modules".to_owned(),
                ));
            }
            if state.failing_installs.contains(location) {
                return Err(RuntimeError::InstallFailed {
                    location: location.to_owned(),
                    reason: "rejected by container".to_owned(),
                });
            }
            if let Some(existing) = state
                .modules
                .values()
                .find(|m| m.handle.symbolic_name == descriptor.symbolic_name.as_str())
            {
                return Err(RuntimeError::DuplicateIdentity {
                    location: location.to_owned(),
                    symbolic_name: existing.handle.symbolic_name.clone(),
                    existing: Box::new(existing.handle.clone()),
                });
            }
            let handle = Self::insert_module(&mut state, location, &descriptor);
            state.journal.push(format!("install {location}"));
            handle
        };
        self.notify(&ContainerEvent::ModuleInstalled(handle.clone()));
        Ok(handle)
    }

    fn start_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError> {
        let publishes = {
            let mut state = self.lock()?;
            let failing = state.failing_starts.contains(&module.location);
            let entry = state
                .modules
                .get_mut(&module.id)
                .ok_or_else(|| RuntimeError::ModuleNotFound(module.location.clone()))?;
            if entry.handle.fragment {
                return Err(RuntimeError::ModuleFailed {
                    module: module.location.clone(),
                    reason: "fragments cannot be started".to_owned(),
                });
            }
            if failing {
                return Err(RuntimeError::ModuleFailed {
                    module: module.location.clone(),
                    reason: "activation failed".to_owned(),
                });
            }
            entry.state = ModuleState::Active;
            let publishes = entry.provides_registry;
            state.journal.push(format!("start {}", module.location));
            publishes
        };
        self.notify(&ContainerEvent::ModuleStarted(module.clone()));
        if publishes {
            self.publish_registry();
        }
        Ok(())
    }

    fn stop_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError> {
        let withdraws = {
            let mut state = self.lock()?;
            let entry = state
                .modules
                .get_mut(&module.id)
                .ok_or_else(|| RuntimeError::ModuleNotFound(module.location.clone()))?;
            let was_active = entry.state == ModuleState::Active;
            if was_active {
                entry.state = ModuleState::Resolved;
            }
            let withdraws = was_active && entry.provides_registry;
            state.journal.push(format!("stop {}", module.location));
            withdraws
        };
        self.notify(&ContainerEvent::ModuleStopped(module.clone()));
        if withdraws {
            self.withdraw_registry();
        }
        Ok(())
    }

    fn uninstall_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError> {
        {
            let mut state = self.lock()?;
            if state.failing_uninstalls.contains(&module.location) {
                return Err(RuntimeError::ModuleFailed {
                    module: module.location.clone(),
                    reason: "uninstall refused".to_owned(),
                });
            }
            if state.modules.remove(&module.id).is_none() {
                return Err(RuntimeError::ModuleNotFound(module.location.clone()));
            }
            state.journal.push(format!("uninstall {}", module.location));
        }
        self.notify(&ContainerEvent::ModuleUninstalled(module.clone()));
        Ok(())
    }

    /// Modules this container no longer knows report `Uninstalled`.
    fn module_state(&self, module: &ModuleHandle) -> Result<ModuleState, RuntimeError> {
        let state = self.lock()?;
        Ok(state
            .modules
            .get(&module.id)
            .map_or(ModuleState::Uninstalled, |m| m.state))
    }

    fn set_module_rank(&self, module: &ModuleHandle, rank: u32) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        let entry = state
            .modules
            .get_mut(&module.id)
            .ok_or_else(|| RuntimeError::ModuleNotFound(module.location.clone()))?;
        entry.rank = rank;
        Ok(())
    }

    fn set_default_module_rank(&self, rank: u32) -> Result<(), RuntimeError> {
        self.lock()?.default_rank = rank;
        Ok(())
    }

    fn set_host_rank(&self, rank: u32, ack: RankAck) -> Result<(), RuntimeError> {
        {
            let mut state = self.lock()?;
            state.host_rank = rank;
            state.journal.push(format!("host-rank {rank}"));
        }
        let listeners = self.listeners();
        // Acknowledge from a separate thread, the way a real host applies
        // rank changes asynchronously.
        std::thread::spawn(move || {
            let event = ContainerEvent::HostRankChanged(rank);
            for listener in listeners {
                listener.on_event(&event);
            }
            ack();
        });
        Ok(())
    }

    fn existing_modules(&self) -> Result<Vec<ModuleHandle>, RuntimeError> {
        let state = self.lock()?;
        Ok(state.modules.values().map(|m| m.handle.clone()).collect())
    }

    fn registry(&self) -> Option<Arc<dyn ConfigRegistry>> {
        let published = self.lock().map(|s| s.registry_published).unwrap_or(false);
        if published {
            let registry: Arc<dyn ConfigRegistry> = self.registry.clone();
            Some(registry)
        } else {
            None
        }
    }

    fn add_listener(&self, listener: Arc<dyn ContainerListener>) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, listener));
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(existing, _)| *existing != id);
        }
    }
}

/// In-memory configuration registry.
#[derive(Default)]
pub struct MockRegistry {
    entries: Mutex<BTreeMap<Pid, ConfigRecord>>,
    failing_updates: Mutex<BTreeSet<String>>,
}

impl MockRegistry {
    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Pid, ConfigRecord>>, RuntimeError> {
        self.entries
            .lock()
            .map_err(|e| RuntimeError::Registry(format!("mutex poisoned: {e}")))
    }

    fn fetch_or_create(
        &self,
        pid: Pid,
        factory_pid: Option<&str>,
        location: &str,
    ) -> Result<ConfigRecord, RuntimeError> {
        let mut entries = self.lock()?;
        let record = entries.entry(pid.clone()).or_insert_with(|| ConfigRecord {
            pid,
            factory_pid: factory_pid.map(str::to_owned),
            location: Some(location.to_owned()),
            properties: None,
            read_only: false,
        });
        Ok(record.clone())
    }

    /// Store a configuration as if another party had created it.
    pub fn seed(&self, pid: &str, properties: Properties) {
        if let Ok(mut entries) = self.lock() {
            let pid = Pid::new(pid);
            let factory_pid = pid.split_factory().map(|(fp, _)| fp.to_owned());
            entries.insert(
                pid.clone(),
                ConfigRecord {
                    pid,
                    factory_pid,
                    location: None,
                    properties: Some(properties),
                    read_only: false,
                },
            );
        }
    }

    pub fn set_read_only(&self, pid: &str) {
        if let Ok(mut entries) = self.lock() {
            let pid = Pid::new(pid);
            let factory_pid = pid.split_factory().map(|(fp, _)| fp.to_owned());
            entries
                .entry(pid.clone())
                .or_insert_with(|| ConfigRecord {
                    pid,
                    factory_pid,
                    location: None,
                    properties: None,
                    read_only: false,
                })
                .read_only = true;
        }
    }

    pub fn fail_updates_for(&self, pid: &str) {
        if let Ok(mut failing) = self.failing_updates.lock() {
            failing.insert(pid.to_owned());
        }
    }

    pub fn properties(&self, pid: &str) -> Option<Properties> {
        self.lock().ok()?.get(pid)?.properties.clone()
    }

    pub fn contains(&self, pid: &str) -> bool {
        self.lock().map(|e| e.contains_key(pid)).unwrap_or(false)
    }
}

impl ConfigRegistry for MockRegistry {
    fn configuration(&self, pid: &str, location: &str) -> Result<ConfigRecord, RuntimeError> {
        self.fetch_or_create(Pid::new(pid), None, location)
    }

    fn factory_configuration(
        &self,
        factory_pid: &str,
        name: &str,
        location: &str,
    ) -> Result<ConfigRecord, RuntimeError> {
        self.fetch_or_create(Pid::factory(factory_pid, name), Some(factory_pid), location)
    }

    fn find(&self, pid: &str) -> Result<Option<ConfigRecord>, RuntimeError> {
        let entries = self.lock()?;
        Ok(entries
            .get(pid)
            .filter(|r| r.properties.is_some())
            .cloned())
    }

    fn update(&self, pid: &str, properties: &Properties) -> Result<(), RuntimeError> {
        let failing = self
            .failing_updates
            .lock()
            .map(|f| f.contains(pid))
            .unwrap_or(false);
        if failing {
            return Err(RuntimeError::Registry(format!("update of {pid} rejected")));
        }
        let mut entries = self.lock()?;
        let record = entries
            .get_mut(pid)
            .ok_or_else(|| RuntimeError::Registry(format!("no configuration {pid}")))?;
        if record.read_only {
            return Err(RuntimeError::Registry(format!("{pid} is read-only")));
        }
        record.properties = Some(properties.clone());
        Ok(())
    }

    fn delete(&self, pid: &str) -> Result<(), RuntimeError> {
        self.lock()?.remove(pid);
        Ok(())
    }

    fn list(&self) -> Result<Vec<ConfigRecord>, RuntimeError> {
        let entries = self.lock()?;
        Ok(entries
            .values()
            .filter(|r| r.properties.is_some())
            .cloned()
            .collect())
    }
}

/// Artifact source backed by a map.
pub struct MemorySource {
    name: String,
    artifacts: Mutex<BTreeMap<ArtifactId, Vec<u8>>>,
    paths: Mutex<BTreeMap<ArtifactId, PathBuf>>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            artifacts: Mutex::new(BTreeMap::new()),
            paths: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, id: &ArtifactId, content: Vec<u8>) {
        if let Ok(mut artifacts) = self.artifacts.lock() {
            artifacts.insert(id.clone(), content);
        }
    }

    pub fn insert_module(&self, id: &ArtifactId, descriptor: &ModuleDescriptor) {
        self.insert(id, descriptor.to_bytes());
    }

    pub fn insert_path(&self, id: &ArtifactId, path: PathBuf) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.insert(id.clone(), path);
        }
    }
}

impl ArtifactSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: &ArtifactId) -> Result<Option<Box<dyn Read + Send>>, RuntimeError> {
        let artifacts = self.artifacts.lock().map_err(|e| RuntimeError::Source {
            source_name: self.name.clone(),
            reason: format!("mutex poisoned: {e}"),
        })?;
        Ok(artifacts
            .get(id)
            .map(|bytes| Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>))
    }

    fn path_for(&self, id: &ArtifactId) -> Option<PathBuf> {
        self.paths.lock().ok()?.get(id).cloned()
    }
}

/// Factory that always hands out the same mock container.
pub struct MockFactory {
    name: String,
    container: Arc<MockContainer>,
}

impl MockFactory {
    pub fn new(container: Arc<MockContainer>) -> Self {
        Self {
            name: "mock".to_owned(),
            container,
        }
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            container: Arc::new(MockContainer::named(name)),
        }
    }

    pub fn container(&self) -> Arc<MockContainer> {
        Arc::clone(&self.container)
    }
}

impl ContainerFactory for MockFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _properties: &HostProperties) -> Result<Arc<dyn Container>, RuntimeError> {
        let container: Arc<dyn Container> = self.container.clone();
        Ok(container)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn install(container: &MockContainer, location: &str, descriptor: &ModuleDescriptor) -> ModuleHandle {
        let bytes = descriptor.to_bytes();
        container.install(location, &mut bytes.as_slice()).unwrap()
    }

    struct Recorder(Mutex<Vec<String>>);

    impl ContainerListener for Recorder {
        fn on_event(&self, event: &ContainerEvent) {
            self.0.lock().unwrap().push(format!("{event:?}"));
        }
    }

    #[test]
    fn mock_lifecycle() {
        let container = MockContainer::new();
        container.init(&HostProperties::new()).unwrap();
        container.start().unwrap();
        let module = install(&container, "g:a:1", &ModuleDescriptor::new("a"));
        assert_eq!(container.module_state(&module).unwrap(), ModuleState::Installed);

        container.start_module(&module).unwrap();
        assert_eq!(container.module_state(&module).unwrap(), ModuleState::Active);

        container.stop_module(&module).unwrap();
        container.uninstall_module(&module).unwrap();
        assert_eq!(
            container.module_state(&module).unwrap(),
            ModuleState::Uninstalled
        );
        assert_eq!(
            container.journal(),
            ["init", "start", "install g:a:1", "start g:a:1", "stop g:a:1", "uninstall g:a:1"]
        );
    }

    #[test]
    fn refused_uninstall_keeps_module() {
        let container = MockContainer::new();
        container.init(&HostProperties::new()).unwrap();
        container.start().unwrap();
        let module = install(&container, "g:a:1", &ModuleDescriptor::new("a"));
        container.fail_uninstall("g:a:1");

        assert!(matches!(
            container.uninstall_module(&module),
            Err(RuntimeError::ModuleFailed { .. })
        ));
        assert_eq!(container.module_state(&module).unwrap(), ModuleState::Installed);
        assert!(!container.journal().contains(&"uninstall g:a:1".to_owned()));
    }

    #[test]
    fn install_requires_init() {
        let container = MockContainer::new();
        let bytes = ModuleDescriptor::new("a").to_bytes();
        assert!(container.install("g:a:1", &mut bytes.as_slice()).is_err());
        assert!(container.start().is_err());
    }

    #[test]
    fn duplicate_symbolic_name_is_reported() {
        let container = MockContainer::new();
        container.init(&HostProperties::new()).unwrap();
        let existing = container
            .preinstall("g:a:1", &ModuleDescriptor::new("a"))
            .unwrap();
        let bytes = ModuleDescriptor::new("a").to_bytes();
        match container.install("g:a-copy:1", &mut bytes.as_slice()) {
            Err(RuntimeError::DuplicateIdentity { existing: found, .. }) => {
                assert_eq!(*found, existing);
            }
            other => panic!("expected duplicate identity, got {other:?}"),
        }
    }

    #[test]
    fn garbage_content_fails_install() {
        let container = MockContainer::new();
        container.init(&HostProperties::new()).unwrap();
        let err = container
            .install("g:a:1", &mut b"not json".as_slice())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InstallFailed { .. }));
    }

    #[test]
    fn fragments_cannot_start() {
        let container = MockContainer::new();
        container.init(&HostProperties::new()).unwrap();
        let fragment = install(&container, "g:f:1", &ModuleDescriptor::new("f").fragment());
        assert!(fragment.fragment);
        assert!(container.start_module(&fragment).is_err());
    }

    #[test]
    fn registry_provider_publishes_on_start() {
        let container = MockContainer::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        container.add_listener(recorder.clone());
        container.init(&HostProperties::new()).unwrap();
        let provider = install(
            &container,
            "g:registry:1",
            &ModuleDescriptor::new("registry").registry_provider(),
        );
        assert!(container.registry().is_none());

        container.start_module(&provider).unwrap();
        assert!(container.registry().is_some());
        assert!(recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| e == "RegistryAvailable"));

        container.stop_module(&provider).unwrap();
        assert!(container.registry().is_none());
    }

    #[test]
    fn removed_listener_is_silent() {
        let container = MockContainer::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = container.add_listener(recorder.clone());
        container.remove_listener(id);
        container.publish_registry();
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn host_rank_ack_arrives() {
        let container = MockContainer::new();
        let (tx, rx) = mpsc::sync_channel(1);
        container
            .set_host_rank(
                12,
                Box::new(move || {
                    let _ = tx.send(());
                }),
            )
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(container.host_rank(), 12);
    }

    #[test]
    fn wait_for_stop_times_out_then_succeeds() {
        let container = Arc::new(MockContainer::new());
        container.init(&HostProperties::new()).unwrap();
        assert!(!container
            .wait_for_stop(Some(Duration::from_millis(20)))
            .unwrap());

        let stopper = Arc::clone(&container);
        let handle = std::thread::spawn(move || stopper.stop().unwrap());
        assert!(container.wait_for_stop(None).unwrap());
        handle.join().unwrap();
    }

    #[test]
    fn registry_crud() {
        let registry = MockRegistry::default();
        let record = registry.configuration("a", "?").unwrap();
        assert!(record.properties.is_none());
        assert!(registry.find("a").unwrap().is_none());

        let mut props = Properties::new();
        props.insert("k".to_owned(), "v".into());
        registry.update("a", &props).unwrap();
        assert_eq!(registry.find("a").unwrap().unwrap().properties, Some(props));

        let factory = registry.factory_configuration("fp", "x", "?").unwrap();
        assert_eq!(factory.pid, "fp~x");
        assert_eq!(factory.factory_pid.as_deref(), Some("fp"));

        registry.set_read_only("ro");
        assert!(registry.configuration("ro", "?").unwrap().read_only);
        assert!(registry.update("ro", &Properties::new()).is_err());

        registry.delete("a").unwrap();
        assert!(registry.find("a").unwrap().is_none());
        assert_eq!(registry.list().unwrap().len(), 0);
    }

    #[test]
    fn factory_hands_out_shared_container() {
        let container = Arc::new(MockContainer::new());
        let factory = MockFactory::new(Arc::clone(&container));
        let created = factory.create(&HostProperties::new()).unwrap();
        created.init(&HostProperties::new()).unwrap();
        assert_eq!(container.journal(), ["init"]);
    }
}
