//! Creation of manifest configurations in a configuration registry that may
//! appear at any time, or never.
//!
//! A [`ConfigurationWatcher`] listens for the registry through container
//! events and an immediate poll, creates every configuration at most once,
//! and lets the launch path block on that creation under a [`RegistryWait`]
//! policy.

use crate::substitute::substitute_properties;
use crate::CoreError;
use berth_runtime::{
    ConfigRecord, ConfigRegistry, Container, ContainerEvent, ContainerListener, ListenerId,
    RuntimeError, DEFAULT_LOCATION,
};
use berth_schema::{Configuration, Manifest, Pid, Properties, Variables};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_REGISTRY_WAIT_MILLIS: i64 = 5000;

/// Interval of the synchronous policy's poll loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryWait {
    /// Block until configurations are created or the timeout elapses.
    Timed(Duration),
    /// Install the default registry module if needed, then poll until
    /// configurations are created.
    Synchronous,
    /// Return immediately; configurations are created whenever the registry
    /// shows up.
    NoWait,
}

impl RegistryWait {
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => RegistryWait::Synchronous,
            m if m < 0 => RegistryWait::NoWait,
            m => RegistryWait::Timed(Duration::from_millis(m.unsigned_abs())),
        }
    }
}

impl Default for RegistryWait {
    fn default() -> Self {
        Self::from_millis(DEFAULT_REGISTRY_WAIT_MILLIS)
    }
}

pub enum WriteOutcome {
    Written(ConfigRecord),
    ReadOnly,
}

/// Fetch or create the registry entry for `config` at the default location
/// and write `properties` into it. Read-only entries are left alone.
pub fn write_configuration(
    registry: &dyn ConfigRegistry,
    config: &Configuration,
    properties: &Properties,
) -> Result<WriteOutcome, RuntimeError> {
    let mut record = match (&config.factory_pid, config.name()) {
        (Some(factory_pid), Some(name)) => {
            registry.factory_configuration(factory_pid, name, DEFAULT_LOCATION)?
        }
        _ => registry.configuration(&config.pid, DEFAULT_LOCATION)?,
    };
    if record.read_only {
        return Ok(WriteOutcome::ReadOnly);
    }
    registry.update(&record.pid, properties)?;
    record.properties = Some(properties.clone());
    Ok(WriteOutcome::Written(record))
}

/// Per-pid result of one creation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreationReport {
    pub written: Vec<Pid>,
    pub read_only: Vec<Pid>,
    pub failed: Vec<Pid>,
}

#[derive(Default)]
struct WatchState {
    done: bool,
    report: CreationReport,
}

pub struct ConfigurationWatcher {
    configurations: Vec<Configuration>,
    variables: Variables,
    container: Weak<dyn Container>,
    state: Mutex<WatchState>,
    signal: Condvar,
    created: AtomicBool,
    listener: Mutex<Option<ListenerId>>,
}

struct WatcherListener(Weak<ConfigurationWatcher>);

impl ContainerListener for WatcherListener {
    fn on_event(&self, event: &ContainerEvent) {
        let Some(watcher) = self.0.upgrade() else {
            return;
        };
        match event {
            ContainerEvent::RegistryAvailable(registry) => watcher.create_all(registry.as_ref()),
            ContainerEvent::RegistryWithdrawn => debug!("configuration registry withdrawn"),
            _ => {}
        }
    }
}

impl ConfigurationWatcher {
    /// Start watching `container` for a registry to receive the manifest's
    /// configurations, substituted against `variables`.
    pub fn watch(
        container: &Arc<dyn Container>,
        manifest: &Manifest,
        variables: Variables,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            configurations: manifest.configurations.values().cloned().collect(),
            variables,
            container: Arc::downgrade(container),
            state: Mutex::new(WatchState::default()),
            signal: Condvar::new(),
            created: AtomicBool::new(false),
            listener: Mutex::new(None),
        });
        let id = container.add_listener(Arc::new(WatcherListener(Arc::downgrade(&watcher))));
        if let Ok(mut listener) = watcher.listener.lock() {
            *listener = Some(id);
        }
        debug!(
            "watching for a configuration registry ({} configurations)",
            watcher.configurations.len()
        );
        if let Some(registry) = container.registry() {
            watcher.create_all(registry.as_ref());
        }
        watcher
    }

    /// True once every configuration has been handed to the registry.
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> CreationReport {
        self.state
            .lock()
            .map(|s| s.report.clone())
            .unwrap_or_default()
    }

    /// Block according to `policy`. Returns whether configurations were
    /// created by the time it returns.
    pub fn wait(&self, policy: RegistryWait) -> bool {
        match policy {
            RegistryWait::NoWait => self.is_created(),
            RegistryWait::Timed(timeout) => {
                let Ok(state) = self.state.lock() else {
                    return self.is_created();
                };
                match self.signal.wait_timeout_while(state, timeout, |s| !s.done) {
                    Ok((state, _)) => state.done,
                    Err(_) => self.is_created(),
                }
            }
            RegistryWait::Synchronous => loop {
                if self.is_created() {
                    return true;
                }
                let Some(container) = self.container.upgrade() else {
                    return false;
                };
                if let Some(registry) = container.registry() {
                    self.create_all(registry.as_ref());
                    continue;
                }
                std::thread::sleep(POLL_INTERVAL);
            },
        }
    }

    /// Stop listening for the registry. Creation already done stays done.
    pub fn stop(&self) {
        let id = self.listener.lock().ok().and_then(|mut l| l.take());
        if let (Some(id), Some(container)) = (id, self.container.upgrade()) {
            container.remove_listener(id);
            debug!("configuration watcher stopped");
        }
    }

    fn create_all(&self, registry: &dyn ConfigRegistry) {
        let Ok(mut state) = self.state.lock() else {
            error!("configuration watcher state poisoned");
            return;
        };
        if state.done {
            return;
        }
        for config in &self.configurations {
            match self.create_one(registry, config) {
                Ok(WriteOutcome::Written(record)) => {
                    debug!("configuration {} written", record.pid);
                    state.report.written.push(config.pid.clone());
                }
                Ok(WriteOutcome::ReadOnly) => {
                    info!("configuration {} is read-only; skipped", config.pid);
                    state.report.read_only.push(config.pid.clone());
                }
                Err(e) => {
                    error!("failed to create configuration {}: {e}", config.pid);
                    state.report.failed.push(config.pid.clone());
                }
            }
        }
        state.done = true;
        self.created.store(true, Ordering::SeqCst);
        drop(state);
        self.signal.notify_all();
        self.stop();
    }

    fn create_one(
        &self,
        registry: &dyn ConfigRegistry,
        config: &Configuration,
    ) -> Result<WriteOutcome, CoreError> {
        let properties = substitute_properties(&config.properties, &self.variables)?;
        Ok(write_configuration(registry, config, &properties)?)
    }
}
