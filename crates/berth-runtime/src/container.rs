use crate::registry::ConfigRegistry;
use crate::RuntimeError;
use berth_schema::{ArtifactId, SymbolicName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

/// Launch properties handed to a container on `init`.
pub type HostProperties = BTreeMap<String, String>;

/// Callback a container invokes exactly once when a host rank change has
/// been applied.
pub type RankAck = Box<dyn FnOnce() + Send>;

/// A live module inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleHandle {
    /// Container-assigned id, unique for the container's lifetime.
    pub id: u64,
    pub symbolic_name: SymbolicName,
    pub version: String,
    /// The location string the module was installed from.
    pub location: String,
    /// Fragments are auxiliary units that are never started on their own.
    pub fragment: bool,
}

impl ModuleHandle {
    /// The coordinate the module was installed from, when its location is
    /// one.
    pub fn coordinate(&self) -> Option<ArtifactId> {
        self.location.parse().ok()
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}] ({})",
            self.symbolic_name, self.version, self.id, self.location
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ModuleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Installed => write!(f, "installed"),
            ModuleState::Resolved => write!(f, "resolved"),
            ModuleState::Starting => write!(f, "starting"),
            ModuleState::Active => write!(f, "active"),
            ModuleState::Stopping => write!(f, "stopping"),
            ModuleState::Uninstalled => write!(f, "uninstalled"),
        }
    }
}

/// Notifications a container delivers to registered listeners, usually on
/// one of its own threads.
#[derive(Clone)]
pub enum ContainerEvent {
    ModuleInstalled(ModuleHandle),
    ModuleStarted(ModuleHandle),
    ModuleStopped(ModuleHandle),
    ModuleUninstalled(ModuleHandle),
    ModuleError {
        module: Option<ModuleHandle>,
        message: String,
    },
    /// A configuration registry service became discoverable.
    RegistryAvailable(Arc<dyn ConfigRegistry>),
    RegistryWithdrawn,
    HostRankChanged(u32),
    Stopped,
}

impl fmt::Debug for ContainerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerEvent::ModuleInstalled(m) => f.debug_tuple("ModuleInstalled").field(m).finish(),
            ContainerEvent::ModuleStarted(m) => f.debug_tuple("ModuleStarted").field(m).finish(),
            ContainerEvent::ModuleStopped(m) => f.debug_tuple("ModuleStopped").field(m).finish(),
            ContainerEvent::ModuleUninstalled(m) => {
                f.debug_tuple("ModuleUninstalled").field(m).finish()
            }
            ContainerEvent::ModuleError { module, message } => f
                .debug_struct("ModuleError")
                .field("module", module)
                .field("message", message)
                .finish(),
            ContainerEvent::RegistryAvailable(_) => f.write_str("RegistryAvailable"),
            ContainerEvent::RegistryWithdrawn => f.write_str("RegistryWithdrawn"),
            ContainerEvent::HostRankChanged(rank) => {
                f.debug_tuple("HostRankChanged").field(rank).finish()
            }
            ContainerEvent::Stopped => f.write_str("Stopped"),
        }
    }
}

pub trait ContainerListener: Send + Sync {
    fn on_event(&self, event: &ContainerEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

/// The running modular host Berth drives.
///
/// Berth never assumes exclusive control: other parties may install modules
/// and publish services in the same container.
pub trait Container: Send + Sync {
    fn name(&self) -> &str;

    fn init(&self, properties: &HostProperties) -> Result<(), RuntimeError>;

    fn start(&self) -> Result<(), RuntimeError>;

    fn stop(&self) -> Result<(), RuntimeError>;

    /// Block until the container has stopped. Returns `false` if the timeout
    /// elapsed first.
    fn wait_for_stop(&self, timeout: Option<Duration>) -> Result<bool, RuntimeError>;

    /// Install a module from `location`, reading its content from `content`.
    ///
    /// Fails with [`RuntimeError::DuplicateIdentity`] when a module with the
    /// same symbolic identity is already present.
    fn install(&self, location: &str, content: &mut dyn Read) -> Result<ModuleHandle, RuntimeError>;

    fn start_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError>;

    fn stop_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError>;

    fn uninstall_module(&self, module: &ModuleHandle) -> Result<(), RuntimeError>;

    fn module_state(&self, module: &ModuleHandle) -> Result<ModuleState, RuntimeError>;

    fn set_module_rank(&self, module: &ModuleHandle, rank: u32) -> Result<(), RuntimeError>;

    /// Rank assigned to modules installed from now on.
    fn set_default_module_rank(&self, rank: u32) -> Result<(), RuntimeError>;

    /// Request a host-wide rank change. `ack` is invoked once the change has
    /// been applied, possibly on another thread.
    fn set_host_rank(&self, rank: u32, ack: RankAck) -> Result<(), RuntimeError>;

    fn existing_modules(&self) -> Result<Vec<ModuleHandle>, RuntimeError>;

    /// The configuration registry, if one is currently published.
    fn registry(&self) -> Option<Arc<dyn ConfigRegistry>>;

    fn add_listener(&self, listener: Arc<dyn ContainerListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}
