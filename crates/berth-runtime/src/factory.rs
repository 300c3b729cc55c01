use crate::container::{Container, HostProperties};
use crate::RuntimeError;
use berth_schema::ArtifactId;
use std::fmt;
use std::sync::Arc;

/// Creates container instances.
pub trait ContainerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, properties: &HostProperties) -> Result<Arc<dyn Container>, RuntimeError>;
}

/// Where a selected factory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryOrigin {
    /// Registered for the artifact a manifest's launch selector named.
    LaunchSelector,
    /// Found among the pluggable, discovered factories.
    Discovered,
    Default,
}

impl fmt::Display for FactoryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryOrigin::LaunchSelector => write!(f, "launch selector"),
            FactoryOrigin::Discovered => write!(f, "discovery"),
            FactoryOrigin::Default => write!(f, "default"),
        }
    }
}

/// Known container factories, consulted in a fixed order: the factory for
/// the preferred artifact, then discovered factories, then the default.
#[derive(Clone, Default)]
pub struct FactoryCatalog {
    by_artifact: Vec<(ArtifactId, Arc<dyn ContainerFactory>)>,
    discovered: Vec<Arc<dyn ContainerFactory>>,
    default: Option<Arc<dyn ContainerFactory>>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory implemented by the given artifact. Matching
    /// ignores the version.
    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactId, factory: Arc<dyn ContainerFactory>) -> Self {
        self.by_artifact.push((artifact, factory));
        self
    }

    #[must_use]
    pub fn with_discovered(mut self, factory: Arc<dyn ContainerFactory>) -> Self {
        self.discovered.push(factory);
        self
    }

    #[must_use]
    pub fn with_default(mut self, factory: Arc<dyn ContainerFactory>) -> Self {
        self.default = Some(factory);
        self
    }

    pub fn select(
        &self,
        preferred: Option<&ArtifactId>,
    ) -> Option<(FactoryOrigin, Arc<dyn ContainerFactory>)> {
        let from_selector = preferred.and_then(|wanted| {
            self.by_artifact
                .iter()
                .find(|(artifact, _)| artifact.same_artifact(wanted))
                .map(|(_, factory)| (FactoryOrigin::LaunchSelector, Arc::clone(factory)))
        });
        from_selector
            .or_else(|| {
                self.discovered
                    .first()
                    .map(|f| (FactoryOrigin::Discovered, Arc::clone(f)))
            })
            .or_else(|| {
                self.default
                    .as_ref()
                    .map(|f| (FactoryOrigin::Default, Arc::clone(f)))
            })
    }
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field(
                "by_artifact",
                &self
                    .by_artifact
                    .iter()
                    .map(|(a, fac)| format!("{a} => {}", fac.name()))
                    .collect::<Vec<_>>(),
            )
            .field(
                "discovered",
                &self.discovered.iter().map(|f| f.name()).collect::<Vec<_>>(),
            )
            .field("default", &self.default.as_ref().map(|f| f.name()))
            .finish()
    }
}
