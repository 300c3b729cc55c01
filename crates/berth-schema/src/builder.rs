use crate::coordinate::ArtifactId;
use crate::manifest::{Configuration, Extension, Manifest, ModuleRef};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Handle onto everything a [`ManifestBuilder`] has built so far.
///
/// Cloning a slot shares it; the pipeline keeps one clone while the builder
/// itself is handed to a decorator.
#[derive(Debug, Clone, Default)]
pub struct BuildSlot(Arc<Mutex<Vec<Arc<Manifest>>>>);

impl BuildSlot {
    /// True if `candidate` is one of the exact manifests built through this
    /// slot (pointer identity, not structural equality).
    pub fn produced(&self, candidate: &Arc<Manifest>) -> bool {
        self.0
            .lock()
            .map(|built| built.iter().any(|m| Arc::ptr_eq(m, candidate)))
            .unwrap_or(false)
    }

    fn record(&self, manifest: &Arc<Manifest>) {
        if let Ok(mut built) = self.0.lock() {
            built.push(Arc::clone(manifest));
        }
    }
}

/// Mutable draft of a manifest, seeded from an existing one.
#[derive(Debug)]
pub struct ManifestBuilder {
    draft: Manifest,
    slot: BuildSlot,
}

impl ManifestBuilder {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self {
            draft: manifest.clone(),
            slot: BuildSlot::default(),
        }
    }

    pub fn slot(&self) -> BuildSlot {
        self.slot.clone()
    }

    /// Direct access to the draft for edits the helpers don't cover.
    pub fn draft_mut(&mut self) -> &mut Manifest {
        &mut self.draft
    }

    pub fn draft(&self) -> &Manifest {
        &self.draft
    }

    pub fn set_id(&mut self, id: ArtifactId) -> &mut Self {
        self.draft.id = id;
        self
    }

    pub fn set_name(&mut self, name: Option<String>) -> &mut Self {
        self.draft.name = name;
        self
    }

    pub fn set_description(&mut self, description: Option<String>) -> &mut Self {
        self.draft.description = description;
        self
    }

    pub fn set_complete(&mut self, complete: bool) -> &mut Self {
        self.draft.complete = complete;
        self
    }

    pub fn add_module(&mut self, module: ModuleRef) -> &mut Self {
        self.draft.modules.push(module);
        self
    }

    /// Remove every module with the given coordinate, keeping the order of
    /// the rest.
    pub fn remove_module(&mut self, id: &ArtifactId) -> &mut Self {
        self.draft.modules.retain(|m| &m.id != id);
        self
    }

    pub fn add_category(&mut self, category: &str) -> &mut Self {
        self.draft.categories.insert(category.to_owned());
        self
    }

    pub fn add_configuration(&mut self, configuration: Configuration) -> &mut Self {
        self.draft
            .configurations
            .insert(configuration.pid.clone(), configuration);
        self
    }

    pub fn remove_configuration(&mut self, pid: &str) -> &mut Self {
        self.draft.configurations.remove(pid);
        self
    }

    pub fn add_extension(&mut self, extension: Extension) -> &mut Self {
        self.draft
            .extensions
            .insert(extension.name.clone(), extension);
        self
    }

    pub fn remove_extension(&mut self, name: &str) -> &mut Self {
        self.draft.extensions.remove(name);
        self
    }

    pub fn set_variable(&mut self, name: &str, value: Value) -> &mut Self {
        self.draft.variables.insert(name.to_owned(), value);
        self
    }

    /// Snapshot the draft. The result is recorded in this builder's slot.
    pub fn build(&self) -> Arc<Manifest> {
        let manifest = Arc::new(self.draft.clone());
        self.slot.record(&manifest);
        manifest
    }
}
