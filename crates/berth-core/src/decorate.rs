//! Manifest decoration pipeline.
//!
//! Decorators run first, then one extension handler per extension present on
//! the manifest. Every step receives the manifest so far plus a builder
//! seeded from it, and must hand back either that exact manifest or one the
//! builder produced. Identity is checked by pointer, never by value.

use crate::handlers::builtin_handlers;
use crate::CoreError;
use berth_runtime::SourceChain;
use berth_schema::{ArtifactId, BuildSlot, Extension, Manifest, ManifestBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Launch-relevant facts collected by the built-in extension handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchHints {
    /// Artifact of the preferred container factory.
    pub preferred_factory: Option<ArtifactId>,
    pub host_properties: BTreeMap<String, String>,
    /// Host property keys declared with a double leading underscore.
    pub framework_keys: BTreeSet<String>,
    /// Single-underscore keys, kept for the caller and not passed to the host.
    pub custom_properties: BTreeMap<String, String>,
    /// Minimum host-wide activation rank.
    pub host_rank: Option<u32>,
    /// Default activation rank for installed modules.
    pub module_rank: Option<u32>,
}

/// What decorators and handlers may touch besides the manifest.
pub struct DecorationContext<'a> {
    pub sources: &'a mut SourceChain,
    pub hints: &'a mut LaunchHints,
}

pub trait Decorator: Send + Sync {
    fn name(&self) -> &str;

    /// Return `manifest` itself or a value built by `builder`.
    fn decorate(
        &self,
        manifest: &Arc<Manifest>,
        builder: &mut ManifestBuilder,
        context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError>;
}

pub trait ExtensionHandler: Send + Sync {
    /// Same identity contract as [`Decorator::decorate`].
    fn handle(
        &self,
        manifest: &Arc<Manifest>,
        extension: &Extension,
        builder: &mut ManifestBuilder,
        context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError>;
}

#[derive(Debug, Clone)]
pub struct Decoration {
    pub manifest: Arc<Manifest>,
    pub hints: LaunchHints,
    /// True when any step replaced the input manifest.
    pub decorated: bool,
}

/// Run decorators, then extension handlers, over `manifest`.
///
/// Built-in handlers always serve their reserved names; caller handlers
/// registered under those names are ignored. An extension of kind
/// `mandatory` without a handler aborts.
pub fn decorate(
    manifest: Arc<Manifest>,
    sources: &mut SourceChain,
    decorators: &[Arc<dyn Decorator>],
    handlers: &BTreeMap<String, Arc<dyn ExtensionHandler>>,
) -> Result<Decoration, CoreError> {
    let original = Arc::clone(&manifest);
    let mut current = manifest;
    let mut hints = LaunchHints::default();

    for decorator in decorators {
        let mut builder = ManifestBuilder::from_manifest(&current);
        let slot = builder.slot();
        let mut context = DecorationContext {
            sources: &mut *sources,
            hints: &mut hints,
        };
        let output = decorator.decorate(&current, &mut builder, &mut context)?;
        current = accept(&current, output, &slot, &format!("decorator '{}'", decorator.name()))?;
    }

    let handlers = effective_handlers(handlers);
    let names: Vec<String> = current.extensions.keys().cloned().collect();
    for name in names {
        let Some(extension) = current.extensions.get(&name).cloned() else {
            debug!("extension '{name}' was removed by an earlier handler");
            continue;
        };
        match handlers.get(&name) {
            Some(handler) => {
                let mut builder = ManifestBuilder::from_manifest(&current);
                let slot = builder.slot();
                let mut context = DecorationContext {
                    sources: &mut *sources,
                    hints: &mut hints,
                };
                let output = handler.handle(&current, &extension, &mut builder, &mut context)?;
                current = accept(&current, output, &slot, &format!("handler for '{name}'"))?;
            }
            None if extension.is_mandatory() => {
                return Err(CoreError::Abort(format!(
                    "manifest {} requires extension '{name}' which no handler understands",
                    current.id
                )));
            }
            None => debug!("no handler for optional extension '{name}'"),
        }
    }

    let decorated = !Arc::ptr_eq(&original, &current);
    Ok(Decoration {
        manifest: current,
        hints,
        decorated,
    })
}

fn accept(
    input: &Arc<Manifest>,
    output: Arc<Manifest>,
    slot: &BuildSlot,
    step: &str,
) -> Result<Arc<Manifest>, CoreError> {
    if Arc::ptr_eq(input, &output) || slot.produced(&output) {
        Ok(output)
    } else {
        Err(CoreError::Abort(format!(
            "{step} returned neither the original nor built manifest"
        )))
    }
}

fn effective_handlers(
    caller: &BTreeMap<String, Arc<dyn ExtensionHandler>>,
) -> BTreeMap<String, Arc<dyn ExtensionHandler>> {
    let mut handlers = builtin_handlers();
    for (name, handler) in caller {
        if handlers.contains_key(name) {
            warn!("ignoring caller handler for reserved extension '{name}'");
        } else {
            handlers.insert(name.clone(), Arc::clone(handler));
        }
    }
    handlers
}
