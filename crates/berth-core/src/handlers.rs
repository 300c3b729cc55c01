//! Built-in extension handlers. They never change the manifest; they only
//! collect [`LaunchHints`].

use crate::decorate::{DecorationContext, ExtensionHandler, LaunchHints};
use crate::CoreError;
use berth_schema::{Extension, Manifest, ManifestBuilder};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// ARTIFACTS extension naming the preferred container factory artifact.
pub const LAUNCH_SELECTOR: &str = "execution-environment";
/// JSON object of host launch properties.
pub const LAUNCH_PROPERTIES: &str = "framework-launching-properties";
/// JSON object with the `host` and `module` activation ranks.
pub const ACTIVATION_RANKS: &str = "activation-ranks";

pub const RESERVED_EXTENSIONS: [&str; 3] = [LAUNCH_SELECTOR, LAUNCH_PROPERTIES, ACTIVATION_RANKS];

pub fn builtin_handlers() -> BTreeMap<String, Arc<dyn ExtensionHandler>> {
    let mut handlers: BTreeMap<String, Arc<dyn ExtensionHandler>> = BTreeMap::new();
    handlers.insert(LAUNCH_SELECTOR.to_owned(), Arc::new(LaunchSelector));
    handlers.insert(LAUNCH_PROPERTIES.to_owned(), Arc::new(LaunchProperties));
    handlers.insert(ACTIVATION_RANKS.to_owned(), Arc::new(ActivationRanks));
    handlers
}

fn abort(extension: &Extension, reason: impl std::fmt::Display) -> CoreError {
    CoreError::Abort(format!("extension '{}': {reason}", extension.name))
}

fn json_object(extension: &Extension) -> Result<serde_json::Map<String, Value>, CoreError> {
    match extension.json_value().map_err(|e| abort(extension, e))? {
        Value::Object(map) => Ok(map),
        other => Err(abort(extension, format!("expected a JSON object, found {other}"))),
    }
}

pub struct LaunchSelector;

impl ExtensionHandler for LaunchSelector {
    fn handle(
        &self,
        manifest: &Arc<Manifest>,
        extension: &Extension,
        _builder: &mut ManifestBuilder,
        context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        let artifacts = extension.as_artifacts().map_err(|e| abort(extension, e))?;
        match artifacts.first() {
            Some(first) => {
                debug!("preferred container factory: {}", first.id);
                context.hints.preferred_factory = Some(first.id.clone());
            }
            None => debug!("launch selector of {} lists no artifacts", manifest.id),
        }
        Ok(Arc::clone(manifest))
    }
}

pub struct LaunchProperties;

impl LaunchProperties {
    fn collect(
        extension: &Extension,
        properties: &serde_json::Map<String, Value>,
        hints: &mut LaunchHints,
    ) -> Result<(), CoreError> {
        for (key, value) in properties {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Null => {
                    debug!("launch property '{key}' is null; skipped");
                    continue;
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(abort(extension, format!("property '{key}' must be a scalar")));
                }
            };
            if let Some(rest) = key.strip_prefix("__") {
                let host_key = format!("_{rest}");
                hints.framework_keys.insert(host_key.clone());
                hints.host_properties.insert(host_key, text);
            } else if key.starts_with('_') {
                hints.custom_properties.insert(key.clone(), text);
            } else {
                hints.host_properties.insert(key.clone(), text);
            }
        }
        Ok(())
    }
}

impl ExtensionHandler for LaunchProperties {
    fn handle(
        &self,
        manifest: &Arc<Manifest>,
        extension: &Extension,
        _builder: &mut ManifestBuilder,
        context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        let properties = json_object(extension)?;
        Self::collect(extension, &properties, context.hints)?;
        Ok(Arc::clone(manifest))
    }
}

pub struct ActivationRanks;

fn rank(extension: &Extension, key: &str, value: &Value) -> Result<u32, CoreError> {
    value
        .as_i64()
        .filter(|v| (1..=i64::from(i32::MAX)).contains(v))
        .map(|v| v as u32)
        .ok_or_else(|| {
            abort(
                extension,
                format!("'{key}' must be an integer between 1 and {}, found {value}", i32::MAX),
            )
        })
}

impl ExtensionHandler for ActivationRanks {
    fn handle(
        &self,
        manifest: &Arc<Manifest>,
        extension: &Extension,
        _builder: &mut ManifestBuilder,
        context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        for (key, value) in json_object(extension)? {
            match key.as_str() {
                "host" => context.hints.host_rank = Some(rank(extension, &key, &value)?),
                "module" => context.hints.module_rank = Some(rank(extension, &key, &value)?),
                other => warn!("unknown activation rank '{other}' in {}", manifest.id),
            }
        }
        Ok(Arc::clone(manifest))
    }
}
