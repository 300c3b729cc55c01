use crate::coordinate::ArtifactId;
use crate::types::{Pid, FACTORY_SEPARATOR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration property values, keyed by property name.
pub type Properties = BTreeMap<String, Value>;

/// Manifest variables. Values are JSON scalars or `null` (unset).
pub type Variables = BTreeMap<String, Value>;

/// Reserved module metadata key holding the module's activation rank.
pub const ACTIVATION_RANK_KEY: &str = "activation-rank";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid coordinate '{coordinate}': {reason}")]
    InvalidCoordinate { coordinate: String, reason: String },
    #[error("module {module}: metadata '{key}' must be a scalar value")]
    NestedMetadata { module: String, key: String },
    #[error("module {module}: invalid activation rank {value}")]
    InvalidRank { module: String, value: String },
    #[error("variable '{0}' must be a scalar or null")]
    InvalidVariable(String),
    #[error("configuration '{0}' has an empty pid or factory instance name")]
    InvalidPid(String),
    #[error("extension '{name}' is {actual}, not {expected}")]
    WrongExtensionType {
        name: String,
        expected: ExtensionType,
        actual: ExtensionType,
    },
    #[error("extension '{name}' has invalid content: {reason}")]
    InvalidExtension { name: String, reason: String },
}

/// Declarative descriptor of modules, configurations, extensions and
/// variables to deploy into a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ManifestDocument", into = "ManifestDocument")]
pub struct Manifest {
    pub id: ArtifactId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub license: Option<String>,
    pub doc_url: Option<String>,
    pub scm_url: Option<String>,
    pub complete: bool,
    /// Install order follows this list; uninstall runs it backwards.
    pub modules: Vec<ModuleRef>,
    pub categories: BTreeSet<String>,
    pub configurations: BTreeMap<Pid, Configuration>,
    pub extensions: BTreeMap<String, Extension>,
    pub variables: Variables,
}

impl Manifest {
    pub fn new(id: ArtifactId) -> Self {
        Self {
            id,
            name: None,
            description: None,
            vendor: None,
            license: None,
            doc_url: None,
            scm_url: None,
            complete: false,
            modules: Vec::new(),
            categories: BTreeSet::new(),
            configurations: BTreeMap::new(),
            extensions: BTreeMap::new(),
            variables: Variables::new(),
        }
    }

    /// Module coordinates in declaration order.
    pub fn module_ids(&self) -> Vec<&ArtifactId> {
        self.modules.iter().map(|m| &m.id).collect()
    }

    pub fn extension(&self, name: &str) -> Option<&Extension> {
        self.extensions.get(name)
    }

    /// Check the invariants a decoded manifest guarantees. Manifests built in
    /// code should be validated before use.
    pub fn validate(&self) -> Result<(), ManifestError> {
        for module in &self.modules {
            module.validate()?;
        }
        for (name, value) in &self.variables {
            if value.is_array() || value.is_object() {
                return Err(ManifestError::InvalidVariable(name.clone()));
            }
        }
        for (pid, config) in &self.configurations {
            if pid != &config.pid {
                return Err(ManifestError::InvalidPid(pid.to_string()));
            }
            config.validate()?;
        }
        for extension in self.extensions.values() {
            if let ExtensionContent::Artifacts(artifacts) = &extension.content {
                for artifact in artifacts {
                    artifact.validate()?;
                }
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One installable artifact of a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub id: ArtifactId,
    /// Scalar values only.
    #[serde(flatten)]
    pub metadata: BTreeMap<String, Value>,
}

impl ModuleRef {
    pub fn new(id: ArtifactId) -> Self {
        Self {
            id,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// The module's own activation rank, if the manifest sets one.
    pub fn activation_rank(&self) -> Result<Option<u32>, ManifestError> {
        let Some(raw) = self.metadata.get(ACTIVATION_RANK_KEY) else {
            return Ok(None);
        };
        let parsed = match raw {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        match parsed.and_then(|v| u32::try_from(v).ok()) {
            Some(rank) if rank > 0 => Ok(Some(rank)),
            _ => Err(ManifestError::InvalidRank {
                module: self.id.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    fn validate(&self) -> Result<(), ManifestError> {
        for (key, value) in &self.metadata {
            if value.is_array() || value.is_object() {
                return Err(ManifestError::NestedMetadata {
                    module: self.id.to_string(),
                    key: key.clone(),
                });
            }
        }
        self.activation_rank()?;
        Ok(())
    }
}

/// A named configuration object. Factory instances carry the factory pid and
/// use `factoryPid~name` as their effective pid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub pid: Pid,
    pub factory_pid: Option<String>,
    pub properties: Properties,
}

impl Configuration {
    pub fn new(pid: impl Into<Pid>) -> Self {
        Self {
            pid: pid.into(),
            factory_pid: None,
            properties: Properties::new(),
        }
    }

    pub fn factory(factory_pid: &str, name: &str) -> Self {
        Self {
            pid: Pid::factory(factory_pid, name),
            factory_pid: Some(factory_pid.to_owned()),
            properties: Properties::new(),
        }
    }

    /// Interpret a manifest key: `fp~name` is a factory instance, anything
    /// else a plain pid.
    pub fn from_key(key: &str, properties: Properties) -> Self {
        let mut config = match key.split_once(FACTORY_SEPARATOR) {
            Some((factory_pid, name)) => Self::factory(factory_pid, name),
            None => Self::new(key),
        };
        config.properties = properties;
        config
    }

    #[must_use]
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_owned(), value.into());
        self
    }

    pub fn is_factory(&self) -> bool {
        self.factory_pid.is_some()
    }

    /// Instance name of a factory configuration.
    pub fn name(&self) -> Option<&str> {
        self.factory_pid.as_ref()?;
        self.pid.split_factory().map(|(_, name)| name)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.pid.trim().is_empty() {
            return Err(ManifestError::InvalidPid(self.pid.to_string()));
        }
        if let Some(factory_pid) = &self.factory_pid {
            let consistent = self
                .pid
                .split_factory()
                .is_some_and(|(fp, name)| fp == factory_pid && !fp.is_empty() && !name.is_empty());
            if !consistent {
                return Err(ManifestError::InvalidPid(self.pid.to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionType {
    Text,
    Json,
    Artifacts,
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionType::Text => write!(f, "text"),
            ExtensionType::Json => write!(f, "json"),
            ExtensionType::Artifacts => write!(f, "artifacts"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionContent {
    Text(Vec<String>),
    /// Opaque JSON text.
    Json(String),
    Artifacts(Vec<ModuleRef>),
}

/// Free-form manifest section, interpreted by extension handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub name: String,
    pub kind: ExtensionKind,
    pub content: ExtensionContent,
}

impl Extension {
    pub fn text(name: &str, kind: ExtensionKind, lines: Vec<String>) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            content: ExtensionContent::Text(lines),
        }
    }

    pub fn json(name: &str, kind: ExtensionKind, json: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            content: ExtensionContent::Json(json.into()),
        }
    }

    pub fn artifacts(name: &str, kind: ExtensionKind, artifacts: Vec<ModuleRef>) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            content: ExtensionContent::Artifacts(artifacts),
        }
    }

    pub fn extension_type(&self) -> ExtensionType {
        match self.content {
            ExtensionContent::Text(_) => ExtensionType::Text,
            ExtensionContent::Json(_) => ExtensionType::Json,
            ExtensionContent::Artifacts(_) => ExtensionType::Artifacts,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.kind == ExtensionKind::Mandatory
    }

    pub fn as_text(&self) -> Result<&[String], ManifestError> {
        match &self.content {
            ExtensionContent::Text(lines) => Ok(lines),
            _ => Err(self.wrong_type(ExtensionType::Text)),
        }
    }

    pub fn as_json(&self) -> Result<&str, ManifestError> {
        match &self.content {
            ExtensionContent::Json(text) => Ok(text),
            _ => Err(self.wrong_type(ExtensionType::Json)),
        }
    }

    /// Parse the JSON content.
    pub fn json_value(&self) -> Result<Value, ManifestError> {
        let text = self.as_json()?;
        serde_json::from_str(text).map_err(|e| ManifestError::InvalidExtension {
            name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    pub fn as_artifacts(&self) -> Result<&[ModuleRef], ManifestError> {
        match &self.content {
            ExtensionContent::Artifacts(artifacts) => Ok(artifacts),
            _ => Err(self.wrong_type(ExtensionType::Artifacts)),
        }
    }

    fn wrong_type(&self, expected: ExtensionType) -> ManifestError {
        ManifestError::WrongExtensionType {
            name: self.name.clone(),
            expected,
            actual: self.extension_type(),
        }
    }
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    Ok(serde_json::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// On-disk JSON shape of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct ManifestDocument {
    id: ArtifactId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    doc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scm_url: Option<String>,
    #[serde(default)]
    complete: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    categories: BTreeSet<String>,
    #[serde(default)]
    modules: Vec<ModuleRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    configurations: BTreeMap<String, Properties>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extensions: BTreeMap<String, ExtensionDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    variables: Variables,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtensionDocument {
    kind: ExtensionKind,
    #[serde(rename = "type")]
    extension_type: ExtensionType,
    content: Value,
}

impl ExtensionDocument {
    fn into_extension(self, name: String) -> Result<Extension, ManifestError> {
        let invalid = |reason: String| ManifestError::InvalidExtension {
            name: name.clone(),
            reason,
        };
        let content = match self.extension_type {
            ExtensionType::Text => match self.content {
                Value::String(s) => ExtensionContent::Text(s.lines().map(str::to_owned).collect()),
                Value::Array(items) => ExtensionContent::Text(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s),
                            other => Err(invalid(format!("text line is not a string: {other}"))),
                        })
                        .collect::<Result<_, _>>()?,
                ),
                other => return Err(invalid(format!("expected text, got {other}"))),
            },
            ExtensionType::Json => ExtensionContent::Json(self.content.to_string()),
            ExtensionType::Artifacts => ExtensionContent::Artifacts(
                serde_json::from_value(self.content).map_err(|e| invalid(e.to_string()))?,
            ),
        };
        Ok(Extension {
            name,
            kind: self.kind,
            content,
        })
    }

    fn from_extension(extension: Extension) -> Self {
        let extension_type = extension.extension_type();
        let content = match extension.content {
            ExtensionContent::Text(lines) => {
                Value::Array(lines.into_iter().map(Value::String).collect())
            }
            // Opaque text that fails to parse is preserved as a string.
            ExtensionContent::Json(text) => {
                serde_json::from_str(&text).unwrap_or(Value::String(text))
            }
            ExtensionContent::Artifacts(artifacts) => {
                serde_json::to_value(artifacts).unwrap_or(Value::Array(Vec::new()))
            }
        };
        Self {
            kind: extension.kind,
            extension_type,
            content,
        }
    }
}

impl TryFrom<ManifestDocument> for Manifest {
    type Error = ManifestError;

    fn try_from(doc: ManifestDocument) -> Result<Self, Self::Error> {
        let configurations = doc
            .configurations
            .into_iter()
            .map(|(key, props)| {
                let config = Configuration::from_key(&key, props);
                (config.pid.clone(), config)
            })
            .collect();
        let extensions = doc
            .extensions
            .into_iter()
            .map(|(name, ext)| Ok((name.clone(), ext.into_extension(name)?)))
            .collect::<Result<_, ManifestError>>()?;
        let manifest = Manifest {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            vendor: doc.vendor,
            license: doc.license,
            doc_url: doc.doc_url,
            scm_url: doc.scm_url,
            complete: doc.complete,
            modules: doc.modules,
            categories: doc.categories,
            configurations,
            extensions,
            variables: doc.variables,
        };
        manifest.validate()?;
        Ok(manifest)
    }
}

impl From<Manifest> for ManifestDocument {
    fn from(manifest: Manifest) -> Self {
        Self {
            id: manifest.id,
            name: manifest.name,
            description: manifest.description,
            vendor: manifest.vendor,
            license: manifest.license,
            doc_url: manifest.doc_url,
            scm_url: manifest.scm_url,
            complete: manifest.complete,
            categories: manifest.categories,
            modules: manifest.modules,
            configurations: manifest
                .configurations
                .into_iter()
                .map(|(pid, config)| (pid.into_inner(), config.properties))
                .collect(),
            extensions: manifest
                .extensions
                .into_iter()
                .map(|(name, ext)| (name, ExtensionDocument::from_extension(ext)))
                .collect(),
            variables: manifest.variables,
        }
    }
}
