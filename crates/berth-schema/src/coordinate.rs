use crate::manifest::ManifestError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Artifact coordinate: `group:artifact:version[:type[:classifier]]`.
///
/// Components never contain `:` and are never empty. A classifier is only
/// valid together with a type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactId {
    group: String,
    artifact: String,
    version: String,
    kind: Option<String>,
    classifier: Option<String>,
}

/// Group of the reserved coordinate standing in for "owned by something
/// outside this engine".
const EXTERNAL_GROUP: &str = "berth.internal";

impl ArtifactId {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, ManifestError> {
        Self::with_parts(group.into(), artifact.into(), version.into(), None, None)
    }

    pub fn with_parts(
        group: String,
        artifact: String,
        version: String,
        kind: Option<String>,
        classifier: Option<String>,
    ) -> Result<Self, ManifestError> {
        let id = Self {
            group,
            artifact,
            version,
            kind,
            classifier,
        };
        id.validate()?;
        Ok(id)
    }

    /// The sentinel owner recorded for modules and configurations that were
    /// already present in the container before this engine touched them.
    pub fn external() -> Self {
        Self {
            group: EXTERNAL_GROUP.to_owned(),
            artifact: "external".to_owned(),
            version: "0".to_owned(),
            kind: None,
            classifier: None,
        }
    }

    pub fn is_external(&self) -> bool {
        self.group == EXTERNAL_GROUP && self.artifact == "external"
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }

    /// Same logical artifact: group and artifact match, version and the
    /// rest may differ.
    pub fn same_artifact(&self, other: &ArtifactId) -> bool {
        self.group == other.group && self.artifact == other.artifact
    }

    #[must_use]
    pub fn with_version(&self, version: &str) -> Self {
        Self {
            version: version.to_owned(),
            ..self.clone()
        }
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let required = [
            ("group", &self.group),
            ("artifact", &self.artifact),
            ("version", &self.version),
        ];
        for (label, value) in required {
            check_component(self, label, value)?;
        }
        if let Some(kind) = &self.kind {
            check_component(self, "type", kind)?;
        }
        if let Some(classifier) = &self.classifier {
            if self.kind.is_none() {
                return Err(ManifestError::InvalidCoordinate {
                    coordinate: self.to_string(),
                    reason: "classifier requires a type".to_owned(),
                });
            }
            check_component(self, "classifier", classifier)?;
        }
        Ok(())
    }
}

fn check_component(id: &ArtifactId, label: &str, value: &str) -> Result<(), ManifestError> {
    if value.trim().is_empty() {
        return Err(ManifestError::InvalidCoordinate {
            coordinate: id.to_string(),
            reason: format!("{label} must not be empty"),
        });
    }
    if value.contains(':') {
        return Err(ManifestError::InvalidCoordinate {
            coordinate: id.to_string(),
            reason: format!("{label} must not contain ':'"),
        });
    }
    Ok(())
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(kind) = &self.kind {
            write!(f, ":{kind}")?;
            if let Some(classifier) = &self.classifier {
                write!(f, ":{classifier}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for ArtifactId {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(3..=5).contains(&parts.len()) {
            return Err(ManifestError::InvalidCoordinate {
                coordinate: s.to_owned(),
                reason: "expected group:artifact:version[:type[:classifier]]".to_owned(),
            });
        }
        let owned = |i: usize| parts.get(i).map(|p| (*p).to_owned());
        Self::with_parts(
            parts[0].to_owned(),
            parts[1].to_owned(),
            parts[2].to_owned(),
            owned(3),
            owned(4),
        )
    }
}

impl Serialize for ArtifactId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ArtifactId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_coordinate() {
        let id: ArtifactId = "g:a:1.0".parse().unwrap();
        assert_eq!(id.group(), "g");
        assert_eq!(id.artifact(), "a");
        assert_eq!(id.version(), "1.0");
        assert_eq!(id.kind(), None);
        assert_eq!(id.to_string(), "g:a:1.0");
    }

    #[test]
    fn parses_full_coordinate() {
        let id: ArtifactId = "org.example:core:2.1:zip:runtime"
            .parse()
            .unwrap();
        assert_eq!(id.kind(), Some("zip"));
        assert_eq!(id.classifier(), Some("runtime"));
        assert_eq!(
            id.to_string(),
            "org.example:core:2.1:zip:runtime"
        );
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!("g:a".parse::<ArtifactId>().is_err());
        assert!("g:a:1:t:c:x".parse::<ArtifactId>().is_err());
        assert!("g::1".parse::<ArtifactId>().is_err());
        assert!(ArtifactId::new("g:x", "a", "1").is_err());
    }

    #[test]
    fn classifier_requires_type() {
        let err = ArtifactId::with_parts(
            "g".to_owned(),
            "a".to_owned(),
            "1".to_owned(),
            None,
            Some("tests".to_owned()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("classifier requires a type"));
    }

    #[test]
    fn same_artifact_ignores_version() {
        let a: ArtifactId = "g:a:1".parse().unwrap();
        let b: ArtifactId = "g:a:2".parse().unwrap();
        let c: ArtifactId = "g:b:1".parse().unwrap();
        assert!(a.same_artifact(&b));
        assert!(!a.same_artifact(&c));
        assert_eq!(a.with_version("2"), b);
    }

    #[test]
    fn external_sentinel_is_recognised() {
        assert!(ArtifactId::external().is_external());
        let id: ArtifactId = "g:a:1".parse().unwrap();
        assert!(!id.is_external());
    }

    #[test]
    fn serde_uses_string_form() {
        let id: ArtifactId = "g:a:1:jar".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"g:a:1:jar\"");
        let back: ArtifactId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ArtifactId>("\"nope\"").is_err());
    }
}
