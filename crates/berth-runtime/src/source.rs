use crate::RuntimeError;
use berth_schema::{parse_manifest_str, ArtifactId, Manifest};
use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A repository that can hand out artifact content by coordinate.
pub trait ArtifactSource: Send + Sync {
    fn name(&self) -> &str;

    /// Open the artifact, or `Ok(None)` if this source does not have it.
    fn get(&self, id: &ArtifactId) -> Result<Option<Box<dyn Read + Send>>, RuntimeError>;

    /// Local filesystem path of the artifact, when the source keeps one.
    fn path_for(&self, _id: &ArtifactId) -> Option<PathBuf> {
        None
    }
}

/// Ordered list of artifact sources. The first source that has an artifact
/// wins; a failing source is logged and skipped.
#[derive(Clone, Default)]
pub struct SourceChain {
    sources: Vec<Arc<dyn ArtifactSource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: Arc<dyn ArtifactSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn push(&mut self, source: Arc<dyn ArtifactSource>) {
        self.sources.push(source);
    }

    /// Put a source ahead of all others.
    pub fn prepend(&mut self, source: Arc<dyn ArtifactSource>) {
        self.sources.insert(0, source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub fn get(&self, id: &ArtifactId) -> Option<Box<dyn Read + Send>> {
        for source in &self.sources {
            match source.get(id) {
                Ok(Some(stream)) => {
                    debug!("artifact {id} served by source '{}'", source.name());
                    return Some(stream);
                }
                Ok(None) => {}
                Err(e) => warn!("artifact source '{}' failed for {id}: {e}", source.name()),
            }
        }
        None
    }

    pub fn path_for(&self, id: &ArtifactId) -> Option<PathBuf> {
        self.sources.iter().find_map(|s| s.path_for(id))
    }

    /// Read and decode a manifest artifact without installing anything.
    pub fn manifest(&self, id: &ArtifactId) -> Result<Option<Manifest>, RuntimeError> {
        let mut text = String::new();
        if let Some(path) = self.path_for(id) {
            text = std::fs::read_to_string(path)?;
        } else if let Some(mut stream) = self.get(id) {
            stream.read_to_string(&mut text)?;
        } else {
            return Ok(None);
        }
        Ok(Some(parse_manifest_str(&text)?))
    }
}

impl fmt::Debug for SourceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemorySource;

    struct BrokenSource;

    impl ArtifactSource for BrokenSource {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn get(&self, _id: &ArtifactId) -> Result<Option<Box<dyn Read + Send>>, RuntimeError> {
            Err(RuntimeError::Source {
                source_name: "broken".to_owned(),
                reason: "offline".to_owned(),
            })
        }
    }

    fn read_all(mut stream: Box<dyn Read + Send>) -> String {
        let mut out = String::new();
        stream.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn first_non_empty_source_wins() {
        let id: ArtifactId = "g:a:1".parse().unwrap();
        let first = MemorySource::new("first");
        let second = MemorySource::new("second");
        second.insert(&id, b"from-second".to_vec());
        let third = MemorySource::new("third");
        third.insert(&id, b"from-third".to_vec());

        let chain = SourceChain::new()
            .with(Arc::new(first))
            .with(Arc::new(second))
            .with(Arc::new(third));
        assert_eq!(read_all(chain.get(&id).unwrap()), "from-second");
    }

    #[test]
    fn failing_source_is_skipped() {
        let id: ArtifactId = "g:a:1".parse().unwrap();
        let memory = MemorySource::new("memory");
        memory.insert(&id, b"ok".to_vec());
        let chain = SourceChain::new()
            .with(Arc::new(BrokenSource))
            .with(Arc::new(memory));
        assert_eq!(read_all(chain.get(&id).unwrap()), "ok");
    }

    #[test]
    fn missing_everywhere_is_none() {
        let chain = SourceChain::new().with(Arc::new(MemorySource::new("empty")));
        assert!(chain.get(&"g:a:1".parse().unwrap()).is_none());
        assert!(SourceChain::new().get(&"g:a:1".parse().unwrap()).is_none());
    }

    #[test]
    fn prepend_takes_priority() {
        let id: ArtifactId = "g:a:1".parse().unwrap();
        let low = MemorySource::new("low");
        low.insert(&id, b"low".to_vec());
        let high = MemorySource::new("high");
        high.insert(&id, b"high".to_vec());
        let mut chain = SourceChain::new().with(Arc::new(low));
        chain.prepend(Arc::new(high));
        assert_eq!(chain.names(), ["high", "low"]);
        assert_eq!(read_all(chain.get(&id).unwrap()), "high");
    }

    #[test]
    fn manifest_is_read_without_installing() {
        let id: ArtifactId = "g:feature:1".parse().unwrap();
        let memory = MemorySource::new("memory");
        memory.insert(
            &id,
            br#"{"id": "g:feature:1", "modules": [{"id": "g:m:1"}]}"#.to_vec(),
        );
        let chain = SourceChain::new().with(Arc::new(memory));
        let manifest = chain.manifest(&id).unwrap().unwrap();
        assert_eq!(manifest.modules.len(), 1);
        assert!(chain.manifest(&"g:other:1".parse().unwrap()).unwrap().is_none());
    }

    #[test]
    fn path_for_prefers_filesystem_copy() {
        let dir = tempfile::tempdir().unwrap();
        let id: ArtifactId = "g:feature:2".parse().unwrap();
        let path = dir.path().join("feature.json");
        std::fs::write(&path, r#"{"id": "g:feature:2"}"#).unwrap();
        let memory = MemorySource::new("disk");
        memory.insert_path(&id, path.clone());
        let chain = SourceChain::new().with(Arc::new(memory));
        assert_eq!(chain.path_for(&id), Some(path));
        assert_eq!(chain.manifest(&id).unwrap().unwrap().id, id);
    }
}
