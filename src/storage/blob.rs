//! Filesystem-backed blob store.
//!
//! Containers are directories under a root; blobs are files inside them.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::BlobStore;
use crate::error::{Error, Result};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `container/name` under the root, rejecting anything that
    /// could escape it.
    pub fn path_for(&self, container: &str, name: &str) -> Result<PathBuf> {
        for part in [container, name] {
            if part.is_empty() || part == "." || part.contains("..") || part.contains(['/', '\\'])
            {
                return Err(Error::Storage(format!("invalid blob path segment '{part}'")));
            }
        }
        Ok(self.root.join(container).join(name))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, container: &str, content: &[u8], name: &str) -> Result<()> {
        let path = self.path_for(container, name)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Write then rename so a reader never sees a half-written blob.
        let tmp = path.with_file_name(format!("{name}.partial"));
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;

        metrics::storage_writes().add(
            1,
            &[
                KeyValue::new("store", "blob"),
                KeyValue::new("target", container.to_string()),
            ],
        );
        debug!(container, name, bytes = content.len(), "blob uploaded");
        Ok(())
    }
}
