//! Storage collaborators the processors persist through.
//!
//! Two narrow capabilities: a blob store for uploaded files and a table
//! store with upsert semantics keyed by (table, partition key, row key).

pub mod blob;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use blob::FsBlobStore;
pub use memory::{InMemoryBlobStore, InMemoryTableStore};

/// File extensions accepted as images when the content type doesn't say so.
const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".png", ".gif", ".jpeg"];

/// A row in a table store. `properties` is stored as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub table: &'static str,
    pub partition_key: String,
    pub row_key: String,
    pub properties: serde_json::Value,
}

/// Binary object storage, addressed by container and name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `content` under `container/name`, replacing any existing blob.
    async fn upload(&self, container: &str, content: &[u8], name: &str) -> Result<()>;
}

/// Table storage. Writes are last-write-wins on (table, partition, row).
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn upsert(&self, row: &TableRow) -> Result<()>;
}

/// Whether an upload looks like an image, by content type or file extension.
pub fn is_image(file_name: &str, content_type: &str) -> bool {
    if content_type.contains("image") {
        return true;
    }
    let lower = file_name.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    async fn upload(&self, container: &str, content: &[u8], name: &str) -> Result<()> {
        (**self).upload(container, content, name).await
    }
}

#[async_trait]
impl<T: TableStore + ?Sized> TableStore for std::sync::Arc<T> {
    async fn upsert(&self, row: &TableRow) -> Result<()> {
        (**self).upsert(row).await
    }
}
