//! In-memory storage collaborators for tests and local runs.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{BlobStore, TableRow, TableStore};
use crate::error::{Error, Result};

type RowKey = (&'static str, String, String);

/// Blobs kept in a map keyed by (container, name).
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    uploads: AtomicUsize,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        self.lock()
            .ok()?
            .get(&(container.to_string(), name.to_string()))
            .cloned()
    }

    /// Names currently stored in `container`.
    pub fn names(&self, container: &str) -> Vec<String> {
        self.lock()
            .map(|blobs| {
                blobs
                    .keys()
                    .filter(|(c, _)| c == container)
                    .map(|(_, name)| name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total upload calls, including overwrites.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| Error::Storage("blob store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, container: &str, content: &[u8], name: &str) -> Result<()> {
        self.lock()?
            .insert((container.to_string(), name.to_string()), content.to_vec());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Rows kept in a sorted map; upsert overwrites.
#[derive(Debug, Default)]
pub struct InMemoryTableStore {
    rows: Mutex<BTreeMap<RowKey, serde_json::Value>>,
    writes: AtomicUsize,
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &'static str, partition_key: &str, row_key: &str) -> Option<TableRow> {
        let rows = self.lock().ok()?;
        let key = (table, partition_key.to_string(), row_key.to_string());
        rows.get(&key).map(|properties| TableRow {
            table,
            partition_key: key.1.clone(),
            row_key: key.2.clone(),
            properties: properties.clone(),
        })
    }

    /// All rows of `table`, in key order.
    pub fn rows(&self, table: &'static str) -> Vec<TableRow> {
        self.lock()
            .map(|rows| {
                rows.iter()
                    .filter(|((t, _, _), _)| *t == table)
                    .map(|((_, pk, rk), properties)| TableRow {
                        table,
                        partition_key: pk.clone(),
                        row_key: rk.clone(),
                        properties: properties.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total upsert calls, including overwrites.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<RowKey, serde_json::Value>>> {
        self.rows
            .lock()
            .map_err(|_| Error::Storage("table store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    async fn upsert(&self, row: &TableRow) -> Result<()> {
        self.lock()?.insert(
            (row.table, row.partition_key.clone(), row.row_key.clone()),
            row.properties.clone(),
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
