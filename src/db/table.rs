//! Postgres-backed table store.
//!
//! Every logical table shares `table_rows`, keyed by
//! (table_name, partition_key, row_key). Upserts overwrite the properties.

use std::sync::Arc;

use async_trait::async_trait;
use opentelemetry::KeyValue;

use super::Db;
use crate::error::Result;
use crate::storage::{TableRow, TableStore};
use crate::telemetry::metrics;

pub struct PgTableStore {
    db: Arc<Db>,
}

impl PgTableStore {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Fetch one row's properties, if present.
    pub async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT properties FROM table_rows
             WHERE table_name = $1 AND partition_key = $2 AND row_key = $3",
        )
        .bind(table)
        .bind(partition_key)
        .bind(row_key)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.map(|r| r.0))
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn upsert(&self, row: &TableRow) -> Result<()> {
        sqlx::query(
            "INSERT INTO table_rows (table_name, partition_key, row_key, properties, updated_at)
             VALUES ($1, $2, $3, $4, now())
             ON CONFLICT (table_name, partition_key, row_key)
             DO UPDATE SET properties = EXCLUDED.properties, updated_at = EXCLUDED.updated_at",
        )
        .bind(row.table)
        .bind(&row.partition_key)
        .bind(&row.row_key)
        .bind(&row.properties)
        .execute(self.db.pool())
        .await?;

        metrics::storage_writes().add(
            1,
            &[
                KeyValue::new("store", "table"),
                KeyValue::new("target", row.table),
            ],
        );
        Ok(())
    }
}
