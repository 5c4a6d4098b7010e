//! Destination stores for normalized datasets.
//!
//! Every write is a full replace: the table is dropped, recreated with the
//! dataset's columns and then filled in batches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cmconnect_parser::CellValue;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::debug;

use crate::db::{self, DbPool};
use crate::normalize::{ColumnKind, NormalizedColumn, NormalizedDataset};

/// PostgreSQL caps a single statement at this many bind parameters.
const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Whether a table replace runs inside a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Batches are committed as they are written; a failure mid-way leaves a partial table.
    #[default]
    Chunked,
    /// Drop, create and every batch share one transaction per table.
    Atomic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub rows_written: usize,
    pub batches: usize,
}

#[async_trait]
pub trait TableStore: Send + Sync {
    async fn replace_table(
        &self,
        table: &str,
        dataset: &NormalizedDataset,
        batch_size: usize,
    ) -> Result<LoadReport, StoreError>;

    async fn row_count(&self, table: &str) -> Result<u64, StoreError>;
}

/// Opens a store for the duration of a load.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn TableStore>, StoreError>;
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Clone)]
pub struct PgTableStore {
    pool: DbPool,
    mode: LoadMode,
}

impl PgTableStore {
    pub fn new(pool: DbPool, mode: LoadMode) -> Self {
        Self { pool, mode }
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn replace_table(
        &self,
        table: &str,
        dataset: &NormalizedDataset,
        batch_size: usize,
    ) -> Result<LoadReport, StoreError> {
        match self.mode {
            LoadMode::Chunked => {
                let mut conn = self.pool.acquire().await?;
                write_table(&mut conn, table, dataset, batch_size).await
            }
            LoadMode::Atomic => {
                let mut tx = self.pool.begin().await?;
                let report = write_table(&mut tx, table, dataset, batch_size).await?;
                tx.commit().await?;
                Ok(report)
            }
        }
    }

    async fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

async fn write_table(
    conn: &mut PgConnection,
    table: &str,
    dataset: &NormalizedDataset,
    batch_size: usize,
) -> Result<LoadReport, StoreError> {
    let quoted_table = quote_ident(table);

    let drop_sql = format!("DROP TABLE IF EXISTS {quoted_table}");
    sqlx::query(&drop_sql).execute(&mut *conn).await?;

    let column_defs = dataset
        .columns
        .iter()
        .map(|column| format!("{} {}", quote_ident(&column.name), column.kind.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let create_sql = format!("CREATE TABLE {quoted_table} ({column_defs})");
    sqlx::query(&create_sql).execute(&mut *conn).await?;

    let width = dataset.column_count();
    if width == 0 {
        let insert_sql = format!("INSERT INTO {quoted_table} DEFAULT VALUES");
        for _ in &dataset.rows {
            sqlx::query(&insert_sql).execute(&mut *conn).await?;
        }
        return Ok(LoadReport {
            table: table.to_string(),
            rows_written: dataset.row_count(),
            batches: dataset.row_count(),
        });
    }

    let column_list = dataset
        .columns
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let rows_per_batch = batch_size.max(1).min(MAX_BIND_PARAMS / width).max(1);

    let mut batches = 0;
    let mut rows_written = 0;
    for chunk in dataset.rows.chunks(rows_per_batch) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {quoted_table} ({column_list}) "));
        builder.push_values(chunk, |mut values, row| {
            for (cell, column) in row.iter().zip(&dataset.columns) {
                match column.kind {
                    ColumnKind::Text => {
                        values.push_bind(cell.to_text());
                    }
                    ColumnKind::Timestamp => {
                        values.push_bind(cell.as_datetime());
                    }
                }
            }
        });
        builder.build().execute(&mut *conn).await?;

        batches += 1;
        rows_written += chunk.len();
        debug!(table, batch = batches, rows = chunk.len(), "wrote batch");
    }

    Ok(LoadReport {
        table: table.to_string(),
        rows_written,
        batches,
    })
}

#[derive(Clone)]
pub struct PgConnector {
    database_url: String,
    max_connections: u32,
    mode: LoadMode,
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>, max_connections: u32, mode: LoadMode) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
            mode,
        }
    }
}

#[async_trait]
impl StoreConnector for PgConnector {
    async fn open(&self) -> Result<Box<dyn TableStore>, StoreError> {
        let pool = db::connect(&self.database_url, self.max_connections).await?;
        Ok(Box::new(PgTableStore::new(pool, self.mode)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTable {
    pub columns: Vec<NormalizedColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, StoredTable>,
    fail_after: HashMap<String, usize>,
    opens: usize,
}

/// In-process store with the same drop/create/batch semantics as [`PgTableStore`].
///
/// Clones share state, so a connector handed to the pipeline can be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed_table(&self, table: &str, dataset: NormalizedDataset) {
        self.lock().tables.insert(
            table.to_string(),
            StoredTable {
                columns: dataset.columns,
                rows: dataset.rows,
            },
        );
    }

    /// Makes writes to `table` fail once `batches` batches have landed.
    pub fn fail_after_batches(&self, table: &str, batches: usize) {
        self.lock().fail_after.insert(table.to_string(), batches);
    }

    pub fn table(&self, table: &str) -> Option<StoredTable> {
        self.lock().tables.get(table).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn open_count(&self) -> usize {
        self.lock().opens
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn replace_table(
        &self,
        table: &str,
        dataset: &NormalizedDataset,
        batch_size: usize,
    ) -> Result<LoadReport, StoreError> {
        let mut state = self.lock();
        let fail_after = state.fail_after.get(table).copied();

        state.tables.insert(
            table.to_string(),
            StoredTable {
                columns: dataset.columns.clone(),
                rows: Vec::with_capacity(dataset.row_count()),
            },
        );

        let mut batches = 0;
        let mut rows_written = 0;
        for chunk in dataset.rows.chunks(batch_size.max(1)) {
            if fail_after.is_some_and(|limit| batches >= limit) {
                return Err(StoreError::Unavailable(format!(
                    "write to '{table}' failed after {batches} batches"
                )));
            }
            if let Some(stored) = state.tables.get_mut(table) {
                stored.rows.extend(chunk.iter().cloned());
            }
            batches += 1;
            rows_written += chunk.len();
        }

        Ok(LoadReport {
            table: table.to_string(),
            rows_written,
            batches,
        })
    }

    async fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        self.lock()
            .tables
            .get(table)
            .map(|stored| stored.rows.len() as u64)
            .ok_or_else(|| StoreError::Unavailable(format!("table '{table}' does not exist")))
    }
}

#[async_trait]
impl StoreConnector for MemoryTableStore {
    async fn open(&self) -> Result<Box<dyn TableStore>, StoreError> {
        self.lock().opens += 1;
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(rows: usize) -> NormalizedDataset {
        NormalizedDataset {
            columns: vec![NormalizedColumn::text("ticket_no")],
            rows: (0..rows)
                .map(|index| vec![CellValue::Number(index as f64)])
                .collect(),
        }
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("crm_raw"), "\"crm_raw\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[tokio::test]
    async fn memory_store_replaces_previous_contents() {
        let store = MemoryTableStore::new();
        store.seed_table("crm_raw", dataset(500));

        let report = store
            .replace_table("crm_raw", &dataset(10), 3)
            .await
            .expect("replace");

        assert_eq!(report.rows_written, 10);
        assert_eq!(report.batches, 4);
        assert_eq!(store.row_count("crm_raw").await.expect("count"), 10);
    }

    #[tokio::test]
    async fn batch_size_does_not_change_contents() {
        let source = dataset(25);
        let mut stored = Vec::new();
        for batch_size in [1, 7, 25, 1000] {
            let store = MemoryTableStore::new();
            store
                .replace_table("crm_raw", &source, batch_size)
                .await
                .expect("replace");
            stored.push(store.table("crm_raw").expect("table"));
        }
        assert!(stored.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(stored[0].rows, source.rows);
    }

    #[tokio::test]
    async fn injected_failure_leaves_partial_table() {
        let store = MemoryTableStore::new();
        store.fail_after_batches("crm_raw", 2);

        let err = store
            .replace_table("crm_raw", &dataset(10), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.row_count("crm_raw").await.expect("count"), 6);
    }

    #[tokio::test]
    async fn connector_counts_opens_and_shares_state() {
        let store = MemoryTableStore::new();
        let opened = store.open().await.expect("open");
        opened
            .replace_table("staging_grievance", &dataset(2), 10)
            .await
            .expect("replace");

        assert_eq!(store.open_count(), 1);
        assert_eq!(store.table_names(), vec!["staging_grievance".to_string()]);
    }
}
