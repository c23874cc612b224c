//! SQLite store: product tables, import ledger and the per-file merge.
//!
//! The store is the only writer. A file is merged inside one transaction:
//! every row is applied as delete-by-key then insert, the ledger entry for
//! the file is replaced the same way, and the transaction commits once the
//! whole file went through. Any failure on the way drops the transaction,
//! which rolls back everything the file touched.

use std::collections::HashMap;
use std::path::Path;

use futures::TryStreamExt;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{query::Query, Sqlite, Transaction};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::normalize::{Normalizer, Row, Value};
use crate::product::{Product, ProductSpec, LEDGER_TABLE};
use crate::remote::{FileDescriptor, LineStream};

/// Outcome of merging one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Lines read from the file.
    pub lines: usize,
    /// Rows applied to the product table.
    pub rows: usize,
    /// Lines that held no record.
    pub skipped: usize,
}

/// Delete and insert statements for one product table.
#[derive(Debug, Clone)]
struct MergeStatements {
    delete: String,
    insert: String,
}

impl MergeStatements {
    fn for_spec(spec: &ProductSpec) -> Self {
        let key_clause = spec
            .key_columns()
            .iter()
            .map(|c| format!("{} = ?", c.name))
            .collect::<Vec<_>>()
            .join(" AND ");
        let columns = spec
            .columns
            .iter()
            .map(|c| c.name)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; spec.columns.len()].join(", ");

        Self {
            delete: format!("DELETE FROM {} WHERE {}", spec.table, key_clause),
            insert: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                spec.table, columns, placeholders
            ),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Integer(v) => query.bind(*v),
        Value::Real(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Null => query.bind(Option::<String>::None),
    }
}

/// DDL for one product table and its key index.
fn table_ddl(spec: &ProductSpec) -> Vec<String> {
    let columns = spec
        .columns
        .iter()
        .map(|c| format!("    {} {}", c.name, c.kind.sql_type()))
        .collect::<Vec<_>>()
        .join(",\n");
    let keys = spec
        .key_columns()
        .iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", spec.table, columns),
        format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_key_index ON {table} ({keys})",
            table = spec.table,
            keys = keys
        ),
    ]
}

/// The local relational store.
#[derive(Debug, Clone)]
pub struct SyncStore {
    pool: SqlitePool,
}

impl SyncStore {
    /// Open or create the database file at `path` and make sure the schema
    /// exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::Storage(e.into()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;

        info!(path = %path.display(), "Opened synchronization database");
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        // A single connection that never expires keeps the database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create the ledger and product tables if they are missing.
    pub async fn initialize(&self) -> Result<()> {
        let mut statements = vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    path TEXT,\n    modified TEXT\n)",
                LEDGER_TABLE
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {table}_path_index ON {table} (path)",
                table = LEDGER_TABLE
            ),
        ];
        for product in Product::ALL {
            statements.extend(table_ddl(product.spec()));
        }

        for statement in &statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!(statements = statements.len(), "Schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Snapshot of the whole ledger, path to modification token.
    pub async fn ledger(&self) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as(&format!("SELECT path, modified FROM {}", LEDGER_TABLE))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Recorded modification token for one path.
    pub async fn ledger_entry(&self, path: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT modified FROM {} WHERE path = ?",
            LEDGER_TABLE
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(modified,)| modified))
    }

    /// Number of rows currently held for `product`.
    pub async fn row_count(&self, product: Product) -> Result<u64> {
        let count: (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", product.spec().table))
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 as u64)
    }

    /// Merge the lines of one file and record it in the ledger, atomically.
    ///
    /// On error nothing the file touched is kept. The error names the file
    /// and, for malformed records, the 1-based line number.
    pub async fn merge_file(
        &self,
        file: &FileDescriptor,
        normalizer: &Normalizer,
        mut lines: LineStream<'_>,
    ) -> Result<MergeOutcome> {
        let statements = MergeStatements::for_spec(normalizer.product().spec());
        let mut tx = self.pool.begin().await?;
        let mut outcome = MergeOutcome::default();

        while let Some(line) = lines.try_next().await? {
            outcome.lines += 1;
            let row = normalizer
                .normalize(&line)
                .map_err(|source| SyncError::MalformedRecord {
                    path: file.path.clone(),
                    line: outcome.lines,
                    source,
                })?;

            match row {
                Some(row) => {
                    apply_row(&mut tx, &statements, &row).await?;
                    outcome.rows += 1;
                }
                None => outcome.skipped += 1,
            }
        }

        record_import(&mut tx, file).await?;
        tx.commit().await?;

        debug!(
            path = %file.path,
            rows = outcome.rows,
            skipped = outcome.skipped,
            "Merged file"
        );
        Ok(outcome)
    }

    /// Apply a single row outside of a file merge.
    pub async fn apply(&self, row: &Row) -> Result<()> {
        let statements = MergeStatements::for_spec(row.product.spec());
        let mut tx = self.pool.begin().await?;
        apply_row(&mut tx, &statements, row).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Replace whatever row holds `row`'s key with `row`.
async fn apply_row(
    tx: &mut Transaction<'_, Sqlite>,
    statements: &MergeStatements,
    row: &Row,
) -> Result<()> {
    let mut delete = sqlx::query(&statements.delete);
    for value in row.key() {
        delete = bind_value(delete, value);
    }
    delete.execute(&mut **tx).await?;

    let mut insert = sqlx::query(&statements.insert);
    for value in &row.values {
        insert = bind_value(insert, value);
    }
    insert.execute(&mut **tx).await?;

    Ok(())
}

async fn record_import(tx: &mut Transaction<'_, Sqlite>, file: &FileDescriptor) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {} WHERE path = ?", LEDGER_TABLE))
        .bind(&file.path)
        .execute(&mut **tx)
        .await?;

    sqlx::query(&format!(
        "INSERT INTO {} (path, modified) VALUES (?, ?)",
        LEDGER_TABLE
    ))
    .bind(&file.path)
    .bind(&file.modification_token)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
