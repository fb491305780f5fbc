use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions,
};
use sqlx::{Row, Sqlite};
use tracing::{debug, info, trace};

use super::broadcast;
use super::schema::{Schema, TableDef};
use super::value::FieldValue;
use super::{Hole, LEDGER_TABLE, Ledger, RecordOutcome, ScanStore};
use crate::config::BroadcastPolicy;
use crate::error::{Result, ScanError};
use crate::ids::Identifier;
use crate::probe::Payload;

/// SQLite-backed ledger and result tables.
///
/// Clones share the pool. The scan engine keeps a single writer; extra
/// connections only serve concurrent readers.
#[derive(Clone, Debug)]
pub struct SqliteScanStore {
    pool: SqlitePool,
    schema: Arc<Schema>,
    inserts: Arc<[String]>,
    policy: BroadcastPolicy,
}

impl SqliteScanStore {
    /// Open (creating if needed) the database at `path` and create every
    /// declared table.
    pub async fn open(
        path: impl AsRef<Path>,
        schema: Schema,
        policy: BroadcastPolicy,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening scan store");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, schema, policy).await
    }

    /// Open an existing database for ledger queries only.
    pub async fn open_ledger(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        Ok(Self::assemble(pool, Schema::empty(), BroadcastPolicy::default()))
    }

    /// Private in-memory database, mostly for tests.
    pub async fn open_in_memory(
        schema: Schema,
        policy: BroadcastPolicy,
    ) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every in-memory connection is its own database; pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::from_pool(pool, schema, policy).await
    }

    pub async fn from_pool(
        pool: SqlitePool,
        schema: Schema,
        policy: BroadcastPolicy,
    ) -> Result<Self> {
        let store = Self::assemble(pool, schema, policy);
        store.initialize().await?;
        Ok(store)
    }

    fn assemble(pool: SqlitePool, schema: Schema, policy: BroadcastPolicy) -> Self {
        let inserts = schema.tables().iter().map(TableDef::insert_sql).collect();
        Self {
            pool,
            schema: Arc::new(schema),
            inserts,
            policy,
        }
    }

    async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {LEDGER_TABLE} (id INTEGER PRIMARY KEY)"
        ))
        .execute(&self.pool)
        .await?;

        for table in self.schema.tables() {
            debug!(table = %table.name, "ensuring table");
            sqlx::query(&table.create_sql()).execute(&self.pool).await?;
        }

        for statement in self.schema.init_statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn rows_for(
        &self,
        table: &TableDef,
        id: Identifier,
        payload: &Payload,
    ) -> Result<Vec<Vec<FieldValue>>> {
        let columns: Vec<Vec<FieldValue>> = table
            .fields
            .iter()
            .map(|field| match field.extractor.extract(id, payload) {
                Ok(values) => values,
                Err(err) => {
                    trace!(
                        id,
                        table = %table.name,
                        field = %field.name,
                        error = %err,
                        "extractor yielded nothing"
                    );
                    Vec::new()
                }
            })
            .collect();

        let rows = broadcast::align(&columns, &FieldValue::Null, self.policy)
            .map_err(|uneven| {
                let field = table
                    .fields
                    .get(uneven.column)
                    .map(|field| field.name.as_str())
                    .unwrap_or("?");
                ScanError::Broadcast {
                    table: table.name.clone(),
                    message: format!("field {field}: {uneven}"),
                }
            })?;

        // SQLite keeps NULL keys distinct, so such rows would pile up on
        // every re-record instead of being replaced.
        Ok(rows
            .into_iter()
            .filter(|row| {
                let keyed = table
                    .fields
                    .iter()
                    .zip(row)
                    .all(|(field, value)| !field.primary_key || !value.is_null());
                if !keyed {
                    trace!(id, table = %table.name, "row has a null primary key; skipped");
                }
                keyed
            })
            .collect())
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: FieldValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        FieldValue::Null => query.bind(None::<i64>),
        FieldValue::Integer(int) => query.bind(int),
        FieldValue::Real(real) => query.bind(real),
        FieldValue::Text(text) => query.bind(text),
        FieldValue::Blob(bytes) => query.bind(bytes),
    }
}

#[async_trait]
impl Ledger for SqliteScanStore {
    async fn minimum(&self) -> Result<Option<Identifier>> {
        let min: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MIN(id) FROM {LEDGER_TABLE}"))
                .fetch_one(&self.pool)
                .await?;
        Ok(min)
    }

    async fn maximum(&self) -> Result<Option<Identifier>> {
        let max: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MAX(id) FROM {LEDGER_TABLE}"))
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    async fn holes(&self) -> Result<Vec<Hole>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT prev_id, id, id - prev_id AS size FROM (
                SELECT id, LAG(id) OVER (ORDER BY id) AS prev_id
                FROM {LEDGER_TABLE}
            )
            WHERE id - prev_id > 1
            ORDER BY size ASC, prev_id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Hole> {
                Ok(Hole {
                    start: row.try_get("prev_id")?,
                    end: row.try_get("id")?,
                    size: row.try_get("size")?,
                })
            })
            .collect()
    }

    async fn checked(&self) -> Result<BTreeSet<Identifier>> {
        let ids: Vec<i64> =
            sqlx::query_scalar(&format!("SELECT id FROM {LEDGER_TABLE} ORDER BY id"))
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {LEDGER_TABLE}"))
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl ScanStore for SqliteScanStore {
    async fn record(
        &self,
        id: Identifier,
        payload: Option<&Payload>,
    ) -> Result<RecordOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {LEDGER_TABLE} (id) VALUES (?)"
        ))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let mut outcome = RecordOutcome::default();
        if let Some(payload) = payload {
            for (table, insert) in self.schema.tables().iter().zip(self.inserts.iter()) {
                for row in self.rows_for(table, id, payload)? {
                    let mut query = sqlx::query(insert.as_str());
                    for value in row {
                        query = bind_value(query, value);
                    }
                    query.execute(&mut *tx).await?;
                    outcome.rows_written += 1;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}
