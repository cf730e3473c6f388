//! RelationalStore - Postgres Backend
//!
//! TigerStyle: the database is the source of truth; commits are all-or-nothing.
//!
//! # Schema
//!
//! One table per concrete entity kind, created on first use:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS records_<kind> (
//!     id TEXT PRIMARY KEY,
//!     payload JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Commit protocol
//!
//! `register`/`delete` stage changes in memory; nothing is visible to
//! `all()` or durable until `save_all` applies the whole staged set in a
//! single transaction. Any failure rolls the entire batch back and leaves
//! the staged set intact. `reload` is a no-op: the database already holds
//! the authoritative state.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::constants::DB_POOL_CONNECTIONS_MAX;

use super::engine::{Registry, RegistryKey, StorageEngine};
use super::entity::{Catalog, Identifiable, Storable, Timestamped};
use super::error::{StorageError, StorageResult};

/// A change staged for the next commit.
enum Change {
    Upsert(Box<dyn Storable>),
    Delete(RegistryKey),
}

/// Postgres-backed storage engine.
pub struct RelationalStore {
    pool: PgPool,
    catalog: Arc<Catalog>,
    /// Changes staged since the last successful commit, in arrival order.
    pending: Mutex<Vec<Change>>,
}

impl RelationalStore {
    /// Connect and prepare the schema for every catalog kind.
    ///
    /// # Errors
    /// [`StorageError::Io`] if the connection fails, [`StorageError::Format`]
    /// if the schema cannot be created.
    ///
    /// # Panics
    /// Panics if the connection string is empty or not a postgres URL.
    pub async fn new(connection_string: &str, catalog: Arc<Catalog>) -> StorageResult<Self> {
        // Preconditions
        assert!(
            !connection_string.is_empty(),
            "connection string cannot be empty"
        );
        assert!(
            connection_string.starts_with("postgres://")
                || connection_string.starts_with("postgresql://"),
            "connection string must be a postgres URL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(DB_POOL_CONNECTIONS_MAX)
            .connect(connection_string)
            .await
            .map_err(|e| StorageError::io(format!("failed to connect: {e}")))?;

        Self::from_pool(pool, catalog).await
    }

    /// Build from an existing pool, preparing the schema.
    ///
    /// # Errors
    /// [`StorageError::Format`] if the schema cannot be created.
    pub async fn from_pool(pool: PgPool, catalog: Arc<Catalog>) -> StorageResult<Self> {
        let store = Self {
            pool,
            catalog,
            pending: Mutex::new(Vec::new()),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create one table per catalog kind.
    async fn init_schema(&self) -> StorageResult<()> {
        for kind in self.catalog.kinds() {
            let stmt = format!(
                r"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    payload JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                )
                ",
                table = table_name(kind)
            );
            sqlx::query(&stmt)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    /// Reconstruct all rows of one kind through the catalog.
    async fn fetch_kind(&self, kind: &str) -> StorageResult<Vec<Box<dyn Storable>>> {
        let stmt = format!("SELECT payload FROM {} ORDER BY id", table_name(kind));
        let rows = sqlx::query(&stmt)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            entities.push(row_to_entity(&self.catalog, kind, row)?);
        }
        Ok(entities)
    }
}

/// Relation backing one entity kind.
fn table_name(kind: &str) -> String {
    // Precondition: discriminators are identifiers, safe to splice into SQL.
    assert!(
        !kind.is_empty() && kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        "kind {kind:?} is not a valid table suffix"
    );

    format!("records_{}", kind.to_lowercase())
}

/// Map a sqlx failure onto the storage error kinds.
fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match err {
        sqlx::Error::Database(db) => match db.kind() {
            sqlx::error::ErrorKind::UniqueViolation
            | sqlx::error::ErrorKind::ForeignKeyViolation
            | sqlx::error::ErrorKind::NotNullViolation
            | sqlx::error::ErrorKind::CheckViolation => StorageError::integrity(db.to_string()),
            _ => StorageError::format(db.to_string()),
        },
        sqlx::Error::Io(io) => StorageError::io(io.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StorageError::format(err.to_string())
        }
        other => StorageError::io(other.to_string()),
    }
}

/// Parse a row's payload back into an entity.
fn row_to_entity(catalog: &Catalog, kind: &str, row: &PgRow) -> StorageResult<Box<dyn Storable>> {
    let payload: Value = row
        .try_get("payload")
        .map_err(|e| StorageError::format(e.to_string()))?;
    let record = payload
        .as_object()
        .cloned()
        .ok_or_else(|| StorageError::format(format!("{kind} payload is not a JSON object")))?;
    catalog.decode(kind, record)
}

#[async_trait]
impl StorageEngine for RelationalStore {
    async fn register(&self, entity: Box<dyn Storable>) -> StorageResult<()> {
        // Preconditions
        assert!(!entity.id().is_empty(), "entity must have an id");

        if !self.catalog.contains(entity.kind()) {
            return Err(StorageError::format(format!(
                "unknown entity kind {:?}",
                entity.kind()
            )));
        }

        let key = RegistryKey::of(entity.as_ref());
        let mut pending = self.pending.lock().await;
        pending.push(Change::Upsert(entity));

        tracing::debug!(key = %key, "staged upsert");
        Ok(())
    }

    async fn get(&self, kind: &str, id: &str) -> StorageResult<Option<Box<dyn Storable>>> {
        if !self.catalog.contains(kind) {
            return Ok(None);
        }

        let stmt = format!("SELECT payload FROM {} WHERE id = $1", table_name(kind));
        let row = sqlx::query(&stmt)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let entity = row_to_entity(&self.catalog, kind, &row)?;
                // Postcondition
                assert_eq!(entity.id(), id, "returned entity must match requested id");
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    async fn all(&self) -> StorageResult<Registry> {
        let mut registry = Registry::new();
        let kinds: Vec<&'static str> = self.catalog.kinds().collect();
        for kind in kinds {
            for entity in self.fetch_kind(kind).await? {
                registry.insert(RegistryKey::of(entity.as_ref()), entity);
            }
        }
        Ok(registry)
    }

    async fn all_of_kind(&self, kind: &str) -> StorageResult<Registry> {
        if !self.catalog.contains(kind) {
            return Ok(Registry::new());
        }

        let mut registry = Registry::new();
        for entity in self.fetch_kind(kind).await? {
            registry.insert(RegistryKey::of(entity.as_ref()), entity);
        }
        Ok(registry)
    }

    async fn count(&self, kind: Option<&str>) -> StorageResult<usize> {
        let kinds: Vec<&str> = match kind {
            Some(kind) if !self.catalog.contains(kind) => return Ok(0),
            Some(kind) => vec![kind],
            None => self.catalog.kinds().collect(),
        };

        let mut total: usize = 0;
        for kind in kinds {
            let stmt = format!("SELECT COUNT(*) FROM {}", table_name(kind));
            let count: i64 = sqlx::query_scalar(&stmt)
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            total += usize::try_from(count).unwrap_or(0);
        }
        Ok(total)
    }

    async fn delete(&self, kind: &str, id: &str) -> StorageResult<()> {
        let key = RegistryKey::new(kind, id);
        let mut pending = self.pending.lock().await;
        pending.push(Change::Delete(key.clone()));

        tracing::debug!(key = %key, "staged delete");
        Ok(())
    }

    async fn save_all(&self) -> StorageResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(());
        }

        // One transaction for the whole staged set; any failure drops the
        // transaction, rolling every change back, and keeps the staged set
        // for a caller-driven retry.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        for change in pending.iter() {
            match change {
                Change::Upsert(entity) => {
                    let stmt = format!(
                        r"
                        INSERT INTO {table} (id, payload, created_at, updated_at)
                        VALUES ($1, $2, $3, $4)
                        ON CONFLICT (id) DO UPDATE SET
                            payload = EXCLUDED.payload,
                            created_at = EXCLUDED.created_at,
                            updated_at = EXCLUDED.updated_at
                        ",
                        table = table_name(entity.kind())
                    );
                    sqlx::query(&stmt)
                        .bind(entity.id())
                        .bind(Value::Object(entity.to_record()))
                        .bind(entity.created_at())
                        .bind(entity.updated_at())
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
                Change::Delete(key) => {
                    let stmt = format!("DELETE FROM {} WHERE id = $1", table_name(&key.kind));
                    sqlx::query(&stmt)
                        .bind(&key.id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
            }
        }
        tx.commit().await.map_err(map_sqlx_error)?;

        let committed = pending.len();
        pending.clear();

        // Postcondition
        assert!(pending.is_empty(), "staged set must drain on commit");

        tracing::info!(changes = committed, "committed staged changes");
        Ok(())
    }

    async fn reload(&self) -> StorageResult<()> {
        // The database is the source of truth; there is nothing to
        // repopulate. Callers must not assume reload rebuilds from empty
        // state on this engine.
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.pool.close().await;
        Ok(())
    }
}

// =============================================================================
// Tests (require running Postgres)
// =============================================================================
