//! StorageEngine - Backend Trait
//!
//! TigerStyle: one trait, two sibling backends, selected once at startup.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    StorageEngine Trait                       │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐           ┌────────┴────────┐
//! │  DocumentStore  │           │ RelationalStore │
//! │  (JSON file)    │           │   (Postgres)    │
//! └─────────────────┘           └─────────────────┘
//! ```
//!
//! Semantic differences callers may rely on (and nothing else):
//! - `register`/`delete` are immediately visible in the document store's
//!   `all()` but only staged by the relational store until `save_all`.
//! - `reload` repopulates the document store from its file; the relational
//!   store's source of truth is the database, so its `reload` is a no-op.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use super::entity::{Identifiable, Storable};
use super::error::{StorageError, StorageResult};

// =============================================================================
// RegistryKey
// =============================================================================

/// Composite registry key: type discriminator plus entity id.
///
/// Renders as `<Kind>.<id>`, the key format of the durable document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryKey {
    /// Type discriminator.
    pub kind: String,
    /// Entity id.
    pub id: String,
}

impl RegistryKey {
    /// Build a key from its parts.
    ///
    /// # Panics
    /// Panics if either part is empty.
    #[must_use]
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        let kind = kind.into();
        let id = id.into();

        // Preconditions
        assert!(!kind.is_empty(), "kind must not be empty");
        assert!(!id.is_empty(), "id must not be empty");

        Self { kind, id }
    }

    /// Key of a live entity.
    #[must_use]
    pub fn of(entity: &dyn Storable) -> Self {
        Self::new(entity.kind(), entity.id())
    }

    /// Parse a `<Kind>.<id>` string.
    ///
    /// # Errors
    /// [`StorageError::Format`] if the separator or either part is missing.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        match raw.split_once('.') {
            Some((kind, id)) if !kind.is_empty() && !id.is_empty() => Ok(Self {
                kind: kind.to_string(),
                id: id.to_string(),
            }),
            _ => Err(StorageError::format(format!(
                "registry key {raw:?} is not <Kind>.<id>"
            ))),
        }
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.id)
    }
}

/// The in-memory set of currently known entities, keyed by (kind, id).
pub type Registry = BTreeMap<RegistryKey, Box<dyn Storable>>;

// =============================================================================
// StorageEngine
// =============================================================================

/// Persistence backend for the entity registry.
///
/// Engines are shared (`Arc<dyn StorageEngine>`) and internally serialize
/// registry access behind a single lock, so persist-all never observes a
/// torn set.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Insert or overwrite the registry entry for this entity. Idempotent
    /// per (kind, id); not durable until the next [`save_all`].
    ///
    /// # Errors
    /// Backend-specific validation failures.
    ///
    /// [`save_all`]: StorageEngine::save_all
    async fn register(&self, entity: Box<dyn Storable>) -> StorageResult<()>;

    /// Look up one entity by kind and id.
    ///
    /// # Errors
    /// Backend read failures.
    async fn get(&self, kind: &str, id: &str) -> StorageResult<Option<Box<dyn Storable>>>;

    /// Defensive copy of the current registry. Mutating the returned map
    /// never bypasses `register`/`delete`.
    ///
    /// # Errors
    /// Backend read failures.
    async fn all(&self) -> StorageResult<Registry>;

    /// [`all`] filtered to one discriminator.
    ///
    /// # Errors
    /// Backend read failures.
    ///
    /// [`all`]: StorageEngine::all
    async fn all_of_kind(&self, kind: &str) -> StorageResult<Registry>;

    /// Number of known entities, optionally of one kind.
    ///
    /// # Errors
    /// Backend read failures.
    async fn count(&self, kind: Option<&str>) -> StorageResult<usize>;

    /// Remove the (kind, id) entry; no-op if absent. Not durable until the
    /// next [`save_all`].
    ///
    /// # Errors
    /// Backend write failures.
    ///
    /// [`save_all`]: StorageEngine::save_all
    async fn delete(&self, kind: &str, id: &str) -> StorageResult<()>;

    /// Persist-all: durably write the entire registered set as one unit.
    /// The only write path; on failure the in-memory state is unchanged.
    ///
    /// # Errors
    /// [`StorageError::Io`] for medium failures, [`StorageError::Integrity`]
    /// for relational constraint violations (whole batch rolled back).
    async fn save_all(&self) -> StorageResult<()>;

    /// Repopulate from durable state. Document store: reads its file
    /// (absent file is an empty store, not an error). Relational store:
    /// no-op.
    ///
    /// # Errors
    /// [`StorageError::Format`] for malformed durable content.
    async fn reload(&self) -> StorageResult<()>;

    /// Release the backend: the document store re-syncs from disk, the
    /// relational store closes its connection pool.
    ///
    /// # Errors
    /// Backend-specific shutdown failures.
    async fn close(&self) -> StorageResult<()>;
}
