//! Kura Core - Entity Persistence Engine
//!
//! TigerStyle persistence core for a small CRUD application: a base entity
//! contract (identity, timestamps, record marshaling) and a storage engine
//! abstraction with two sibling backends selected once at startup.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Kura Core                      │
//! ├─────────────────────────────────────────────┤
//! │  Entity contract        │ id + timestamps   │
//! │  Codec                  │ ISO-8601 wire     │
//! │  DocumentStore          │ JSON file         │
//! │  RelationalStore        │ Postgres          │
//! ├─────────────────────────────────────────────┤
//! │  Config                 │ engine selection  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use kura_core::{open_engine, BaseEntity, Catalog, Storable, StorageEngine, StoreConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StoreConfig::from_env()?;
//! let engine = open_engine(&config, Arc::new(Catalog::new())).await?;
//! engine.reload().await?;
//!
//! let mut entity = BaseEntity::new();
//! entity.save(engine.as_ref()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod storage;

// Re-export common types
pub use constants::*;
pub use storage::{
    decode_timestamp, encode_timestamp, now, open_engine, truncate_micros, BaseEntity, Catalog,
    DbConfig, DocumentStore, EngineKind, EntityCore, Identifiable, Reconstruct, ReconstructFn,
    Record, Registry, RegistryKey, Storable, StorageEngine, StorageError, StorageResult,
    StoreConfig, Timestamped,
};

#[cfg(feature = "postgres")]
pub use storage::RelationalStore;
