//! Storage - Entity Contract and Backend Engines
//!
//! TigerStyle: one entity contract, one engine trait, two backends.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Storable entities  ──register──▶  StorageEngine            │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐           ┌────────┴────────┐
//! │  DocumentStore  │           │ RelationalStore │
//! │  (JSON file)    │           │   (Postgres)    │
//! └─────────────────┘           └─────────────────┘
//! ```
//!
//! The backend is selected once at startup from [`StoreConfig`] and shared
//! as an explicit `Arc<dyn StorageEngine>`; `save_all` (persist-all) is the
//! only durable write path on either backend.

mod codec;
mod config;
mod document;
mod engine;
mod entity;
mod error;

#[cfg(feature = "postgres")]
mod relational;

pub use codec::{decode_timestamp, encode_timestamp, now, truncate_micros};
pub use config::{open_engine, DbConfig, EngineKind, StoreConfig};
pub use config::{
    ENV_DB_HOST, ENV_DB_NAME, ENV_DB_PASSWORD, ENV_DB_USER, ENV_ENGINE, ENV_FILE_PATH,
};
pub use document::DocumentStore;
pub use engine::{Registry, RegistryKey, StorageEngine};
pub use entity::{
    BaseEntity, Catalog, EntityCore, Identifiable, Reconstruct, ReconstructFn, Record, Storable,
    Timestamped,
};
pub use error::{StorageError, StorageResult};

#[cfg(feature = "postgres")]
pub use relational::RelationalStore;
