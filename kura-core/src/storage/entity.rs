//! Entity - Base Contract for Stored Objects
//!
//! TigerStyle: capabilities over inheritance. Any type that satisfies
//! [`Storable`] (identity + timestamps + record marshaling) can be held and
//! persisted by a storage engine; there is no base-class hierarchy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storable: Identifiable + Timestamped + record marshaling    │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐           ┌────────┴────────┐
//! │   BaseEntity    │           │  domain kinds   │
//! │ (built-in kind) │           │ (embed a core)  │
//! └─────────────────┘           └─────────────────┘
//! ```
//!
//! Concrete kinds embed an [`EntityCore`] for the shared state (id,
//! timestamps, open attribute map) and add their own typed fields on top.
//! Reconstruction from stored records is dispatched through a [`Catalog`]
//! keyed by the type discriminator.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{
    ATTRIBUTE_KEY_BYTES_MAX, RECORD_KEY_CREATED_AT, RECORD_KEY_ID, RECORD_KEY_KIND,
    RECORD_KEY_UPDATED_AT,
};

use super::codec;
use super::engine::StorageEngine;
use super::error::{StorageError, StorageResult};

/// The plain-mapping form of an entity: attributes plus `id`, encoded
/// timestamps, and the type discriminator.
pub type Record = serde_json::Map<String, Value>;

/// Fields owned by the contract itself; never valid as attribute keys.
const RESERVED_KEYS: [&str; 4] = [
    RECORD_KEY_ID,
    RECORD_KEY_CREATED_AT,
    RECORD_KEY_UPDATED_AT,
    RECORD_KEY_KIND,
];

// =============================================================================
// Capability Traits
// =============================================================================

/// Something with a stable, unique identity.
pub trait Identifiable {
    /// Globally unique id, fixed at construction.
    fn id(&self) -> &str;
}

/// Something with creation and modification timestamps.
pub trait Timestamped {
    /// Set once at construction.
    fn created_at(&self) -> DateTime<Utc>;

    /// Advances on every save.
    fn updated_at(&self) -> DateTime<Utc>;

    /// Move `updated_at` to `now`.
    ///
    /// # Panics
    /// Panics if `now` precedes `created_at`.
    fn touch(&mut self, now: DateTime<Utc>);
}

/// The full contract a storage engine requires of an entity.
#[async_trait]
pub trait Storable: Identifiable + Timestamped + fmt::Debug + Send + Sync {
    /// Type discriminator identifying the concrete kind in stored records.
    fn kind(&self) -> &'static str;

    /// Snapshot the entity as a plain mapping: shallow-copied attributes plus
    /// encoded timestamps and the discriminator.
    fn to_record(&self) -> Record;

    /// Clone into a fresh heap allocation behind the trait object.
    fn boxed_clone(&self) -> Box<dyn Storable>;

    /// Touch `updated_at`, register with the engine, and trigger its
    /// persist-all. This is a global commit of the engine's whole registry,
    /// not a per-entity write.
    ///
    /// # Errors
    /// Propagates any engine failure; on error the durable state is
    /// unchanged.
    async fn save(&mut self, engine: &dyn StorageEngine) -> StorageResult<()> {
        self.touch(codec::now());
        engine.register(self.boxed_clone()).await?;
        engine.save_all().await
    }
}

/// Reconstruction path: rebuild a concrete kind from its stored record.
///
/// Constructing twice from the same record must yield value-equal but
/// allocation-distinct objects; implementations never cache or intern.
pub trait Reconstruct: Sized {
    /// Discriminator this kind serializes under.
    const KIND: &'static str;

    /// Rebuild from a stored record.
    ///
    /// # Errors
    /// [`StorageError::Format`] for missing/malformed contract fields,
    /// [`StorageError::Type`] for attribute keys that are not identifiers.
    fn from_record(record: Record) -> StorageResult<Self>;
}

// =============================================================================
// EntityCore
// =============================================================================

/// Shared state every entity kind embeds: id, timestamps, and one open
/// attribute map for fields not modeled as typed struct fields.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCore {
    id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    attributes: BTreeMap<String, Value>,
}

impl EntityCore {
    /// Fresh core: new uuid, `created_at == updated_at == now`.
    #[must_use]
    pub fn fresh() -> Self {
        let now = codec::now();
        let core = Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            attributes: BTreeMap::new(),
        };

        // Postconditions
        assert!(!core.id.is_empty(), "fresh id must not be empty");
        assert_eq!(
            core.created_at, core.updated_at,
            "fresh timestamps must match"
        );

        core
    }

    /// Rebuild a core from a stored record.
    ///
    /// Copies `id`/`created_at`/`updated_at` verbatim (decoding the
    /// timestamps), strips the discriminator, and applies every remaining key
    /// as an attribute.
    ///
    /// # Errors
    /// [`StorageError::Format`] if the contract fields are missing or
    /// malformed, [`StorageError::Type`] if a remaining key is not a valid
    /// identifier.
    pub fn from_record(mut record: Record) -> StorageResult<Self> {
        // The discriminator is derived state; strip it first so a stored copy
        // can never land in the attribute space.
        record.remove(RECORD_KEY_KIND);

        let id = take_string(&mut record, RECORD_KEY_ID)?;
        if id.is_empty() {
            return Err(StorageError::format("field \"id\" must not be empty"));
        }

        let created_at = codec::decode_timestamp(&take_string(&mut record, RECORD_KEY_CREATED_AT)?)?;
        let updated_at = codec::decode_timestamp(&take_string(&mut record, RECORD_KEY_UPDATED_AT)?)?;
        if updated_at < created_at {
            return Err(StorageError::format(format!(
                "entity {id}: updated_at precedes created_at"
            )));
        }

        let mut attributes = BTreeMap::new();
        for (key, value) in record {
            validate_attribute_key(&key)?;
            attributes.insert(key, value);
        }

        Ok(Self {
            id,
            created_at,
            updated_at,
            attributes,
        })
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last-save timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move `updated_at` to `now`.
    ///
    /// # Panics
    /// Panics if `now` precedes `created_at`; time does not move backwards
    /// past construction.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        // Precondition
        assert!(
            now >= self.created_at,
            "updated_at must not precede created_at"
        );

        self.updated_at = now;
    }

    /// Set an attribute.
    ///
    /// # Errors
    /// [`StorageError::Type`] if the key is not a valid identifier or is one
    /// of the reserved contract fields.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: Value) -> StorageResult<()> {
        let key = key.into();
        validate_attribute_key(&key)?;
        self.attributes.insert(key, value);
        Ok(())
    }

    /// Read an attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// All attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Snapshot as a record under the given discriminator.
    #[must_use]
    pub fn write_record(&self, kind: &str) -> Record {
        // Invariant: the discriminator is derived here, never attribute state.
        assert!(
            !self.attributes.contains_key(RECORD_KEY_KIND),
            "discriminator must not be stored as an attribute"
        );

        let mut record = Record::new();
        record.insert(RECORD_KEY_ID.to_string(), Value::String(self.id.clone()));
        record.insert(
            RECORD_KEY_CREATED_AT.to_string(),
            Value::String(codec::encode_timestamp(self.created_at)),
        );
        record.insert(
            RECORD_KEY_UPDATED_AT.to_string(),
            Value::String(codec::encode_timestamp(self.updated_at)),
        );
        record.insert(RECORD_KEY_KIND.to_string(), Value::String(kind.to_string()));
        for (key, value) in &self.attributes {
            record.insert(key.clone(), value.clone());
        }
        record
    }
}

/// Pop a required string field out of a record.
fn take_string(record: &mut Record, key: &str) -> StorageResult<String> {
    match record.remove(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(StorageError::format(format!(
            "field {key:?} must be a string, got {other}"
        ))),
        None => Err(StorageError::format(format!("field {key:?} is missing"))),
    }
}

/// Attribute keys must be identifiers so they address a well-formed slot in
/// the entity's attribute space.
fn validate_attribute_key(key: &str) -> StorageResult<()> {
    if key.len() > ATTRIBUTE_KEY_BYTES_MAX {
        return Err(StorageError::type_error(format!(
            "attribute key exceeds {ATTRIBUTE_KEY_BYTES_MAX} bytes"
        )));
    }

    let mut chars = key.chars();
    let head_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(StorageError::type_error(format!(
            "attribute key {key:?} is not a valid identifier"
        )));
    }

    if RESERVED_KEYS.contains(&key) {
        return Err(StorageError::type_error(format!(
            "attribute key {key:?} is reserved"
        )));
    }

    Ok(())
}

// =============================================================================
// BaseEntity
// =============================================================================

/// The built-in entity kind: nothing beyond the base contract.
///
/// Domain kinds live outside this crate; they embed an [`EntityCore`] and
/// implement [`Storable`] + [`Reconstruct`] the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseEntity {
    core: EntityCore,
}

impl BaseEntity {
    /// Fresh entity with no attributes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            core: EntityCore::fresh(),
        }
    }

    /// Fresh entity with initial attributes.
    ///
    /// # Errors
    /// [`StorageError::Type`] if any key is not a valid identifier.
    pub fn with_attributes(
        attributes: impl IntoIterator<Item = (String, Value)>,
    ) -> StorageResult<Self> {
        let mut core = EntityCore::fresh();
        for (key, value) in attributes {
            core.set_attribute(key, value)?;
        }
        Ok(Self { core })
    }

    /// Shared base state.
    #[must_use]
    pub fn core(&self) -> &EntityCore {
        &self.core
    }

    /// Mutable base state.
    pub fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
}

impl Default for BaseEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl Identifiable for BaseEntity {
    fn id(&self) -> &str {
        self.core.id()
    }
}

impl Timestamped for BaseEntity {
    fn created_at(&self) -> DateTime<Utc> {
        self.core.created_at()
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.core.updated_at()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.core.touch(now);
    }
}

#[async_trait]
impl Storable for BaseEntity {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn to_record(&self) -> Record {
        self.core.write_record(Self::KIND)
    }

    fn boxed_clone(&self) -> Box<dyn Storable> {
        Box::new(self.clone())
    }
}

impl Reconstruct for BaseEntity {
    const KIND: &'static str = "BaseEntity";

    fn from_record(record: Record) -> StorageResult<Self> {
        Ok(Self {
            core: EntityCore::from_record(record)?,
        })
    }
}

impl fmt::Display for BaseEntity {
    /// Diagnostic rendering: `[<kind>] (<id>) <attributes>`. Not a
    /// persistence format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs: Record = self
            .core
            .attributes()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        write!(
            f,
            "[{}] ({}) {}",
            self.kind(),
            self.id(),
            Value::Object(attrs)
        )
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Reconstruction function for one entity kind.
pub type ReconstructFn = fn(Record) -> StorageResult<Box<dyn Storable>>;

/// Discriminator → reconstruction dispatch table.
///
/// Engines consult the catalog when rebuilding entities from stored records;
/// a discriminator absent from the catalog is a [`StorageError::Format`]
/// error, not a panic.
pub struct Catalog {
    decoders: BTreeMap<&'static str, ReconstructFn>,
}

impl Catalog {
    /// Catalog with the built-in [`BaseEntity`] kind registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
        .with::<BaseEntity>()
    }

    /// Register a kind.
    #[must_use]
    pub fn with<E>(mut self) -> Self
    where
        E: Storable + Reconstruct + 'static,
    {
        self.decoders.insert(E::KIND, |record| {
            E::from_record(record).map(|entity| Box::new(entity) as Box<dyn Storable>)
        });
        self
    }

    /// Whether a discriminator is known.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Registered discriminators, in order.
    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Rebuild an entity of the given kind from its record.
    ///
    /// # Errors
    /// [`StorageError::Format`] for an unknown discriminator or a record the
    /// kind cannot reconstruct from.
    pub fn decode(&self, kind: &str, record: Record) -> StorageResult<Box<dyn Storable>> {
        let decode = self
            .decoders
            .get(kind)
            .ok_or_else(|| StorageError::format(format!("unknown entity kind {kind:?}")))?;
        decode(record)
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("kinds", &self.decoders.keys().collect::<Vec<_>>())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
