//! DocumentStore - JSON File Backend
//!
//! TigerStyle: whole-registry durability, one write path, no partial records.
//!
//! The entire registry is serialized as a single JSON object keyed
//! `<Kind>.<id>` and written with a write-then-rename so readers never see a
//! torn document. Registration is immediately visible in `all()` but only
//! durable after `save_all`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use crate::constants::{RECORD_KEY_KIND, STORE_TMP_EXTENSION};

use super::engine::{Registry, RegistryKey, StorageEngine};
use super::entity::{Catalog, Identifiable, Record, Storable};
use super::error::{StorageError, StorageResult};

use async_trait::async_trait;

/// JSON-file-backed storage engine.
pub struct DocumentStore {
    /// Durable document path. Absence of the file is a valid empty store.
    path: PathBuf,
    /// Reconstruction dispatch for reload.
    catalog: Arc<Catalog>,
    /// Live registry; the sole authority for what currently exists.
    registry: Mutex<Registry>,
}

impl DocumentStore {
    /// Engine over the given document path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, catalog: Arc<Catalog>) -> Self {
        let path = path.into();

        // Precondition
        assert!(
            !path.as_os_str().is_empty(),
            "document path must not be empty"
        );

        Self {
            path,
            catalog,
            registry: Mutex::new(Registry::new()),
        }
    }

    /// Durable document path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the registry into the durable document form.
    fn snapshot(registry: &Registry) -> StorageResult<String> {
        let mut document = Record::new();
        for (key, entity) in registry {
            document.insert(key.to_string(), Value::Object(entity.to_record()));
        }
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the document, then rename it over the durable path.
    async fn write_atomic(&self, payload: &str) -> StorageResult<()> {
        let scratch = self.path.with_extension(STORE_TMP_EXTENSION);
        fs::write(&scratch, payload).await?;
        fs::rename(&scratch, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageEngine for DocumentStore {
    async fn register(&self, entity: Box<dyn Storable>) -> StorageResult<()> {
        // Precondition
        assert!(!entity.id().is_empty(), "entity must have an id");

        let key = RegistryKey::of(entity.as_ref());
        let mut registry = self.registry.lock().await;
        registry.insert(key.clone(), entity);

        tracing::debug!(key = %key, "registered entity");
        Ok(())
    }

    async fn get(&self, kind: &str, id: &str) -> StorageResult<Option<Box<dyn Storable>>> {
        let registry = self.registry.lock().await;
        Ok(registry
            .get(&RegistryKey::new(kind, id))
            .map(|entity| entity.boxed_clone()))
    }

    async fn all(&self) -> StorageResult<Registry> {
        let registry = self.registry.lock().await;
        Ok(registry
            .iter()
            .map(|(key, entity)| (key.clone(), entity.boxed_clone()))
            .collect())
    }

    async fn all_of_kind(&self, kind: &str) -> StorageResult<Registry> {
        let registry = self.registry.lock().await;
        Ok(registry
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, entity)| (key.clone(), entity.boxed_clone()))
            .collect())
    }

    async fn count(&self, kind: Option<&str>) -> StorageResult<usize> {
        let registry = self.registry.lock().await;
        Ok(match kind {
            Some(kind) => registry.keys().filter(|key| key.kind == kind).count(),
            None => registry.len(),
        })
    }

    async fn delete(&self, kind: &str, id: &str) -> StorageResult<()> {
        let mut registry = self.registry.lock().await;
        if registry.remove(&RegistryKey::new(kind, id)).is_some() {
            tracing::debug!(kind = kind, id = id, "deleted entity");
        }
        Ok(())
    }

    async fn save_all(&self) -> StorageResult<()> {
        // Hold the lock for the whole operation so the written set is never
        // torn by a concurrent register/delete.
        let registry = self.registry.lock().await;
        let payload = Self::snapshot(&registry)?;
        self.write_atomic(&payload).await?;

        tracing::info!(
            entities = registry.len(),
            path = %self.path.display(),
            "persisted registry"
        );
        Ok(())
    }

    async fn reload(&self) -> StorageResult<()> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // Absent file is a valid empty store.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let document: Record = serde_json::from_slice(&bytes)?;

        // Reconstruct everything before touching the registry; a malformed
        // document must leave in-memory state exactly as it was.
        let mut rebuilt = Vec::with_capacity(document.len());
        for (key, value) in document {
            let record = value.as_object().cloned().ok_or_else(|| {
                StorageError::format(format!("entry {key:?} is not a JSON object"))
            })?;
            let kind = record
                .get(RECORD_KEY_KIND)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    StorageError::format(format!("entry {key:?} has no discriminator"))
                })?
                .to_string();
            let entity = self.catalog.decode(&kind, record)?;
            rebuilt.push(entity);
        }

        let loaded = rebuilt.len();
        let mut registry = self.registry.lock().await;
        for entity in rebuilt {
            registry.insert(RegistryKey::of(entity.as_ref()), entity);
        }

        tracing::info!(
            entities = loaded,
            path = %self.path.display(),
            "reloaded registry"
        );
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        // Re-sync from disk so a reopened caller sees durable state.
        self.reload().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entity::{BaseEntity, Identifiable};
    use serde_json::json;
    use tempfile::tempdir;

    fn store_at(dir: &Path) -> DocumentStore {
        DocumentStore::new(dir.join("file.json"), Arc::new(Catalog::new()))
    }

    #[tokio::test]
    async fn test_register_visible_before_save() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let entity = BaseEntity::new();
        let key = RegistryKey::new("BaseEntity", entity.id());
        store.register(entity.boxed_clone()).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&key));

        // Nothing durable yet.
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_all_returns_defensive_copy() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store
            .register(BaseEntity::new().boxed_clone())
            .await
            .unwrap();

        let mut view = store.all().await.unwrap();
        view.clear();

        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_save_writes_keyed_document() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let mut entity = BaseEntity::new();
        entity
            .core_mut()
            .set_attribute("name", json!("porch"))
            .unwrap();
        store.register(entity.boxed_clone()).await.unwrap();
        store.save_all().await.unwrap();

        let bytes = std::fs::read(store.path()).unwrap();
        let document: Record = serde_json::from_slice(&bytes).unwrap();
        let key = format!("BaseEntity.{}", entity.id());
        assert_eq!(document.len(), 1);
        assert_eq!(document[&key], Value::Object(entity.to_record()));
    }

    #[tokio::test]
    async fn test_save_then_reload_round_trip() {
        let dir = tempdir().unwrap();

        let mut entity = BaseEntity::new();
        entity
            .core_mut()
            .set_attribute("floors", json!(2))
            .unwrap();

        {
            let store = store_at(dir.path());
            store.register(entity.boxed_clone()).await.unwrap();
            store.save_all().await.unwrap();
        }

        // Fresh process-equivalent store over the same file.
        let store = store_at(dir.path());
        assert_eq!(store.count(None).await.unwrap(), 0);
        store.reload().await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        let key = RegistryKey::new("BaseEntity", entity.id());
        assert_eq!(all[&key].to_record(), entity.to_record());
    }

    #[tokio::test]
    async fn test_reload_missing_file_is_noop() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        store.reload().await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reload_corrupt_file_fails_format() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store
            .register(BaseEntity::new().boxed_clone())
            .await
            .unwrap();

        std::fs::write(store.path(), "{ not json").unwrap();

        let err = store.reload().await.unwrap_err();
        assert!(matches!(err, StorageError::Format(_)));
        // In-memory registry untouched by the failed reload.
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reload_unknown_kind_fails_format() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let mut record = BaseEntity::new().to_record();
        record.insert("kind".to_string(), json!("Ghost"));
        let id = record["id"].as_str().unwrap().to_string();
        let mut document = Record::new();
        document.insert(format!("Ghost.{id}"), Value::Object(record));
        std::fs::write(store.path(), serde_json::to_vec(&document).unwrap()).unwrap();

        let err = store.reload().await.unwrap_err();
        assert!(matches!(err, StorageError::Format(_)));
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_then_save_removes_durably() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let entity = BaseEntity::new();
        store.register(entity.boxed_clone()).await.unwrap();
        store.save_all().await.unwrap();

        store.delete("BaseEntity", entity.id()).await.unwrap();
        store.save_all().await.unwrap();

        let fresh = store_at(dir.path());
        fresh.reload().await.unwrap();
        assert_eq!(fresh.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_absent_is_noop() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());
        store.delete("BaseEntity", "no-such-id").await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_per_id() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let mut entity = BaseEntity::new();
        store.register(entity.boxed_clone()).await.unwrap();
        entity
            .core_mut()
            .set_attribute("color", json!("teal"))
            .unwrap();
        store.register(entity.boxed_clone()).await.unwrap();

        assert_eq!(store.count(None).await.unwrap(), 1);
        let got = store.get("BaseEntity", entity.id()).await.unwrap().unwrap();
        assert_eq!(got.to_record()["color"], json!("teal"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_registry() {
        let dir = tempdir().unwrap();
        // Parent directory does not exist, so the scratch write must fail.
        let store = DocumentStore::new(
            dir.path().join("missing").join("file.json"),
            Arc::new(Catalog::new()),
        );
        store
            .register(BaseEntity::new().boxed_clone())
            .await
            .unwrap();

        let err = store.save_all().await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_count_and_filter_by_kind() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        for _ in 0..3 {
            store
                .register(BaseEntity::new().boxed_clone())
                .await
                .unwrap();
        }

        assert_eq!(store.count(None).await.unwrap(), 3);
        assert_eq!(store.count(Some("BaseEntity")).await.unwrap(), 3);
        assert_eq!(store.count(Some("Other")).await.unwrap(), 0);
        assert_eq!(store.all_of_kind("BaseEntity").await.unwrap().len(), 3);
        assert!(store.all_of_kind("Other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_resyncs_from_disk() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let entity = BaseEntity::new();
        store.register(entity.boxed_clone()).await.unwrap();
        store.save_all().await.unwrap();

        // A second handle over the same file sees the durable state after
        // close.
        let other = store_at(dir.path());
        other.close().await.unwrap();
        assert_eq!(other.count(None).await.unwrap(), 1);
    }
}
