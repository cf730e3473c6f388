//! End-to-end scenarios against the document store: a domain kind defined
//! outside the crate, registered alongside the built-in kind, persisted,
//! reloaded in a process-equivalent fresh store, and deleted.

use std::sync::Arc;

use serde_json::{json, Value};

use kura_core::{
    open_engine, BaseEntity, Catalog, EntityCore, Identifiable, Reconstruct, Record, RegistryKey,
    Storable, StorageEngine, StorageError, StorageResult, StoreConfig, Timestamped,
};

/// A domain kind the way applications define them: typed fields on top of an
/// embedded core, with the core's attribute map left for open-ended extras.
#[derive(Debug, Clone, PartialEq)]
struct Bookmark {
    core: EntityCore,
    url: String,
}

impl Bookmark {
    fn new(url: impl Into<String>) -> Self {
        Self {
            core: EntityCore::fresh(),
            url: url.into(),
        }
    }

    fn core_mut(&mut self) -> &mut EntityCore {
        &mut self.core
    }
}

impl Identifiable for Bookmark {
    fn id(&self) -> &str {
        self.core.id()
    }
}

impl Timestamped for Bookmark {
    fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.core.created_at()
    }

    fn updated_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.core.updated_at()
    }

    fn touch(&mut self, now: chrono::DateTime<chrono::Utc>) {
        self.core.touch(now);
    }
}

#[async_trait::async_trait]
impl Storable for Bookmark {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn to_record(&self) -> Record {
        let mut record = self.core.write_record(Self::KIND);
        record.insert("url".to_string(), Value::String(self.url.clone()));
        record
    }

    fn boxed_clone(&self) -> Box<dyn Storable> {
        Box::new(self.clone())
    }
}

impl Reconstruct for Bookmark {
    const KIND: &'static str = "Bookmark";

    fn from_record(mut record: Record) -> StorageResult<Self> {
        let url = match record.remove("url") {
            Some(Value::String(url)) => url,
            _ => return Err(StorageError::format("bookmark record has no url")),
        };
        Ok(Self {
            core: EntityCore::from_record(record)?,
            url,
        })
    }
}

fn catalog() -> Arc<Catalog> {
    Arc::new(Catalog::new().with::<Bookmark>())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kura_core=debug")
        .try_init();
}

#[tokio::test]
async fn test_end_to_end_lifecycle() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::file(dir.path().join("file.json"));

    // (a) construct, (b) register + save.
    let mut bookmark = Bookmark::new("https://example.org/garden");
    bookmark.core_mut().set_attribute("tags", json!(["plants", "soil"]))?;
    {
        let engine = open_engine(&config, catalog()).await?;
        bookmark.save(engine.as_ref()).await?;
    }

    // (c) fresh process-equivalent store, (d) reload.
    let engine = open_engine(&config, catalog()).await?;
    engine.reload().await?;

    let all = engine.all().await?;
    assert_eq!(all.len(), 1);
    let key = RegistryKey::new("Bookmark", bookmark.id());
    assert_eq!(all[&key].to_record(), bookmark.to_record());

    // (e) delete, save — reload now yields an empty store.
    engine.delete("Bookmark", bookmark.id()).await?;
    engine.save_all().await?;

    let fresh = open_engine(&config, catalog()).await?;
    fresh.reload().await?;
    assert_eq!(fresh.count(None).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_save_advances_updated_at_and_persists() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::file(dir.path().join("file.json"));
    let engine = open_engine(&config, catalog()).await?;

    let mut entity = BaseEntity::new();
    let before = entity.updated_at();

    // Move the clock past microsecond resolution.
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    entity.save(engine.as_ref()).await?;

    assert!(entity.updated_at() > before);
    assert!(entity.created_at() < entity.updated_at());

    // The durable record matches the post-save snapshot field for field.
    let fresh = open_engine(&config, catalog()).await?;
    fresh.reload().await?;
    let got = fresh.get("BaseEntity", entity.id()).await?.unwrap();
    assert_eq!(got.to_record(), entity.to_record());
    Ok(())
}

#[tokio::test]
async fn test_mixed_kinds_share_one_store() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::file(dir.path().join("file.json"));
    let engine = open_engine(&config, catalog()).await?;

    let mut bookmark = Bookmark::new("https://example.org");
    let mut plain = BaseEntity::new();
    bookmark.save(engine.as_ref()).await?;
    plain.save(engine.as_ref()).await?;

    assert_eq!(engine.count(None).await?, 2);
    assert_eq!(engine.count(Some("Bookmark")).await?, 1);

    let bookmarks = engine.all_of_kind("Bookmark").await?;
    assert_eq!(bookmarks.len(), 1);
    assert_eq!(
        bookmarks[&RegistryKey::new("Bookmark", bookmark.id())].to_record()["url"],
        json!("https://example.org")
    );

    // A fresh store reloads both kinds through the catalog.
    let fresh = open_engine(&config, catalog()).await?;
    fresh.reload().await?;
    assert_eq!(fresh.count(None).await?, 2);
    assert_eq!(fresh.count(Some("BaseEntity")).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_reload_requires_cataloged_kind() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let config = StoreConfig::file(dir.path().join("file.json"));

    {
        let engine = open_engine(&config, catalog()).await?;
        let mut bookmark = Bookmark::new("https://example.org");
        bookmark.save(engine.as_ref()).await?;
    }

    // A store whose catalog lacks the kind cannot reconstruct the record.
    let bare = open_engine(&config, Arc::new(Catalog::new())).await?;
    let err = bare.reload().await.unwrap_err();
    assert!(matches!(err, StorageError::Format(_)));
    assert_eq!(bare.count(None).await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_typed_field_round_trips_with_extras() -> anyhow::Result<()> {
    init_tracing();
    let mut bookmark = Bookmark::new("https://example.org/a");
    bookmark.core_mut().set_attribute("visits", json!(7))?;

    let record = bookmark.to_record();
    assert_eq!(record["kind"], json!("Bookmark"));
    assert_eq!(record["url"], json!("https://example.org/a"));
    assert_eq!(record["visits"], json!(7));

    let rebuilt = Bookmark::from_record(record)?;
    assert_eq!(rebuilt, bookmark);
    Ok(())
}
