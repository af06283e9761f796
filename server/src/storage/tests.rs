use super::backend::ObjectStoreBackend;
use super::config::StorageConfig;
use super::error::StoreError;
use super::memory::MemoryBackend;
use super::traits::{ApiKeyStorage, ProductStorage};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, ObjectStore, PutMode,
    PutMultipartOpts, PutOptions, PutPayload, PutResult,
};
use serde_json::json;
use shared_types::{ApiKey, Product};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn vanilla() -> Product {
    let mut product = Product::new("001", "Vanilla");
    product.ingredients = vec!["milk".to_string(), "vanilla".to_string()];
    product
}

fn create_object_backend() -> (ObjectStoreBackend, Arc<InMemory>) {
    let raw = Arc::new(InMemory::new());
    (ObjectStoreBackend::new(raw.clone()), raw)
}

fn create_local_backend() -> (ObjectStoreBackend, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::Local {
        path: temp_dir.path().to_path_buf(),
    };
    let backend = ObjectStoreBackend::from_config(config).unwrap();
    (backend, temp_dir)
}

#[tokio::test]
async fn test_memory_duplicate_ids_are_inconsistent() {
    let backend = MemoryBackend::new();
    backend.create(&vanilla()).await.unwrap();
    backend.insert_unchecked(Product::new("001", "Vanilla copy")).await;

    let result = backend.read("001").await;
    assert!(matches!(result, Err(StoreError::Inconsistent(_))));

    let result = backend.read_many("", 10).await;
    assert!(matches!(result, Err(StoreError::Inconsistent(_))));

    // Writes that target the id refuse to pick one of the copies
    let result = backend.update(&vanilla()).await;
    assert!(matches!(result, Err(StoreError::Inconsistent(_))));
}

#[tokio::test]
async fn test_memory_delete_clears_duplicates() {
    let backend = MemoryBackend::new();
    backend.insert_unchecked(vanilla()).await;
    backend.insert_unchecked(vanilla()).await;

    backend.delete("001").await.unwrap();

    let result = backend.read("001").await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_object_store_stray_document_is_inconsistent() {
    let (backend, raw) = create_object_backend();
    backend.create(&vanilla()).await.unwrap();
    backend.create(&Product::new("002", "Chocolate")).await.unwrap();

    // A second document for 001 written behind the index's back
    let stray = serde_json::to_vec(&vanilla()).unwrap();
    let record_id = uuid::Uuid::now_v7().simple().to_string();
    raw.put(
        &Path::from(format!("products/{record_id}.json")),
        PutPayload::from(stray),
    )
    .await
    .unwrap();

    let result = backend.read_many("", 10).await;
    assert!(matches!(result, Err(StoreError::Inconsistent(_))));

    // Pages that do not contain both copies still read fine
    let page = backend.read_many("", 1).await.unwrap();
    assert_eq!(page.products[0].product_id, "001");
}

#[tokio::test]
async fn test_object_store_index_mismatch_is_inconsistent() {
    let (backend, raw) = create_object_backend();
    backend.create(&vanilla()).await.unwrap();
    backend.create(&Product::new("002", "Chocolate")).await.unwrap();

    // Point 002's index entry at 001's document
    let page = backend.read_many("", 1).await.unwrap();
    raw.put(
        &Path::from("index/002"),
        PutPayload::from(page.cursor.into_bytes()),
    )
    .await
    .unwrap();

    let result = backend.read("002").await;
    assert!(matches!(result, Err(StoreError::Inconsistent(_))));
}

#[tokio::test]
async fn test_object_store_claimed_but_unwritten_reads_as_absent() {
    let (backend, raw) = create_object_backend();
    let record_id = uuid::Uuid::now_v7().simple().to_string();
    raw.put(&Path::from("index/001"), PutPayload::from(record_id.into_bytes()))
        .await
        .unwrap();

    let result = backend.read("001").await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    // The claim still blocks an exclusive create
    let result = backend.create(&vanilla()).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn test_local_layout_on_disk() {
    let (backend, dir) = create_local_backend();
    backend.create(&vanilla()).await.unwrap();

    assert!(dir.path().join("index").join("001").exists());
    let documents: Vec<_> = std::fs::read_dir(dir.path().join("products"))
        .unwrap()
        .collect();
    assert_eq!(documents.len(), 1);
}

#[tokio::test]
async fn test_local_product_ids_with_separators() {
    let (backend, _dir) = create_local_backend();
    let product = Product::new("flavours/vanilla", "Vanilla");

    backend.create(&product).await.unwrap();
    assert_eq!(backend.read("flavours/vanilla").await.unwrap(), product);

    backend.delete("flavours/vanilla").await.unwrap();
    assert!(matches!(
        backend.read("flavours/vanilla").await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_partial_update_rejects_bad_shapes() {
    let backend = MemoryBackend::new();
    backend.create(&vanilla()).await.unwrap();

    let fields = json!({"ingredients": "milk"}).as_object().unwrap().clone();
    let result = backend.update_partial("001", &fields).await;
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));

    // The stored product is untouched
    assert_eq!(backend.read("001").await.unwrap(), vanilla());
}

#[tokio::test]
async fn test_duplicate_api_keys_are_reported() {
    let (backend, _raw) = create_object_backend();
    backend
        .insert_key(&ApiKey::new("client-a", "shared-secret"))
        .await
        .unwrap();
    backend
        .insert_key(&ApiKey::new("client-b", "shared-secret"))
        .await
        .unwrap();

    let matches = backend.find_by_key("shared-secret").await.unwrap();
    assert_eq!(matches.len(), 2);

    let result = backend
        .insert_key(&ApiKey::new("client-a", "other-secret"))
        .await;
    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
}

#[tokio::test]
async fn test_key_lookup_only_reads_entries_for_that_key() {
    let (backend, raw) = create_object_backend();
    backend.insert_key(&ApiKey::new("web", "abc")).await.unwrap();
    backend.insert_key(&ApiKey::new("mobile", "ab")).await.unwrap();
    backend.insert_key(&ApiKey::new("batch", "a/b")).await.unwrap();

    let matches = backend.find_by_key("ab").await.unwrap();
    assert_eq!(matches, vec![ApiKey::new("mobile", "ab")]);
    let matches = backend.find_by_key("a/b").await.unwrap();
    assert_eq!(matches, vec![ApiKey::new("batch", "a/b")]);
    assert!(backend.find_by_key("a").await.unwrap().is_empty());
    assert!(backend.find_by_key("").await.unwrap().is_empty());

    let clients: Vec<ObjectMeta> = raw
        .list(Some(&Path::from("apikeys/clients")))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(clients.len(), 3);
    let entries: Vec<ObjectMeta> = raw
        .list(Some(&Path::from("apikeys/keys/ab")))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

/// What [`InterleavingStore`] does when the backend first writes a product
/// document in place.
#[derive(Debug, Clone, Copy)]
enum Interleave {
    /// Another client deletes the record just before the write lands.
    DeleteRecord,
    /// Another client renames the product just before the write lands.
    RenameProduct,
    /// Like `DeleteRecord`, on a store without conditional updates.
    DeleteRecordUnconditional,
    /// Document writes fail, and so does releasing the index claim.
    FailWrites,
}

/// An in-memory store that lets a competing client act at the worst moment.
#[derive(Debug)]
struct InterleavingStore {
    inner: Arc<InMemory>,
    mode: Interleave,
    armed: AtomicBool,
}

impl InterleavingStore {
    fn backend(mode: Interleave) -> (ObjectStoreBackend, Arc<Self>) {
        let store = Arc::new(Self {
            inner: Arc::new(InMemory::new()),
            mode,
            armed: AtomicBool::new(false),
        });
        (ObjectStoreBackend::new(store.clone()), store)
    }

    /// Interfere with the next in-place document write.
    fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    fn failure(what: &str) -> object_store::Error {
        object_store::Error::Generic {
            store: "interleaving",
            source: what.to_string().into(),
        }
    }

    async fn interfere(&self, location: &Path) -> object_store::Result<()> {
        match self.mode {
            Interleave::DeleteRecord | Interleave::DeleteRecordUnconditional => {
                self.inner.delete(&Path::from("index/001")).await?;
                self.inner.delete(location).await?;
            }
            Interleave::RenameProduct => {
                let bytes = self.inner.get(location).await?.bytes().await?;
                let mut stored: Product = serde_json::from_slice(&bytes)
                    .map_err(|_| Self::failure("bad document"))?;
                stored.name = "Vanilla Bean".to_string();
                let json = serde_json::to_vec(&stored).map_err(|_| Self::failure("encode"))?;
                self.inner.put(location, PutPayload::from(json)).await?;
            }
            Interleave::FailWrites => {}
        }
        Ok(())
    }
}

impl fmt::Display for InterleavingStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterleavingStore({:?})", self.mode)
    }
}

#[async_trait]
impl ObjectStore for InterleavingStore {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        let document = location.as_ref().starts_with("products/");

        if let Interleave::FailWrites = self.mode {
            if document {
                return Err(Self::failure("document write refused"));
            }
            return self.inner.put_opts(location, payload, opts).await;
        }

        if let (Interleave::DeleteRecordUnconditional, PutMode::Update(_)) =
            (self.mode, &opts.mode)
        {
            return Err(object_store::Error::NotImplemented);
        }
        let in_place = !matches!(opts.mode, PutMode::Create);
        if document && in_place && self.armed.swap(false, Ordering::SeqCst) {
            self.interfere(location).await?;
        }
        self.inner.put_opts(location, payload, opts).await
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> object_store::Result<Box<dyn MultipartUpload>> {
        self.inner.put_multipart_opts(location, opts).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        self.inner.get_opts(location, options).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        if let Interleave::FailWrites = self.mode {
            if location.as_ref().starts_with("index/") {
                return Err(Self::failure("index delete refused"));
            }
        }
        self.inner.delete(location).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.inner.list(prefix)
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
        self.inner.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner.copy_if_not_exists(from, to).await
    }
}

async fn stored_documents(raw: &InMemory) -> usize {
    let documents: Vec<ObjectMeta> = raw
        .list(Some(&Path::from("products")))
        .try_collect()
        .await
        .unwrap();
    documents.len()
}

#[tokio::test]
async fn test_update_racing_a_delete_leaves_no_document() {
    let (backend, store) = InterleavingStore::backend(Interleave::DeleteRecord);
    backend.create(&vanilla()).await.unwrap();
    store.arm();

    let mut replacement = vanilla();
    replacement.name = "Vanilla Bean".to_string();
    let result = backend.update(&replacement).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    assert!(matches!(backend.read("001").await, Err(StoreError::NotFound(_))));
    assert!(matches!(
        backend.read_many("", 10).await,
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(stored_documents(&store.inner).await, 0);

    // The id is free again and lists once
    backend.create(&vanilla()).await.unwrap();
    let page = backend.read_many("", 10).await.unwrap();
    assert_eq!(page.products, vec![vanilla()]);
}

#[tokio::test]
async fn test_update_racing_a_delete_without_conditional_writes() {
    let (backend, store) = InterleavingStore::backend(Interleave::DeleteRecordUnconditional);
    backend.create(&vanilla()).await.unwrap();
    store.arm();

    let fields = json!({"name": "Vanilla Bean"}).as_object().unwrap().clone();
    let result = backend.update_partial("001", &fields).await;
    assert!(matches!(result, Err(StoreError::NotFound(_))));

    // The document written after the delete was withdrawn
    assert_eq!(stored_documents(&store.inner).await, 0);
    backend.create(&vanilla()).await.unwrap();
    assert_eq!(backend.read_many("", 10).await.unwrap().products.len(), 1);
}

#[tokio::test]
async fn test_concurrent_patches_both_survive() {
    let (backend, store) = InterleavingStore::backend(Interleave::RenameProduct);
    backend.create(&vanilla()).await.unwrap();
    store.arm();

    let fields = json!({"ingredients": ["milk", "vanilla", "sugar"]})
        .as_object()
        .unwrap()
        .clone();
    backend.update_partial("001", &fields).await.unwrap();

    let stored = backend.read("001").await.unwrap();
    assert_eq!(stored.name, "Vanilla Bean");
    assert_eq!(stored.ingredients, vec!["milk", "vanilla", "sugar"]);
    assert_eq!(stored_documents(&store.inner).await, 1);
}

#[tokio::test]
async fn test_upsert_racing_a_delete_reinserts() {
    let (backend, store) = InterleavingStore::backend(Interleave::DeleteRecord);
    backend.create(&vanilla()).await.unwrap();
    store.arm();

    let mut replacement = vanilla();
    replacement.name = "Vanilla Bean".to_string();
    backend.upsert(&replacement).await.unwrap();

    assert_eq!(backend.read("001").await.unwrap(), replacement);
    assert_eq!(stored_documents(&store.inner).await, 1);
}

#[tokio::test]
async fn test_failed_claim_release_keeps_id_reserved() {
    let (backend, store) = InterleavingStore::backend(Interleave::FailWrites);

    let result = backend.create(&vanilla()).await;
    assert!(matches!(result, Err(StoreError::Backend(_))));

    // The stuck claim reads as absent and keeps blocking creates
    assert!(matches!(backend.read("001").await, Err(StoreError::NotFound(_))));
    assert!(store.inner.head(&Path::from("index/001")).await.is_ok());
    let result = backend.create(&vanilla()).await;
    assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
}
