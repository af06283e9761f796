use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3Builder, S3ConditionalPut};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload, UpdateVersion};
use shared_types::{ApiKey, Product, ProductPage};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::config::StorageConfig;
use super::error::{StoreError, StoreResult};
use super::traits::{ApiKeyStorage, ProductStorage};
use crate::validation::{self, Fields};

const PRODUCTS_PREFIX: &str = "products";
const INDEX_PREFIX: &str = "index";
const API_KEYS_PREFIX: &str = "apikeys";
const CLIENTS_DIR: &str = "clients";
const KEYS_DIR: &str = "keys";

/// Attempts for writes that lose a race with another writer.
const WRITE_ATTEMPTS: usize = 3;

/// Product documents kept in an object store.
///
/// Layout:
/// - `products/<record_id>.json`: the product document. `record_id` is a
///   UUIDv7 in simple form, so listing order is insertion order.
/// - `index/<product_id>`: the unique-key index, holding the record id.
///   Written with `PutMode::Create`, which makes create exclusive.
/// - `apikeys/clients/<client_id>.json`: a provisioned API key, exclusive by
///   client.
/// - `apikeys/keys/<key>/<client_id>.json`: the same record filed under its
///   key, so a lookup lists only the records sharing that key.
///
/// A document only counts as live while the index points at it. Writes that
/// replace a document are conditional on the version that was read where the
/// store supports it, and always re-check the index afterwards.
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

/// A live record as read through the index
struct Loaded {
    record_id: String,
    product: Product,
    version: UpdateVersion,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: StorageConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            StorageConfig::Memory | StorageConfig::ObjectMemory => Arc::new(InMemory::new()),
            StorageConfig::Local { path } => {
                std::fs::create_dir_all(&path)?;
                Arc::new(LocalFileSystem::new_with_prefix(path)?)
            }
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .with_allow_http(allow_http)
                    .with_conditional_put(S3ConditionalPut::ETagMatch);
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(access_key_id) = access_key_id {
                    builder = builder.with_access_key_id(access_key_id);
                }
                if let Some(secret_access_key) = secret_access_key {
                    builder = builder.with_secret_access_key(secret_access_key);
                }
                Arc::new(builder.build()?)
            }
        };
        Ok(Self { store })
    }

    fn document_path(record_id: &str) -> Path {
        Path::from(format!("{PRODUCTS_PREFIX}/{record_id}.json"))
    }

    fn index_path(product_id: &str) -> Path {
        Path::from_iter([INDEX_PREFIX, product_id])
    }

    fn api_key_path(client_id: &str) -> Path {
        let file = format!("{client_id}.json");
        Path::from_iter([API_KEYS_PREFIX, CLIENTS_DIR, file.as_str()])
    }

    fn key_dir(key: &str) -> Path {
        Path::from_iter([API_KEYS_PREFIX, KEYS_DIR, key])
    }

    fn key_entry_path(key: &str, client_id: &str) -> Path {
        let file = format!("{client_id}.json");
        Self::key_dir(key).child(file.as_str())
    }

    async fn read_index(&self, product_id: &str) -> StoreResult<Option<String>> {
        match self.store.get(&Self::index_path(product_id)).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                let record_id = String::from_utf8(bytes.to_vec()).map_err(|_| {
                    StoreError::Inconsistent(format!("index entry for {product_id} is not utf-8"))
                })?;
                Ok(Some(record_id))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically point `product_id` at `record_id`, failing if it is taken.
    async fn claim_index(&self, product_id: &str, record_id: &str) -> StoreResult<()> {
        let payload = PutPayload::from(record_id.as_bytes().to_vec());
        match self
            .store
            .put_opts(
                &Self::index_path(product_id),
                payload,
                PutOptions::from(PutMode::Create),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(object_store::Error::AlreadyExists { .. }) => Err(StoreError::AlreadyExists(
                format!("productId {product_id}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_document(&self, record_id: &str) -> StoreResult<Option<(Product, UpdateVersion)>> {
        match self.store.get(&Self::document_path(record_id)).await {
            Ok(result) => {
                let version = UpdateVersion {
                    e_tag: result.meta.e_tag.clone(),
                    version: result.meta.version.clone(),
                };
                let bytes = result.bytes().await?;
                Ok(Some((serde_json::from_slice(&bytes)?, version)))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, record_id: &str, product: &Product) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(product)?;
        self.store
            .put(&Self::document_path(record_id), PutPayload::from(json))
            .await?;
        Ok(())
    }

    async fn delete_if_present(&self, path: &Path) -> StoreResult<()> {
        match self.store.delete(path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert behind a fresh index claim, releasing the claim if the
    /// document cannot be written.
    async fn insert_new(&self, product: &Product) -> StoreResult<String> {
        let record_id = Uuid::now_v7().simple().to_string();
        self.claim_index(&product.product_id, &record_id).await?;

        if let Err(e) = self.write_document(&record_id, product).await {
            error!(product_id = %product.product_id, record_id = %record_id, error = %e, "failed to write product document");
            if let Err(rollback) = self
                .delete_if_present(&Self::index_path(&product.product_id))
                .await
            {
                error!(
                    product_id = %product.product_id,
                    record_id = %record_id,
                    error = %rollback,
                    "failed to release index claim, the id stays reserved until the entry is removed"
                );
            }
            return Err(e);
        }
        Ok(record_id)
    }

    /// Resolve `product_id` through the index and load its document.
    async fn load(&self, product_id: &str) -> StoreResult<Loaded> {
        let not_found = || StoreError::NotFound(format!("productId {product_id}"));

        let record_id = self.read_index(product_id).await?.ok_or_else(not_found)?;
        // A claimed index whose document is not written yet reads as absent.
        let (product, version) = self.read_document(&record_id).await?.ok_or_else(not_found)?;

        if product.product_id != product_id {
            error!(
                product_id,
                record_id = %record_id,
                stored = %product.product_id,
                "index points at a document for another product"
            );
            return Err(StoreError::Inconsistent(format!(
                "index for {product_id} points at record {record_id} holding {}",
                product.product_id
            )));
        }
        Ok(Loaded {
            record_id,
            product,
            version,
        })
    }

    /// Overwrite the document of a loaded record.
    ///
    /// Returns `false` when the write lost a race: the document changed or
    /// vanished since it was loaded, or the record was deleted while the
    /// write was in flight. Nothing is left behind in that case.
    async fn replace_document(
        &self,
        product_id: &str,
        loaded: &Loaded,
        next: &Product,
    ) -> StoreResult<bool> {
        let path = Self::document_path(&loaded.record_id);
        let payload = PutPayload::from(serde_json::to_vec_pretty(next)?);
        let conditional = PutOptions::from(PutMode::Update(loaded.version.clone()));

        match self.store.put_opts(&path, payload.clone(), conditional).await {
            Ok(_) => {}
            Err(object_store::Error::Precondition { .. } | object_store::Error::NotFound { .. }) => {
                return Ok(false);
            }
            // No conditional updates here (local file system); the index
            // check below still catches a concurrent delete.
            Err(object_store::Error::NotImplemented) => {
                self.store.put(&path, payload).await?;
            }
            Err(e) => return Err(e.into()),
        }

        if self.read_index(product_id).await?.as_deref() == Some(loaded.record_id.as_str()) {
            return Ok(true);
        }

        warn!(product_id, record_id = %loaded.record_id, "record deleted during write, withdrawing document");
        self.delete_if_present(&path).await?;
        Ok(false)
    }

    /// Rewrite the live record of `product_id` with whatever `next` derives
    /// from its stored state, reloading after every lost race.
    async fn replace_with<F>(&self, product_id: &str, next: F) -> StoreResult<String>
    where
        F: Fn(&Product) -> StoreResult<Product> + Send + Sync,
    {
        for _ in 0..WRITE_ATTEMPTS {
            let loaded = self.load(product_id).await?;
            let product = next(&loaded.product)?;
            if self.replace_document(product_id, &loaded, &product).await? {
                return Ok(loaded.record_id);
            }
            debug!(product_id, "product changed during write, reloading");
        }

        Err(StoreError::Inconsistent(format!(
            "productId {product_id} kept changing during write"
        )))
    }
}

fn decode_cursor(cursor: &str) -> StoreResult<Option<String>> {
    if cursor.is_empty() {
        return Ok(None);
    }
    match Uuid::try_parse(cursor) {
        Ok(id) if cursor.len() == 32 => Ok(Some(id.simple().to_string())),
        _ => Err(StoreError::InvalidArgument(format!(
            "malformed cursor: {cursor}"
        ))),
    }
}

#[async_trait]
impl ProductStorage for ObjectStoreBackend {
    async fn create(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        let record_id = self.insert_new(product).await?;
        debug!(product_id = %product.product_id, record_id = %record_id, "created product");
        Ok(())
    }

    async fn read(&self, product_id: &str) -> StoreResult<Product> {
        validation::require_product_id(product_id)?;

        let loaded = self.load(product_id).await?;
        debug!(product_id, record_id = %loaded.record_id, "read product");
        Ok(loaded.product)
    }

    /// Duplicate ids are only detected within the returned page. Chaining
    /// cursors over a corrupted store can yield one id on two pages.
    async fn read_many(&self, cursor: &str, limit: usize) -> StoreResult<ProductPage> {
        if limit < 1 {
            return Err(StoreError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }
        let after = decode_cursor(cursor)?;

        let prefix = Path::from(PRODUCTS_PREFIX);
        let listing = match &after {
            Some(record_id) => self
                .store
                .list_with_offset(Some(&prefix), &Self::document_path(record_id)),
            None => self.store.list(Some(&prefix)),
        };
        let mut record_ids: Vec<String> = listing
            .try_filter_map(|meta| async move {
                Ok(meta
                    .location
                    .filename()
                    .and_then(|name| name.strip_suffix(".json"))
                    .map(str::to_string))
            })
            .try_collect()
            .await?;

        // Listings are not ordered on every backend.
        record_ids.sort_unstable();
        record_ids.truncate(limit);

        let Some(last) = record_ids.last().cloned() else {
            return Err(StoreError::NotFound(format!("no products after cursor {cursor:?}")));
        };

        let mut seen = HashSet::new();
        let mut products = Vec::with_capacity(record_ids.len());
        for record_id in &record_ids {
            let Some((product, _)) = self.read_document(record_id).await? else {
                // Deleted since the listing.
                continue;
            };
            if !seen.insert(product.product_id.clone()) {
                error!(product_id = %product.product_id, record_id = %record_id, "more than one product stored under one id");
                return Err(StoreError::Inconsistent(format!(
                    "several records share productId {}",
                    product.product_id
                )));
            }
            products.push(product);
        }

        if products.is_empty() {
            return Err(StoreError::NotFound(format!("no products after cursor {cursor:?}")));
        }

        debug!(count = products.len(), from = cursor, to = %last, "read page");
        Ok(ProductPage {
            cursor: last,
            products,
        })
    }

    async fn update(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        let record_id = self
            .replace_with(&product.product_id, |_| Ok(product.clone()))
            .await?;
        debug!(product_id = %product.product_id, record_id = %record_id, "updated product");
        Ok(())
    }

    async fn update_partial(&self, product_id: &str, fields: &Fields) -> StoreResult<()> {
        validation::validate_partial(product_id, fields)?;

        let record_id = self
            .replace_with(product_id, |stored| {
                Ok(validation::merge_fields(stored, fields)?)
            })
            .await?;
        debug!(product_id, record_id = %record_id, fields = fields.len(), "patched product");
        Ok(())
    }

    async fn upsert(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        for _ in 0..WRITE_ATTEMPTS {
            match self.insert_new(product).await {
                Ok(record_id) => {
                    debug!(product_id = %product.product_id, record_id = %record_id, "upsert inserted product");
                    return Ok(());
                }
                Err(StoreError::AlreadyExists(_)) => {}
                Err(e) => return Err(e),
            }

            // Replace in place so the product keeps its position in listings.
            match self
                .replace_with(&product.product_id, |_| Ok(product.clone()))
                .await
            {
                Ok(record_id) => {
                    debug!(product_id = %product.product_id, record_id = %record_id, "upsert replaced product");
                    return Ok(());
                }
                Err(StoreError::NotFound(_)) => {
                    warn!(product_id = %product.product_id, "record vanished during upsert, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(StoreError::Inconsistent(format!(
            "productId {} kept changing during upsert",
            product.product_id
        )))
    }

    async fn delete(&self, product_id: &str) -> StoreResult<()> {
        validation::require_product_id(product_id)?;

        let Some(record_id) = self.read_index(product_id).await? else {
            debug!(product_id, "nothing to delete");
            return Ok(());
        };
        let document = Self::document_path(&record_id);
        self.delete_if_present(&document).await?;
        self.delete_if_present(&Self::index_path(product_id)).await?;
        // An unconditional replacement may have rewritten the document
        // before the index entry went away.
        self.delete_if_present(&document).await?;
        debug!(product_id, record_id = %record_id, "deleted product");
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStorage for ObjectStoreBackend {
    async fn find_by_key(&self, key: &str) -> StoreResult<Vec<ApiKey>> {
        if key.is_empty() {
            return Ok(Vec::new());
        }

        let locations: Vec<Path> = self
            .store
            .list(Some(&Self::key_dir(key)))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;

        let mut matches = Vec::with_capacity(locations.len());
        for location in locations {
            let bytes = match self.store.get(&location).await {
                Ok(result) => result.bytes().await?,
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let record: ApiKey = serde_json::from_slice(&bytes)?;
            if record.key == key {
                matches.push(record);
            }
        }
        Ok(matches)
    }

    async fn insert_key(&self, key: &ApiKey) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(key)?;
        let payload = PutPayload::from(json);
        let record = Self::api_key_path(&key.client_id);

        match self
            .store
            .put_opts(&record, payload.clone(), PutOptions::from(PutMode::Create))
            .await
        {
            Ok(_) => {}
            Err(object_store::Error::AlreadyExists { .. }) => {
                return Err(StoreError::AlreadyExists(format!(
                    "api key for client {}",
                    key.client_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        if key.key.is_empty() {
            debug!(client_id = %key.client_id, "provisioned api key without a lookup entry");
            return Ok(());
        }

        if let Err(e) = self
            .store
            .put(&Self::key_entry_path(&key.key, &key.client_id), payload)
            .await
        {
            error!(client_id = %key.client_id, error = %e, "failed to file api key for lookup");
            if let Err(rollback) = self.delete_if_present(&record).await {
                error!(client_id = %key.client_id, error = %rollback, "failed to remove api key record");
            }
            return Err(e.into());
        }

        debug!(client_id = %key.client_id, "provisioned api key");
        Ok(())
    }
}
