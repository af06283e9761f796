use async_trait::async_trait;
use shared_types::{ApiKey, Product, ProductPage};

use super::error::StoreResult;
use crate::validation::Fields;

/// Persistence contract for products, keyed by `product_id`.
#[async_trait]
pub trait ProductStorage: Send + Sync {
    /// Exclusive insert. Fails with `AlreadyExists` if the id is taken.
    async fn create(&self, product: &Product) -> StoreResult<()>;

    /// Fails with `NotFound` when absent and `Inconsistent` when the id
    /// matches more than one record.
    async fn read(&self, product_id: &str) -> StoreResult<Product>;

    /// Up to `limit` products strictly after `cursor`, in store order. An
    /// empty cursor starts from the first product. An empty window is
    /// `NotFound`.
    async fn read_many(&self, cursor: &str, limit: usize) -> StoreResult<ProductPage>;

    /// Full replacement of an existing product. `NotFound` when absent.
    async fn update(&self, product: &Product) -> StoreResult<()>;

    /// Merge `fields` into an existing product, leaving the rest untouched.
    async fn update_partial(&self, product_id: &str, fields: &Fields) -> StoreResult<()>;

    /// Insert, or fully replace if the id already exists.
    async fn upsert(&self, product: &Product) -> StoreResult<()>;

    /// Remove the product if present. Deleting an absent product succeeds.
    async fn delete(&self, product_id: &str) -> StoreResult<()>;
}

/// Lookup of provisioned API keys.
#[async_trait]
pub trait ApiKeyStorage: Send + Sync {
    /// All records carrying `key`. More than one means a provisioning bug.
    async fn find_by_key(&self, key: &str) -> StoreResult<Vec<ApiKey>>;

    /// Exclusive by `client_id`.
    async fn insert_key(&self, key: &ApiKey) -> StoreResult<()>;
}
