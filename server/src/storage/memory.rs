//! In-process document store.
//!
//! Products live in a `BTreeMap` keyed by a sequence number assigned on
//! insert, which gives the pagination order. Lookups by `product_id` scan the
//! collection the way a document-store `find` would, so duplicate ids are
//! detected instead of being masked by a unique map key.

use async_trait::async_trait;
use shared_types::{ApiKey, Product, ProductPage};
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::error::{StoreError, StoreResult};
use super::traits::{ApiKeyStorage, ProductStorage};
use crate::validation::{self, Fields};

#[derive(Debug, Default)]
struct Collections {
    last_seq: u64,
    products: BTreeMap<u64, Product>,
    api_keys: Vec<ApiKey>,
}

impl Collections {
    fn matching(&self, product_id: &str) -> Vec<u64> {
        self.products
            .iter()
            .filter(|(_, product)| product.product_id == product_id)
            .map(|(seq, _)| *seq)
            .collect()
    }

    fn find_one(&self, product_id: &str) -> StoreResult<Option<u64>> {
        match self.matching(product_id).as_slice() {
            [] => Ok(None),
            [seq] => Ok(Some(*seq)),
            many => {
                error!(product_id, matches = many.len(), "more than one product stored under one id");
                Err(StoreError::Inconsistent(format!(
                    "{} records share productId {product_id}",
                    many.len()
                )))
            }
        }
    }

    fn insert(&mut self, product: Product) -> u64 {
        self.last_seq += 1;
        self.products.insert(self.last_seq, product);
        self.last_seq
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: RwLock<Collections>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert without the exclusivity check, the way an out-of-band writer
    /// would.
    #[cfg(test)]
    pub(crate) async fn insert_unchecked(&self, product: Product) {
        self.inner.write().await.insert(product);
    }
}

fn encode_cursor(seq: u64) -> String {
    format!("{seq:016x}")
}

fn decode_cursor(cursor: &str) -> StoreResult<Option<u64>> {
    if cursor.is_empty() {
        return Ok(None);
    }
    if cursor.len() != 16 || !cursor.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidArgument(format!(
            "malformed cursor: {cursor}"
        )));
    }
    u64::from_str_radix(cursor, 16)
        .map(Some)
        .map_err(|_| StoreError::InvalidArgument(format!("malformed cursor: {cursor}")))
}

#[async_trait]
impl ProductStorage for MemoryBackend {
    async fn create(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        let mut inner = self.inner.write().await;
        if !inner.matching(&product.product_id).is_empty() {
            return Err(StoreError::AlreadyExists(format!(
                "productId {}",
                product.product_id
            )));
        }
        let seq = inner.insert(product.clone());
        debug!(product_id = %product.product_id, seq, "created product");
        Ok(())
    }

    async fn read(&self, product_id: &str) -> StoreResult<Product> {
        validation::require_product_id(product_id)?;

        let inner = self.inner.read().await;
        let seq = inner
            .find_one(product_id)?
            .ok_or_else(|| StoreError::NotFound(format!("productId {product_id}")))?;
        inner
            .products
            .get(&seq)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("productId {product_id}")))
    }

    async fn read_many(&self, cursor: &str, limit: usize) -> StoreResult<ProductPage> {
        if limit < 1 {
            return Err(StoreError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }
        let lower = match decode_cursor(cursor)? {
            Some(seq) => Bound::Excluded(seq),
            None => Bound::Unbounded,
        };

        let inner = self.inner.read().await;
        let window: Vec<(u64, Product)> = inner
            .products
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(seq, product)| (*seq, product.clone()))
            .collect();

        let Some((last_seq, _)) = window.last() else {
            return Err(StoreError::NotFound(format!("no products after cursor {cursor:?}")));
        };
        let next_cursor = encode_cursor(*last_seq);

        for (_, product) in &window {
            inner.find_one(&product.product_id)?;
        }

        debug!(count = window.len(), from = cursor, to = %next_cursor, "read page");
        Ok(ProductPage {
            cursor: next_cursor,
            products: window.into_iter().map(|(_, product)| product).collect(),
        })
    }

    async fn update(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        let mut inner = self.inner.write().await;
        let seq = inner
            .find_one(&product.product_id)?
            .ok_or_else(|| StoreError::NotFound(format!("productId {}", product.product_id)))?;
        inner.products.insert(seq, product.clone());
        debug!(product_id = %product.product_id, seq, "updated product");
        Ok(())
    }

    async fn update_partial(&self, product_id: &str, fields: &Fields) -> StoreResult<()> {
        validation::validate_partial(product_id, fields)?;

        let mut inner = self.inner.write().await;
        let seq = inner
            .find_one(product_id)?
            .ok_or_else(|| StoreError::NotFound(format!("productId {product_id}")))?;
        let stored = inner
            .products
            .get(&seq)
            .ok_or_else(|| StoreError::NotFound(format!("productId {product_id}")))?;
        let merged = validation::merge_fields(stored, fields)?;
        inner.products.insert(seq, merged);
        debug!(product_id, seq, fields = fields.len(), "patched product");
        Ok(())
    }

    async fn upsert(&self, product: &Product) -> StoreResult<()> {
        validation::require_product_id(&product.product_id)?;

        let mut inner = self.inner.write().await;
        match inner.find_one(&product.product_id)? {
            Some(seq) => {
                inner.products.insert(seq, product.clone());
                debug!(product_id = %product.product_id, seq, "upsert replaced product");
            }
            None => {
                let seq = inner.insert(product.clone());
                debug!(product_id = %product.product_id, seq, "upsert inserted product");
            }
        }
        Ok(())
    }

    async fn delete(&self, product_id: &str) -> StoreResult<()> {
        validation::require_product_id(product_id)?;

        let mut inner = self.inner.write().await;
        let matches = inner.matching(product_id);
        if matches.len() > 1 {
            warn!(product_id, matches = matches.len(), "deleting duplicated product id");
        }
        for seq in &matches {
            inner.products.remove(seq);
        }
        debug!(product_id, removed = matches.len(), "deleted product");
        Ok(())
    }
}

#[async_trait]
impl ApiKeyStorage for MemoryBackend {
    async fn find_by_key(&self, key: &str) -> StoreResult<Vec<ApiKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .api_keys
            .iter()
            .filter(|record| record.key == key)
            .cloned()
            .collect())
    }

    async fn insert_key(&self, key: &ApiKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .api_keys
            .iter()
            .any(|record| record.client_id == key.client_id)
        {
            return Err(StoreError::AlreadyExists(format!(
                "api key for client {}",
                key.client_id
            )));
        }
        inner.api_keys.push(key.clone());
        debug!(client_id = %key.client_id, "provisioned api key");
        Ok(())
    }
}
