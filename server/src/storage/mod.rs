mod backend;
mod config;
mod error;
mod memory;
mod traits;

#[cfg(test)]
mod tests;

use std::sync::Arc;

pub use backend::ObjectStoreBackend;
pub use config::StorageConfig;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use traits::{ApiKeyStorage, ProductStorage};

/// Both capabilities of one opened backend
#[derive(Clone)]
pub struct Stores {
    pub products: Arc<dyn ProductStorage>,
    pub api_keys: Arc<dyn ApiKeyStorage>,
}

impl Stores {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ProductStorage + ApiKeyStorage + 'static,
    {
        Self {
            products: backend.clone(),
            api_keys: backend,
        }
    }
}

/// Open the backend a connection string describes.
pub fn open(config: StorageConfig) -> anyhow::Result<Stores> {
    match config {
        StorageConfig::Memory => Ok(Stores::from_backend(Arc::new(MemoryBackend::new()))),
        other => Ok(Stores::from_backend(Arc::new(
            ObjectStoreBackend::from_config(other)?,
        ))),
    }
}
