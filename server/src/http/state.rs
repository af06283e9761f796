use crate::auth::Authenticator;
use crate::storage::ProductStorage;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub products: Arc<dyn ProductStorage>,
    pub authenticator: Authenticator,
    pub limits: ReadLimits,
}

/// Page sizes for product listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    /// Used when the request names no limit
    pub default: usize,
    /// Requests above this are clamped to it
    pub max: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            default: 20,
            max: 100,
        }
    }
}
