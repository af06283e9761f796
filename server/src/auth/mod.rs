//! API key authentication.
//!
//! The only contract is key in, allow or deny out. Key records carry expiry
//! and revocation attributes, but enforcing them is left to callers that
//! inspect the [`ApiKey`] returned on success.

mod middleware;

pub use middleware::{AuthenticatedClient, require_api_key};

use shared_types::ApiKey;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::storage::{ApiKeyStorage, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow(ApiKey),
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    MissingKey,
    UnknownKey,
    /// The key matched several records. Logged, never shown to the caller.
    Inconsistent,
    /// The key store could not be queried
    Unavailable,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::MissingKey => write!(f, "missing api key"),
            DenyReason::UnknownKey
            | DenyReason::Inconsistent
            | DenyReason::Unavailable => write!(f, "invalid api key"),
        }
    }
}

#[derive(Clone)]
pub struct Authenticator {
    keys: Arc<dyn ApiKeyStorage>,
}

impl Authenticator {
    pub fn new(keys: Arc<dyn ApiKeyStorage>) -> Self {
        Self { keys }
    }

    pub async fn authenticate(&self, key: &str) -> AuthDecision {
        if key.is_empty() {
            return AuthDecision::Deny(DenyReason::MissingKey);
        }

        let mut matches = match self.keys.find_by_key(key).await {
            Ok(matches) => matches,
            Err(e) => {
                error!(error = %e, "api key lookup failed");
                return AuthDecision::Deny(DenyReason::Unavailable);
            }
        };

        match matches.len() {
            0 => AuthDecision::Deny(DenyReason::UnknownKey),
            1 => {
                let record = matches.remove(0);
                debug!(client_id = %record.client_id, "api key accepted");
                AuthDecision::Allow(record)
            }
            n => {
                let clients: Vec<&str> = matches.iter().map(|m| m.client_id.as_str()).collect();
                error!(matches = n, ?clients, "api key provisioned more than once");
                AuthDecision::Deny(DenyReason::Inconsistent)
            }
        }
    }

    /// Make sure each of `keys` is provisioned, adding the missing ones.
    ///
    /// Returns how many keys were added.
    pub async fn provision(&self, keys: &[String]) -> StoreResult<usize> {
        let mut added = 0;
        for key in keys.iter().filter(|key| !key.is_empty()) {
            if !self.keys.find_by_key(key).await?.is_empty() {
                continue;
            }
            let client_id = format!("bootstrap-{}", Uuid::now_v7().simple());
            self.keys.insert_key(&ApiKey::new(&client_id, key)).await?;
            info!(%client_id, "provisioned api key from configuration");
            added += 1;
        }
        Ok(added)
    }
}
