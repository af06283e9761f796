use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::{AuthDecision, Authenticator, DenyReason};
use crate::http::ApiError;

/// Identity of the caller, inserted into request extensions once the API key
/// is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    pub client_id: String,
}

/// Reject requests whose `Authorization` header does not carry a known API
/// key. The header holds the raw key with no scheme prefix.
pub async fn require_api_key(
    State(auth): State<Authenticator>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = {
        let mut values = request.headers().get_all(AUTHORIZATION).iter();
        match (values.next(), values.next()) {
            (Some(value), None) => match value.to_str() {
                Ok(value) => value.trim().to_string(),
                Err(_) => {
                    debug!("rejecting authorization header with non-visible-ascii bytes");
                    return Err(ApiError::Unauthorized(DenyReason::UnknownKey.to_string()));
                }
            },
            (None, _) => String::new(),
            (Some(_), Some(_)) => {
                debug!("rejecting request with several authorization headers");
                return Err(ApiError::Unauthorized(
                    "expected a single authorization header".to_string(),
                ));
            }
        }
    };

    match auth.authenticate(&key).await {
        AuthDecision::Allow(record) => {
            request.extensions_mut().insert(AuthenticatedClient {
                client_id: record.client_id,
            });
            Ok(next.run(request).await)
        }
        AuthDecision::Deny(reason) => {
            if reason != DenyReason::MissingKey {
                debug!(%reason, "api key rejected");
            }
            Err(ApiError::Unauthorized(reason.to_string()))
        }
    }
}
