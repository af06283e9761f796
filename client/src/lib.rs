#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use shared_types::{Product, ProductPage};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The service refused the write, e.g. the product already exists
    #[error("refused: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error ({status}): {details}")]
    Server { status: StatusCode, details: String },

    #[error("invalid base url: {0}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Error body returned by the service
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    details: Option<String>,
}

/// Client for the product catalog service
pub struct ProductClient {
    client: ReqwestClient,
    base_url: Url,
    api_key: String,
}

impl ProductClient {
    /// Create a new client instance
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ClientResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| ClientError::InvalidUrl(format!("{raw}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(raw));
        }

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Base URL with trailing slashes removed
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Build a URL below the base from unescaped path segments.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
    }

    /// Turn a non-success response into a typed error.
    async fn check(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let details = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.details.unwrap_or(body.error),
            Err(_) => text,
        };
        debug!(%status, %details, "request failed");

        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(details),
            StatusCode::UNAUTHORIZED => ClientError::Unauthorized(details),
            StatusCode::FORBIDDEN | StatusCode::CONFLICT => ClientError::Conflict(details),
            StatusCode::BAD_REQUEST => ClientError::BadRequest(details),
            _ => ClientError::Server { status, details },
        })
    }

    /// Fetch one product
    pub async fn get_product(&self, product_id: &str) -> ClientResult<Product> {
        let url = self.url(&["products", product_id]);
        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch one page of products.
    ///
    /// Pass the cursor of the previous page to continue after it. A page past
    /// the end is reported as [`ClientError::NotFound`].
    pub async fn list_products(
        &self,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> ClientResult<ProductPage> {
        let mut url = self.url(&["products"]);
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = cursor.filter(|cursor| !cursor.is_empty()) {
                query.append_pair("cursor", cursor);
            }
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        // An empty query_pairs_mut still leaves a dangling '?'
        if url.query() == Some("") {
            url.set_query(None);
        }

        let response = self.request(Method::GET, url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Walk every page and collect all products.
    pub async fn list_all(&self, page_size: Option<usize>) -> ClientResult<Vec<Product>> {
        let mut products = Vec::new();
        let mut cursor = String::new();
        loop {
            let page = match self.list_products(Some(&cursor), page_size).await {
                Ok(page) => page,
                Err(ClientError::NotFound(_)) => break,
                Err(e) => return Err(e),
            };
            products.extend(page.products);
            if page.cursor.is_empty() || page.cursor == cursor {
                break;
            }
            cursor = page.cursor;
        }
        Ok(products)
    }

    /// Create a product. Fails with [`ClientError::Conflict`] if it exists.
    pub async fn create_product(&self, product: &Product) -> ClientResult<()> {
        let url = self.url(&["products"]);
        let response = self
            .request(Method::POST, url)
            .json(product)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Create or fully replace a product
    pub async fn put_product(&self, product: &Product) -> ClientResult<()> {
        let url = self.url(&["products", &product.product_id]);
        let response = self
            .request(Method::PUT, url)
            .json(product)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Change some fields of an existing product
    pub async fn patch_product(
        &self,
        product_id: &str,
        fields: &serde_json::Value,
    ) -> ClientResult<()> {
        let url = self.url(&["products", product_id]);
        let response = self
            .request(Method::PATCH, url)
            .json(fields)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Delete a product. Deleting an absent product succeeds.
    pub async fn delete_product(&self, product_id: &str) -> ClientResult<()> {
        let url = self.url(&["products", product_id]);
        let response = self.request(Method::DELETE, url).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Check if the service is healthy
    pub async fn health_check(&self) -> ClientResult<bool> {
        let url = self.url(&["health"]);
        let response = self.client.get(url).send().await?;
        Ok(response.status() == StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ProductClient::new("http://localhost:3000", "key").unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");

        // Test trailing slash removal
        let client = ProductClient::new("http://localhost:3000///", "key").unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_client_with_paths() {
        let client = ProductClient::new("https://api.example.com/v1/catalog/", "key").unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v1/catalog");
        assert_eq!(
            client.url(&["products", "001"]).as_str(),
            "https://api.example.com/v1/catalog/products/001"
        );
    }

    #[test]
    fn test_product_ids_are_escaped() {
        let client = ProductClient::new("http://localhost:3000", "key").unwrap();
        assert_eq!(
            client.url(&["products", "a/b c"]).as_str(),
            "http://localhost:3000/products/a%2Fb%20c"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(matches!(
            ProductClient::new("not a url", "key"),
            Err(ClientError::InvalidUrl(_))
        ));
        assert!(matches!(
            ProductClient::new("mailto:someone@example.com", "key"),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
