use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use shared_types::{Product, ProductPage};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    dto::{ListParams, SuccessResponse},
    error::{ApiError, ApiResult},
    state::{AppState, ReadLimits},
};
use crate::validation::{self, ValidationError};

/// GET /products/:product_id
#[instrument(skip(state))]
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> ApiResult<Json<Product>> {
    let product = state
        .products
        .read(&product_id)
        .await
        .map_err(|e| ApiError::from_read("read", e))?;

    Ok(Json(product))
}

/// GET /products?cursor=&limit=
/// Read one page of products
#[instrument(skip(state))]
pub async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ProductPage>> {
    let limit = resolve_limit(params.limit.as_deref(), state.limits)?;
    let cursor = params.cursor.unwrap_or_default();

    let page = state
        .products
        .read_many(&cursor, limit)
        .await
        .map_err(|e| ApiError::from_read("read many", e))?;

    Ok(Json(page))
}

/// POST /products
/// Exclusively create a product. Every product field is required.
#[instrument(skip(state, body))]
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SuccessResponse>)> {
    let product = validation::parse_full(&body)?;
    validation::require_product_id(&product.product_id)?;

    info!("Creating product: {}", product.product_id);

    state
        .products
        .create(&product)
        .await
        .map_err(|e| ApiError::from_write("create", e))?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            message: format!("Product {} created", product.product_id),
            product_id: product.product_id,
        }),
    ))
}

/// PUT /products/:product_id
/// Create or fully replace a product. Every product field is required; an
/// empty `productId` in the body takes the id from the path.
#[instrument(skip(state, body))]
pub async fn put_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SuccessResponse>)> {
    let mut product = validation::parse_full(&body)?;
    if !product.product_id.is_empty() && product.product_id != product_id {
        return Err(ValidationError::IdMismatch {
            expected: product_id,
            found: product.product_id,
        }
        .into());
    }
    product.product_id = product_id;

    info!("Putting product: {}", product.product_id);

    state
        .products
        .upsert(&product)
        .await
        .map_err(|e| ApiError::from_write("upsert", e))?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            message: format!("Product {} stored", product.product_id),
            product_id: product.product_id,
        }),
    ))
}

/// PATCH /products/:product_id
/// Merge the given fields into an existing product
#[instrument(skip(state, body))]
pub async fn patch_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<SuccessResponse>> {
    let fields = validation::parse_object(&body)?;
    validation::validate_partial(&product_id, &fields)?;

    info!("Patching product: {} ({} fields)", product_id, fields.len());

    state
        .products
        .update_partial(&product_id, &fields)
        .await
        .map_err(|e| ApiError::from_write("update partial", e))?;

    Ok(Json(SuccessResponse {
        message: format!("Product {product_id} updated"),
        product_id,
    }))
}

/// DELETE /products/:product_id
#[instrument(skip(state))]
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> ApiResult<StatusCode> {
    info!("Deleting product: {}", product_id);

    state
        .products
        .delete(&product_id)
        .await
        .map_err(|e| ApiError::from_write("delete", e))?;

    Ok(StatusCode::OK)
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "product-catalog",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Turn the `limit` query parameter into a page size.
///
/// Absent or empty means the default; anything above the maximum is clamped.
pub fn resolve_limit(raw: Option<&str>, limits: ReadLimits) -> ApiResult<usize> {
    let Some(raw) = raw.filter(|raw| !raw.is_empty()) else {
        return Ok(limits.default);
    };

    let requested: i64 = raw
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("limit must be a number, got {raw:?}")))?;
    if requested < 1 {
        return Err(ApiError::BadRequest(format!(
            "limit must be at least 1, got {requested}"
        )));
    }

    match usize::try_from(requested) {
        Ok(limit) if limit <= limits.max => Ok(limit),
        _ => {
            warn!(requested, max = limits.max, "limit exceeds the maximum, clamping");
            Ok(limits.max)
        }
    }
}
