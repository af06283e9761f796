//! Field-level validation of product payloads.
//!
//! Full-replacement payloads (create, put) must carry exactly the product
//! allow-list. Partial payloads (patch) may carry any subset of it.

use serde_json::{Map, Value};
use shared_types::{PRODUCT_FIELDS, PRODUCT_ID_FIELD, Product, field_kind};
use thiserror::Error;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("field {field} must be a {expected}")]
    InvalidValue { field: String, expected: String },

    #[error("productId {found:?} does not match {expected:?}")]
    IdMismatch { expected: String, found: String },

    #[error("productId must not be empty")]
    EmptyProductId,
}

/// Decode a request body into a JSON object without checking its fields.
pub fn parse_object(body: &[u8]) -> Result<Fields, ValidationError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ValidationError::Malformed(
            "expected a JSON object".to_string(),
        )),
        Err(e) => Err(ValidationError::Malformed(e.to_string())),
    }
}

/// Decode and fully validate a request body.
pub fn parse_full(body: &[u8]) -> Result<Product, ValidationError> {
    validate_full(&parse_object(body)?)
}

/// Check a full-replacement payload and turn it into a [`Product`].
///
/// Every allow-listed field must be present, even when empty. The product id
/// may be empty here; callers decide whether that is acceptable.
pub fn validate_full(payload: &Fields) -> Result<Product, ValidationError> {
    check_fields(payload)?;

    if let Some((field, _)) = PRODUCT_FIELDS
        .iter()
        .find(|(field, _)| !payload.contains_key(*field))
    {
        return Err(ValidationError::MissingField((*field).to_string()));
    }

    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| ValidationError::Malformed(e.to_string()))
}

/// Check a partial payload destined for the product `product_id`.
pub fn validate_partial(product_id: &str, fields: &Fields) -> Result<(), ValidationError> {
    require_product_id(product_id)?;
    check_fields(fields)?;

    match fields.get(PRODUCT_ID_FIELD).and_then(Value::as_str) {
        Some(found) if found != product_id => Err(ValidationError::IdMismatch {
            expected: product_id.to_string(),
            found: found.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Apply a partial payload on top of a stored product.
///
/// Fields absent from `fields` keep their stored values.
pub fn merge_fields(product: &Product, fields: &Fields) -> Result<Product, ValidationError> {
    validate_partial(&product.product_id, fields)?;

    let stored =
        serde_json::to_value(product).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    let Value::Object(mut merged) = stored else {
        return Err(ValidationError::Malformed(
            "stored product is not an object".to_string(),
        ));
    };
    for (field, value) in fields {
        merged.insert(field.clone(), value.clone());
    }

    serde_json::from_value(Value::Object(merged))
        .map_err(|e| ValidationError::Malformed(e.to_string()))
}

pub fn require_product_id(product_id: &str) -> Result<(), ValidationError> {
    if product_id.is_empty() {
        return Err(ValidationError::EmptyProductId);
    }
    Ok(())
}

fn check_fields(fields: &Fields) -> Result<(), ValidationError> {
    for (field, value) in fields {
        let kind = field_kind(field).ok_or_else(|| ValidationError::UnknownField(field.clone()))?;
        if !kind.accepts(value) {
            return Err(ValidationError::InvalidValue {
                field: field.clone(),
                expected: kind.to_string(),
            });
        }
    }
    Ok(())
}
