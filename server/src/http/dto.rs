use serde::{Deserialize, Serialize};

/// Query string of a product listing.
///
/// `limit` stays a string so a non-numeric value can be answered with our
/// own 400 rather than the extractor's rejection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListParams {
    pub cursor: Option<String>,
    pub limit: Option<String>,
}

/// Response for successful writes
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub message: String,
    #[serde(rename = "productId")]
    pub product_id: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
