#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire name of the business key of a [`Product`].
pub const PRODUCT_ID_FIELD: &str = "productId";

/// Shape a product field must have on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    TextList,
}

impl FieldKind {
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::TextList => value
                .as_array()
                .is_some_and(|items| items.iter().all(serde_json::Value::is_string)),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Text => write!(f, "string"),
            FieldKind::TextList => write!(f, "array of strings"),
        }
    }
}

/// Every field a product payload may carry, by wire name.
///
/// Full-replacement requests must carry all of them; partial updates may
/// carry any subset but nothing outside this list.
pub const PRODUCT_FIELDS: [(&str, FieldKind); 10] = [
    (PRODUCT_ID_FIELD, FieldKind::Text),
    ("name", FieldKind::Text),
    ("image_closed", FieldKind::Text),
    ("image_open", FieldKind::Text),
    ("description", FieldKind::Text),
    ("story", FieldKind::Text),
    ("sourcing_values", FieldKind::TextList),
    ("ingredients", FieldKind::TextList),
    ("allergy_info", FieldKind::Text),
    ("dietary_certifications", FieldKind::Text),
];

/// Look up the expected shape of a product field.
pub fn field_kind(name: &str) -> Option<FieldKind> {
    PRODUCT_FIELDS
        .iter()
        .find(|(field, _)| *field == name)
        .map(|(_, kind)| *kind)
}

/// A catalog product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Business key, immutable once created
    #[serde(rename = "productId")]
    pub product_id: String,
    pub name: String,
    pub image_closed: String,
    pub image_open: String,
    pub description: String,
    pub story: String,
    pub sourcing_values: Vec<String>,
    pub ingredients: Vec<String>,
    pub allergy_info: String,
    pub dietary_certifications: String,
}

impl Product {
    /// A product with the given id and name and every other field empty
    pub fn new(product_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One page of products.
///
/// `cursor` marks the last product of this page; feed it back to read the
/// next page. Empty when there is nothing to continue from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cursor: String,
    pub products: Vec<Product>,
}

/// A provisioned API key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub client_id: String,
    pub key: String,
    /// Carried for external policy; not enforced by the authenticator
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked: bool,
}

impl ApiKey {
    pub fn new(client_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            key: key.into(),
            expiry: None,
            revoked: false,
        }
    }
}
