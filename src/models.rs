use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// In-progress listing data held by one form session. Serializes to the
/// exact camelCase shape the listing backend expects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub name: String,
    pub description: String,
    pub category: String,
    pub inventory: i32,
    pub unit: String,
    pub regular_price: i64,
    pub discount_price: i64,
    pub offer: bool,
    pub image_urls: Vec<String>,
}

/// One edit maps one input identity to one draft attribute.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldEdit {
    Name(String),
    Description(String),
    Unit(String),
    Category(Option<String>),
    Inventory(i32),
    RegularPrice(i64),
    DiscountPrice(i64),
    Offer(bool),
}

/// A locally selected file, alive for exactly one upload batch.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmitState {
    Idle,
    Pending,
    Created { listing_id: String },
    Failed { message: String },
}

impl SubmitState {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Request body sent to the listing-creation endpoint: every draft field
/// plus the authenticated user's identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPayload<'a> {
    #[serde(flatten)]
    pub draft: &'a Draft,
    pub user_ref: &'a str,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub draft: Draft,
    pub uploading: bool,
    pub upload_error: Option<String>,
    pub outcome: SubmitState,
    pub location: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
