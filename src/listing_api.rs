use crate::http::build_client;
use crate::models::{Draft, ListingPayload};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListingApiError {
    #[error("{0}")]
    Rejected(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedListing {
    #[serde(rename = "_id")]
    pub id: String,
}

// The backend answers with either a rejection envelope or the created
// listing representation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CreateListingReply {
    Rejected { success: bool, message: String },
    Created(CreatedListing),
}

/// Remote listing-creation endpoint. One call per submission attempt; no
/// retries anywhere.
#[async_trait]
pub trait ListingBackend: Send + Sync {
    async fn create_listing(
        &self,
        draft: &Draft,
        user_ref: &str,
    ) -> Result<CreatedListing, ListingApiError>;
}

#[derive(Debug, Clone)]
pub struct ListingApiClient {
    base_url: String,
    session_token: Option<String>,
    http: Client,
}

impl ListingApiClient {
    pub fn from_env() -> Self {
        let base_url = std::env::var("LISTING_API_ROOT")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let session_token = std::env::var("LISTING_API_TOKEN").ok();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token,
            http: build_client(),
        }
    }
}

#[async_trait]
impl ListingBackend for ListingApiClient {
    async fn create_listing(
        &self,
        draft: &Draft,
        user_ref: &str,
    ) -> Result<CreatedListing, ListingApiError> {
        let url = format!("{}/api/listing/create", self.base_url);
        let payload = ListingPayload { draft, user_ref };
        let mut request = self.http.post(&url).json(&payload);
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ListingApiError::Request(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ListingApiError::Request(err.to_string()))?;
        decode_reply(status, &body)
    }
}

// Rejections arrive as `{success:false, message}` on both 2xx and error
// statuses, so the body is decoded before the status is consulted.
fn decode_reply(status: StatusCode, body: &str) -> Result<CreatedListing, ListingApiError> {
    match serde_json::from_str::<CreateListingReply>(body) {
        Ok(CreateListingReply::Rejected { success, message }) if !success => {
            Err(ListingApiError::Rejected(message))
        }
        Ok(CreateListingReply::Rejected { .. }) => Err(ListingApiError::InvalidResponse(
            "success envelope without listing".into(),
        )),
        Ok(CreateListingReply::Created(created)) => Ok(created),
        Err(err) if status.is_success() => Err(ListingApiError::InvalidResponse(err.to_string())),
        Err(_) => Err(ListingApiError::Request(format!("HTTP {status}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Draft;

    #[test]
    fn payload_matches_the_backend_contract() {
        let draft = Draft {
            name: "Porch swing".into(),
            unit: "piece".into(),
            regular_price: 120,
            image_urls: vec!["https://img.test/a".into()],
            ..Draft::default()
        };
        let payload = ListingPayload {
            draft: &draft,
            user_ref: "user-7",
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["name"], "Porch swing");
        assert_eq!(value["regularPrice"], 120);
        assert_eq!(value["imageUrls"][0], "https://img.test/a");
        assert_eq!(value["userRef"], "user-7");
        assert_eq!(value["offer"], false);
    }

    #[test]
    fn rejection_envelope_carries_the_server_message() {
        let err = decode_reply(
            StatusCode::OK,
            r#"{"success":false,"message":"dup name"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ListingApiError::Rejected(message) if message == "dup name"));
    }

    #[test]
    fn created_listing_yields_its_identifier() {
        let created = decode_reply(
            StatusCode::CREATED,
            r#"{"_id":"abc123","name":"Porch swing","userRef":"user-7"}"#,
        )
        .unwrap();
        assert_eq!(created.id, "abc123");
    }

    #[test]
    fn undecodable_error_body_reports_the_status() {
        let err = decode_reply(StatusCode::BAD_GATEWAY, "upstream exploded").unwrap_err();
        assert!(matches!(err, ListingApiError::Request(detail) if detail.contains("502")));
    }
}
