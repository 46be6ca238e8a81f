use crate::http::build_client;
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use chrono::Utc;
use once_cell::sync::Lazy;
use rand::Rng;
use reqwest::{Client, StatusCode, header::HeaderValue};
use serde::Deserialize;
use std::env;
use thiserror::Error;
use urlencoding::encode;

pub static BUCKET_ROOT: Lazy<String> = Lazy::new(|| {
    env::var("BUCKET_API_ROOT").unwrap_or_else(|_| "https://firebasestorage.googleapis.com".into())
});

pub static BUCKET_NAME: Lazy<String> = Lazy::new(|| env::var("BUCKET_NAME").unwrap_or_default());

static BUCKET_API_KEY: Lazy<String> = Lazy::new(|| env::var("BUCKET_API_KEY").unwrap_or_default());

static BUCKET_API_SECRET: Lazy<String> =
    Lazy::new(|| env::var("BUCKET_API_SECRET").unwrap_or_default());

const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object rejected by store: {0}")]
    Rejected(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Write side of the blob store. The production impl talks to the remote
/// bucket; tests inject their own.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload one object under `key` and return its public retrieval URL.
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes)
    -> Result<String, StorageError>;
}

/// Collision-resistant object key: epoch millis + nonce + original filename.
pub fn object_key(filename: &str) -> String {
    let nonce: u32 = rand::rng().random();
    format!("{}-{nonce:08x}-{filename}", Utc::now().timestamp_millis())
}

fn retrieval_url(key: &str, token: &str) -> String {
    format!(
        "{}/v0/b/{}/o/{}?alt=media&token={token}",
        *BUCKET_ROOT,
        *BUCKET_NAME,
        encode(key)
    )
}

fn basic_auth_header() -> Option<HeaderValue> {
    if BUCKET_API_KEY.is_empty() || BUCKET_API_SECRET.is_empty() {
        return None;
    }
    let raw = format!("{}:{}", *BUCKET_API_KEY, *BUCKET_API_SECRET);
    HeaderValue::from_str(&format!("Basic {}", BASE64.encode(raw))).ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadObjectResponse {
    #[allow(dead_code)]
    name: Option<String>,
    download_tokens: Option<String>,
}

/// Resumable-upload client for the image bucket: a start request opens an
/// upload session, the body goes up in offset-addressed chunks, and the
/// finalize response carries the download token for the retrieval URL.
#[derive(Debug, Clone)]
pub struct BucketClient {
    http: Client,
}

impl BucketClient {
    pub fn new() -> Self {
        Self {
            http: build_client(),
        }
    }

    async fn start_session(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let url = format!(
            "{}/v0/b/{}/o?uploadType=resumable&name={}",
            *BUCKET_ROOT,
            *BUCKET_NAME,
            encode(key)
        );
        let mut request = self
            .http
            .post(&url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Type", content_type)
            .json(&serde_json::json!({ "name": key, "contentType": content_type }));
        if let Some(auth) = basic_auth_header() {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }

        let response = request
            .send()
            .await
            .map_err(|err| StorageError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response
            .headers()
            .get("X-Goog-Upload-URL")
            .or_else(|| response.headers().get(reqwest::header::LOCATION))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
            .ok_or_else(|| StorageError::InvalidResponse("missing upload session url".into()))
    }

    async fn send_chunks(
        &self,
        session_url: &str,
        key: &str,
        bytes: Bytes,
    ) -> Result<UploadObjectResponse, StorageError> {
        let total = bytes.len();
        let mut offset = 0usize;
        loop {
            let end = (offset + CHUNK_SIZE).min(total);
            let last = end == total;
            let command = if last { "upload, finalize" } else { "upload" };
            let chunk = bytes.slice(offset..end);

            let response = self
                .http
                .put(session_url)
                .header("X-Goog-Upload-Command", command)
                .header("X-Goog-Upload-Offset", offset.to_string())
                .body(chunk)
                .send()
                .await
                .map_err(|err| StorageError::Request(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(classify_status(status));
            }

            let percent = if total == 0 {
                100.0
            } else {
                end as f64 / total as f64 * 100.0
            };
            tracing::debug!(
                target = "bazaar.storage",
                key = key,
                transferred = end,
                total = total,
                "upload is {percent:.0}% done"
            );

            if last {
                return response
                    .json::<UploadObjectResponse>()
                    .await
                    .map_err(|err| StorageError::InvalidResponse(err.to_string()));
            }
            offset = end;
        }
    }
}

impl Default for BucketClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for BucketClient {
    async fn put(
        &self,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let session_url = self.start_session(key, content_type).await?;
        let object = self.send_chunks(&session_url, key, bytes).await?;
        let token = object
            .download_tokens
            .filter(|token| !token.is_empty())
            .ok_or_else(|| StorageError::InvalidResponse("missing download token".into()))?;
        Ok(retrieval_url(key, &token))
    }
}

fn classify_status(status: StatusCode) -> StorageError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::PAYLOAD_TOO_LARGE => {
            StorageError::Rejected(format!("HTTP {status}"))
        }
        _ => StorageError::Request(format!("HTTP {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_keep_the_filename_and_never_collide() {
        let a = object_key("porch-swing.jpg");
        let b = object_key("porch-swing.jpg");
        assert!(a.ends_with("-porch-swing.jpg"));
        assert_ne!(a, b);
    }

    #[test]
    fn size_and_type_rejections_map_to_rejected() {
        assert!(matches!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE),
            StorageError::Rejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY),
            StorageError::Request(_)
        ));
    }

    #[test]
    fn retrieval_urls_percent_encode_the_key() {
        let url = retrieval_url("1700000000-abcd1234-a b.jpg", "tok");
        assert!(url.contains("/o/1700000000-abcd1234-a%20b.jpg?alt=media&token=tok"));
    }
}
