use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

/// Authenticated identity attached to every protected request. `user_id`
/// is what the draft is submitted under as `userRef`; issuing and
/// validating the keys themselves belongs to the upstream identity system.
#[derive(Clone, Debug)]
pub struct CurrentUser {
    pub user_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
pub struct AuthState {
    users: Arc<HashMap<String, CurrentUser>>,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            users: Arc::new(load_keys_from_env()),
        }
    }

    fn resolve(&self, presented: &str) -> Option<CurrentUser> {
        self.users.get(presented).cloned()
    }
}

pub async fn require_user(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized(
            "missing_api_key",
            "Provide X-Bazaar-Key or Bearer token",
        ));
    };
    let Some(user) = state.resolve(&presented) else {
        return Ok(unauthorized("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Bazaar-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn load_keys_from_env() -> HashMap<String, CurrentUser> {
    let raw = env::var("BAZAAR_API_KEYS").unwrap_or_else(|_| "demo-user:demo-key".to_string());
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let user_id = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (user_id, key) {
            (Some(user), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    CurrentUser {
                        user_id: user.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "bazaar.api",
                "ignored malformed BAZAAR_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "bazaar.api",
            "BAZAAR_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            CurrentUser {
                user_id: "demo-user".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "bazaar.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}
