mod draft;
mod http;
mod listing_api;
mod metrics;
mod models;
mod security;
mod sessions;
mod storage;
mod upload;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use listing_api::{ListingApiClient, ListingBackend};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, FieldEdit, SelectedFile, SessionView};
use security::{AuthState, CurrentUser, require_user};
use sessions::SessionStore;
use std::{net::SocketAddr, sync::Arc, time::Instant};
use storage::BucketClient;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "bazaar.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let sessions = SessionStore::new(Arc::new(BucketClient::new()));
    let backend: Arc<dyn ListingBackend> = Arc::new(ListingApiClient::from_env());
    let openapi: serde_json::Value = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(serde_json::json!({"openapi": "3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let state = AppState {
        sessions,
        backend,
        openapi: Arc::new(openapi),
        prometheus_handle,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/{id}", get(session_state))
        .route("/sessions/{id}/fields", post(edit_field))
        .route("/sessions/{id}/images", post(upload_images))
        .route("/sessions/{id}/images/{index}", delete(remove_image))
        .route("/sessions/{id}/submit", post(submit_listing))
        .route_layer(middleware::from_fn_with_state(auth_state, require_user));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "bazaar.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    sessions: SessionStore,
    backend: Arc<dyn ListingBackend>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

#[derive(Debug)]
enum AppError {
    NotFound(&'static str),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::NotFound(code) => (StatusCode::NOT_FOUND, code.to_string(), None),
            AppError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "bad_request".to_string(), Some(detail))
            }
        };
        (status, Json(ApiError { error, detail })).into_response()
    }
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "bazaar-api-rs",
    }))
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Ok(key) = std::env::var("OPENAPI_KEY") {
        let presented = headers
            .get("X-Docs-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != key {
            return Err(AppError::BadRequest("unauthorized docs access".into()));
        }
    }
    Ok(Json((*state.openapi).clone()))
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Bazaar API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16 * 1024 * 1024)
}

fn parse_session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::BadRequest("invalid_session_id".into()))
}

/// Open a new listing form session with an empty draft.
///
/// - Method: `POST`
/// - Path: `/sessions`
/// - Auth: `Authorization: Bearer <key>` or `X-Bazaar-Key: <key>`
async fn open_session(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
) -> Json<SessionView> {
    metrics::inc_requests("/sessions");
    info!(
        target = "bazaar.api",
        user = %user.user_id,
        api_key = %user.api_key_id,
        "form session opened",
    );
    Json(state.sessions.open().await)
}

async fn session_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let uuid = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(uuid)
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;
    let guard = session.lock().await;
    Ok(Json(guard.view()))
}

/// Apply one field edit to the draft.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/fields`
/// - Body: `{"field": "regular_price", "value": 120}`
async fn edit_field(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<FieldEdit>,
) -> Result<Json<SessionView>, AppError> {
    metrics::inc_requests("/sessions/fields");
    let uuid = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(uuid)
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;
    let mut guard = session.lock().await;
    guard.apply_edit(edit);
    Ok(Json(guard.view()))
}

/// Upload one picker batch of images to the bucket and merge the resulting
/// URLs into the draft. Upload problems land in the session view's
/// `upload_error`, not in the HTTP status.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/images`
/// - Body: multipart form, repeated `images` file fields
async fn upload_images(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<SessionView>, AppError> {
    metrics::inc_requests("/sessions/images");
    let uuid = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(uuid)
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;

    let files = collect_files(&mut multipart).await?;
    let batch_size = files.len();
    let started = Instant::now();

    let mut guard = session.lock().await;
    guard.upload_images(files).await;
    metrics::batch_elapsed(batch_size, started.elapsed().as_millis());
    Ok(Json(guard.view()))
}

async fn collect_files(multipart: &mut Multipart) -> Result<Vec<SelectedFile>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        if field.name() != Some("images") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload.bin").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::BadRequest(format!("unreadable file field: {err}")))?;
        files.push(SelectedFile {
            name,
            content_type,
            bytes,
        });
    }
    Ok(files)
}

async fn remove_image(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, usize)>,
) -> Result<Json<SessionView>, AppError> {
    metrics::inc_requests("/sessions/images/remove");
    let uuid = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(uuid)
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;
    let mut guard = session.lock().await;
    if !guard.remove_image(index) {
        return Err(AppError::BadRequest(format!(
            "image index {index} out of range"
        )));
    }
    Ok(Json(guard.view()))
}

/// Validate the draft and submit it to the listing backend. A created
/// listing ends the session; the view carries the detail location. Gate
/// and backend failures come back in the view's outcome.
///
/// - Method: `POST`
/// - Path: `/sessions/{id}/submit`
async fn submit_listing(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    metrics::inc_requests("/sessions/submit");
    let uuid = parse_session_id(&id)?;
    let session = state
        .sessions
        .get(uuid)
        .await
        .ok_or(AppError::NotFound("session_not_found"))?;

    let (view, created) = {
        let mut guard = session.lock().await;
        let created = guard.submit(state.backend.as_ref(), &user).await.ok();
        (guard.view(), created)
    };
    if created.is_some() {
        state.sessions.remove(uuid).await;
        info!(
            target = "bazaar.api",
            session = %uuid,
            "form session closed after listing creation"
        );
    }
    Ok(Json(view))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
