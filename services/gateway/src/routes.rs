use crate::config::Config;
use crate::error::GatewayError;
use crate::relay_client::Relay;
use crate::storage_selector::StorageSelector;
use crate::upload_receiver::{ReceiveError, UploadReceiver};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Returned to the client once the provider has accepted the file
pub const SUCCESS_MESSAGE: &str = "File uploaded to Gemini Files API";

/// Allowance for multipart boundaries and part headers on top of the file limit
const MULTIPART_ENVELOPE_BYTES: u64 = 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<StorageSelector>,
    pub receiver: Arc<UploadReceiver>,
    pub relay: Arc<Relay>,
}

/// Upload success response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    /// Provider metadata, passed through unmodified
    pub metadata: Value,
}

/// Create the gateway router
pub fn create_router(state: AppState, config: &Config) -> Router {
    let allowed_origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins.clone())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let body_limit = config
        .storage
        .max_file_size_bytes
        .saturating_add(MULTIPART_ENVELOPE_BYTES);

    Router::new()
        .route("/upload", post(upload_file))
        .fallback_service(ServeDir::new(&config.server.public_dir))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .layer(cors)
        .layer(middleware::from_fn_with_state(
            Arc::new(allowed_origins),
            enforce_origin,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject browser requests from origins outside the allow-list.
///
/// Requests without an `Origin` header come from non-browser callers and pass.
async fn enforce_origin(
    State(allowed): State<Arc<Vec<HeaderValue>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        if !allowed.contains(origin) {
            warn!(origin = ?origin, "Origin not allowed by CORS");
            return (StatusCode::FORBIDDEN, "Not allowed by CORS").into_response();
        }
    }

    next.run(request).await
}

/// Accept one file, buffer it per the selected mode, and relay it to the provider
#[instrument(skip_all, fields(storage_type = tracing::field::Empty))]
async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, GatewayError> {
    // Decided before the body is read: the mode picks how it is buffered
    let mode = state.selector.decide(declared_content_length(&headers));
    tracing::Span::current().record("storage_type", mode.as_str());
    metrics::counter!("gateway.uploads.received", "storage_type" => mode.as_str()).increment(1);

    let multipart = multipart.map_err(|e| {
        debug!(error = %e, "Request is not a multipart upload");
        GatewayError::Rejected(ReceiveError::NoFileUploaded)
    })?;

    let file = state
        .receiver
        .receive(multipart, mode)
        .await
        .map_err(|e| GatewayError::from_receive(e, mode))?;

    info!(
        original_name = %file.original_name,
        mime_type = %file.mime_type,
        size_bytes = file.size_bytes,
        storage_type = %mode,
        "File received"
    );

    let metadata = state
        .relay
        .forward(file)
        .await
        .map_err(|e| GatewayError::from_relay(e, mode))?;

    metrics::counter!("gateway.uploads.succeeded").increment(1);
    info!(storage_type = %mode, "File relayed to Gemini Files API");

    Ok(Json(UploadResponse {
        message: SUCCESS_MESSAGE.to_string(),
        metadata,
    }))
}

/// Size hint from `Content-Length`; absent or unparseable counts as zero
fn declared_content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Start the upload gateway server
pub async fn start_api_server<F>(state: AppState, config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.server.host, config.server.port);

    info!(address = %addr, "Starting upload gateway server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
