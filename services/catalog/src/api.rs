use crate::bulk::FileType;
use crate::config::{ApiConfig, AuthConfig};
use crate::error::ServiceError;
use crate::item::{Item, ItemSummary};
use crate::service::ItemService;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use bytes::Bytes;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ItemService>,
    /// Verification key for bearer tokens; `None` disables authentication
    pub token_key: Option<DecodingKey>,
}

impl AppState {
    pub fn new(service: Arc<ItemService>, auth: &AuthConfig) -> Self {
        Self {
            service,
            token_key: auth
                .token_secret
                .as_deref()
                .map(|secret| DecodingKey::from_secret(secret.as_bytes())),
        }
    }
}

/// Bearer token claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

impl From<ServiceError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Validation(_) => {
                api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            ServiceError::DuplicateImage => api_error(StatusCode::CONFLICT, "DUPLICATE_IMAGE", message),
            ServiceError::NotFound(_) => api_error(StatusCode::NOT_FOUND, "NOT_FOUND", message),
            ServiceError::Ingest(_) => api_error(StatusCode::BAD_REQUEST, "INVALID_UPLOAD", message),
            ServiceError::Media(e) => {
                error!(error = %e, "Media failure");
                api_error(StatusCode::BAD_GATEWAY, "MEDIA_ERROR", "Failed to process media")
            }
            ServiceError::Store(e) => {
                error!(error = %e, "Record store failure");
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORE_ERROR",
                    "Failed to access the catalog",
                )
            }
        }
    }
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    api_error(
        StatusCode::BAD_REQUEST,
        "VALIDATION_ERROR",
        format!("Failed to parse multipart form: {err}"),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let mutating = Router::new()
        .route("/createGroceryItem", post(create_item))
        .route("/updateGroceryItemByID/:id", put(update_item))
        .route("/deleteGroceryItemByID/:id", delete(delete_item))
        .route("/bulkupload", post(bulk_upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/fetchGroceryItemByID/:id", get(fetch_item))
        .route("/listGroceryItems", get(list_items))
        .merge(mutating)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Reject requests without a valid HS256 bearer token when a secret is set
async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(key) = &state.token_key else {
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        warn!(path = %request.uri().path(), "Missing bearer token");
        return api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Missing bearer token")
            .into_response();
    };

    match decode::<Claims>(token, key, &Validation::new(Algorithm::HS256)) {
        Ok(data) => {
            debug!(subject = %data.claims.sub, "Bearer token accepted");
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %request.uri().path(), error = %e, "Invalid bearer token");
            api_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "Invalid bearer token")
                .into_response()
        }
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "catalog-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ready().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": "disconnected"
                })),
            )
        }
    }
}

/// Read the `json-data` item payload and optional `image` part
async fn read_item_form(mut multipart: Multipart) -> Result<(Item, Option<Bytes>), ApiError> {
    let mut item = None;
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "json-data" => {
                let text = field.text().await.map_err(bad_multipart)?;
                let parsed: Item = serde_json::from_str(&text).map_err(|e| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        "VALIDATION_ERROR",
                        format!("Invalid json-data: {e}"),
                    )
                })?;
                item = Some(parsed);
            }
            "image" => {
                let data = field.bytes().await.map_err(bad_multipart)?;
                if !data.is_empty() {
                    image = Some(data);
                }
            }
            other => debug!(field = other, "Ignoring multipart field"),
        }
    }

    let item = item.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "Missing json-data field",
        )
    })?;

    Ok((item, image))
}

#[instrument(skip(state, multipart))]
async fn create_item(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Item>), ApiError> {
    let (item, image) = read_item_form(multipart).await?;
    let created = state.service.create(item, image).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, multipart))]
async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<Item>, ApiError> {
    let (item, image) = read_item_form(multipart).await?;
    let updated = state.service.update(&id, item, image).await?;
    Ok(Json(updated))
}

#[instrument(skip(state))]
async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.service.delete(&id).await?;
    Ok(Json(MessageResponse {
        message: "Grocery item deleted successfully".to_string(),
    }))
}

#[instrument(skip(state))]
async fn fetch_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.service.fetch_by_id(&id).await?))
}

#[instrument(skip(state))]
async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ItemSummary>>, ApiError> {
    Ok(Json(state.service.list(&params).await?))
}

/// Bulk import from a multipart `file` with optional `filetype`
#[instrument(skip(state, multipart))]
async fn bulk_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let mut file = None;
    let mut declared = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => file = Some(field.bytes().await.map_err(bad_multipart)?),
            "filetype" => {
                let text = field.text().await.map_err(bad_multipart)?;
                if !text.trim().is_empty() {
                    declared = Some(text.parse::<FileType>().map_err(ServiceError::from)?);
                }
            }
            other => debug!(field = other, "Ignoring multipart field"),
        }
    }

    let file = file.ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Missing file field")
    })?;

    let summary = state.service.bulk_upload(file, declared).await?;
    info!(
        stored = summary.stored.len(),
        failed = summary.failures.len(),
        "Bulk upload request completed"
    );

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Bulk grocery items created successfully".to_string(),
        }),
    ))
}

/// Start the catalog API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting catalog API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
