use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use shared::{event_type_of, EntityType, EventTarget, OperationType};
use uuid::Uuid;

use crate::agent::{FullSyncOptions, SyncEntity};
use crate::auth::{verify_bearer, verify_webhook};
use crate::error::ApiError;
use crate::import::{import_contacts, ImportRequest};
use crate::ingest::Ingestor;
use crate::processor::WebhookProcessor;
use crate::sync_manager::{SyncManager, DEFAULT_BATCH_LIMIT};
use crate::worker::{status_body, FullSyncQueue};

pub const EVENT_HEADER: &str = "x-webhook-event";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<WebhookProcessor>,
    pub ingestor: Ingestor,
    pub sync: Arc<SyncManager>,
    pub full_sync: FullSyncQueue,
    pub webhook_secret: Option<String>,
    pub cron_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub entity_type: String,
    pub entity_id: Uuid,
    #[serde(default = "default_operation")]
    pub operation_type: String,
}

fn default_operation() -> String {
    OperationType::Update.as_str().to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct InitializeRequest {
    /// A table name, or `all`.
    pub table: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DrainRequest {
    pub limit: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FullSyncRequest {
    pub user_id: Option<String>,
    pub entities: Option<Vec<SyncEntity>>,
    pub batch_size: Option<u32>,
    pub skip_existing: Option<bool>,
}

impl FullSyncRequest {
    fn options(&self) -> Result<FullSyncOptions, ApiError> {
        if self.entities.as_ref().is_some_and(Vec::is_empty) {
            return Err(ApiError::BadRequest("entities must not be empty".into()));
        }
        if self.batch_size == Some(0) {
            return Err(ApiError::BadRequest("batch_size must be positive".into()));
        }
        Ok(FullSyncOptions {
            entities: self.entities.clone(),
            batch_size: self.batch_size,
            skip_existing: self.skip_existing,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/events", post(webhook_event))
        .route("/webhooks/:kind", post(entity_webhook))
        .route("/api/cron/sync", get(cron_sync))
        .route("/api/sync/enqueue", post(enqueue))
        .route("/api/sync/initialize", post(initialize))
        .route("/api/sync/process", post(process_pending))
        .route("/api/sync/retry", post(retry_failed))
        .route("/api/sync/stats", get(stats))
        .route("/api/sync/full", post(start_full_sync))
        .route("/api/sync/full/:id", get(full_sync_status))
        .route("/api/import/contacts", post(import))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

fn success(key: &str, value: impl Serialize) -> Result<Json<Value>, ApiError> {
    let value = serde_json::to_value(value).map_err(|e| ApiError::Internal(e.into()))?;
    let mut body = json!({ "success": true });
    body[key] = value;
    Ok(Json(body))
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// Bodies that may be omitted. Only an empty body means "use the defaults".
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid request body: {}", e)))
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn webhook_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    verify_webhook(&headers, state.webhook_secret.as_deref())?;
    let payload = parse_body(body)?;

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| event_type_of(&payload))
        .ok_or_else(|| ApiError::BadRequest("missing event type".into()))?;

    let outcome = state.processor.process_webhook(&event_type, &payload).await?;
    success("results", outcome)
}

pub async fn entity_webhook(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let target = match kind.as_str() {
        "bookings" => EventTarget::Booking,
        "contacts" => EventTarget::Contact,
        "orders" => EventTarget::Order,
        "products" => EventTarget::Product,
        other => return Err(ApiError::NotFound(format!("no webhook for {}", other))),
    };
    verify_webhook(&headers, state.webhook_secret.as_deref())?;
    let payload = parse_body(body)?;

    let event_type = event_type_of(&payload).unwrap_or_else(|| format!("{}_webhook", kind));
    let ingested = state
        .ingestor
        .ingest_logged(target, &event_type, &payload)
        .await?;
    success("results", ingested)
}

pub async fn cron_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;

    let pending = state.sync.process_pending_syncs(DEFAULT_BATCH_LIMIT).await?;
    let retried = state.sync.retry_failed_syncs(DEFAULT_BATCH_LIMIT).await?;
    success("results", json!({ "pending": pending, "retried": retried }))
}

pub async fn enqueue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request = parse_body(body)?;

    let entity: EntityType = request
        .entity_type
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;
    let operation: OperationType = request
        .operation_type
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;

    let op = state.sync.enqueue(entity, request.entity_id, operation).await?;
    success("results", op)
}

pub async fn initialize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request: InitializeRequest = parse_optional_body(&body)?;

    let entities = match request.table.as_deref() {
        None | Some("all") => vec![EntityType::Contact, EntityType::Booking, EntityType::Product],
        Some(table) => vec![EntityType::from_table(table)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown table: {}", table)))?],
    };

    let results = state.sync.initialize(&entities).await?;
    success("results", results)
}

pub async fn process_pending(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request: DrainRequest = parse_optional_body(&body)?;
    let limit = request.limit.unwrap_or(DEFAULT_BATCH_LIMIT);

    let result = state.sync.process_pending_syncs(limit.max(1)).await?;
    success("results", result)
}

pub async fn retry_failed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request: DrainRequest = parse_optional_body(&body)?;
    let limit = request.limit.unwrap_or(DEFAULT_BATCH_LIMIT);

    let result = state.sync.retry_failed_syncs(limit.max(1)).await?;
    success("results", result)
}

pub async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let stats = state.sync.get_stats().await?;
    success("results", stats)
}

pub async fn start_full_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request: FullSyncRequest = parse_optional_body(&body)?;
    let options = request.options()?;

    let log = state.full_sync.submit(request.user_id, options).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "job_id": log.id,
            "status": log.status,
        })),
    ))
}

pub async fn full_sync_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let log = state
        .full_sync
        .status(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("sync job {} not found", id)))?;
    success("results", status_body(&log))
}

pub async fn import(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    verify_bearer(&headers, state.cron_secret.as_deref())?;
    let request = parse_body(body)?;

    let report = import_contacts(&state.ingestor, &request).await;
    success("report", report)
}
