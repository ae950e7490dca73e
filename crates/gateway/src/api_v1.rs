//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `GET    /v1/health`                    Liveness and uptime
//! - `GET    /v1/channels`                  Registered channel adapters
//! - `POST   /v1/messages`                  Route a web message, get the response
//! - `POST   /v1/memory`                    Store a memory (deduplicated)
//! - `GET    /v1/memory/search`             Hybrid memory search
//! - `GET    /v1/memory/stats`              Memory statistics
//! - `POST   /v1/memory/prune`              Expire, decay and prune
//! - `POST   /v1/memory/{id}/verify`        Mark a memory verified
//! - `DELETE /v1/memory/{id}`               Forget a memory
//! - `POST   /v1/knowledge`                 Upsert an infrastructure fact
//! - `GET    /v1/knowledge`                 Look up facts
//! - `GET    /v1/commands`                  List analyzed commands
//! - `POST   /v1/commands`                  Analyze a command into a plan
//! - `GET    /v1/commands/{id}`             Command status and step results
//! - `POST   /v1/commands/{id}/approve`     Approve and execute in the background
//! - `GET    /v1/usage`                     Model usage summary
//! - `GET    /v1/audit`                     Recent audit records
//! - `GET    /v1/events`                    Recent domain events
//! - `GET    /v1/events/stream`             SSE stream of live domain events

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

use opsclaw_agent::{ChannelStatus, CommandError, CommandRecord, ExecutionPlan, analyze_command};
use opsclaw_core::channel::ChannelAdapter;
use opsclaw_core::error::MemoryError;
use opsclaw_core::event::DomainEvent;
use opsclaw_core::knowledge::KnowledgeFact;
use opsclaw_core::memory::{MemoryCategory, MemoryStats, NewMemory, PruneReport};
use opsclaw_memory::ScoredMemory;
use opsclaw_security::{AllowlistPolicy, AuditRecord, SenderCheckResult};
use opsclaw_telemetry::{UsageSummary, UsageTracker};

use crate::runtime::Runtime;

pub type SharedApiState = Arc<Runtime>;

/// Upper bound for `limit` query parameters.
const MAX_LIST_LIMIT: usize = 500;

// ── Router ────────────────────────────────────────────────────────────────

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/channels", get(list_channels_handler))
        .route("/messages", post(message_handler))
        .route("/memory", post(create_memory_handler))
        .route("/memory/search", get(search_memory_handler))
        .route("/memory/stats", get(memory_stats_handler))
        .route("/memory/prune", post(prune_memory_handler))
        .route("/memory/{id}/verify", post(verify_memory_handler))
        .route("/memory/{id}", axum::routing::delete(delete_memory_handler))
        .route("/knowledge", get(lookup_knowledge_handler).post(upsert_knowledge_handler))
        .route("/commands", get(list_commands_handler).post(analyze_command_handler))
        .route("/commands/{id}", get(get_command_handler))
        .route("/commands/{id}/approve", post(approve_command_handler))
        .route("/usage", get(usage_handler))
        .route("/audit", get(audit_handler))
        .route("/events", get(events_handler))
        .route("/events/stream", get(event_stream_handler))
        .with_state(state)
}

// ── Errors ────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn memory_error(e: MemoryError) -> ApiError {
    match e {
        MemoryError::NotFound(id) => api_error(StatusCode::NOT_FOUND, format!("Memory '{id}' not found")),
        other => {
            error!(error = %other, "Memory operation failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

fn command_error(e: CommandError) -> ApiError {
    match e {
        CommandError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        CommandError::InvalidTransition { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
    }
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}

// ── Health / channels ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    semantic_search: bool,
}

async fn health_handler(State(state): State<SharedApiState>) -> Json<HealthResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds()
        .max(0) as u64;
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: uptime,
        semantic_search: state.memory().has_vectors(),
    })
}

async fn list_channels_handler(State(state): State<SharedApiState>) -> Json<Vec<ChannelStatus>> {
    Json(state.router.channel_status())
}

// ── Messages ──────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct MessageResponse {
    response: String,
    session_id: String,
}

/// Body: `{command | text, email?, name?, session_id?}`.
async fn message_handler(
    State(state): State<SharedApiState>,
    Json(raw): Json<serde_json::Value>,
) -> ApiResult<MessageResponse> {
    let Some(mut message) = state.web.receive_message(raw).await else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Message text is required"));
    };

    if let SenderCheckResult::Denied { reason, .. } =
        AllowlistPolicy::check_sender(state.config.channels.get("web"), message.sender_id())
    {
        warn!(sender = %message.sender_id(), "Web sender rejected: {reason}");
        return Err(api_error(StatusCode::FORBIDDEN, reason));
    }

    let session_id = message.ensure_session_id().to_string();
    let message_id = message.id().to_string();
    let timeout = Duration::from_secs(state.config.gateway.response_timeout_secs);

    let router = state.router.clone();
    let mut routing = tokio::spawn(async move { router.route(message).await });

    let response = match tokio::time::timeout(timeout, &mut routing).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            error!(error = %e, "Routing task failed");
            state.web.take_response(&message_id, Duration::ZERO).await;
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Routing failed"));
        }
        Err(_) => {
            warn!(session = %session_id, "Web response timed out");
            // Routing keeps going; drop its delivery once nobody is waiting
            let web = state.web.clone();
            tokio::spawn(async move {
                let _ = routing.await;
                if web.take_response(&message_id, Duration::ZERO).await.is_some() {
                    debug!(message_id = %message_id, "Discarded late web response");
                }
            });
            return Err(api_error(StatusCode::GATEWAY_TIMEOUT, "Response timed out"));
        }
    };

    // The routed text is the whole reply. The channel buffer holds the same
    // text as trimmed chunks, so it is only drained here.
    state.web.take_response(&message_id, Duration::ZERO).await;

    Ok(Json(MessageResponse {
        response,
        session_id,
    }))
}

// ── Memory ────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct StoreMemoryResponse {
    id: String,
    merged: bool,
}

async fn create_memory_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<NewMemory>,
) -> Result<(StatusCode, Json<StoreMemoryResponse>), ApiError> {
    if req.content.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Memory content is required"));
    }
    let outcome = state.memory().store(req).await.map_err(memory_error)?;
    let status = if outcome.merged {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(StoreMemoryResponse {
            id: outcome.id,
            merged: outcome.merged,
        }),
    ))
}

#[derive(Deserialize)]
struct MemorySearchQuery {
    q: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    min_confidence: Option<f32>,
}

#[derive(Serialize)]
struct MemorySearchResponse {
    count: usize,
    results: Vec<ScoredMemory>,
}

async fn search_memory_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<MemorySearchQuery>,
) -> ApiResult<MemorySearchResponse> {
    let category = query
        .category
        .as_deref()
        .map(str::parse::<MemoryCategory>)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let results = state
        .memory()
        .search(
            &query.q,
            clamp_limit(query.limit, 10),
            category,
            query.min_confidence.unwrap_or(0.0),
        )
        .await
        .map_err(memory_error)?;

    Ok(Json(MemorySearchResponse {
        count: results.len(),
        results,
    }))
}

async fn memory_stats_handler(State(state): State<SharedApiState>) -> ApiResult<MemoryStats> {
    state.memory().stats().await.map(Json).map_err(memory_error)
}

async fn prune_memory_handler(State(state): State<SharedApiState>) -> ApiResult<PruneReport> {
    let report = state.memory().prune().await.map_err(memory_error)?;
    state.audit.log(
        AuditRecord::new("api", "memory.prune", "memory")
            .with_detail(format!(
                "expired={} decayed={} pruned={}",
                report.expired_deleted, report.decayed, report.low_confidence_deleted
            )),
    );
    Ok(Json(report))
}

async fn verify_memory_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.memory().verify(&id).await.map_err(memory_error)?;
    state
        .audit
        .log(AuditRecord::new("api", "memory.verify", format!("memory:{id}")));
    Ok(Json(serde_json::json!({ "id": id, "verified": true })))
}

async fn delete_memory_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    if !state.memory().delete(&id).await.map_err(memory_error)? {
        return Err(memory_error(MemoryError::NotFound(id)));
    }
    state
        .audit
        .log(AuditRecord::new("api", "memory.delete", format!("memory:{id}")));
    Ok(Json(serde_json::json!({ "id": id, "deleted": true })))
}

// ── Knowledge ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct KnowledgeQuery {
    q: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn upsert_knowledge_handler(
    State(state): State<SharedApiState>,
    Json(fact): Json<KnowledgeFact>,
) -> Result<StatusCode, ApiError> {
    if fact.domain.trim().is_empty() || fact.key.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Fact domain and key are required"));
    }
    state
        .context
        .knowledge()
        .upsert(fact)
        .await
        .map_err(memory_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lookup_knowledge_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<KnowledgeQuery>,
) -> ApiResult<Vec<KnowledgeFact>> {
    state
        .context
        .knowledge()
        .lookup(&query.q, clamp_limit(query.limit, 10))
        .await
        .map(Json)
        .map_err(memory_error)
}

// ── Commands ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AnalyzeCommandRequest {
    command: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    server_context: Option<serde_json::Value>,
    #[serde(default)]
    recent_logs: Vec<String>,
    /// When false, a plan marked safe for auto-execution runs immediately
    #[serde(default = "default_true")]
    approval_required: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize)]
struct AnalyzeCommandResponse {
    id: String,
    status: String,
    requires_approval: bool,
    plan: ExecutionPlan,
}

async fn analyze_command_handler(
    State(state): State<SharedApiState>,
    Json(req): Json<AnalyzeCommandRequest>,
) -> Result<(StatusCode, Json<AnalyzeCommandResponse>), ApiError> {
    let command = req.command.trim();
    if command.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Command text is required"));
    }
    let sender = req.email.as_deref().unwrap_or("web_user");

    let record = state.commands.create(sender, "web", command);
    let plan = analyze_command(
        &state.brain,
        command,
        req.server_context.as_ref(),
        &req.recent_logs,
    )
    .await;
    state
        .commands
        .set_analysis(&record.id, plan.clone())
        .map_err(command_error)?;

    state.audit.log(
        AuditRecord::new(format!("web:{sender}"), "command.analyzed", command.chars().take(200).collect::<String>())
            .on_channel("web")
            .with_detail(format!("id={} severity={}", record.id, plan.severity.as_str())),
    );

    let auto_run = plan.auto_execute && !req.approval_required;
    if auto_run {
        state.commands.approve(&record.id).map_err(command_error)?;
        spawn_execution(&state, record.id.clone());
    }

    let current = state
        .commands
        .get(&record.id)
        .map(|r| r.status.as_str())
        .unwrap_or("analyzed");
    Ok((
        StatusCode::CREATED,
        Json(AnalyzeCommandResponse {
            id: record.id,
            status: current.into(),
            requires_approval: !auto_run,
            plan,
        }),
    ))
}

async fn list_commands_handler(State(state): State<SharedApiState>) -> Json<Vec<CommandRecord>> {
    Json(state.commands.list())
}

async fn get_command_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> ApiResult<CommandRecord> {
    state
        .commands
        .get(&id)
        .map(Json)
        .ok_or_else(|| command_error(CommandError::NotFound(id)))
}

async fn approve_command_handler(
    State(state): State<SharedApiState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CommandRecord>), ApiError> {
    let record = state.commands.approve(&id).map_err(command_error)?;
    state.audit.log(
        AuditRecord::new(format!("{}:{}", record.channel, record.sender), "command.approved", format!("command:{id}"))
            .on_channel(&record.channel),
    );
    spawn_execution(&state, id);
    Ok((StatusCode::ACCEPTED, Json(record)))
}

/// Run an approved plan off the request path.
fn spawn_execution(state: &SharedApiState, id: String) {
    let executor = state.executor.clone();
    let commands = state.commands.clone();
    tokio::spawn(async move {
        match executor.run_approved(&commands, &id).await {
            Ok(results) => info!(command_id = %id, steps = results.len(), "Approved plan finished"),
            Err(e) => warn!(command_id = %id, "Approved plan did not run: {e}"),
        }
    });
}

// ── Usage / audit / events ────────────────────────────────────────────────

async fn usage_handler(State(state): State<SharedApiState>) -> ApiResult<UsageSummary> {
    state.usage.summary().await.map(Json).map_err(|e| {
        error!(error = %e, "Usage summary failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn audit_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<AuditRecord>> {
    Json(state.audit.recent(clamp_limit(query.limit, 50)))
}

async fn events_handler(
    State(state): State<SharedApiState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<DomainEvent>> {
    let events = state
        .events
        .recent(clamp_limit(query.limit, 50))
        .into_iter()
        .map(|e| e.as_ref().clone())
        .collect();
    Json(events)
}

/// Lagging subscribers skip the events they missed.
async fn event_stream_handler(
    State(state): State<SharedApiState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe())
        .filter_map(|result| result.ok())
        .map(|event| {
            let data = serde_json::to_string(event.as_ref()).unwrap_or_default();
            Ok(SseEvent::default().event(event.kind()).data(data))
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Tests ─────────────────────────────────────────────────────────────────
