//! HTTP API gateway for OpsClaw.
//!
//! Serves the v1 REST API on top of a shared [`Runtime`]: web message
//! ingestion, memory and knowledge management, command analysis and
//! approval, usage, audit and event inspection.
//!
//! Built on Axum.

pub mod api_v1;
pub mod runtime;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use runtime::{Runtime, Stores};

/// Requests per client per window.
const RATE_LIMIT_REQUESTS: usize = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// Request body limit (1 MB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the full router: the v1 API plus the security layers.
///
/// Layers applied:
/// - Bearer key authentication on /v1 routes when an API key is configured
/// - CORS restricted to the gateway's own origin
/// - Request body size limit (1 MB)
/// - In-memory rate limiting (60 req/min per client)
/// - HTTP trace logging
pub fn build_router(state: api_v1::SharedApiState) -> Router {
    let origin = format!(
        "http://{}:{}",
        state.config.gateway.host, state.config.gateway.port
    );
    let v1 = api_v1::v1_router(state.clone())
        .layer(middleware::from_fn_with_state(state, auth_middleware));

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));
    if let Ok(origin) = HeaderValue::from_str(&origin) {
        cors = cors.allow_origin(AllowOrigin::exact(origin));
    }

    let rate_limiter = Arc::new(RateLimiter::new(RATE_LIMIT_REQUESTS, RATE_LIMIT_WINDOW));

    Router::new()
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server on a runtime built from `config`.
pub async fn start(config: opsclaw_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Arc::new(Runtime::build(config).await?);
    serve(runtime).await
}

/// Serve an existing runtime until the process is stopped.
pub async fn serve(runtime: Arc<Runtime>) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!(
        "{}:{}",
        runtime.config.gateway.host, runtime.config.gateway.port
    );
    if runtime.config.api_key.is_none() {
        warn!("No API key configured; the v1 API is open to any client that can reach it");
    }

    let app = build_router(runtime);
    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

// --- Rate Limiter ---

/// In-memory sliding-window rate limiter keyed by client.
///
/// Thread-safe via `std::sync::Mutex` (held briefly, never across await).
struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the client is within its limit.
    fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Keyed on the Authorization header, or "anonymous". The health endpoint
/// is exempt so monitoring can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/v1/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key.chars().take(20).collect::<String>(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

/// Requires `Authorization: Bearer <api_key>` on /v1 routes (except health)
/// when an API key is configured.
async fn auth_middleware(
    State(state): State<api_v1::SharedApiState>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    let Some(expected) = state.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "Unauthorized request to /v1 API");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
