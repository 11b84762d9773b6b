//! promptlift-api - HTTP API server for promptlift

mod service;

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt as _;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use promptlift_core::defaults::{
    MAX_BODY_BYTES, RATE_LIMIT_PERIOD_SECS, RATE_LIMIT_REQUESTS, SERVER_PORT,
};
use promptlift_core::{EnhanceRequest, EnhancementPath, Platform, QuotaLedger, QuotaSnapshot};
use promptlift_db::{Database, PgQuotaLedger};
use promptlift_inference::OpenAIBackend;

use service::{EnhancementService, StreamEvent, NO_MODEL_NAME, OFFLINE_MODEL_NAME};

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Global rate limiter type (direct quota, not keyed per client).
type GlobalRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    db: Database,
    service: Arc<EnhancementService<OpenAIBackend, PgQuotaLedger>>,
    /// Global rate limiter (None if rate limiting is disabled).
    rate_limiter: Option<Arc<GlobalRateLimiter>>,
}

// =============================================================================
// CORS
// =============================================================================

/// Parse the CORS origin whitelist from ALLOWED_ORIGINS (comma-separated).
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with configurable output
    //
    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter (default: "promptlift_api=debug,tower_http=debug")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "promptlift_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    // Optionally create a file appender with daily rotation
    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("promptlift-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            } else {
                layer = layer.with_ansi(false); // no ANSI in files
            }
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        // Console-only output
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    // Get configuration from environment
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/promptlift".to_string());
    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(SERVER_PORT);

    // Rate limiting configuration
    // RATE_LIMIT_REQUESTS: requests per period (default: 100)
    // RATE_LIMIT_PERIOD_SECS: period in seconds (default: 60)
    let rate_limit_requests: u64 = std::env::var("RATE_LIMIT_REQUESTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(RATE_LIMIT_REQUESTS);
    let rate_limit_period_secs: u64 = std::env::var("RATE_LIMIT_PERIOD_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(RATE_LIMIT_PERIOD_SECS);
    let rate_limit_enabled: bool = std::env::var("RATE_LIMIT_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true);

    info!(
        "Rate limiting: {} ({} requests per {} seconds)",
        if rate_limit_enabled {
            "enabled"
        } else {
            "disabled"
        },
        rate_limit_requests,
        rate_limit_period_secs
    );

    // Connect to database
    info!("Connecting to database...");
    let db = Database::connect(&database_url).await?;
    info!("Database connected");

    // Run pending database migrations on startup
    info!("Running database migrations...");
    db.migrate().await?;
    info!("Database migrations complete");

    // Initialize the upstream generation backend
    let backend = OpenAIBackend::from_env()?;
    if !backend.health_check().await.unwrap_or(false) {
        tracing::warn!("Upstream provider unreachable at startup, fallback path will serve");
    }

    let service = Arc::new(EnhancementService::new(
        Arc::new(backend),
        Arc::new(db.ledger.clone()),
    ));

    // Create rate limiter if enabled
    let rate_limiter = if rate_limit_enabled {
        let quota = Quota::with_period(std::time::Duration::from_secs(rate_limit_period_secs))
            .expect("Rate limit period must be non-zero")
            .allow_burst(
                NonZeroU32::new(rate_limit_requests as u32).expect("Rate limit must be non-zero"),
            );
        Some(Arc::new(RateLimiter::direct(quota)))
    } else {
        None
    };

    let state = AppState {
        db,
        service,
        rate_limiter,
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/enhance", post(enhance))
        .route("/stream-enhance", post(stream_enhance))
        .route("/users/:email", get(get_user))
        .route("/users/:email/increment", post(increment_user))
        .route("/rate-limit", get(rate_limit_status))
        // Middleware
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer({
            let allowed_origins = parse_allowed_origins();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static("x-user-email"),
                    HeaderName::from_static("x-idempotency-key"),
                    HeaderName::from_static("x-platform"),
                ])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600))
        })
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// =============================================================================
// REQUEST / RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
struct EnhanceBody {
    prompt: String,
    #[serde(default)]
    target_model_or_url: String,
}

#[derive(Debug, Serialize)]
struct EnhanceResponse {
    enhanced_prompt: String,
    model_used: String,
    platform: String,
    user_prompt_count: i64,
    daily_prompts_used: i64,
    daily_limit: i64,
    subscription_tier: String,
    limit_reached: bool,
}

impl EnhanceResponse {
    fn new(text: String, model_used: String, platform: Platform, snapshot: &QuotaSnapshot) -> Self {
        Self {
            enhanced_prompt: text,
            model_used,
            platform: platform.as_str().to_string(),
            user_prompt_count: snapshot.lifetime_count,
            daily_prompts_used: snapshot.daily_count,
            daily_limit: snapshot.daily_limit,
            subscription_tier: snapshot.tier.as_str().to_string(),
            limit_reached: snapshot.limit_reached,
        }
    }
}

#[derive(Debug, Serialize)]
struct UserResponse {
    enhanced_prompts: i64,
    subscription_tier: String,
    daily_prompts_used: i64,
}

#[derive(Debug, Deserialize)]
struct IncrementQuery {
    platform: Option<String>,
}

#[derive(Debug, Serialize)]
struct IncrementResponse {
    user_prompt_count: i64,
    daily_prompts_used: i64,
    daily_limit: i64,
    subscription_tier: String,
    limit_reached: bool,
}

// =============================================================================
// HANDLERS
// =============================================================================

/// Pull the enhancement inputs out of headers and body, rejecting what the
/// endpoints cannot serve without.
fn parse_enhance_request(
    headers: &HeaderMap,
    body: EnhanceBody,
) -> Result<EnhanceRequest, ApiError> {
    let user_email = headers
        .get("x-user-email")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("X-User-Email header is required".to_string()))?
        .to_string();

    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("X-Idempotency-Key header is required".to_string()))?
        .to_string();

    let platform_override = headers
        .get("x-platform")
        .and_then(|v| v.to_str().ok())
        .and_then(Platform::from_id);

    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".to_string()));
    }

    Ok(EnhanceRequest {
        prompt: body.prompt,
        target_hint: body.target_model_or_url,
        platform_override,
        user_email,
        idempotency_key,
    })
}

/// POST /enhance
async fn enhance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnhanceBody>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_enhance_request(&headers, body)?;
    let result = state.service.enhance(req).await?;

    let model_used = if result.snapshot.limit_reached && result.text.is_empty() {
        NO_MODEL_NAME.to_string()
    } else {
        match result.path {
            EnhancementPath::Model => state.service.model_name().to_string(),
            EnhancementPath::Fallback => OFFLINE_MODEL_NAME.to_string(),
        }
    };

    Ok(Json(EnhanceResponse::new(
        result.text,
        model_used,
        result.platform,
        &result.snapshot,
    )))
}

/// POST /stream-enhance
///
/// SSE response: `chunk` events carrying text pieces, then one `complete`
/// event, or a single `limit_reached` event when the daily allowance is
/// exhausted.
async fn stream_enhance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EnhanceBody>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, std::convert::Infallible>>>, ApiError> {
    let req = parse_enhance_request(&headers, body)?;
    let events = state.service.enhance_stream(req).await?;

    let stream = events.map(|event| {
        let sse = match event {
            StreamEvent::Chunk(text) => Event::default().event("chunk").data(
                serde_json::json!({
                    "type": "chunk",
                    "data": text,
                })
                .to_string(),
            ),
            StreamEvent::Complete {
                model_used,
                platform,
                snapshot,
            } => Event::default().event("complete").data(
                serde_json::json!({
                    "type": "complete",
                    "model_used": model_used,
                    "platform": platform.as_str(),
                    "user_prompt_count": snapshot.lifetime_count,
                    "daily_prompts_used": snapshot.daily_count,
                    "daily_limit": snapshot.daily_limit,
                    "subscription_tier": snapshot.tier.as_str(),
                    "limit_reached": snapshot.limit_reached,
                })
                .to_string(),
            ),
            StreamEvent::LimitReached { snapshot } => Event::default().event("limit_reached").data(
                serde_json::json!({
                    "type": "limit_reached",
                    "data": {
                        "daily_prompts_used": snapshot.daily_count,
                        "daily_limit": snapshot.daily_limit,
                        "subscription_tier": snapshot.tier.as_str(),
                    },
                })
                .to_string(),
            ),
        };
        Ok(sse)
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("keepalive"),
    ))
}

/// GET /users/:email
async fn get_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state
        .db
        .ledger
        .get_user(&email)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", email)))?;

    Ok(Json(UserResponse {
        enhanced_prompts: snapshot.lifetime_count,
        subscription_tier: snapshot.tier.as_str().to_string(),
        daily_prompts_used: snapshot.daily_count,
    }))
}

/// POST /users/:email/increment
///
/// Legacy counter bump without an idempotency key; retried calls
/// double-count.
async fn increment_user(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Query(query): Query<IncrementQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let platform = query
        .platform
        .as_deref()
        .and_then(Platform::from_id)
        .unwrap_or(Platform::Chatgpt);

    let check = state.db.ledger.record_usage(&email, platform).await?;

    Ok(Json(IncrementResponse {
        user_prompt_count: check.snapshot.lifetime_count,
        daily_prompts_used: check.snapshot.daily_count,
        daily_limit: check.snapshot.daily_limit,
        subscription_tier: check.snapshot.tier.as_str().to_string(),
        limit_reached: check.snapshot.limit_reached,
    }))
}

// =============================================================================
// RATE LIMITING MIDDLEWARE
// =============================================================================

async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(limiter) = &state.rate_limiter {
        if limiter.check().is_err() {
            tracing::warn!("Rate limit exceeded");
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({
                    "error": "rate_limit_exceeded",
                    "error_description": "Too many requests. Please wait before retrying."
                })),
            ));
        }
    }
    Ok(next.run(request).await)
}

/// Get rate limiting status.
async fn rate_limit_status(State(state): State<AppState>) -> impl IntoResponse {
    if state.rate_limiter.is_some() {
        Json(serde_json::json!({
            "enabled": true,
            "message": "Rate limiting is active"
        }))
    } else {
        Json(serde_json::json!({
            "enabled": false,
            "message": "Rate limiting is disabled"
        }))
    }
}

// =============================================================================
// HEALTH CHECK
// =============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// ERROR HANDLING
// =============================================================================

#[derive(Debug)]
enum ApiError {
    Internal(promptlift_core::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<promptlift_core::Error> for ApiError {
    fn from(err: promptlift_core::Error) -> Self {
        match &err {
            promptlift_core::Error::NotFound(msg) => ApiError::NotFound(msg.clone()),
            promptlift_core::Error::UserNotFound(email) => {
                ApiError::NotFound(format!("User {} not found", email))
            }
            promptlift_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Internal(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
