use std::{fmt, sync::Arc, time::Instant};

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, Uri},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use llm_core::Signals;
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    error::ApiError,
    metrics::{CacheStats, MetricsResponse, SynthesisStats, SystemMetrics},
    orchestrator::{GenerateRequest, Orchestrator},
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    /// Base64 encoded audio; empty when no audio could be produced
    pub audio: String,
    pub signals: Signals,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvatarAction {
    Wave,
    Nod,
    #[default]
    Idle,
}

impl fmt::Display for AvatarAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AvatarAction::Wave => "wave",
            AvatarAction::Nod => "nod",
            AvatarAction::Idle => "idle",
        })
    }
}

#[derive(Deserialize)]
pub struct TriggerActionRequest {
    #[serde(default)]
    action: AvatarAction,
}

#[derive(Serialize, Deserialize)]
pub struct TriggerActionResponse {
    pub success: bool,
    pub behavior: AvatarAction,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

/// All routes, mounted at the root and again under `/api`.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/generate", post(generate_endpoint))
        .route("/generate/", post(generate_endpoint))
        .route("/trigger-action", post(trigger_action))
        .route("/metrics", get(metrics_endpoint));

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .fallback(not_found)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

/// Wrap `app` in tracing, rate limiting, request timeout and CORS.
pub fn with_middleware(app: Router, config: &ServerConfig) -> anyhow::Result<Router> {
    // Using GlobalKeyExtractor to rate limit globally (all requests share the same limit)
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond((60_000 / u64::from(per_minute)).max(1))
            .burst_size(per_minute)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?,
    );
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors_layer(config))
        .into_inner();

    Ok(app.layer(middleware_stack))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        base.allow_origin(Any)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        base.allow_origin(AllowOrigin::list(origins))
    }
}

// Request ID middleware for tracing
async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok".to_string(),
        message: "Persona backend running".to_string(),
    })
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {uri}"))
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn generate_endpoint(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    // The pipeline runs in its own task so a dropped connection cannot
    // abandon it halfway.
    let orchestrator = Arc::clone(&state.orchestrator);
    let generated = tokio::spawn(async move { orchestrator.generate(&req).await })
        .await
        .map_err(|e| ApiError::InternalError(format!("Generate task failed: {e}")))??;

    Ok(Json(GenerateResponse {
        text: generated.text,
        audio: generated.audio.to_base64(),
        signals: generated.signals,
    }))
}

pub async fn trigger_action(Json(req): Json<TriggerActionRequest>) -> Json<TriggerActionResponse> {
    let behavior = req.action;
    Json(TriggerActionResponse {
        success: true,
        behavior,
        message: format!("Triggered {behavior} animation"),
    })
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    let orchestrator = &state.orchestrator;
    let metrics = orchestrator.metrics();
    let snapshot = metrics.snapshot();

    let ai_cache = CacheStats {
        entries: orchestrator.ai_cache().len(),
        capacity: orchestrator.ai_cache().capacity(),
        hits: metrics.ai_cache.hits(),
        misses: metrics.ai_cache.misses(),
        hit_rate: metrics.ai_cache.hit_rate(),
    };
    let audio_cache = CacheStats {
        entries: orchestrator.audio_cache().len(),
        capacity: orchestrator.audio_cache().capacity(),
        hits: metrics.audio_cache.hits(),
        misses: metrics.audio_cache.misses(),
        hit_rate: metrics.audio_cache.hit_rate(),
    };
    let synthesis = SynthesisStats {
        calls: metrics.synthesis.count(),
        failures: metrics.synthesis_failures(),
        avg_synthesis_time_ms: metrics.synthesis.avg_latency_ms(),
        in_flight: orchestrator.gate().in_flight(),
        max_concurrency: orchestrator.gate().limit(),
    };

    Json(MetricsResponse {
        timestamp: chrono::Utc::now(),
        requests: snapshot.request_count,
        avg_latency_ms: snapshot.average_latency_ms,
        min_latency_ms: metrics.requests.min_latency_ms(),
        max_latency_ms: metrics.requests.max_latency_ms(),
        brain_faults: metrics.brain_faults(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        ai_cache,
        audio_cache,
        synthesis,
        system: system_metrics(),
    })
}

fn system_metrics() -> SystemMetrics {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    SystemMetrics {
        cpu_usage_percent: system.global_cpu_info().cpu_usage(),
        memory_used_mb: memory_used / 1024 / 1024, // Convert bytes to MB
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        system_load: system_load(),
    }
}

#[cfg(unix)]
fn system_load() -> Option<f64> {
    Some(sysinfo::System::load_average().one)
}

#[cfg(not(unix))]
fn system_load() -> Option<f64> {
    None
}
