//! REST API server — expose the fallback chains as an HTTP service.
//!
//! Endpoints:
//! - GET  /v1/health — Health check
//! - GET  /v1/status — Provider chains and metrics
//! - POST /v1/generate — Generate text for `{"prompt": "..."}`
//! - GET  /v1/generate/{*prompt} — Same, prompt as the rest of the path
//! - POST /v1/code — Code-only answer for `{"prompt": "..."}`
//! - GET  /v1/code/{*prompt} — Same, prompt as the rest of the path
//! - POST /v1/image — Image URL for `{"prompt": "..."}`
//! - GET  /v1/image/{*prompt} — Same, prompt as the rest of the path
//! - POST /v1/vision — Describe the image at `{"url": "..."}`
//! - GET  /v1/learning/courses — Course catalogue
//! - POST /v1/learning/{user} — Register a user
//! - POST /v1/learning/{user}/start — Start a course
//! - GET  /v1/learning/{user}/today — Current task
//! - POST /v1/learning/{user}/next — Advance one day
//! - POST /v1/learning/{user}/previous — Go back one day
//! - GET  /v1/learning/{user}/progress — Progress report
//! - POST /v1/learning/{user}/finish — Close the current course

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use genrelay_core::dispatch::Dispatcher;
use genrelay_core::error::{DispatchError, ProviderError};
use genrelay_core::progress::{ProgressStore, UserProgress};

use crate::learning::{Course, LearningCoach, LearningError, ProgressReport, Task};
use crate::metrics::SharedMetrics;
use crate::middleware::{RateLimiter, auth_middleware, logging_middleware, rate_limit_middleware};
use crate::providers::Chains;

/// Message returned for every dispatch failure; details stay in the logs.
pub const UNAVAILABLE: &str = "generation service unavailable";

/// Shared API state.
pub struct ApiState {
    pub chains: Chains,
    pub coach: LearningCoach<Arc<dyn ProgressStore>>,
    pub metrics: SharedMetrics,
    /// Overall deadline for one generate request.
    pub request_timeout: Duration,
    /// `None` disables per-client rate limiting.
    pub rate_limiter: Option<RateLimiter>,
    /// Cancelled on server shutdown; every request token is a child of it.
    pub shutdown: CancellationToken,
}

type SharedState = Arc<ApiState>;

// ─── Request/Response types ────────────────────────────────

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
}

#[derive(Deserialize)]
pub struct VisionRequest {
    pub url: String,
}

/// Generated output, serialized under a key that names what it is.
#[derive(Serialize)]
#[serde(untagged)]
pub enum Output {
    Text { text: String },
    Code { code: String },
    Image { image_url: String, prompt: String },
    Description { description: String },
}

#[derive(Serialize)]
pub struct GenerateResponse {
    pub request_id: String,
    #[serde(flatten)]
    pub output: Output,
    pub provider: String,
    pub attempts: usize,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
pub struct GenerateErrorResponse {
    pub request_id: String,
    pub error: String,
    pub elapsed_ms: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub status: String,
    pub providers: Vec<String>,
    pub image_providers: Vec<String>,
    pub vision_providers: Vec<String>,
    pub attempt_timeout_secs: u64,
    pub dispatches: u64,
    pub rate_limit: serde_json::Value,
    pub metrics: serde_json::Value,
}

#[derive(Deserialize)]
pub struct StartCourseRequest {
    pub course: String,
}

#[derive(Serialize)]
pub struct CourseSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub days: u32,
}

#[derive(Serialize)]
pub struct FinishResponse {
    pub finished: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

/// Which chain a request goes to and how its input and output are shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Text,
    Code,
    Image,
    Vision,
}

impl Job {
    fn dispatcher(self, chains: &Chains) -> &Dispatcher {
        match self {
            Self::Text | Self::Code => &chains.text,
            Self::Image => &chains.image,
            Self::Vision => &chains.vision,
        }
    }

    fn input(self, raw: &str) -> String {
        match self {
            Self::Code => code_prompt(raw),
            _ => raw.to_string(),
        }
    }

    fn output(self, raw: &str, generated: String) -> Output {
        match self {
            Self::Text => Output::Text { text: generated },
            Self::Code => Output::Code { code: generated },
            Self::Image => Output::Image {
                image_url: generated,
                prompt: raw.to_string(),
            },
            Self::Vision => Output::Description {
                description: generated,
            },
        }
    }
}

/// Wrap a request so the model answers with code only.
///
/// A blank request stays blank and is rejected by the dispatcher.
pub fn code_prompt(request: &str) -> String {
    let request = request.trim();
    if request.is_empty() {
        return String::new();
    }
    format!(
        "{request}. The answer must contain ONLY code, without explanations. \
         If libraries are used, add a requirements.txt file listing them."
    )
}

// ─── Handlers ──────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let rate_limit = match &state.rate_limiter {
        Some(limiter) => {
            let clients = limiter.tracked_clients().await;
            serde_json::json!({
                "per_minute": limiter.max_requests(),
                "clients": clients,
            })
        }
        None => serde_json::Value::Null,
    };
    let chains = &state.chains;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        providers: chains.text.provider_names(),
        image_providers: chains.image.provider_names(),
        vision_providers: chains.vision.provider_names(),
        attempt_timeout_secs: chains.text.attempt_timeout().as_secs(),
        dispatches: chains.text.dispatch_count()
            + chains.image.dispatch_count()
            + chains.vision.dispatch_count(),
        rate_limit,
        metrics: state.metrics.to_json(),
    })
}

async fn generate_body(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => run_generate(&state, Job::Text, &req.prompt).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn generate_path(State(state): State<SharedState>, Path(prompt): Path<String>) -> Response {
    run_generate(&state, Job::Text, &prompt).await
}

async fn code_body(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => run_generate(&state, Job::Code, &req.prompt).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn code_path(State(state): State<SharedState>, Path(prompt): Path<String>) -> Response {
    run_generate(&state, Job::Code, &prompt).await
}

async fn image_body(
    State(state): State<SharedState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Response {
    match payload {
        Ok(Json(req)) => run_generate(&state, Job::Image, &req.prompt).await,
        Err(rejection) => rejected(rejection),
    }
}

async fn image_path(State(state): State<SharedState>, Path(prompt): Path<String>) -> Response {
    run_generate(&state, Job::Image, &prompt).await
}

async fn vision(
    State(state): State<SharedState>,
    payload: Result<Json<VisionRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return rejected(rejection),
    };
    let url = req.url.trim();
    if !is_image_url(url) {
        return error_envelope(
            StatusCode::BAD_REQUEST,
            "url must be an http(s) or data:image URL".to_string(),
            Duration::ZERO,
        );
    }
    run_generate(&state, Job::Vision, url).await
}

fn is_image_url(url: &str) -> bool {
    ["http://", "https://", "data:image/"]
        .iter()
        .any(|scheme| url.starts_with(scheme) && url.len() > scheme.len())
}

/// Malformed or non-JSON bodies get the same envelope as dispatch failures.
fn rejected(rejection: JsonRejection) -> Response {
    warn!("Rejected request body: {}", rejection.body_text());
    error_envelope(rejection.status(), rejection.body_text(), Duration::ZERO)
}

fn error_envelope(status: StatusCode, error: String, elapsed: Duration) -> Response {
    (
        status,
        Json(GenerateErrorResponse {
            request_id: Uuid::new_v4().to_string(),
            error,
            elapsed_ms: elapsed.as_millis() as u64,
        }),
    )
        .into_response()
}

async fn run_generate(state: &ApiState, job: Job, raw: &str) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let start = Instant::now();
    let input = job.input(raw);

    // The deadline lives inside this future, so a dropped connection drops it too.
    let cancel = state.shutdown.child_token();
    let dispatch = job
        .dispatcher(&state.chains)
        .dispatch_with_cancel(&input, &cancel);
    tokio::pin!(dispatch);

    let result = tokio::select! {
        result = &mut dispatch => result,
        _ = tokio::time::sleep(state.request_timeout) => {
            cancel.cancel();
            dispatch.await
        }
    };

    let elapsed = start.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;

    match result {
        Ok(generation) => {
            state.metrics.record_success(generation.attempts, elapsed);
            info!(
                request_id = %request_id,
                "{:?} served by {} after {} attempt(s) in {}ms",
                job,
                generation.provider,
                generation.attempts,
                elapsed_ms
            );
            Json(GenerateResponse {
                request_id,
                output: job.output(raw, generation.text),
                provider: generation.provider,
                attempts: generation.attempts,
                elapsed_ms,
            })
            .into_response()
        }
        Err(e) => {
            match &e {
                DispatchError::Cancelled { attempts } => {
                    state.metrics.record_cancelled(*attempts, elapsed)
                }
                DispatchError::Exhausted { attempts, .. } => {
                    state.metrics.record_failure(*attempts, elapsed)
                }
                DispatchError::NoProviders | DispatchError::EmptyPrompt => {
                    state.metrics.record_failure(0, elapsed)
                }
            }
            warn!(request_id = %request_id, "{:?} failed after {}ms: {}", job, elapsed_ms, e);

            let (status, message) = failure_status(&e);
            (
                status,
                Json(GenerateErrorResponse {
                    request_id,
                    error: message.to_string(),
                    elapsed_ms,
                }),
            )
                .into_response()
        }
    }
}

/// HTTP status and caller-facing message for a dispatch failure.
pub fn failure_status(err: &DispatchError) -> (StatusCode, &'static str) {
    match err {
        DispatchError::EmptyPrompt => (StatusCode::BAD_REQUEST, "prompt must not be empty"),
        DispatchError::NoProviders => (StatusCode::INTERNAL_SERVER_ERROR, UNAVAILABLE),
        DispatchError::Cancelled { .. } => (StatusCode::GATEWAY_TIMEOUT, UNAVAILABLE),
        DispatchError::Exhausted { last, .. } => match last {
            ProviderError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, UNAVAILABLE),
            last if last.is_transport() => (StatusCode::BAD_GATEWAY, UNAVAILABLE),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, UNAVAILABLE),
        },
    }
}

fn learning_error(e: LearningError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &e {
        LearningError::UnknownCourse(_) => StatusCode::NOT_FOUND,
        LearningError::NoActiveCourse | LearningError::FirstDay | LearningError::LastDay => {
            StatusCode::CONFLICT
        }
        LearningError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn courses(State(state): State<SharedState>) -> Json<Vec<CourseSummary>> {
    Json(
        state
            .coach
            .courses()
            .iter()
            .map(|c: &Course| CourseSummary {
                id: c.id,
                name: c.name,
                days: c.total_days(),
            })
            .collect(),
    )
}

async fn enroll(State(state): State<SharedState>, Path(user): Path<i64>) -> ApiResult<UserProgress> {
    state.coach.enroll(user).await.map(Json).map_err(learning_error)
}

async fn start_course(
    State(state): State<SharedState>,
    Path(user): Path<i64>,
    Json(req): Json<StartCourseRequest>,
) -> ApiResult<Task> {
    state
        .coach
        .start_course(user, &req.course)
        .await
        .map(Json)
        .map_err(learning_error)
}

async fn today(State(state): State<SharedState>, Path(user): Path<i64>) -> ApiResult<Task> {
    state.coach.today(user).await.map(Json).map_err(learning_error)
}

async fn next_day(State(state): State<SharedState>, Path(user): Path<i64>) -> ApiResult<Task> {
    state.coach.next_day(user).await.map(Json).map_err(learning_error)
}

async fn previous_day(State(state): State<SharedState>, Path(user): Path<i64>) -> ApiResult<Task> {
    state
        .coach
        .previous_day(user)
        .await
        .map(Json)
        .map_err(learning_error)
}

async fn progress(
    State(state): State<SharedState>,
    Path(user): Path<i64>,
) -> ApiResult<ProgressReport> {
    state.coach.progress(user).await.map(Json).map_err(learning_error)
}

async fn finish(State(state): State<SharedState>, Path(user): Path<i64>) -> ApiResult<FinishResponse> {
    state
        .coach
        .finish(user)
        .await
        .map(|finished| Json(FinishResponse { finished }))
        .map_err(learning_error)
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(state: SharedState) -> Router {
    let mut protected = Router::new()
        .route("/v1/status", get(status))
        .route("/v1/generate", post(generate_body))
        .route("/v1/generate/{*prompt}", get(generate_path))
        .route("/v1/code", post(code_body))
        .route("/v1/code/{*prompt}", get(code_path))
        .route("/v1/image", post(image_body))
        .route("/v1/image/{*prompt}", get(image_path))
        .route("/v1/vision", post(vision))
        .route("/v1/learning/courses", get(courses))
        .route("/v1/learning/{user}", post(enroll))
        .route("/v1/learning/{user}/start", post(start_course))
        .route("/v1/learning/{user}/today", get(today))
        .route("/v1/learning/{user}/next", post(next_day))
        .route("/v1/learning/{user}/previous", post(previous_day))
        .route("/v1/learning/{user}/progress", get(progress))
        .route("/v1/learning/{user}/finish", post(finish));

    if let Some(limiter) = state.rate_limiter.clone() {
        protected = protected.layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));
    }
    let protected = protected.layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/v1/health", get(health))
        .merge(protected)
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Serve the API on an already bound listener until the shutdown token fires.
pub async fn serve(listener: TcpListener, state: ApiState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(Arc::new(state));

    info!("🌐 API server listening on http://{}", listener.local_addr()?);

    // Peer addresses key the rate limiter.
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}

/// Start the API server.
pub async fn start_server(state: ApiState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}
