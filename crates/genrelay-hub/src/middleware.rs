//! API middleware — rate limiting, API key auth, and request logging.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Environment variable that enables API key auth when set.
pub const API_KEY_ENV: &str = "GENRELAY_API_KEY";

/// Sliding-window rate limiter keyed by peer address.
#[derive(Clone)]
pub struct RateLimiter {
    clients: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Limiter for `server.rate_limit_per_minute`; `None` when the limit is 0.
    pub fn per_minute(max_requests: u32) -> Option<Self> {
        (max_requests > 0).then(|| Self::new(max_requests as usize, Duration::from_secs(60)))
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Record a request from `client`, or return how long until it may retry.
    pub async fn check(&self, client: IpAddr) -> Result<(), Duration> {
        let mut clients = self.clients.lock().await;
        let now = Instant::now();
        let window = self.window;

        // Drop expired hits, and clients left with none.
        clients.retain(|_, hits| {
            hits.retain(|t| now.duration_since(*t) < window);
            !hits.is_empty()
        });

        let hits = clients.entry(client).or_default();
        if hits.len() >= self.max_requests {
            let oldest = hits.first().copied().unwrap_or(now);
            return Err(window.saturating_sub(now.duration_since(oldest)));
        }
        hits.push(now);
        Ok(())
    }

    /// Number of clients with hits inside the current window.
    pub async fn tracked_clients(&self) -> usize {
        self.clients.lock().await.len()
    }
}

/// Rate limiting middleware, keyed by the TCP peer address.
///
/// Forwarded-for headers are ignored; they are client controlled.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Err(retry_after) = limiter.check(peer.ip()).await {
        warn!("Rate limit hit for {}", peer.ip());
        let retry_secs = retry_after.as_secs().max(1);
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": format!(
                    "Rate limit exceeded. Max {} requests per minute.",
                    limiter.max_requests()
                ),
                "retry_after_secs": retry_secs,
            })),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
        return response;
    }

    next.run(request).await
}

/// Whether the request carries `expected` as a bearer token or `X-API-Key`.
pub fn is_authorized(headers: &HeaderMap, expected: &str) -> bool {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = match auth.strip_prefix("Bearer ") {
        Some(bearer) => bearer,
        None => headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    };

    token == expected
}

/// API key authentication middleware. Open when `GENRELAY_API_KEY` is unset.
pub async fn auth_middleware(
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()) else {
        return next.run(request).await;
    };

    if !is_authorized(&headers, &expected) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "Invalid or missing API key. Set Authorization: Bearer <key> or X-API-Key: <key>"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Request logging middleware.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    info!(
        "{} {} → {} ({:.1}ms)",
        method,
        uri,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}
