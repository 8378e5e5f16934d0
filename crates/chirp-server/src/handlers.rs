//! HTTP handlers for Chirp server.
//!
//! This module adapts the core topics to HTTP: publish, poll, push streams,
//! the counter topic and health reporting.

use crate::config::{Config, LIKES_TOPIC};
use crate::metrics::{self, StreamMetricsGuard};
use anyhow::Result;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use chirp_core::message::now_millis;
use chirp_core::{BroadcastError, Broadcaster, Counter, PublishError, Subscription, ValidationError};
use chirp_protocol::{
    codec, CountResponse, ErrorResponse, PollResponse, PublishRequest, PublishResponse,
    TopicMessage,
};
use futures_util::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Preflight cache lifetime (24 hours).
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Shared server state.
pub struct AppState {
    /// Chat topics, in configuration order.
    pub topics: Vec<Arc<Broadcaster>>,
    /// Counter topic, if enabled.
    pub likes: Option<Arc<Counter>>,
    /// Server configuration.
    pub config: Config,
    started: Instant,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let topics = config
            .topics
            .iter()
            .map(|settings| {
                Arc::new(Broadcaster::with_config(
                    settings.topic_config(&config.limits),
                    settings.schema.build(settings.require_attributor),
                ))
            })
            .collect();

        let likes = config.likes.enabled.then(|| {
            Arc::new(Counter::with_buffer(
                LIKES_TOPIC,
                config.limits.subscriber_buffer,
            ))
        });

        Self {
            topics,
            likes,
            config,
            started: Instant::now(),
        }
    }

    /// Find a topic by name.
    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&Arc<Broadcaster>> {
        self.topics.iter().find(|t| t.name() == name)
    }

    fn keep_alive(&self) -> Option<Duration> {
        match self.config.heartbeat.interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Disconnect every push stream.
    pub fn shutdown(&self) {
        let mut closed: usize = self.topics.iter().map(|t| t.shutdown()).sum();
        if let Some(likes) = &self.likes {
            closed += likes.shutdown();
        }
        info!(streams = closed, "Closed push streams");
    }
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The caller sent an unusable message.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The body was not a JSON publish request.
    #[error("Invalid request body: {0}")]
    Body(#[from] JsonRejection),

    /// Something broke on our side.
    #[error("Internal error: {0}")]
    Internal(#[from] BroadcastError),
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::Invalid(e) => ApiError::Validation(e),
            PublishError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Validation(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Body(rejection) => (rejection.status(), self.to_string()),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                metrics::record_error("internal");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process message".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// Per-topic handler state.
#[derive(Clone)]
struct TopicState {
    topic: Arc<Broadcaster>,
    keep_alive: Option<Duration>,
}

/// Counter handler state.
#[derive(Clone)]
struct CounterState {
    counter: Arc<Counter>,
    keep_alive: Option<Duration>,
}

/// Run the HTTP server until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(Arc::clone(&state));

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Chirp server listening on {}", addr);
    for topic in &state.topics {
        info!(
            "Topic {}: http://{}/api/{}/stream",
            topic.name(),
            addr,
            topic.name()
        );
    }

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutting down");
            shutdown_state.shutdown();
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let keep_alive = state.keep_alive();

    let mut app = Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state));

    for topic in &state.topics {
        let routes = Router::new()
            .route("/", get(poll_handler).post(publish_handler))
            .route("/stream", get(stream_handler).post(publish_handler))
            .with_state(TopicState {
                topic: Arc::clone(topic),
                keep_alive,
            });
        app = app.nest(&format!("/api/{}", topic.name()), routes);
    }

    if let Some(counter) = &state.likes {
        let routes = Router::new()
            .route(
                "/stream",
                get(counter_stream_handler).post(counter_increment_handler),
            )
            .with_state(CounterState {
                counter: Arc::clone(counter),
                keep_alive,
            });
        app = app.nest(&format!("/api/{LIKES_TOPIC}"), routes);
    }

    app.layer(cors_layer()).layer(TraceLayer::new_for_http())
}

/// Any origin may call the API. Every `OPTIONS` request is answered here
/// with a cacheable preflight response.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(PREFLIGHT_MAX_AGE)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut topics = serde_json::Map::new();
    for topic in &state.topics {
        let entry = match topic.stats() {
            Ok(stats) => serde_json::json!({
                "messages": stats.messages,
                "subscribers": stats.subscribers,
                "published": stats.published,
            }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        topics.insert(topic.name().to_string(), entry);
    }

    let likes = state.likes.as_ref().map(|counter| {
        serde_json::json!({
            "count": counter.get().ok(),
            "subscribers": counter.subscriber_count(),
        })
    });

    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": state.started.elapsed().as_secs(),
            "timestamp": now_millis(),
            "topics": topics,
            "likes": likes,
        })),
    )
}

/// Publish a message to a topic.
async fn publish_handler(
    State(state): State<TopicState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body?;
    let start = Instant::now();

    let published = match state.topic.publish(&request) {
        Ok(published) => published,
        Err(PublishError::Invalid(e)) => {
            debug!(topic = %state.topic.name(), error = %e, "Publish refused");
            metrics::record_rejected(state.topic.name());
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    metrics::record_publish(
        state.topic.name(),
        published.delivery,
        start.elapsed().as_secs_f64(),
    );

    let body = PublishResponse {
        success: true,
        message: TopicMessage::new(&published.message, state.topic.attributor_field()),
        total: published.total,
    };
    Ok(Json(body).into_response())
}

/// Poll query parameters. Parsed leniently so pollers never hard-fail.
#[derive(Debug, Default, Deserialize)]
struct PollParams {
    since: Option<String>,
    limit: Option<String>,
}

impl PollParams {
    fn since(&self) -> Option<u64> {
        self.since.as_deref().and_then(parse_millis)
    }

    fn limit(&self) -> Option<usize> {
        self.limit.as_deref().and_then(|l| l.trim().parse().ok())
    }
}

fn parse_millis(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

/// Return stored messages newer than `since`.
///
/// Failures still answer `200` with an empty, well-formed body.
async fn poll_handler(
    State(state): State<TopicState>,
    params: Option<Query<PollParams>>,
) -> Response {
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let topic = &state.topic;
    metrics::record_poll(topic.name());

    let headers = [(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")];
    let now = now_millis();

    match topic.list(params.since(), params.limit()) {
        Ok(snapshot) => {
            let messages = snapshot
                .messages
                .iter()
                .map(|m| TopicMessage::new(m, topic.attributor_field()))
                .collect();
            let body = PollResponse {
                error: None,
                messages,
                timestamp: now,
                total: snapshot.total,
            };
            (headers, Json(body)).into_response()
        }
        Err(e) => {
            error!(topic = %topic.name(), error = %e, "Poll failed");
            metrics::record_error("poll");
            let body = PollResponse::failed("Failed to fetch messages", now);
            (headers, Json(body)).into_response()
        }
    }
}

/// Open a push stream on a topic.
async fn stream_handler(State(state): State<TopicState>) -> Result<Response, ApiError> {
    let subscription = state.topic.subscribe()?;
    let guard = StreamMetricsGuard::new(state.topic.name());
    Ok(event_stream_response(event_stream(
        subscription,
        state.keep_alive,
        guard,
    )))
}

/// Open a push stream on the counter.
async fn counter_stream_handler(State(state): State<CounterState>) -> Result<Response, ApiError> {
    let subscription = state.counter.subscribe()?;
    let guard = StreamMetricsGuard::new(state.counter.name());
    Ok(event_stream_response(event_stream(
        subscription,
        state.keep_alive,
        guard,
    )))
}

/// Increment the counter.
async fn counter_increment_handler(
    State(state): State<CounterState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.counter.increment()?;
    Ok(Json(CountResponse { count }))
}

/// Backlog first, then live frames interleaved with keep-alive comments.
///
/// The subscription lives inside the stream, so when the client hangs up
/// and the body is dropped the subscriber is unregistered.
fn event_stream(
    mut subscription: Subscription,
    keep_alive: Option<Duration>,
    guard: StreamMetricsGuard,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let backlog = stream::iter(subscription.take_backlog());

    let ticker = keep_alive.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    let live = stream::unfold(
        (subscription, ticker, guard),
        |(mut subscription, mut ticker, guard)| async move {
            let next = match ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    frame = subscription.recv() => frame,
                    _ = ticker.tick() => Some(codec::keep_alive()),
                },
                None => subscription.recv().await,
            };
            next.map(|frame| (frame, (subscription, ticker, guard)))
        },
    );

    backlog.chain(live).map(Ok::<Bytes, Infallible>)
}

fn event_stream_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
