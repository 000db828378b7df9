//! HTTP and WebSocket server for the squat coach.
//!
//! This module provides an HTTP server that:
//! - Accepts insole readings via POST /api/fsr_data
//! - Serves the latest readings, the insole classifier result and a
//!   combined posture and insole view
//! - Accepts posture status and inference callbacks from the vision service
//! - Pushes telemetry and voice feedback to each user over GET /ws/{userId}
//!
//! # Architecture
//!
//! ```text
//! Insoles ──→ POST /api/fsr_data ──→ SensorStore ─┐
//!                                                 ├──→ FeedbackEngine ──→ /ws/{userId}
//! Vision ──→ POST /internal/... ──→ AiStateStore ─┘          ↑
//!                                                      [Scheduler 1s/10s]
//! ```

use crate::ai_state::{AiStateStore, Segment, SegmentMap, SegmentStatus};
use crate::config::Config;
use crate::core::{FeedbackResult, PerSide, SensorStore};
use crate::engine::{CombinedFeedback, FeedbackEngine};
use crate::push::{ChannelRegistry, Envelope, Transport};
use crate::relay::{InferenceCallback, InferenceRelay, RelayOutcome};
use crate::scheduler;
use crate::sensor::{PressureSample, RawPressureReading, Side};
use crate::session::{SessionInfo, SessionRegistry};
use crate::stats::{create_shared_stats, SharedStats, StatsSnapshot};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Shared server state
pub struct ServerState {
    sensors: Arc<SensorStore>,
    ai: Arc<AiStateStore>,
    channels: Arc<ChannelRegistry>,
    engine: Arc<FeedbackEngine>,
    relay: InferenceRelay,
    sessions: Arc<SessionRegistry>,
    stats: SharedStats,
}

impl ServerState {
    /// Wire up the stores, the push registry and the engine.
    pub fn new(config: &Config) -> Self {
        let sensors = Arc::new(SensorStore::new(config.window_duration));
        let ai = Arc::new(AiStateStore::new());
        let channels = Arc::new(ChannelRegistry::new());
        let sessions = Arc::new(SessionRegistry::new(config.session_ttl));
        let stats = create_shared_stats();

        let engine = Arc::new(
            FeedbackEngine::new(config, Arc::clone(&sensors), Arc::clone(&ai), channels.clone())
                .with_stats(Arc::clone(&stats)),
        );
        let relay = InferenceRelay::new(Arc::clone(&engine), Arc::clone(&sessions));

        Self {
            sensors,
            ai,
            channels,
            engine,
            relay,
            sessions,
            stats,
        }
    }

    pub fn engine(&self) -> &Arc<FeedbackEngine> {
        &self.engine
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
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

/// Response from the insole ingest endpoint
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Direct segment status update
#[derive(Debug, Deserialize)]
pub struct AiStatusRequest {
    pub lumbar: Option<String>,
    pub knee: Option<String>,
    pub ankle: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiStatusResponse {
    pub user_id: String,
    pub ai: SegmentMap,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub user_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedFeedbackQuery {
    pub user_id: Option<String>,
}

/// Pipeline counters plus live sizes of the in-memory state
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub pipeline: StatsSnapshot,
    pub connected_users: usize,
    pub tracked_users: usize,
    pub open_sessions: usize,
    pub retained_samples: PerSide<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub status: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/fsr_data
///
/// Readings with a missing or unknown side are dropped but still answered
/// with 200 so the insole firmware never retries them.
async fn ingest_fsr(
    State(state): State<Arc<ServerState>>,
    Json(reading): Json<RawPressureReading>,
) -> Json<IngestResponse> {
    match reading.into_sample(Utc::now()) {
        Ok(sample) => {
            let side = sample.side;
            state.sensors.ingest(sample);
            state.stats.record_sample_ingested();
            state.engine.broadcast_insoles();
            Json(IngestResponse {
                accepted: true,
                side: Some(side),
                message: None,
            })
        }
        Err(e) => {
            tracing::warn!("Dropping insole reading: {}", e);
            state.stats.record_sample_rejected();
            Json(IngestResponse {
                accepted: false,
                side: None,
                message: Some(e.to_string()),
            })
        }
    }
}

/// GET /api/fsr_data/latest
async fn latest_fsr(State(state): State<Arc<ServerState>>) -> Json<PerSide<Option<PressureSample>>> {
    Json(state.sensors.latest_snapshot(false))
}

/// GET /api/fsr_data/feedback
async fn fsr_feedback(State(state): State<Arc<ServerState>>) -> Json<FeedbackResult> {
    Json(state.engine.classify_window())
}

/// GET /api/fsr_data/feedback/combined?userId=
async fn combined_feedback(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<CombinedFeedbackQuery>,
) -> Json<CombinedFeedback> {
    Json(state.engine.combined_feedback(query.user_id.as_deref()))
}

/// GET /api/stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        pipeline: state.stats.snapshot(),
        connected_users: state.channels.active_users().len(),
        tracked_users: state.ai.user_count(),
        open_sessions: state.sessions.len(),
        retained_samples: PerSide {
            left: state.sensors.retained(Side::Left),
            right: state.sensors.retained(Side::Right),
        },
    })
}

/// POST /internal/ai/status/{userId}
///
/// Values must be `good`, `bad` or `null`; anything else rejects the whole
/// update.
async fn post_ai_status(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Json(request): Json<AiStatusRequest>,
) -> Result<Json<AiStatusResponse>, ApiError> {
    let fields = [
        (Segment::Lumbar, request.lumbar),
        (Segment::Knee, request.knee),
        (Segment::Ankle, request.ankle),
    ];

    let mut segments = SegmentMap::new();
    for (segment, value) in fields {
        let Some(value) = value else { continue };
        let status = SegmentStatus::parse_strict(&value).map_err(|e| {
            api_error(StatusCode::BAD_REQUEST, "INVALID_STATUS", e.to_string())
        })?;
        segments.insert(segment, status);
    }

    if !state.ai.update(&user_id, segments) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_USER",
            "User id must not be empty",
        ));
    }

    Ok(Json(AiStatusResponse {
        ai: state.ai.snapshot(&user_id),
        user_id,
    }))
}

/// POST /api/sessions
async fn create_session(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<SessionInfo>, ApiError> {
    let user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, "INVALID_USER", "userId is required")
        })?;
    Ok(Json(state.sessions.create(&user_id)))
}

/// POST /api/sessions/{sessionId}/finish
async fn finish_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state.sessions.finish(&session_id).map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            format!("No session {session_id}"),
        )
    })
}

/// POST /internal/sessions/{sessionId}/feedback
async fn session_feedback(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Json(callback): Json<InferenceCallback>,
) -> Result<Json<CallbackResponse>, ApiError> {
    match state.relay.on_session_callback(&session_id, callback) {
        RelayOutcome::Handled { user_id, voice } => Ok(Json(CallbackResponse {
            status: "success".to_string(),
            user_id,
            voice,
        })),
        RelayOutcome::UnknownSession => Err(api_error(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            format!("No active session {session_id}"),
        )),
    }
}

/// GET /ws/{userId}
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| push_session(socket, state, user_id))
}

async fn send_envelope(socket: &mut WebSocket, envelope: &Envelope) -> Result<(), axum::Error> {
    match serde_json::to_string(envelope) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("Failed to serialize envelope: {}", e);
            Ok(())
        }
    }
}

/// Forward the user's envelopes to the socket until either side closes.
async fn push_session(mut socket: WebSocket, state: Arc<ServerState>, user_id: String) {
    let (tx, mut rx) = state.channels.register(&user_id);

    let snapshot = Envelope::Insoles {
        payload: state.sensors.latest_snapshot(true),
    };
    if send_envelope(&mut socket, &snapshot).await.is_ok() {
        loop {
            tokio::select! {
                outgoing = rx.recv() => match outgoing {
                    Some(envelope) => {
                        if let Err(e) = send_envelope(&mut socket, &envelope).await {
                            tracing::warn!("Push to user {} failed: {}", user_id, e);
                            break;
                        }
                    }
                    None => break,
                },
                incoming = socket.recv() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    // A newer connection for the same user keeps its channel and state
    if state.channels.unregister(&user_id, &tx) {
        state.ai.remove(&user_id);
    }
}

/// Run the server
///
/// Starts the scheduler loops and returns the bound address and a shutdown
/// sender. Sending on it stops the server and both loops.
pub async fn run(config: Config) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    config.validate()?;
    let state = Arc::new(ServerState::new(&config));

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/fsr_data", post(ingest_fsr))
        .route("/api/fsr_data/latest", get(latest_fsr))
        .route("/api/fsr_data/feedback", get(fsr_feedback))
        .route("/api/fsr_data/feedback/combined", get(combined_feedback))
        .route("/api/stats", get(stats))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:session_id/finish", post(finish_session))
        .route("/internal/ai/status/:user_id", post(post_ai_status))
        .route("/internal/sessions/:session_id/feedback", post(session_feedback))
        .route("/ws/:user_id", get(ws_upgrade))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Squat coach listening on http://{}", actual_addr);

    let cancel_token = CancellationToken::new();
    let loops = scheduler::spawn(Arc::clone(state.engine()), &config, cancel_token.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
                cancel_token.cancel();
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        loops.join().await;
    });

    Ok((actual_addr, shutdown_tx))
}
