//! Route wiring (spec §4.8). Grounded on the commented-out route table in
//! the teacher's `main.rs`, rebuilt around session-backed playback instead
//! of full-buffer RAR extraction.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::archive::error::ArchiveError;
use crate::archive::VirtualStream;
use crate::error::StreamerError;
use crate::http::range::RangeRequest;
use crate::http::stream::body_for_range;
use crate::segment::error::LoaderError;
use crate::session::error::SessionError;
use crate::session::SessionManager;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);
const FAILURE_CLIP_PATH: &str = "/unavailable-clip";

/// Minimal single-box MP4 (an `ftyp` box, no media data) served in place of
/// a release the session layer gave up on. Not meant to decode into real
/// video; a player pointed at it just reports zero duration and stops.
const FAILURE_CLIP: &[u8] = &[
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02, 0x00, b'i', b's', b'o',
    b'm', b'i', b's', b'o', b'2',
];

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub connections_per_loader: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/play/{session_id}", get(play))
        .route(FAILURE_CLIP_PATH, get(failure_clip))
        .route("/health", get(health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn failure_clip() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "video/mp4")], Bytes::from_static(FAILURE_CLIP))
}

/// Whether a blueprint build failed in a way the client can't do anything
/// about (dead release, exhausted providers, corrupt archive). These get a
/// redirect to a placeholder clip instead of an HTTP error so the player
/// shows something rather than a broken request.
fn is_unplayable(err: &SessionError) -> bool {
    matches!(
        err,
        SessionError::Archive(ArchiveError::CompressedArchive)
            | SessionError::Archive(ArchiveError::Loader(LoaderError::TooManyFailures | LoaderError::DecodeError(_)))
    )
}

fn failure_redirect() -> Response {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(header::LOCATION, FAILURE_CLIP_PATH)
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn play(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Response, StreamerError> {
    state.sessions.get_or_download_nzb(session_id).await?;
    let blueprint = match state.sessions.ensure_blueprint(session_id).await {
        Ok(b) => b,
        Err(e) if is_unplayable(&e) => return Ok(failure_redirect()),
        Err(e) => return Err(e.into()),
    };
    let loaders = match state.sessions.loaders(session_id).await {
        Ok(l) => l,
        Err(e) if is_unplayable(&e) => return Ok(failure_redirect()),
        Err(e) => return Err(e.into()),
    };
    let total_size = blueprint.total_size;

    let range = RangeRequest::parse_range_header(&headers, total_size).map_err(|status| {
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            StreamerError::RangeNotSatisfiable
        } else {
            StreamerError::InvalidRange
        }
    })?;
    let (start, content_length, status) = match &range {
        Some(r) => (r.start, r.content_length(total_size), StatusCode::PARTIAL_CONTENT),
        None => (0, total_size, StatusCode::OK),
    };

    let client_ip = addr.ip();
    state.sessions.start_playback(session_id, client_ip).await?;

    let stream = Arc::new(VirtualStream::new((*blueprint).clone(), loaders, state.connections_per_loader));
    let (body, cancel) =
        body_for_range(stream, start, content_length, state.sessions.clone(), session_id, client_ip);
    spawn_keep_alive_monitor(state.sessions.clone(), session_id, client_ip, cancel);

    let mut response = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, content_length.to_string());
    if status == StatusCode::PARTIAL_CONTENT {
        response = response.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{total_size}", start + content_length.saturating_sub(1)),
        );
    }

    response.body(body).map_err(|_| StreamerError::InvalidRange)
}

/// Calls `KeepAlive` at least every ten seconds for as long as this play is
/// open; stops the moment the response body's cancellation token fires
/// (stream finished or client disconnected), per spec §4.7.
fn spawn_keep_alive_monitor(sessions: Arc<SessionManager>, session_id: Uuid, ip: std::net::IpAddr, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {}
            }
            if sessions.keep_alive(session_id, ip).await.is_err() {
                warn!(session = %session_id, "keep-alive on a session that no longer exists, stopping monitor");
                break;
            }
        }
    });
}
