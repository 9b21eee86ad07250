use axum::{
    body::{Body, Bytes},
    debug_handler,
    extract::{Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::SubsystemHandle;

use replay_core::{ControlError, MediaIter, Shot, ShotError, SourceError, Timecode};
use replay_server::{
    rollout::{watch_rollout, RolloutError},
    Station,
};

const EVENTS_URI: &str = "/events.json";
const EVENT_TYPE_URI: &str = "/events/{id}/type.json";
const SHOTS_URI: &str = "/shots.json";
const CLEAR_EVENTS_URI: &str = "/clear_events";
const CAPTURE_EVENT_URI: &str = "/capture_event.json";
const SESSION_URI: &str = "/session.json";

const PREVIEW_SHOT_URI: &str = "/preview_shot.json";
const ROLL_SHOT_URI: &str = "/roll_shot.json";
const ROLL_QUEUE_URI: &str = "/roll_queue.json";
const STOP_PROGRAM_URI: &str = "/stop_program.json";
const PROGRAM_SPEED_URI: &str = "/program_speed.json";
const STORED_SHOTS_URI: &str = "/stored_shots.json";

const LIVE_PREVIEW_URI: &str = "/sources/{id}/preview.jpg";
const PREVIEW_URI: &str = "/sources/{id}/{timecode}/preview.jpg";
const THUMBNAIL_URI: &str = "/sources/{id}/{timecode}/thumbnail.jpg";
const VIDEO_URI: &str = "/sources/{id}/{timecode}/{length}/video.mjpg";
const AUDIO_URI: &str = "/sources/{id}/{timecode}/{length}/audio_2ch_48khz.raw";

const FILES_URI: &str = "/files.json";
const ROLLOUT_URI: &str = "/ffmpeg_rollout.json";
const RESUME_ENCODE_URI: &str = "/resume_encode.json";

const JPEG: &str = "image/jpeg";
const MJPEG: &str = "video/x-motion-jpeg";
const RAW: &str = "application/octet-stream";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("Socket operation failed")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Shot(#[from] ShotError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error("No event with id {0}")]
    UnknownEvent(u64),

    #[error("Media fetch did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl WebError {
    fn status(&self) -> StatusCode {
        match self {
            WebError::Shot(_) | WebError::Control(_) => StatusCode::BAD_REQUEST,
            WebError::Source(SourceError::UnknownSource(_)) => StatusCode::BAD_REQUEST,
            WebError::Source(SourceError::OutOfRange { .. } | SourceError::Empty) => {
                StatusCode::NOT_FOUND
            }
            WebError::Rollout(RolloutError::InvalidFilename(_) | RolloutError::NotFound(_)) => {
                StatusCode::BAD_REQUEST
            }
            WebError::Rollout(RolloutError::Busy(_)) => StatusCode::CONFLICT,
            WebError::Rollout(RolloutError::NoPlayout(_)) => StatusCode::SERVICE_UNAVAILABLE,
            WebError::UnknownEvent(_) => StatusCode::NOT_FOUND,
            WebError::Source(SourceError::Io(_))
            | WebError::Rollout(_)
            | WebError::Io(_)
            | WebError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("{}", self);
        } else {
            debug!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct Web {
    station: Station,
}

impl Web {
    pub fn new(station: Station) -> Self {
        Web { station }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<(), WebError> {
        let port = self.station.args.port;
        let listener =
            TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port))
                .await
                .map_err(WebError::Io)?;

        let app = router(self);

        info!("Starting HTTP web server on port {}", port);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                subsys.on_shutdown_requested().await;
            })
            .await
            .map_err(WebError::Io)
    }
}

pub fn router(web: Web) -> Router {
    Router::new()
        // Event store
        .route(EVENTS_URI, get(get_events))
        .route(EVENT_TYPE_URI, put(set_event_type))
        .route(SHOTS_URI, get(get_shots))
        .route(CLEAR_EVENTS_URI, put(clear_events))
        .route(CAPTURE_EVENT_URI, put(capture_event))
        .route(SESSION_URI, get(get_session))
        // Routing
        .route(PREVIEW_SHOT_URI, put(set_preview_shot))
        .route(ROLL_SHOT_URI, put(roll_shot))
        .route(ROLL_QUEUE_URI, put(roll_queue))
        .route(STOP_PROGRAM_URI, put(stop_program))
        .route(PROGRAM_SPEED_URI, put(set_program_speed))
        .route(STORED_SHOTS_URI, get(get_stored_shots))
        // Media
        .route(LIVE_PREVIEW_URI, get(get_live_preview))
        .route(PREVIEW_URI, get(get_preview))
        .route(THUMBNAIL_URI, get(get_thumbnail))
        .route(VIDEO_URI, get(get_video))
        .route(AUDIO_URI, get(get_audio))
        // Rollout
        .route(FILES_URI, get(get_files))
        .route(ROLLOUT_URI, put(rollout))
        .route(RESUME_ENCODE_URI, put(resume_encode))
        .layer(middleware::from_fn(no_cache_middleware))
        .with_state(web)
}

/// Middleware to add no-cache headers to API responses
async fn no_cache_middleware(request: axum::http::Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}

// ---------------------------------------------------------------------------
// Event store
// ---------------------------------------------------------------------------

/// GET /events.json - All events, by id
#[debug_handler]
async fn get_events(State(state): State<Web>) -> Response {
    debug!("GET events");
    let events = state.station.session.with(|s| s.events().to_vec());
    Json(events).into_response()
}

#[derive(Debug, Deserialize)]
struct EventTypeRequest {
    #[serde(rename = "type")]
    event_type: String,
}

/// PUT /events/{id}/type.json - Retag an event
#[debug_handler]
async fn set_event_type(
    State(state): State<Web>,
    Path(id): Path<u64>,
    Json(request): Json<EventTypeRequest>,
) -> Result<Response, WebError> {
    debug!("PUT event {} type '{}'", id, request.event_type);
    let event = state
        .station
        .session
        .with(|s| s.retag(id, &request.event_type).cloned())
        .ok_or(WebError::UnknownEvent(id))?;
    Ok(Json(event).into_response())
}

/// GET /shots.json - Every shot, most recent event first
#[debug_handler]
async fn get_shots(State(state): State<Web>) -> Response {
    debug!("GET shots");
    Json(state.station.session.with(|s| s.list_shots())).into_response()
}

/// PUT /clear_events - Discard all events
#[debug_handler]
async fn clear_events(State(state): State<Web>) -> Response {
    debug!("PUT clear events");
    state.station.session.with(|s| s.clear_events());
    StatusCode::NO_CONTENT.into_response()
}

/// PUT /capture_event.json - Capture a new event from every source
#[debug_handler]
async fn capture_event(State(state): State<Web>) -> Result<Response, WebError> {
    debug!("PUT capture event");
    let sources = state.station.sources.clone();
    // Live positions are read without the session lock
    let shots = tokio::task::spawn_blocking(move || sources.capture_shots()).await?;
    let event = state.station.session.with(|s| s.record_event(shots).clone());
    Ok(Json(event).into_response())
}

/// GET /session.json - Navigation, routing and controller state
#[debug_handler]
async fn get_session(State(state): State<Web>) -> Response {
    Json(state.station.session.with(|s| s.snapshot())).into_response()
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// PUT /preview_shot.json - Put a shot on the operator's preview
#[debug_handler]
async fn set_preview_shot(State(state): State<Web>, body: String) -> Result<Response, WebError> {
    let shot = Shot::from_json(&body, &state.station.sources)?;
    debug!("PUT preview shot {:?}", shot);
    state.station.session.with(|s| s.set_preview_shot(shot));
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /roll_shot.json - Roll a shot to program now
#[debug_handler]
async fn roll_shot(State(state): State<Web>, body: String) -> Result<Response, WebError> {
    let shot = Shot::from_json(&body, &state.station.sources)?;
    debug!("PUT roll shot {:?}", shot);
    state.station.session.with(|s| s.roll_to_program(shot));
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /roll_queue.json - Roll the first shot, queue the rest behind it
#[debug_handler]
async fn roll_queue(State(state): State<Web>, body: String) -> Result<Response, WebError> {
    let shots = Shot::list_from_json(&body, &state.station.sources)?;
    debug!("PUT roll queue of {} shots", shots.len());
    state.station.session.with(|s| s.roll_queue(shots));
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /stop_program.json - Take program off air
#[debug_handler]
async fn stop_program(State(state): State<Web>) -> Response {
    debug!("PUT stop program");
    state.station.session.with(|s| s.stop_program());
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct SpeedRequest {
    numerator: u32,
    denominator: u32,
}

/// PUT /program_speed.json - Set the program playback speed
#[debug_handler]
async fn set_program_speed(
    State(state): State<Web>,
    Json(request): Json<SpeedRequest>,
) -> Result<Response, WebError> {
    debug!("PUT program speed {:?}", request);
    state
        .station
        .session
        .with(|s| s.set_program_speed(request.numerator, request.denominator))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// GET /stored_shots.json - Shots kept with the store buttons, oldest first
#[debug_handler]
async fn get_stored_shots(State(state): State<Web>) -> Response {
    Json(state.station.session.with(|s| s.stored_shots().to_vec())).into_response()
}

// ---------------------------------------------------------------------------
// Media
//
// Sources may block on disk or hardware, so all fetches run on the blocking
// pool and none of them hold the session lock.
// ---------------------------------------------------------------------------

/// GET /sources/{id}/preview.jpg - Preview of what the source is recording now
#[debug_handler]
async fn get_live_preview(
    State(state): State<Web>,
    Path(id): Path<usize>,
) -> Result<Response, WebError> {
    debug!("GET live preview of source {}", id);
    let sources = state.station.sources.clone();
    let image = tokio::task::spawn_blocking(move || {
        let shot = sources.make_shot_now(id)?;
        shot.preview(&sources)
    })
    .await??;
    Ok(([(header::CONTENT_TYPE, JPEG)], image).into_response())
}

/// GET /sources/{id}/{timecode}/preview.jpg - Preview at a timecode
#[debug_handler]
async fn get_preview(
    State(state): State<Web>,
    Path((id, timecode)): Path<(usize, Timecode)>,
) -> Result<Response, WebError> {
    debug!("GET preview of source {} at {}", id, timecode);
    let sources = state.station.sources.clone();
    let image = tokio::task::spawn_blocking(move || {
        let shot = sources.make_shot_at(id, timecode)?;
        shot.preview(&sources)
    })
    .await??;
    Ok(([(header::CONTENT_TYPE, JPEG)], image).into_response())
}

/// GET /sources/{id}/{timecode}/thumbnail.jpg - Thumbnail at a timecode
#[debug_handler]
async fn get_thumbnail(
    State(state): State<Web>,
    Path((id, timecode)): Path<(usize, Timecode)>,
) -> Result<Response, WebError> {
    let sources = state.station.sources.clone();
    let image = tokio::task::spawn_blocking(move || {
        let shot = sources.make_shot_at(id, timecode)?;
        shot.thumbnail(&sources)
    })
    .await??;
    Ok(([(header::CONTENT_TYPE, JPEG)], image).into_response())
}

/// GET /sources/{id}/{start}/{length}/video.mjpg - Concatenated JPEG frames
#[debug_handler]
async fn get_video(
    State(state): State<Web>,
    Path((id, start, length)): Path<(usize, Timecode, u64)>,
) -> Result<Response, WebError> {
    debug!("GET video of source {}: {} frames from {}", id, length, start);
    let frames = open_media(&state, id, start, length, MediaIter::video).await?;
    Ok(([(header::CONTENT_TYPE, MJPEG)], Body::from_stream(media_stream(frames))).into_response())
}

/// GET /sources/{id}/{start}/{length}/audio_2ch_48khz.raw - s16le audio
#[debug_handler]
async fn get_audio(
    State(state): State<Web>,
    Path((id, start, length)): Path<(usize, Timecode, u64)>,
) -> Result<Response, WebError> {
    debug!("GET audio of source {}: {} frames from {}", id, length, start);
    let samples = open_media(&state, id, start, length, MediaIter::audio).await?;
    Ok(([(header::CONTENT_TYPE, RAW)], Body::from_stream(media_stream(samples))).into_response())
}

/// Check the start position against the source before committing to a
/// streamed 200 response.
async fn open_media(
    state: &Web,
    id: usize,
    start: Timecode,
    length: u64,
    open: fn(&replay_core::SourceRegistry, usize, Timecode, u64) -> Result<MediaIter, SourceError>,
) -> Result<MediaIter, WebError> {
    let sources = state.station.sources.clone();
    let iter = tokio::task::spawn_blocking(move || {
        sources.make_shot_at(id, start)?;
        open(&sources, id, start, length)
    })
    .await??;
    Ok(iter)
}

/// Each step fetches one frame on the blocking pool. The stream ends at the
/// first failed fetch; a client disconnect drops the iterator unfinished.
fn media_stream(iter: MediaIter) -> impl futures::Stream<Item = Result<Bytes, io::Error>> {
    futures::stream::unfold(iter, |mut iter| async move {
        let (next, iter) = tokio::task::spawn_blocking(move || (iter.next(), iter))
            .await
            .ok()?;
        match next? {
            Ok(data) => Some((Ok(Bytes::from(data)), iter)),
            Err(e) => {
                warn!(
                    "{} stream ended early at {}: {}",
                    iter.kind(),
                    iter.position(),
                    e
                );
                None
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Rollout
// ---------------------------------------------------------------------------

/// GET /files.json - Clips available for rollout
#[debug_handler]
async fn get_files(State(state): State<Web>) -> Result<Response, WebError> {
    debug!("GET rollout files");
    let files: Vec<String> = state
        .station
        .rollout
        .list_files()?
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    Ok(Json(files).into_response())
}

#[derive(Debug, Deserialize)]
struct RolloutRequest {
    filename: String,
}

/// PUT /ffmpeg_rollout.json - Play a clip out through the transcoder
#[debug_handler]
async fn rollout(
    State(state): State<Web>,
    Json(request): Json<RolloutRequest>,
) -> Result<Response, WebError> {
    debug!("PUT rollout '{}'", request.filename);
    let file = state.station.rollout.resolve(&request.filename)?;
    let slot = state.station.rollout.claim(&file)?;
    state.station.session.with(|s| {
        s.suspend_encode();
        s.stop_program();
    });
    let rollout = state.station.rollout.spawn(slot)?;
    tokio::spawn(watch_rollout(rollout));
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /resume_encode.json - Resume live encode after a rollout
#[debug_handler]
async fn resume_encode(State(state): State<Web>) -> Response {
    debug!("PUT resume encode");
    state.station.session.with(|s| s.resume_encode());
    StatusCode::NO_CONTENT.into_response()
}
