use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use marquee_core::{LockId, SeatSelection, ShowtimeId};
use marquee_lock::{Availability, LockHandle};

use crate::error::AppError;
use crate::session::Session;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/seat-locks", post(lock_seats))
        .route("/seat-locks/{lock_id}", get(get_lock).delete(release_lock))
        .route("/seat-locks/{lock_id}/extend", patch(extend_lock))
        .route("/seat-locks/showtime/{showtime_id}", delete(release_for_showtime))
        .route("/seat-locks/availability/{showtime_id}", get(availability))
        .route("/seat-locks/stream/{showtime_id}", get(seat_stream))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSeatsRequest {
    pub showtime_id: ShowtimeId,
    pub seats: Vec<SeatSelection>,
}

#[derive(Debug, Serialize)]
pub struct LockResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub lock: LockHandle,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub message: &'static str,
    pub lock_id: LockId,
    pub showtime_id: ShowtimeId,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /seat-locks
async fn lock_seats(
    State(state): State<AppState>,
    Session(session_id): Session,
    Json(req): Json<LockSeatsRequest>,
) -> Result<(StatusCode, Json<LockResponse>), AppError> {
    let lock = state.locks.acquire(req.showtime_id, session_id, req.seats).await?;
    Ok((
        StatusCode::CREATED,
        Json(LockResponse { message: "Seats locked", lock }),
    ))
}

/// GET /seat-locks/{lockId}
async fn get_lock(
    State(state): State<AppState>,
    Session(session_id): Session,
    Path(lock_id): Path<LockId>,
) -> Result<Json<LockHandle>, AppError> {
    Ok(Json(state.locks.handle(lock_id, session_id).await?))
}

/// PATCH /seat-locks/{lockId}/extend
async fn extend_lock(
    State(state): State<AppState>,
    Session(session_id): Session,
    Path(lock_id): Path<LockId>,
) -> Result<Json<LockResponse>, AppError> {
    let lock = state.locks.extend(lock_id, session_id).await?;
    Ok(Json(LockResponse { message: "Lock extended", lock }))
}

/// DELETE /seat-locks/{lockId}
async fn release_lock(
    State(state): State<AppState>,
    Session(session_id): Session,
    Path(lock_id): Path<LockId>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let released = state.locks.release(lock_id, session_id).await?;
    Ok(Json(ReleaseResponse {
        message: "Seats released",
        lock_id: released.id,
        showtime_id: released.showtime_id,
    }))
}

/// DELETE /seat-locks/showtime/{showtimeId}
async fn release_for_showtime(
    State(state): State<AppState>,
    Session(session_id): Session,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let released = state.locks.release_for_showtime(showtime_id, session_id).await?;
    Ok(Json(ReleaseResponse {
        message: "Seats released",
        lock_id: released.id,
        showtime_id: released.showtime_id,
    }))
}

/// GET /seat-locks/availability/{showtimeId}
///
/// The session header is optional here; when present the caller's own lock
/// is reported alongside the seat partitions.
async fn availability(
    State(state): State<AppState>,
    session: Option<Session>,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<Json<Availability>, AppError> {
    let session_id = session.map(|Session(id)| id);
    Ok(Json(state.locks.describe(showtime_id, session_id).await?))
}

/// GET /seat-locks/stream/{showtimeId}
async fn seat_stream(
    State(state): State<AppState>,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.catalog.showtime(showtime_id)?;
    let target = showtime_id.as_uuid();

    let stream = BroadcastStream::new(state.locks.subscribe()).filter_map(move |result| async move {
        match result {
            Ok(event) if event.showtime_id() == target => {
                Event::default().event(event.name()).json_data(&event).ok().map(Ok)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(%showtime_id, error = %e, "Seat stream subscriber lagged");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
