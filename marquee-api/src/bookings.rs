use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marquee_booking::SnackOrder;
use marquee_core::{Amount, Booking, BookingId, BookingStatus, GuestInfo, LockId, PriceBreakdown, ShowtimeId};

use crate::error::AppError;
use crate::session::Session;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings/price-preview", post(price_preview))
        .route("/bookings/confirm", post(confirm_booking))
        .route("/bookings/{booking_id}", get(get_booking))
        .route("/bookings/{booking_id}/pay", post(pay_booking))
        .route("/bookings/{booking_id}/cancel", post(cancel_booking))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePreviewRequest {
    pub lock_id: LockId,
    #[serde(default)]
    pub snacks: Vec<SnackOrder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePreviewResponse {
    pub lock_id: LockId,
    #[serde(flatten)]
    pub price: PriceBreakdown,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmBookingRequest {
    pub lock_id: LockId,
    pub guest_info: GuestInfo,
    #[serde(default, alias = "snacks")]
    pub snack_combos: Vec<SnackOrder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingResponse {
    pub booking_id: BookingId,
    pub lock_id: LockId,
    pub showtime_id: ShowtimeId,
    pub status: BookingStatus,
    pub final_price: Amount,
    pub currency: String,
    pub price: PriceBreakdown,
    pub guest: GuestInfo,
    pub created_at: DateTime<Utc>,
    pub payment_expires_at: DateTime<Utc>,
}

impl From<Booking> for BookingResponse {
    fn from(booking: Booking) -> Self {
        Self {
            booking_id: booking.id,
            lock_id: booking.lock_id,
            showtime_id: booking.showtime_id,
            status: booking.status,
            final_price: booking.final_price(),
            currency: booking.price.currency.clone(),
            price: booking.price,
            guest: booking.guest,
            created_at: booking.created_at,
            payment_expires_at: booking.payment_expires_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /bookings/price-preview
async fn price_preview(
    State(state): State<AppState>,
    Json(req): Json<PricePreviewRequest>,
) -> Result<Json<PricePreviewResponse>, AppError> {
    let price = state.bookings.preview(req.lock_id, &req.snacks).await?;
    Ok(Json(PricePreviewResponse { lock_id: req.lock_id, price }))
}

/// POST /bookings/confirm
async fn confirm_booking(
    State(state): State<AppState>,
    Session(session_id): Session,
    Json(req): Json<ConfirmBookingRequest>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .confirm(req.lock_id, session_id, req.guest_info, &req.snack_combos)
        .await?;
    Ok(Json(booking.into()))
}

/// Loads a booking on behalf of the session that created it.
async fn owned_booking(state: &AppState, booking_id: BookingId, session: Session) -> Result<Booking, AppError> {
    let booking = state.bookings.get_booking(booking_id).await?;
    if booking.session_id != session.0 {
        return Err(AppError::AuthorizationError(format!(
            "Booking {} belongs to another session",
            booking_id
        )));
    }
    Ok(booking)
}

/// GET /bookings/{bookingId}
async fn get_booking(
    State(state): State<AppState>,
    session: Session,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingResponse>, AppError> {
    Ok(Json(owned_booking(&state, booking_id, session).await?.into()))
}

/// POST /bookings/{bookingId}/pay
async fn pay_booking(
    State(state): State<AppState>,
    session: Session,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingResponse>, AppError> {
    owned_booking(&state, booking_id, session).await?;
    Ok(Json(state.bookings.settle_payment(booking_id).await?.into()))
}

/// POST /bookings/{bookingId}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    session: Session,
    Path(booking_id): Path<BookingId>,
) -> Result<Json<BookingResponse>, AppError> {
    owned_booking(&state, booking_id, session).await?;
    Ok(Json(state.bookings.cancel(booking_id).await?.into()))
}
