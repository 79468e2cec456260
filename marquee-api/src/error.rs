use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use marquee_booking::BookingError;
use marquee_catalog::CatalogError;
use marquee_core::SeatId;
use marquee_lock::LockError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    AuthorizationError(String),
    ValidationError(String),
    NotFoundError(String),
    ConflictError { message: String, seats: Vec<SeatId> },
    LockedError(String),
    GoneError(String),
    InternalServerError(String),
    Anyhow(anyhow::Error),
}

impl AppError {
    fn conflict(message: String) -> Self {
        AppError::ConflictError { message, seats: Vec::new() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut conflicting = Vec::new();
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError { message, seats } => {
                conflicting = seats;
                (StatusCode::CONFLICT, message)
            }
            AppError::LockedError(msg) => (StatusCode::LOCKED, msg),
            AppError::GoneError(msg) => (StatusCode::GONE, msg),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Anyhow(err) => {
                tracing::error!("Internal Server Error: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = if conflicting.is_empty() {
            Json(json!({ "error": error_message }))
        } else {
            Json(json!({ "error": error_message, "conflictingSeats": conflicting }))
        };

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Anyhow(err)
    }
}

impl From<LockError> for AppError {
    fn from(err: LockError) -> Self {
        let message = err.to_string();
        match err {
            LockError::EmptySelection
            | LockError::DuplicateSeat(_)
            | LockError::TooManySeats { .. }
            | LockError::InvalidSeat(_)
            | LockError::InvalidTicketType(_) => AppError::ValidationError(message),
            LockError::ShowtimeNotFound(_) | LockError::NotFound(_) | LockError::NoActiveLock(_) => {
                AppError::NotFoundError(message)
            }
            LockError::SeatUnavailable { seats } => AppError::ConflictError { message, seats },
            LockError::SessionBusy(_) => AppError::LockedError(message),
            LockError::NotOwner(_) => AppError::AuthorizationError(message),
            LockError::Expired(_) => AppError::GoneError(message),
            LockError::AlreadyConsumed(_) => AppError::conflict(message),
            LockError::Storage(_) => AppError::InternalServerError(message),
        }
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        let message = err.to_string();
        match err {
            BookingError::LockNotFound(_) | BookingError::BookingNotFound(_) | BookingError::SnackNotFound(_) => {
                AppError::NotFoundError(message)
            }
            BookingError::LockExpired(_) => AppError::GoneError(message),
            BookingError::AlreadyConsumed(_) | BookingError::InvalidTransition { .. } => AppError::conflict(message),
            BookingError::SeatUnavailable { seats } => AppError::ConflictError { message, seats },
            BookingError::NotOwner(_) => AppError::AuthorizationError(message),
            BookingError::InvalidSnackQuantity { .. } | BookingError::InvalidGuest(_) | BookingError::PriceOverflow => {
                AppError::ValidationError(message)
            }
            BookingError::Storage(_) => AppError::InternalServerError(message),
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::TicketTypeNotOffered { .. } => AppError::ValidationError(message),
            CatalogError::MovieNotFound(_) | CatalogError::ShowtimeNotFound(_) | CatalogError::SnackNotFound(_) => {
                AppError::NotFoundError(message)
            }
        }
    }
}
