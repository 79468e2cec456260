use axum::extract::{FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;

use marquee_core::SessionId;

use crate::error::AppError;

pub const SESSION_HEADER: &str = "x-session-id";

/// Caller identity taken from `X-Session-Id`.
///
/// The header is asserted by the client and never checked against anything
/// server-side. It correlates locks and bookings to whoever sent it and is
/// not an access control.
#[derive(Debug, Clone, Copy)]
pub struct Session(pub SessionId);

fn parse(parts: &Parts) -> Result<Option<SessionId>, AppError> {
    let Some(raw) = parts.headers.get(SESSION_HEADER) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| AppError::ValidationError("X-Session-Id is not valid text".to_string()))?;
    raw.trim()
        .parse::<SessionId>()
        .map(Some)
        .map_err(|_| AppError::ValidationError(format!("X-Session-Id must be a UUID, got '{}'", raw)))
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse(parts)?
            .map(Session)
            .ok_or_else(|| AppError::AuthenticationError("Missing X-Session-Id header".to_string()))
    }
}

impl<S> OptionalFromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Self::Rejection> {
        Ok(parse(parts)?.map(Session))
    }
}
