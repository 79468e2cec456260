use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use marquee_catalog::{Modifier, Movie, Showtime, Snack};
use marquee_core::{Amount, MovieId, SeatType, ShowtimeId, TicketTypeId};
use marquee_lock::SeatView;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/movies", get(list_movies))
        .route("/showtimes/movie/{movie_id}/upcoming", get(upcoming_showtimes))
        .route("/showtime-seats/showtime/{showtime_id}/available", get(available_seats))
        .route("/ticket-types", get(ticket_types))
        .route("/snacks", get(list_snacks))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTypeQuery {
    pub showtime_id: ShowtimeId,
}

/// A ticket type with what it costs on a NORMAL seat.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketTypeView {
    pub ticket_type_id: TicketTypeId,
    pub code: String,
    pub label: String,
    pub modifier: Modifier,
    pub price: Amount,
    pub currency: String,
}

async fn list_movies(State(state): State<AppState>) -> Json<Vec<Movie>> {
    Json(state.catalog.movies().to_vec())
}

async fn upcoming_showtimes(
    State(state): State<AppState>,
    Path(movie_id): Path<MovieId>,
) -> Result<Json<Vec<Showtime>>, AppError> {
    Ok(Json(state.catalog.upcoming_showtimes(movie_id, Utc::now())?))
}

async fn available_seats(
    State(state): State<AppState>,
    Path(showtime_id): Path<ShowtimeId>,
) -> Result<Json<Vec<SeatView>>, AppError> {
    Ok(Json(state.locks.available_seats(showtime_id).await?))
}

async fn ticket_types(
    State(state): State<AppState>,
    Query(query): Query<TicketTypeQuery>,
) -> Result<Json<Vec<TicketTypeView>>, AppError> {
    let views = state
        .catalog
        .ticket_types_for(query.showtime_id)?
        .into_iter()
        .map(|t| TicketTypeView {
            ticket_type_id: t.ticket_type_id,
            code: t.code.clone(),
            label: t.label.clone(),
            modifier: t.modifier,
            price: state.pricing.unit_price(SeatType::Normal, &t.modifier),
            currency: state.pricing.currency().to_string(),
        })
        .collect();
    Ok(Json(views))
}

async fn list_snacks(State(state): State<AppState>) -> Json<Vec<Snack>> {
    Json(state.catalog.snacks().to_vec())
}
