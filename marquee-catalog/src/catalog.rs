use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use marquee_core::{Amount, MovieId, SeatId, SeatRecord, SeatType, ShowtimeId, SnackId, TicketTypeId};

use crate::pricing::Modifier;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    pub movie_id: MovieId,
    pub title: String,
    pub genre: String,
    pub duration_minutes: u32,
    pub age_rating: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Showtime {
    pub showtime_id: ShowtimeId,
    pub movie_id: MovieId,
    pub room: String,
    pub format: String,
    pub start_time: DateTime<Utc>,
    pub ticket_type_ids: Vec<TicketTypeId>,
    #[serde(skip)]
    pub rows: u8,
    #[serde(skip)]
    pub seats_per_row: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub ticket_type_id: TicketTypeId,
    pub code: String,
    pub label: String,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snack {
    pub snack_id: SnackId,
    pub name: String,
    pub category: String,
    pub price: Amount,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Movie not found: {0}")]
    MovieNotFound(MovieId),

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(ShowtimeId),

    #[error("Ticket type {ticket_type_id} is not offered for showtime {showtime_id}")]
    TicketTypeNotOffered {
        showtime_id: ShowtimeId,
        ticket_type_id: TicketTypeId,
    },

    #[error("Snack not found: {0}")]
    SnackNotFound(SnackId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTypeSeed {
    pub code: String,
    pub label: String,
    pub modifier: Modifier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnackSeed {
    pub name: String,
    pub category: String,
    pub price: Amount,
}

/// Fixture data loaded at startup. Identifiers are derived from names, so a
/// restart against a persistent inventory addresses the same rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub movie_title: String,
    pub room: String,
    pub format: String,
    /// Start of each showtime, in minutes from boot.
    pub showtime_offsets_minutes: Vec<i64>,
    pub rows: u8,
    pub seats_per_row: u16,
    pub ticket_types: Vec<TicketTypeSeed>,
    pub snacks: Vec<SnackSeed>,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            movie_title: "K6 Performance Test Movie".to_string(),
            room: "Room 1".to_string(),
            format: "2D Subtitled".to_string(),
            showtime_offsets_minutes: vec![120, 300, 1560],
            rows: 10,
            seats_per_row: 10,
            ticket_types: vec![
                TicketTypeSeed { code: "k6_adult".into(), label: "Adult".into(), modifier: Modifier::percentage(0) },
                TicketTypeSeed { code: "k6_student".into(), label: "Student".into(), modifier: Modifier::percentage(-20) },
                TicketTypeSeed { code: "k6_senior".into(), label: "Senior".into(), modifier: Modifier::percentage(-30) },
            ],
            snacks: vec![
                SnackSeed { name: "Salted Popcorn".into(), category: "POPCORN".into(), price: 45_000 },
                SnackSeed { name: "Caramel Popcorn".into(), category: "POPCORN".into(), price: 55_000 },
                SnackSeed { name: "Coca-Cola".into(), category: "DRINK".into(), price: 30_000 },
            ],
        }
    }
}

fn derive_id(kind: &str, name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("marquee:{}:{}", kind, name).as_bytes())
}

const ROW_LABELS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Read-only browsing data: movies, showtimes, ticket types and snacks.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    movies: Vec<Movie>,
    showtimes: HashMap<ShowtimeId, Showtime>,
    ticket_types: Vec<TicketType>,
    snacks: Vec<Snack>,
}

impl Catalog {
    pub fn from_seed(seed: &SeedConfig, now: DateTime<Utc>) -> Self {
        let movie = Movie {
            movie_id: MovieId(derive_id("movie", &seed.movie_title)),
            title: seed.movie_title.clone(),
            genre: "Action".to_string(),
            duration_minutes: 120,
            age_rating: "P".to_string(),
        };

        let ticket_types: Vec<TicketType> = seed
            .ticket_types
            .iter()
            .map(|t| TicketType {
                ticket_type_id: TicketTypeId(derive_id("ticket-type", &t.code)),
                code: t.code.clone(),
                label: t.label.clone(),
                modifier: t.modifier,
            })
            .collect();

        let snacks = seed
            .snacks
            .iter()
            .map(|s| Snack {
                snack_id: SnackId(derive_id("snack", &s.name)),
                name: s.name.clone(),
                category: s.category.clone(),
                price: s.price,
            })
            .collect();

        let rows = seed.rows.min(ROW_LABELS.len() as u8);
        let showtimes = seed
            .showtime_offsets_minutes
            .iter()
            .enumerate()
            .map(|(i, offset)| {
                let showtime = Showtime {
                    showtime_id: ShowtimeId(derive_id("showtime", &format!("{}#{}", seed.movie_title, i))),
                    movie_id: movie.movie_id,
                    room: seed.room.clone(),
                    format: seed.format.clone(),
                    start_time: now + chrono::Duration::minutes(*offset),
                    ticket_type_ids: ticket_types.iter().map(|t| t.ticket_type_id).collect(),
                    rows,
                    seats_per_row: seed.seats_per_row,
                };
                (showtime.showtime_id, showtime)
            })
            .collect();

        Self {
            movies: vec![movie],
            showtimes,
            ticket_types,
            snacks,
        }
    }

    pub fn movies(&self) -> &[Movie] {
        &self.movies
    }

    pub fn upcoming_showtimes(&self, movie_id: MovieId, now: DateTime<Utc>) -> Result<Vec<Showtime>, CatalogError> {
        if !self.movies.iter().any(|m| m.movie_id == movie_id) {
            return Err(CatalogError::MovieNotFound(movie_id));
        }
        let mut showtimes: Vec<Showtime> = self
            .showtimes
            .values()
            .filter(|s| s.movie_id == movie_id && s.start_time > now)
            .cloned()
            .collect();
        showtimes.sort_by_key(|s| s.start_time);
        Ok(showtimes)
    }

    pub fn showtime(&self, showtime_id: ShowtimeId) -> Result<&Showtime, CatalogError> {
        self.showtimes
            .get(&showtime_id)
            .ok_or(CatalogError::ShowtimeNotFound(showtime_id))
    }

    pub fn showtimes(&self) -> impl Iterator<Item = &Showtime> {
        self.showtimes.values()
    }

    pub fn ticket_types_for(&self, showtime_id: ShowtimeId) -> Result<Vec<&TicketType>, CatalogError> {
        let showtime = self.showtime(showtime_id)?;
        Ok(self
            .ticket_types
            .iter()
            .filter(|t| showtime.ticket_type_ids.contains(&t.ticket_type_id))
            .collect())
    }

    pub fn ticket_type_for(&self, showtime_id: ShowtimeId, ticket_type_id: TicketTypeId) -> Result<&TicketType, CatalogError> {
        let showtime = self.showtime(showtime_id)?;
        if !showtime.ticket_type_ids.contains(&ticket_type_id) {
            return Err(CatalogError::TicketTypeNotOffered { showtime_id, ticket_type_id });
        }
        self.ticket_types
            .iter()
            .find(|t| t.ticket_type_id == ticket_type_id)
            .ok_or(CatalogError::TicketTypeNotOffered { showtime_id, ticket_type_id })
    }

    pub fn snacks(&self) -> &[Snack] {
        &self.snacks
    }

    pub fn snack(&self, snack_id: SnackId) -> Result<&Snack, CatalogError> {
        self.snacks
            .iter()
            .find(|s| s.snack_id == snack_id)
            .ok_or(CatalogError::SnackNotFound(snack_id))
    }

    /// Seat map of a showtime: the back two rows are VIP and the two seats
    /// at either end of every other row are COUPLE.
    pub fn seat_layout(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatRecord>, CatalogError> {
        let showtime = self.showtime(showtime_id)?;
        let rows = showtime.rows;
        let per_row = showtime.seats_per_row;

        let mut seats = Vec::with_capacity(rows as usize * per_row as usize);
        for row in 0..rows {
            let label = (ROW_LABELS[row as usize] as char).to_string();
            for number in 1..=per_row {
                let seat_type = if row + 2 >= rows {
                    SeatType::Vip
                } else if number <= 2 || number >= per_row.saturating_sub(1) {
                    SeatType::Couple
                } else {
                    SeatType::Normal
                };
                let mut seat = SeatRecord::new(showtime_id, label.clone(), number, seat_type);
                seat.seat_id = SeatId(derive_id("seat", &format!("{}:{}{}", showtime_id, label, number)));
                seats.push(seat);
            }
        }
        Ok(seats)
    }
}
