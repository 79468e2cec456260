use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BookingId, LockId, SeatId, SessionId, ShowtimeId, TicketTypeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    Active,
    /// Pinned by an in-flight confirm. Never swept; resolves to `Consumed`
    /// or back to `Active`.
    Confirming,
    Expired,
    Released,
    Consumed,
}

impl LockState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LockState::Expired | LockState::Released | LockState::Consumed)
    }
}

/// A seat requested by the client together with the ticket type chosen for it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SeatSelection {
    #[serde(rename = "showtimeSeatId")]
    pub seat_id: SeatId,
    pub ticket_type_id: TicketTypeId,
}

/// One session's time-bounded claim over a set of seats of one showtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub id: LockId,
    pub session_id: SessionId,
    pub showtime_id: ShowtimeId,
    pub seats: Vec<SeatSelection>,
    pub state: LockState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub booking_id: Option<BookingId>,
}

impl Lock {
    pub fn new(
        session_id: SessionId,
        showtime_id: ShowtimeId,
        seats: Vec<SeatSelection>,
        ttl: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LockId::generate(),
            session_id,
            showtime_id,
            seats,
            state: LockState::Active,
            created_at: now,
            expires_at: now + ttl,
            closed_at: None,
            booking_id: None,
        }
    }

    pub fn seat_ids(&self) -> Vec<SeatId> {
        let mut ids: Vec<SeatId> = self.seats.iter().map(|s| s.seat_id).collect();
        ids.sort();
        ids
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether this lock still holds its seats at `now`.
    pub fn holds_seats_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            LockState::Confirming => true,
            LockState::Active => !self.is_expired_at(now),
            _ => false,
        }
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }

    pub fn close(&mut self, state: LockState, now: DateTime<Utc>) {
        self.state = state;
        self.closed_at = Some(now);
    }
}

/// What the lock table knows about a single seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatClaim {
    Held {
        lock_id: LockId,
        session_id: SessionId,
        expires_at: DateTime<Utc>,
    },
    /// Permanent marker left by a consumed lock while its booking stands.
    Booked { booking_id: BookingId },
}
