use uuid::Uuid;

/// Seat-level changes fanned out to availability subscribers.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum SeatEvent {
    SeatsLocked {
        showtime_id: Uuid,
        lock_id: Uuid,
        seat_ids: Vec<Uuid>,
        expires_at: i64,
    },
    SeatsReleased {
        showtime_id: Uuid,
        lock_id: Uuid,
        seat_ids: Vec<Uuid>,
    },
    SeatsExpired {
        showtime_id: Uuid,
        lock_id: Uuid,
        seat_ids: Vec<Uuid>,
    },
    SeatsBooked {
        showtime_id: Uuid,
        lock_id: Uuid,
        booking_id: Uuid,
        seat_ids: Vec<Uuid>,
    },
    /// Seats returned to sale after their pending booking was cancelled.
    SeatsFreed {
        showtime_id: Uuid,
        booking_id: Uuid,
        seat_ids: Vec<Uuid>,
    },
}

impl SeatEvent {
    pub fn showtime_id(&self) -> Uuid {
        match self {
            SeatEvent::SeatsLocked { showtime_id, .. }
            | SeatEvent::SeatsReleased { showtime_id, .. }
            | SeatEvent::SeatsExpired { showtime_id, .. }
            | SeatEvent::SeatsBooked { showtime_id, .. }
            | SeatEvent::SeatsFreed { showtime_id, .. } => *showtime_id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            SeatEvent::SeatsLocked { .. } => "seats_locked",
            SeatEvent::SeatsReleased { .. } => "seats_released",
            SeatEvent::SeatsExpired { .. } => "seats_expired",
            SeatEvent::SeatsBooked { .. } => "seats_booked",
            SeatEvent::SeatsFreed { .. } => "seats_freed",
        }
    }
}
