use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{BookingId, SeatId, ShowtimeId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatType {
    Normal,
    Vip,
    Couple,
}

impl SeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Normal => "NORMAL",
            SeatType::Vip => "VIP",
            SeatType::Couple => "COUPLE",
        }
    }
}

impl fmt::Display for SeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(SeatType::Normal),
            "VIP" => Ok(SeatType::Vip),
            "COUPLE" => Ok(SeatType::Couple),
            other => Err(format!("unknown seat type: {}", other)),
        }
    }
}

/// Externally visible seat status.
///
/// The inventory only ever persists `Available` or `Booked`; `Locked` is
/// derived by overlaying the lock table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
}

/// One seat of one showtime as held by the inventory store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatRecord {
    #[serde(rename = "showtimeSeatId")]
    pub seat_id: SeatId,
    pub showtime_id: ShowtimeId,
    pub row_label: String,
    pub seat_number: u16,
    pub seat_type: SeatType,
    pub booking_id: Option<BookingId>,
}

impl SeatRecord {
    pub fn new(showtime_id: ShowtimeId, row_label: impl Into<String>, seat_number: u16, seat_type: SeatType) -> Self {
        Self {
            seat_id: SeatId::generate(),
            showtime_id,
            row_label: row_label.into(),
            seat_number,
            seat_type,
            booking_id: None,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.booking_id.is_some()
    }

    pub fn label(&self) -> String {
        format!("{}{}", self.row_label, self.seat_number)
    }
}
