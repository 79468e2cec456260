use chrono::{DateTime, Utc};
use marquee_shared::pii::Masked;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{BookingId, LockId, SeatId, SessionId, ShowtimeId, SnackId, TicketTypeId};
use crate::Amount;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    PendingPayment,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::PendingPayment => "PENDING_PAYMENT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING_PAYMENT" => Some(BookingStatus::PendingPayment),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Only a pending booking may move, and only once.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::PendingPayment, BookingStatus::Confirmed)
                | (BookingStatus::PendingPayment, BookingStatus::Cancelled)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuestInfo {
    pub email: Masked<String>,
    pub username: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatPrice {
    #[serde(rename = "showtimeSeatId")]
    pub seat_id: SeatId,
    pub ticket_type_id: TicketTypeId,
    pub unit_price: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnackLine {
    pub snack_id: SnackId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Amount,
    pub line_total: Amount,
}

/// Itemized price of a lock plus any snacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub seats: Vec<SeatPrice>,
    pub subtotal: Amount,
    pub snacks: Vec<SnackLine>,
    pub snacks_total: Amount,
    pub discount: Amount,
    pub total: Amount,
    pub currency: String,
}

impl PriceBreakdown {
    /// `None` when a total does not fit in an `Amount`.
    pub fn new(seats: Vec<SeatPrice>, snacks: Vec<SnackLine>, currency: impl Into<String>) -> Option<Self> {
        let subtotal = seats.iter().try_fold(0, |acc: Amount, s| acc.checked_add(s.unit_price))?;
        let snacks_total = snacks.iter().try_fold(0, |acc: Amount, s| acc.checked_add(s.line_total))?;
        Some(Self {
            seats,
            subtotal,
            snacks,
            snacks_total,
            discount: 0,
            total: subtotal.checked_add(snacks_total)?,
            currency: currency.into(),
        })
    }
}

/// The durable outcome of a consumed lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub lock_id: LockId,
    pub session_id: SessionId,
    pub showtime_id: ShowtimeId,
    pub guest: GuestInfo,
    pub price: PriceBreakdown,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_expires_at: DateTime<Utc>,
}

impl Booking {
    pub fn seat_ids(&self) -> Vec<SeatId> {
        let mut ids: Vec<SeatId> = self.price.seats.iter().map(|s| s.seat_id).collect();
        ids.sort();
        ids
    }

    pub fn final_price(&self) -> Amount {
        self.price.total
    }

    pub fn update_status(&mut self, status: BookingStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn payment_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::PendingPayment && now > self.payment_expires_at
    }
}
