use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::booking::{Booking, BookingStatus};
use crate::ids::{BookingId, LockId, SeatId, SessionId, ShowtimeId};
use crate::lock::{Lock, SeatClaim};
use crate::seat::SeatRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockTableError {
    #[error("Seats already claimed: {seats:?}")]
    Conflict { seats: Vec<SeatId> },

    #[error("Session already holds lock {0} for this showtime")]
    SessionBusy(LockId),

    #[error("Lock not found: {0}")]
    NotFound(LockId),

    #[error("Lock expired: {0}")]
    Expired(LockId),

    #[error("Lock already consumed: {0}")]
    AlreadyConsumed(LockId),

    #[error("Lock table storage error: {0}")]
    Storage(String),
}

/// Ephemeral, TTL-backed seat claims.
///
/// Every implementation must make `try_claim` linearizable with respect to
/// every other mutating call: two claims over intersecting seat sets never
/// both succeed. Expiry is evaluated explicitly against the `now` carried by
/// each call, never left to a backing store's own TTL.
#[async_trait]
pub trait LockTable: Send + Sync {
    /// Claims every seat of `lock` under `lock.id`, or nothing. Also refuses
    /// a session that already holds a live lock on the same showtime.
    ///
    /// `lock.created_at` is taken as the current instant for lazy expiry of
    /// older claims.
    async fn try_claim(&self, lock: &Lock) -> Result<(), LockTableError>;

    async fn get(&self, lock_id: LockId) -> Result<Option<Lock>, LockTableError>;

    /// Frees the seats of a live ACTIVE lock. A lock found past its deadline
    /// is expired on the spot and reported as `Expired`; a lock pinned by a
    /// confirm yields `AlreadyConsumed`; anything else yields `NotFound`.
    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError>;

    async fn extend(&self, lock_id: LockId, ttl: chrono::Duration, now: DateTime<Utc>) -> Result<Lock, LockTableError>;

    /// Expires every ACTIVE lock past its deadline and collects terminal
    /// locks closed more than `grace` ago. Returns the newly expired locks.
    async fn sweep_expired(&self, now: DateTime<Utc>, grace: chrono::Duration) -> Result<Vec<Lock>, LockTableError>;

    async fn active_for_session(
        &self,
        showtime_id: ShowtimeId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lock>, LockTableError>;

    /// Live claims for a showtime; expired holds are left out.
    async fn claims(&self, showtime_id: ShowtimeId, now: DateTime<Utc>) -> Result<HashMap<SeatId, SeatClaim>, LockTableError>;

    /// ACTIVE and unexpired at `now` -> CONFIRMING.
    async fn begin_consume(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError>;

    /// CONFIRMING -> CONSUMED; the seat entries become booked tombstones.
    async fn complete_consume(&self, lock_id: LockId, booking_id: BookingId, now: DateTime<Utc>) -> Result<Lock, LockTableError>;

    /// CONFIRMING -> ACTIVE, undoing `begin_consume`.
    async fn abort_consume(&self, lock_id: LockId) -> Result<(), LockTableError>;

    /// Drops the booked tombstones a cancelled booking left behind.
    async fn unbook(&self, showtime_id: ShowtimeId, seats: &[SeatId], booking_id: BookingId) -> Result<(), LockTableError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InventoryError {
    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(ShowtimeId),

    #[error("Seats not available: {seats:?}")]
    SeatsUnavailable { seats: Vec<SeatId> },

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("Invalid booking transition from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("Inventory storage error: {0}")]
    Storage(String),
}

/// Durable seat status and booking records.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Registers a showtime's seats. Seats already known keep their status.
    async fn register_showtime(&self, showtime_id: ShowtimeId, seats: Vec<SeatRecord>) -> Result<(), InventoryError>;

    async fn seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatRecord>, InventoryError>;

    /// Marks every seat of `booking` BOOKED and stores the booking, as one
    /// unit. Fails without side effects if any seat is already booked.
    async fn commit_booking(&self, booking: &Booking) -> Result<(), InventoryError>;

    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>, InventoryError>;

    /// Moves a booking between statuses. Cancelling also returns its seats
    /// to sale in the same unit.
    async fn transition_booking(
        &self,
        booking_id: BookingId,
        next: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, InventoryError>;

    async fn overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, InventoryError>;
}
