use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use marquee_core::{
    Booking, BookingId, BookingStatus, InventoryError, InventoryStore, SeatId, SeatRecord, ShowtimeId,
};

#[derive(Debug, Default)]
struct ShowtimeSeats {
    seats: Vec<SeatRecord>,
    index: HashMap<SeatId, usize>,
}

/// In-process inventory store.
///
/// Each showtime's seats sit behind their own mutex; a booking is committed
/// or cancelled while holding that mutex, so the seat flags and the booking
/// record never disagree.
#[derive(Debug, Default)]
pub struct MemoryInventory {
    showtimes: DashMap<ShowtimeId, Arc<Mutex<ShowtimeSeats>>>,
    bookings: DashMap<BookingId, Booking>,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, showtime_id: ShowtimeId) -> Result<Arc<Mutex<ShowtimeSeats>>, InventoryError> {
        self.showtimes
            .get(&showtime_id)
            .map(|p| p.value().clone())
            .ok_or(InventoryError::ShowtimeNotFound(showtime_id))
    }
}

#[async_trait]
impl InventoryStore for MemoryInventory {
    async fn register_showtime(&self, showtime_id: ShowtimeId, seats: Vec<SeatRecord>) -> Result<(), InventoryError> {
        let partition = self.showtimes.entry(showtime_id).or_default().value().clone();
        let mut guard = partition.lock();
        for seat in seats {
            if guard.index.contains_key(&seat.seat_id) {
                continue;
            }
            let pos = guard.seats.len();
            guard.index.insert(seat.seat_id, pos);
            guard.seats.push(seat);
        }
        tracing::debug!(%showtime_id, seats = guard.seats.len(), "Registered showtime inventory");
        Ok(())
    }

    async fn seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatRecord>, InventoryError> {
        let partition = self.partition(showtime_id)?;
        let guard = partition.lock();
        Ok(guard.seats.clone())
    }

    async fn commit_booking(&self, booking: &Booking) -> Result<(), InventoryError> {
        let partition = self.partition(booking.showtime_id)?;
        let mut guard = partition.lock();

        let seat_ids = booking.seat_ids();
        let unavailable: Vec<SeatId> = seat_ids
            .iter()
            .filter(|id| match guard.index.get(id) {
                Some(&pos) => guard.seats[pos].is_booked(),
                None => true,
            })
            .copied()
            .collect();
        if !unavailable.is_empty() {
            return Err(InventoryError::SeatsUnavailable { seats: unavailable });
        }

        for id in &seat_ids {
            if let Some(&pos) = guard.index.get(id) {
                guard.seats[pos].booking_id = Some(booking.id);
            }
        }
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>, InventoryError> {
        Ok(self.bookings.get(&booking_id).map(|b| b.value().clone()))
    }

    async fn transition_booking(
        &self,
        booking_id: BookingId,
        next: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, InventoryError> {
        let showtime_id = self
            .bookings
            .get(&booking_id)
            .map(|b| b.showtime_id)
            .ok_or(InventoryError::BookingNotFound(booking_id))?;

        let partition = self.partition(showtime_id)?;
        let mut guard = partition.lock();

        let mut entry = self
            .bookings
            .get_mut(&booking_id)
            .ok_or(InventoryError::BookingNotFound(booking_id))?;
        let from = entry.status;
        if !from.can_transition_to(next) {
            return Err(InventoryError::InvalidTransition { from, to: next });
        }

        if next == BookingStatus::Cancelled {
            for id in entry.seat_ids() {
                if let Some(&pos) = guard.index.get(&id) {
                    if guard.seats[pos].booking_id == Some(booking_id) {
                        guard.seats[pos].booking_id = None;
                    }
                }
            }
        }
        entry.update_status(next, now);
        Ok(entry.clone())
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, InventoryError> {
        Ok(self
            .bookings
            .iter()
            .filter(|b| b.payment_overdue_at(now))
            .map(|b| b.id)
            .collect())
    }
}
