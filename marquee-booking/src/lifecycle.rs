use async_trait::async_trait;
use chrono::{DateTime, Utc};

use marquee_core::{Booking, BookingId, BookingStatus, LockState};
use marquee_lock::Sweep;
use marquee_shared::SeatEvent;

use crate::orchestrator::{BookingError, BookingOrchestrator};

impl BookingOrchestrator {
    /// Marks a pending booking as paid.
    pub async fn settle_payment(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        let booking = self
            .inventory
            .transition_booking(booking_id, BookingStatus::Confirmed, Utc::now())
            .await?;
        tracing::info!(%booking_id, "Payment settled");
        Ok(booking)
    }

    /// Cancels a pending booking and puts its seats back on sale.
    pub async fn cancel(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.cancel_at(booking_id, Utc::now()).await
    }

    async fn cancel_at(&self, booking_id: BookingId, now: DateTime<Utc>) -> Result<Booking, BookingError> {
        let current = self.get_booking(booking_id).await?;
        if !current.status.can_transition_to(BookingStatus::Cancelled) {
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: BookingStatus::Cancelled,
            });
        }

        // Drop the tombstones first: the inventory still reports the seats
        // BOOKED until the transition below lands, so nobody can book them
        // in between.
        let seats = current.seat_ids();
        self.locks
            .table()
            .unbook(current.showtime_id, &seats, booking_id)
            .await?;
        let cancelled = self
            .inventory
            .transition_booking(booking_id, BookingStatus::Cancelled, now)
            .await?;

        tracing::info!(%booking_id, showtime_id = %cancelled.showtime_id, seats = seats.len(), "Booking cancelled");
        self.locks.publish(SeatEvent::SeatsFreed {
            showtime_id: cancelled.showtime_id.as_uuid(),
            booking_id: booking_id.as_uuid(),
            seat_ids: seats.iter().map(|s| s.as_uuid()).collect(),
        });
        Ok(cancelled)
    }

    /// Cancels every pending booking whose payment window closed before
    /// `now`. Returns the cancelled bookings.
    pub async fn expire_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, BookingError> {
        let overdue = self.inventory.overdue_bookings(now).await?;
        let mut cancelled = Vec::with_capacity(overdue.len());
        for booking_id in overdue {
            match self.cancel_at(booking_id, now).await {
                Ok(booking) => cancelled.push(booking),
                // Settled or cancelled concurrently.
                Err(BookingError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cancelled)
    }

    /// Forgets checkout stages of locks that are no longer live.
    async fn prune_stages(&self, now: DateTime<Utc>) {
        let tracked: Vec<_> = self.stages.iter().map(|e| *e.key()).collect();
        for lock_id in tracked {
            let live = match self.locks.lock(lock_id).await {
                Ok(lock) => lock.state == LockState::Active && !lock.is_expired_at(now),
                Err(_) => false,
            };
            if !live {
                self.stages.remove(&lock_id);
            }
        }
    }
}

#[async_trait]
impl Sweep for BookingOrchestrator {
    fn name(&self) -> &'static str {
        "pending_payments"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, String> {
        self.prune_stages(now).await;
        self.expire_pending_payments(now)
            .await
            .map(|b| b.len())
            .map_err(|e| e.to_string())
    }
}
