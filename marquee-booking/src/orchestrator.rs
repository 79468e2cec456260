use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use marquee_catalog::Catalog;
use marquee_core::{
    Booking, BookingId, BookingStatus, GuestInfo, InventoryError, InventoryStore, Lock, LockId, LockState,
    LockTableError, PriceBreakdown, SeatId, SeatPrice, SessionId, SnackId, SnackLine,
};
use marquee_lock::{LockError, LockManager};
use marquee_shared::SeatEvent;

use crate::models::{BookingPolicy, CheckoutStage, SnackOrder, MAX_SNACK_QUANTITY};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BookingError {
    #[error("Lock not found: {0}")]
    LockNotFound(LockId),

    #[error("Lock expired: {0}")]
    LockExpired(LockId),

    #[error("Lock already consumed: {0}")]
    AlreadyConsumed(LockId),

    #[error("Lock {0} belongs to another session")]
    NotOwner(LockId),

    #[error("Seats not available: {seats:?}")]
    SeatUnavailable { seats: Vec<SeatId> },

    #[error("Snack not found: {0}")]
    SnackNotFound(SnackId),

    #[error("Snack {snack_id} quantity must be between 1 and {max}")]
    InvalidSnackQuantity { snack_id: SnackId, max: u32 },

    #[error("Order total is out of range")]
    PriceOverflow,

    #[error("Invalid guest info: {0}")]
    InvalidGuest(String),

    #[error("Booking not found: {0}")]
    BookingNotFound(BookingId),

    #[error("Booking cannot move from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LockError> for BookingError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::NotFound(id) => BookingError::LockNotFound(id),
            LockError::Expired(id) => BookingError::LockExpired(id),
            LockError::AlreadyConsumed(id) => BookingError::AlreadyConsumed(id),
            LockError::NotOwner(id) => BookingError::NotOwner(id),
            LockError::SeatUnavailable { seats } => BookingError::SeatUnavailable { seats },
            other => BookingError::Storage(other.to_string()),
        }
    }
}

impl From<LockTableError> for BookingError {
    fn from(err: LockTableError) -> Self {
        LockError::from(err).into()
    }
}

impl From<InventoryError> for BookingError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::SeatsUnavailable { seats } => BookingError::SeatUnavailable { seats },
            InventoryError::BookingNotFound(id) => BookingError::BookingNotFound(id),
            InventoryError::InvalidTransition { from, to } => BookingError::InvalidTransition { from, to },
            other => BookingError::Storage(other.to_string()),
        }
    }
}

/// Turns a live lock into a PENDING_PAYMENT booking.
///
/// Confirm is the only path that writes bookings. It pins the lock
/// (CONFIRMING), commits seats and booking to the inventory in one unit and
/// only then retires the lock. A failed inventory write un-pins the lock.
pub struct BookingOrchestrator {
    pub(crate) locks: Arc<LockManager>,
    pub(crate) inventory: Arc<dyn InventoryStore>,
    catalog: Arc<Catalog>,
    pub(crate) policy: BookingPolicy,
    pub(crate) stages: DashMap<LockId, CheckoutStage>,
}

impl BookingOrchestrator {
    pub fn new(
        locks: Arc<LockManager>,
        inventory: Arc<dyn InventoryStore>,
        catalog: Arc<Catalog>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            locks,
            inventory,
            catalog,
            policy,
            stages: DashMap::new(),
        }
    }

    /// Checkout stage of a live lock; `None` once the lock is gone or closed.
    pub async fn stage(&self, lock_id: LockId) -> Option<CheckoutStage> {
        let lock = self.locks.lock(lock_id).await.ok()?;
        if lock.state != LockState::Active || lock.is_expired_at(Utc::now()) {
            return None;
        }
        Some(self.stages.get(&lock_id).map(|s| *s).unwrap_or(CheckoutStage::Locked))
    }

    /// Prices a lock plus snacks. Never changes the lock and may be repeated.
    pub async fn preview(&self, lock_id: LockId, snacks: &[SnackOrder]) -> Result<PriceBreakdown, BookingError> {
        let lock = self.locks.lock(lock_id).await?;
        ensure_live(&lock)?;

        let breakdown = self.price(&lock, snacks).await?;
        self.stages.insert(lock_id, CheckoutStage::Priced);
        tracing::debug!(%lock_id, total = breakdown.total, "Price preview");
        Ok(breakdown)
    }

    pub async fn confirm(
        &self,
        lock_id: LockId,
        session_id: SessionId,
        guest: GuestInfo,
        snacks: &[SnackOrder],
    ) -> Result<Booking, BookingError> {
        validate_guest(&guest)?;
        let lock = self.locks.lock(lock_id).await?;
        if lock.session_id != session_id {
            tracing::warn!(%lock_id, %session_id, "Confirm attempted by non-owner");
            return Err(BookingError::NotOwner(lock_id));
        }
        let snack_lines = self.snack_lines(snacks)?;

        let now = Utc::now();
        let table = self.locks.table();
        let pinned = match table.begin_consume(lock_id, now).await {
            Ok(pinned) => pinned,
            Err(LockTableError::Expired(_)) => {
                if lock.state == LockState::Active {
                    self.locks.publish(SeatEvent::SeatsExpired {
                        showtime_id: lock.showtime_id.as_uuid(),
                        lock_id: lock_id.as_uuid(),
                        seat_ids: lock.seat_ids().iter().map(|s| s.as_uuid()).collect(),
                    });
                }
                tracing::info!(%lock_id, "Confirm on expired lock");
                return Err(BookingError::LockExpired(lock_id));
            }
            Err(e) => {
                tracing::debug!(%lock_id, error = %e, "Confirm rejected");
                return Err(e.into());
            }
        };

        let currency = self.locks.currency();
        let priced = self.seat_prices(&pinned).await.and_then(|seats| {
            PriceBreakdown::new(seats, snack_lines, currency).ok_or(BookingError::PriceOverflow)
        });
        let price = match priced {
            Ok(price) => price,
            Err(e) => {
                self.unpin(lock_id).await;
                return Err(e);
            }
        };

        let booking = Booking {
            id: BookingId::generate(),
            lock_id,
            session_id,
            showtime_id: pinned.showtime_id,
            guest,
            price,
            status: BookingStatus::PendingPayment,
            created_at: now,
            updated_at: now,
            payment_expires_at: now + self.policy.payment_timeout,
        };

        if let Err(e) = self.inventory.commit_booking(&booking).await {
            tracing::warn!(%lock_id, error = %e, "Inventory commit failed, releasing pin");
            self.unpin(lock_id).await;
            return Err(e.into());
        }

        if let Err(e) = table.complete_consume(lock_id, booking.id, Utc::now()).await {
            // The booking is durable but the lock could not be retired. Undo
            // the booking so neither side is left half-applied.
            tracing::error!(%lock_id, booking_id = %booking.id, error = %e, "Failed to retire lock after commit");
            if let Err(undo) = self
                .inventory
                .transition_booking(booking.id, BookingStatus::Cancelled, Utc::now())
                .await
            {
                tracing::error!(booking_id = %booking.id, error = %undo, "Failed to cancel orphaned booking");
            }
            self.unpin(lock_id).await;
            return Err(e.into());
        }

        self.stages.remove(&lock_id);
        tracing::info!(
            booking_id = %booking.id,
            %lock_id,
            showtime_id = %booking.showtime_id,
            guest = %booking.guest.email,
            total = booking.price.total,
            "Booking created, awaiting payment"
        );
        self.locks.publish(SeatEvent::SeatsBooked {
            showtime_id: booking.showtime_id.as_uuid(),
            lock_id: lock_id.as_uuid(),
            booking_id: booking.id.as_uuid(),
            seat_ids: booking.seat_ids().iter().map(|s| s.as_uuid()).collect(),
        });
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking, BookingError> {
        self.inventory
            .booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound(booking_id))
    }

    async fn unpin(&self, lock_id: LockId) {
        if let Err(e) = self.locks.table().abort_consume(lock_id).await {
            tracing::error!(%lock_id, error = %e, "Failed to release confirm pin");
        }
    }

    async fn price(&self, lock: &Lock, snacks: &[SnackOrder]) -> Result<PriceBreakdown, BookingError> {
        let snack_lines = self.snack_lines(snacks)?;
        let seats = self.seat_prices(lock).await?;
        PriceBreakdown::new(seats, snack_lines, self.locks.currency()).ok_or(BookingError::PriceOverflow)
    }

    async fn seat_prices(&self, lock: &Lock) -> Result<Vec<SeatPrice>, BookingError> {
        Ok(self
            .locks
            .quote(lock)
            .await?
            .into_iter()
            .map(|s| SeatPrice {
                seat_id: s.seat_id,
                ticket_type_id: s.ticket_type_id,
                unit_price: s.price,
            })
            .collect())
    }

    fn snack_lines(&self, snacks: &[SnackOrder]) -> Result<Vec<SnackLine>, BookingError> {
        snacks
            .iter()
            .map(|order| {
                if order.quantity == 0 || order.quantity > MAX_SNACK_QUANTITY {
                    return Err(BookingError::InvalidSnackQuantity {
                        snack_id: order.snack_id,
                        max: MAX_SNACK_QUANTITY,
                    });
                }
                let snack = self
                    .catalog
                    .snack(order.snack_id)
                    .map_err(|_| BookingError::SnackNotFound(order.snack_id))?;
                Ok(SnackLine {
                    snack_id: snack.snack_id,
                    name: snack.name.clone(),
                    quantity: order.quantity,
                    unit_price: snack.price,
                    line_total: snack
                        .price
                        .checked_mul(i64::from(order.quantity))
                        .ok_or(BookingError::PriceOverflow)?,
                })
            })
            .collect()
    }
}

/// A lock previewable right now: ACTIVE and not past its deadline.
fn ensure_live(lock: &Lock) -> Result<(), BookingError> {
    match lock.state {
        LockState::Active if lock.is_expired_at(Utc::now()) => Err(BookingError::LockExpired(lock.id)),
        LockState::Active => Ok(()),
        LockState::Expired => Err(BookingError::LockExpired(lock.id)),
        LockState::Confirming | LockState::Consumed => Err(BookingError::AlreadyConsumed(lock.id)),
        LockState::Released => Err(BookingError::LockNotFound(lock.id)),
    }
}

fn validate_guest(guest: &GuestInfo) -> Result<(), BookingError> {
    let email = guest.email.expose();
    if email.trim().is_empty() || !email.contains('@') {
        return Err(BookingError::InvalidGuest("a valid email is required".to_string()));
    }
    if guest.username.trim().is_empty() {
        return Err(BookingError::InvalidGuest("username is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use marquee_catalog::{MemoryInventory, PricingEngine, SeedConfig};
    use marquee_core::{Amount, SeatRecord, SeatSelection, ShowtimeId, TicketTypeId};
    use marquee_lock::{LockPolicy, MemoryLockTable};
    use marquee_shared::Masked;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Inventory whose commits can be made to fail on demand.
    #[derive(Default)]
    pub(crate) struct FlakyInventory {
        inner: MemoryInventory,
        pub fail_commits: AtomicBool,
    }

    #[async_trait]
    impl InventoryStore for FlakyInventory {
        async fn register_showtime(&self, showtime_id: ShowtimeId, seats: Vec<SeatRecord>) -> Result<(), InventoryError> {
            self.inner.register_showtime(showtime_id, seats).await
        }

        async fn seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatRecord>, InventoryError> {
            self.inner.seats(showtime_id).await
        }

        async fn commit_booking(&self, booking: &Booking) -> Result<(), InventoryError> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(InventoryError::Storage("connection reset".to_string()));
            }
            self.inner.commit_booking(booking).await
        }

        async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>, InventoryError> {
            self.inner.booking(booking_id).await
        }

        async fn transition_booking(
            &self,
            booking_id: BookingId,
            next: BookingStatus,
            now: DateTime<Utc>,
        ) -> Result<Booking, InventoryError> {
            self.inner.transition_booking(booking_id, next, now).await
        }

        async fn overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, InventoryError> {
            self.inner.overdue_bookings(now).await
        }
    }

    pub(crate) struct Fixture {
        pub orchestrator: BookingOrchestrator,
        pub locks: Arc<LockManager>,
        pub inventory: Arc<FlakyInventory>,
        pub catalog: Arc<Catalog>,
        pub showtime_id: ShowtimeId,
        pub seats: Vec<SeatRecord>,
        pub adult: TicketTypeId,
        pub student: TicketTypeId,
    }

    impl Fixture {
        pub fn pick(&self, labels: &[&str], ticket_type_id: TicketTypeId) -> Vec<SeatSelection> {
            labels
                .iter()
                .map(|label| SeatSelection {
                    seat_id: self.seats.iter().find(|s| s.label() == *label).unwrap().seat_id,
                    ticket_type_id,
                })
                .collect()
        }

        pub async fn lock(&self, session_id: SessionId, labels: &[&str]) -> LockId {
            self.locks
                .acquire(self.showtime_id, session_id, self.pick(labels, self.adult))
                .await
                .unwrap()
                .lock_id
        }

        pub async fn booked_count(&self) -> usize {
            self.inventory
                .seats(self.showtime_id)
                .await
                .unwrap()
                .iter()
                .filter(|s| s.is_booked())
                .count()
        }
    }

    pub(crate) async fn fixture(hold: chrono::Duration, payment_timeout: chrono::Duration) -> Fixture {
        fixture_with_seed(&SeedConfig::default(), hold, payment_timeout).await
    }

    pub(crate) async fn fixture_with_seed(seed: &SeedConfig, hold: chrono::Duration, payment_timeout: chrono::Duration) -> Fixture {
        let catalog = Arc::new(Catalog::from_seed(seed, Utc::now()));
        let showtime_id = catalog.showtimes().next().unwrap().showtime_id;
        let seats = catalog.seat_layout(showtime_id).unwrap();
        let ticket_types = catalog.ticket_types_for(showtime_id).unwrap();
        let (adult, student) = (ticket_types[0].ticket_type_id, ticket_types[1].ticket_type_id);

        let inventory = Arc::new(FlakyInventory::default());
        inventory.register_showtime(showtime_id, seats.clone()).await.unwrap();

        let locks = Arc::new(LockManager::new(
            Arc::new(MemoryLockTable::new()),
            inventory.clone(),
            catalog.clone(),
            Arc::new(PricingEngine::default()),
            LockPolicy { hold, ..LockPolicy::default() },
        ));
        let orchestrator = BookingOrchestrator::new(
            locks.clone(),
            inventory.clone(),
            catalog.clone(),
            BookingPolicy { payment_timeout },
        );
        Fixture {
            orchestrator,
            locks,
            inventory,
            catalog,
            showtime_id,
            seats,
            adult,
            student,
        }
    }

    pub(crate) fn guest() -> GuestInfo {
        GuestInfo {
            email: Masked::new("k6@example.com".to_string()),
            username: "k6user".to_string(),
            phone_number: Some("0900000000".to_string()),
        }
    }

    async fn standard() -> Fixture {
        fixture(chrono::Duration::seconds(300), chrono::Duration::seconds(900)).await
    }

    #[tokio::test]
    async fn test_preview_prices_seats_and_snacks() {
        let fx = standard().await;
        let session = SessionId::generate();
        let selection = {
            let mut s = fx.pick(&["A5"], fx.adult);
            s.extend(fx.pick(&["A6"], fx.student));
            s
        };
        let lock_id = fx.locks.acquire(fx.showtime_id, session, selection).await.unwrap().lock_id;
        let popcorn = fx.catalog.snacks()[0].snack_id;

        assert_eq!(fx.orchestrator.stage(lock_id).await, Some(CheckoutStage::Locked));
        let breakdown = fx
            .orchestrator
            .preview(lock_id, &[SnackOrder { snack_id: popcorn, quantity: 2 }])
            .await
            .unwrap();

        // 90k adult + 72k student, two 45k popcorns
        assert_eq!(breakdown.subtotal, 162_000);
        assert_eq!(breakdown.snacks_total, 90_000);
        assert_eq!(breakdown.total, 252_000);
        assert_eq!(fx.orchestrator.stage(lock_id).await, Some(CheckoutStage::Priced));

        // Repeatable and side-effect free on the lock.
        fx.orchestrator.preview(lock_id, &[]).await.unwrap();
        assert_eq!(fx.locks.lock(lock_id).await.unwrap().state, LockState::Active);
    }

    #[tokio::test]
    async fn test_preview_rejects_unknown_snack() {
        let fx = standard().await;
        let lock_id = fx.lock(SessionId::generate(), &["B5"]).await;
        let missing = SnackId::generate();
        assert_eq!(
            fx.orchestrator.preview(lock_id, &[SnackOrder { snack_id: missing, quantity: 1 }]).await,
            Err(BookingError::SnackNotFound(missing))
        );
        let popcorn = fx.catalog.snacks()[0].snack_id;
        assert_eq!(
            fx.orchestrator.preview(lock_id, &[SnackOrder { snack_id: popcorn, quantity: 0 }]).await,
            Err(BookingError::InvalidSnackQuantity { snack_id: popcorn, max: MAX_SNACK_QUANTITY })
        );
        assert_eq!(
            fx.orchestrator.preview(lock_id, &[SnackOrder { snack_id: popcorn, quantity: MAX_SNACK_QUANTITY + 1 }]).await,
            Err(BookingError::InvalidSnackQuantity { snack_id: popcorn, max: MAX_SNACK_QUANTITY })
        );
        assert!(fx
            .orchestrator
            .preview(lock_id, &[SnackOrder { snack_id: popcorn, quantity: MAX_SNACK_QUANTITY }])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_oversized_totals_are_rejected_and_unpin() {
        let mut seed = SeedConfig::default();
        seed.snacks[0].price = Amount::MAX / 4;
        let fx = fixture_with_seed(&seed, chrono::Duration::seconds(300), chrono::Duration::seconds(900)).await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["B5"]).await;
        let pricey = fx.catalog.snacks().iter().find(|s| s.price == Amount::MAX / 4).unwrap().snack_id;

        assert_eq!(
            fx.orchestrator.preview(lock_id, &[SnackOrder { snack_id: pricey, quantity: 5 }]).await,
            Err(BookingError::PriceOverflow)
        );
        // The line fits, the seat on top of it does not.
        let near_limit = [SnackOrder { snack_id: pricey, quantity: 4 }];
        assert_eq!(fx.orchestrator.preview(lock_id, &near_limit).await, Err(BookingError::PriceOverflow));
        assert_eq!(
            fx.orchestrator.confirm(lock_id, session, guest(), &near_limit).await,
            Err(BookingError::PriceOverflow)
        );

        assert_eq!(fx.locks.lock(lock_id).await.unwrap().state, LockState::Active);
        assert_eq!(fx.booked_count().await, 0);
    }

    #[tokio::test]
    async fn test_confirm_books_exactly_the_locked_seats() {
        let fx = standard().await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["C4", "C5", "C6"]).await;

        let booking = fx.orchestrator.confirm(lock_id, session, guest(), &[]).await.unwrap();
        assert_eq!(booking.status, BookingStatus::PendingPayment);
        assert_eq!(booking.seat_ids().len(), 3);
        assert_eq!(booking.final_price(), 270_000);
        assert_eq!(fx.booked_count().await, 3);

        let lock = fx.locks.lock(lock_id).await.unwrap();
        assert_eq!(lock.state, LockState::Consumed);
        assert_eq!(lock.booking_id, Some(booking.id));

        let availability = fx.locks.describe(fx.showtime_id, None).await.unwrap();
        assert_eq!(availability.booked_seats.len(), 3);
        assert!(availability.locked_seats.is_empty());
        assert_eq!(fx.orchestrator.get_booking(booking.id).await.unwrap().id, booking.id);
    }

    #[tokio::test]
    async fn test_second_confirm_fails() {
        let fx = standard().await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["D3"]).await;

        fx.orchestrator.confirm(lock_id, session, guest(), &[]).await.unwrap();
        assert_eq!(
            fx.orchestrator.confirm(lock_id, session, guest(), &[]).await,
            Err(BookingError::AlreadyConsumed(lock_id))
        );
        assert_eq!(fx.booked_count().await, 1);
    }

    #[tokio::test]
    async fn test_confirm_on_expired_lock() {
        let fx = fixture(chrono::Duration::milliseconds(50), chrono::Duration::seconds(900)).await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["E3", "E4"]).await;

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(
            fx.orchestrator.confirm(lock_id, session, guest(), &[]).await,
            Err(BookingError::LockExpired(lock_id))
        );
        assert_eq!(
            fx.orchestrator.preview(lock_id, &[]).await,
            Err(BookingError::LockExpired(lock_id))
        );
        assert_eq!(fx.booked_count().await, 0);
        let availability = fx.locks.describe(fx.showtime_id, None).await.unwrap();
        assert_eq!(availability.available_seats.len(), 100);
    }

    #[tokio::test]
    async fn test_confirm_after_release_is_not_found() {
        let fx = standard().await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["F5"]).await;
        fx.locks.release(lock_id, session).await.unwrap();

        assert_eq!(
            fx.orchestrator.confirm(lock_id, session, guest(), &[]).await,
            Err(BookingError::LockNotFound(lock_id))
        );
    }

    #[tokio::test]
    async fn test_confirm_checks_owner_and_guest() {
        let fx = standard().await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["G5"]).await;

        assert_eq!(
            fx.orchestrator.confirm(lock_id, SessionId::generate(), guest(), &[]).await,
            Err(BookingError::NotOwner(lock_id))
        );

        let mut bad = guest();
        bad.email = Masked::new("not-an-email".to_string());
        assert!(matches!(
            fx.orchestrator.confirm(lock_id, session, bad, &[]).await,
            Err(BookingError::InvalidGuest(_))
        ));
        assert_eq!(fx.locks.lock(lock_id).await.unwrap().state, LockState::Active);
    }

    #[tokio::test]
    async fn test_failed_commit_restores_lock() {
        let fx = standard().await;
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["H5", "H6"]).await;

        fx.inventory.fail_commits.store(true, Ordering::SeqCst);
        assert!(matches!(
            fx.orchestrator.confirm(lock_id, session, guest(), &[]).await,
            Err(BookingError::Storage(_))
        ));
        assert_eq!(fx.locks.lock(lock_id).await.unwrap().state, LockState::Active);
        assert_eq!(fx.booked_count().await, 0);

        fx.inventory.fail_commits.store(false, Ordering::SeqCst);
        let booking = fx.orchestrator.confirm(lock_id, session, guest(), &[]).await.unwrap();
        assert_eq!(booking.seat_ids().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_confirm_races_with_sweep() {
        let fx = Arc::new(fixture(chrono::Duration::milliseconds(200), chrono::Duration::seconds(900)).await);
        let session = SessionId::generate();
        let lock_id = fx.lock(session, &["B2", "B3"]).await;

        let sweeper = {
            let fx = fx.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    fx.locks.sweep_expired(Utc::now()).await.unwrap();
                    tokio::time::sleep(std::time::Duration::from_millis(15)).await;
                }
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let outcome = fx.orchestrator.confirm(lock_id, session, guest(), &[]).await;
        sweeper.await.unwrap();

        // Whichever side won, seats are either booked by this lock or free.
        match outcome {
            Ok(booking) => {
                assert_eq!(fx.booked_count().await, 2);
                assert_eq!(fx.locks.lock(lock_id).await.unwrap().booking_id, Some(booking.id));
            }
            Err(BookingError::LockExpired(_)) => assert_eq!(fx.booked_count().await, 0),
            Err(other) => panic!("unexpected {:?}", other),
        }
    }
}
