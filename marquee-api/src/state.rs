use std::sync::Arc;

use marquee_booking::{BookingOrchestrator, BookingPolicy};
use marquee_catalog::{Catalog, PricingEngine};
use marquee_core::{InventoryError, InventoryStore, LockTable};
use marquee_lock::{ExpiryReaper, LockManager, LockPolicy};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub pricing: Arc<PricingEngine>,
    pub locks: Arc<LockManager>,
    pub bookings: Arc<BookingOrchestrator>,
}

impl AppState {
    pub fn new(
        catalog: Arc<Catalog>,
        pricing: Arc<PricingEngine>,
        table: Arc<dyn LockTable>,
        inventory: Arc<dyn InventoryStore>,
        lock_policy: LockPolicy,
        booking_policy: BookingPolicy,
    ) -> Self {
        let locks = Arc::new(LockManager::new(
            table,
            inventory.clone(),
            catalog.clone(),
            pricing.clone(),
            lock_policy,
        ));
        let bookings = Arc::new(BookingOrchestrator::new(
            locks.clone(),
            inventory,
            catalog.clone(),
            booking_policy,
        ));
        Self {
            catalog,
            pricing,
            locks,
            bookings,
        }
    }

    /// Loads every catalog showtime's seat map into the inventory. Seats
    /// that already exist keep their booking state.
    pub async fn seed_inventory(&self, inventory: &dyn InventoryStore) -> Result<usize, InventoryError> {
        let mut seeded = 0;
        for showtime in self.catalog.showtimes() {
            let seats = self
                .catalog
                .seat_layout(showtime.showtime_id)
                .map_err(|e| InventoryError::Storage(e.to_string()))?;
            seeded += seats.len();
            inventory.register_showtime(showtime.showtime_id, seats).await?;
        }
        Ok(seeded)
    }

    /// Reaper covering lock expiry and unpaid bookings.
    pub fn reaper(&self, interval: std::time::Duration) -> ExpiryReaper {
        ExpiryReaper::new(interval)
            .with_sweep(self.locks.clone())
            .with_sweep(self.bookings.clone())
    }
}
