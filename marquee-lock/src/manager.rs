use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

use marquee_catalog::{Catalog, CatalogError, PricingEngine};
use marquee_core::{
    Amount, InventoryError, InventoryStore, Lock, LockId, LockState, LockTable, LockTableError, SeatClaim, SeatId,
    SeatRecord, SeatSelection, SeatStatus, SeatType, SessionId, ShowtimeId, TicketTypeId,
};
use marquee_shared::SeatEvent;

use crate::reaper::Sweep;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LockError {
    #[error("At least one seat must be selected")]
    EmptySelection,

    #[error("Seat {0} is selected more than once")]
    DuplicateSeat(SeatId),

    #[error("Cannot lock more than {max} seats at once")]
    TooManySeats { max: usize },

    #[error("Showtime not found: {0}")]
    ShowtimeNotFound(ShowtimeId),

    #[error("Seat {0} does not belong to this showtime")]
    InvalidSeat(SeatId),

    #[error("Ticket type {0} is not offered for this showtime")]
    InvalidTicketType(TicketTypeId),

    #[error("Seats not available: {seats:?}")]
    SeatUnavailable { seats: Vec<SeatId> },

    #[error("Session already holds lock {0} for this showtime")]
    SessionBusy(LockId),

    #[error("Lock not found: {0}")]
    NotFound(LockId),

    #[error("No active lock for showtime {0}")]
    NoActiveLock(ShowtimeId),

    #[error("Lock {0} belongs to another session")]
    NotOwner(LockId),

    #[error("Lock expired: {0}")]
    Expired(LockId),

    #[error("Lock already consumed: {0}")]
    AlreadyConsumed(LockId),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LockTableError> for LockError {
    fn from(err: LockTableError) -> Self {
        match err {
            LockTableError::Conflict { seats } => LockError::SeatUnavailable { seats },
            LockTableError::SessionBusy(id) => LockError::SessionBusy(id),
            LockTableError::NotFound(id) => LockError::NotFound(id),
            LockTableError::Expired(id) => LockError::Expired(id),
            LockTableError::AlreadyConsumed(id) => LockError::AlreadyConsumed(id),
            LockTableError::Storage(msg) => LockError::Storage(msg),
        }
    }
}

impl From<InventoryError> for LockError {
    fn from(err: InventoryError) -> Self {
        match err {
            InventoryError::ShowtimeNotFound(id) => LockError::ShowtimeNotFound(id),
            InventoryError::SeatsUnavailable { seats } => LockError::SeatUnavailable { seats },
            other => LockError::Storage(other.to_string()),
        }
    }
}

impl From<CatalogError> for LockError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::ShowtimeNotFound(id) => LockError::ShowtimeNotFound(id),
            CatalogError::TicketTypeNotOffered { ticket_type_id, .. } => LockError::InvalidTicketType(ticket_type_id),
            other => LockError::Storage(other.to_string()),
        }
    }
}

/// Hold parameters shared by every lock.
#[derive(Debug, Clone)]
pub struct LockPolicy {
    pub hold: chrono::Duration,
    pub max_seats: usize,
    /// How long terminal locks stay readable before the sweep drops them.
    pub grace: chrono::Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            hold: chrono::Duration::seconds(300),
            max_seats: 8,
            grace: chrono::Duration::seconds(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockedSeat {
    #[serde(rename = "showtimeSeatId")]
    pub seat_id: SeatId,
    pub row_label: String,
    pub seat_number: u16,
    pub seat_type: SeatType,
    pub ticket_type_id: TicketTypeId,
    pub price: Amount,
}

/// What a client gets back for a live lock.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHandle {
    pub lock_id: LockId,
    pub showtime_id: ShowtimeId,
    pub state: LockState,
    pub locked_seats: Vec<LockedSeat>,
    pub total_price: Amount,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLockInfo {
    pub lock_id: LockId,
    pub my_locked_seats: Vec<SeatId>,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub showtime_id: ShowtimeId,
    pub available_seats: Vec<SeatId>,
    pub locked_seats: Vec<SeatId>,
    pub booked_seats: Vec<SeatId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_lock_info: Option<SessionLockInfo>,
}

/// A seat as shown on the browsing endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    #[serde(rename = "showtimeSeatId")]
    pub seat_id: SeatId,
    pub row_label: String,
    pub seat_number: u16,
    pub seat_type: SeatType,
    pub status: SeatStatus,
    pub price: Amount,
}

/// Acquires, releases and extends seat locks and reports availability.
///
/// All writes to seat holds go through the lock table; the inventory is only
/// read here.
pub struct LockManager {
    table: Arc<dyn LockTable>,
    inventory: Arc<dyn InventoryStore>,
    catalog: Arc<Catalog>,
    pricing: Arc<PricingEngine>,
    policy: LockPolicy,
    events: broadcast::Sender<SeatEvent>,
}

impl LockManager {
    pub fn new(
        table: Arc<dyn LockTable>,
        inventory: Arc<dyn InventoryStore>,
        catalog: Arc<Catalog>,
        pricing: Arc<PricingEngine>,
        policy: LockPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            table,
            inventory,
            catalog,
            pricing,
            policy,
            events,
        }
    }

    pub fn table(&self) -> &Arc<dyn LockTable> {
        &self.table
    }

    pub fn policy(&self) -> &LockPolicy {
        &self.policy
    }

    pub fn currency(&self) -> &str {
        self.pricing.currency()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeatEvent> {
        self.events.subscribe()
    }

    /// Fans an event out to stream subscribers. Nobody listening is fine.
    pub fn publish(&self, event: SeatEvent) {
        let _ = self.events.send(event);
    }

    pub async fn acquire(
        &self,
        showtime_id: ShowtimeId,
        session_id: SessionId,
        seats: Vec<SeatSelection>,
    ) -> Result<LockHandle, LockError> {
        if seats.is_empty() {
            return Err(LockError::EmptySelection);
        }
        let mut seen = HashSet::with_capacity(seats.len());
        for selection in &seats {
            if !seen.insert(selection.seat_id) {
                return Err(LockError::DuplicateSeat(selection.seat_id));
            }
        }
        if seats.len() > self.policy.max_seats {
            return Err(LockError::TooManySeats { max: self.policy.max_seats });
        }

        self.catalog.showtime(showtime_id)?;
        for selection in &seats {
            self.catalog.ticket_type_for(showtime_id, selection.ticket_type_id)?;
        }

        // Cheap pre-check; the lock table's tombstones close the race with
        // a concurrent confirm.
        let records = self.seat_map(showtime_id).await?;
        let mut booked = Vec::new();
        for selection in &seats {
            match records.get(&selection.seat_id) {
                None => return Err(LockError::InvalidSeat(selection.seat_id)),
                Some(seat) if seat.is_booked() => booked.push(selection.seat_id),
                Some(_) => {}
            }
        }
        if !booked.is_empty() {
            tracing::debug!(%showtime_id, ?booked, "Seats already booked");
            return Err(LockError::SeatUnavailable { seats: booked });
        }

        let now = Utc::now();
        self.hand_over_session(showtime_id, session_id, now).await?;

        let lock = Lock::new(session_id, showtime_id, seats, self.policy.hold, now);
        if let Err(e) = self.table.try_claim(&lock).await {
            tracing::debug!(%showtime_id, %session_id, error = %e, "Seat claim rejected");
            return Err(e.into());
        }

        tracing::info!(
            lock_id = %lock.id,
            %showtime_id,
            %session_id,
            seats = lock.seats.len(),
            expires_at = %lock.expires_at,
            "Seats locked"
        );
        self.publish(SeatEvent::SeatsLocked {
            showtime_id: showtime_id.as_uuid(),
            lock_id: lock.id.as_uuid(),
            seat_ids: lock.seat_ids().iter().map(|s| s.as_uuid()).collect(),
            expires_at: lock.expires_at.timestamp(),
        });

        self.handle_from(&lock, &records, now)
    }

    /// Looks a lock up, whatever its state.
    pub async fn lock(&self, lock_id: LockId) -> Result<Lock, LockError> {
        self.table.get(lock_id).await?.ok_or(LockError::NotFound(lock_id))
    }

    pub async fn release(&self, lock_id: LockId, session_id: SessionId) -> Result<Lock, LockError> {
        let lock = self.lock(lock_id).await?;
        if lock.session_id != session_id {
            tracing::warn!(%lock_id, %session_id, "Release attempted by non-owner");
            return Err(LockError::NotOwner(lock_id));
        }

        match self.table.release(lock_id, Utc::now()).await {
            Ok(released) => {
                tracing::info!(%lock_id, showtime_id = %released.showtime_id, "Lock released");
                self.publish_released(&released);
                Ok(released)
            }
            Err(LockTableError::Expired(_)) => {
                self.publish_expired(&lock);
                Err(LockError::NotFound(lock_id))
            }
            Err(e) => {
                tracing::debug!(%lock_id, error = %e, "Release was a no-op");
                Err(e.into())
            }
        }
    }

    /// A session checks out one showtime at a time. A live lock on the
    /// target showtime is refused; live locks on any other showtime are
    /// given up before the new claim.
    async fn hand_over_session(&self, showtime_id: ShowtimeId, session_id: SessionId, now: DateTime<Utc>) -> Result<(), LockError> {
        if let Some(current) = self.table.active_for_session(showtime_id, session_id, now).await? {
            tracing::debug!(%showtime_id, %session_id, lock_id = %current.id, "Session already checking out this showtime");
            return Err(LockError::SessionBusy(current.id));
        }

        let others: Vec<ShowtimeId> = self
            .catalog
            .showtimes()
            .map(|s| s.showtime_id)
            .filter(|id| *id != showtime_id)
            .collect();
        for other in others {
            let Some(stale) = self.table.active_for_session(other, session_id, now).await? else {
                continue;
            };
            match self.table.release(stale.id, now).await {
                Ok(released) => {
                    tracing::warn!(
                        lock_id = %released.id,
                        showtime_id = %other,
                        %session_id,
                        "Released lock held on another showtime"
                    );
                    self.publish_released(&released);
                }
                Err(LockTableError::Storage(msg)) => return Err(LockError::Storage(msg)),
                Err(e) => tracing::debug!(lock_id = %stale.id, error = %e, "Lock on another showtime already closed"),
            }
        }
        Ok(())
    }

    pub async fn release_for_showtime(&self, showtime_id: ShowtimeId, session_id: SessionId) -> Result<Lock, LockError> {
        let lock = self
            .table
            .active_for_session(showtime_id, session_id, Utc::now())
            .await?
            .ok_or(LockError::NoActiveLock(showtime_id))?;
        self.release(lock.id, session_id).await
    }

    pub async fn extend(&self, lock_id: LockId, session_id: SessionId) -> Result<LockHandle, LockError> {
        let lock = self.lock(lock_id).await?;
        if lock.session_id != session_id {
            return Err(LockError::NotOwner(lock_id));
        }

        let now = Utc::now();
        let extended = match self.table.extend(lock_id, self.policy.hold, now).await {
            Ok(extended) => extended,
            Err(LockTableError::Expired(id)) => {
                if lock.state == LockState::Active {
                    self.publish_expired(&lock);
                }
                return Err(LockError::Expired(id));
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(%lock_id, expires_at = %extended.expires_at, "Lock extended");

        let records = self.seat_map(extended.showtime_id).await?;
        self.handle_from(&extended, &records, now)
    }

    /// The live view of a lock owned by `session_id`.
    pub async fn handle(&self, lock_id: LockId, session_id: SessionId) -> Result<LockHandle, LockError> {
        let lock = self.lock(lock_id).await?;
        if lock.session_id != session_id {
            return Err(LockError::NotOwner(lock_id));
        }
        let records = self.seat_map(lock.showtime_id).await?;
        self.handle_from(&lock, &records, Utc::now())
    }

    /// Prices every seat of a lock.
    pub async fn quote(&self, lock: &Lock) -> Result<Vec<LockedSeat>, LockError> {
        let records = self.seat_map(lock.showtime_id).await?;
        self.price_seats(lock, &records)
    }

    /// Seat partitions of a showtime, cross-referencing the inventory with
    /// the live lock table contents.
    pub async fn describe(&self, showtime_id: ShowtimeId, session_id: Option<SessionId>) -> Result<Availability, LockError> {
        self.catalog.showtime(showtime_id)?;
        let now = Utc::now();
        let seats = self.inventory.seats(showtime_id).await?;
        let claims = self.table.claims(showtime_id, now).await?;

        let mut availability = Availability {
            showtime_id,
            available_seats: Vec::new(),
            locked_seats: Vec::new(),
            booked_seats: Vec::new(),
            session_lock_info: None,
        };
        for seat in &seats {
            match status_of(seat, claims.get(&seat.seat_id)) {
                SeatStatus::Available => availability.available_seats.push(seat.seat_id),
                SeatStatus::Locked => availability.locked_seats.push(seat.seat_id),
                SeatStatus::Booked => availability.booked_seats.push(seat.seat_id),
            }
        }

        if let Some(session_id) = session_id {
            if let Some(lock) = self.table.active_for_session(showtime_id, session_id, now).await? {
                availability.session_lock_info = Some(SessionLockInfo {
                    lock_id: lock.id,
                    my_locked_seats: lock.seat_ids(),
                    remaining_seconds: lock.remaining_seconds(now),
                });
            }
        }
        Ok(availability)
    }

    /// Seats neither locked nor booked, with their reference price.
    pub async fn available_seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatView>, LockError> {
        self.catalog.showtime(showtime_id)?;
        let seats = self.inventory.seats(showtime_id).await?;
        let claims = self.table.claims(showtime_id, Utc::now()).await?;

        Ok(seats
            .into_iter()
            .filter(|seat| status_of(seat, claims.get(&seat.seat_id)) == SeatStatus::Available)
            .map(|seat| SeatView {
                price: self.pricing.seat_price(seat.seat_type),
                seat_id: seat.seat_id,
                row_label: seat.row_label,
                seat_number: seat.seat_number,
                seat_type: seat.seat_type,
                status: SeatStatus::Available,
            })
            .collect())
    }

    /// Expires overdue locks, collects old terminal ones and tells stream
    /// subscribers which seats came back.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<Lock>, LockError> {
        let expired = self.table.sweep_expired(now, self.policy.grace).await?;
        for lock in &expired {
            tracing::info!(lock_id = %lock.id, showtime_id = %lock.showtime_id, "Lock expired");
            self.publish_expired(lock);
        }
        Ok(expired)
    }

    fn publish_released(&self, lock: &Lock) {
        self.publish(SeatEvent::SeatsReleased {
            showtime_id: lock.showtime_id.as_uuid(),
            lock_id: lock.id.as_uuid(),
            seat_ids: lock.seat_ids().iter().map(|s| s.as_uuid()).collect(),
        });
    }

    fn publish_expired(&self, lock: &Lock) {
        self.publish(SeatEvent::SeatsExpired {
            showtime_id: lock.showtime_id.as_uuid(),
            lock_id: lock.id.as_uuid(),
            seat_ids: lock.seat_ids().iter().map(|s| s.as_uuid()).collect(),
        });
    }

    async fn seat_map(&self, showtime_id: ShowtimeId) -> Result<HashMap<SeatId, SeatRecord>, LockError> {
        Ok(self
            .inventory
            .seats(showtime_id)
            .await?
            .into_iter()
            .map(|s| (s.seat_id, s))
            .collect())
    }

    fn price_seats(&self, lock: &Lock, records: &HashMap<SeatId, SeatRecord>) -> Result<Vec<LockedSeat>, LockError> {
        lock.seats
            .iter()
            .map(|selection| {
                let seat = records
                    .get(&selection.seat_id)
                    .ok_or(LockError::InvalidSeat(selection.seat_id))?;
                let ticket_type = self.catalog.ticket_type_for(lock.showtime_id, selection.ticket_type_id)?;
                Ok(LockedSeat {
                    seat_id: seat.seat_id,
                    row_label: seat.row_label.clone(),
                    seat_number: seat.seat_number,
                    seat_type: seat.seat_type,
                    ticket_type_id: selection.ticket_type_id,
                    price: self.pricing.unit_price(seat.seat_type, &ticket_type.modifier),
                })
            })
            .collect()
    }

    fn handle_from(&self, lock: &Lock, records: &HashMap<SeatId, SeatRecord>, now: DateTime<Utc>) -> Result<LockHandle, LockError> {
        let locked_seats = self.price_seats(lock, records)?;
        Ok(LockHandle {
            lock_id: lock.id,
            showtime_id: lock.showtime_id,
            state: lock.state,
            total_price: locked_seats.iter().map(|s| s.price).sum(),
            locked_seats,
            expires_at: lock.expires_at,
            remaining_seconds: lock.remaining_seconds(now),
        })
    }
}

fn status_of(seat: &SeatRecord, claim: Option<&SeatClaim>) -> SeatStatus {
    if seat.is_booked() {
        return SeatStatus::Booked;
    }
    match claim {
        Some(SeatClaim::Booked { .. }) => SeatStatus::Booked,
        Some(SeatClaim::Held { .. }) => SeatStatus::Locked,
        None => SeatStatus::Available,
    }
}

#[async_trait]
impl Sweep for LockManager {
    fn name(&self) -> &'static str {
        "seat_locks"
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, String> {
        self.sweep_expired(now).await.map(|l| l.len()).map_err(|e| e.to_string())
    }
}
