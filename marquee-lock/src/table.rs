use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use marquee_core::{
    BookingId, Lock, LockId, LockState, LockTable, LockTableError, SeatClaim, SeatId, SessionId, ShowtimeId,
};

#[derive(Debug, Default)]
struct Partition {
    seats: HashMap<SeatId, SeatClaim>,
    locks: HashMap<LockId, Lock>,
}

impl Partition {
    /// A held seat only counts while its lock still holds seats; a lock that
    /// has already been collected frees the seat too.
    fn is_taken(&self, seat_id: &SeatId, now: DateTime<Utc>) -> bool {
        match self.seats.get(seat_id) {
            None => false,
            Some(SeatClaim::Booked { .. }) => true,
            Some(SeatClaim::Held { lock_id, .. }) => self
                .locks
                .get(lock_id)
                .map(|l| l.holds_seats_at(now))
                .unwrap_or(false),
        }
    }

    fn free_seats(&mut self, lock_id: LockId) {
        let Some(lock) = self.locks.get(&lock_id) else {
            return;
        };
        for seat_id in lock.seat_ids() {
            if matches!(self.seats.get(&seat_id), Some(SeatClaim::Held { lock_id: holder, .. }) if *holder == lock_id) {
                self.seats.remove(&seat_id);
            }
        }
    }

    /// Closes a lock and drops its seat entries.
    fn close(&mut self, lock_id: LockId, state: LockState, now: DateTime<Utc>) -> Option<Lock> {
        self.free_seats(lock_id);
        let lock = self.locks.get_mut(&lock_id)?;
        lock.close(state, now);
        Some(lock.clone())
    }

    fn lock_mut(&mut self, lock_id: LockId) -> Result<&mut Lock, LockTableError> {
        self.locks.get_mut(&lock_id).ok_or(LockTableError::NotFound(lock_id))
    }
}

/// In-process lock table.
///
/// Every showtime is a partition behind its own mutex, which acts as the
/// sequencer for all claims on that showtime. Different showtimes never
/// contend. The mutex is never held across an await.
#[derive(Debug, Default)]
pub struct MemoryLockTable {
    partitions: DashMap<ShowtimeId, Arc<Mutex<Partition>>>,
    index: DashMap<LockId, ShowtimeId>,
}

impl MemoryLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, showtime_id: ShowtimeId) -> Option<Arc<Mutex<Partition>>> {
        self.partitions.get(&showtime_id).map(|p| p.value().clone())
    }

    fn partition_of(&self, lock_id: LockId) -> Result<Arc<Mutex<Partition>>, LockTableError> {
        let showtime_id = self
            .index
            .get(&lock_id)
            .map(|s| *s.value())
            .ok_or(LockTableError::NotFound(lock_id))?;
        self.partition(showtime_id).ok_or(LockTableError::NotFound(lock_id))
    }
}

#[async_trait]
impl LockTable for MemoryLockTable {
    async fn try_claim(&self, lock: &Lock) -> Result<(), LockTableError> {
        let now = lock.created_at;
        let partition = self.partitions.entry(lock.showtime_id).or_default().value().clone();
        let mut guard = partition.lock();

        if let Some(existing) = guard
            .locks
            .values()
            .find(|l| l.session_id == lock.session_id && l.holds_seats_at(now))
        {
            return Err(LockTableError::SessionBusy(existing.id));
        }

        let conflicts: Vec<SeatId> = lock
            .seat_ids()
            .into_iter()
            .filter(|id| guard.is_taken(id, now))
            .collect();
        if !conflicts.is_empty() {
            return Err(LockTableError::Conflict { seats: conflicts });
        }

        // Lazily expire whatever stale holders we are about to overwrite.
        let stale: Vec<LockId> = lock
            .seat_ids()
            .iter()
            .filter_map(|id| match guard.seats.get(id) {
                Some(SeatClaim::Held { lock_id, .. }) => Some(*lock_id),
                _ => None,
            })
            .collect();
        for lock_id in stale {
            if guard.locks.get(&lock_id).map(|l| l.state) == Some(LockState::Active) {
                guard.close(lock_id, LockState::Expired, now);
            }
        }

        for seat in &lock.seats {
            guard.seats.insert(
                seat.seat_id,
                SeatClaim::Held {
                    lock_id: lock.id,
                    session_id: lock.session_id,
                    expires_at: lock.expires_at,
                },
            );
        }
        guard.locks.insert(lock.id, lock.clone());
        self.index.insert(lock.id, lock.showtime_id);
        Ok(())
    }

    async fn get(&self, lock_id: LockId) -> Result<Option<Lock>, LockTableError> {
        let partition = match self.partition_of(lock_id) {
            Ok(p) => p,
            Err(_) => return Ok(None),
        };
        let guard = partition.lock();
        Ok(guard.locks.get(&lock_id).cloned())
    }

    async fn release(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let partition = self.partition_of(lock_id)?;
        let mut guard = partition.lock();
        let lock = guard.lock_mut(lock_id)?;

        match lock.state {
            LockState::Active if lock.is_expired_at(now) => {
                guard.close(lock_id, LockState::Expired, now);
                Err(LockTableError::Expired(lock_id))
            }
            LockState::Active => guard
                .close(lock_id, LockState::Released, now)
                .ok_or(LockTableError::NotFound(lock_id)),
            LockState::Confirming => Err(LockTableError::AlreadyConsumed(lock_id)),
            _ => Err(LockTableError::NotFound(lock_id)),
        }
    }

    async fn extend(&self, lock_id: LockId, ttl: chrono::Duration, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let partition = self.partition_of(lock_id)?;
        let mut guard = partition.lock();
        let lock = guard.lock_mut(lock_id)?;

        match lock.state {
            LockState::Active if lock.is_expired_at(now) => {
                guard.close(lock_id, LockState::Expired, now);
                Err(LockTableError::Expired(lock_id))
            }
            LockState::Active => {
                lock.expires_at = now + ttl;
                let extended = lock.clone();
                for seat_id in extended.seat_ids() {
                    if let Some(SeatClaim::Held { expires_at, .. }) = guard.seats.get_mut(&seat_id) {
                        *expires_at = extended.expires_at;
                    }
                }
                Ok(extended)
            }
            LockState::Expired => Err(LockTableError::Expired(lock_id)),
            LockState::Confirming | LockState::Consumed => Err(LockTableError::AlreadyConsumed(lock_id)),
            LockState::Released => Err(LockTableError::NotFound(lock_id)),
        }
    }

    async fn sweep_expired(&self, now: DateTime<Utc>, grace: chrono::Duration) -> Result<Vec<Lock>, LockTableError> {
        let partitions: Vec<Arc<Mutex<Partition>>> =
            self.partitions.iter().map(|p| p.value().clone()).collect();

        let mut expired = Vec::new();
        for partition in partitions {
            let mut guard = partition.lock();

            let due: Vec<LockId> = guard
                .locks
                .values()
                .filter(|l| l.state == LockState::Active && l.is_expired_at(now))
                .map(|l| l.id)
                .collect();
            for lock_id in due {
                if let Some(lock) = guard.close(lock_id, LockState::Expired, now) {
                    expired.push(lock);
                }
            }

            let collectable: Vec<LockId> = guard
                .locks
                .values()
                .filter(|l| l.state.is_terminal() && l.closed_at.map(|t| t + grace < now).unwrap_or(false))
                .map(|l| l.id)
                .collect();
            for lock_id in collectable {
                guard.locks.remove(&lock_id);
                self.index.remove(&lock_id);
            }
        }
        Ok(expired)
    }

    async fn active_for_session(
        &self,
        showtime_id: ShowtimeId,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<Lock>, LockTableError> {
        let Some(partition) = self.partition(showtime_id) else {
            return Ok(None);
        };
        let guard = partition.lock();
        Ok(guard
            .locks
            .values()
            .find(|l| l.session_id == session_id && l.state == LockState::Active && !l.is_expired_at(now))
            .cloned())
    }

    async fn claims(&self, showtime_id: ShowtimeId, now: DateTime<Utc>) -> Result<HashMap<SeatId, SeatClaim>, LockTableError> {
        let Some(partition) = self.partition(showtime_id) else {
            return Ok(HashMap::new());
        };
        let guard = partition.lock();
        Ok(guard
            .seats
            .iter()
            .filter(|(id, _)| guard.is_taken(id, now))
            .map(|(id, claim)| (*id, *claim))
            .collect())
    }

    async fn begin_consume(&self, lock_id: LockId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let partition = self.partition_of(lock_id)?;
        let mut guard = partition.lock();
        let lock = guard.lock_mut(lock_id)?;

        match lock.state {
            LockState::Active if lock.is_expired_at(now) => {
                guard.close(lock_id, LockState::Expired, now);
                Err(LockTableError::Expired(lock_id))
            }
            LockState::Active => {
                lock.state = LockState::Confirming;
                Ok(lock.clone())
            }
            LockState::Expired => Err(LockTableError::Expired(lock_id)),
            LockState::Confirming | LockState::Consumed => Err(LockTableError::AlreadyConsumed(lock_id)),
            LockState::Released => Err(LockTableError::NotFound(lock_id)),
        }
    }

    async fn complete_consume(&self, lock_id: LockId, booking_id: BookingId, now: DateTime<Utc>) -> Result<Lock, LockTableError> {
        let partition = self.partition_of(lock_id)?;
        let mut guard = partition.lock();
        let lock = guard.lock_mut(lock_id)?;
        if lock.state != LockState::Confirming {
            return Err(LockTableError::AlreadyConsumed(lock_id));
        }

        lock.booking_id = Some(booking_id);
        lock.close(LockState::Consumed, now);
        let consumed = lock.clone();
        for seat_id in consumed.seat_ids() {
            guard.seats.insert(seat_id, SeatClaim::Booked { booking_id });
        }
        Ok(consumed)
    }

    async fn abort_consume(&self, lock_id: LockId) -> Result<(), LockTableError> {
        let partition = self.partition_of(lock_id)?;
        let mut guard = partition.lock();
        let lock = guard.lock_mut(lock_id)?;
        if lock.state != LockState::Confirming {
            return Err(LockTableError::NotFound(lock_id));
        }
        lock.state = LockState::Active;
        Ok(())
    }

    async fn unbook(&self, showtime_id: ShowtimeId, seats: &[SeatId], booking_id: BookingId) -> Result<(), LockTableError> {
        let Some(partition) = self.partition(showtime_id) else {
            return Ok(());
        };
        let mut guard = partition.lock();
        for seat_id in seats {
            if matches!(guard.seats.get(seat_id), Some(SeatClaim::Booked { booking_id: b }) if *b == booking_id) {
                guard.seats.remove(seat_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_core::{SeatSelection, TicketTypeId};

    fn selection(seats: &[SeatId]) -> Vec<SeatSelection> {
        seats
            .iter()
            .map(|id| SeatSelection { seat_id: *id, ticket_type_id: TicketTypeId::generate() })
            .collect()
    }

    fn lock_at(showtime_id: ShowtimeId, seats: &[SeatId], ttl_secs: i64, now: DateTime<Utc>) -> Lock {
        Lock::new(SessionId::generate(), showtime_id, selection(seats), chrono::Duration::seconds(ttl_secs), now)
    }

    fn seats(n: usize) -> Vec<SeatId> {
        (0..n).map(|_| SeatId::generate()).collect()
    }

    #[tokio::test]
    async fn test_claim_is_all_or_nothing() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(3);
        let now = Utc::now();

        table.try_claim(&lock_at(showtime, &ids[..2], 300, now)).await.unwrap();

        let overlapping = lock_at(showtime, &ids[1..], 300, now);
        match table.try_claim(&overlapping).await {
            Err(LockTableError::Conflict { seats }) => assert_eq!(seats, vec![ids[1]]),
            other => panic!("expected conflict, got {:?}", other),
        }

        // The free seat of the rejected claim must not have been taken.
        let claims = table.claims(showtime, now).await.unwrap();
        assert_eq!(claims.len(), 2);
        assert!(!claims.contains_key(&ids[2]));
        assert!(table.get(overlapping.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_claim_counts_as_free() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(1);
        let now = Utc::now();

        let first = lock_at(showtime, &ids, 5, now);
        table.try_claim(&first).await.unwrap();

        let later = now + chrono::Duration::seconds(6);
        let second = lock_at(showtime, &ids, 300, later);
        table.try_claim(&second).await.unwrap();

        assert_eq!(table.get(first.id).await.unwrap().unwrap().state, LockState::Expired);
        match table.claims(showtime, later).await.unwrap().get(&ids[0]) {
            Some(SeatClaim::Held { lock_id, .. }) => assert_eq!(*lock_id, second.id),
            other => panic!("unexpected claim {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_live_lock_per_session_and_showtime() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(2);
        let now = Utc::now();

        let first = lock_at(showtime, &ids[..1], 300, now);
        table.try_claim(&first).await.unwrap();

        let mut second = lock_at(showtime, &ids[1..], 300, now);
        second.session_id = first.session_id;
        assert_eq!(table.try_claim(&second).await, Err(LockTableError::SessionBusy(first.id)));

        // Another showtime is fine.
        let mut elsewhere = lock_at(ShowtimeId::generate(), &ids[1..], 300, now);
        elsewhere.session_id = first.session_id;
        table.try_claim(&elsewhere).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_frees_seats_and_is_idempotent() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(2);
        let now = Utc::now();
        let lock = lock_at(showtime, &ids, 300, now);
        table.try_claim(&lock).await.unwrap();

        let released = table.release(lock.id, now).await.unwrap();
        assert_eq!(released.state, LockState::Released);
        assert!(table.claims(showtime, now).await.unwrap().is_empty());

        assert_eq!(table.release(lock.id, now).await, Err(LockTableError::NotFound(lock.id)));

        let unknown = LockId::generate();
        assert_eq!(table.release(unknown, now).await, Err(LockTableError::NotFound(unknown)));
    }

    #[tokio::test]
    async fn test_sweep_expires_and_collects() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(2);
        let now = Utc::now();
        let short = lock_at(showtime, &ids[..1], 5, now);
        let long = lock_at(showtime, &ids[1..], 300, now);
        table.try_claim(&short).await.unwrap();
        table.try_claim(&long).await.unwrap();

        let grace = chrono::Duration::seconds(60);
        let swept = table.sweep_expired(now + chrono::Duration::seconds(6), grace).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, short.id);
        assert_eq!(swept[0].state, LockState::Expired);

        // Second sweep reports nothing new.
        assert!(table.sweep_expired(now + chrono::Duration::seconds(7), grace).await.unwrap().is_empty());

        // Past the grace period the terminal lock is gone entirely.
        table.sweep_expired(now + chrono::Duration::seconds(100), grace).await.unwrap();
        assert!(table.get(short.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirming_lock_survives_sweep() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let ids = seats(2);
        let now = Utc::now();
        let lock = lock_at(showtime, &ids, 5, now);
        table.try_claim(&lock).await.unwrap();

        table.begin_consume(lock.id, now).await.unwrap();
        let later = now + chrono::Duration::seconds(30);
        assert!(table.sweep_expired(later, chrono::Duration::seconds(60)).await.unwrap().is_empty());
        assert_eq!(table.claims(showtime, later).await.unwrap().len(), 2);

        let booking_id = BookingId::generate();
        let consumed = table.complete_consume(lock.id, booking_id, later).await.unwrap();
        assert_eq!(consumed.state, LockState::Consumed);
        assert_eq!(consumed.booking_id, Some(booking_id));

        // Tombstones outlive the lock itself.
        table.sweep_expired(later + chrono::Duration::seconds(120), chrono::Duration::seconds(60)).await.unwrap();
        let claims = table.claims(showtime, later + chrono::Duration::seconds(120)).await.unwrap();
        assert!(claims.values().all(|c| *c == SeatClaim::Booked { booking_id }));
        assert!(matches!(
            table.try_claim(&lock_at(showtime, &ids[..1], 300, later)).await,
            Err(LockTableError::Conflict { .. })
        ));

        table.unbook(showtime, &ids, booking_id).await.unwrap();
        table.try_claim(&lock_at(showtime, &ids[..1], 300, later)).await.unwrap();
    }

    #[tokio::test]
    async fn test_consume_rejects_expired_and_repeated() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let now = Utc::now();

        let stale = lock_at(showtime, &seats(1), 5, now);
        table.try_claim(&stale).await.unwrap();
        let later = now + chrono::Duration::seconds(6);
        assert_eq!(table.begin_consume(stale.id, later).await, Err(LockTableError::Expired(stale.id)));
        assert!(table.claims(showtime, later).await.unwrap().is_empty());

        let fresh = lock_at(showtime, &seats(1), 300, now);
        table.try_claim(&fresh).await.unwrap();
        table.begin_consume(fresh.id, now).await.unwrap();
        assert_eq!(table.begin_consume(fresh.id, now).await, Err(LockTableError::AlreadyConsumed(fresh.id)));
        assert_eq!(table.release(fresh.id, now).await, Err(LockTableError::AlreadyConsumed(fresh.id)));

        table.abort_consume(fresh.id).await.unwrap();
        assert_eq!(table.get(fresh.id).await.unwrap().unwrap().state, LockState::Active);
        table.release(fresh.id, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_extend_pushes_deadline() {
        let table = MemoryLockTable::new();
        let showtime = ShowtimeId::generate();
        let now = Utc::now();
        let lock = lock_at(showtime, &seats(1), 10, now);
        table.try_claim(&lock).await.unwrap();

        let at = now + chrono::Duration::seconds(8);
        let extended = table.extend(lock.id, chrono::Duration::seconds(10), at).await.unwrap();
        assert_eq!(extended.expires_at, at + chrono::Duration::seconds(10));
        assert!(table.sweep_expired(now + chrono::Duration::seconds(12), chrono::Duration::seconds(60)).await.unwrap().is_empty());

        let too_late = now + chrono::Duration::seconds(30);
        assert_eq!(
            table.extend(lock.id, chrono::Duration::seconds(10), too_late).await,
            Err(LockTableError::Expired(lock.id))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_on_one_seat() {
        let table = Arc::new(MemoryLockTable::new());
        let showtime = ShowtimeId::generate();
        let ids = seats(2);
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..64 {
            let table = table.clone();
            // Every claim shares ids[0]; half of them also want ids[1].
            let wanted = if i % 2 == 0 { ids.clone() } else { ids[..1].to_vec() };
            handles.push(tokio::spawn(async move {
                table.try_claim(&lock_at(showtime, &wanted, 300, now)).await.is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
