use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use marquee_core::{
    Booking, BookingId, BookingStatus, GuestInfo, InventoryError, InventoryStore, PriceBreakdown, SeatId, SeatRecord,
    SeatType, ShowtimeId,
};
use marquee_shared::Masked;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

fn storage(e: sqlx::Error) -> InventoryError {
    InventoryError::Storage(e.to_string())
}

/// Seat inventory and bookings in Postgres.
///
/// A booking commit is a single transaction whose seat update only matches
/// unbooked rows, so the database is the last word on double booking even
/// if the lock table were wrong.
#[derive(Clone)]
pub struct PgInventoryStore {
    db: DbClient,
}

impl PgInventoryStore {
    pub fn new(db: DbClient) -> Self {
        Self { db }
    }
}

fn seat_from_row(row: &PgRow) -> Result<SeatRecord, InventoryError> {
    let seat_type: String = row.try_get("seat_type").map_err(storage)?;
    let seat_number: i32 = row.try_get("seat_number").map_err(storage)?;
    Ok(SeatRecord {
        seat_id: SeatId::from(row.try_get::<Uuid, _>("id").map_err(storage)?),
        showtime_id: ShowtimeId::from(row.try_get::<Uuid, _>("showtime_id").map_err(storage)?),
        row_label: row.try_get("row_label").map_err(storage)?,
        seat_number: u16::try_from(seat_number)
            .map_err(|_| InventoryError::Storage(format!("seat number out of range: {}", seat_number)))?,
        seat_type: seat_type.parse::<SeatType>().map_err(InventoryError::Storage)?,
        booking_id: row
            .try_get::<Option<Uuid>, _>("booking_id")
            .map_err(storage)?
            .map(BookingId::from),
    })
}

fn booking_from_row(row: &PgRow) -> Result<Booking, InventoryError> {
    let status: String = row.try_get("status").map_err(storage)?;
    let price: String = row.try_get("price").map_err(storage)?;
    let price: PriceBreakdown =
        serde_json::from_str(&price).map_err(|e| InventoryError::Storage(format!("bad price column: {}", e)))?;

    Ok(Booking {
        id: BookingId::from(row.try_get::<Uuid, _>("id").map_err(storage)?),
        lock_id: row.try_get::<Uuid, _>("lock_id").map_err(storage)?.into(),
        session_id: row.try_get::<Uuid, _>("session_id").map_err(storage)?.into(),
        showtime_id: row.try_get::<Uuid, _>("showtime_id").map_err(storage)?.into(),
        guest: GuestInfo {
            email: Masked::new(row.try_get("guest_email").map_err(storage)?),
            username: row.try_get("guest_username").map_err(storage)?,
            phone_number: row.try_get("guest_phone").map_err(storage)?,
        },
        price,
        status: BookingStatus::parse(&status)
            .ok_or_else(|| InventoryError::Storage(format!("unknown booking status: {}", status)))?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
        payment_expires_at: row.try_get("payment_expires_at").map_err(storage)?,
    })
}

const BOOKING_COLUMNS: &str = "id, lock_id, session_id, showtime_id, guest_email, guest_username, guest_phone, \
                               price, status, created_at, updated_at, payment_expires_at";

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn register_showtime(&self, showtime_id: ShowtimeId, seats: Vec<SeatRecord>) -> Result<(), InventoryError> {
        let mut tx = self.db.pool.begin().await.map_err(storage)?;
        for seat in &seats {
            sqlx::query(
                "INSERT INTO showtime_seats (id, showtime_id, row_label, seat_number, seat_type, booking_id) \
                 VALUES ($1, $2, $3, $4, $5, NULL) ON CONFLICT (id) DO NOTHING",
            )
            .bind(seat.seat_id.as_uuid())
            .bind(showtime_id.as_uuid())
            .bind(&seat.row_label)
            .bind(i32::from(seat.seat_number))
            .bind(seat.seat_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }
        tx.commit().await.map_err(storage)?;
        debug!(%showtime_id, seats = seats.len(), "Registered showtime inventory");
        Ok(())
    }

    async fn seats(&self, showtime_id: ShowtimeId) -> Result<Vec<SeatRecord>, InventoryError> {
        let rows = sqlx::query(
            "SELECT id, showtime_id, row_label, seat_number, seat_type, booking_id \
             FROM showtime_seats WHERE showtime_id = $1 ORDER BY row_label, seat_number",
        )
        .bind(showtime_id.as_uuid())
        .fetch_all(&self.db.pool)
        .await
        .map_err(storage)?;

        if rows.is_empty() {
            return Err(InventoryError::ShowtimeNotFound(showtime_id));
        }
        rows.iter().map(seat_from_row).collect()
    }

    async fn commit_booking(&self, booking: &Booking) -> Result<(), InventoryError> {
        let seat_ids: Vec<Uuid> = booking.seat_ids().iter().map(|s| s.as_uuid()).collect();
        let price = serde_json::to_string(&booking.price).map_err(|e| InventoryError::Storage(e.to_string()))?;

        let mut tx = self.db.pool.begin().await.map_err(storage)?;

        let claimed: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE showtime_seats SET booking_id = $1 \
             WHERE showtime_id = $2 AND id = ANY($3) AND booking_id IS NULL RETURNING id",
        )
        .bind(booking.id.as_uuid())
        .bind(booking.showtime_id.as_uuid())
        .bind(&seat_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(storage)?;

        if claimed.len() != seat_ids.len() {
            tx.rollback().await.map_err(storage)?;
            let unavailable = seat_ids
                .into_iter()
                .filter(|id| !claimed.contains(id))
                .map(SeatId::from)
                .collect();
            return Err(InventoryError::SeatsUnavailable { seats: unavailable });
        }

        sqlx::query(&format!(
            "INSERT INTO bookings ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            BOOKING_COLUMNS
        ))
        .bind(booking.id.as_uuid())
        .bind(booking.lock_id.as_uuid())
        .bind(booking.session_id.as_uuid())
        .bind(booking.showtime_id.as_uuid())
        .bind(booking.guest.email.expose())
        .bind(&booking.guest.username)
        .bind(&booking.guest.phone_number)
        .bind(price)
        .bind(booking.status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .bind(booking.payment_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn booking(&self, booking_id: BookingId) -> Result<Option<Booking>, InventoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS))
            .bind(booking_id.as_uuid())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn transition_booking(
        &self,
        booking_id: BookingId,
        next: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<Booking, InventoryError> {
        let mut tx = self.db.pool.begin().await.map_err(storage)?;

        let row = sqlx::query(&format!("SELECT {} FROM bookings WHERE id = $1 FOR UPDATE", BOOKING_COLUMNS))
            .bind(booking_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or(InventoryError::BookingNotFound(booking_id))?;
        let mut booking = booking_from_row(&row)?;

        if !booking.status.can_transition_to(next) {
            return Err(InventoryError::InvalidTransition { from: booking.status, to: next });
        }

        if next == BookingStatus::Cancelled {
            sqlx::query("UPDATE showtime_seats SET booking_id = NULL WHERE booking_id = $1")
                .bind(booking_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        sqlx::query("UPDATE bookings SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(booking_id.as_uuid())
            .bind(next.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        booking.update_status(next, now);
        Ok(booking)
    }

    async fn overdue_bookings(&self, now: DateTime<Utc>) -> Result<Vec<BookingId>, InventoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM bookings WHERE status = 'PENDING_PAYMENT' AND payment_expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.db.pool)
        .await
        .map_err(storage)?;
        Ok(ids.into_iter().map(BookingId::from).collect())
    }
}
