pub mod ids;
pub mod seat;
pub mod lock;
pub mod booking;
pub mod repository;

pub use ids::{BookingId, LockId, MovieId, SeatId, SessionId, ShowtimeId, SnackId, TicketTypeId};
pub use seat::{SeatRecord, SeatStatus, SeatType};
pub use lock::{Lock, LockState, SeatClaim, SeatSelection};
pub use booking::{Booking, BookingStatus, GuestInfo, PriceBreakdown, SeatPrice, SnackLine};
pub use repository::{InventoryError, InventoryStore, LockTable, LockTableError};

/// Prices are carried as integer amounts in the smallest currency unit.
pub type Amount = i64;
