pub mod table;
pub mod manager;
pub mod reaper;

pub use table::MemoryLockTable;
pub use manager::{Availability, LockError, LockHandle, LockManager, LockPolicy, LockedSeat, SeatView, SessionLockInfo};
pub use reaper::{ExpiryReaper, Sweep};
