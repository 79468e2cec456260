pub mod app_config;
pub mod database;
pub mod redis_repo;

pub use app_config::{Config, InventoryBackend, LockTableBackend};
pub use database::{DbClient, PgInventoryStore};
pub use redis_repo::RedisLockTable;
