use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

use marquee_booking::BookingPolicy;
use marquee_catalog::{PricingConfig, SeedConfig};
use marquee_lock::LockPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub seat_hold_seconds: i64,
    pub max_seats_per_booking: usize,
    pub payment_timeout_seconds: i64,
    pub sweep_interval_ms: u64,
    pub lock_grace_seconds: i64,
    pub base_price: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockTableBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InventoryBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub lock_table: LockTableBackend,
    pub inventory: InventoryBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub business_rules: BusinessRules,
    pub storage: StorageConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = ConfigLoader::builder()
            // Start with default settings
            .add_source(File::with_name("config/default"))
            // Add environment-specific settings
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local settings (git-ignored)
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (e.g. MARQUEE__REDIS__URL=...)
            .add_source(Environment::with_prefix("MARQUEE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl BusinessRules {
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            hold: chrono::Duration::seconds(self.seat_hold_seconds),
            max_seats: self.max_seats_per_booking,
            grace: chrono::Duration::seconds(self.lock_grace_seconds),
        }
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        BookingPolicy {
            payment_timeout: chrono::Duration::seconds(self.payment_timeout_seconds),
        }
    }

    /// Base price and currency come from here; seat-type surcharges keep
    /// their built-in values.
    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            base_price: self.base_price,
            currency: self.currency.clone(),
            ..PricingConfig::default()
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }
}
