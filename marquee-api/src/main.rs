use anyhow::Context;
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_api::{app, AppState};
use marquee_catalog::{Catalog, MemoryInventory, PricingEngine};
use marquee_core::{InventoryStore, LockTable};
use marquee_lock::MemoryLockTable;
use marquee_store::{Config, DbClient, InventoryBackend, LockTableBackend, PgInventoryStore, RedisLockTable};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_api=debug,marquee_lock=debug,marquee_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let rules = &config.business_rules;
    let lock_policy = rules.lock_policy();

    let table: Arc<dyn LockTable> = match config.storage.lock_table {
        LockTableBackend::Memory => Arc::new(MemoryLockTable::new()),
        LockTableBackend::Redis => Arc::new(
            RedisLockTable::new(&config.redis.url, lock_policy.grace)
                .await
                .context("Failed to connect to Redis")?,
        ),
    };
    tracing::info!(backend = ?config.storage.lock_table, "Lock table ready");

    let inventory: Arc<dyn InventoryStore> = match config.storage.inventory {
        InventoryBackend::Memory => Arc::new(MemoryInventory::new()),
        InventoryBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Arc::new(PgInventoryStore::new(db))
        }
    };
    tracing::info!(backend = ?config.storage.inventory, "Inventory store ready");

    let catalog = Arc::new(Catalog::from_seed(&config.seed, Utc::now()));
    let state = AppState::new(
        catalog,
        Arc::new(PricingEngine::new(rules.pricing())),
        table,
        inventory.clone(),
        lock_policy,
        rules.booking_policy(),
    );

    let seeded = state
        .seed_inventory(inventory.as_ref())
        .await
        .context("Failed to seed inventory")?;
    tracing::info!(seats = seeded, "Inventory seeded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reaper = state.reaper(rules.sweep_interval()).spawn(shutdown_rx);

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    reaper.await.context("Reaper task panicked")?;
    Ok(())
}
