use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// A periodic cleanup step driven by the reaper.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns how many records were reclaimed.
    async fn sweep(&self, now: DateTime<Utc>) -> Result<usize, String>;
}

/// Background task that runs every registered sweep on a fixed interval,
/// independent of client traffic.
pub struct ExpiryReaper {
    sweeps: Vec<Arc<dyn Sweep>>,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(interval: Duration) -> Self {
        Self {
            sweeps: Vec::new(),
            interval,
        }
    }

    pub fn with_sweep(mut self, sweep: Arc<dyn Sweep>) -> Self {
        self.sweeps.push(sweep);
        self
    }

    /// Runs every sweep once, in registration order. A failing sweep is
    /// logged and does not stop the others.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> usize {
        let mut total = 0;
        for sweep in &self.sweeps {
            match sweep.sweep(now).await {
                Ok(0) => {}
                Ok(n) => {
                    info!(sweep = sweep.name(), reclaimed = n, "Reaper sweep");
                    total += n;
                }
                Err(e) => error!(sweep = sweep.name(), error = %e, "Reaper sweep failed"),
            }
        }
        total
    }

    /// Spawns the reaper loop. It exits once `shutdown` flips to `true` or
    /// its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_ms = self.interval.as_millis() as u64, sweeps = self.sweeps.len(), "Expiry reaper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep_once(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Expiry reaper stopped");
        })
    }
}
