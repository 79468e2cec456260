use serde::{Deserialize, Serialize};

use marquee_core::SnackId;

/// Where a lock stands in checkout, as far as the orchestrator knows.
///
/// Previewing never touches the lock itself; the stage is bookkeeping only
/// and confirm does not require `Priced`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutStage {
    Locked,
    Priced,
}

/// Upper bound on a single snack line.
pub const MAX_SNACK_QUANTITY: u32 = 20;

/// A snack line requested at preview or confirm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnackOrder {
    pub snack_id: SnackId,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// How long a PENDING_PAYMENT booking may wait before it is cancelled.
    pub payment_timeout: chrono::Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            payment_timeout: chrono::Duration::seconds(900),
        }
    }
}
