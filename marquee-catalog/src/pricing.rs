use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use marquee_core::{Amount, SeatType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModifierKind {
    /// `value` is a signed whole percentage: -20 takes a fifth off.
    Percentage,
    FixedAmount,
}

/// A signed adjustment applied on top of a running price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Modifier {
    pub kind: ModifierKind,
    pub value: i64,
}

impl Modifier {
    pub const NONE: Modifier = Modifier { kind: ModifierKind::FixedAmount, value: 0 };

    pub fn percentage(value: i64) -> Self {
        Self { kind: ModifierKind::Percentage, value }
    }

    pub fn fixed(value: i64) -> Self {
        Self { kind: ModifierKind::FixedAmount, value }
    }

    /// Applies the modifier, rounding half away from zero and never
    /// going below zero.
    pub fn apply(&self, price: Amount) -> Amount {
        let adjusted = match self.kind {
            ModifierKind::Percentage => {
                let scaled = price * (100 + self.value);
                if scaled >= 0 {
                    (scaled + 50) / 100
                } else {
                    (scaled - 50) / 100
                }
            }
            ModifierKind::FixedAmount => price + self.value,
        };
        adjusted.max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price of a NORMAL seat before any ticket-type adjustment.
    pub base_price: Amount,

    pub currency: String,

    /// Surcharges per seat type. Missing types are priced at the base.
    #[serde(default)]
    pub seat_type_modifiers: HashMap<SeatType, Modifier>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_price: 90_000,
            currency: "VND".to_string(),
            seat_type_modifiers: {
                let mut m = HashMap::new();
                m.insert(SeatType::Normal, Modifier::NONE);
                m.insert(SeatType::Vip, Modifier::fixed(20_000));
                m.insert(SeatType::Couple, Modifier::fixed(40_000));
                m
            },
        }
    }
}

/// Seat pricing: base price, then the seat-type modifier, then the ticket
/// type's modifier.
#[derive(Debug, Clone)]
pub struct PricingEngine {
    config: PricingConfig,
}

impl PricingEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    pub fn base_price(&self) -> Amount {
        self.config.base_price
    }

    /// Reference price of a seat type, as shown next to a seat on the map.
    pub fn seat_price(&self, seat_type: SeatType) -> Amount {
        self.config
            .seat_type_modifiers
            .get(&seat_type)
            .unwrap_or(&Modifier::NONE)
            .apply(self.config.base_price)
    }

    pub fn unit_price(&self, seat_type: SeatType, ticket_modifier: &Modifier) -> Amount {
        ticket_modifier.apply(self.seat_price(seat_type))
    }
}

impl Default for PricingEngine {
    fn default() -> Self {
        Self::new(PricingConfig::default())
    }
}
