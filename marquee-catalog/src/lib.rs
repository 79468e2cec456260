pub mod catalog;
pub mod pricing;
pub mod inventory;

pub use catalog::{Catalog, CatalogError, Movie, SeedConfig, Showtime, Snack, TicketType};
pub use pricing::{Modifier, ModifierKind, PricingConfig, PricingEngine};
pub use inventory::MemoryInventory;
