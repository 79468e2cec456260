pub mod models;
pub mod orchestrator;
pub mod lifecycle;

pub use models::{BookingPolicy, CheckoutStage, SnackOrder, MAX_SNACK_QUANTITY};
pub use orchestrator::{BookingError, BookingOrchestrator};
