pub mod channel;
pub mod collector;

// Re-export common types
pub use channel::DeliveryChannel;
pub use collector::{Collector, DeliveryError, HttpCollector, LineCollector, StdoutCollector};
