mod aggregator;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod controller;
pub mod reconciler;

pub use aggregator::ScanSnapshot;
pub use controller::ScanController;
pub use reconciler::{KnownTag, Reconciler, Resolution, ScanAggregate};
