pub mod item;
pub mod scan_session;

pub use item::{InventoryItem, ItemInput};
pub use scan_session::{ScanMode, ScanSession, ScanSessionInfo, ScanSessionStatus};
