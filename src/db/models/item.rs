//! Inventory records, one per RFID tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A toy on the shelf, keyed by the EPC of the tag stuck to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub rfid: String,
    pub name: String,
    pub detail: String,
    /// Path of the photo taken when the item was registered, if any.
    pub photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What the edit dialog submits. Timestamps are owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemInput {
    pub rfid: String,
    pub name: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub photo_path: Option<String>,
}

impl ItemInput {
    pub fn new(rfid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rfid: rfid.into(),
            name: name.into(),
            detail: String::new(),
            photo_path: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_photo(mut self, photo_path: impl Into<String>) -> Self {
        self.photo_path = Some(photo_path.into());
        self
    }

    /// Trims surrounding whitespace and collapses a blank photo path to `None`.
    pub fn normalized(self) -> Self {
        Self {
            rfid: self.rfid.trim().to_string(),
            name: self.name.trim().to_string(),
            detail: self.detail.trim().to_string(),
            photo_path: self
                .photo_path
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty()),
        }
    }
}
