//! The seam between the driver and the vendor reader SDK.
//!
//! The vendor library speaks its own binary protocol over the serial port; all
//! the driver needs from it is a handful of synchronous request/reply commands
//! and a callback for tag reports while an inventory is running.

use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result code the vendor SDK uses for success.
pub const RT_OK: u8 = 0;

/// Reply to a synchronous reader command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u8,
    pub message: String,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            code: RT_OK,
            message: String::new(),
        }
    }

    pub fn error(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == RT_OK
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReaderInfo {
    pub serial_number: String,
    pub power_on_time: String,
    pub firmware_compile_time: String,
}

/// Antenna number to RF power in dBm.
pub type PowerTable = BTreeMap<u8, u8>;

/// Raw tag report as delivered by the SDK's inventory callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpcReport {
    /// Name of the reader connection that produced the report, when known.
    pub source: Option<String>,
    pub epc: String,
    pub result: u8,
    pub message: String,
}

impl EpcReport {
    pub fn read(epc: impl Into<String>) -> Self {
        Self {
            source: None,
            epc: epc.into(),
            result: RT_OK,
            message: String::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn failed(result: u8, message: impl Into<String>) -> Self {
        Self {
            source: None,
            epc: String::new(),
            result,
            message: message.into(),
        }
    }
}

/// One good read of a tag, as handed to the scan pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagSighting {
    pub source: Option<String>,
    pub rfid: String,
    pub seen_at: DateTime<Utc>,
}

impl TagSighting {
    pub fn new(rfid: impl Into<String>) -> Self {
        Self {
            source: None,
            rfid: rfid.into(),
            seen_at: Utc::now(),
        }
    }
}

pub type ReportHandler = Box<dyn Fn(EpcReport) + Send + Sync + 'static>;

/// Synchronous command surface of a UHF reader.
///
/// Implementations may invoke the inventory handler from any thread, and must
/// not invoke it again once `stop` has returned an OK reply.
pub trait ReaderTransport: Send {
    /// Open the serial link. Returns `false` when the port could not be opened.
    fn open(&mut self, device: &str, baud_rate: u32, timeout: Duration) -> bool;

    fn close(&mut self);

    /// Stop any running inventory. Also used as a liveness probe after `open`.
    fn stop(&mut self) -> Reply;

    fn reader_info(&mut self) -> Result<ReaderInfo, Reply>;

    fn get_power(&mut self) -> Result<PowerTable, Reply>;

    fn set_power(&mut self, power: &PowerTable) -> Reply;

    /// Start continuous inventory on one antenna, delivering reports to `handler`.
    fn start_inventory(&mut self, antenna: u8, handler: ReportHandler) -> Reply;
}
