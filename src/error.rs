//! Typed error kinds for the places where callers branch on what went wrong.
//!
//! Plumbing (database worker, settings file, app wiring) stays on
//! `anyhow::Result`; these enums cover the scan pipeline, the reader driver
//! and user-facing inventory edits.

use thiserror::Error;

use crate::reader::ReaderState;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The inventory store could not answer a classification lookup. The
    /// sightings collected for the tag while the lookup was in flight are dropped.
    #[error("lookup failed for tag {rfid}: {reason}")]
    LookupFailed { rfid: String, reason: String },

    #[error("a scan session is already running ({session_id})")]
    SessionActive { session_id: String },

    #[error("no scan session is running")]
    NoActiveSession,

    #[error("scan controller has shut down")]
    ControllerClosed,

    #[error(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("reader module is not powered")]
    NotPowered,

    #[error("could not open reader on {device} (tried baud rates {baud_rates:?})")]
    OpenFailed { device: String, baud_rates: Vec<u32> },

    #[error("reader command {command} failed with code {code}: {message}")]
    Command {
        command: &'static str,
        code: u8,
        message: String,
    },

    #[error("reader cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: ReaderState,
    },

    #[error("RF power {requested} dBm is outside {min}..={max}")]
    PowerOutOfRange { requested: u8, min: u8, max: u8 },

    #[error("failed to switch reader power rail {path}: {source}")]
    Gpio {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("reader lock poisoned")]
    Poisoned,

    #[error("reader worker panicked")]
    WorkerPanicked,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid item: {0}")]
    Invalid(String),

    #[error("no item with tag {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
