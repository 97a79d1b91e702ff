use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which screen started the scan. All modes reconcile tags the same way; the
/// mode is kept with the session so history can tell a stock-take from a
/// stock-out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanMode {
    StockIn,
    Inventory,
    StockOut,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::StockIn => "StockIn",
            ScanMode::Inventory => "Inventory",
            ScanMode::StockOut => "StockOut",
        }
    }
}

impl Default for ScanMode {
    fn default() -> Self {
        ScanMode::StockIn
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScanSessionStatus {
    Running,
    Completed,
    Interrupted,
}

impl ScanSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSessionStatus::Running => "Running",
            ScanSessionStatus::Completed => "Completed",
            ScanSessionStatus::Interrupted => "Interrupted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: String,
    pub mode: ScanMode,
    pub status: ScanSessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub known_tags: u64,
    pub unknown_tags: u64,
    pub total_sightings: u64,
}

impl ScanSession {
    pub fn begin(id: String, mode: ScanMode, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            mode,
            status: ScanSessionStatus::Running,
            started_at,
            stopped_at: None,
            known_tags: 0,
            unknown_tags: 0,
            total_sightings: 0,
        }
    }
}

/// Summary handed back to the UI when a scan stops.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSessionInfo {
    pub id: String,
    pub mode: ScanMode,
    pub status: ScanSessionStatus,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub known_tags: u64,
    pub unknown_tags: u64,
    pub total_sightings: u64,
}

impl From<ScanSession> for ScanSessionInfo {
    fn from(session: ScanSession) -> Self {
        let duration_ms = session
            .stopped_at
            .map(|stopped| (stopped - session.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        Self {
            id: session.id,
            mode: session.mode,
            status: session.status,
            started_at: session.started_at,
            stopped_at: session.stopped_at,
            duration_ms,
            known_tags: session.known_tags,
            unknown_tags: session.unknown_tags,
            total_sightings: session.total_sightings,
        }
    }
}
