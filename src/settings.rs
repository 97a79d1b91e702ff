use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, str::FromStr, sync::RwLock, time::Duration};

use crate::error::ReaderError;

pub const MIN_RF_POWER: u8 = 5;
pub const MAX_RF_POWER: u8 = 33;

/// How the reader module's power rail is driven.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PowerControl {
    /// Write the handheld's GPIO control files.
    Gpio,
    /// Module is always powered.
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderSettings {
    pub device: String,
    /// Tried in order until the reader answers.
    pub baud_rates: Vec<u32>,
    pub open_timeout_secs: u64,
    pub antenna: u8,
    /// dBm, within `MIN_RF_POWER..=MAX_RF_POWER`.
    pub rf_power: u8,
    pub power_control: PowerControl,
    pub power_settle_ms: u64,
    pub command_retries: u32,
    pub retry_interval_ms: u64,
    pub stop_attempts: u32,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self {
            device: "/dev/ttyS3".into(),
            baud_rates: vec![115_200],
            open_timeout_secs: 10,
            antenna: 1,
            rf_power: 10,
            power_control: PowerControl::None,
            power_settle_ms: 1500,
            command_retries: 10,
            retry_interval_ms: 10,
            stop_attempts: 11,
        }
    }
}

impl ReaderSettings {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn power_settle(&self) -> Duration {
        Duration::from_millis(self.power_settle_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

pub fn validate_rf_power(dbm: u8) -> Result<u8, ReaderError> {
    if (MIN_RF_POWER..=MAX_RF_POWER).contains(&dbm) {
        Ok(dbm)
    } else {
        Err(ReaderError::PowerOutOfRange {
            requested: dbm,
            min: MIN_RF_POWER,
            max: MAX_RF_POWER,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct UserSettings {
    reader: ReaderSettings,
}

/// JSON settings file in the app data directory, written through on every change.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unreadable settings file {}: {err}",
                    path.display()
                );
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn reader(&self) -> ReaderSettings {
        match self.data.read() {
            Ok(guard) => guard.reader.clone(),
            Err(poisoned) => poisoned.into_inner().reader.clone(),
        }
    }

    pub fn update_reader(&self, settings: ReaderSettings) -> Result<()> {
        validate_rf_power(settings.rf_power)?;
        if settings.baud_rates.is_empty() {
            return Err(anyhow!("at least one baud rate is required"));
        }

        let mut guard = self
            .data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))?;
        guard.reader = settings;
        self.persist(&guard)
    }

    /// Remember the RF power chosen on the power slider.
    pub fn set_rf_power(&self, dbm: u8) -> Result<()> {
        let mut settings = self.reader();
        settings.rf_power = dbm;
        self.update_reader(settings)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// Where tag reports come from when no vendor SDK is linked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderBackend {
    Simulated,
}

impl FromStr for ReaderBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "simulated" | "sim" => Ok(ReaderBackend::Simulated),
            other => Err(anyhow!("unsupported reader backend '{other}'")),
        }
    }
}

pub const DEFAULT_SCAN_SECS: u64 = 5;

/// Process overrides read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvOverrides {
    /// `TOYMANAGER_DATA_DIR`
    pub data_dir: Option<PathBuf>,
    /// `TOYMANAGER_DEBUG`
    pub debug: bool,
    /// `TOYMANAGER_READER`
    pub reader: ReaderBackend,
    /// `TOYMANAGER_SCAN_SECS`, headless mode only.
    pub scan_secs: u64,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = lookup("TOYMANAGER_DATA_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let debug = lookup("TOYMANAGER_DEBUG")
            .map(|flag| matches!(flag.trim(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        let reader = match lookup("TOYMANAGER_READER") {
            Some(value) => value.parse()?,
            None => ReaderBackend::Simulated,
        };
        let scan_secs = match lookup("TOYMANAGER_SCAN_SECS") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("TOYMANAGER_SCAN_SECS is not a number: {value}"))?,
            None => DEFAULT_SCAN_SECS,
        };

        Ok(Self {
            data_dir,
            debug,
            reader,
            scan_secs,
        })
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}
