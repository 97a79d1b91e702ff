use std::{fs, path::PathBuf, thread, time::Duration};

use log::debug;

use crate::error::ReaderError;

/// Switches the reader module's power rail.
pub trait PowerSwitch: Send {
    fn set_powered(&mut self, on: bool) -> Result<(), ReaderError>;
}

/// Handheld terminals expose the UHF module and its level shifter as GPIO
/// control files that take `"1"` or `"0"`.
pub struct GpioPowerSwitch {
    paths: Vec<PathBuf>,
    settle: Duration,
}

pub const DEFAULT_GPIO_PATHS: [&str; 2] = ["/proc/gpiocontrol/set_uhf", "/proc/gpiocontrol/set_bd"];

impl GpioPowerSwitch {
    pub fn new(paths: Vec<PathBuf>, settle: Duration) -> Self {
        Self { paths, settle }
    }

    pub fn with_default_paths(settle: Duration) -> Self {
        Self::new(
            DEFAULT_GPIO_PATHS.iter().map(PathBuf::from).collect(),
            settle,
        )
    }
}

impl PowerSwitch for GpioPowerSwitch {
    fn set_powered(&mut self, on: bool) -> Result<(), ReaderError> {
        let value = if on { "1" } else { "0" };
        for path in &self.paths {
            fs::write(path, value).map_err(|source| ReaderError::Gpio {
                path: path.display().to_string(),
                source,
            })?;
            debug!("reader power={value} path={}", path.display());
        }

        // The module needs time to boot before it answers on the serial port.
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        Ok(())
    }
}

/// For readers with permanent power, and for tests.
#[derive(Debug, Default)]
pub struct NoopPowerSwitch;

impl PowerSwitch for NoopPowerSwitch {
    fn set_powered(&mut self, _on: bool) -> Result<(), ReaderError> {
        Ok(())
    }
}
