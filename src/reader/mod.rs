#[cfg(feature = "desktop")]
pub mod commands;
mod driver;
mod power;
mod simulated;
mod state;
mod transport;

pub use driver::{RfidReader, TagSink};
pub use power::{GpioPowerSwitch, NoopPowerSwitch, PowerSwitch, DEFAULT_GPIO_PATHS};
pub use simulated::SimulatedTransport;
pub use state::ReaderState;
pub use transport::{
    EpcReport, PowerTable, ReaderInfo, ReaderTransport, Reply, ReportHandler, TagSighting, RT_OK,
};

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::{
    error::ReaderError,
    settings::{PowerControl, ReaderSettings},
};

/// What the settings screen shows about the attached reader.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReaderStatus {
    pub state: ReaderState,
    pub rf_power: u8,
    pub baud_rate: Option<u32>,
    pub info: Option<ReaderInfo>,
}

/// Shared, lockable reader. The vendor calls block, so callers on the async
/// runtime go through `spawn_blocking`.
#[derive(Clone)]
pub struct ReaderHandle {
    inner: Arc<Mutex<RfidReader>>,
}

impl ReaderHandle {
    pub fn new(reader: RfidReader) -> Self {
        Self {
            inner: Arc::new(Mutex::new(reader)),
        }
    }

    /// Reader backed by the simulated transport, with the power rail chosen by
    /// `settings.power_control`.
    pub fn simulated(population: Vec<String>, settings: ReaderSettings) -> Self {
        let power: Box<dyn PowerSwitch> = match settings.power_control {
            PowerControl::Gpio => Box::new(GpioPowerSwitch::with_default_paths(
                settings.power_settle(),
            )),
            PowerControl::None => Box::new(NoopPowerSwitch),
        };
        let transport = Box::new(SimulatedTransport::new(population));
        Self::new(RfidReader::new(transport, power, settings))
    }

    /// Run a blocking reader operation off the async runtime.
    pub async fn run<F, T>(&self, op: F) -> Result<T, ReaderError>
    where
        F: FnOnce(&mut RfidReader) -> Result<T, ReaderError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| ReaderError::Poisoned)?;
            op(&mut guard)
        })
        .await
        .map_err(|_| ReaderError::WorkerPanicked)?
    }

    pub async fn status(&self) -> Result<ReaderStatus, ReaderError> {
        self.run(|reader| {
            Ok(ReaderStatus {
                state: reader.state(),
                rf_power: reader.rf_power(),
                baud_rate: reader.baud_rate(),
                info: reader.info().cloned(),
            })
        })
        .await
    }
}
