use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, warn};
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use super::transport::{
    EpcReport, PowerTable, ReaderInfo, ReaderTransport, Reply, ReportHandler,
};

/// Stand-in reader for development machines and tests.
///
/// While an inventory runs it first replays the configured script, then keeps
/// reporting random tags from its population until stopped. The script is
/// always delivered in full before a stop takes effect.
pub struct SimulatedTransport {
    population: Vec<String>,
    script: Vec<EpcReport>,
    interval: Duration,
    accepted_baud: Option<u32>,
    stop_failures: Arc<AtomicU32>,
    probed: bool,
    open: bool,
    power: PowerTable,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SimulatedTransport {
    pub fn new(population: Vec<String>) -> Self {
        Self {
            population,
            script: Vec::new(),
            interval: Duration::from_millis(50),
            accepted_baud: None,
            stop_failures: Arc::new(AtomicU32::new(0)),
            probed: false,
            open: false,
            power: PowerTable::new(),
            worker: None,
        }
    }

    /// Reports replayed at the start of every inventory.
    pub fn with_script(mut self, script: Vec<EpcReport>) -> Self {
        self.script = script;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Only answer on this baud rate.
    pub fn accepting_baud(mut self, baud: u32) -> Self {
        self.accepted_baud = Some(baud);
        self
    }

    /// Fail the next `count` stop commands after the open probe.
    pub fn failing_stops(self, count: u32) -> Self {
        self.stop_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Remaining stop failures, shared so a test can arm them once the
    /// transport is owned by a reader.
    #[cfg(test)]
    pub(crate) fn stop_failures(&self) -> Arc<AtomicU32> {
        self.stop_failures.clone()
    }

    fn halt_worker(&mut self) {
        if let Some((token, handle)) = self.worker.take() {
            token.cancel();
            if handle.join().is_err() {
                warn!("simulated inventory thread panicked");
            }
        }
    }
}

impl ReaderTransport for SimulatedTransport {
    fn open(&mut self, device: &str, baud_rate: u32, _timeout: Duration) -> bool {
        if device.is_empty() {
            return false;
        }
        if self.accepted_baud.is_some_and(|accepted| accepted != baud_rate) {
            return false;
        }
        debug!("simulated reader open on {device}:{baud_rate}");
        self.open = true;
        self.probed = false;
        true
    }

    fn close(&mut self) {
        self.halt_worker();
        self.open = false;
    }

    fn stop(&mut self) -> Reply {
        if !self.open {
            return Reply::error(1, "port closed");
        }
        if !self.probed {
            self.probed = true;
            return Reply::ok();
        }
        let armed = self
            .stop_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if armed.is_ok() {
            return Reply::error(5, "reader busy");
        }
        self.halt_worker();
        Reply::ok()
    }

    fn reader_info(&mut self) -> Result<ReaderInfo, Reply> {
        if !self.open {
            return Err(Reply::error(1, "port closed"));
        }
        Ok(ReaderInfo {
            serial_number: "SIM-0001".into(),
            power_on_time: "0d 00:00:01".into(),
            firmware_compile_time: "simulated".into(),
        })
    }

    fn get_power(&mut self) -> Result<PowerTable, Reply> {
        if !self.open {
            return Err(Reply::error(1, "port closed"));
        }
        Ok(self.power.clone())
    }

    fn set_power(&mut self, power: &PowerTable) -> Reply {
        if !self.open {
            return Reply::error(1, "port closed");
        }
        self.power.extend(power.iter().map(|(antenna, dbm)| (*antenna, *dbm)));
        Reply::ok()
    }

    fn start_inventory(&mut self, antenna: u8, handler: ReportHandler) -> Reply {
        if !self.open {
            return Reply::error(1, "port closed");
        }
        self.halt_worker();

        let token = CancellationToken::new();
        let worker_token = token.clone();
        let script = self.script.clone();
        let population = Arc::new(self.population.clone());
        let interval = self.interval;
        let source = Some(format!("sim-ant{antenna}"));

        let spawned = thread::Builder::new()
            .name("toymanager-sim-reader".into())
            .spawn(move || {
                for mut report in script {
                    report.source = report.source.or_else(|| source.clone());
                    handler(report);
                }

                let mut rng = rand::thread_rng();
                while !worker_token.is_cancelled() {
                    if let Some(epc) = population.choose(&mut rng) {
                        handler(EpcReport {
                            source: source.clone(),
                            ..EpcReport::read(epc.clone())
                        });
                    }
                    thread::sleep(interval);
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some((token, handle));
                Reply::ok()
            }
            Err(err) => Reply::error(9, format!("failed to spawn inventory thread: {err}")),
        }
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        self.halt_worker();
    }
}
