use std::{sync::Arc, thread, time::Duration};

use chrono::Utc;

use crate::{
    error::ReaderError,
    settings::{validate_rf_power, ReaderSettings},
};

use super::{
    power::PowerSwitch,
    state::ReaderState,
    transport::{EpcReport, PowerTable, ReaderInfo, ReaderTransport, Reply, TagSighting, RT_OK},
};

// Tag reports arrive at hundreds per second during a stock-take.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub type TagSink = Arc<dyn Fn(TagSighting) + Send + Sync + 'static>;

/// Owned driver for one UHF reader module.
///
/// Construct it once and hand it to whoever needs it; all device state (power
/// rail, serial link, RF power, scan state) lives here.
pub struct RfidReader {
    transport: Box<dyn ReaderTransport>,
    power: Box<dyn PowerSwitch>,
    settings: ReaderSettings,
    state: ReaderState,
    rf_power: u8,
    baud_rate: Option<u32>,
    info: Option<ReaderInfo>,
}

impl RfidReader {
    pub fn new(
        transport: Box<dyn ReaderTransport>,
        power: Box<dyn PowerSwitch>,
        settings: ReaderSettings,
    ) -> Self {
        let rf_power = settings.rf_power;
        Self {
            transport,
            power,
            settings,
            state: ReaderState::Init,
            rf_power,
            baud_rate: None,
            info: None,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn rf_power(&self) -> u8 {
        self.rf_power
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.baud_rate
    }

    pub fn info(&self) -> Option<&ReaderInfo> {
        self.info.as_ref()
    }

    /// Power the module, find a baud rate it answers on, and apply the stored
    /// RF power.
    pub fn init_device(&mut self) -> Result<(), ReaderError> {
        if !self.state.can_open() {
            return Err(ReaderError::InvalidTransition {
                action: "open",
                state: self.state,
            });
        }

        log_info!("opening reader on {}", self.settings.device);
        self.power.set_powered(true)?;

        let baud_rates = self.settings.baud_rates.clone();
        let opened = baud_rates.iter().copied().find(|&baud| self.open_reader(baud));

        let Some(baud) = opened else {
            if let Err(err) = self.power.set_powered(false) {
                log_warn!("failed to power down reader after open failure: {err}");
            }
            self.state = ReaderState::Closed;
            return Err(ReaderError::OpenFailed {
                device: self.settings.device.clone(),
                baud_rates,
            });
        };

        log_info!("reader opened with baud rate {baud}");
        self.baud_rate = Some(baud);
        self.state = ReaderState::Ready;

        match self.transport.reader_info() {
            Ok(info) => {
                log_info!(
                    "reader serial={} powered_on={} firmware={}",
                    info.serial_number,
                    info.power_on_time,
                    info.firmware_compile_time
                );
                self.info = Some(info);
            }
            Err(reply) => log_warn!("reader info unavailable: {}", reply.message),
        }

        self.apply_power(self.rf_power)
    }

    fn open_reader(&mut self, baud: u32) -> bool {
        log_debug!("trying to open reader with baud rate {baud}");
        if !self
            .transport
            .open(&self.settings.device, baud, self.settings.open_timeout())
        {
            return false;
        }

        // A reader that acknowledges a stop is alive and idle.
        if self.transport.stop().is_ok() {
            return true;
        }
        self.transport.close();
        false
    }

    /// Current RF power per antenna.
    pub fn query_power(&mut self) -> Result<PowerTable, ReaderError> {
        self.require_idle("query power")?;

        let retries = self.settings.command_retries;
        let interval = self.settings.retry_interval();
        let transport = &mut self.transport;
        match with_retry(retries, interval, || transport.get_power()) {
            Ok(table) => {
                for (antenna, dbm) in &table {
                    log_debug!("ANT_{antenna}={dbm}");
                }
                Ok(table)
            }
            Err(reply) => {
                log_error!("power query failed: {}", reply.message);
                Err(command_error("get_power", reply))
            }
        }
    }

    /// Store a new RF power. It is sent to the module right away when powered,
    /// otherwise on the next `init_device`.
    pub fn set_power(&mut self, dbm: u8) -> Result<(), ReaderError> {
        validate_rf_power(dbm)?;
        if self.state == ReaderState::Scanning {
            return Err(ReaderError::InvalidTransition {
                action: "change power",
                state: self.state,
            });
        }

        self.rf_power = dbm;
        if !self.state.is_powered() {
            log_debug!("reader not powered, RF power {dbm} dBm deferred to next open");
            return Ok(());
        }
        self.apply_power(dbm)
    }

    fn apply_power(&mut self, dbm: u8) -> Result<(), ReaderError> {
        let table = PowerTable::from([(self.settings.antenna, dbm)]);
        let retries = self.settings.command_retries;
        let interval = self.settings.retry_interval();
        let transport = &mut self.transport;

        with_retry(retries, interval, || {
            let reply = transport.set_power(&table);
            if reply.is_ok() {
                Ok(())
            } else {
                Err(reply)
            }
        })
        .map_err(|reply| {
            log_error!("set power failed: {}", reply.message);
            command_error("set_power", reply)
        })?;

        log_info!("RF power set to {dbm} dBm");
        Ok(())
    }

    /// Start continuous inventory. Good reads are handed to `sink`; reports
    /// carrying an error code are logged and dropped.
    pub fn start_scan(&mut self, sink: TagSink) -> Result<(), ReaderError> {
        if !self.state.can_start_scan() {
            return Err(ReaderError::InvalidTransition {
                action: "start scanning",
                state: self.state,
            });
        }

        // Make sure no earlier inventory is still streaming into a stale handler.
        self.send_stop()?;

        let handler = Box::new(move |report: EpcReport| {
            if report.result != RT_OK {
                log_error!("tag report failed ({}): {}", report.result, report.message);
                return;
            }
            log_debug!("tag report source={:?} epc={}", report.source, report.epc);
            sink(TagSighting {
                source: report.source,
                rfid: report.epc,
                seen_at: Utc::now(),
            });
        });

        let reply = self.transport.start_inventory(self.settings.antenna, handler);
        if !reply.is_ok() {
            log_error!("start inventory failed: {}", reply.message);
            return Err(command_error("start_inventory", reply));
        }

        log_info!("scanning on antenna {}", self.settings.antenna);
        self.state = ReaderState::Scanning;
        Ok(())
    }

    pub fn stop_scan(&mut self) -> Result<(), ReaderError> {
        if !self.state.is_powered() {
            log_warn!("stop requested but reader is not powered ({})", self.state);
            return Ok(());
        }

        let result = self.send_stop();
        if self.state == ReaderState::Scanning {
            // A reader that ignores the stop is still treated as idle, or no
            // later scan could start. The next start sends its own stop first.
            if let Err(err) = &result {
                log_error!("stop failed, marking reader stopped anyway: {err}");
            }
            self.state = ReaderState::Stopped;
        }
        result
    }

    fn send_stop(&mut self) -> Result<(), ReaderError> {
        let attempts = self.settings.stop_attempts.max(1);
        let retries = self.settings.command_retries;
        let interval = self.settings.retry_interval();

        let mut last = Reply::ok();
        for attempt in 1..=attempts {
            let transport = &mut self.transport;
            match with_retry(retries, interval, || {
                let reply = transport.stop();
                if reply.is_ok() {
                    Ok(())
                } else {
                    Err(reply)
                }
            }) {
                Ok(()) => {
                    log_debug!("stop succeeded on attempt {attempt}");
                    return Ok(());
                }
                Err(reply) => {
                    log_warn!("stop attempt {attempt} failed: {}", reply.message);
                    last = reply;
                }
            }
        }

        Err(command_error("stop", last))
    }

    /// Stop anything running, close the link and cut power.
    pub fn close_device(&mut self) -> Result<(), ReaderError> {
        if self.state == ReaderState::Scanning {
            if let Err(err) = self.stop_scan() {
                log_warn!("stop before close failed: {err}");
            }
        }
        if self.state.is_powered() {
            self.transport.close();
        }

        self.state = ReaderState::Closed;
        self.baud_rate = None;
        self.power.set_powered(false)?;
        log_info!("reader closed");
        Ok(())
    }

    fn require_idle(&self, action: &'static str) -> Result<(), ReaderError> {
        match self.state {
            ReaderState::Ready | ReaderState::Stopped => Ok(()),
            ReaderState::Init | ReaderState::Closed => Err(ReaderError::NotPowered),
            ReaderState::Scanning => Err(ReaderError::InvalidTransition {
                action,
                state: self.state,
            }),
        }
    }
}

impl Drop for RfidReader {
    fn drop(&mut self) {
        if self.state.is_powered() {
            if let Err(err) = self.close_device() {
                log_error!("failed to close reader on drop: {err}");
            }
        }
    }
}

/// Issue `command` up to `retries` times, pausing `interval` between failures.
fn with_retry<T>(
    retries: u32,
    interval: Duration,
    mut command: impl FnMut() -> Result<T, Reply>,
) -> Result<T, Reply> {
    let mut attempt = 1;
    loop {
        match command() {
            Ok(value) => return Ok(value),
            Err(reply) if attempt >= retries.max(1) => return Err(reply),
            Err(_) => {
                attempt += 1;
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
        }
    }
}

fn command_error(command: &'static str, reply: Reply) -> ReaderError {
    ReaderError::Command {
        command,
        code: reply.code,
        message: reply.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{power::NoopPowerSwitch, simulated::SimulatedTransport};
    use std::sync::{atomic::Ordering, Mutex};

    fn quick_settings() -> ReaderSettings {
        ReaderSettings {
            power_settle_ms: 0,
            retry_interval_ms: 0,
            ..ReaderSettings::default()
        }
    }

    fn reader_with(transport: SimulatedTransport, settings: ReaderSettings) -> RfidReader {
        RfidReader::new(Box::new(transport), Box::new(NoopPowerSwitch), settings)
    }

    fn collecting_sink() -> (TagSink, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: TagSink = Arc::new(move |sighting: TagSighting| {
            sink_seen.lock().unwrap().push(sighting.rfid);
        });
        (sink, seen)
    }

    #[test]
    fn init_applies_stored_power() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        reader.init_device().unwrap();

        assert_eq!(reader.state(), ReaderState::Ready);
        assert_eq!(reader.baud_rate(), Some(115_200));
        assert!(reader.info().is_some());
        assert_eq!(reader.query_power().unwrap().get(&1), Some(&10));
    }

    #[test]
    fn init_falls_back_to_the_next_baud_rate() {
        let settings = ReaderSettings {
            baud_rates: vec![460_800, 115_200],
            ..quick_settings()
        };
        let transport = SimulatedTransport::new(vec![]).accepting_baud(115_200);
        let mut reader = reader_with(transport, settings);

        reader.init_device().unwrap();
        assert_eq!(reader.baud_rate(), Some(115_200));
    }

    #[test]
    fn init_fails_when_no_baud_rate_answers() {
        let transport = SimulatedTransport::new(vec![]).accepting_baud(9_600);
        let mut reader = reader_with(transport, quick_settings());

        let err = reader.init_device().unwrap_err();
        assert!(matches!(err, ReaderError::OpenFailed { .. }));
        assert_eq!(reader.state(), ReaderState::Closed);
    }

    #[test]
    fn power_set_before_open_is_deferred() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        reader.set_power(27).unwrap();
        assert!(matches!(reader.query_power(), Err(ReaderError::NotPowered)));

        reader.init_device().unwrap();
        assert_eq!(reader.query_power().unwrap().get(&1), Some(&27));
    }

    #[test]
    fn power_outside_range_is_rejected() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        assert!(matches!(
            reader.set_power(40),
            Err(ReaderError::PowerOutOfRange { requested: 40, .. })
        ));
        assert_eq!(reader.rf_power(), 10);
    }

    #[test]
    fn scan_requires_an_open_reader() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        let (sink, _) = collecting_sink();

        assert!(matches!(
            reader.start_scan(sink.clone()),
            Err(ReaderError::InvalidTransition { .. })
        ));

        reader.init_device().unwrap();
        reader.close_device().unwrap();
        assert!(matches!(
            reader.start_scan(sink),
            Err(ReaderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn good_reads_reach_the_sink_and_failures_are_dropped() {
        let script = vec![
            EpcReport::read("E200AABB"),
            EpcReport::failed(3, "CRC error"),
            EpcReport::read("E200CCDD"),
        ];
        let transport = SimulatedTransport::new(vec![]).with_script(script);
        let mut reader = reader_with(transport, quick_settings());
        let (sink, seen) = collecting_sink();

        reader.init_device().unwrap();
        reader.start_scan(sink).unwrap();
        assert_eq!(reader.state(), ReaderState::Scanning);
        reader.stop_scan().unwrap();
        assert_eq!(reader.state(), ReaderState::Stopped);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["E200AABB".to_string(), "E200CCDD".to_string()]
        );
    }

    #[test]
    fn power_cannot_change_mid_scan() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        let (sink, _) = collecting_sink();
        reader.init_device().unwrap();
        reader.start_scan(sink).unwrap();

        assert!(matches!(
            reader.set_power(20),
            Err(ReaderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            reader.query_power(),
            Err(ReaderError::InvalidTransition { .. })
        ));
        reader.stop_scan().unwrap();
    }

    #[test]
    fn stop_retries_until_the_reader_acknowledges() {
        let settings = ReaderSettings {
            command_retries: 1,
            stop_attempts: 5,
            ..quick_settings()
        };
        let transport = SimulatedTransport::new(vec![]).failing_stops(3);
        let mut reader = reader_with(transport, settings);
        reader.init_device().unwrap();

        let (sink, _) = collecting_sink();
        reader.start_scan(sink).unwrap();
        reader.stop_scan().unwrap();
        assert_eq!(reader.state(), ReaderState::Stopped);
    }

    #[test]
    fn stop_gives_up_after_the_configured_attempts() {
        let settings = ReaderSettings {
            command_retries: 1,
            stop_attempts: 2,
            ..quick_settings()
        };
        let transport = SimulatedTransport::new(vec![]).failing_stops(5);
        let mut reader = reader_with(transport, settings);
        reader.init_device().unwrap();

        let (sink, _) = collecting_sink();
        let err = reader.start_scan(sink).unwrap_err();
        assert!(matches!(err, ReaderError::Command { command: "stop", .. }));
        assert_eq!(reader.state(), ReaderState::Ready);
    }

    #[test]
    fn failed_stop_still_lets_the_next_scan_start() {
        let settings = ReaderSettings {
            command_retries: 1,
            stop_attempts: 1,
            ..quick_settings()
        };
        let transport = SimulatedTransport::new(vec![]);
        let failures = transport.stop_failures();
        let mut reader = reader_with(transport, settings);
        reader.init_device().unwrap();

        let (sink, _) = collecting_sink();
        reader.start_scan(sink.clone()).unwrap();
        failures.store(1, Ordering::SeqCst);

        let err = reader.stop_scan().unwrap_err();
        assert!(matches!(err, ReaderError::Command { command: "stop", .. }));
        assert_eq!(reader.state(), ReaderState::Stopped);

        reader.start_scan(sink).unwrap();
        assert_eq!(reader.state(), ReaderState::Scanning);
        reader.stop_scan().unwrap();
    }

    #[test]
    fn stop_when_unpowered_is_a_no_op() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        reader.stop_scan().unwrap();
        assert_eq!(reader.state(), ReaderState::Init);
    }

    #[test]
    fn close_then_reopen() {
        let mut reader = reader_with(SimulatedTransport::new(vec![]), quick_settings());
        reader.init_device().unwrap();
        reader.close_device().unwrap();
        assert_eq!(reader.state(), ReaderState::Closed);
        reader.init_device().unwrap();
        assert_eq!(reader.state(), ReaderState::Ready);
    }
}
