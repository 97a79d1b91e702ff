//! Console mode for machines without the desktop shell: power the reader up,
//! run one stock-take, print the results and shut down.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use log::{info, warn};
use serde_json::json;

use crate::{
    db::{ScanMode, ScanSessionInfo},
    settings::EnvOverrides,
    AppState,
};

fn default_data_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("toymanager-data")
}

pub(crate) fn run(overrides: EnvOverrides) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let data_dir = overrides.data_dir.clone().unwrap_or_else(default_data_dir);
        info!("Using data dir {}", data_dir.display());

        let state = AppState::open(&data_dir, overrides.reader).await?;
        let result = stock_take(&state, Duration::from_secs(overrides.scan_secs)).await;
        state.close().await;
        result
    })
}

async fn stock_take(state: &AppState, duration: Duration) -> Result<()> {
    let settings = state.settings.reader();
    info!(
        "Opening reader on {} (baud {:?}, {} dBm)",
        settings.device, settings.baud_rates, settings.rf_power
    );
    state.reader.run(|reader| reader.init_device()).await?;
    let status = state.reader.status().await?;
    if let Some(info) = &status.info {
        info!(
            "Reader {} up, firmware {}",
            info.serial_number, info.firmware_compile_time
        );
    }

    state.scan.start_session(ScanMode::Inventory).await?;
    info!("Scanning for {}s (ctrl-c to stop early)", duration.as_secs());
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!("Could not listen for ctrl-c: {err}");
            }
        }
    }

    let summary = state.scan.stop_session().await?;
    let snapshot = state.scan.snapshot();
    let history: Vec<ScanSessionInfo> = state
        .db
        .list_scan_sessions(5)
        .await?
        .into_iter()
        .map(ScanSessionInfo::from)
        .collect();

    let report = json!({
        "session": summary,
        "results": snapshot,
        "inventorySize": state.inventory.list_items().await?.len(),
        "recentSessions": history,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
