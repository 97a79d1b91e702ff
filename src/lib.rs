pub mod db;
pub mod error;
#[cfg(not(feature = "desktop"))]
mod headless;
pub mod inventory;
pub mod reader;
pub mod scan;
pub mod settings;
mod utils;

use std::path::Path;

use anyhow::Context;
use db::Database;
use inventory::InventoryService;
use reader::ReaderHandle;
use scan::ScanController;
use settings::{EnvOverrides, ReaderBackend, SettingsStore};

#[cfg(feature = "desktop")]
use tauri::{Emitter, Manager};

/// Tags the simulated reader reports besides the ones already in the store.
const DEMO_TAGS: [&str; 6] = [
    "E2000017221101441890AABB",
    "E2000017221101441890CCDD",
    "E2000017221101441891EEFF",
    "E28011700000020B1C3D4E5F",
    "E28011700000020B1C3D4E60",
    "3000E2003412012A1100A0B1",
];

/// Everything the command layer reaches through `tauri::State`.
pub struct AppState {
    pub(crate) db: Database,
    pub(crate) reader: ReaderHandle,
    pub(crate) scan: ScanController,
    pub(crate) inventory: InventoryService,
    pub(crate) settings: SettingsStore,
}

impl AppState {
    /// Open the store in `data_dir`, close out sessions a crash left running,
    /// and wire up the reader and the services on top of it.
    pub(crate) async fn open(data_dir: &Path, backend: ReaderBackend) -> anyhow::Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

        let db = Database::new(data_dir.join("toymanager.sqlite3"))?;
        let recovered = ScanController::recover_interrupted_sessions(&db).await?;
        if recovered > 0 {
            log::warn!("Marked {recovered} interrupted scan session(s)");
        }

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let reader = match backend {
            ReaderBackend::Simulated => {
                let mut population: Vec<String> =
                    DEMO_TAGS.iter().map(|tag| tag.to_string()).collect();
                for item in db.get_all_items().await? {
                    if !population.contains(&item.rfid) {
                        population.push(item.rfid);
                    }
                }
                ReaderHandle::simulated(population, settings.reader())
            }
        };

        let scan = ScanController::new(db.clone(), reader.clone());
        let inventory = InventoryService::new(db.clone(), scan.clone()).await?;

        Ok(Self {
            db,
            reader,
            scan,
            inventory,
            settings,
        })
    }

    /// Stop scanning and power the reader down.
    pub(crate) async fn close(&self) {
        self.scan.shutdown().await;
        if let Err(err) = self.reader.run(|reader| reader.close_device()).await {
            log::error!("Failed to close reader: {err}");
        }
    }
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let overrides = match EnvOverrides::from_env() {
        Ok(overrides) => overrides,
        Err(err) => {
            eprintln!("toymanager: {err:#}");
            std::process::exit(2);
        }
    };

    // RUST_LOG, when set, wins over the level picked by TOYMANAGER_DEBUG.
    log_builder(overrides.log_level(), std::env::var("RUST_LOG").ok()).init();

    log::info!("Toy Manager starting up...");

    #[cfg(feature = "desktop")]
    run_desktop(overrides);

    #[cfg(not(feature = "desktop"))]
    {
        if let Err(err) = headless::run(overrides) {
            log::error!("{err:#}");
            std::process::exit(1);
        }
    }
}

fn log_builder(level: log::LevelFilter, rust_log: Option<String>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    match rust_log.filter(|filters| !filters.trim().is_empty()) {
        Some(filters) => builder.parse_filters(&filters),
        None => builder.filter_level(level),
    };
    builder
}

#[cfg(feature = "desktop")]
fn run_desktop(overrides: EnvOverrides) {
    use inventory::commands::{
        clear_items, delete_item, get_item, list_items, open_item_photo, save_item,
    };
    use reader::commands::{close_reader, get_reader_status, init_reader, query_power, set_power};
    use scan::commands::{dismiss_tag, get_scan_snapshot, list_scan_sessions, start_scan, stop_scan};

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(move |app| {
            let result = (|| -> anyhow::Result<()> {
                let data_dir = match overrides.data_dir.clone() {
                    Some(dir) => dir,
                    None => app
                        .path()
                        .app_data_dir()
                        .map_err(|err| anyhow::anyhow!(err))?,
                };

                let state = tauri::async_runtime::block_on(AppState::open(
                    &data_dir,
                    overrides.reader,
                ))?;

                let mut snapshots = state.scan.subscribe();
                let mut items = state.inventory.subscribe_items();
                app.manage(state);

                let handle = app.handle().clone();
                tauri::async_runtime::spawn(async move {
                    while snapshots.changed().await.is_ok() {
                        let snapshot = snapshots.borrow_and_update().clone();
                        if let Err(err) = handle.emit("scan-aggregate-changed", &snapshot) {
                            log::error!("Failed to emit scan-aggregate-changed: {err}");
                        }
                    }
                });

                let handle = app.handle().clone();
                tauri::async_runtime::spawn(async move {
                    while items.changed().await.is_ok() {
                        let latest = items.borrow_and_update().clone();
                        if let Err(err) = handle.emit("inventory-changed", &latest) {
                            log::error!("Failed to emit inventory-changed: {err}");
                        }
                    }
                });

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            get_scan_snapshot,
            start_scan,
            stop_scan,
            dismiss_tag,
            list_scan_sessions,
            list_items,
            get_item,
            save_item,
            delete_item,
            clear_items,
            open_item_photo,
            get_reader_status,
            init_reader,
            close_reader,
            query_power,
            set_power,
        ])
        .build(tauri::generate_context!())
        .expect("error while running tauri application")
        .run(|app, event| {
            if let tauri::RunEvent::Exit = event {
                let state = app.state::<AppState>();
                tauri::async_runtime::block_on(state.close());
            }
        });
}
