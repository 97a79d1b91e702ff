use tauri::{AppHandle, Emitter, State};

use crate::{reader::PowerTable, AppState};

use super::ReaderStatus;

async fn emit_status(state: &AppState, app_handle: &AppHandle) -> Result<ReaderStatus, String> {
    let status = state.reader.status().await.map_err(|e| e.to_string())?;
    app_handle
        .emit("scan-state-changed", &status)
        .map_err(|e| e.to_string())?;
    Ok(status)
}

#[tauri::command]
pub async fn get_reader_status(state: State<'_, AppState>) -> Result<ReaderStatus, String> {
    state.reader.status().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn init_reader(
    state: State<'_, AppState>,
    app_handle: AppHandle,
) -> Result<ReaderStatus, String> {
    state
        .reader
        .run(|reader| reader.init_device())
        .await
        .map_err(|e| e.to_string())?;
    emit_status(&state, &app_handle).await
}

#[tauri::command]
pub async fn close_reader(
    state: State<'_, AppState>,
    app_handle: AppHandle,
) -> Result<ReaderStatus, String> {
    // A running session would otherwise be left Running with a dead reader.
    if state.scan.active_session().await.is_some() {
        state.scan.stop_session().await.map_err(|e| e.to_string())?;
    }
    state
        .reader
        .run(|reader| reader.close_device())
        .await
        .map_err(|e| e.to_string())?;
    emit_status(&state, &app_handle).await
}

#[tauri::command]
pub async fn query_power(state: State<'_, AppState>) -> Result<PowerTable, String> {
    state
        .reader
        .run(|reader| reader.query_power())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn set_power(
    state: State<'_, AppState>,
    app_handle: AppHandle,
    dbm: u8,
) -> Result<ReaderStatus, String> {
    state
        .reader
        .run(move |reader| reader.set_power(dbm))
        .await
        .map_err(|e| e.to_string())?;
    state
        .settings
        .set_rf_power(dbm)
        .map_err(|e| e.to_string())?;
    emit_status(&state, &app_handle).await
}
