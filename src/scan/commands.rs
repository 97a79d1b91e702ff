use tauri::State;

use crate::{
    db::{ScanMode, ScanSessionInfo},
    AppState,
};

use super::ScanSnapshot;

#[tauri::command]
pub async fn get_scan_snapshot(state: State<'_, AppState>) -> Result<ScanSnapshot, String> {
    Ok(state.scan.snapshot())
}

#[tauri::command]
pub async fn start_scan(
    state: State<'_, AppState>,
    mode: Option<ScanMode>,
) -> Result<ScanSnapshot, String> {
    state
        .scan
        .start_session(mode.unwrap_or_default())
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn stop_scan(state: State<'_, AppState>) -> Result<ScanSessionInfo, String> {
    state.scan.stop_session().await.map_err(|e| e.to_string())
}

/// Remove a tag from the current results without touching the inventory.
#[tauri::command]
pub async fn dismiss_tag(state: State<'_, AppState>, rfid: String) -> Result<bool, String> {
    state.scan.dismiss(&rfid).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn list_scan_sessions(
    state: State<'_, AppState>,
    limit: Option<u32>,
) -> Result<Vec<ScanSessionInfo>, String> {
    let sessions = state
        .db
        .list_scan_sessions(limit.unwrap_or(50))
        .await
        .map_err(|e| e.to_string())?;
    Ok(sessions.into_iter().map(ScanSessionInfo::from).collect())
}
