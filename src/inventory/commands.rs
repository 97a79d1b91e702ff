use tauri::State;
use tauri_plugin_opener::OpenerExt;

use crate::{
    db::{InventoryItem, ItemInput},
    AppState,
};

#[tauri::command]
pub async fn list_items(state: State<'_, AppState>) -> Result<Vec<InventoryItem>, String> {
    state.inventory.list_items().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_item(
    state: State<'_, AppState>,
    rfid: String,
) -> Result<Option<InventoryItem>, String> {
    state
        .inventory
        .get_item(&rfid)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn save_item(
    state: State<'_, AppState>,
    input: ItemInput,
) -> Result<InventoryItem, String> {
    state
        .inventory
        .save_item(input)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn delete_item(state: State<'_, AppState>, rfid: String) -> Result<(), String> {
    state
        .inventory
        .delete_item(&rfid)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn clear_items(state: State<'_, AppState>) -> Result<usize, String> {
    state
        .inventory
        .clear_items()
        .await
        .map_err(|e| e.to_string())
}

/// Show an item's photo in the system viewer.
#[tauri::command]
pub async fn open_item_photo(
    state: State<'_, AppState>,
    app_handle: tauri::AppHandle,
    rfid: String,
) -> Result<(), String> {
    let item = state
        .inventory
        .get_item(&rfid)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no item with tag {rfid}"))?;
    let photo = item
        .photo_path
        .ok_or_else(|| format!("item {rfid} has no photo"))?;

    app_handle
        .opener()
        .open_path(photo, None::<&str>)
        .map_err(|e| e.to_string())
}
