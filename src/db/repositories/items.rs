use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::parse_datetime,
    models::{InventoryItem, ItemInput},
};

const ITEM_COLUMNS: &str = "rfid, name, detail, photo_path, created_at, updated_at";

fn row_to_item(row: &Row) -> Result<InventoryItem> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(InventoryItem {
        rfid: row.get("rfid")?,
        name: row.get("name")?,
        detail: row.get("detail")?,
        photo_path: row.get("photo_path")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn select_item(conn: &rusqlite::Connection, rfid: &str) -> Result<Option<InventoryItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM inventory_items WHERE rfid = ?1"
    ))?;
    let mut rows = stmt.query(params![rfid])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_item(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn get_all_items(&self) -> Result<Vec<InventoryItem>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM inventory_items ORDER BY created_at ASC, rfid ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }

            Ok(items)
        })
        .await
    }

    pub async fn get_item(&self, rfid: &str) -> Result<Option<InventoryItem>> {
        let rfid = rfid.to_string();
        self.execute(move |conn| select_item(conn, &rfid)).await
    }

    /// Display name for a tag, or `None` when the tag is not in the inventory.
    /// This is the classification lookup the scan pipeline issues.
    pub async fn lookup_item_name(&self, rfid: &str) -> Result<Option<String>> {
        let rfid = rfid.to_string();
        self.execute(move |conn| {
            let name = conn
                .query_row(
                    "SELECT name FROM inventory_items WHERE rfid = ?1",
                    params![rfid],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(name)
        })
        .await
    }

    /// Insert a record or replace the fields of the existing one with the same
    /// tag. The last writer wins; `created_at` survives the replace.
    pub async fn upsert_item(&self, input: &ItemInput) -> Result<InventoryItem> {
        let record = input.clone();
        self.execute(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO inventory_items (rfid, name, detail, photo_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(rfid) DO UPDATE SET
                     name = excluded.name,
                     detail = excluded.detail,
                     photo_path = excluded.photo_path,
                     updated_at = excluded.updated_at",
                params![record.rfid, record.name, record.detail, record.photo_path, now],
            )?;

            select_item(conn, &record.rfid)?
                .ok_or_else(|| anyhow!("item {} not found after upsert", record.rfid))
        })
        .await
    }

    /// Returns `false` when there was nothing to delete.
    pub async fn delete_item(&self, rfid: &str) -> Result<bool> {
        let rfid = rfid.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM inventory_items WHERE rfid = ?1", params![rfid])?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn clear_items(&self) -> Result<usize> {
        self.execute(|conn| Ok(conn.execute("DELETE FROM inventory_items", [])?))
            .await
    }

}
