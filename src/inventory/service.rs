use log::{info, warn};
use tokio::sync::watch;

use crate::{
    db::{Database, InventoryItem, ItemInput},
    error::InventoryError,
    scan::ScanController,
};

/// User-facing edits of the item store. Every change is mirrored into the
/// running scan so the results screen moves tags between known and unknown
/// without a rescan.
pub struct InventoryService {
    db: Database,
    scan: ScanController,
    items_tx: watch::Sender<Vec<InventoryItem>>,
}

impl InventoryService {
    pub async fn new(db: Database, scan: ScanController) -> Result<Self, InventoryError> {
        let items = db.get_all_items().await?;
        let (items_tx, _) = watch::channel(items);
        Ok(Self { db, scan, items_tx })
    }

    pub async fn list_items(&self) -> Result<Vec<InventoryItem>, InventoryError> {
        Ok(self.db.get_all_items().await?)
    }

    pub async fn get_item(&self, rfid: &str) -> Result<Option<InventoryItem>, InventoryError> {
        Ok(self.db.get_item(rfid.trim()).await?)
    }

    /// Live list of all items, refreshed after every edit.
    pub fn subscribe_items(&self) -> watch::Receiver<Vec<InventoryItem>> {
        self.items_tx.subscribe()
    }

    /// Insert or replace the record for `input.rfid`. Saving an existing tag
    /// overwrites its name and detail and keeps its creation time.
    pub async fn save_item(&self, input: ItemInput) -> Result<InventoryItem, InventoryError> {
        let input = input.normalized();
        if input.rfid.is_empty() {
            return Err(InventoryError::Invalid("tag id is empty".into()));
        }
        if input.name.is_empty() {
            return Err(InventoryError::Invalid("name is empty".into()));
        }

        let item = self.db.upsert_item(&input).await?;
        info!("Saved item {} ({})", item.rfid, item.name);

        match self.scan.promote(&item.rfid, &item.name).await {
            Ok(true) => info!("Promoted {} in the current scan", item.rfid),
            Ok(false) => {}
            Err(err) => warn!("Could not update scan results for {}: {err}", item.rfid),
        }

        self.refresh().await?;
        Ok(item)
    }

    pub async fn delete_item(&self, rfid: &str) -> Result<(), InventoryError> {
        let rfid = rfid.trim();
        if !self.db.delete_item(rfid).await? {
            return Err(InventoryError::NotFound(rfid.to_string()));
        }
        info!("Deleted item {rfid}");

        if let Err(err) = self.scan.demote(rfid).await {
            warn!("Could not update scan results for {rfid}: {err}");
        }

        self.refresh().await
    }

    /// Drop every record. Known tags in the current scan lose their names too.
    pub async fn clear_items(&self) -> Result<usize, InventoryError> {
        let removed = self.db.clear_items().await?;
        warn!("Cleared {removed} items from the inventory");

        if let Err(err) = self.scan.demote_all().await {
            warn!("Could not update scan results after clearing: {err}");
        }

        self.refresh().await?;
        Ok(removed)
    }

    async fn refresh(&self) -> Result<(), InventoryError> {
        let items = self.db.get_all_items().await?;
        self.items_tx.send_replace(items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::ScanMode,
        reader::{NoopPowerSwitch, ReaderHandle, RfidReader, SimulatedTransport, TagSighting},
        settings::ReaderSettings,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, ScanController, InventoryService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("toymanager.sqlite3")).unwrap();
        let settings = ReaderSettings {
            power_settle_ms: 0,
            retry_interval_ms: 0,
            ..ReaderSettings::default()
        };
        let reader = ReaderHandle::new(RfidReader::new(
            Box::new(SimulatedTransport::new(vec![])),
            Box::new(NoopPowerSwitch),
            settings,
        ));
        reader.run(|reader| reader.init_device()).await.unwrap();
        let scan = ScanController::new(db.clone(), reader);
        let inventory = InventoryService::new(db, scan.clone()).await.unwrap();
        (dir, scan, inventory)
    }

    async fn wait_for_unknown(scan: &ScanController, rfid: &str, count: u64) {
        let mut rx = scan.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if rx.borrow_and_update().aggregate.unknown.get(rfid) == Some(&count) {
                    return;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("tag never showed up as unknown");
    }

    #[tokio::test]
    async fn save_validates_and_trims() {
        let (_dir, _scan, inventory) = setup().await;

        let err = inventory
            .save_item(ItemInput::new("  ", "Teddy"))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Invalid(_)));
        let err = inventory
            .save_item(ItemInput::new("E200AABB", " "))
            .await
            .unwrap_err();
        assert!(matches!(err, InventoryError::Invalid(_)));

        let item = inventory
            .save_item(ItemInput::new(" E200AABB ", " Teddy "))
            .await
            .unwrap();
        assert_eq!(item.rfid, "E200AABB");
        assert_eq!(item.name, "Teddy");
        assert_eq!(inventory.get_item("E200AABB").await.unwrap(), Some(item));
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_record_with_the_latest_values() {
        let (_dir, _scan, inventory) = setup().await;
        let items = inventory.subscribe_items();

        let first = inventory
            .save_item(ItemInput::new("E200AABB", "Teddy"))
            .await
            .unwrap();
        let second = inventory
            .save_item(ItemInput::new("E200AABB", "Teddy Bear").with_detail("brown"))
            .await
            .unwrap();

        assert_eq!(second.created_at, first.created_at);
        let listed = inventory.list_items().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Teddy Bear");
        assert_eq!(listed[0].detail, "brown");
        assert_eq!(*items.borrow(), listed);
    }

    #[tokio::test]
    async fn saving_a_scanned_tag_moves_it_to_known() {
        let (_dir, scan, inventory) = setup().await;
        scan.start_session(ScanMode::StockIn).await.unwrap();
        scan.record_sighting(TagSighting::new("E200AABB")).unwrap();
        scan.record_sighting(TagSighting::new("E200AABB")).unwrap();
        wait_for_unknown(&scan, "E200AABB", 2).await;

        inventory
            .save_item(ItemInput::new("E200AABB", "Teddy"))
            .await
            .unwrap();

        let snapshot = scan.snapshot();
        assert!(snapshot.aggregate.unknown.is_empty());
        assert_eq!(snapshot.aggregate.known["E200AABB"].name, "Teddy");
        assert_eq!(snapshot.aggregate.known["E200AABB"].count, 2);

        // Later sightings count against the new name.
        scan.record_sighting(TagSighting::new("E200AABB")).unwrap();
        assert!(!scan.dismiss("E200FFFF").await.unwrap());
        assert_eq!(scan.snapshot().aggregate.known["E200AABB"].count, 3);
        scan.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn deleting_removes_the_tag_from_known() {
        let (_dir, scan, inventory) = setup().await;
        inventory
            .save_item(ItemInput::new("E200CCDD", "RedCar"))
            .await
            .unwrap();

        scan.start_session(ScanMode::Inventory).await.unwrap();
        scan.record_sighting(TagSighting::new("E200CCDD")).unwrap();
        let mut rx = scan.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !rx.borrow_and_update().aggregate.known.contains_key("E200CCDD") {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        inventory.delete_item("E200CCDD").await.unwrap();
        let snapshot = scan.snapshot();
        assert!(snapshot.aggregate.known.is_empty());
        assert!(snapshot.aggregate.unknown.is_empty());
        assert!(inventory.list_items().await.unwrap().is_empty());

        let err = inventory.delete_item("E200CCDD").await.unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
        scan.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (_dir, _scan, inventory) = setup().await;
        for (rfid, name) in [("A1", "Ball"), ("A2", "Kite"), ("A3", "Yoyo")] {
            inventory.save_item(ItemInput::new(rfid, name)).await.unwrap();
        }

        assert_eq!(inventory.clear_items().await.unwrap(), 3);
        assert!(inventory.list_items().await.unwrap().is_empty());
        assert!(inventory.subscribe_items().borrow().is_empty());
    }

    #[tokio::test]
    async fn clearing_forgets_tags_known_in_the_live_scan() {
        let (_dir, scan, inventory) = setup().await;
        inventory
            .save_item(ItemInput::new("E200CCDD", "RedCar"))
            .await
            .unwrap();

        scan.start_session(ScanMode::Inventory).await.unwrap();
        scan.record_sighting(TagSighting::new("E200CCDD")).unwrap();
        scan.record_sighting(TagSighting::new("E200AABB")).unwrap();
        wait_for_unknown(&scan, "E200AABB", 1).await;
        let mut rx = scan.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !rx.borrow_and_update().aggregate.known.contains_key("E200CCDD") {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        assert_eq!(inventory.clear_items().await.unwrap(), 1);
        let snapshot = scan.snapshot();
        assert!(snapshot.aggregate.known.is_empty());
        assert_eq!(snapshot.aggregate.unknown["E200AABB"], 1);

        // The next sighting asks the now-empty store again.
        scan.record_sighting(TagSighting::new("E200CCDD")).unwrap();
        wait_for_unknown(&scan, "E200CCDD", 1).await;
        scan.stop_session().await.unwrap();
    }
}
