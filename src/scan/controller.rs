use std::{sync::Arc, time::Duration};

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    db::{Database, ScanMode, ScanSession, ScanSessionInfo, ScanSessionStatus},
    error::ScanError,
    reader::{ReaderHandle, TagSighting, TagSink},
};

use super::aggregator::{aggregate_loop, ScanEvent, ScanSnapshot};

/// How long a stop waits for classification lookups still in flight.
const FINISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs scan sessions: drives the reader, feeds its sightings to the
/// aggregator task and keeps the session history.
#[derive(Clone)]
pub struct ScanController {
    db: Database,
    reader: ReaderHandle,
    events: mpsc::UnboundedSender<ScanEvent>,
    snapshots: watch::Receiver<ScanSnapshot>,
    session: Arc<Mutex<Option<ScanSession>>>,
    shutdown: CancellationToken,
}

impl ScanController {
    /// Must be called from within a tokio runtime; spawns the aggregator task.
    pub fn new(db: Database, reader: ReaderHandle) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ScanSnapshot::default());
        let shutdown = CancellationToken::new();

        tokio::spawn(aggregate_loop(
            db.clone(),
            events_rx,
            events_tx.clone(),
            snapshot_tx,
            shutdown.clone(),
            FINISH_TIMEOUT,
        ));

        Self {
            db,
            reader,
            events: events_tx,
            snapshots: snapshot_rx,
            session: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    /// Close out sessions left `Running` by a crash or a killed app.
    pub async fn recover_interrupted_sessions(db: &Database) -> anyhow::Result<usize> {
        let stale = db.get_incomplete_scan_sessions().await?;
        let now = Utc::now();
        for session in &stale {
            warn!(
                "Recovered incomplete scan session {}; marking as Interrupted",
                session.id
            );
            db.mark_scan_session_interrupted(&session.id, now).await?;
        }
        Ok(stale.len())
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshots.clone()
    }

    pub async fn active_session(&self) -> Option<ScanSession> {
        self.session.lock().await.clone()
    }

    pub async fn start_session(&self, mode: ScanMode) -> Result<ScanSnapshot, ScanError> {
        let mut guard = self.session.lock().await;
        if let Some(active) = guard.as_ref() {
            return Err(ScanError::SessionActive {
                session_id: active.id.clone(),
            });
        }

        let session = ScanSession::begin(Uuid::new_v4().to_string(), mode, Utc::now());

        // The aggregate must be reset before the first sighting can arrive.
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(ScanEvent::Begin {
            session_id: session.id.clone(),
            mode,
            reply: reply_tx,
        })?;
        let snapshot = reply_rx.await.map_err(|_| ScanError::ControllerClosed)?;

        let events = self.events.clone();
        let sink: TagSink = Arc::new(move |sighting: TagSighting| {
            let _ = events.send(ScanEvent::Sighting(sighting));
        });
        if let Err(err) = self.reader.run(move |reader| reader.start_scan(sink)).await {
            self.finish_aggregate().await?;
            return Err(err.into());
        }

        if let Err(err) = self.db.insert_scan_session(&session).await {
            if let Err(stop_err) = self.reader.run(|reader| reader.stop_scan()).await {
                error!("Failed to stop reader after session insert failure: {stop_err}");
            }
            self.finish_aggregate().await?;
            return Err(ScanError::Storage(err));
        }

        info!("Scan session {} started in {} mode", session.id, mode.as_str());
        *guard = Some(session);
        Ok(snapshot)
    }

    /// Stop the reader and close the session. The tallies are taken once the
    /// lookups still in flight have resolved (bounded by `FINISH_TIMEOUT`). The
    /// aggregate stays readable until the next session starts, so the UI can
    /// act on the results.
    ///
    /// The session is closed even when the reader refuses to stop; that error
    /// is returned afterwards.
    pub async fn stop_session(&self) -> Result<ScanSessionInfo, ScanError> {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take() else {
            return Err(ScanError::NoActiveSession);
        };

        let stop_result = self.reader.run(|reader| reader.stop_scan()).await;
        if let Err(err) = &stop_result {
            error!("Reader did not stop cleanly for session {}: {err}", session.id);
        }

        let snapshot = self.finish_aggregate().await?;
        session.status = ScanSessionStatus::Completed;
        session.stopped_at = Some(Utc::now());
        session.known_tags = snapshot.aggregate.known.len() as u64;
        session.unknown_tags = snapshot.aggregate.unknown.len() as u64;
        session.total_sightings = snapshot.aggregate.total_sightings;

        self.db.finish_scan_session(&session).await?;
        stop_result?;

        Ok(ScanSessionInfo::from(session))
    }

    /// Feed a sighting that did not come from the attached reader.
    pub fn record_sighting(&self, sighting: TagSighting) -> Result<(), ScanError> {
        self.send(ScanEvent::Sighting(sighting))
    }

    pub async fn promote(&self, rfid: &str, name: &str) -> Result<bool, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::Promote {
            rfid: rfid.to_string(),
            name: name.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ScanError::ControllerClosed)
    }

    pub async fn demote(&self, rfid: &str) -> Result<bool, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::Demote {
            rfid: rfid.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ScanError::ControllerClosed)
    }

    /// Every inventory record is gone; nothing in this session is known any more.
    pub async fn demote_all(&self) -> Result<usize, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::DemoteAll { reply })?;
        rx.await.map_err(|_| ScanError::ControllerClosed)
    }

    pub async fn dismiss(&self, rfid: &str) -> Result<bool, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::Dismiss {
            rfid: rfid.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| ScanError::ControllerClosed)
    }

    /// Stop any running session and the aggregator task.
    pub async fn shutdown(&self) {
        match self.stop_session().await {
            Ok(info) => info!("Stopped scan session {} on shutdown", info.id),
            Err(ScanError::NoActiveSession) => {}
            Err(err) => error!("Failed to stop scan session on shutdown: {err}"),
        }
        self.shutdown.cancel();
    }

    async fn finish_aggregate(&self) -> Result<ScanSnapshot, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.send(ScanEvent::Finish { reply })?;
        rx.await.map_err(|_| ScanError::ControllerClosed)
    }

    fn send(&self, event: ScanEvent) -> Result<(), ScanError> {
        self.events
            .send(event)
            .map_err(|_| ScanError::ControllerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::ItemInput,
        reader::{EpcReport, NoopPowerSwitch, RfidReader, SimulatedTransport},
        settings::ReaderSettings,
    };
    use std::sync::mpsc as std_mpsc;
    use tempfile::TempDir;

    fn quick_settings() -> ReaderSettings {
        ReaderSettings {
            power_settle_ms: 0,
            retry_interval_ms: 0,
            ..ReaderSettings::default()
        }
    }

    fn scripted_reader(script: &[&str]) -> ReaderHandle {
        let reports = script.iter().map(|epc| EpcReport::read(*epc)).collect();
        let transport = SimulatedTransport::new(vec![]).with_script(reports);
        ReaderHandle::new(RfidReader::new(
            Box::new(transport),
            Box::new(NoopPowerSwitch),
            quick_settings(),
        ))
    }

    async fn setup(script: &[&str]) -> (TempDir, Database, ScanController) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("toymanager.sqlite3")).unwrap();
        let reader = scripted_reader(script);
        reader.run(|reader| reader.init_device()).await.unwrap();
        let controller = ScanController::new(db.clone(), reader);
        (dir, db, controller)
    }

    async fn wait_until_settled(controller: &ScanController, sightings: u64) -> ScanSnapshot {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if snapshot.aggregate.total_sightings == sightings
                        && snapshot.aggregate.pending == 0
                    {
                        return snapshot.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("scan did not settle")
    }

    /// Hold the DB worker on a job until the returned sender fires, then
    /// release it from another thread after `delay`.
    async fn stall_db_for(db: &Database, delay: Duration) {
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel();
        let db = db.clone();
        tokio::spawn(async move {
            db.execute(move |_| {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(10));
                Ok(())
            })
            .await
        });
        started_rx.await.unwrap();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            let _ = release_tx.send(());
        });
    }

    async fn wait_for(
        controller: &ScanController,
        done: impl Fn(&ScanSnapshot) -> bool,
    ) -> ScanSnapshot {
        let mut rx = controller.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if done(&snapshot) {
                        return snapshot.clone();
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("snapshot never matched")
    }

    #[tokio::test]
    async fn session_classifies_and_counts_reader_sightings() {
        let (_dir, db, controller) =
            setup(&["E200CCDD", "E200AABB", "E200AABB", "E200CCDD", "E200CCDD"]).await;
        db.upsert_item(&ItemInput::new("E200CCDD", "RedCar"))
            .await
            .unwrap();

        let started = controller.start_session(ScanMode::Inventory).await.unwrap();
        assert!(started.scanning);
        assert_eq!(started.mode, Some(ScanMode::Inventory));

        let snapshot = wait_until_settled(&controller, 5).await;
        assert_eq!(snapshot.aggregate.known["E200CCDD"].name, "RedCar");
        assert_eq!(snapshot.aggregate.known["E200CCDD"].count, 3);
        assert_eq!(snapshot.aggregate.unknown["E200AABB"], 2);

        let info = controller.stop_session().await.unwrap();
        assert_eq!(info.status, ScanSessionStatus::Completed);
        assert_eq!(info.known_tags, 1);
        assert_eq!(info.unknown_tags, 1);
        assert_eq!(info.total_sightings, 5);
        assert!(!controller.snapshot().scanning);

        let stored = db.get_scan_session(&info.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScanSessionStatus::Completed);
        assert_eq!(stored.total_sightings, 5);
    }

    #[tokio::test]
    async fn second_session_starts_from_an_empty_aggregate() {
        let (_dir, _db, controller) = setup(&["E200AABB"]).await;

        controller.start_session(ScanMode::StockIn).await.unwrap();
        wait_until_settled(&controller, 1).await;
        controller.stop_session().await.unwrap();

        let started = controller.start_session(ScanMode::StockOut).await.unwrap();
        assert_eq!(started.aggregate.total_sightings, 0);
        assert!(started.aggregate.unknown.is_empty());

        let snapshot = wait_until_settled(&controller, 1).await;
        assert_eq!(snapshot.aggregate.unknown["E200AABB"], 1);
        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn only_one_session_at_a_time() {
        let (_dir, _db, controller) = setup(&[]).await;

        controller.start_session(ScanMode::StockIn).await.unwrap();
        assert!(matches!(
            controller.start_session(ScanMode::Inventory).await,
            Err(ScanError::SessionActive { .. })
        ));
        controller.stop_session().await.unwrap();
        assert!(matches!(
            controller.stop_session().await,
            Err(ScanError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn reader_that_is_not_open_leaves_no_session_behind() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("toymanager.sqlite3")).unwrap();
        let controller = ScanController::new(db.clone(), scripted_reader(&[]));

        let err = controller.start_session(ScanMode::StockIn).await.unwrap_err();
        assert!(matches!(err, ScanError::Reader(_)));
        assert!(controller.active_session().await.is_none());
        assert!(!controller.snapshot().scanning);
        assert!(db.list_scan_sessions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sightings_outside_a_session_are_ignored() {
        let (_dir, _db, controller) = setup(&[]).await;

        controller.record_sighting(TagSighting::new("E200AABB")).unwrap();
        // Round-trip through the aggregator so the sighting has been handled.
        assert!(!controller.dismiss("E200AABB").await.unwrap());
        assert_eq!(controller.snapshot().aggregate.total_sightings, 0);
    }

    #[tokio::test]
    async fn manual_sightings_and_promotion_after_stop() {
        let (_dir, _db, controller) = setup(&[]).await;
        controller.start_session(ScanMode::StockIn).await.unwrap();

        for _ in 0..3 {
            controller.record_sighting(TagSighting::new("E200AABB")).unwrap();
        }
        wait_until_settled(&controller, 3).await;
        controller.stop_session().await.unwrap();

        assert!(controller.promote("E200AABB", "Teddy").await.unwrap());
        let snapshot = controller.snapshot();
        assert!(snapshot.aggregate.unknown.is_empty());
        assert_eq!(snapshot.aggregate.known["E200AABB"].count, 3);

        assert!(controller.demote("E200AABB").await.unwrap());
        assert!(controller.snapshot().aggregate.known.is_empty());
    }

    #[tokio::test]
    async fn stop_counts_tags_whose_lookups_are_still_running() {
        let (_dir, db, controller) = setup(&[]).await;
        db.upsert_item(&ItemInput::new("E2000000", "RedCar"))
            .await
            .unwrap();
        controller.start_session(ScanMode::Inventory).await.unwrap();

        stall_db_for(&db, Duration::from_millis(300)).await;
        for n in 0..20 {
            controller
                .record_sighting(TagSighting::new(format!("E200{n:04}")))
                .unwrap();
        }
        let info = controller.stop_session().await.unwrap();

        assert_eq!(info.known_tags, 1);
        assert_eq!(info.unknown_tags, 19);
        assert_eq!(info.total_sightings, 20);
        assert_eq!(controller.snapshot().aggregate.pending, 0);

        let stored = db.get_scan_session(&info.id).await.unwrap().unwrap();
        assert_eq!(stored.known_tags, 1);
        assert_eq!(stored.unknown_tags, 19);
    }

    #[tokio::test]
    async fn failed_lookup_is_counted_and_asked_again_on_the_next_sighting() {
        let (_dir, db, controller) = setup(&[]).await;
        db.upsert_item(&ItemInput::new("E200CCDD", "RedCar"))
            .await
            .unwrap();
        controller.start_session(ScanMode::Inventory).await.unwrap();

        db.execute(|conn| Ok(conn.execute_batch("ALTER TABLE inventory_items RENAME TO parked")?))
            .await
            .unwrap();
        controller.record_sighting(TagSighting::new("E200CCDD")).unwrap();
        let failed = wait_for(&controller, |s| s.aggregate.failed_lookups == 1).await;
        assert_eq!(failed.aggregate.pending, 0);
        assert!(failed.aggregate.known.is_empty());
        assert!(failed.aggregate.unknown.is_empty());

        db.execute(|conn| Ok(conn.execute_batch("ALTER TABLE parked RENAME TO inventory_items")?))
            .await
            .unwrap();
        controller.record_sighting(TagSighting::new("E200CCDD")).unwrap();
        let snapshot = wait_for(&controller, |s| s.aggregate.known.contains_key("E200CCDD")).await;
        assert_eq!(snapshot.aggregate.known["E200CCDD"].count, 1);
        assert_eq!(snapshot.aggregate.failed_lookups, 1);
        assert_eq!(snapshot.aggregate.total_sightings, 2);

        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn demote_all_forgets_known_tags() {
        let (_dir, db, controller) = setup(&["E200CCDD", "E200AABB"]).await;
        db.upsert_item(&ItemInput::new("E200CCDD", "RedCar"))
            .await
            .unwrap();
        controller.start_session(ScanMode::Inventory).await.unwrap();
        wait_until_settled(&controller, 2).await;

        assert_eq!(controller.demote_all().await.unwrap(), 1);
        let snapshot = controller.snapshot();
        assert!(snapshot.aggregate.known.is_empty());
        assert_eq!(snapshot.aggregate.unknown["E200AABB"], 1);
        controller.stop_session().await.unwrap();
    }

    #[tokio::test]
    async fn interrupted_sessions_are_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("toymanager.sqlite3")).unwrap();
        let stale = ScanSession::begin("crashed".into(), ScanMode::Inventory, Utc::now());
        db.insert_scan_session(&stale).await.unwrap();

        assert_eq!(ScanController::recover_interrupted_sessions(&db).await.unwrap(), 1);
        let stored = db.get_scan_session("crashed").await.unwrap().unwrap();
        assert_eq!(stored.status, ScanSessionStatus::Interrupted);
        assert_eq!(ScanController::recover_interrupted_sessions(&db).await.unwrap(), 0);
    }
}
