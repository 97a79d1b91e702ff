use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    db::{Database, ScanMode},
    reader::TagSighting,
};

use super::reconciler::{LookupTicket, Reconciler, Resolution, ScanAggregate, Sighting};

// Logs every classification; flip off for long stock-takes.
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Sightings only bump counters; the UI gets at most this many of those
/// updates per second.
const PUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// What the UI renders while (and after) a scan runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSnapshot {
    pub session_id: Option<String>,
    pub mode: Option<ScanMode>,
    pub scanning: bool,
    #[serde(flatten)]
    pub aggregate: ScanAggregate,
}

pub(crate) enum ScanEvent {
    Begin {
        session_id: String,
        mode: ScanMode,
        reply: oneshot::Sender<ScanSnapshot>,
    },
    Sighting(TagSighting),
    LookupResolved {
        ticket: LookupTicket,
        lookup: anyhow::Result<Option<String>>,
    },
    /// Stop counting. Answered once every outstanding lookup has resolved,
    /// or when the finish timeout runs out.
    Finish {
        reply: oneshot::Sender<ScanSnapshot>,
    },
    Promote {
        rfid: String,
        name: String,
        reply: oneshot::Sender<bool>,
    },
    Demote {
        rfid: String,
        reply: oneshot::Sender<bool>,
    },
    DemoteAll {
        reply: oneshot::Sender<usize>,
    },
    Dismiss {
        rfid: String,
        reply: oneshot::Sender<bool>,
    },
}

struct Aggregator {
    db: Database,
    events_tx: mpsc::UnboundedSender<ScanEvent>,
    snapshots: watch::Sender<ScanSnapshot>,
    reconciler: Reconciler,
    session_id: Option<String>,
    mode: Option<ScanMode>,
    scanning: bool,
    /// Counts changed since the last publish.
    dirty: bool,
    finishing: Option<(oneshot::Sender<ScanSnapshot>, Instant)>,
}

/// Sole owner of the [`Reconciler`]. Every mutation of the session aggregate
/// happens here, one event at a time; lookups run elsewhere and come back as
/// [`ScanEvent::LookupResolved`].
pub(crate) async fn aggregate_loop(
    db: Database,
    mut events: mpsc::UnboundedReceiver<ScanEvent>,
    events_tx: mpsc::UnboundedSender<ScanEvent>,
    snapshots: watch::Sender<ScanSnapshot>,
    cancel_token: CancellationToken,
    finish_timeout: Duration,
) {
    let mut state = Aggregator {
        db,
        events_tx,
        snapshots,
        reconciler: Reconciler::new(),
        session_id: None,
        mode: None,
        scanning: false,
        dirty: false,
        finishing: None,
    };

    let mut ticker = tokio::time::interval(PUBLISH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let finish_deadline = state.finishing.as_ref().map(|(_, deadline)| *deadline);

        tokio::select! {
            event = events.recv() => match event {
                Some(event) => state.handle(event, finish_timeout),
                None => break,
            },
            _ = ticker.tick(), if state.dirty => {
                state.publish();
            }
            _ = sleep_until(finish_deadline), if finish_deadline.is_some() => {
                log_warn!(
                    "finishing scan with {} lookup(s) still outstanding",
                    state.reconciler.pending_len()
                );
                state.answer_finish();
            }
            _ = cancel_token.cancelled() => {
                log_info!("scan aggregator shutting down");
                break;
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Aggregator {
    fn handle(&mut self, event: ScanEvent, finish_timeout: Duration) {
        match event {
            ScanEvent::Begin {
                session_id,
                mode,
                reply,
            } => {
                if self.finishing.is_some() {
                    self.answer_finish();
                }
                let generation = self.reconciler.reset();
                log_info!("scan session {session_id} ({}) started, generation {generation}", mode.as_str());
                self.session_id = Some(session_id);
                self.mode = Some(mode);
                self.scanning = true;
                let _ = reply.send(self.publish());
            }
            ScanEvent::Sighting(sighting) => {
                if !self.scanning {
                    log_debug!("dropping sighting of {} outside a session", sighting.rfid);
                    return;
                }
                match self.reconciler.on_sighting(&sighting.rfid) {
                    Sighting::Lookup(ticket) => self.spawn_lookup(ticket),
                    Sighting::Counted | Sighting::Pending => {}
                }
                self.dirty = true;
            }
            ScanEvent::LookupResolved { ticket, lookup } => {
                let rfid = ticket.rfid.clone();
                let changed = match self.reconciler.resolve(ticket, lookup) {
                    Ok(Resolution::Known) => {
                        log_debug!("tag {rfid} is in the inventory");
                        true
                    }
                    Ok(Resolution::Unknown) => {
                        log_debug!("tag {rfid} is new");
                        true
                    }
                    Ok(Resolution::Stale) => {
                        log_debug!("ignoring stale lookup for {rfid}");
                        false
                    }
                    Err(err) => {
                        log_warn!("{err}");
                        true
                    }
                };
                self.publish_if(changed);
                self.settle_finish();
            }
            ScanEvent::Finish { reply } => {
                self.scanning = false;
                if let Some((earlier, _)) = self.finishing.take() {
                    let _ = earlier.send(self.publish());
                }
                self.finishing = Some((reply, Instant::now() + finish_timeout));
                self.settle_finish();
            }
            ScanEvent::Promote { rfid, name, reply } => {
                let changed = self.reconciler.promote(&rfid, &name);
                self.publish_if(changed);
                self.settle_finish();
                let _ = reply.send(changed);
            }
            ScanEvent::Demote { rfid, reply } => {
                let changed = self.reconciler.demote(&rfid);
                self.publish_if(changed);
                self.settle_finish();
                let _ = reply.send(changed);
            }
            ScanEvent::DemoteAll { reply } => {
                let removed = self.reconciler.demote_all();
                if removed > 0 {
                    log_info!("inventory cleared, {removed} tag(s) no longer known");
                }
                self.publish_if(removed > 0);
                self.settle_finish();
                let _ = reply.send(removed);
            }
            ScanEvent::Dismiss { rfid, reply } => {
                let changed = self.reconciler.dismiss(&rfid);
                self.publish_if(changed);
                self.settle_finish();
                let _ = reply.send(changed);
            }
        }
    }

    /// Answer a waiting `Finish` once nothing is left in flight.
    fn settle_finish(&mut self) {
        if self.finishing.is_some() && self.reconciler.pending_len() == 0 {
            self.answer_finish();
        }
    }

    fn answer_finish(&mut self) {
        let Some((reply, _)) = self.finishing.take() else {
            return;
        };
        let snapshot = self.publish();
        log_info!(
            "scan session {:?} finished: {} known, {} unknown, {} sightings",
            self.session_id,
            snapshot.aggregate.known.len(),
            snapshot.aggregate.unknown.len(),
            snapshot.aggregate.total_sightings
        );
        let _ = reply.send(snapshot);
    }

    fn spawn_lookup(&self, ticket: LookupTicket) {
        let db = self.db.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let lookup = db.lookup_item_name(&ticket.rfid).await;
            // The aggregator only goes away on shutdown, when the answer no longer matters.
            let _ = events_tx.send(ScanEvent::LookupResolved { ticket, lookup });
        });
    }

    /// Publish when something changed, or when sightings are waiting on the ticker.
    fn publish_if(&mut self, changed: bool) {
        if changed || self.dirty {
            self.publish();
        }
    }

    fn publish(&mut self) -> ScanSnapshot {
        self.dirty = false;
        let snapshot = ScanSnapshot {
            session_id: self.session_id.clone(),
            mode: self.mode,
            scanning: self.scanning,
            aggregate: self.reconciler.aggregate(),
        };
        self.snapshots.send_replace(snapshot.clone());
        snapshot
    }
}
