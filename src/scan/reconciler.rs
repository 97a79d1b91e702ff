//! Per-session bookkeeping of which tags were seen, and how often.
//!
//! Every tag identifier sighted during a scan session lives in exactly one of
//! three places:
//!
//! * `known`: the tag has an inventory record; we keep its display name.
//! * `unknown`: the inventory store has no record for it.
//! * `pending`: first seen this session, classification lookup still in flight.
//!
//! Only the first sighting of an identifier asks the store. Sightings that
//! arrive while that lookup is outstanding are counted against the pending
//! entry and carried over once the answer comes back, so a burst of reads of
//! a brand-new tag never issues duplicate lookups or loses counts.
//!
//! Lookups are tagged with the session generation they were issued under.
//! `reset` starts a new generation, and answers for an older one are ignored.
//!
//! The reconciler itself never performs I/O. It hands out [`LookupTicket`]s
//! and expects the owner to feed the answers back through [`Reconciler::resolve`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KnownTag {
    pub name: String,
    pub count: u64,
}

/// A classification lookup the owner must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTicket {
    pub rfid: String,
    pub generation: u64,
}

/// What a sighting did to the aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sighting {
    /// Counted against an already classified tag.
    Counted,
    /// Counted against a tag whose lookup is still in flight.
    Pending,
    /// First sighting this session; the lookup must be performed.
    Lookup(LookupTicket),
}

/// Where a resolved lookup put the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Known,
    Unknown,
    /// The answer belongs to an earlier session, or the tag was promoted,
    /// demoted or dismissed while the lookup was in flight.
    Stale,
}

/// Serializable view of the aggregate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanAggregate {
    pub known: BTreeMap<String, KnownTag>,
    pub unknown: BTreeMap<String, u64>,
    pub pending: usize,
    pub total_sightings: u64,
    pub failed_lookups: u64,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    known: BTreeMap<String, KnownTag>,
    unknown: BTreeMap<String, u64>,
    pending: HashMap<String, u64>,
    generation: u64,
    total_sightings: u64,
    failed_lookups: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the aggregate for a new session. Lookups still in flight become stale.
    pub fn reset(&mut self) -> u64 {
        self.known.clear();
        self.unknown.clear();
        self.pending.clear();
        self.total_sightings = 0;
        self.failed_lookups = 0;
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    pub fn on_sighting(&mut self, rfid: &str) -> Sighting {
        self.total_sightings = self.total_sightings.saturating_add(1);

        if let Some(tag) = self.known.get_mut(rfid) {
            tag.count = tag.count.saturating_add(1);
            return Sighting::Counted;
        }
        if let Some(count) = self.unknown.get_mut(rfid) {
            *count = count.saturating_add(1);
            return Sighting::Counted;
        }
        if let Some(count) = self.pending.get_mut(rfid) {
            *count = count.saturating_add(1);
            return Sighting::Pending;
        }

        self.pending.insert(rfid.to_string(), 1);
        Sighting::Lookup(LookupTicket {
            rfid: rfid.to_string(),
            generation: self.generation,
        })
    }

    /// Apply the answer to a lookup: `Some(name)` when the store has a record,
    /// `None` when it does not.
    ///
    /// A failed lookup drops the sightings collected for the tag and returns
    /// [`ScanError::LookupFailed`]; the next sighting asks the store again.
    pub fn resolve(
        &mut self,
        ticket: LookupTicket,
        lookup: anyhow::Result<Option<String>>,
    ) -> Result<Resolution, ScanError> {
        if ticket.generation != self.generation {
            return Ok(Resolution::Stale);
        }
        let Some(count) = self.pending.remove(&ticket.rfid) else {
            return Ok(Resolution::Stale);
        };

        match lookup {
            Ok(Some(name)) => {
                self.known.insert(ticket.rfid, KnownTag { name, count });
                Ok(Resolution::Known)
            }
            Ok(None) => {
                self.unknown.insert(ticket.rfid, count);
                Ok(Resolution::Unknown)
            }
            Err(err) => {
                self.failed_lookups = self.failed_lookups.saturating_add(1);
                Err(ScanError::LookupFailed {
                    rfid: ticket.rfid,
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    /// A tag seen this session was just saved to the inventory under `name`.
    /// Moves it to `known`, keeping its count. Returns `false` when the tag has
    /// not been seen this session.
    pub fn promote(&mut self, rfid: &str, name: &str) -> bool {
        if let Some(tag) = self.known.get_mut(rfid) {
            tag.name = name.to_string();
            return true;
        }

        let count = self
            .unknown
            .remove(rfid)
            .or_else(|| self.pending.remove(rfid));
        match count {
            Some(count) => {
                self.known.insert(
                    rfid.to_string(),
                    KnownTag {
                        name: name.to_string(),
                        count,
                    },
                );
                true
            }
            None => false,
        }
    }

    /// The tag's inventory record was deleted. Drops it from `known` (or
    /// cancels its pending classification) without re-adding it to `unknown`.
    pub fn demote(&mut self, rfid: &str) -> bool {
        self.known.remove(rfid).is_some() || self.pending.remove(rfid).is_some()
    }

    /// The whole inventory was cleared: nothing seen this session is backed by
    /// a record any more. Returns how many tags left `known` or `pending`.
    pub fn demote_all(&mut self) -> usize {
        let removed = self.known.len() + self.pending.len();
        self.known.clear();
        self.pending.clear();
        removed
    }

    /// Remove a tag from the session view entirely, whatever its classification.
    pub fn dismiss(&mut self, rfid: &str) -> bool {
        self.known.remove(rfid).is_some()
            || self.unknown.remove(rfid).is_some()
            || self.pending.remove(rfid).is_some()
    }

    pub fn known(&self) -> &BTreeMap<String, KnownTag> {
        &self.known
    }

    pub fn unknown(&self) -> &BTreeMap<String, u64> {
        &self.unknown
    }

    pub fn is_pending(&self, rfid: &str) -> bool {
        self.pending.contains_key(rfid)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn total_sightings(&self) -> u64 {
        self.total_sightings
    }

    pub fn aggregate(&self) -> ScanAggregate {
        ScanAggregate {
            known: self.known.clone(),
            unknown: self.unknown.clone(),
            pending: self.pending.len(),
            total_sightings: self.total_sightings,
            failed_lookups: self.failed_lookups,
        }
    }
}
