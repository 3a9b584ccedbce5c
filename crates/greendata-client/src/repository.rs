//! In-memory materialized view of the ledger's records
//!
//! Readers take a lock-free [`RepositorySnapshot`]; refreshes publish a new
//! snapshot atomically. A refresh merges into the current snapshot rather
//! than overwriting it blindly:
//! - verification only moves forward (a stale `Unverified` read never
//!   replaces a `Verified` record)
//! - a record's ciphertext handle never changes once seen
//! - records missing from a refresh (skipped after a fetch error) are kept
//!
//! Concurrent refreshes are last-writer-wins on everything else.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use greendata_core::query::{self, EnergyStats};
use greendata_core::{DisclosureProof, DisplayValue, Record, RecordId};

/// Immutable view of all known records, in ledger listing order
#[derive(Debug, Clone, Default)]
pub struct RepositorySnapshot {
    records: Vec<Record>,
    index: HashMap<RecordId, usize>,
    generation: u64,
}

impl RepositorySnapshot {
    fn from_records(records: Vec<Record>, generation: u64) -> Self {
        let index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id.clone(), i))
            .collect();
        Self {
            records,
            index,
            generation,
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of refreshes applied to produce this snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self, now: u64, window_secs: u64) -> EnergyStats {
        query::stats(&self.records, now, window_secs)
    }

    pub fn search(&self, term: &str) -> Vec<&Record> {
        query::search(&self.records, term)
    }

    /// Merge freshly fetched records into this snapshot.
    ///
    /// Held records keep their position; ids seen for the first time are
    /// appended in fetched order.
    fn merge(&self, fetched: &[Record]) -> RepositorySnapshot {
        let mut incoming: HashMap<&RecordId, &Record> =
            fetched.iter().map(|r| (&r.id, r)).collect();

        let mut records = Vec::with_capacity(self.records.len() + fetched.len());
        for held in &self.records {
            match incoming.remove(&held.id) {
                Some(record) => records.push(merge_one(held, record)),
                None => records.push(held.clone()),
            }
        }
        records.extend(
            fetched
                .iter()
                .filter(|r| incoming.remove(&r.id).is_some())
                .cloned(),
        );

        RepositorySnapshot::from_records(records, self.generation + 1)
    }
}

fn merge_one(held: &Record, incoming: &Record) -> Record {
    let mut record = incoming.clone();
    if held.ciphertext != record.ciphertext {
        tracing::warn!(
            id = %record.id,
            held = %held.ciphertext,
            observed = %record.ciphertext,
            "Ciphertext handle changed on ledger, keeping original"
        );
        record.ciphertext = held.ciphertext;
    }
    if held.is_verified() && !record.is_verified() {
        tracing::warn!(id = %record.id, "Stale unverified read, keeping verified state");
    }
    record.verification = held.verification.clone().advance(record.verification);
    record
}

/// A plaintext obtained through an anchored proof but not yet seen as
/// `Verified` on the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalDisclosure {
    pub plaintext: u64,
    pub proof: DisclosureProof,
}

/// Outcome of one refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshSummary {
    pub fetched: usize,
    pub skipped: usize,
    pub total: usize,
    pub generation: u64,
}

/// Shared record store; written only by the lifecycle controller's refresh
#[derive(Default)]
pub struct RecordRepository {
    snapshot: ArcSwap<RepositorySnapshot>,
    provisional: Mutex<HashMap<RecordId, ProvisionalDisclosure>>,
}

impl RecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<RepositorySnapshot> {
        self.snapshot.load_full()
    }

    /// Merge a refresh result and publish the new snapshot
    pub(crate) fn apply_refresh(&self, fetched: Vec<Record>, skipped: usize) -> RefreshSummary {
        self.snapshot.rcu(|current| Arc::new(current.merge(&fetched)));
        let snapshot = self.snapshot.load_full();

        // provisional values are dropped once the ledger confirms
        self.lock_provisional()
            .retain(|id, _| !snapshot.get(id).is_some_and(Record::is_verified));

        RefreshSummary {
            fetched: fetched.len(),
            skipped,
            total: snapshot.len(),
            generation: snapshot.generation(),
        }
    }

    /// Merge a single freshly fetched record
    pub(crate) fn apply_record(&self, record: Record) {
        let verified = record.is_verified();
        let id = record.id.clone();
        self.snapshot
            .rcu(|current| Arc::new(current.merge(std::slice::from_ref(&record))));
        if verified {
            self.lock_provisional().remove(&id);
        }
    }

    pub(crate) fn record_provisional(&self, id: RecordId, disclosure: ProvisionalDisclosure) {
        if self.snapshot().get(&id).is_some_and(Record::is_verified) {
            return;
        }
        self.lock_provisional().insert(id, disclosure);
    }

    pub fn provisional(&self, id: &RecordId) -> Option<ProvisionalDisclosure> {
        self.lock_provisional().get(id).cloned()
    }

    /// What to show for a record's consumption, if the record is known
    pub fn display_value(&self, id: &RecordId) -> Option<DisplayValue> {
        let snapshot = self.snapshot();
        let record = snapshot.get(id)?;
        let provisional = self.provisional(id).map(|p| p.plaintext);
        Some(record.display_value(provisional))
    }

    fn lock_provisional(&self) -> MutexGuard<'_, HashMap<RecordId, ProvisionalDisclosure>> {
        self.provisional.lock().unwrap_or_else(|e| e.into_inner())
    }
}
