//! Crash-safe transaction persistence.
//!
//! Each connector owns a ring of `max_tx_cnt` slots. A transaction with
//! sequence number `tx_nr` lives in file `tx-<connector>-<tx_nr % N>.json`;
//! its meter side files are `sd-<connector>-<slot>-<i>.json`. The ring
//! pointers `[tx_begin, tx_end)` are persisted separately and reconciled
//! against the actual slot files on boot.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::{self, SharedFilesystem};

use super::transaction::Transaction;

/// Default ring capacity per connector.
pub const DEFAULT_MAX_TX_CNT: u32 = 10;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RingPointers {
    tx_begin: u32,
    tx_end: u32,
}

struct ConnectorRing {
    connector_id: u32,
    pointers: RingPointers,
}

/// Per-connector ring-buffered transaction persistence.
pub struct TransactionStore {
    fs: SharedFilesystem,
    rings: Vec<ConnectorRing>,
    max_tx_cnt: u32,
}

pub fn tx_file_name(connector_id: u32, slot: u32) -> String {
    format!("tx-{connector_id}-{slot}.json")
}

pub fn meter_data_file_name(connector_id: u32, slot: u32, index: usize) -> String {
    format!("sd-{connector_id}-{slot}-{index}.json")
}

pub fn meter_data_prefix(connector_id: u32, slot: u32) -> String {
    format!("sd-{connector_id}-{slot}-")
}

fn pointer_file_name(connector_id: u32) -> String {
    format!("txstore-{connector_id}.json")
}

impl TransactionStore {
    /// Open the store for `connector_count` connectors (1-based ids) and
    /// rebuild each ring from disk.
    pub fn open(fs: SharedFilesystem, connector_count: usize, max_tx_cnt: u32) -> Self {
        let mut store = Self {
            fs,
            rings: (1..=connector_count as u32)
                .map(|connector_id| ConnectorRing {
                    connector_id,
                    pointers: RingPointers::default(),
                })
                .collect(),
            max_tx_cnt: max_tx_cnt.max(1),
        };
        for i in 0..store.rings.len() {
            store.recover_ring(i);
        }
        store
    }

    pub fn max_tx_cnt(&self) -> u32 {
        self.max_tx_cnt
    }

    fn ring(&self, connector_id: u32) -> Option<&ConnectorRing> {
        self.rings.iter().find(|r| r.connector_id == connector_id)
    }

    fn ring_mut(&mut self, connector_id: u32) -> Option<&mut ConnectorRing> {
        self.rings
            .iter_mut()
            .find(|r| r.connector_id == connector_id)
    }

    pub fn slot_of(&self, tx_nr: u32) -> u32 {
        tx_nr % self.max_tx_cnt
    }

    // ── Recovery ───────────────────────────────────────────

    /// Rebuild the ring pointers of ring index `i` by enumerating slot
    /// files: `tx_begin` is the lowest populated `tx_nr`, `tx_end` one
    /// past the highest. A pointer file, if readable, seeds the result so
    /// an empty ring keeps its progressed sequence numbers.
    fn recover_ring(&mut self, i: usize) {
        let connector_id = self.rings[i].connector_id;
        let fs = self.fs.clone();

        let mut pointers: RingPointers =
            storage::load_json(fs.as_ref(), &pointer_file_name(connector_id))
                .ok()
                .flatten()
                .unwrap_or_default();

        let mut lowest: Option<u32> = None;
        let mut highest: Option<u32> = None;
        let prefix = format!("tx-{connector_id}-");
        let mut slots = Vec::new();
        let _ = fs.visit(&prefix, &mut |name| slots.push(name.to_string()));
        for name in slots {
            let tx: Option<Transaction> = storage::load_json(fs.as_ref(), &name).ok().flatten();
            match tx {
                Some(tx) if tx.connector_id == connector_id => {
                    lowest = Some(lowest.map_or(tx.tx_nr, |l: u32| l.min(tx.tx_nr)));
                    highest = Some(highest.map_or(tx.tx_nr, |h: u32| h.max(tx.tx_nr)));
                }
                _ => {
                    warn!(name = %name, "unreadable transaction slot, removing");
                    storage::remove_silent(fs.as_ref(), &name);
                }
            }
        }

        if let (Some(lo), Some(hi)) = (lowest, highest) {
            pointers.tx_begin = lo;
            pointers.tx_end = hi + 1;
        }
        if pointers.tx_end < pointers.tx_begin {
            pointers = RingPointers::default();
        }
        if pointers.tx_end != 0 {
            info!(
                connector_id,
                tx_begin = pointers.tx_begin,
                tx_end = pointers.tx_end,
                "transaction ring recovered"
            );
        }
        self.rings[i].pointers = pointers.clone();
        self.persist_pointers(connector_id, &pointers);
    }

    fn persist_pointers(&self, connector_id: u32, pointers: &RingPointers) {
        if let Err(e) = storage::store_json(
            self.fs.as_ref(),
            &pointer_file_name(connector_id),
            pointers,
        ) {
            warn!(connector_id, error = %e, "could not persist ring pointers");
        }
    }

    // ── Slot access ────────────────────────────────────────

    pub fn load(&self, connector_id: u32, tx_nr: u32) -> Option<Transaction> {
        let name = tx_file_name(connector_id, self.slot_of(tx_nr));
        let tx: Option<Transaction> = storage::load_json(self.fs.as_ref(), &name).ok().flatten();
        tx.filter(|tx| tx.tx_nr == tx_nr)
    }

    /// The most recently allocated transaction, if its slot is populated.
    pub fn latest(&self, connector_id: u32) -> Option<Transaction> {
        let ring = self.ring(connector_id)?;
        if ring.pointers.tx_end == ring.pointers.tx_begin {
            return None;
        }
        self.load(connector_id, ring.pointers.tx_end - 1)
    }

    /// Sequence numbers currently inside `[tx_begin, tx_end)`.
    pub fn tx_numbers(&self, connector_id: u32) -> Vec<u32> {
        match self.ring(connector_id) {
            Some(ring) => (ring.pointers.tx_begin..ring.pointers.tx_end).collect(),
            None => Vec::new(),
        }
    }

    /// Atomic write of the transaction file.
    pub fn commit(&self, tx: &Transaction) -> bool {
        let name = tx_file_name(tx.connector_id, self.slot_of(tx.tx_nr));
        match storage::store_json(self.fs.as_ref(), &name, tx) {
            Ok(()) => true,
            Err(e) => {
                warn!(connector_id = tx.connector_id, tx_nr = tx.tx_nr, error = %e,
                    "could not commit transaction, degrading to volatile");
                false
            }
        }
    }

    /// Delete the transaction file and its meter side files.
    pub fn remove(&self, connector_id: u32, tx_nr: u32) {
        let slot = self.slot_of(tx_nr);
        storage::remove_silent(self.fs.as_ref(), &tx_file_name(connector_id, slot));
        let prefix = meter_data_prefix(connector_id, slot);
        let mut names = Vec::new();
        let _ = self.fs.visit(&prefix, &mut |name| names.push(name.to_string()));
        for name in names {
            storage::remove_silent(self.fs.as_ref(), &name);
        }
    }

    // ── Allocation ─────────────────────────────────────────

    /// Allocate the next slot for a new transaction. When the ring is
    /// full, first trims a silent or aborted newest entry from `tx_end`,
    /// then completed oldest entries from `tx_begin`. Returns `None` when
    /// every slot is still needed (triggers the silent-tx fallback).
    pub fn create_transaction(
        &mut self,
        connector_id: u32,
        id_tag: &str,
    ) -> Option<Transaction> {
        let max = self.max_tx_cnt;
        let ring = self.ring_mut(connector_id)?;
        let mut pointers = ring.pointers.clone();

        if pointers.tx_end - pointers.tx_begin >= max {
            // Newest-first trim of sessions that never made it to the CS.
            if pointers.tx_end > pointers.tx_begin {
                let newest = pointers.tx_end - 1;
                if let Some(tx) = self.load(connector_id, newest) {
                    if tx.is_aborted() || (tx.silent && !tx.is_running()) {
                        self.remove(connector_id, newest);
                        pointers.tx_end = newest;
                    }
                }
            }
            // Oldest-first trim of fully reported history.
            while pointers.tx_end - pointers.tx_begin >= max {
                match self.load(connector_id, pointers.tx_begin) {
                    Some(tx) if tx.is_completed() => {
                        self.remove(connector_id, pointers.tx_begin);
                        pointers.tx_begin += 1;
                    }
                    // Slot file lost: nothing to replay, reuse it.
                    None => pointers.tx_begin += 1,
                    Some(_) => break,
                }
            }
        }

        if pointers.tx_end - pointers.tx_begin >= max {
            return None;
        }

        let tx_nr = pointers.tx_end;
        pointers.tx_end += 1;

        let ring = self.ring_mut(connector_id)?;
        ring.pointers = pointers.clone();
        self.persist_pointers(connector_id, &pointers);

        let tx = Transaction::new(tx_nr, connector_id, id_tag);
        self.commit(&tx);
        Some(tx)
    }

    /// Drop an aborted newest transaction so the sequence can be reused.
    pub fn discard_latest_if_aborted(&mut self, connector_id: u32) {
        let Some(ring) = self.ring(connector_id) else { return };
        if ring.pointers.tx_end == ring.pointers.tx_begin {
            return;
        }
        let newest = ring.pointers.tx_end - 1;
        let aborted = self
            .load(connector_id, newest)
            .map(|tx| tx.is_aborted())
            .unwrap_or(true);
        if !aborted {
            return;
        }
        self.remove(connector_id, newest);
        let Some(ring) = self.ring_mut(connector_id) else { return };
        ring.pointers.tx_end = newest;
        let pointers = ring.pointers.clone();
        self.persist_pointers(connector_id, &pointers);
    }

    // ── Meter side files ───────────────────────────────────

    pub fn store_meter_data<T: Serialize>(
        &self,
        connector_id: u32,
        tx_nr: u32,
        index: usize,
        value: &T,
    ) {
        let name = meter_data_file_name(connector_id, self.slot_of(tx_nr), index);
        if let Err(e) = storage::store_json(self.fs.as_ref(), &name, value) {
            warn!(connector_id, tx_nr, index, error = %e, "could not store meter data");
        }
    }

    pub fn load_meter_data<T: for<'de> Deserialize<'de>>(
        &self,
        connector_id: u32,
        tx_nr: u32,
    ) -> Vec<T> {
        let slot = self.slot_of(tx_nr);
        let mut out = Vec::new();
        for index in 0.. {
            let name = meter_data_file_name(connector_id, slot, index);
            match storage::load_json(self.fs.as_ref(), &name) {
                Ok(Some(value)) => out.push(value),
                _ => break,
            }
        }
        out
    }

    /// Remove every meter side file of a transaction beyond `keep`.
    pub fn truncate_meter_data(&self, connector_id: u32, tx_nr: u32, keep: usize) {
        let slot = self.slot_of(tx_nr);
        for index in keep.. {
            let name = meter_data_file_name(connector_id, slot, index);
            match self.fs.remove(&name) {
                Ok(true) => {}
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operations::types::Reason;
    use crate::storage::MemoryFilesystem;
    use chrono::{TimeZone, Utc};

    fn store_with(fs: SharedFilesystem) -> TransactionStore {
        TransactionStore::open(fs, 2, 4)
    }

    fn complete(tx: &mut Transaction) {
        let ts = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        tx.authorized = true;
        tx.start(100, ts, 1);
        tx.stop(Reason::Local, 200, ts, 1);
        tx.started_sync = super::super::transaction::SyncState::Confirmed;
        tx.stopped_sync = super::super::transaction::SyncState::Confirmed;
    }

    #[test]
    fn allocates_sequential_tx_nrs() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs);
        let a = store.create_transaction(1, "A").unwrap();
        let b = store.create_transaction(1, "B").unwrap();
        assert_eq!(a.tx_nr, 0);
        assert_eq!(b.tx_nr, 1);
    }

    #[test]
    fn full_ring_evicts_oldest_completed() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs.clone());
        for i in 0..4 {
            let mut tx = store.create_transaction(1, &format!("T{i}")).unwrap();
            complete(&mut tx);
            store.commit(&tx);
        }
        assert!(fs.stat("tx-1-0.json").is_some());

        let fifth = store.create_transaction(1, "T4").unwrap();
        assert_eq!(fifth.tx_nr, 4);
        // Slot 0 was freed for tx_nr 4 (4 % 4 == 0) and rewritten.
        let reloaded = store.load(1, 4).unwrap();
        assert_eq!(reloaded.id_tag, "T4");
        assert_eq!(store.tx_numbers(1), vec![1, 2, 3, 4]);
    }

    #[test]
    fn full_ring_of_unreported_sessions_refuses() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs);
        for i in 0..4 {
            let mut tx = store.create_transaction(1, &format!("T{i}")).unwrap();
            let ts = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
            tx.start(100, ts, 1); // started but never confirmed by the CS
            store.commit(&tx);
        }
        assert!(store.create_transaction(1, "T4").is_none());
    }

    #[test]
    fn silent_newest_is_trimmed_before_oldest() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs);
        for i in 0..3 {
            let mut tx = store.create_transaction(1, &format!("T{i}")).unwrap();
            let ts = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
            tx.start(100, ts, 1);
            store.commit(&tx);
        }
        let mut silent = store.create_transaction(1, "S").unwrap();
        silent.silent = true;
        silent.active = false;
        store.commit(&silent);

        // tx 0..2 are unreported and must survive; the silent tx 3 yields.
        let tx = store.create_transaction(1, "T4").unwrap();
        assert_eq!(tx.tx_nr, 3);
    }

    #[test]
    fn recovery_rebuilds_pointers_from_files() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        {
            let mut store = store_with(fs.clone());
            for i in 0..3 {
                let mut tx = store.create_transaction(1, &format!("T{i}")).unwrap();
                if i == 0 {
                    complete(&mut tx);
                }
                store.commit(&tx);
            }
            // Simulate eviction of the completed head without pointer update.
            store.remove(1, 0);
            fs.remove("txstore-1.json").unwrap();
        }
        let store = store_with(fs);
        assert_eq!(store.tx_numbers(1), vec![1, 2]);
        assert_eq!(store.latest(1).unwrap().tx_nr, 2);
    }

    #[test]
    fn meter_data_files_follow_the_transaction() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs.clone());
        let tx = store.create_transaction(1, "T").unwrap();
        store.store_meter_data(1, tx.tx_nr, 0, &serde_json::json!({"v": 1}));
        store.store_meter_data(1, tx.tx_nr, 1, &serde_json::json!({"v": 2}));
        assert_eq!(
            store.load_meter_data::<serde_json::Value>(1, tx.tx_nr).len(),
            2
        );

        store.remove(1, tx.tx_nr);
        assert!(fs.stat("sd-1-0-0.json").is_none());
        assert!(fs.stat("sd-1-0-1.json").is_none());
    }

    #[test]
    fn connectors_have_independent_rings() {
        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut store = store_with(fs);
        let a = store.create_transaction(1, "A").unwrap();
        let b = store.create_transaction(2, "B").unwrap();
        assert_eq!(a.tx_nr, 0);
        assert_eq!(b.tx_nr, 0);
        assert_eq!(store.latest(2).unwrap().id_tag, "B");
    }
}
