//! Transaction domain entity.
//!
//! A transaction is the persistent record of one charging session,
//! committed to its ring-buffer slot on every state-bearing change so a
//! power cut can always be replayed (see `transaction_store`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operations::types::Reason;

/// No transaction id assigned by the Central System.
pub const TX_ID_NONE: i32 = -1;
/// `StartTransaction` sent, id assignment pending.
pub const TX_ID_PENDING: i32 = 0;
/// Meter value not captured.
pub const METER_UNDEFINED: i32 = -1;

/// Report-to-CS progress of the start or stop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SyncState {
    #[default]
    NotRequested,
    Requested,
    Confirmed,
}

/// One charging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Local monotonically increasing sequence number per connector; the
    /// ring slot is `tx_nr % MAX_TX_CNT`.
    pub tx_nr: u32,
    pub connector_id: u32,
    pub id_tag: String,
    pub stop_id_tag: Option<String>,
    /// CS-assigned id; [`TX_ID_NONE`] or [`TX_ID_PENDING`] before that.
    pub transaction_id: i32,
    /// Wh at start, [`METER_UNDEFINED`] until captured.
    pub meter_start: i32,
    /// Wh at stop, [`METER_UNDEFINED`] until captured.
    pub meter_stop: i32,
    pub begin_timestamp: Option<DateTime<Utc>>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub stop_timestamp: Option<DateTime<Utc>>,
    /// Reboot counter at the start / stop event.
    pub start_boot_nr: u32,
    pub stop_boot_nr: u32,
    pub stop_reason: Option<Reason>,
    /// Reservation consumed by this session, if any.
    pub reservation_id: Option<i32>,

    /// Session intent still alive (cleared by `endTransaction`).
    pub active: bool,
    pub authorized: bool,
    pub id_tag_deauthorized: bool,
    /// Offline fallback session, never reported to the CS.
    pub silent: bool,
    pub started_sync: SyncState,
    pub stopped_sync: SyncState,
    /// In-memory only: allocated without a ring slot, never persisted.
    #[serde(skip)]
    pub volatile: bool,
}

impl Transaction {
    pub fn new(tx_nr: u32, connector_id: u32, id_tag: impl Into<String>) -> Self {
        Self {
            tx_nr,
            connector_id,
            id_tag: id_tag.into(),
            stop_id_tag: None,
            transaction_id: TX_ID_NONE,
            meter_start: METER_UNDEFINED,
            meter_stop: METER_UNDEFINED,
            begin_timestamp: None,
            start_timestamp: None,
            stop_timestamp: None,
            start_boot_nr: 0,
            stop_boot_nr: 0,
            stop_reason: None,
            reservation_id: None,
            active: true,
            authorized: false,
            id_tag_deauthorized: false,
            silent: false,
            started_sync: SyncState::NotRequested,
            stopped_sync: SyncState::NotRequested,
            volatile: false,
        }
    }

    // ── Lifecycle predicates ───────────────────────────────

    /// The start event has occurred locally (meter and timestamp captured).
    pub fn has_started(&self) -> bool {
        self.start_timestamp.is_some()
    }

    pub fn has_stopped(&self) -> bool {
        self.stop_timestamp.is_some()
    }

    /// Between the local start and stop events.
    pub fn is_running(&self) -> bool {
        self.has_started() && !self.has_stopped()
    }

    /// Never started and no longer wanted; the slot can be reused.
    pub fn is_aborted(&self) -> bool {
        !self.active && !self.has_started()
    }

    /// Nothing left to do: stopped and, unless silent, reported.
    pub fn is_completed(&self) -> bool {
        if self.is_aborted() {
            return true;
        }
        if self.silent {
            return self.has_stopped();
        }
        self.stopped_sync == SyncState::Confirmed
    }

    /// Charging allowed by OCPP rules at this instant.
    pub fn ocpp_permits_charge(&self) -> bool {
        self.active && self.authorized && !self.id_tag_deauthorized
    }

    // ── Events ─────────────────────────────────────────────

    /// Close the session intent. The stop event itself happens later,
    /// once the stop conditions hold.
    pub fn end(&mut self, reason: Reason) {
        if !self.active {
            return;
        }
        self.active = false;
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
    }

    /// Record the local start event.
    pub fn start(&mut self, meter_start: i32, timestamp: DateTime<Utc>, boot_nr: u32) {
        self.meter_start = meter_start;
        self.start_timestamp = Some(timestamp);
        self.start_boot_nr = boot_nr;
        if !self.silent {
            self.started_sync = SyncState::Requested;
        }
    }

    /// Record the local stop event.
    pub fn stop(
        &mut self,
        reason: Reason,
        meter_stop: i32,
        timestamp: DateTime<Utc>,
        boot_nr: u32,
    ) {
        self.active = false;
        // The first stop cause wins; later ones would overwrite e.g. a
        // DeAuthorized with the EVDisconnected that follows it.
        if self.stop_reason.is_none() {
            self.stop_reason = Some(reason);
        }
        self.meter_stop = meter_stop;
        self.stop_timestamp = Some(timestamp);
        self.stop_boot_nr = boot_nr;
        if !self.silent {
            self.stopped_sync = SyncState::Requested;
        }
    }
}
