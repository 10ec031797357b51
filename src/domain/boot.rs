//! Boot handshake and heartbeat.
//!
//! Until `BootNotification` is accepted, the only call allowed to leave
//! the device is `BootNotification` itself; everything else stays queued
//! with frozen timers. A `Pending` answer retries with the interval the
//! Central System supplied, `Rejected` backs off the same way.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::operations::operation::{Operation, Request};
use crate::storage::{self, SharedFilesystem};

use super::Services;

const BOOT_STATS_FILE: &str = "bootstats.json";

/// Fallback retry interval when the Central System does not supply one.
const DEFAULT_BOOT_RETRY_S: i32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Accepted,
    Pending,
    Rejected,
}

/// Static device description sent with `BootNotification`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootCredentials {
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_point_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_box_serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meter_serial_number: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BootStats {
    boot_nr: u32,
}

pub struct BootService {
    credentials: BootCredentials,
    status: Option<RegistrationStatus>,
    retry_interval_s: i32,
    last_attempt_ms: Option<u64>,
    in_flight: bool,
    boot_nr: u32,
}

impl BootService {
    /// Initialise, bumping the persistent reboot counter.
    pub fn new(fs: Option<&SharedFilesystem>, credentials: BootCredentials) -> Self {
        let mut stats: BootStats = fs
            .and_then(|fs| storage::load_json(fs.as_ref(), BOOT_STATS_FILE).ok().flatten())
            .unwrap_or_default();
        stats.boot_nr = stats.boot_nr.wrapping_add(1);
        if let Some(fs) = fs {
            if let Err(e) = storage::store_json(fs.as_ref(), BOOT_STATS_FILE, &stats) {
                warn!(error = %e, "could not persist boot counter");
            }
        }
        info!(boot_nr = stats.boot_nr, "boot service initialised");
        Self {
            credentials,
            status: None,
            retry_interval_s: DEFAULT_BOOT_RETRY_S,
            last_attempt_ms: None,
            in_flight: false,
            boot_nr: stats.boot_nr,
        }
    }

    pub fn boot_nr(&self) -> u32 {
        self.boot_nr
    }

    pub fn credentials(&self) -> &BootCredentials {
        &self.credentials
    }

    pub fn is_accepted(&self) -> bool {
        self.status == Some(RegistrationStatus::Accepted)
    }

    /// Queue the next `BootNotification` when one is due.
    pub fn tick(&mut self, sv: &mut Services) {
        if self.is_accepted() || self.in_flight {
            return;
        }
        let now_ms = sv.time.uptime_ms();
        let due = match self.last_attempt_ms {
            None => true,
            Some(last) => {
                now_ms.saturating_sub(last) >= (self.retry_interval_s.max(1) as u64) * 1000
            }
        };
        if !due {
            return;
        }
        self.in_flight = true;
        self.last_attempt_ms = Some(now_ms);
        sv.outbox.push(Request::new(Operation::BootNotification));
    }

    /// Apply a `BootNotification.conf`. Returns `true` on the transition
    /// into `Accepted` (callers re-announce connector statuses then).
    pub fn on_conf(&mut self, status: RegistrationStatus, interval_s: i32) -> bool {
        self.in_flight = false;
        if interval_s > 0 {
            self.retry_interval_s = interval_s;
        } else {
            self.retry_interval_s = DEFAULT_BOOT_RETRY_S;
        }
        let was_accepted = self.is_accepted();
        self.status = Some(status);
        match status {
            RegistrationStatus::Accepted => {
                info!("boot notification accepted");
                !was_accepted
            }
            other => {
                warn!(status = ?other, retry_s = self.retry_interval_s, "boot notification deferred");
                false
            }
        }
    }

    pub fn on_failure(&mut self) {
        self.in_flight = false;
    }
}

// ── Heartbeat ──────────────────────────────────────────────────

pub struct HeartbeatService {
    last_heartbeat_ms: Option<u64>,
}

impl HeartbeatService {
    pub fn new() -> Self {
        Self {
            last_heartbeat_ms: None,
        }
    }

    pub fn tick(&mut self, sv: &mut Services, boot_accepted: bool) {
        if !boot_accepted {
            return;
        }
        let interval_s = sv.config.int(crate::config::HEARTBEAT_INTERVAL).unwrap_or(0);
        if interval_s <= 0 {
            return;
        }
        let now_ms = sv.time.uptime_ms();
        // Anchor the cadence at boot acceptance; the first heartbeat goes
        // out one interval later.
        let Some(last) = self.last_heartbeat_ms else {
            self.last_heartbeat_ms = Some(now_ms);
            return;
        };
        if now_ms.saturating_sub(last) >= interval_s as u64 * 1000 {
            self.last_heartbeat_ms = Some(now_ms);
            sv.outbox.push(Request::new(Operation::Heartbeat));
        }
    }

    /// Restart the cadence after an out-of-band heartbeat
    /// (`TriggerMessage`).
    pub fn mark_sent(&mut self, uptime_ms: u64) {
        self.last_heartbeat_ms = Some(uptime_ms);
    }
}

impl Default for HeartbeatService {
    fn default() -> Self {
        Self::new()
    }
}
