//! Time sources for the charge point core.
//!
//! The host supplies a [`Clock`]; the core layers a [`TimeService`] on top
//! that learns the Central System's wall clock from `BootNotification.conf`
//! and `Heartbeat.conf` and applies the learned offset to every timestamp it
//! produces. OCPP timestamps travel as ISO-8601 Zulu strings with
//! millisecond precision (24 characters, e.g. `2023-05-01T12:34:56.789Z`).

use std::cell::Cell;
use std::time::Instant;

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Timestamps at or before this instant are treated as "clock never set".
/// Records carrying earlier stamps were written before the device had any
/// notion of wall time.
pub fn epoch_cutoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap()
}

/// Returns `true` if `ts` is plausibly a real wall-clock reading.
pub fn is_valid_time(ts: DateTime<Utc>) -> bool {
    ts > epoch_cutoff()
}

/// Parse an ISO-8601 timestamp (`2023-05-01T12:34:56.789Z` or with a
/// numeric offset) into UTC. Returns `None` on malformed input.
pub fn parse_iso_8601(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp in the 24-character Zulu form OCPP 1.6 uses on the
/// wire.
pub fn to_iso_8601(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Whole seconds from `a` to `b`, if it fits in an `i32`.
pub fn delta_seconds(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<i32> {
    i32::try_from(b.signed_duration_since(a).num_seconds()).ok()
}

/// `ts + secs`, saturating on overflow.
pub fn add_seconds(ts: DateTime<Utc>, secs: i32) -> DateTime<Utc> {
    ts.checked_add_signed(Duration::seconds(secs as i64))
        .unwrap_or(ts)
}

// ── Clock ──────────────────────────────────────────────────────

/// Host-supplied time source.
///
/// `uptime_ms` must be monotonic; `now` may start out wrong (e.g. an RTC
/// that lost power) and is corrected by [`TimeService`] once the Central
/// System reports its time.
pub trait Clock {
    /// Monotonic milliseconds since some fixed origin.
    fn uptime_ms(&self) -> u64;

    /// Current wall-clock reading.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by `std::time` and `chrono`.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and the simulated EVSE.
pub struct SimClock {
    base: Cell<DateTime<Utc>>,
    uptime: Cell<u64>,
}

impl SimClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base: Cell::new(base),
            uptime: Cell::new(0),
        }
    }

    /// Advance both uptime and wall clock by `ms`.
    pub fn advance_ms(&self, ms: u64) {
        self.uptime.set(self.uptime.get() + ms);
        self.base
            .set(self.base.get() + Duration::milliseconds(ms as i64));
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.base.set(now);
    }
}

impl Clock for SimClock {
    fn uptime_ms(&self) -> u64 {
        self.uptime.get()
    }

    fn now(&self) -> DateTime<Utc> {
        self.base.get()
    }
}

impl<C: Clock> Clock for std::rc::Rc<C> {
    fn uptime_ms(&self) -> u64 {
        (**self).uptime_ms()
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

impl<C: Clock> Clock for std::sync::Arc<C> {
    fn uptime_ms(&self) -> u64 {
        (**self).uptime_ms()
    }

    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

// ── TimeService ────────────────────────────────────────────────

/// Wall clock as the core sees it: the host clock plus an offset learned
/// from the Central System.
pub struct TimeService {
    clock: Box<dyn Clock>,
    offset: Duration,
    synced: bool,
}

impl TimeService {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            offset: Duration::zero(),
            synced: false,
        }
    }

    /// Current corrected wall-clock time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now() + self.offset
    }

    /// Monotonic uptime in milliseconds.
    pub fn uptime_ms(&self) -> u64 {
        self.clock.uptime_ms()
    }

    /// Adopt the Central System's notion of current time.
    pub fn sync_to(&mut self, cs_time: DateTime<Utc>) {
        self.offset = cs_time.signed_duration_since(self.clock.now());
        self.synced = true;
    }

    /// Whether the Central System has reported its clock at least once.
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_8601_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2023, 5, 1, 12, 34, 56).unwrap()
            + Duration::milliseconds(789);
        let s = to_iso_8601(ts);
        assert_eq!(s, "2023-05-01T12:34:56.789Z");
        assert_eq!(s.len(), 24);
        assert_eq!(parse_iso_8601(&s), Some(ts));
    }

    #[test]
    fn parse_accepts_numeric_offset() {
        let ts = parse_iso_8601("2023-05-01T14:34:56.789+02:00").unwrap();
        assert_eq!(to_iso_8601(ts), "2023-05-01T12:34:56.789Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_iso_8601("not-a-date"), None);
        assert_eq!(parse_iso_8601(""), None);
    }

    #[test]
    fn delta_and_add() {
        let a = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        let b = add_seconds(a, 90);
        assert_eq!(delta_seconds(a, b), Some(90));
        assert_eq!(delta_seconds(b, a), Some(-90));
    }

    #[test]
    fn epoch_cutoff_gates_unset_clock() {
        assert!(!is_valid_time(Utc.timestamp_opt(0, 0).unwrap()));
        assert!(is_valid_time(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        ));
    }

    #[test]
    fn time_service_learns_offset() {
        let sim = SimClock::new(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        let mut time = TimeService::new(Box::new(sim));
        assert!(!time.is_synced());

        let cs_now = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        time.sync_to(cs_now);
        assert!(time.is_synced());
        assert_eq!(time.now(), cs_now);
    }
}
