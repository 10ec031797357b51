//! Per-connector metering: periodic and clock-aligned sampling, plus the
//! bounded stop-transaction data ring.

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::debug;

use crate::config;
use crate::operations::operation::{Operation, Request};
use crate::operations::types::{
    Location, MeterValue, Phase, ReadingContext, SampledValue,
};

use super::transaction::Transaction;
use super::Services;

/// Measurand served by the dedicated energy input.
pub const MEASURAND_ENERGY: &str = "Energy.Active.Import.Register";
/// Measurand served by the dedicated power input.
pub const MEASURAND_POWER: &str = "Power.Active.Import";

/// Upper bound of the stop-transaction data ring; the Transaction.Begin
/// and Transaction.End snapshots are never evicted.
pub const STOP_TX_DATA_MAX_SIZE: usize = 8;

/// Clock-aligned captures fire within this window around the boundary.
const ALIGNED_TOLERANCE_S: i64 = 60;

pub type MeterValueSampler = Box<dyn FnMut(ReadingContext) -> String>;
pub type EnergyInput = Box<dyn FnMut() -> i32>;
pub type PowerInput = Box<dyn FnMut() -> f32>;

/// A host-registered measurand source.
pub struct MeterInput {
    pub measurand: String,
    pub unit: Option<String>,
    pub phase: Option<Phase>,
    pub location: Option<Location>,
    sampler: MeterValueSampler,
}

#[derive(Default)]
struct Selectors {
    sampled: Vec<String>,
    aligned: Vec<String>,
    stop_sampled: Vec<String>,
    stop_aligned: Vec<String>,
    write_counts: [u32; 4],
    initialized: bool,
}

struct StopTxData {
    tx_nr: Option<u32>,
    entries: Vec<MeterValue>,
}

pub struct ConnectorMetering {
    connector_id: u32,
    inputs: Vec<MeterInput>,
    energy_input: Option<EnergyInput>,
    power_input: Option<PowerInput>,
    selectors: Selectors,
    last_periodic_ms: Option<u64>,
    last_aligned_boundary: Option<DateTime<Utc>>,
    stop_tx: StopTxData,
}

fn parse_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl ConnectorMetering {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            inputs: Vec::new(),
            energy_input: None,
            power_input: None,
            selectors: Selectors::default(),
            last_periodic_ms: None,
            last_aligned_boundary: None,
            stop_tx: StopTxData {
                tx_nr: None,
                entries: Vec::new(),
            },
        }
    }

    // ── Input wiring ───────────────────────────────────────

    pub fn set_energy_input(&mut self, cb: EnergyInput) {
        self.energy_input = Some(cb);
    }

    pub fn set_power_input(&mut self, cb: PowerInput) {
        self.power_input = Some(cb);
    }

    pub fn add_input(
        &mut self,
        sampler: MeterValueSampler,
        measurand: impl Into<String>,
        unit: Option<String>,
        phase: Option<Phase>,
        location: Option<Location>,
    ) {
        self.inputs.push(MeterInput {
            measurand: measurand.into(),
            unit,
            phase,
            location,
            sampler,
        });
    }

    /// Current energy register in Wh, used for `meterStart`/`meterStop`.
    pub fn read_energy(&mut self) -> Option<i32> {
        self.energy_input.as_mut().map(|cb| cb())
    }

    // ── Selector maintenance ───────────────────────────────

    /// Re-parse the four measurand list keys whenever one of them was
    /// written.
    fn refresh_selectors(&mut self, sv: &Services) {
        let counts = [
            sv.config.write_count(config::METER_VALUES_SAMPLED_DATA),
            sv.config.write_count(config::METER_VALUES_ALIGNED_DATA),
            sv.config.write_count(config::STOP_TXN_SAMPLED_DATA),
            sv.config.write_count(config::STOP_TXN_ALIGNED_DATA),
        ];
        if self.selectors.initialized && counts == self.selectors.write_counts {
            return;
        }
        self.selectors.sampled = parse_csv(sv.config.string(config::METER_VALUES_SAMPLED_DATA));
        self.selectors.aligned = parse_csv(sv.config.string(config::METER_VALUES_ALIGNED_DATA));
        self.selectors.stop_sampled = parse_csv(sv.config.string(config::STOP_TXN_SAMPLED_DATA));
        self.selectors.stop_aligned = parse_csv(sv.config.string(config::STOP_TXN_ALIGNED_DATA));
        self.selectors.write_counts = counts;
        self.selectors.initialized = true;
        debug!(
            connector_id = self.connector_id,
            sampled = ?self.selectors.sampled,
            "measurand selectors recomputed"
        );
    }

    // ── Sampling ───────────────────────────────────────────

    /// Read every selected measurand as one `MeterValue`; `None` if no
    /// selected measurand has a source.
    fn sample(
        &mut self,
        measurands: &[String],
        context: ReadingContext,
        timestamp: DateTime<Utc>,
    ) -> Option<MeterValue> {
        let mut values = Vec::new();
        for measurand in measurands {
            if measurand == MEASURAND_ENERGY {
                if let Some(cb) = self.energy_input.as_mut() {
                    values.push(SampledValue {
                        value: cb().to_string(),
                        context: Some(context),
                        format: None,
                        measurand: Some(MEASURAND_ENERGY.to_string()),
                        phase: None,
                        location: None,
                        unit: Some("Wh".to_string()),
                    });
                    continue;
                }
            }
            if measurand == MEASURAND_POWER {
                if let Some(cb) = self.power_input.as_mut() {
                    values.push(SampledValue {
                        value: format!("{:.1}", cb()),
                        context: Some(context),
                        format: None,
                        measurand: Some(MEASURAND_POWER.to_string()),
                        phase: None,
                        location: None,
                        unit: Some("W".to_string()),
                    });
                    continue;
                }
            }
            for input in self.inputs.iter_mut().filter(|i| &i.measurand == measurand) {
                values.push(SampledValue {
                    value: (input.sampler)(context),
                    context: Some(context),
                    format: None,
                    measurand: Some(input.measurand.clone()),
                    phase: input.phase,
                    location: input.location,
                    unit: input.unit.clone(),
                });
            }
        }
        if values.is_empty() {
            return None;
        }
        Some(MeterValue {
            timestamp,
            sampled_value: values,
        })
    }

    /// `TriggerMessage(MeterValues)` support.
    pub fn trigger_sample(&mut self, sv: &mut Services, tx: Option<&Transaction>) {
        let measurands = self.selectors.sampled.clone();
        if let Some(mv) = self.sample(&measurands, ReadingContext::Trigger, sv.time.now()) {
            self.dispatch(sv, tx, mv);
        }
    }

    fn dispatch(&self, sv: &mut Services, tx: Option<&Transaction>, mv: MeterValue) {
        let tx_nr = tx.filter(|tx| tx.is_running() && !tx.silent).map(|tx| tx.tx_nr);
        sv.outbox.push(Request::new(Operation::MeterValues {
            connector_id: self.connector_id,
            tx_nr,
            meter_values: vec![mv],
        }));
    }

    // ── Tick ───────────────────────────────────────────────

    pub fn tick(&mut self, sv: &mut Services, tx: Option<&Transaction>) {
        self.refresh_selectors(sv);
        self.tick_periodic(sv, tx);
        self.tick_aligned(sv, tx);
    }

    fn tick_periodic(&mut self, sv: &mut Services, tx: Option<&Transaction>) {
        let running = tx.map(|tx| tx.is_running()).unwrap_or(false);
        if !running {
            self.last_periodic_ms = None;
            return;
        }
        let interval_s = sv.config.int(config::METER_VALUE_SAMPLE_INTERVAL).unwrap_or(0);
        if interval_s <= 0 {
            return;
        }
        let now_ms = sv.time.uptime_ms();
        let Some(last) = self.last_periodic_ms else {
            // Anchor the cadence at the start of the transaction.
            self.last_periodic_ms = Some(now_ms);
            return;
        };
        let interval_ms = (interval_s as u64).saturating_mul(1000);
        if now_ms.saturating_sub(last) < interval_ms {
            return;
        }
        self.last_periodic_ms = Some(now_ms);

        let measurands = self.selectors.sampled.clone();
        if let Some(mv) = self.sample(&measurands, ReadingContext::SamplePeriodic, sv.time.now()) {
            self.dispatch(sv, tx, mv);
        }
        if sv.config.bool(config::STOP_TXN_DATA_CAPTURE_PERIODIC) == Some(true) {
            let stop_measurands = self.selectors.stop_sampled.clone();
            let snapshot =
                self.sample(&stop_measurands, ReadingContext::SamplePeriodic, sv.time.now());
            if let (Some(mv), Some(tx)) = (snapshot, tx) {
                self.push_stop_tx_data(sv, tx, mv);
            }
        }
    }

    fn tick_aligned(&mut self, sv: &mut Services, tx: Option<&Transaction>) {
        let interval_s = sv.config.int(config::CLOCK_ALIGNED_DATA_INTERVAL).unwrap_or(0);
        if interval_s <= 0 || !sv.time.is_synced() {
            return;
        }
        let now = sv.time.now();
        let midnight = match now.with_hour(0).and_then(|t| t.with_minute(0)).and_then(|t| t.with_second(0)).and_then(|t| t.with_nanosecond(0)) {
            Some(t) => t,
            None => return,
        };
        let since_midnight = now.signed_duration_since(midnight).num_seconds();
        let boundary =
            midnight + Duration::seconds(since_midnight - since_midnight % interval_s as i64);
        if self.last_aligned_boundary == Some(boundary) {
            return;
        }
        if now.signed_duration_since(boundary).num_seconds().abs() > ALIGNED_TOLERANCE_S {
            return;
        }
        self.last_aligned_boundary = Some(boundary);

        let measurands = self.selectors.aligned.clone();
        if let Some(mv) = self.sample(&measurands, ReadingContext::SampleClock, boundary) {
            self.dispatch(sv, tx, mv);
        }
        let running = tx.map(|tx| tx.is_running()).unwrap_or(false);
        if running {
            let stop_measurands = self.selectors.stop_aligned.clone();
            let snapshot = self.sample(&stop_measurands, ReadingContext::SampleClock, boundary);
            if let (Some(mv), Some(tx)) = (snapshot, tx) {
                self.push_stop_tx_data(sv, tx, mv);
            }
        }
    }

    // ── Stop-transaction data ──────────────────────────────

    pub fn on_transaction_begin(&mut self, sv: &mut Services, tx: &Transaction) {
        self.refresh_selectors(sv);
        self.stop_tx.tx_nr = Some(tx.tx_nr);
        self.stop_tx.entries.clear();
        let measurands = self.stop_measurands_or_energy();
        if let Some(mv) = self.sample(&measurands, ReadingContext::TransactionBegin, sv.time.now())
        {
            self.push_stop_tx_data(sv, tx, mv);
        }
    }

    pub fn on_transaction_end(&mut self, sv: &mut Services, tx: &Transaction) {
        let measurands = self.stop_measurands_or_energy();
        if let Some(mv) = self.sample(&measurands, ReadingContext::TransactionEnd, sv.time.now()) {
            self.push_stop_tx_data(sv, tx, mv);
        }
    }

    /// The stop-txn sampled list, falling back to the plain energy
    /// register so `transactionData` always brackets the session.
    fn stop_measurands_or_energy(&self) -> Vec<String> {
        if self.selectors.stop_sampled.is_empty() {
            vec![MEASURAND_ENERGY.to_string()]
        } else {
            self.selectors.stop_sampled.clone()
        }
    }

    /// Append a snapshot to the ring, evicting the intermediate entry
    /// whose neighbours are temporally closest once the ring is full. The
    /// first (Transaction.Begin) and last entries always survive.
    fn push_stop_tx_data(&mut self, sv: &mut Services, tx: &Transaction, mv: MeterValue) {
        if self.stop_tx.tx_nr != Some(tx.tx_nr) {
            self.stop_tx.tx_nr = Some(tx.tx_nr);
            self.stop_tx.entries.clear();
        }
        let entries = &mut self.stop_tx.entries;
        if entries.len() >= STOP_TX_DATA_MAX_SIZE && entries.len() >= 2 {
            // Candidate victims are everything between the Transaction.Begin
            // snapshot and the entry being pushed.
            let mut victim = 1;
            let mut best_gap = i64::MAX;
            for i in 1..entries.len() {
                let next = entries
                    .get(i + 1)
                    .map(|e| e.timestamp)
                    .unwrap_or(mv.timestamp);
                let gap = next
                    .signed_duration_since(entries[i - 1].timestamp)
                    .num_seconds();
                if gap < best_gap {
                    best_gap = gap;
                    victim = i;
                }
            }
            entries.remove(victim);
        }
        entries.push(mv);

        if !tx.volatile {
            for (i, entry) in entries.iter().enumerate() {
                sv.tx_store.store_meter_data(self.connector_id, tx.tx_nr, i, entry);
            }
            sv.tx_store
                .truncate_meter_data(self.connector_id, tx.tx_nr, entries.len());
        }
    }

    /// `transactionData` for `StopTransaction`, preferring the in-memory
    /// ring and falling back to the persisted side files after a reboot.
    pub fn transaction_data(
        &self,
        sv: &Services,
        tx_nr: u32,
    ) -> Vec<MeterValue> {
        if self.stop_tx.tx_nr == Some(tx_nr) && !self.stop_tx.entries.is_empty() {
            return self.stop_tx.entries.clone();
        }
        sv.tx_store.load_meter_data(self.connector_id, tx_nr)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;
    use crate::config::{declare_standard_keys, ConfigRegistry};
    use crate::domain::authorization::AuthorizationService;
    use crate::domain::reservation::ReservationService;
    use crate::domain::transaction_store::TransactionStore;
    use crate::operations::operation::Outbox;
    use crate::storage::MemoryFilesystem;
    use crate::support::clock::{SimClock, TimeService};

    struct Rig {
        config: ConfigRegistry,
        time: TimeService,
        tx_store: TransactionStore,
        reservations: ReservationService,
        auth: AuthorizationService,
        outbox: Outbox,
        tx_notify: Option<crate::domain::TxNotificationCallback>,
    }

    impl Rig {
        fn new() -> Self {
            let mut config = ConfigRegistry::new(None);
            declare_standard_keys(&mut config, 1);
            let clock = Rc::new(SimClock::new(
                Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap(),
            ));
            Self {
                config,
                time: TimeService::new(Box::new(clock)),
                tx_store: TransactionStore::open(Arc::new(MemoryFilesystem::new()), 1, 4),
                reservations: ReservationService::new(None, 1),
                auth: AuthorizationService::new(None, 16),
                outbox: Outbox::default(),
                tx_notify: None,
            }
        }

        fn with_sv<R>(&mut self, f: impl FnOnce(&mut Services) -> R) -> R {
            let mut sv = Services {
                config: &mut self.config,
                time: &mut self.time,
                tx_store: &mut self.tx_store,
                reservations: &mut self.reservations,
                auth: &mut self.auth,
                outbox: &mut self.outbox,
                tx_notify: &mut self.tx_notify,
                boot_nr: 1,
                online: true,
                boot_accepted: true,
            };
            f(&mut sv)
        }
    }

    fn volatile_tx() -> Transaction {
        let mut tx = Transaction::new(0, 1, "TAG");
        tx.volatile = true;
        tx
    }

    fn snapshot(offset_s: i64) -> MeterValue {
        MeterValue {
            timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
                + Duration::seconds(offset_s),
            sampled_value: vec![SampledValue::new(offset_s.to_string())],
        }
    }

    fn offsets(metering: &ConnectorMetering) -> Vec<i64> {
        let base = Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap();
        metering
            .stop_tx
            .entries
            .iter()
            .map(|mv| mv.timestamp.signed_duration_since(base).num_seconds())
            .collect()
    }

    #[test]
    fn ring_stays_bounded_and_keeps_the_begin_snapshot() {
        let mut rig = Rig::new();
        let mut metering = ConnectorMetering::new(1);
        let tx = volatile_tx();

        // Uniformly spaced snapshots, twice the ring capacity.
        rig.with_sv(|sv| {
            for i in 0..(2 * STOP_TX_DATA_MAX_SIZE as i64) {
                metering.push_stop_tx_data(sv, &tx, snapshot(i * 10));
            }
        });

        let offsets = offsets(&metering);
        assert_eq!(offsets.len(), STOP_TX_DATA_MAX_SIZE);
        // The first (Transaction.Begin) snapshot is never evicted.
        assert_eq!(offsets[0], 0);
        // The latest snapshot always survives its own push.
        assert_eq!(*offsets.last().unwrap(), 150);
    }

    #[test]
    fn eviction_picks_the_snapshot_with_the_closest_neighbours() {
        let mut rig = Rig::new();
        let mut metering = ConnectorMetering::new(1);
        let tx = volatile_tx();

        // Eight snapshots; the ones at 10 s and 11 s sit almost on top of
        // each other, everything else is 10+ s apart.
        let spacing = [0, 10, 11, 30, 40, 50, 60, 70];
        rig.with_sv(|sv| {
            for offset in spacing {
                metering.push_stop_tx_data(sv, &tx, snapshot(offset));
            }
            metering.push_stop_tx_data(sv, &tx, snapshot(80));
        });

        let offsets = offsets(&metering);
        // 10 s lost the least temporal resolution (neighbours 0 s and
        // 11 s), so it was the victim.
        assert_eq!(offsets, vec![0, 11, 30, 40, 50, 60, 70, 80]);
    }

    #[test]
    fn persisted_side_files_track_the_ring() {
        let mut rig = Rig::new();
        let mut metering = ConnectorMetering::new(1);
        // A journaled transaction: every push mirrors to sd- files.
        let mut tx = Transaction::new(0, 1, "TAG");
        tx.volatile = false;

        rig.with_sv(|sv| {
            for i in 0..(STOP_TX_DATA_MAX_SIZE as i64 + 2) {
                metering.push_stop_tx_data(sv, &tx, snapshot(i * 10));
            }
        });

        let persisted: Vec<MeterValue> =
            rig.with_sv(|sv| sv.tx_store.load_meter_data(1, 0));
        assert_eq!(persisted.len(), STOP_TX_DATA_MAX_SIZE);
        assert_eq!(persisted, metering.stop_tx.entries);
    }
}
