//! Smart charging: profile stacks, limit inference, composite schedules.
//!
//! Three stacks exist: `ChargePointMaxProfile` (connector 0),
//! `TxDefaultProfile` (connector 0 and per connector) and `TxProfile`
//! (per connector). The effective limit of a connector is the element-wise
//! minimum of its transaction limit (Tx stack, falling back to the
//! TxDefault stacks) and the charge point maximum.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::operations::types::{
    ChargingProfile, ChargingProfileKind, ChargingProfilePurpose, ChargingRateUnit,
    ChargingSchedule, ChargingSchedulePeriod, RecurrencyKind,
};
use crate::storage::{self, SharedFilesystem};

/// Stack levels 0..=8, matching `ChargeProfileMaxStackLevel`.
pub const MAX_STACK_LEVEL: usize = 8;

/// Hard cap of composite-schedule periods.
pub const MAX_SCHEDULE_PERIODS: usize = 24;

/// Marker for "no constraint" in a composite-schedule period.
pub const LIMIT_UNDEFINED: f64 = -1.0;

/// Phases assumed when converting between amps and watts and a profile
/// does not say otherwise.
const DEFAULT_PHASES: i32 = 3;

// ── Limits ─────────────────────────────────────────────────────

/// A time-local charging limit; `None` means unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChargeRate {
    pub power_w: Option<f64>,
    pub current_a: Option<f64>,
    pub number_phases: Option<i32>,
}

impl ChargeRate {
    fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
        match (a, b) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Element-wise minimum, absent quantities meaning "no constraint".
    pub fn combine_min(&self, other: &ChargeRate) -> ChargeRate {
        ChargeRate {
            power_w: Self::min_opt(self.power_w, other.power_w),
            current_a: Self::min_opt(self.current_a, other.current_a),
            number_phases: match (self.number_phases, other.number_phases) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, None) => a,
                (None, b) => b,
            },
        }
    }

    pub fn is_constrained(&self) -> bool {
        self.power_w.is_some() || self.current_a.is_some() || self.number_phases.is_some()
    }

    /// Express this limit in `unit`, converting across the denomination
    /// with `voltage` when necessary. [`LIMIT_UNDEFINED`] if unconstrained.
    pub fn in_unit(&self, unit: ChargingRateUnit, voltage: f64) -> f64 {
        let phases = self.number_phases.unwrap_or(DEFAULT_PHASES) as f64;
        match unit {
            ChargingRateUnit::Amp => {
                let converted = self.power_w.map(|w| w / (voltage * phases));
                ChargeRate::min_opt(self.current_a, converted).unwrap_or(LIMIT_UNDEFINED)
            }
            ChargingRateUnit::Watt => {
                let converted = self.current_a.map(|a| a * voltage * phases);
                ChargeRate::min_opt(self.power_w, converted).unwrap_or(LIMIT_UNDEFINED)
            }
        }
    }
}

/// Session context needed to resolve `Relative` profiles and `TxProfile`
/// matching.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionContext {
    pub start: Option<DateTime<Utc>>,
    pub transaction_id: Option<i32>,
}

pub type LimitOutput = Box<dyn FnMut(&ChargeRate)>;

// ── Profile evaluation ─────────────────────────────────────────

struct ProfileEval {
    rate: Option<ChargeRate>,
    min_charging_rate: Option<f64>,
    unit: ChargingRateUnit,
    next_change: Option<DateTime<Utc>>,
}

fn min_next(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Resolve the schedule start of `profile` at `t`.
fn resolve_start(
    profile: &ChargingProfile,
    t: DateTime<Utc>,
    session: &SessionContext,
) -> Option<DateTime<Utc>> {
    let schedule = &profile.charging_schedule;
    match profile.charging_profile_kind {
        ChargingProfileKind::Absolute => schedule.start_schedule,
        ChargingProfileKind::Relative => session.start,
        ChargingProfileKind::Recurring => {
            let base = schedule.start_schedule?;
            let period_s = match profile.recurrency_kind {
                Some(RecurrencyKind::Daily) | None => 86_400,
                Some(RecurrencyKind::Weekly) => 7 * 86_400,
            };
            let elapsed = t.signed_duration_since(base).num_seconds();
            let offset = elapsed.rem_euclid(period_s);
            Some(t - Duration::seconds(offset))
        }
    }
}

/// Evaluate one profile at time `t`, yielding the active limit (if any)
/// and the next instant its verdict could change.
fn evaluate(profile: &ChargingProfile, t: DateTime<Utc>, session: &SessionContext) -> ProfileEval {
    let schedule = &profile.charging_schedule;
    let inactive = |next| ProfileEval {
        rate: None,
        min_charging_rate: None,
        unit: schedule.charging_rate_unit,
        next_change: next,
    };

    if let Some(valid_from) = profile.valid_from {
        if t < valid_from {
            return inactive(Some(valid_from));
        }
    }
    if let Some(valid_to) = profile.valid_to {
        if t >= valid_to {
            return inactive(None);
        }
    }

    let Some(start) = resolve_start(profile, t, session) else {
        return inactive(None);
    };
    if t < start {
        return inactive(Some(start));
    }
    let elapsed = t.signed_duration_since(start).num_seconds();

    // End of the schedule window.
    let recurrence_s: Option<i64> = match profile.charging_profile_kind {
        ChargingProfileKind::Recurring => Some(match profile.recurrency_kind {
            Some(RecurrencyKind::Weekly) => 7 * 86_400,
            _ => 86_400,
        }),
        _ => None,
    };
    if let Some(duration) = schedule.duration {
        if elapsed >= duration as i64 {
            return inactive(recurrence_s.map(|r| start + Duration::seconds(r)));
        }
    }

    // Locate the period covering `elapsed`.
    let periods = &schedule.charging_schedule_period;
    let idx = periods
        .iter()
        .rposition(|p| (p.start_period as i64) <= elapsed);
    let Some(idx) = idx else {
        let first = periods.first().map(|p| start + Duration::seconds(p.start_period as i64));
        return inactive(first);
    };
    let period = &periods[idx];

    let mut boundary: Option<i64> = periods.get(idx + 1).map(|p| p.start_period as i64);
    if let Some(duration) = schedule.duration {
        boundary = match boundary {
            Some(b) => Some(b.min(duration as i64)),
            None => Some(duration as i64),
        };
    }
    let mut next_change = boundary.map(|b| start + Duration::seconds(b));
    if let Some(r) = recurrence_s {
        next_change = min_next(next_change, Some(start + Duration::seconds(r)));
    }
    if let Some(valid_to) = profile.valid_to {
        next_change = min_next(next_change, Some(valid_to));
    }

    let rate = match schedule.charging_rate_unit {
        ChargingRateUnit::Amp => ChargeRate {
            current_a: Some(period.limit),
            power_w: None,
            number_phases: period.number_phases,
        },
        ChargingRateUnit::Watt => ChargeRate {
            power_w: Some(period.limit),
            current_a: None,
            number_phases: period.number_phases,
        },
    };
    ProfileEval {
        rate: Some(rate),
        min_charging_rate: schedule.min_charging_rate,
        unit: schedule.charging_rate_unit,
        next_change,
    }
}

// ── File naming ────────────────────────────────────────────────

fn profile_file_name(purpose: ChargingProfilePurpose, connector_id: u32, level: usize) -> String {
    match purpose {
        ChargingProfilePurpose::ChargePointMaxProfile => format!("sc-cm-{level}.json"),
        ChargingProfilePurpose::TxDefaultProfile => format!("sc-td-{connector_id}-{level}.json"),
        ChargingProfilePurpose::TxProfile => format!("sc-tx-{connector_id}-{level}.json"),
    }
}

fn parse_file_name(name: &str) -> Option<(ChargingProfilePurpose, u32, usize)> {
    let stem = name.strip_suffix(".json")?;
    if let Some(rest) = stem.strip_prefix("sc-cm-") {
        return Some((
            ChargingProfilePurpose::ChargePointMaxProfile,
            0,
            rest.parse().ok()?,
        ));
    }
    let (purpose, rest) = if let Some(rest) = stem.strip_prefix("sc-td-") {
        (ChargingProfilePurpose::TxDefaultProfile, rest)
    } else if let Some(rest) = stem.strip_prefix("sc-tx-") {
        (ChargingProfilePurpose::TxProfile, rest)
    } else {
        return None;
    };
    let (conn, level) = rest.split_once('-')?;
    Some((purpose, conn.parse().ok()?, level.parse().ok()?))
}

// ── Service ────────────────────────────────────────────────────

type Stack = Vec<Option<ChargingProfile>>;

struct ConnectorStacks {
    tx_default: Stack,
    tx: Stack,
    output: Option<LimitOutput>,
    last_rate: Option<ChargeRate>,
    last_session: SessionContext,
    next_change: Option<DateTime<Utc>>,
}

fn empty_stack() -> Stack {
    vec![None; MAX_STACK_LEVEL + 1]
}

/// Filter of a `ClearChargingProfile` request; absent fields match
/// everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClearProfileFilter {
    pub profile_id: Option<i32>,
    pub connector_id: Option<u32>,
    pub purpose: Option<ChargingProfilePurpose>,
    pub stack_level: Option<i32>,
}

pub struct SmartChargingService {
    fs: Option<SharedFilesystem>,
    voltage: f64,
    cp_max: Stack,
    cp_tx_default: Stack,
    connectors: Vec<ConnectorStacks>,
    cp_output: Option<LimitOutput>,
    cp_last_rate: Option<ChargeRate>,
    cp_next_change: Option<DateTime<Utc>>,
}

impl SmartChargingService {
    pub fn new(fs: Option<SharedFilesystem>, connector_count: usize, voltage: f64) -> Self {
        Self {
            fs,
            voltage,
            cp_max: empty_stack(),
            cp_tx_default: empty_stack(),
            connectors: (0..connector_count)
                .map(|_| ConnectorStacks {
                    tx_default: empty_stack(),
                    tx: empty_stack(),
                    output: None,
                    last_rate: None,
                    last_session: SessionContext::default(),
                    next_change: None,
                })
                .collect(),
            cp_output: None,
            cp_last_rate: None,
            cp_next_change: None,
        }
    }

    pub fn set_limit_output(&mut self, connector_id: u32, cb: LimitOutput) {
        if connector_id == 0 {
            self.cp_output = Some(cb);
        } else if let Some(stacks) = self.connectors.get_mut(connector_id as usize - 1) {
            stacks.output = Some(cb);
        }
    }

    // ── Install / clear ────────────────────────────────────

    /// Structural validation shared by `SetChargingProfile` and the boot
    /// loader.
    pub fn validate(&self, connector_id: u32, profile: &ChargingProfile) -> bool {
        let level = profile.stack_level;
        if level < 0 || level as usize > MAX_STACK_LEVEL {
            return false;
        }
        match profile.charging_profile_purpose {
            ChargingProfilePurpose::ChargePointMaxProfile => {
                if connector_id != 0 {
                    return false;
                }
            }
            ChargingProfilePurpose::TxProfile => {
                if connector_id == 0 || connector_id as usize > self.connectors.len() {
                    return false;
                }
            }
            ChargingProfilePurpose::TxDefaultProfile => {
                if connector_id as usize > self.connectors.len() {
                    return false;
                }
            }
        }
        let periods = &profile.charging_schedule.charging_schedule_period;
        if periods.is_empty() || periods[0].start_period != 0 {
            return false;
        }
        periods.windows(2).all(|w| w[0].start_period < w[1].start_period)
    }

    /// Install a validated profile, replacing the occupant of the same
    /// `(purpose, stack level, connector)` slot.
    pub fn install(
        &mut self,
        connector_id: u32,
        mut profile: ChargingProfile,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.validate(connector_id, &profile) {
            return false;
        }
        // An Absolute schedule with no start anchors at install time.
        if profile.charging_profile_kind == ChargingProfileKind::Absolute
            && profile.charging_schedule.start_schedule.is_none()
        {
            profile.charging_schedule.start_schedule = Some(now);
        }
        let purpose = profile.charging_profile_purpose;
        let level = profile.stack_level as usize;
        info!(
            connector_id,
            profile_id = profile.charging_profile_id,
            purpose = %purpose,
            stack_level = level,
            "charging profile installed"
        );
        self.persist(purpose, connector_id, level, &profile);
        let slot = match (purpose, connector_id) {
            (ChargingProfilePurpose::ChargePointMaxProfile, _) => &mut self.cp_max[level],
            (ChargingProfilePurpose::TxDefaultProfile, 0) => &mut self.cp_tx_default[level],
            (ChargingProfilePurpose::TxDefaultProfile, c) => {
                &mut self.connectors[c as usize - 1].tx_default[level]
            }
            (ChargingProfilePurpose::TxProfile, c) => {
                &mut self.connectors[c as usize - 1].tx[level]
            }
        };
        *slot = Some(profile);
        self.invalidate();
        true
    }

    /// Remove every profile matching the filter; `true` if any matched.
    pub fn clear(&mut self, filter: ClearProfileFilter) -> bool {
        let mut removed = Vec::new();

        let mut sweep = |stack: &mut Stack, purpose: ChargingProfilePurpose, connector: u32| {
            for (level, slot) in stack.iter_mut().enumerate() {
                let matches = slot.as_ref().map_or(false, |p| {
                    filter.profile_id.map_or(true, |id| p.charging_profile_id == id)
                        && filter.connector_id.map_or(true, |c| c == connector)
                        && filter.purpose.map_or(true, |pp| pp == purpose)
                        && filter.stack_level.map_or(true, |l| l == p.stack_level)
                });
                if matches {
                    *slot = None;
                    removed.push((purpose, connector, level));
                }
            }
        };

        sweep(&mut self.cp_max, ChargingProfilePurpose::ChargePointMaxProfile, 0);
        sweep(&mut self.cp_tx_default, ChargingProfilePurpose::TxDefaultProfile, 0);
        for i in 0..self.connectors.len() {
            let connector = i as u32 + 1;
            sweep(&mut self.connectors[i].tx_default, ChargingProfilePurpose::TxDefaultProfile, connector);
            sweep(&mut self.connectors[i].tx, ChargingProfilePurpose::TxProfile, connector);
        }

        for (purpose, connector, level) in &removed {
            self.unpersist(*purpose, *connector, *level);
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "charging profiles cleared");
            self.invalidate();
        }
        !removed.is_empty()
    }

    /// Drop the TxProfiles of a connector once its transaction concluded.
    pub fn clear_tx_profiles(&mut self, connector_id: u32) {
        self.clear(ClearProfileFilter {
            connector_id: Some(connector_id),
            purpose: Some(ChargingProfilePurpose::TxProfile),
            ..Default::default()
        });
    }

    fn invalidate(&mut self) {
        self.cp_last_rate = None;
        self.cp_next_change = None;
        for c in &mut self.connectors {
            c.last_rate = None;
            c.next_change = None;
        }
    }

    // ── Persistence ────────────────────────────────────────

    fn persist(
        &self,
        purpose: ChargingProfilePurpose,
        connector_id: u32,
        level: usize,
        profile: &ChargingProfile,
    ) {
        let Some(fs) = self.fs.as_ref() else { return };
        let name = profile_file_name(purpose, connector_id, level);
        if let Err(e) = storage::store_json(fs.as_ref(), &name, profile) {
            warn!(name = %name, error = %e, "could not persist charging profile");
        }
    }

    fn unpersist(&self, purpose: ChargingProfilePurpose, connector_id: u32, level: usize) {
        let Some(fs) = self.fs.as_ref() else { return };
        storage::remove_silent(fs.as_ref(), &profile_file_name(purpose, connector_id, level));
    }

    /// Reload every persisted profile; corrupt files are deleted.
    pub fn load_all(&mut self, now: DateTime<Utc>) {
        let Some(fs) = self.fs.clone() else { return };
        let mut names = Vec::new();
        let _ = fs.visit("sc-", &mut |name| names.push(name.to_string()));
        for name in names {
            let Some((purpose, connector_id, level)) = parse_file_name(&name) else {
                continue;
            };
            let profile: Option<ChargingProfile> =
                storage::load_json(fs.as_ref(), &name).ok().flatten();
            let installed = profile
                .filter(|p| {
                    p.charging_profile_purpose == purpose && p.stack_level as usize == level
                })
                .map(|p| self.install(connector_id, p, now))
                .unwrap_or(false);
            if !installed {
                warn!(name = %name, "dropping unreadable charging profile");
                storage::remove_silent(fs.as_ref(), &name);
            }
        }
    }

    // ── Inference ──────────────────────────────────────────

    fn select_from_stack(
        stack: &Stack,
        t: DateTime<Utc>,
        session: &SessionContext,
        match_tx: bool,
        next: &mut Option<DateTime<Utc>>,
    ) -> Option<ChargeRate> {
        for slot in stack.iter().rev() {
            let Some(profile) = slot else { continue };
            if match_tx {
                if session.transaction_id.is_none() {
                    continue;
                }
                if let (Some(profile_tx), Some(tx)) =
                    (profile.transaction_id, session.transaction_id)
                {
                    if profile_tx != tx {
                        continue;
                    }
                }
            }
            let eval = evaluate(profile, t, session);
            *next = min_next(*next, eval.next_change);
            if let Some(rate) = eval.rate {
                return Some(rate);
            }
        }
        None
    }

    /// Effective limit of `connector_id` at `t`, with the earliest instant
    /// the verdict could change.
    pub fn infer_limit(
        &self,
        connector_id: u32,
        t: DateTime<Utc>,
        session: &SessionContext,
    ) -> (ChargeRate, Option<DateTime<Utc>>) {
        let mut next = None;

        let cp_rate = Self::select_from_stack(&self.cp_max, t, session, false, &mut next);

        if connector_id == 0 {
            return (cp_rate.unwrap_or_default(), next);
        }
        let Some(stacks) = self.connectors.get(connector_id as usize - 1) else {
            return (ChargeRate::default(), next);
        };

        let mut tx_rate = Self::select_from_stack(&stacks.tx, t, session, true, &mut next);
        if tx_rate.is_none() {
            // TxDefault: the connector-scoped profile shadows the
            // CP-scoped one at the same stack level.
            for level in (0..=MAX_STACK_LEVEL).rev() {
                let profile = stacks.tx_default[level]
                    .as_ref()
                    .or(self.cp_tx_default[level].as_ref());
                let Some(profile) = profile else { continue };
                let eval = evaluate(profile, t, session);
                next = min_next(next, eval.next_change);
                if let Some(rate) = eval.rate {
                    tx_rate = Some(rate);
                    break;
                }
            }
        }

        let rate = match (tx_rate, cp_rate) {
            (Some(tx), Some(cp)) => tx.combine_min(&cp),
            (Some(tx), None) => tx,
            (None, Some(cp)) => cp,
            (None, None) => ChargeRate::default(),
        };
        (rate, next)
    }

    // ── Periodic output ────────────────────────────────────

    /// Recompute limits and publish through the registered outputs when
    /// they changed. `sessions[i]` belongs to connector `i + 1`.
    pub fn tick(&mut self, now: DateTime<Utc>, sessions: &[SessionContext]) {
        let due = |next: Option<DateTime<Utc>>, last: Option<ChargeRate>| {
            last.is_none() || next.map(|n| now >= n).unwrap_or(false)
        };

        if due(self.cp_next_change, self.cp_last_rate) {
            let (rate, next) = self.infer_limit(0, now, &SessionContext::default());
            self.cp_next_change = next;
            if self.cp_last_rate != Some(rate) {
                self.cp_last_rate = Some(rate);
                if let Some(cb) = self.cp_output.as_mut() {
                    cb(&rate);
                }
            }
        }

        for i in 0..self.connectors.len() {
            let session = sessions.get(i).copied().unwrap_or_default();
            let session_changed = self.connectors[i].last_session != session;
            if session_changed {
                self.connectors[i].last_session = session;
            }
            if !session_changed
                && !due(self.connectors[i].next_change, self.connectors[i].last_rate)
            {
                continue;
            }
            let (rate, next) = self.infer_limit(i as u32 + 1, now, &session);
            let stacks = &mut self.connectors[i];
            stacks.next_change = next;
            if stacks.last_rate != Some(rate) {
                stacks.last_rate = Some(rate);
                if let Some(cb) = stacks.output.as_mut() {
                    cb(&rate);
                }
            }
        }
    }

    // ── Composite schedule ─────────────────────────────────

    /// Walk the live inference from `now` over `duration_s` seconds.
    pub fn composite_schedule(
        &self,
        connector_id: u32,
        duration_s: i32,
        unit: Option<ChargingRateUnit>,
        now: DateTime<Utc>,
        session: &SessionContext,
        max_periods: usize,
    ) -> ChargingSchedule {
        let horizon = now + Duration::seconds(duration_s.max(0) as i64);
        let unit = unit.unwrap_or_else(|| {
            // Auto-select: Watt when the limit in force at `now` is
            // power-denominated, Amp otherwise.
            let (rate, _) = self.infer_limit(connector_id, now, session);
            if rate.power_w.is_some() && rate.current_a.is_none() {
                ChargingRateUnit::Watt
            } else {
                ChargingRateUnit::Amp
            }
        });

        let mut periods: Vec<ChargingSchedulePeriod> = Vec::new();
        let mut t = now;
        while t < horizon && periods.len() < max_periods.min(MAX_SCHEDULE_PERIODS) {
            let (rate, next) = self.infer_limit(connector_id, t, session);
            let limit = rate.in_unit(unit, self.voltage);
            let start_period = t.signed_duration_since(now).num_seconds() as i32;
            let same_as_previous = periods
                .last()
                .map(|p: &ChargingSchedulePeriod| {
                    (p.limit - limit).abs() < f64::EPSILON
                        && p.number_phases == rate.number_phases
                })
                .unwrap_or(false);
            if !same_as_previous {
                periods.push(ChargingSchedulePeriod {
                    start_period,
                    limit,
                    number_phases: rate.number_phases,
                });
            }
            match next {
                Some(next) if next > t => t = next,
                _ => break,
            }
        }

        ChargingSchedule {
            duration: Some(duration_s),
            start_schedule: Some(now),
            charging_rate_unit: unit,
            charging_schedule_period: periods,
            min_charging_rate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 1, 12, 0, 0).unwrap()
    }

    fn profile(
        id: i32,
        purpose: ChargingProfilePurpose,
        level: i32,
        unit: ChargingRateUnit,
        periods: &[(i32, f64)],
    ) -> ChargingProfile {
        ChargingProfile {
            charging_profile_id: id,
            transaction_id: None,
            stack_level: level,
            charging_profile_purpose: purpose,
            charging_profile_kind: ChargingProfileKind::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule {
                duration: Some(86_400),
                start_schedule: Some(t0()),
                charging_rate_unit: unit,
                charging_schedule_period: periods
                    .iter()
                    .map(|&(start_period, limit)| ChargingSchedulePeriod {
                        start_period,
                        limit,
                        number_phases: None,
                    })
                    .collect(),
                min_charging_rate: None,
            },
        }
    }

    fn service() -> SmartChargingService {
        SmartChargingService::new(None, 2, 230.0)
    }

    #[test]
    fn tx_default_combines_with_cp_max() {
        let mut scs = service();
        assert!(scs.install(
            1,
            profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, ChargingRateUnit::Amp, &[(0, 16.0)]),
            t0(),
        ));
        assert!(scs.install(
            0,
            profile(2, ChargingProfilePurpose::ChargePointMaxProfile, 0, ChargingRateUnit::Amp, &[(0, 10.0)]),
            t0(),
        ));

        let session = SessionContext::default();
        let (rate, _) = scs.infer_limit(1, t0() + Duration::seconds(5), &session);
        assert_eq!(rate.current_a, Some(10.0));

        assert!(scs.clear(ClearProfileFilter {
            purpose: Some(ChargingProfilePurpose::ChargePointMaxProfile),
            ..Default::default()
        }));
        let (rate, _) = scs.infer_limit(1, t0() + Duration::seconds(5), &session);
        assert_eq!(rate.current_a, Some(16.0));
    }

    #[test]
    fn higher_stack_level_wins() {
        let mut scs = service();
        scs.install(
            1,
            profile(1, ChargingProfilePurpose::TxDefaultProfile, 0, ChargingRateUnit::Amp, &[(0, 16.0)]),
            t0(),
        );
        scs.install(
            1,
            profile(2, ChargingProfilePurpose::TxDefaultProfile, 3, ChargingRateUnit::Amp, &[(0, 6.0)]),
            t0(),
        );
        let (rate, _) = scs.infer_limit(1, t0(), &SessionContext::default());
        assert_eq!(rate.current_a, Some(6.0));
    }

    #[test]
    fn tx_profile_requires_matching_transaction() {
        let mut scs = service();
        let mut p = profile(9, ChargingProfilePurpose::TxProfile, 0, ChargingRateUnit::Amp, &[(0, 8.0)]);
        p.transaction_id = Some(42);
        scs.install(1, p, t0());

        let no_tx = SessionContext::default();
        let (rate, _) = scs.infer_limit(1, t0(), &no_tx);
        assert_eq!(rate.current_a, None);

        let other_tx = SessionContext {
            start: Some(t0()),
            transaction_id: Some(7),
        };
        let (rate, _) = scs.infer_limit(1, t0(), &other_tx);
        assert_eq!(rate.current_a, None);

        let matching = SessionContext {
            start: Some(t0()),
            transaction_id: Some(42),
        };
        let (rate, _) = scs.infer_limit(1, t0(), &matching);
        assert_eq!(rate.current_a, Some(8.0));
    }

    #[test]
    fn relative_profile_follows_session_start() {
        let mut scs = service();
        let mut p = profile(3, ChargingProfilePurpose::TxDefaultProfile, 0, ChargingRateUnit::Amp, &[(0, 32.0), (1800, 16.0)]);
        p.charging_profile_kind = ChargingProfileKind::Relative;
        p.charging_schedule.start_schedule = None;
        scs.install(1, p, t0());

        let session = SessionContext {
            start: Some(t0()),
            transaction_id: Some(1),
        };
        let (early, _) = scs.infer_limit(1, t0() + Duration::seconds(60), &session);
        assert_eq!(early.current_a, Some(32.0));
        let (late, _) = scs.infer_limit(1, t0() + Duration::seconds(2000), &session);
        assert_eq!(late.current_a, Some(16.0));
    }

    #[test]
    fn recurring_daily_wraps() {
        let mut scs = service();
        let mut p = profile(4, ChargingProfilePurpose::ChargePointMaxProfile, 0, ChargingRateUnit::Amp, &[(0, 20.0), (3600, 10.0)]);
        p.charging_profile_kind = ChargingProfileKind::Recurring;
        p.recurrency_kind = Some(RecurrencyKind::Daily);
        p.charging_schedule.duration = Some(7200);
        scs.install(0, p, t0());

        let session = SessionContext::default();
        // Two days later, 30 min into the recurrence window.
        let t = t0() + Duration::days(2) + Duration::seconds(1800);
        let (rate, _) = scs.infer_limit(0, t, &session);
        assert_eq!(rate.current_a, Some(20.0));
        // Past the window, before the next day's recurrence.
        let t = t0() + Duration::days(2) + Duration::seconds(7300);
        let (rate, next) = scs.infer_limit(0, t, &session);
        assert_eq!(rate.current_a, None);
        assert_eq!(next, Some(t0() + Duration::days(3)));
    }

    #[test]
    fn composite_schedule_two_periods() {
        let mut scs = service();
        scs.install(
            1,
            {
                let mut p = profile(5, ChargingProfilePurpose::TxDefaultProfile, 0, ChargingRateUnit::Amp, &[(0, 32.0), (1800, 16.0)]);
                p.charging_schedule.duration = Some(3600);
                p
            },
            t0(),
        );
        let schedule = scs.composite_schedule(
            1,
            3600,
            None,
            t0(),
            &SessionContext::default(),
            MAX_SCHEDULE_PERIODS,
        );
        assert_eq!(schedule.charging_rate_unit, ChargingRateUnit::Amp);
        let periods = &schedule.charging_schedule_period;
        assert_eq!(periods.len(), 2);
        assert_eq!((periods[0].start_period, periods[0].limit), (0, 32.0));
        assert_eq!((periods[1].start_period, periods[1].limit), (1800, 16.0));
    }

    #[test]
    fn validation_rejects_malformed_profiles() {
        let scs = service();
        // ChargePointMax must target connector 0.
        let p = profile(1, ChargingProfilePurpose::ChargePointMaxProfile, 0, ChargingRateUnit::Amp, &[(0, 10.0)]);
        assert!(!scs.validate(1, &p));
        // TxProfile cannot target connector 0.
        let p = profile(2, ChargingProfilePurpose::TxProfile, 0, ChargingRateUnit::Amp, &[(0, 10.0)]);
        assert!(!scs.validate(0, &p));
        // First period must start at 0.
        let p = profile(3, ChargingProfilePurpose::TxDefaultProfile, 0, ChargingRateUnit::Amp, &[(10, 10.0)]);
        assert!(!scs.validate(1, &p));
        // Stack level bounded.
        let p = profile(4, ChargingProfilePurpose::TxDefaultProfile, 99, ChargingRateUnit::Amp, &[(0, 10.0)]);
        assert!(!scs.validate(1, &p));
    }

    #[test]
    fn unit_conversion_for_composite() {
        let rate = ChargeRate {
            power_w: Some(6900.0),
            current_a: None,
            number_phases: Some(3),
        };
        assert!((rate.in_unit(ChargingRateUnit::Amp, 230.0) - 10.0).abs() < 1e-9);
        let rate = ChargeRate {
            power_w: None,
            current_a: Some(16.0),
            number_phases: Some(1),
        };
        assert!((rate.in_unit(ChargingRateUnit::Watt, 230.0) - 3680.0).abs() < 1e-9);
    }

    #[test]
    fn persistence_roundtrip() {
        use crate::storage::MemoryFilesystem;
        use std::sync::Arc;

        let fs: SharedFilesystem = Arc::new(MemoryFilesystem::new());
        let mut scs = SmartChargingService::new(Some(fs.clone()), 2, 230.0);
        scs.install(
            1,
            profile(7, ChargingProfilePurpose::TxDefaultProfile, 2, ChargingRateUnit::Watt, &[(0, 11000.0)]),
            t0(),
        );
        assert!(fs.stat("sc-td-1-2.json").is_some());

        let mut reborn = SmartChargingService::new(Some(fs.clone()), 2, 230.0);
        fs.write("sc-tx-1-0.json", b"{corrupt").unwrap();
        reborn.load_all(t0());
        let (rate, _) = reborn.infer_limit(1, t0(), &SessionContext::default());
        assert_eq!(rate.power_w, Some(11000.0));
        // The corrupt file was discarded.
        assert!(fs.stat("sc-tx-1-0.json").is_none());
    }
}
