//! Data types shared across OCPP 1.6 operations.
//!
//! Wire structs serialize with camelCase member names and omit absent
//! optionals. Timestamps always travel in the Zulu millisecond form via
//! [`wire_time`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use strum::{Display, EnumString};

/// Serde adapter pinning wire timestamps to `2023-05-01T12:34:56.789Z`
/// (24 characters) while accepting any RFC 3339 offset on input.
pub mod wire_time {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    use crate::support::clock::{parse_iso_8601, to_iso_8601};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&to_iso_8601(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(de)?;
        parse_iso_8601(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    /// For `Option<DateTime<Utc>>` fields.
    pub mod option {
        use super::*;
        use serde::Serialize;

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => to_iso_8601(*ts).serialize(ser),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(de)?;
            match raw {
                None => Ok(None),
                Some(raw) => parse_iso_8601(&raw)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}"))),
            }
        }
    }
}

// ── Authorization ──────────────────────────────────────────────

/// Status in an `IdTagInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum AuthorizationStatus {
    Accepted,
    Blocked,
    Expired,
    Invalid,
    ConcurrentTx,
}

/// Authorization verdict attached to Authorize / StartTransaction /
/// StopTransaction confirmations.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: AuthorizationStatus,
    #[serde(default, with = "wire_time::option")]
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_id_tag: Option<String>,
}

impl IdTagInfo {
    pub fn accepted() -> Self {
        Self {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }
    }

    /// Valid right now: accepted and not past its expiry date.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.status == AuthorizationStatus::Accepted
            && self.expiry_date.map(|exp| exp > now).unwrap_or(true)
    }
}

// ── Charge point status ────────────────────────────────────────

/// Connector status reported in `StatusNotification`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    #[serde(rename = "SuspendedEVSE")]
    #[strum(serialize = "SuspendedEVSE")]
    SuspendedEvse,
    #[serde(rename = "SuspendedEV")]
    #[strum(serialize = "SuspendedEV")]
    SuspendedEv,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

// ── Stop reasons ───────────────────────────────────────────────

/// Reason attached to `StopTransaction.req`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum Reason {
    DeAuthorized,
    EmergencyStop,
    #[serde(rename = "EVDisconnected")]
    #[strum(serialize = "EVDisconnected")]
    EvDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
    // Local extension: the EV never plugged in within ConnectionTimeOut.
    // Reported to the CS as `Other`.
    ConnectionTimeout,
}

impl Reason {
    /// The value actually sent on the wire; vendor-local reasons map to
    /// `Other`.
    pub fn wire_value(&self) -> Reason {
        match self {
            Self::ConnectionTimeout => Self::Other,
            other => *other,
        }
    }
}

// ── Metering ───────────────────────────────────────────────────

/// `SampledValue.context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ReadingContext {
    #[serde(rename = "Interruption.Begin")]
    #[strum(serialize = "Interruption.Begin")]
    InterruptionBegin,
    #[serde(rename = "Interruption.End")]
    #[strum(serialize = "Interruption.End")]
    InterruptionEnd,
    Other,
    #[serde(rename = "Sample.Clock")]
    #[strum(serialize = "Sample.Clock")]
    SampleClock,
    #[serde(rename = "Sample.Periodic")]
    #[strum(serialize = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    #[strum(serialize = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    #[strum(serialize = "Transaction.End")]
    TransactionEnd,
    Trigger,
}

/// `SampledValue.format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueFormat {
    Raw,
    SignedData,
}

/// `SampledValue.location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Body,
    Cable,
    #[serde(rename = "EV")]
    Ev,
    Inlet,
    Outlet,
}

/// `SampledValue.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    L1,
    L2,
    L3,
    N,
    #[serde(rename = "L1-N")]
    L1N,
    #[serde(rename = "L2-N")]
    L2N,
    #[serde(rename = "L3-N")]
    L3N,
    #[serde(rename = "L1-L2")]
    L1L2,
    #[serde(rename = "L2-L3")]
    L2L3,
    #[serde(rename = "L3-L1")]
    L3L1,
}

/// One measurand reading inside a `MeterValue`.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledValue {
    pub value: String,
    pub context: Option<ReadingContext>,
    pub format: Option<ValueFormat>,
    pub measurand: Option<String>,
    pub phase: Option<Phase>,
    pub location: Option<Location>,
    pub unit: Option<String>,
}

impl SampledValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            context: None,
            format: None,
            measurand: None,
            phase: None,
            location: None,
            unit: None,
        }
    }
}

/// A timestamped collection of readings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterValue {
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    pub sampled_value: Vec<SampledValue>,
}

// ── Smart charging ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ChargingProfilePurpose {
    ChargePointMaxProfile,
    TxDefaultProfile,
    TxProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingProfileKind {
    Absolute,
    Recurring,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrencyKind {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ChargingRateUnit {
    #[serde(rename = "A")]
    #[strum(serialize = "A")]
    Amp,
    #[serde(rename = "W")]
    #[strum(serialize = "W")]
    Watt,
}

/// One step of a charging schedule. `limit` is denominated in the
/// schedule's rate unit and applies from `start_period` (seconds from
/// schedule start) until the next period.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriod {
    pub start_period: i32,
    pub limit: f64,
    pub number_phases: Option<i32>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedule {
    pub duration: Option<i32>,
    #[serde(default, with = "wire_time::option")]
    pub start_schedule: Option<DateTime<Utc>>,
    pub charging_rate_unit: ChargingRateUnit,
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    pub min_charging_rate: Option<f64>,
}

/// A full OCPP 1.6 charging profile, as installed by
/// `SetChargingProfile` and persisted between reboots.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfile {
    pub charging_profile_id: i32,
    pub transaction_id: Option<i32>,
    pub stack_level: i32,
    pub charging_profile_purpose: ChargingProfilePurpose,
    pub charging_profile_kind: ChargingProfileKind,
    pub recurrency_kind: Option<RecurrencyKind>,
    #[serde(default, with = "wire_time::option")]
    pub valid_from: Option<DateTime<Utc>>,
    #[serde(default, with = "wire_time::option")]
    pub valid_to: Option<DateTime<Utc>>,
    pub charging_schedule: ChargingSchedule,
}

// ── Local authorization list ───────────────────────────────────

/// Entry of a `SendLocalList` update.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationData {
    pub id_tag: String,
    pub id_tag_info: Option<IdTagInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn id_tag_info_wire_shape() {
        let info = IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            parent_id_tag: None,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "Accepted");
        assert_eq!(json["expiryDate"], "2024-01-01T00:00:00.000Z");
        assert!(json.get("parentIdTag").is_none());
    }

    #[test]
    fn status_enum_wire_names() {
        assert_eq!(
            serde_json::to_value(ChargePointStatus::SuspendedEvse).unwrap(),
            "SuspendedEVSE"
        );
        assert_eq!(
            serde_json::to_value(ChargePointStatus::SuspendedEv).unwrap(),
            "SuspendedEV"
        );
        assert_eq!(ChargePointStatus::SuspendedEvse.to_string(), "SuspendedEVSE");
    }

    #[test]
    fn sampled_value_omits_absent_fields() {
        let sv = SampledValue::new("12345");
        let json = serde_json::to_string(&sv).unwrap();
        assert_eq!(json, r#"{"value":"12345"}"#);
    }

    #[test]
    fn reading_context_dotted_names() {
        assert_eq!(
            serde_json::to_value(ReadingContext::SamplePeriodic).unwrap(),
            "Sample.Periodic"
        );
        assert_eq!(
            serde_json::to_value(ReadingContext::TransactionBegin).unwrap(),
            "Transaction.Begin"
        );
    }

    #[test]
    fn charging_profile_roundtrip() {
        let text = r#"{
            "chargingProfileId": 7,
            "stackLevel": 2,
            "chargingProfilePurpose": "TxDefaultProfile",
            "chargingProfileKind": "Recurring",
            "recurrencyKind": "Daily",
            "chargingSchedule": {
                "chargingRateUnit": "A",
                "chargingSchedulePeriod": [
                    {"startPeriod": 0, "limit": 16.0},
                    {"startPeriod": 1800, "limit": 8.0, "numberPhases": 1}
                ]
            }
        }"#;
        let profile: ChargingProfile = serde_json::from_str(text).unwrap();
        assert_eq!(profile.charging_profile_id, 7);
        assert_eq!(profile.charging_schedule.charging_rate_unit, ChargingRateUnit::Amp);
        assert_eq!(profile.charging_schedule.charging_schedule_period.len(), 2);

        let back = serde_json::to_value(&profile).unwrap();
        assert_eq!(back["chargingSchedule"]["chargingSchedulePeriod"][1]["numberPhases"], 1);
        assert!(back.get("transactionId").is_none());
    }

    #[test]
    fn reason_wire_mapping() {
        assert_eq!(Reason::ConnectionTimeout.wire_value(), Reason::Other);
        assert_eq!(
            serde_json::to_value(Reason::EvDisconnected).unwrap(),
            "EVDisconnected"
        );
    }
}
