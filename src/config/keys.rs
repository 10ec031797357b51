//! Standard key declarations and their validators.

use super::registry::ConfigRegistry;
use super::value::ConfigValue;
use super::*;

fn non_negative_int(v: &ConfigValue) -> bool {
    v.as_int().map(|i| i >= 0).unwrap_or(false)
}

fn positive_int(v: &ConfigValue) -> bool {
    v.as_int().map(|i| i > 0).unwrap_or(false)
}

fn printable_id_tag(v: &ConfigValue) -> bool {
    v.as_str()
        .map(|s| {
            !s.is_empty() && s.len() <= 20 && s.bytes().all(|b| (0x20..0x7f).contains(&b))
        })
        .unwrap_or(false)
}

/// Measurand lists are validated when the metering service recomputes its
/// selectors; here only the shape is checked.
fn measurand_csv(v: &ConfigValue) -> bool {
    v.as_str().is_some()
}

/// Declare every key this charge point supports, with OCPP 1.6 defaults.
///
/// `connector_count` excludes connector 0.
pub fn declare_standard_keys(reg: &mut ConfigRegistry, connector_count: usize) {
    use ConfigValue as V;

    // Core profile.
    reg.declare(ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID, V::Bool(false), false, false, true);
    reg.declare(AUTHORIZATION_CACHE_ENABLED, V::Bool(true), false, false, true);
    reg.declare(AUTHORIZE_REMOTE_TX_REQUESTS, V::Bool(false), false, false, true);
    reg.declare(CLOCK_ALIGNED_DATA_INTERVAL, V::Int(0), false, false, true);
    reg.declare(CONNECTION_TIME_OUT, V::Int(300), false, false, true);
    reg.declare(
        CONNECTOR_PHASE_ROTATION,
        V::String("NotApplicable".into()),
        false,
        false,
        true,
    );
    reg.declare(GET_CONFIGURATION_MAX_KEYS, V::Int(50), true, false, false);
    reg.declare(HEARTBEAT_INTERVAL, V::Int(86400), false, false, true);
    reg.declare(LOCAL_AUTHORIZE_OFFLINE, V::Bool(false), false, false, true);
    reg.declare(LOCAL_PRE_AUTHORIZE, V::Bool(false), false, false, true);
    reg.declare(METER_VALUES_ALIGNED_DATA, V::String(String::new()), false, false, true);
    reg.declare(
        METER_VALUES_SAMPLED_DATA,
        V::String("Energy.Active.Import.Register".into()),
        false,
        false,
        true,
    );
    reg.declare(METER_VALUE_SAMPLE_INTERVAL, V::Int(60), false, false, true);
    reg.declare(MINIMUM_STATUS_DURATION, V::Int(0), false, false, true);
    reg.declare(
        NUMBER_OF_CONNECTORS,
        V::Int(connector_count as i32),
        true,
        false,
        false,
    );
    reg.declare(RESET_RETRIES, V::Int(0), false, false, true);
    reg.declare(STOP_TRANSACTION_ON_EV_SIDE_DISCONNECT, V::Bool(true), false, false, true);
    reg.declare(STOP_TRANSACTION_ON_INVALID_ID, V::Bool(true), false, false, true);
    reg.declare(STOP_TXN_ALIGNED_DATA, V::String(String::new()), false, false, true);
    reg.declare(
        STOP_TXN_SAMPLED_DATA,
        V::String("Energy.Active.Import.Register".into()),
        false,
        false,
        true,
    );
    reg.declare(
        SUPPORTED_FEATURE_PROFILES,
        V::String(
            "Core,FirmwareManagement,LocalAuthListManagement,Reservation,SmartCharging,RemoteTrigger"
                .into(),
        ),
        true,
        false,
        false,
    );
    reg.declare(TRANSACTION_MESSAGE_ATTEMPTS, V::Int(3), false, false, true);
    reg.declare(TRANSACTION_MESSAGE_RETRY_INTERVAL, V::Int(60), false, false, true);
    reg.declare(UNLOCK_CONNECTOR_ON_EV_SIDE_DISCONNECT, V::Bool(true), false, false, true);
    reg.declare(WEB_SOCKET_PING_INTERVAL, V::Int(5), false, false, true);

    // LocalAuthListManagement profile.
    reg.declare(LOCAL_AUTH_LIST_ENABLED, V::Bool(true), false, false, true);
    reg.declare(LOCAL_AUTH_LIST_MAX_LENGTH, V::Int(64), true, false, false);
    reg.declare(SEND_LOCAL_LIST_MAX_LENGTH, V::Int(64), true, false, false);

    // Reservation profile.
    reg.declare(RESERVE_CONNECTOR_ZERO_SUPPORTED, V::Bool(true), true, false, false);

    // SmartCharging profile.
    reg.declare(CHARGE_PROFILE_MAX_STACK_LEVEL, V::Int(8), true, false, false);
    reg.declare(
        CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT,
        V::String("Current,Power".into()),
        true,
        false,
        false,
    );
    reg.declare(CHARGING_SCHEDULE_MAX_PERIODS, V::Int(24), true, false, false);
    reg.declare(MAX_CHARGING_PROFILES_INSTALLED, V::Int(32), true, false, false);

    // Vendor keys.
    reg.declare(AUTHORIZATION_TIMEOUT, V::Int(20), false, false, true);
    reg.declare(SILENT_OFFLINE_TRANSACTIONS, V::Bool(false), false, false, true);
    reg.declare(FREE_VEND_ACTIVE, V::Bool(false), false, false, true);
    reg.declare(FREE_VEND_ID_TAG, V::String("A0000000".into()), false, false, true);
    reg.declare(STOP_TXN_DATA_CAPTURE_PERIODIC, V::Bool(false), false, false, true);
    reg.declare(MAX_MESSAGE_SIZE, V::Int(65536), false, false, true);

    // Validators.
    reg.register_validator(CLOCK_ALIGNED_DATA_INTERVAL, non_negative_int);
    reg.register_validator(CONNECTION_TIME_OUT, positive_int);
    reg.register_validator(HEARTBEAT_INTERVAL, positive_int);
    reg.register_validator(METER_VALUE_SAMPLE_INTERVAL, non_negative_int);
    reg.register_validator(MINIMUM_STATUS_DURATION, non_negative_int);
    reg.register_validator(RESET_RETRIES, non_negative_int);
    reg.register_validator(TRANSACTION_MESSAGE_ATTEMPTS, non_negative_int);
    reg.register_validator(TRANSACTION_MESSAGE_RETRY_INTERVAL, non_negative_int);
    reg.register_validator(WEB_SOCKET_PING_INTERVAL, non_negative_int);
    reg.register_validator(AUTHORIZATION_TIMEOUT, positive_int);
    reg.register_validator(FREE_VEND_ID_TAG, printable_id_tag);
    reg.register_validator(METER_VALUES_ALIGNED_DATA, measurand_csv);
    reg.register_validator(METER_VALUES_SAMPLED_DATA, measurand_csv);
    reg.register_validator(STOP_TXN_ALIGNED_DATA, measurand_csv);
    reg.register_validator(STOP_TXN_SAMPLED_DATA, measurand_csv);
    reg.register_validator(MAX_MESSAGE_SIZE, positive_int);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SetResult;

    #[test]
    fn standard_keys_present_with_defaults() {
        let mut reg = ConfigRegistry::new(None);
        declare_standard_keys(&mut reg, 2);

        assert_eq!(reg.int(NUMBER_OF_CONNECTORS), Some(2));
        assert_eq!(reg.int(HEARTBEAT_INTERVAL), Some(86400));
        assert_eq!(reg.bool(STOP_TRANSACTION_ON_EV_SIDE_DISCONNECT), Some(true));
        assert_eq!(reg.string(FREE_VEND_ID_TAG), Some("A0000000"));
    }

    #[test]
    fn number_of_connectors_is_readonly() {
        let mut reg = ConfigRegistry::new(None);
        declare_standard_keys(&mut reg, 2);
        assert_eq!(
            reg.set_from_wire(NUMBER_OF_CONNECTORS, "5"),
            SetResult::Rejected
        );
    }

    #[test]
    fn free_vend_tag_validator() {
        let mut reg = ConfigRegistry::new(None);
        declare_standard_keys(&mut reg, 1);
        assert_eq!(
            reg.set_from_wire(FREE_VEND_ID_TAG, "TAG-WITH-21-CHARSXXXXX"),
            SetResult::Rejected
        );
        assert_eq!(reg.set_from_wire(FREE_VEND_ID_TAG, "GUEST"), SetResult::Accepted);
    }
}
