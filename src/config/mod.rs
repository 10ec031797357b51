//! OCPP configuration registry.
//!
//! A typed key-value store behind `GetConfiguration` / `ChangeConfiguration`,
//! persisted through the filesystem adapter and consulted by every other
//! subsystem. Values arriving from the Central System are strings; the
//! recognizer in [`ConfigValue::coerce`] tries integer, then float, then
//! falls back to string, and the entry's declared type plus its registered
//! validator decide acceptance.

mod keys;
mod registry;
mod value;

pub use keys::declare_standard_keys;
pub use registry::{ConfigEntry, ConfigRegistry, SetResult};
pub use value::ConfigValue;

/// File the registry checkpoints itself into.
pub const CONFIG_FILE: &str = "ao-config.json";

// Standard OCPP 1.6 configuration keys (core profile and the optional
// profiles this charge point implements).
pub const ALLOW_OFFLINE_TX_FOR_UNKNOWN_ID: &str = "AllowOfflineTxForUnknownId";
pub const AUTHORIZATION_CACHE_ENABLED: &str = "AuthorizationCacheEnabled";
pub const AUTHORIZE_REMOTE_TX_REQUESTS: &str = "AuthorizeRemoteTxRequests";
pub const CLOCK_ALIGNED_DATA_INTERVAL: &str = "ClockAlignedDataInterval";
pub const CONNECTION_TIME_OUT: &str = "ConnectionTimeOut";
pub const CONNECTOR_PHASE_ROTATION: &str = "ConnectorPhaseRotation";
pub const GET_CONFIGURATION_MAX_KEYS: &str = "GetConfigurationMaxKeys";
pub const HEARTBEAT_INTERVAL: &str = "HeartbeatInterval";
pub const LOCAL_AUTHORIZE_OFFLINE: &str = "LocalAuthorizeOffline";
pub const LOCAL_PRE_AUTHORIZE: &str = "LocalPreAuthorize";
pub const METER_VALUES_ALIGNED_DATA: &str = "MeterValuesAlignedData";
pub const METER_VALUES_SAMPLED_DATA: &str = "MeterValuesSampledData";
pub const METER_VALUE_SAMPLE_INTERVAL: &str = "MeterValueSampleInterval";
pub const MINIMUM_STATUS_DURATION: &str = "MinimumStatusDuration";
pub const NUMBER_OF_CONNECTORS: &str = "NumberOfConnectors";
pub const RESET_RETRIES: &str = "ResetRetries";
pub const STOP_TRANSACTION_ON_EV_SIDE_DISCONNECT: &str = "StopTransactionOnEVSideDisconnect";
pub const STOP_TRANSACTION_ON_INVALID_ID: &str = "StopTransactionOnInvalidId";
pub const STOP_TXN_ALIGNED_DATA: &str = "StopTxnAlignedData";
pub const STOP_TXN_SAMPLED_DATA: &str = "StopTxnSampledData";
pub const SUPPORTED_FEATURE_PROFILES: &str = "SupportedFeatureProfiles";
pub const TRANSACTION_MESSAGE_ATTEMPTS: &str = "TransactionMessageAttempts";
pub const TRANSACTION_MESSAGE_RETRY_INTERVAL: &str = "TransactionMessageRetryInterval";
pub const UNLOCK_CONNECTOR_ON_EV_SIDE_DISCONNECT: &str = "UnlockConnectorOnEVSideDisconnect";
pub const WEB_SOCKET_PING_INTERVAL: &str = "WebSocketPingInterval";

// LocalAuthListManagement profile.
pub const LOCAL_AUTH_LIST_ENABLED: &str = "LocalAuthListEnabled";
pub const LOCAL_AUTH_LIST_MAX_LENGTH: &str = "LocalAuthListMaxLength";
pub const SEND_LOCAL_LIST_MAX_LENGTH: &str = "SendLocalListMaxLength";

// Reservation profile.
pub const RESERVE_CONNECTOR_ZERO_SUPPORTED: &str = "ReserveConnectorZeroSupported";

// SmartCharging profile.
pub const CHARGE_PROFILE_MAX_STACK_LEVEL: &str = "ChargeProfileMaxStackLevel";
pub const CHARGING_SCHEDULE_ALLOWED_CHARGING_RATE_UNIT: &str =
    "ChargingScheduleAllowedChargingRateUnit";
pub const CHARGING_SCHEDULE_MAX_PERIODS: &str = "ChargingScheduleMaxPeriods";
pub const MAX_CHARGING_PROFILES_INSTALLED: &str = "MaxChargingProfilesInstalled";

// Vendor keys.
pub const AUTHORIZATION_TIMEOUT: &str = "AuthorizationTimeout";
pub const SILENT_OFFLINE_TRANSACTIONS: &str = "SilentOfflineTransactions";
pub const FREE_VEND_ACTIVE: &str = "FreeVendActive";
pub const FREE_VEND_ID_TAG: &str = "FreeVendIdTag";
pub const STOP_TXN_DATA_CAPTURE_PERIODIC: &str = "StopTxnDataCapturePeriodic";
pub const MAX_MESSAGE_SIZE: &str = "MaxMessageSize";
