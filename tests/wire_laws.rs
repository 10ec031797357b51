//! Wire-format laws.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use ocpp_chargepoint::support::clock::{parse_iso_8601, to_iso_8601};

proptest! {
    /// `to_iso_8601 ∘ parse_iso_8601` is the identity on the supported
    /// range, and the wire form is always the 24-character Zulu shape.
    #[test]
    fn iso_8601_roundtrip(secs in 0i64..4_102_444_800i64, millis in 0u32..1000u32) {
        let ts = Utc.timestamp_opt(secs, millis * 1_000_000).unwrap();
        let wire = to_iso_8601(ts);
        prop_assert_eq!(wire.len(), 24);
        prop_assert!(wire.ends_with('Z'));
        prop_assert_eq!(parse_iso_8601(&wire), Some(ts));
    }

    /// Parsing accepts arbitrary numeric offsets and normalises to UTC.
    #[test]
    fn iso_8601_offset_normalisation(secs in 0i64..4_102_444_800i64, offset_h in -12i32..=12i32) {
        let ts = Utc.timestamp_opt(secs, 0).unwrap();
        let offset = chrono::FixedOffset::east_opt(offset_h * 3600).unwrap();
        let local = ts.with_timezone(&offset);
        let wire = local.to_rfc3339();
        prop_assert_eq!(parse_iso_8601(&wire), Some(ts));
    }
}
