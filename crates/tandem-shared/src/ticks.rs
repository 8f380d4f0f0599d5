//! Conversion between `chrono` timestamps and ticks.
//!
//! A tick is 100 nanoseconds; tick zero is `0001-01-01T00:00:00Z`. Signed file
//! URLs carry their expiry in ticks so that the value is a plain integer on the
//! wire.

use chrono::{DateTime, Utc};

pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Ticks elapsed between `0001-01-01` and the Unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;

pub fn to_ticks(time: DateTime<Utc>) -> i64 {
    UNIX_EPOCH_TICKS
        + time.timestamp() * TICKS_PER_SECOND
        + i64::from(time.timestamp_subsec_nanos()) / 100
}

/// Returns `None` for tick values outside the range `chrono` can represent.
pub fn from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    let since_epoch = ticks.checked_sub(UNIX_EPOCH_TICKS)?;
    let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
    let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;
    DateTime::from_timestamp(secs, nanos as u32)
}

pub fn now_ticks() -> i64 {
    to_ticks(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unix_epoch() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(to_ticks(epoch), UNIX_EPOCH_TICKS);
    }

    #[test]
    fn test_known_date() {
        // 2024-01-01T00:00:00Z
        let date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_ticks(date), 638_396_640_000_000_000);
    }

    #[test]
    fn test_sub_second_precision() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
        assert_eq!(from_ticks(to_ticks(t)), Some(t));
    }

    #[test]
    fn test_out_of_range() {
        assert!(from_ticks(i64::MIN).is_none());
    }
}
