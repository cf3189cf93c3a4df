//! Timeframe string parsing (`"5m"`, `"1h"`, `"1d"`) shared by the market
//! data crawl (§4.E step 5) and the per-cycle reschedule (§4.E step 11).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Parses a timeframe string into its wall-clock duration. Returns `None`
/// for anything that doesn't match `<number><m|h|d>`.
pub fn parse_interval(timeframe: &str) -> Option<Duration> {
    let (digits, unit) = timeframe.split_at(timeframe.len().checked_sub(1)?);
    let n: u64 = digits.parse().ok()?;
    match unit {
        "m" => Some(Duration::from_secs(n * 60)),
        "h" => Some(Duration::from_secs(n * 3600)),
        "d" => Some(Duration::from_secs(n * 86400)),
        _ => None,
    }
}

/// Per-timeframe candle-count default (§4.C): finer granularities get more
/// history, coarser ones less, on the assumption that a day's worth of 1m
/// candles is plenty of context but a day's worth of 1d candles is a week.
pub fn default_candle_count(timeframe: &str) -> u32 {
    match timeframe {
        "1m" | "5m" | "15m" => 60,
        "1h" => 24,
        "4h" | "12h" => 12,
        "1d" => 7,
        _ => 20,
    }
}

/// The candle count to request for the market-data crawl (§4.E step 5):
/// the larger of the required minimum and the timeframe's own default,
/// with 50% headroom for gaps/weekends/maintenance windows.
pub fn crawl_candle_count(timeframe: &str) -> u32 {
    const REQUIRED_MIN_CANDLES: u32 = 20;
    let base = REQUIRED_MIN_CANDLES.max(default_candle_count(timeframe));
    (base * 3).div_ceil(2) // × 1.5, rounded up
}

/// The end of the most recently *closed* candle for `timeframe` as of `now`
/// (§4.E step 5): `floor(now / interval) − interval`.
pub fn last_closed_candle_end(timeframe: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let interval = parse_interval(timeframe)?;
    let interval_secs = interval.as_secs() as i64;
    if interval_secs == 0 {
        return None;
    }
    let now_secs = now.timestamp();
    let floored = (now_secs / interval_secs) * interval_secs;
    Some(DateTime::from_timestamp(floored, 0)? - ChronoDuration::seconds(interval_secs))
}

/// The next scheduled run time for a subscription whose primary timeframe
/// is `timeframe` (§4.E step 11).
pub fn next_run_at(timeframe: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    match parse_interval(timeframe) {
        Some(interval) => now + ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::hours(1)),
        None => now + ChronoDuration::hours(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_minutes_hours_and_days() {
        assert_eq!(parse_interval("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_interval("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_interval("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_interval("bogus"), None);
    }

    #[test]
    fn crawl_candle_count_applies_the_1_5x_multiplier() {
        assert_eq!(crawl_candle_count("1h"), 36); // max(20, 24) * 1.5
        assert_eq!(crawl_candle_count("1d"), 30); // max(20, 7) * 1.5
    }

    #[test]
    fn last_closed_candle_end_floors_to_the_interval_boundary() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 14, 37, 0).unwrap();
        let end = last_closed_candle_end("1h", now).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 7, 28, 13, 0, 0).unwrap());
    }
}
