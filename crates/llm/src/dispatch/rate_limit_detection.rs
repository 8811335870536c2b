//! Extracts how long an upstream account should be benched after a 429
//! (spec.md §7 rate-limit detection algorithm).

use std::time::Duration;

use jiff::{Timestamp, civil::DateTime, tz};
use serde_json::Value;

const DEFAULT_RESET: Duration = Duration::from_secs(60 * 60);

/// Tries the `msg` timestamp first, then `resets_in_seconds`, then falls
/// back to a 60-minute default.
pub(crate) fn resets_in(body: &str) -> Duration {
    parse_msg_timestamp(body)
        .or_else(|| parse_resets_in_seconds(body))
        .unwrap_or(DEFAULT_RESET)
}

/// Upstreams of this shape report resets as `"YYYY-MM-DD HH:MM:SS UTC+N"`
/// inside an error `msg` string.
fn parse_msg_timestamp(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let msg = find_str_field(&value, "msg")?;

    let (datetime_part, offset_part) = msg.rsplit_once(" UTC")?;
    let offset_hours: i32 = offset_part.parse().ok()?;

    let naive = DateTime::strptime("%Y-%m-%d %H:%M:%S", datetime_part).ok()?;
    let offset = tz::Offset::from_seconds(offset_hours * 3600).ok()?;
    let reset_at = naive.to_zoned(tz::TimeZone::fixed(offset)).ok()?.timestamp();

    let seconds = reset_at.as_second() - Timestamp::now().as_second();
    Some(Duration::from_secs(seconds.max(0) as u64))
}

fn parse_resets_in_seconds(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let seconds = find_u64_field(&value, "resets_in_seconds")?;
    Some(Duration::from_secs(seconds))
}

fn find_str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .or_else(|| value.get("error")?.get(field)?.as_str())
}

fn find_u64_field(value: &Value, field: &str) -> Option<u64> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .or_else(|| value.get("error")?.get(field)?.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resets_in_seconds_field() {
        let body = r#"{"error":{"resets_in_seconds": 120}}"#;
        assert_eq!(resets_in(body), Duration::from_secs(120));
    }

    #[test]
    fn falls_back_to_default_when_nothing_parses() {
        let body = r#"{"error":{"message": "rate limited"}}"#;
        assert_eq!(resets_in(body), DEFAULT_RESET);
    }

    #[test]
    fn msg_timestamp_in_the_past_clamps_to_zero() {
        let body = r#"{"error":{"msg": "2000-01-01 00:00:00 UTC+0"}}"#;
        assert_eq!(resets_in(body), Duration::from_secs(0));
    }

    #[test]
    fn top_level_resets_in_seconds_is_also_recognized() {
        let body = r#"{"resets_in_seconds": 30}"#;
        assert_eq!(resets_in(body), Duration::from_secs(30));
    }
}
