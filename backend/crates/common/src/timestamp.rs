//! Source timestamp normalization.
//!
//! Modification stamps arrive either as ISO-8601 strings (`Z`, `+00:00` or
//! `+0000` offsets) or as milliseconds since the Unix epoch. Internally every
//! stamp is a `DateTime<Utc>` truncated to millisecond precision, and it is
//! rendered back as `YYYY-MM-DDTHH:MM:SS.mmmZ` whenever it crosses into a
//! source query literal.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

/// Render a timestamp the way the source expects it in a query filter.
pub fn to_source_literal(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parse an ISO-8601 timestamp string into UTC, truncated to milliseconds.
pub fn parse_iso_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
}

/// Parse a raw modification stamp as delivered by the source.
///
/// Accepts integer or float epoch milliseconds, digit-only strings (epoch
/// milliseconds), and ISO-8601 strings. Returns `None` for anything else,
/// including `null`.
pub fn parse_modstamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse::<i64>()
                    .ok()
                    .and_then(DateTime::<Utc>::from_timestamp_millis)
            } else {
                parse_iso_utc(s)
            }
        }
        _ => None,
    }
}
