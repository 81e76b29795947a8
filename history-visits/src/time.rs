//! Resolving a single timestamp for a record from its date fields.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use history_core::{DateField, Record, VisitConfig};
use serde_json::Value;

/// Largest magnitude (ms) a browser `Date` accepts.
const MAX_EPOCH_MILLIS: i64 = 8_640_000_000_000_000;

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M:%S%.f%#z",
    "%Y-%m-%dT%H:%M%#z",
    "%Y-%m-%d %H:%M%#z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Epoch milliseconds of the first field in `fields` that holds a valid date,
/// or `0` when none does.
pub fn resolve_time(record: &Record, fields: &[DateField]) -> i64 {
    fields
        .iter()
        .filter_map(|field| record.date_value(*field))
        .find_map(parse_timestamp)
        .unwrap_or(0)
}

/// Resolved time of a non-admission event.
pub fn event_time(record: &Record, config: &VisitConfig) -> i64 {
    resolve_time(record, &config.event_time_fields)
}

/// Resolved start of an admission.
pub fn admission_time(record: &Record, config: &VisitConfig) -> i64 {
    resolve_time(record, &config.admission_time_fields)
}

/// Parse one raw field value into epoch milliseconds.
///
/// Falsy values (null, booleans, empty strings, `0`) never resolve.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::String(text) => parse_datetime(text.trim())?.timestamp_millis(),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|v| v.is_finite() && v.abs() <= MAX_EPOCH_MILLIS as f64)
                    .map(|v| v.trunc() as i64)
            })
            .filter(|ms| *ms != 0)?,
        _ => return None,
    };

    if millis.abs() > MAX_EPOCH_MILLIS {
        return None;
    }
    Some(millis)
}

/// Convert resolved milliseconds back to a UTC datetime; `0` means unresolved.
///
/// A value genuinely at `1970-01-01T00:00:00Z` also resolves to `0`, so it
/// maps to `None` as well.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // A trailing `Z` on a value the offset formats missed marks it as UTC.
    if let Some(utc_text) = text.strip_suffix(['Z', 'z']) {
        return parse_naive(utc_text);
    }

    parse_naive(text)
}

// Naive values carry no zone; they are read as UTC.
fn parse_naive(text: &str) -> Option<DateTime<Utc>> {
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
