// src/dates.rs

//! Database date-string codec
//!
//! The migrated system stores timestamps as `2021-09-11 12:34:56.1234567Z`:
//! civil UTC time plus up to seven fractional digits (100 ns ticks, trailing
//! zeros stripped). Items created by an importer rather than a filesystem
//! scan carry the placeholder `0001-01-01 00:00:00…`, which parses to a
//! pre-epoch instant; the timestamp-refresh phase detects those and writes
//! the migrated file's real times back in the same format.
//!
//! Nanosecond counts are carried as `i128`; year-one placeholders overflow
//! the `i64` nanosecond range.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

const NS_PER_SEC: i128 = 1_000_000_000;
const TICKS_PER_SEC: i128 = 10_000_000;

/// Parse a stored date string into nanoseconds since the Unix epoch
pub fn parse_db_date(value: &str) -> Result<i128> {
    let trimmed = value.trim();
    let (datetime, frac) = match trimmed.rsplit_once('.') {
        Some((dt, frac)) => (dt, frac),
        None => (trimmed, ""),
    };
    let datetime = datetime.trim_end_matches(['Z', 'z']).trim_end();
    let naive = NaiveDateTime::parse_from_str(datetime, "%Y-%m-%d %H:%M:%S").map_err(|e| {
        Error::Date {
            value: value.to_string(),
            reason: e.to_string(),
        }
    })?;

    let digits = frac
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(9)
        .collect::<String>();
    let mut nanos: i128 = 0;
    if !digits.is_empty() {
        let parsed = digits.parse::<i128>().map_err(|e| Error::Date {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
        nanos = parsed * 10_i128.pow(9 - digits.len() as u32);
    }

    Ok(i128::from(naive.and_utc().timestamp()) * NS_PER_SEC + nanos)
}

/// Format nanoseconds since the Unix epoch in the database's date format
pub fn format_db_date(ns: i128) -> Result<String> {
    let secs = i64::try_from(ns.div_euclid(NS_PER_SEC)).map_err(|_| out_of_range(ns))?;
    let ticks = ns.div_euclid(100).rem_euclid(TICKS_PER_SEC);
    let dt: DateTime<Utc> = DateTime::from_timestamp(secs, 0).ok_or_else(|| out_of_range(ns))?;
    let frac = format!("{ticks:07}");
    let frac = frac.trim_end_matches('0');
    Ok(format!("{}.{}Z", dt.format("%Y-%m-%d %H:%M:%S"), frac))
}

fn out_of_range(ns: i128) -> Error {
    Error::Date {
        value: ns.to_string(),
        reason: "timestamp out of range".to_string(),
    }
}

/// Nanoseconds since the Unix epoch for a file timestamp
pub fn system_time_ns(t: SystemTime) -> i128 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i128,
        Err(e) => -(e.duration().as_nanos() as i128),
    }
}
