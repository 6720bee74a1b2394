use crate::error::BrandscopeError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Truncate a string at a safe char boundary, appending "..." if truncated.
pub fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let end: String = s.chars().take(max_chars).collect();
        format!("{}...", end)
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// One-decimal rounding used for every reported score and percentage.
pub fn round1(value: f64) -> f64 {
    round_to(value, 1)
}

/// Part of a whole as a percentage, clamped to 0..=100. Zero when the whole is empty.
pub fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).clamp(0.0, 100.0)
}

/// Fixed-width UTC timestamp, so stored values sort lexically in time order.
pub fn store_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_store_timestamp(raw: &str) -> Result<DateTime<Utc>, BrandscopeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BrandscopeError::Parse(format!("timestamp '{}': {}", raw, e)))
}

/// Parse a CLI date bound: either RFC 3339 or a bare `YYYY-MM-DD`.
/// Bare dates expand to the start of the day, or its last instant when `end_of_day`.
pub fn parse_date_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, BrandscopeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| BrandscopeError::Validation(format!("malformed date: {}", raw)))?;
    let time = if end_of_day {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| BrandscopeError::Validation(format!("malformed date: {}", raw)))
}
