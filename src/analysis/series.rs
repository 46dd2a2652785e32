/// Forecast series normalization.
///
/// Turns an irregular, possibly sparse list of `(timestamp, value)` pairs
/// for one entity into a fixed 168-slot hourly series aligned to the first
/// observation, and shapes that series into the CSV header/row consumed by
/// `storage`.
///
/// # Clock injection
/// `forecast_row` takes `now` for the fallback issued timestamp instead of
/// calling `Utc::now()`, so row shaping is deterministic in tests.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::model::{
    FORECAST_HOURS, ForecastSeries, MISSING_TOKEN, Observation, RawObservation, SENTINEL_VALUES,
};

/// Naive layouts accepted when a timestamp carries no offset. Interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

/// Parses an ISO-8601-like timestamp into a UTC instant.
///
/// Accepts RFC 3339 (`Z` or numeric offset) and naive forms, which are
/// taken as UTC. Returns `None` for anything else.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Converts a JSON value into a finite float.
///
/// Numbers and numeric strings are accepted; null, booleans, containers,
/// garbage text, and non-finite results all become `None`.
pub fn to_finite(value: &Value) -> Option<f64> {
    let v = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    v.is_finite().then_some(v)
}

/// Validates raw observations, dropping any without a parseable timestamp.
pub fn parse_observations(raw: &[RawObservation]) -> Vec<Observation> {
    raw.iter()
        .filter_map(|r| {
            let valid_time = r.valid_time.as_deref().and_then(parse_utc)?;
            let value = r.value.as_ref().and_then(to_finite);
            Some(Observation { valid_time, value })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Builds the 168-slot series for one entity.
///
/// Returns `None` when no observation has a usable timestamp; the caller
/// must then skip the entity without touching any file.
pub fn normalize(raw: &[RawObservation]) -> Option<ForecastSeries> {
    let mut observations = parse_observations(raw);
    if observations.is_empty() {
        return None;
    }

    // stable: equal timestamps keep their input order, so the later one wins below
    observations.sort_by_key(|o| o.valid_time);
    let anchor = observations[0].valid_time;

    let mut slots = [None; FORECAST_HOURS];
    for obs in &observations {
        let offset = (obs.valid_time - anchor).num_seconds() / 3600;
        if (0..FORECAST_HOURS as i64).contains(&offset) {
            slots[offset as usize] = obs.value;
        }
    }

    Some(ForecastSeries {
        anchor,
        slots: suppress_sentinel_series(slots),
    })
}

/// Returns `true` when every present slot is a sentinel and at least one
/// slot is present.
pub fn is_sentinel_series(slots: &[Option<f64>]) -> bool {
    let mut present = slots.iter().flatten().peekable();
    present.peek().is_some() && present.all(|v| SENTINEL_VALUES.contains(v))
}

/// Blanks a series made only of placeholder values.
pub fn suppress_sentinel_series(
    slots: [Option<f64>; FORECAST_HOURS],
) -> [Option<f64>; FORECAST_HOURS] {
    if is_sentinel_series(&slots) {
        [None; FORECAST_HOURS]
    } else {
        slots
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Formats one slot for CSV output: `NaN` when missing.
pub fn format_slot(slot: Option<f64>) -> String {
    match slot {
        Some(v) => format!("{:?}", v),
        None => MISSING_TOKEN.to_string(),
    }
}

/// Formats an instant as `YYYY-MM-DDTHH:MM:SSZ`.
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Header for an hourly forecast file with `hours` value columns:
/// `forecast_day, time_of_1h, 1h, 2h, ...`.
pub fn hourly_header(hours: usize) -> Vec<String> {
    let mut header = Vec::with_capacity(hours + 2);
    header.push("forecast_day".to_string());
    header.push("time_of_1h".to_string());
    header.extend((1..=hours).map(|h| format!("{}h", h)));
    header
}

/// Header for a normalized 168-hour gauge forecast file.
pub fn forecast_header() -> Vec<String> {
    hourly_header(FORECAST_HOURS)
}

/// The single data row of a gauge forecast file.
///
/// `issued` is the payload's issuance time if it had one; otherwise `now`
/// is used.
pub fn forecast_row(
    series: &ForecastSeries,
    issued: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let issued = match issued.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => format_utc(now),
    };

    let mut row = Vec::with_capacity(FORECAST_HOURS + 2);
    row.push(issued);
    row.push(format_utc(series.anchor));
    row.extend(series.slots.iter().map(|s| format_slot(*s)));
    row
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn obs(ts: &str, v: Value) -> RawObservation {
        RawObservation::new(ts, v)
    }

    /// A fixed "now" used for issued-time fallback: 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    // --- Parsing ------------------------------------------------------------

    #[test]
    fn test_parse_utc_accepts_z_offset_and_naive_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        assert_eq!(parse_utc("2024-01-01T06:00:00Z"), Some(expected));
        assert_eq!(parse_utc("2024-01-01T00:00:00-06:00"), Some(expected));
        assert_eq!(parse_utc("2024-01-01T06:00:00"), Some(expected));
        assert_eq!(parse_utc("2024-01-01T06:00"), Some(expected));
        assert_eq!(parse_utc("2024-01-01 06:00:00"), Some(expected));
    }

    #[test]
    fn test_parse_utc_date_only_is_midnight() {
        assert_eq!(
            parse_utc("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_utc_rejects_garbage() {
        assert_eq!(parse_utc("not-a-date"), None);
        assert_eq!(parse_utc(""), None);
        assert_eq!(parse_utc("2024-13-01T00:00:00Z"), None);
    }

    #[test]
    fn test_to_finite_handles_numbers_strings_and_junk() {
        assert_eq!(to_finite(&json!(5.5)), Some(5.5));
        assert_eq!(to_finite(&json!(3)), Some(3.0));
        assert_eq!(to_finite(&json!(" -999 ")), Some(-999.0));
        assert_eq!(to_finite(&json!("NaN")), None);
        assert_eq!(to_finite(&json!("inf")), None);
        assert_eq!(to_finite(&json!("abc")), None);
        assert_eq!(to_finite(&json!(null)), None);
        assert_eq!(to_finite(&json!(true)), None);
        assert_eq!(to_finite(&json!([1.0])), None);
    }

    // --- Normalization ------------------------------------------------------

    #[test]
    fn test_no_valid_timestamps_yields_none() {
        let raw = vec![
            obs("not-a-date", json!(1.0)),
            RawObservation { valid_time: None, value: Some(json!(2.0)) },
        ];
        assert!(normalize(&raw).is_none());
        assert!(normalize(&[]).is_none());
    }

    #[test]
    fn test_series_always_has_168_slots() {
        let raw = vec![obs("2024-01-01T00:00:00Z", json!(1.0))];
        let series = normalize(&raw).expect("one valid observation");
        assert_eq!(series.slots.len(), FORECAST_HOURS);
        assert_eq!(series.present_count(), 1);
    }

    #[test]
    fn test_anchor_is_earliest_timestamp_regardless_of_input_order() {
        let raw = vec![
            obs("2024-01-01T05:00:00Z", json!(2.0)),
            obs("not-a-date", json!(99.0)),
            obs("2024-01-01T03:00:00Z", json!(1.0)),
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.anchor, Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(series.slots[0], Some(1.0));
        assert_eq!(series.slots[2], Some(2.0));
    }

    #[test]
    fn test_offsets_truncate_partial_hours() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(1.0)),
            obs("2024-01-01T01:59:59Z", json!(2.0)),
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.slots[1], Some(2.0));
        assert_eq!(series.slots[2], None);
    }

    #[test]
    fn test_observations_past_168_hours_are_discarded() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(1.0)),
            obs("2024-01-07T23:00:00Z", json!(167.0)), // offset 167
            obs("2024-01-08T00:00:00Z", json!(168.0)), // offset 168
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.slots[167], Some(167.0));
        assert!(!series.slots.contains(&Some(168.0)));
    }

    #[test]
    fn test_duplicate_offset_later_in_stable_order_wins() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(1.0)),
            obs("2024-01-01T02:00:00Z", json!(10.0)),
            obs("2024-01-01T02:30:00Z", json!(20.0)),
            obs("2024-01-01T02:00:00Z", json!(30.0)),
        ];
        // sorted: 00:00, 02:00(10), 02:00(30), 02:30(20) -> slot 2 ends as 20
        let series = normalize(&raw).unwrap();
        assert_eq!(series.slots[2], Some(20.0));

        let equal_times = vec![
            obs("2024-01-01T00:00:00Z", json!(1.0)),
            obs("2024-01-01T00:00:00Z", json!(2.0)),
        ];
        assert_eq!(normalize(&equal_times).unwrap().slots[0], Some(2.0));
    }

    #[test]
    fn test_bad_value_keeps_timestamp_but_is_missing() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(5.0)),
            obs("2024-01-01T01:00:00Z", json!("garbage")),
            obs("2024-01-01T02:00:00Z", json!(-999.0)),
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.slots[0], Some(5.0));
        assert_eq!(series.slots[1], None);
        assert_eq!(series.slots[2], Some(-999.0));
        assert!(series.slots[3..].iter().all(|s| s.is_none()));
    }

    #[test]
    fn test_missing_value_at_earliest_time_still_anchors() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(null)),
            obs("2024-01-01T04:00:00Z", json!(3.5)),
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.anchor, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(series.slots[4], Some(3.5));
    }

    // --- Sentinel detection -------------------------------------------------

    #[test]
    fn test_all_sentinel_series_becomes_all_missing() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!("0")),
            obs("2024-01-01T01:00:00Z", json!("-999")),
        ];
        let series = normalize(&raw).unwrap();
        assert!(series.is_all_missing());

        let row = forecast_row(&series, None, fixed_now());
        assert_eq!(row.len(), FORECAST_HOURS + 2);
        assert!(row[2..].iter().all(|cell| cell == "NaN"));
    }

    #[test]
    fn test_all_zero_series_is_suppressed() {
        let raw: Vec<_> = (0..24)
            .map(|h| obs(&format!("2024-01-01T{:02}:00:00Z", h), json!(0.0)))
            .collect();
        assert!(normalize(&raw).unwrap().is_all_missing());
    }

    #[test]
    fn test_one_real_value_prevents_suppression() {
        let raw = vec![
            obs("2024-01-01T00:00:00Z", json!(0.0)),
            obs("2024-01-01T01:00:00Z", json!(-999.0)),
            obs("2024-01-01T02:00:00Z", json!(0.01)),
        ];
        let series = normalize(&raw).unwrap();
        assert_eq!(series.slots[0], Some(0.0));
        assert_eq!(series.slots[1], Some(-999.0));
        assert_eq!(series.slots[2], Some(0.01));
    }

    #[test]
    fn test_is_sentinel_series_requires_a_present_value() {
        assert!(!is_sentinel_series(&[None, None]));
        assert!(is_sentinel_series(&[Some(0.0), None, Some(-999.0)]));
        assert!(is_sentinel_series(&[Some(-0.0)]));
        assert!(!is_sentinel_series(&[Some(0.0), Some(-998.0)]));
    }

    // --- Row shaping --------------------------------------------------------

    #[test]
    fn test_forecast_header_layout() {
        let header = forecast_header();
        assert_eq!(header.len(), FORECAST_HOURS + 2);
        assert_eq!(header[0], "forecast_day");
        assert_eq!(header[1], "time_of_1h");
        assert_eq!(header[2], "1h");
        assert_eq!(header[FORECAST_HOURS + 1], "168h");
    }

    #[test]
    fn test_forecast_row_uses_issued_time_when_present() {
        let raw = vec![obs("2024-01-01T00:30:00-01:00", json!(12.25))];
        let series = normalize(&raw).unwrap();
        let row = forecast_row(&series, Some("2023-12-31T18:00:00Z"), fixed_now());
        assert_eq!(row[0], "2023-12-31T18:00:00Z");
        assert_eq!(row[1], "2024-01-01T01:30:00Z");
        assert_eq!(row[2], "12.25");
        assert_eq!(row[3], "NaN");
    }

    #[test]
    fn test_forecast_row_falls_back_to_now() {
        let raw = vec![obs("2024-01-01T00:00:00Z", json!(1.0))];
        let series = normalize(&raw).unwrap();
        let row = forecast_row(&series, Some("  "), fixed_now());
        assert_eq!(row[0], "2024-05-01T13:00:00Z");
    }

    #[test]
    fn test_format_slot() {
        assert_eq!(format_slot(None), "NaN");
        assert_eq!(format_slot(Some(5.0)), "5.0");
        assert_eq!(format_slot(Some(-999.0)), "-999.0");
        assert_eq!(format_slot(Some(0.1)), "0.1");
    }
}
