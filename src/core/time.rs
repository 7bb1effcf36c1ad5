// ESX Doctor - core/time.rs
//
// Timestamp parsing for perf-counter exports.
//
// A fixed, ordered table of layouts is tried first-match-wins so ambiguous
// strings always resolve the same way. All naive layouts are anchored in UTC:
// source timestamps are treated as wall clock regardless of the zone the
// collector ran in. The first layout that ever matches a file becomes that
// file's `time_layout` and is tried first for every subsequent row.

use crate::util::error::TimeError;
use chrono::{DateTime, NaiveDateTime, Utc};

/// One candidate timestamp layout: a stable name (stored in `DataFile`) plus
/// the parse function that implements it.
pub struct TimeLayout {
    /// Layout identifier, e.g. `"%m/%d/%Y %H:%M:%S"`.
    pub name: &'static str,
    parse: fn(&str) -> Option<DateTime<Utc>>,
}

/// Layout tried when a file never produced a parseable timestamp.
pub const DEFAULT_LAYOUT: &str = "%m/%d/%Y %H:%M:%S";

fn naive(s: &str, fmt: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, fmt).ok().map(|ndt| ndt.and_utc())
}

/// The fixed layout table, in match-priority order.
///
/// PDH/perfmon exports use the slash forms; esxtop batch replays and
/// post-processed dumps use the dash and RFC 3339 forms.
pub const LAYOUTS: &[TimeLayout] = &[
    TimeLayout {
        name: "%m/%d/%Y %H:%M:%S",
        parse: |s| naive(s, "%m/%d/%Y %H:%M:%S"),
    },
    TimeLayout {
        name: "%m/%d/%Y %H:%M:%S%.3f",
        parse: |s| naive(s, "%m/%d/%Y %H:%M:%S%.3f"),
    },
    TimeLayout {
        name: "%Y-%m-%d %H:%M:%S",
        parse: |s| naive(s, "%Y-%m-%d %H:%M:%S"),
    },
    TimeLayout {
        name: "%Y-%m-%d %H:%M:%S%.3f",
        parse: |s| naive(s, "%Y-%m-%d %H:%M:%S%.3f"),
    },
    TimeLayout {
        name: "rfc3339",
        // The fractional variant below owns strings with a sub-second part so
        // the memorised layout distinguishes the two.
        parse: |s| {
            if s.contains('.') {
                return None;
            }
            DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into())
        },
    },
    TimeLayout {
        name: "rfc3339-nanos",
        parse: |s| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into()),
    },
];

/// Parse `raw` against the layout table, first match wins.
///
/// Returns the parsed instant and the name of the matching layout.
pub fn parse_timestamp(raw: &str) -> Result<(DateTime<Utc>, &'static str), TimeError> {
    let trimmed = raw.trim();
    for layout in LAYOUTS {
        if let Some(ts) = (layout.parse)(trimmed) {
            return Ok((ts, layout.name));
        }
    }
    Err(TimeError::Unrecognised {
        value: trimmed.to_string(),
    })
}

/// Parse `raw` with a known layout name, falling back to the full table.
///
/// Used inside row scans once a file's layout is memorised: the common case
/// is a single parse attempt per row.
pub fn parse_with_layout(raw: &str, layout_name: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Some(layout) = LAYOUTS.iter().find(|l| l.name == layout_name) {
        if let Some(ts) = (layout.parse)(trimmed) {
            return Some(ts);
        }
    }
    parse_timestamp(trimmed).ok().map(|(ts, _)| ts)
}

/// Row-scan parse with the Unix-millisecond fallback.
///
/// The series endpoint and the diagnostic engine accept time cells that are a
/// pure integer, interpreted as milliseconds since the Unix epoch.
pub fn parse_row_time(raw: &str, layout_name: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Some(ts) = parse_with_layout(trimmed, layout_name) {
        return Some(ts);
    }
    parse_unix_millis(trimmed)
}

/// Parse a caller-supplied instant: Unix milliseconds or any table layout.
///
/// Used for the series endpoint's start/end parameters.
pub fn parse_instant_arg(raw: &str) -> Result<DateTime<Utc>, TimeError> {
    let trimmed = raw.trim();
    if let Some(ts) = parse_unix_millis(trimmed) {
        return Ok(ts);
    }
    parse_timestamp(trimmed).map(|(ts, _)| ts)
}

/// Interpret a pure-integer string as a Unix millisecond count.
fn parse_unix_millis(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(ts: DateTime<Utc>) -> String {
        ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
    }

    #[test]
    fn test_parse_slash_date() {
        let (ts, layout) = parse_timestamp("02/09/2026 15:30:00").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.000");
        assert_eq!(layout, "%m/%d/%Y %H:%M:%S");
    }

    #[test]
    fn test_parse_slash_date_millis() {
        let (ts, layout) = parse_timestamp("02/09/2026 15:30:00.250").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.250");
        assert_eq!(layout, "%m/%d/%Y %H:%M:%S%.3f");
    }

    #[test]
    fn test_parse_dash_date() {
        let (ts, layout) = parse_timestamp("2026-02-09 15:30:00").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.000");
        assert_eq!(layout, "%Y-%m-%d %H:%M:%S");
    }

    #[test]
    fn test_parse_rfc3339() {
        let (ts, layout) = parse_timestamp("2026-02-09T15:30:00Z").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.000");
        assert_eq!(layout, "rfc3339");
    }

    #[test]
    fn test_parse_rfc3339_nanos() {
        let (ts, layout) = parse_timestamp("2026-02-09T15:30:00.123456789Z").unwrap();
        assert_eq!(layout, "rfc3339-nanos");
        assert_eq!(ts.timestamp_subsec_millis(), 123);
    }

    #[test]
    fn test_parse_rfc3339_offset_converts_to_utc() {
        let (ts, _) = parse_timestamp("2026-02-09T15:30:00+05:30").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 10:00:00.000");
    }

    /// Ambiguity: a dash date with milliseconds must resolve to the %.3f
    /// layout, not be half-eaten by the second-resolution layout.
    #[test]
    fn test_fixed_order_resolves_millis_variant() {
        let (_, layout) = parse_timestamp("2026-02-09 15:30:00.001").unwrap();
        assert_eq!(layout, "%Y-%m-%d %H:%M:%S%.3f");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_timestamp("not-a-date").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_parse_with_known_layout_fast_path() {
        let ts = parse_with_layout("2026-02-09 15:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.000");
    }

    /// A file whose memorised layout stops matching (mixed formats) still
    /// parses rows via the full-table fallback.
    #[test]
    fn test_parse_with_layout_falls_back_to_table() {
        let ts = parse_with_layout("02/09/2026 15:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(fmt(ts), "2026-02-09 15:30:00.000");
    }

    #[test]
    fn test_row_time_unix_millis_fallback() {
        let ts = parse_row_time("1770647600000", DEFAULT_LAYOUT).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_770_647_600_000);
    }

    #[test]
    fn test_instant_arg_accepts_millis_and_layouts() {
        let a = parse_instant_arg("1770647600000").unwrap();
        assert_eq!(a.timestamp_millis(), 1_770_647_600_000);

        let b = parse_instant_arg("2026-02-09 15:30:00").unwrap();
        assert_eq!(fmt(b), "2026-02-09 15:30:00.000");

        assert!(parse_instant_arg("soon").is_err());
    }

    /// A float string is not a pure integer and must not hit the Unix path.
    #[test]
    fn test_unix_fallback_rejects_non_integer() {
        assert!(parse_row_time("1770647600000.5", DEFAULT_LAYOUT).is_none());
        assert!(parse_row_time("-5", DEFAULT_LAYOUT).is_none());
    }
}
