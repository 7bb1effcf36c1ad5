// ESX Doctor - core/series.rs
//
// Range-restricted series extraction.
//
// The extractor seeks to the nearest sparse-index offset before the window,
// then streams rows: honouring start/end bounds (inclusive both ends),
// applying uniform decimation against a point budget, fanning compound
// `a/b/c` multi-home cells out into parallel series, and dropping series
// that never produced a valid sample. Absent or non-numeric cells are never
// an error; they leave a 0.0 slot that is excluded from the valid count.

use crate::core::csvline;
use crate::core::index::DataFile;
use crate::core::time;
use crate::util::constants::SCAN_BUFFER_SIZE;
use crate::util::error::EsxDoctorError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

// =============================================================================
// Response shapes
// =============================================================================

/// One extracted series: display name plus one value per emitted row.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesPayload {
    pub name: String,
    pub values: Vec<f64>,
}

/// Extraction result: shared time axis (Unix milliseconds) plus the series.
/// Every payload has `values.len() == times.len()`.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesResponse {
    pub times: Vec<i64>,
    pub series: Vec<SeriesPayload>,
}

// =============================================================================
// Per-column accumulation
// =============================================================================

/// Accumulator for one requested column, growing sibling series lazily as
/// multi-home cells appear.
struct ColumnSeries {
    base: String,
    homes: Vec<HomeSeries>,
    /// Set once a compound cell has been seen; controls the `[home N]` names.
    multi: bool,
}

struct HomeSeries {
    name: String,
    values: Vec<f64>,
    valid: u64,
}

impl ColumnSeries {
    fn new(base: String) -> Self {
        let first = HomeSeries {
            name: base.clone(),
            values: Vec::new(),
            valid: 0,
        };
        Self {
            base,
            homes: vec![first],
            multi: false,
        }
    }

    /// Record the cell for one kept row. `slot` is the number of rows kept
    /// before this one, used to backfill late-appearing homes.
    fn push(&mut self, cell: Option<&str>, slot: usize) {
        match cell.and_then(multi_home_parts) {
            Some(parts) => {
                self.grow_to(parts.len(), slot);
                for (i, home) in self.homes.iter_mut().enumerate() {
                    match parts.get(i) {
                        Some(v) => {
                            home.values.push(*v);
                            home.valid += 1;
                        }
                        None => home.values.push(0.0),
                    }
                }
            }
            None => {
                let value = cell
                    .and_then(|c| c.trim().parse::<f64>().ok())
                    .filter(|v| v.is_finite());
                for (i, home) in self.homes.iter_mut().enumerate() {
                    if i == 0 {
                        match value {
                            Some(v) => {
                                home.values.push(v);
                                home.valid += 1;
                            }
                            None => home.values.push(0.0),
                        }
                    } else {
                        home.values.push(0.0);
                    }
                }
            }
        }
    }

    /// Ensure at least `count` sibling series exist, renaming the first one
    /// to `[home 1]` the moment the column turns out to be multi-home.
    fn grow_to(&mut self, count: usize, slot: usize) {
        if count >= 2 && !self.multi {
            self.multi = true;
            self.homes[0].name = format!("{} [home 1]", self.base);
        }
        while self.homes.len() < count {
            let n = self.homes.len() + 1;
            self.homes.push(HomeSeries {
                name: format!("{} [home {n}]", self.base),
                values: vec![0.0; slot],
                valid: 0,
            });
        }
    }
}

/// Split a compound `a/b/.../n` cell into its numeric parts.
///
/// Requires at least two parts, all finite numbers; anything else falls back
/// to the scalar path.
fn multi_home_parts(cell: &str) -> Option<Vec<f64>> {
    let trimmed = cell.trim();
    if !trimmed.contains('/') {
        return None;
    }
    let parts: Vec<f64> = trimmed
        .split('/')
        .map(|p| p.trim().parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    if parts.len() >= 2 {
        Some(parts)
    } else {
        None
    }
}

// =============================================================================
// Extraction
// =============================================================================

/// Extract the requested columns over `[start, end]` with decimation.
///
/// `None` bounds are unbounded on that side. `max_points == 0` disables
/// decimation. Column indices out of range contribute no valid samples and
/// their series are dropped with the other all-empty ones.
pub fn extract(
    file: &DataFile,
    cols: &[usize],
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    max_points: usize,
) -> Result<SeriesResponse, EsxDoctorError> {
    // Seek: largest index entry strictly before the window start.
    let (seek_row, seek_offset) = match start {
        Some(s) => {
            let before = file.index.partition_point(|e| e.timestamp < s);
            match before.checked_sub(1).and_then(|i| file.index.get(i)) {
                Some(entry) => (entry.row, entry.offset),
                None => match file.index.first() {
                    Some(first) => (first.row, first.offset),
                    None => (1, file.data_start_offset),
                },
            }
        }
        None => match file.index.first() {
            Some(first) => (first.row, first.offset),
            None => (1, file.data_start_offset),
        },
    };

    // Decimation step from the index's row estimate for the window.
    let row_hi = end
        .and_then(|e| {
            let at = file.index.partition_point(|entry| entry.timestamp < e);
            file.index.get(at).map(|entry| entry.row)
        })
        .unwrap_or(file.rows);
    let estimated = row_hi.saturating_sub(seek_row) + 1;
    let step = if max_points > 0 {
        (estimated / max_points as u64).max(1)
    } else {
        1
    };

    let mut handle = File::open(&file.path).map_err(|e| EsxDoctorError::Io {
        path: file.path.clone(),
        operation: "series extraction",
        source: e,
    })?;
    handle
        .seek(SeekFrom::Start(seek_offset))
        .map_err(|e| EsxDoctorError::Io {
            path: file.path.clone(),
            operation: "series extraction",
            source: e,
        })?;
    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, handle);

    let mut times: Vec<i64> = Vec::new();
    let mut columns: Vec<ColumnSeries> = cols
        .iter()
        .map(|&c| {
            let base = file
                .columns
                .get(c)
                .cloned()
                .unwrap_or_else(|| format!("col {c}"));
            ColumnSeries::new(base)
        })
        .collect();

    let mut raw = Vec::new();
    let mut row = seek_row;
    // Decimation anchors at the first row inside the window so emitted points
    // are uniformly spaced from the window start onwards.
    let mut anchor: Option<u64> = None;
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).map_err(|e| EsxDoctorError::Io {
            path: file.path.clone(),
            operation: "series extraction",
            source: e,
        })?;
        if n == 0 {
            break;
        }
        let this_row = row;
        row += 1;

        let record = match csvline::decode_line(csvline::trim_line(&raw)) {
            Ok(Some(record)) => record,
            _ => continue,
        };

        let Some(ts) = record.get(0).and_then(|c| time::parse_row_time(c, file.time_layout))
        else {
            continue;
        };

        if let Some(s) = start {
            if ts < s {
                continue;
            }
        }
        if let Some(e) = end {
            if ts > e {
                break;
            }
        }
        let start_row = *anchor.get_or_insert(this_row);
        if (this_row - start_row) % step != 0 {
            continue;
        }

        let slot = times.len();
        times.push(ts.timestamp_millis());
        for (series, &col) in columns.iter_mut().zip(cols) {
            series.push(record.get(col), slot);
        }
    }

    // Drop series that never produced a valid sample.
    let series: Vec<SeriesPayload> = columns
        .into_iter()
        .flat_map(|c| c.homes)
        .filter(|h| h.valid > 0)
        .map(|h| SeriesPayload {
            name: h.name,
            values: h.values,
        })
        .collect();

    tracing::debug!(
        file = %file.path.display(),
        points = times.len(),
        series = series.len(),
        step,
        "Series extracted"
    );

    Ok(SeriesResponse { times, series })
}

// =============================================================================
// Tests
// =============================================================================
