// ESX Doctor - core/index.rs
//
// Sparse CSV indexing: one pass over the export recording byte offsets and
// timestamps at a fixed row stride, plus the header, time range, and row
// count. The resulting `DataFile` descriptor is immutable; extraction and
// diagnostics seek through it with their own file handles.
//
// Row-level failures (undecodable line, unparseable timestamp) are part of
// the loop invariant, not an error channel: the offset still advances and the
// row number still increments so numbering matches physical line position.

use crate::core::csvline;
use crate::core::time;
use crate::util::constants::{INDEX_STRIDE, SCAN_BUFFER_SIZE};
use crate::util::error::IndexError;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

// =============================================================================
// Data model
// =============================================================================

/// One sparse index entry: the start byte of data row `row`.
///
/// Entries are non-decreasing in all three fields: rows are written in time
/// order, so row order, offset order, and timestamp order coincide.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// 1-based data row number (the header is not a row).
    pub row: u64,

    /// Byte offset of the first byte of this row's line.
    pub offset: u64,

    /// The row's parsed timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Immutable descriptor of an indexed export.
#[derive(Debug)]
pub struct DataFile {
    /// Absolute filesystem location of the backing CSV.
    pub path: PathBuf,

    /// Display name: upload filename, URL basename, or the path itself.
    pub label: String,

    /// True when this system created the backing file and must delete it
    /// when the file stops being a session's active file.
    pub owned_temp: bool,

    /// Ordered column headers; `columns[0]` is always `"Time"`.
    pub columns: Vec<String>,

    /// Sparse offset index: row 1 and every `INDEX_STRIDE`-th row whose
    /// timestamp parsed.
    pub index: Vec<IndexEntry>,

    /// Total data row count (header excluded), counting unparseable rows.
    pub rows: u64,

    /// Timestamp of the first row that parsed.
    pub start_time: Option<DateTime<Utc>>,

    /// Timestamp of the last row that parsed.
    pub end_time: Option<DateTime<Utc>>,

    /// Byte offset of the first data row (just past the header terminator).
    pub data_start_offset: u64,

    /// Layout under which this file's timestamps parse (first match wins).
    pub time_layout: &'static str,
}

// =============================================================================
// Indexer
// =============================================================================

/// Index `path` in a single forward pass.
///
/// The scan touches only each row's first field; cost is dominated by line
/// splitting and offset accounting, so it runs at disk throughput.
pub fn index_file(path: &Path, label: &str, owned_temp: bool) -> Result<DataFile, IndexError> {
    let file = File::open(path).map_err(|e| IndexError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, file);

    // Header line.
    let mut raw = Vec::new();
    let header_len = reader.read_until(b'\n', &mut raw).map_err(|e| IndexError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if header_len == 0 {
        return Err(IndexError::EmptyFile {
            path: path.to_path_buf(),
        });
    }

    let header = match csvline::decode_line(csvline::trim_line(&raw)) {
        Ok(Some(record)) => record,
        // A file whose first line is blank has no header to speak of.
        Ok(None) => {
            return Err(IndexError::EmptyFile {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(IndexError::HeaderMalformed {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut columns: Vec<String> = header.iter().map(str::to_string).collect();
    // Field 0 carries collector boilerplate ("(PDH-CSV 4.0) ..."); normalise.
    columns[0] = "Time".to_string();

    let data_start_offset = header_len as u64;

    // Data rows.
    let mut index: Vec<IndexEntry> = Vec::new();
    let mut rows: u64 = 0;
    let mut start_time: Option<DateTime<Utc>> = None;
    let mut end_time: Option<DateTime<Utc>> = None;
    let mut layout: Option<&'static str> = None;
    let mut offset = data_start_offset;

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).map_err(|e| IndexError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }

        let offset_before = offset;
        offset += n as u64;
        rows += 1;

        // Decode failure or a bad timestamp only skips this row's index
        // entry; numbering and offsets stay aligned with the file.
        let record = match csvline::decode_line(csvline::trim_line(&raw)) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                tracing::trace!(row = rows, error = %e, "Skipping undecodable row");
                continue;
            }
        };

        let ts = match record.get(0) {
            Some(cell) => match layout {
                Some(name) => time::parse_with_layout(cell, name),
                None => match time::parse_timestamp(cell) {
                    Ok((ts, name)) => {
                        layout = Some(name);
                        Some(ts)
                    }
                    Err(_) => None,
                },
            },
            None => None,
        };

        let Some(ts) = ts else { continue };

        if start_time.is_none() {
            start_time = Some(ts);
        }
        end_time = Some(ts);

        if rows == 1 || rows % INDEX_STRIDE == 0 {
            index.push(IndexEntry {
                row: rows,
                offset: offset_before,
                timestamp: ts,
            });
        }
    }

    tracing::info!(
        path = %path.display(),
        rows,
        columns = columns.len(),
        index_entries = index.len(),
        "File indexed"
    );

    Ok(DataFile {
        path: path.to_path_buf(),
        label: label.to_string(),
        owned_temp,
        columns,
        index,
        rows,
        start_time,
        end_time,
        data_start_offset,
        time_layout: layout.unwrap_or(time::DEFAULT_LAYOUT),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_index_small_file() {
        let dir = TempDir::new().unwrap();
        let content = "\
Time,a
\"2026-02-09 15:30:00\",1
\"2026-02-09 15:30:01\",2
\"2026-02-09 15:30:02\",3
\"2026-02-09 15:30:03\",4
\"2026-02-09 15:30:04\",5
";
        let path = write_csv(&dir, "small.csv", content);
        let df = index_file(&path, "small.csv", false).unwrap();

        assert_eq!(df.rows, 5);
        assert_eq!(df.columns, vec!["Time", "a"]);
        assert_eq!(df.data_start_offset, "Time,a\n".len() as u64);
        assert_eq!(
            df.start_time.unwrap().format("%H:%M:%S").to_string(),
            "15:30:00"
        );
        assert_eq!(
            df.end_time.unwrap().format("%H:%M:%S").to_string(),
            "15:30:04"
        );
        assert_eq!(df.time_layout, "%Y-%m-%d %H:%M:%S");

        // Sparse index: only row 1 for a file this small.
        assert_eq!(df.index.len(), 1);
        assert_eq!(df.index[0].row, 1);
        assert_eq!(df.index[0].offset, df.data_start_offset);
        assert_eq!(
            df.index[0].timestamp.format("%H:%M:%S").to_string(),
            "15:30:00"
        );
    }

    #[test]
    fn test_index_normalises_pdh_time_header() {
        let dir = TempDir::new().unwrap();
        let content = "\
\"(PDH-CSV 4.0) (UTC)(0)\",\"\\\\h\\Vcpu(0:a)\\% Ready\"
\"02/09/2026 15:30:00\",\"1.0\"
";
        let path = write_csv(&dir, "pdh.csv", content);
        let df = index_file(&path, "pdh.csv", false).unwrap();
        assert_eq!(df.columns[0], "Time");
        assert_eq!(df.columns[1], "\\\\h\\Vcpu(0:a)\\% Ready");
        assert_eq!(df.time_layout, "%m/%d/%Y %H:%M:%S");
    }

    #[test]
    fn test_index_empty_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "empty.csv", "");
        assert!(matches!(
            index_file(&path, "empty.csv", false),
            Err(IndexError::EmptyFile { .. })
        ));
    }

    #[test]
    fn test_index_blank_header_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(&dir, "blank.csv", "\n\"2026-02-09 15:30:00\",1\n");
        assert!(matches!(
            index_file(&path, "blank.csv", false),
            Err(IndexError::EmptyFile { .. })
        ));
    }

    /// Rows with unparseable timestamps still count towards row numbering so
    /// index offsets correspond to physical line position.
    #[test]
    fn test_index_counts_bad_rows() {
        let dir = TempDir::new().unwrap();
        let content = "\
Time,a
not-a-time,1
\"2026-02-09 15:30:01\",2
\"2026-02-09 15:30:02\",3
";
        let path = write_csv(&dir, "mixed.csv", content);
        let df = index_file(&path, "mixed.csv", false).unwrap();

        assert_eq!(df.rows, 3);
        // Row 1 never parsed, so no entry for it exists.
        assert!(df.index.is_empty());
        assert_eq!(
            df.start_time.unwrap().format("%H:%M:%S").to_string(),
            "15:30:01"
        );
        assert_eq!(
            df.end_time.unwrap().format("%H:%M:%S").to_string(),
            "15:30:02"
        );
    }

    /// Stride entries land on rows 1, 1000, 2000, ... with exact offsets.
    #[test]
    fn test_index_stride_entries() {
        let dir = TempDir::new().unwrap();
        let mut content = String::from("Time,a\n");
        for i in 0..2500u64 {
            let secs = i % 60;
            let mins = i / 60;
            content.push_str(&format!("\"2026-02-09 15:{mins:02}:{secs:02}\",{i}\n"));
        }
        let path = write_csv(&dir, "big.csv", &content);
        let df = index_file(&path, "big.csv", false).unwrap();

        assert_eq!(df.rows, 2500);
        let rows: Vec<u64> = df.index.iter().map(|e| e.row).collect();
        assert_eq!(rows, vec![1, 1000, 2000]);

        // Offsets must point at the exact start byte of their row.
        let bytes = std::fs::read(&path).unwrap();
        for entry in &df.index {
            let prev = bytes[entry.offset as usize - 1];
            assert_eq!(prev, b'\n', "entry for row {} misaligned", entry.row);
        }

        // Monotone in every field.
        for pair in df.index.windows(2) {
            assert!(pair[0].row < pair[1].row);
            assert!(pair[0].offset < pair[1].offset);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    /// Epoch-millisecond time columns index with no entries (layouts only);
    /// the row count and header still come through.
    #[test]
    fn test_index_unix_millis_file_has_no_entries() {
        let dir = TempDir::new().unwrap();
        let content = "Time,a\n1770647600000,1\n1770647601000,2\n";
        let path = write_csv(&dir, "epoch.csv", content);
        let df = index_file(&path, "epoch.csv", false).unwrap();
        assert_eq!(df.rows, 2);
        assert!(df.index.is_empty());
        assert!(df.start_time.is_none());
        assert_eq!(df.time_layout, time::DEFAULT_LAYOUT);
    }
}
