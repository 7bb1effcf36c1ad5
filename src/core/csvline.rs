// ESX Doctor - core/csvline.rs
//
// Single-line CSV record decoding.
//
// Line framing (newline splitting, offset accounting) belongs to the callers
// so byte offsets in the sparse index stay exact; this module only turns one
// already-delimited line into a record. Quoted fields, stray quotes, and
// variable field counts are all tolerated; non-UTF-8 bytes are decoded
// lossily. A decode failure causes the caller to skip the row.

use csv::{ByteRecord, ReaderBuilder, StringRecord};

/// Decode one logical record from a single line.
///
/// `line` must not contain the record terminator (use [`trim_line`] first).
/// Returns `Ok(None)` for a blank line.
pub fn decode_line(line: &[u8]) -> Result<Option<StringRecord>, csv::Error> {
    if line.is_empty() {
        return Ok(None);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);

    let mut record = ByteRecord::new();
    match reader.read_byte_record(&mut record) {
        Ok(true) => Ok(Some(StringRecord::from_byte_record_lossy(record))),
        Ok(false) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Strip the trailing `\n` (and an optional preceding `\r`) from a raw line.
pub fn trim_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    &raw[..end]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &[u8]) -> Vec<String> {
        decode_line(line)
            .unwrap()
            .expect("line should decode to a record")
            .iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_decode_plain_fields() {
        assert_eq!(fields(b"a,b,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_decode_quoted_fields() {
        assert_eq!(
            fields(br#""02/09/2026 15:30:00","1.5",""#),
            vec!["02/09/2026 15:30:00", "1.5", ""]
        );
    }

    #[test]
    fn test_decode_embedded_comma_and_quote() {
        assert_eq!(
            fields(br#""a,b","say ""hi""""#),
            vec!["a,b", r#"say "hi""#]
        );
    }

    /// Stray quotes inside an unquoted field must not fail the row.
    #[test]
    fn test_decode_lazy_quotes() {
        let record = decode_line(br#"val"ue,2"#).unwrap().unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(&record[1], "2");
    }

    #[test]
    fn test_decode_blank_line_is_none() {
        assert!(decode_line(b"").unwrap().is_none());
    }

    #[test]
    fn test_trim_line_variants() {
        assert_eq!(trim_line(b"a,b\r\n"), b"a,b");
        assert_eq!(trim_line(b"a,b\n"), b"a,b");
        assert_eq!(trim_line(b"a,b"), b"a,b");
        assert_eq!(trim_line(b"\n"), b"");
    }
}
