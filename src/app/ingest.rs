// ESX Doctor - app/ingest.rs
//
// Ingestion of CSV bodies into owned temp files: streamed uploads and
// http/https downloads. The temp file is persisted (kept) here and handed to
// the indexer; from then on the owning session is responsible for deleting
// it on replace/close. On any ingestion failure the partial temp file is
// removed before the error propagates, so nothing leaks.

use crate::util::constants::{
    INGEST_TEMP_SUFFIX, UPLOAD_TEMP_PREFIX, URL_FETCH_CONNECT_TIMEOUT_SECS,
    URL_FETCH_TOTAL_DEADLINE_SECS, URL_TEMP_PREFIX,
};
use crate::util::error::{EsxDoctorError, FetchError};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// A freshly written temp file ready for indexing, plus its display label.
#[derive(Debug)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub label: String,
}

/// Create a persisted temp file with the given name pattern.
fn create_temp(prefix: &str) -> std::io::Result<(File, PathBuf)> {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(INGEST_TEMP_SUFFIX)
        .tempfile()?;
    temp.keep().map_err(|e| e.error)
}

/// Stream an upload body to a new owned temp file.
///
/// `filename` is the client-supplied name used as the display label.
pub fn save_upload<R: Read>(body: &mut R, filename: &str) -> Result<IngestedFile, EsxDoctorError> {
    let (mut file, path) = create_temp(UPLOAD_TEMP_PREFIX).map_err(|e| EsxDoctorError::Io {
        path: std::env::temp_dir(),
        operation: "upload ingestion",
        source: e,
    })?;

    if let Err(e) = std::io::copy(body, &mut file) {
        let _ = std::fs::remove_file(&path);
        return Err(EsxDoctorError::Io {
            path,
            operation: "upload ingestion",
            source: e,
        });
    }

    let label = if filename.trim().is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.csv".to_string())
    } else {
        filename.trim().to_string()
    };

    tracing::info!(path = %path.display(), label, "Upload ingested");
    Ok(IngestedFile { path, label })
}

/// Download `url` (http/https only) to a new owned temp file.
///
/// The connect timeout bounds TCP establishment and TLS handshake; the total
/// timeout bounds the whole transfer including the body.
pub fn fetch_url(url: &str) -> Result<IngestedFile, FetchError> {
    let lower = url.trim().to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return Err(FetchError::SchemeNotAllowed {
            url: url.to_string(),
        });
    }

    let client = reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(URL_FETCH_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(URL_FETCH_TOTAL_DEADLINE_SECS))
        .build()
        .map_err(|e| FetchError::Request {
            url: url.to_string(),
            source: e,
        })?;

    let mut response = client.get(url).send().map_err(|e| FetchError::Request {
        url: url.to_string(),
        source: e,
    })?;
    if !response.status().is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let (mut file, path) = create_temp(URL_TEMP_PREFIX).map_err(|e| FetchError::Io {
        path: std::env::temp_dir(),
        source: e,
    })?;

    if let Err(e) = response.copy_to(&mut file) {
        let _ = std::fs::remove_file(&path);
        return Err(FetchError::Request {
            url: url.to_string(),
            source: e,
        });
    }

    let label = url_basename(url).unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download.csv".to_string())
    });

    tracing::info!(url, path = %path.display(), label, "URL ingested");
    Ok(IngestedFile { path, label })
}

/// Extract the final path segment of a URL, ignoring query and fragment.
fn url_basename(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    let base = path.rsplit('/').next().unwrap_or("");
    // "host/" or a bare host yields no usable basename.
    if base.is_empty() || !path.contains('/') {
        None
    } else {
        Some(base.to_string())
    }
}

// =============================================================================
// Unit tests
// =============================================================================
