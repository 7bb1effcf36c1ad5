// ESX Doctor - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// Row-level failures (bad timestamp, bad CSV row, bad numeric cell) are never
// errors at all; they advance the scan. Everything here is operation-level:
// it terminates one request without touching session or registry state.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all ESX Doctor operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum EsxDoctorError {
    /// CSV indexing failed.
    Index(IndexError),

    /// Timestamp parsing failed in a pure time-parse API.
    Time(TimeError),

    /// Template store loading or mutation failed.
    Store(StoreError),

    /// URL ingestion failed.
    Fetch(FetchError),

    /// A facade request could not be served.
    Request(RequestError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },
}

impl fmt::Display for EsxDoctorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(e) => write!(f, "Index error: {e}"),
            Self::Time(e) => write!(f, "Time error: {e}"),
            Self::Store(e) => write!(f, "Template store error: {e}"),
            Self::Fetch(e) => write!(f, "Fetch error: {e}"),
            Self::Request(e) => write!(f, "Request error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for EsxDoctorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Index(e) => Some(e),
            Self::Time(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Fetch(e) => Some(e),
            Self::Request(e) => Some(e),
            Self::Io { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Index errors
// ---------------------------------------------------------------------------

/// Errors produced by the one-pass file indexer.
#[derive(Debug)]
pub enum IndexError {
    /// The file contains zero bytes; there is nothing to index.
    EmptyFile { path: PathBuf },

    /// The header line (row 0) could not be decoded as CSV.
    HeaderMalformed { path: PathBuf, source: csv::Error },

    /// I/O error while scanning the file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyFile { path } => {
                write!(f, "'{}' is empty", path.display())
            }
            Self::HeaderMalformed { path, source } => {
                write!(f, "'{}': malformed header line: {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "'{}': I/O error: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::HeaderMalformed { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<IndexError> for EsxDoctorError {
    fn from(e: IndexError) -> Self {
        Self::Index(e)
    }
}

// ---------------------------------------------------------------------------
// Time errors
// ---------------------------------------------------------------------------

/// Errors produced by the pure timestamp-parse APIs.
///
/// Inside scans a failed timestamp only skips its row; this error surfaces
/// exclusively where a caller supplied the string directly (e.g. the series
/// endpoint's start/end parameters).
#[derive(Debug)]
pub enum TimeError {
    /// No layout matched and the string is not a Unix millisecond count.
    Unrecognised { value: String },
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecognised { value } => {
                write!(f, "cannot parse '{value}' with any known time layout")
            }
        }
    }
}

impl std::error::Error for TimeError {}

impl From<TimeError> for EsxDoctorError {
    fn from(e: TimeError) -> Self {
        Self::Time(e)
    }
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors produced by the template store.
#[derive(Debug)]
pub enum StoreError {
    /// The persisted custom-template JSON could not be parsed.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A template is missing a required field (`id`, `name`, `detector.type`).
    InvalidTemplate { id: String, reason: &'static str },

    /// Upsert or delete targeted a built-in template ID.
    BuiltinReadOnly { id: String },

    /// I/O error reading or persisting the store.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json { path, source } => {
                write!(f, "failed to parse '{}': {source}", path.display())
            }
            Self::InvalidTemplate { id, reason } => {
                write!(f, "template '{id}': {reason}")
            }
            Self::BuiltinReadOnly { id } => {
                write!(f, "template '{id}' is built-in and read-only")
            }
            Self::Io { path, source } => {
                write!(f, "'{}': I/O error: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for EsxDoctorError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Fetch errors
// ---------------------------------------------------------------------------

/// Errors produced by URL ingestion. All of these surface as gateway errors.
#[derive(Debug)]
pub enum FetchError {
    /// The URL scheme is not http or https.
    SchemeNotAllowed { url: String },

    /// Connect, TLS, status, or body-read failure (deadlines included).
    Request {
        url: String,
        source: reqwest::Error,
    },

    /// The remote returned a non-success status.
    Status { url: String, status: u16 },

    /// I/O error writing the downloaded body to the temp file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemeNotAllowed { url } => {
                write!(f, "only http/https URLs are allowed: '{url}'")
            }
            Self::Request { url, source } => {
                write!(f, "fetch of '{url}' failed: {source}")
            }
            Self::Status { url, status } => {
                write!(f, "fetch of '{url}' returned status {status}")
            }
            Self::Io { path, source } => {
                write!(f, "'{}': I/O error: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Request { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FetchError> for EsxDoctorError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

/// Errors produced by the request facade itself.
#[derive(Debug)]
pub enum RequestError {
    /// Series or diagnostics were requested before any file was loaded.
    NoFileLoaded,

    /// An open() path is not absolute.
    PathNotAbsolute { path: PathBuf },

    /// An open() path does not exist.
    FileNotFound { path: PathBuf },

    /// An open() path exists but is not a regular file.
    NotAFile { path: PathBuf },
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFileLoaded => write!(f, "no file loaded in this session"),
            Self::PathNotAbsolute { path } => {
                write!(f, "'{}' is not an absolute path", path.display())
            }
            Self::FileNotFound { path } => {
                write!(f, "'{}' does not exist", path.display())
            }
            Self::NotAFile { path } => {
                write!(f, "'{}' is not a regular file", path.display())
            }
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RequestError> for EsxDoctorError {
    fn from(e: RequestError) -> Self {
        Self::Request(e)
    }
}

/// Convenience type alias for ESX Doctor results.
pub type Result<T> = std::result::Result<T, EsxDoctorError>;
