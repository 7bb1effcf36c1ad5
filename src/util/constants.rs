// ESX Doctor - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "ESX Doctor";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Indexing
// =============================================================================

/// Row stride between sparse index entries.
///
/// One `IndexEntry` is recorded at row 1 and at every stride-th row after it,
/// so a 500k-row export carries ~500 entries. Seeking binary-searches the
/// entries and then re-scans at most `INDEX_STRIDE - 1` rows.
pub const INDEX_STRIDE: u64 = 1_000;

/// Buffered reader capacity for full-file scans (indexing, diagnostics).
/// Large exports are read at disk throughput; per-line work is bounded by the
/// record decode itself.
pub const SCAN_BUFFER_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

// =============================================================================
// Sessions
// =============================================================================

/// Number of random bytes in a generated session ID (hex-encoded on the wire).
pub const SESSION_ID_BYTES: usize = 16;

/// Sessions idle longer than this are evicted by the expiration sweep.
pub const SESSION_TTL_HOURS: i64 = 24;

/// How often the expiration sweep runs.
pub const SWEEP_INTERVAL_MINS: u64 = 30;

/// How often the sweep thread's cancel flag is checked between sweeps (ms).
/// The thread wakes every this many ms so shutdown is prompt.
pub const SWEEP_CANCEL_CHECK_INTERVAL_MS: u64 = 500;

// =============================================================================
// Ingestion
// =============================================================================

/// Temp file name prefix for uploaded CSV bodies.
pub const UPLOAD_TEMP_PREFIX: &str = "esx-doctor-upload-";

/// Temp file name prefix for URL-downloaded CSV bodies.
pub const URL_TEMP_PREFIX: &str = "esx-doctor-url-";

/// Temp file name suffix for both ingestion paths.
pub const INGEST_TEMP_SUFFIX: &str = ".csv";

/// Total deadline for a URL fetch (connect + TLS + full body).
pub const URL_FETCH_TOTAL_DEADLINE_SECS: u64 = 60;

/// Connect (and TLS handshake) timeout for a URL fetch.
pub const URL_FETCH_CONNECT_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Diagnostics
// =============================================================================

/// Default minimum consecutive-row streak length for sustained detectors.
pub const DEFAULT_MIN_CONSECUTIVE: u32 = 6;

/// Maximum findings emitted by a single processor.
/// A pathological export with thousands of breaching instances produces a
/// bounded report rather than one finding per instance.
pub const MAX_FINDINGS_PER_PROCESSOR: usize = 20;

/// Maximum entity names listed in an exclusive-affinity finding before the
/// remainder is collapsed into an "and N more" suffix.
pub const AFFINITY_ENTITY_LIST_LIMIT: usize = 12;

// =============================================================================
// Persistence
// =============================================================================

/// Per-user data directory name, resolved under the home directory.
pub const DATA_DIR_NAME: &str = ".esx-doctor";

/// Custom template store file name (inside the data directory).
pub const TEMPLATES_FILE_NAME: &str = "templates.json";

/// Optional configuration file name (inside the data directory).
pub const CONFIG_FILE_NAME: &str = "config.toml";

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen port handed to the transport layer.
pub const DEFAULT_PORT: u16 = 8080;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
