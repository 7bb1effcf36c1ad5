// ESX Doctor - app/facade.rs
//
// Request facade: the adapter the transport layer calls into. Resolves the
// session, dispatches meta/series/open/upload/URL/diagnostics/template
// operations to the core, and shapes the responses for serialisation.
// Operation failures terminate the single request; they never tear down the
// session or the registry.

use crate::app::ingest;
use crate::app::registry::{Session, SessionHandle, SessionRegistry};
use crate::app::store::TemplateStore;
use crate::core::diagnose::{self, DiagnosticFinding};
use crate::core::index::{self, DataFile};
use crate::core::series::{self, SeriesResponse};
use crate::core::template::DiagnosticTemplate;
use crate::core::time;
use crate::util::error::{RequestError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// Request/response shapes
// =============================================================================

/// Metadata snapshot of a session's active file. Never errors: an empty
/// session reports `loaded = false`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaResponse {
    pub columns: Vec<String>,
    pub rows: u64,
    /// First/last parsed row timestamps, Unix milliseconds; 0 when unknown.
    pub start: i64,
    pub end: i64,
    pub file: String,
    pub loaded: bool,
}

/// A series request as received from the transport layer.
///
/// `start`/`end` accept Unix-millisecond integers or any supported timestamp
/// layout; absent, empty, or `"0"` means unbounded. `max_points == 0`
/// disables decimation.
#[derive(Debug, Clone, Default)]
pub struct SeriesRequest {
    pub cols: Vec<usize>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub max_points: usize,
}

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim) {
        None | Some("") | Some("0") => Ok(None),
        Some(value) => Ok(Some(time::parse_instant_arg(value)?)),
    }
}

// =============================================================================
// Facade
// =============================================================================

/// Dispatch layer binding the session registry, the template store, and the
/// core engines together.
pub struct RequestFacade {
    registry: Arc<SessionRegistry>,
    store: Arc<TemplateStore>,
}

impl RequestFacade {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<TemplateStore>) -> Self {
        Self { registry, store }
    }

    /// Resolve a request's session (creating one as needed).
    pub fn session(&self, id: Option<&str>) -> SessionHandle {
        self.registry.session_for(id)
    }

    // -------------------------------------------------------------------------
    // Meta and file lifecycle
    // -------------------------------------------------------------------------

    /// Snapshot the session's active file.
    pub fn meta(&self, session: &Session) -> MetaResponse {
        match session.data_file() {
            Some(file) => MetaResponse {
                columns: file.columns.clone(),
                rows: file.rows,
                start: file.start_time.map_or(0, |t| t.timestamp_millis()),
                end: file.end_time.map_or(0, |t| t.timestamp_millis()),
                file: file.label.clone(),
                loaded: true,
            },
            None => MetaResponse {
                columns: Vec::new(),
                rows: 0,
                start: 0,
                end: 0,
                file: String::new(),
                loaded: false,
            },
        }
    }

    /// Index a local file and make it the session's active file.
    ///
    /// Only absolute paths are accepted; a relative path would resolve
    /// against this process's working directory, not the caller's.
    pub fn open_path(&self, session: &Session, path: &Path) -> Result<MetaResponse> {
        if !path.is_absolute() {
            return Err(RequestError::PathNotAbsolute {
                path: path.to_path_buf(),
            }
            .into());
        }
        if !path.exists() {
            return Err(RequestError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }
        if !path.is_file() {
            return Err(RequestError::NotAFile {
                path: path.to_path_buf(),
            }
            .into());
        }

        let label = path.display().to_string();
        let file = index::index_file(path, &label, false)?;
        session.replace(Some(Arc::new(file)));
        Ok(self.meta(session))
    }

    /// Stream an uploaded body into an owned temp file, index it, and make
    /// it the session's active file.
    pub fn upload<R: Read>(
        &self,
        session: &Session,
        body: &mut R,
        filename: &str,
    ) -> Result<MetaResponse> {
        let ingested = ingest::save_upload(body, filename)?;
        self.adopt_temp(session, ingested)
    }

    /// Download an http/https URL into an owned temp file, index it, and
    /// make it the session's active file.
    pub fn open_url(&self, session: &Session, url: &str) -> Result<MetaResponse> {
        let ingested = ingest::fetch_url(url)?;
        self.adopt_temp(session, ingested)
    }

    /// Index an ingested temp and hand ownership to the session. On indexer
    /// failure the temp is removed here; it never became session-owned.
    fn adopt_temp(&self, session: &Session, ingested: ingest::IngestedFile) -> Result<MetaResponse> {
        match index::index_file(&ingested.path, &ingested.label, true) {
            Ok(file) => {
                session.replace(Some(Arc::new(file)));
                Ok(self.meta(session))
            }
            Err(e) => {
                let _ = std::fs::remove_file(&ingested.path);
                Err(e.into())
            }
        }
    }

    /// Drop the session's active file (deleting an owned temp).
    pub fn close(&self, session: &Session) {
        session.close();
    }

    // -------------------------------------------------------------------------
    // Series
    // -------------------------------------------------------------------------

    /// Extract a series window from the session's active file.
    pub fn series(&self, session: &Session, request: &SeriesRequest) -> Result<SeriesResponse> {
        let file = self.require_file(session)?;
        let start = parse_bound(request.start.as_deref())?;
        let end = parse_bound(request.end.as_deref())?;
        series::extract(&file, &request.cols, start, end, request.max_points)
    }

    // -------------------------------------------------------------------------
    // Diagnostics and templates
    // -------------------------------------------------------------------------

    /// Run the selected templates (all enabled ones when `ids` is empty)
    /// over the session's active file.
    pub fn run_diagnostics(
        &self,
        session: &Session,
        ids: &[String],
    ) -> Result<Vec<DiagnosticFinding>> {
        let file = self.require_file(session)?;
        let templates = self.store.select(ids);
        diagnose::run(&file, &templates)
    }

    pub fn list_templates(&self) -> Vec<DiagnosticTemplate> {
        self.store.list()
    }

    pub fn save_template(&self, template: DiagnosticTemplate) -> Result<DiagnosticTemplate> {
        Ok(self.store.upsert(template)?)
    }

    pub fn delete_template(&self, id: &str) -> Result<()> {
        Ok(self.store.delete(id)?)
    }

    pub fn export_templates(&self) -> Vec<DiagnosticTemplate> {
        self.store.list()
    }

    pub fn import_templates(
        &self,
        templates: Vec<DiagnosticTemplate>,
        replace: bool,
    ) -> Result<usize> {
        Ok(self.store.import(templates, replace)?)
    }

    fn require_file(&self, session: &Session) -> Result<Arc<DataFile>> {
        session
            .data_file()
            .ok_or_else(|| RequestError::NoFileLoaded.into())
    }
}

// =============================================================================
// Unit tests
// =============================================================================
