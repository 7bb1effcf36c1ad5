// ESX Doctor - app/registry.rs
//
// Session registry: an opaque-ID map of per-client holders, each owning at
// most one indexed DataFile.
//
// Locking is two-level: the registry's RW lock guards the map (lookups read,
// creation/expiration write); each session's own RW lock guards its file
// pointer and last-seen stamp. Readers of the same DataFile proceed in
// parallel with their own file handles; a replace cannot race a reader
// because the old Arc keeps the descriptor alive and the backing file is
// only unlinked inside the replace call itself.
//
// Temp lifecycle rule: an owned-temp backing file is deleted exactly once,
// on the replace/close path where it stops being the session's active file
// and the incoming path differs. Never deferred to a drop or finalizer.

use crate::core::index::DataFile;
use crate::util::constants::SESSION_ID_BYTES;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock};

// =============================================================================
// Session
// =============================================================================

struct SessionState {
    data_file: Option<Arc<DataFile>>,
    last_seen: DateTime<Utc>,
}

/// One client's holder: zero or one active DataFile plus its idle stamp.
pub struct Session {
    inner: RwLock<SessionState>,
}

impl Session {
    fn new(initial: Option<Arc<DataFile>>) -> Self {
        Self {
            inner: RwLock::new(SessionState {
                data_file: initial,
                last_seen: Utc::now(),
            }),
        }
    }

    /// The currently active file, if any.
    pub fn data_file(&self) -> Option<Arc<DataFile>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .data_file
            .clone()
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_seen
    }

    /// Refresh the idle stamp.
    pub fn touch(&self) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_seen = Utc::now();
    }

    /// Swap the active file under the write lock.
    ///
    /// If the prior file owned its backing temp, the temp is deleted here,
    /// unless the incoming file points at the very same path.
    pub fn replace(&self, new_file: Option<Arc<DataFile>>) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let old = state.data_file.take();
        state.data_file = new_file;

        if let Some(old) = old {
            if old.owned_temp {
                let same_path = state
                    .data_file
                    .as_ref()
                    .is_some_and(|n| n.path == old.path);
                if !same_path {
                    match std::fs::remove_file(&old.path) {
                        Ok(()) => {
                            tracing::debug!(path = %old.path.display(), "Owned temp file deleted")
                        }
                        Err(e) => tracing::warn!(
                            path = %old.path.display(),
                            error = %e,
                            "Failed to delete owned temp file"
                        ),
                    }
                }
            }
        }
    }

    /// Drop the active file (deleting an owned temp).
    pub fn close(&self) {
        self.replace(None);
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Result of resolving a request's session ID.
pub struct SessionHandle {
    /// The (possibly freshly generated) session ID. The response layer
    /// refreshes the cookie with this value on every request.
    pub id: String,

    pub session: Arc<Session>,

    /// True when this request created the session.
    pub created: bool,
}

/// Map from opaque session ID to holder, plus the optional bootstrap file
/// seeded into newly created sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    default_file: Option<Arc<DataFile>>,
    ttl: Duration,
}

impl SessionRegistry {
    /// `default_file` is handed to every new session as its initial file; it
    /// is never owned-temp and never deleted automatically.
    pub fn new(default_file: Option<Arc<DataFile>>, ttl_hours: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            default_file,
            ttl: Duration::hours(ttl_hours),
        }
    }

    /// Resolve `id` to a session, creating one (with a fresh random ID when
    /// none was supplied) and touching its idle stamp.
    pub fn session_for(&self, id: Option<&str>) -> SessionHandle {
        if let Some(id) = id {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(session) = sessions.get(id) {
                session.touch();
                return SessionHandle {
                    id: id.to_string(),
                    session: Arc::clone(session),
                    created: false,
                };
            }
        }

        let id = id.map(str::to_string).unwrap_or_else(generate_id);
        let session = Arc::new(Session::new(self.default_file.clone()));
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        // A racing request may have created the same ID between our read and
        // write; keep the existing holder in that case.
        let session = Arc::clone(
            sessions
                .entry(id.clone())
                .or_insert_with(|| Arc::clone(&session)),
        );
        session.touch();
        tracing::debug!(session = %id, "Session resolved");
        SessionHandle {
            id,
            session,
            created: true,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict sessions idle past the TTL, closing each (which releases any
    /// owned temp). Returns the number evicted.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        let ttl = self.ttl;
        let mut evicted: Vec<Arc<Session>> = Vec::new();
        sessions.retain(|id, session| {
            let expired = now - session.last_seen() > ttl;
            if expired {
                tracing::info!(session = %id, "Session expired");
                evicted.push(Arc::clone(session));
            }
            !expired
        });
        drop(sessions);

        for session in &evicted {
            session.close();
        }
        before - self.len()
    }
}

/// Generate a 128-bit random session ID, hex-encoded.
fn generate_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    // Entropy failure here means the OS RNG is broken; there is no sane
    // fallback for an identifier that must be unguessable.
    getrandom::getrandom(&mut bytes).expect("system entropy unavailable");
    bytes.iter().fold(
        String::with_capacity(SESSION_ID_BYTES * 2),
        |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        },
    )
}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn stub_file(path: &Path, owned_temp: bool) -> Arc<DataFile> {
        Arc::new(DataFile {
            path: path.to_path_buf(),
            label: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            owned_temp,
            columns: vec!["Time".to_string()],
            index: Vec::new(),
            rows: 0,
            start_time: None,
            end_time: None,
            data_start_offset: 0,
            time_layout: crate::core::time::DEFAULT_LAYOUT,
        })
    }

    fn temp_backing(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"Time,a\n").unwrap();
        path
    }

    #[test]
    fn test_session_for_creates_and_reuses() {
        let registry = SessionRegistry::new(None, 24);
        let first = registry.session_for(None);
        assert!(first.created);
        assert_eq!(first.id.len(), SESSION_ID_BYTES * 2);

        let again = registry.session_for(Some(&first.id));
        assert!(!again.created);
        assert!(Arc::ptr_eq(&first.session, &again.session));
        assert_eq!(registry.len(), 1);

        // An unknown explicit ID creates a session under that ID.
        let explicit = registry.session_for(Some("client-supplied"));
        assert!(explicit.created);
        assert_eq!(explicit.id, "client-supplied");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_default_file_seeds_new_sessions() {
        let dir = TempDir::new().unwrap();
        let bootstrap = temp_backing(&dir, "bootstrap.csv");
        let registry = SessionRegistry::new(Some(stub_file(&bootstrap, false)), 24);

        let handle = registry.session_for(None);
        assert!(handle.session.data_file().is_some());

        // Replacing the bootstrap must not delete it (not owned_temp).
        handle.session.replace(None);
        assert!(bootstrap.exists());
    }

    #[test]
    fn test_replace_deletes_owned_temp() {
        let dir = TempDir::new().unwrap();
        let old = temp_backing(&dir, "esx-doctor-upload-1.csv");
        let new = temp_backing(&dir, "esx-doctor-upload-2.csv");

        let registry = SessionRegistry::new(None, 24);
        let handle = registry.session_for(None);
        handle.session.replace(Some(stub_file(&old, true)));
        handle.session.replace(Some(stub_file(&new, true)));

        assert!(!old.exists(), "replaced owned temp must be deleted");
        assert!(new.exists());
    }

    /// Replacing with the same path must not delete the backing file.
    #[test]
    fn test_replace_same_path_keeps_file() {
        let dir = TempDir::new().unwrap();
        let path = temp_backing(&dir, "esx-doctor-upload-1.csv");

        let registry = SessionRegistry::new(None, 24);
        let handle = registry.session_for(None);
        handle.session.replace(Some(stub_file(&path, true)));
        handle.session.replace(Some(stub_file(&path, true)));

        assert!(path.exists());
    }

    /// After N replaces at most one owned temp remains; close removes it.
    #[test]
    fn test_temp_file_hygiene() {
        let dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(None, 24);
        let handle = registry.session_for(None);

        let mut paths = Vec::new();
        for i in 0..5 {
            let path = temp_backing(&dir, &format!("esx-doctor-upload-{i}.csv"));
            handle.session.replace(Some(stub_file(&path, true)));
            paths.push(path);
        }

        let alive: Vec<_> = paths.iter().filter(|p| p.exists()).collect();
        assert_eq!(alive.len(), 1, "exactly one owned temp may remain");

        handle.session.close();
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_sweep_evicts_idle_sessions_and_releases_temps() {
        let dir = TempDir::new().unwrap();
        let backing = temp_backing(&dir, "esx-doctor-upload-x.csv");

        let registry = SessionRegistry::new(None, 24);
        let handle = registry.session_for(None);
        handle.session.replace(Some(stub_file(&backing, true)));

        // Nothing is idle yet.
        assert_eq!(registry.sweep(Utc::now()), 0);
        assert_eq!(registry.len(), 1);

        // Jump the clock past the TTL.
        let future = Utc::now() + Duration::hours(25);
        assert_eq!(registry.sweep(future), 1);
        assert!(registry.is_empty());
        assert!(!backing.exists(), "eviction must release the owned temp");
    }
}
