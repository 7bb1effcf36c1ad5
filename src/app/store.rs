// ESX Doctor - app/store.rs
//
// Template store: a merged view of immutable built-in detector templates
// (embedded at compile time) and user-defined templates persisted as one
// JSON document. The two maps are disjoint on ID; only the custom map is
// ever written to disk. Every mutation re-serialises the whole file while
// the write lock is held.
//
// Persistence is write-temp-then-rename so a crash mid-save never corrupts
// the previous good file. A torn write only affects user customisations;
// builtins are compiled in.

use crate::core::template::{derive_id, DiagnosticTemplate};
use crate::util::constants::TEMPLATES_FILE_NAME;
use crate::util::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

// =============================================================================
// Built-in templates (embedded at compile time)
// =============================================================================

/// Embedded JSON content for built-in templates.
/// Each tuple is (filename, JSON content).
pub fn builtin_template_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "cpu_high_ready.json",
            include_str!("../../templates/cpu_high_ready.json"),
        ),
        (
            "cpu_high_costop.json",
            include_str!("../../templates/cpu_high_costop.json"),
        ),
        (
            "cpu_exclusive_affinity.json",
            include_str!("../../templates/cpu_exclusive_affinity.json"),
        ),
        (
            "storage_latency.json",
            include_str!("../../templates/storage_latency.json"),
        ),
        (
            "storage_failed_reads.json",
            include_str!("../../templates/storage_failed_reads.json"),
        ),
        (
            "storage_driver_latency.json",
            include_str!("../../templates/storage_driver_latency.json"),
        ),
        (
            "numa_low_local.json",
            include_str!("../../templates/numa_low_local.json"),
        ),
        (
            "numa_zigzag.json",
            include_str!("../../templates/numa_zigzag.json"),
        ),
        (
            "numa_imbalance.json",
            include_str!("../../templates/numa_imbalance.json"),
        ),
        (
            "memory_overcommit.json",
            include_str!("../../templates/memory_overcommit.json"),
        ),
        (
            "network_outbound_drops.json",
            include_str!("../../templates/network_outbound_drops.json"),
        ),
    ]
}

/// Load and validate all built-in templates.
///
/// Invalid builtins are logged and skipped (they are bugs, but the engine
/// degrades gracefully rather than refusing to start).
pub fn load_builtin_templates() -> Vec<DiagnosticTemplate> {
    let mut templates = Vec::new();
    for (filename, content) in builtin_template_sources() {
        match serde_json::from_str::<DiagnosticTemplate>(content) {
            Ok(mut template) => {
                template.normalise();
                if template.id.is_empty() || template.name.is_empty() {
                    tracing::error!(file = filename, "Built-in template missing id or name");
                    continue;
                }
                tracing::debug!(template = %template.id, "Loaded built-in template");
                templates.push(template);
            }
            Err(e) => {
                tracing::error!(file = filename, error = %e, "Failed to load built-in template");
            }
        }
    }
    templates
}

// =============================================================================
// Store
// =============================================================================

/// On-disk shape of the custom template document.
#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreFile {
    templates: Vec<DiagnosticTemplate>,
}

/// Merged template store: read-only builtins plus the persisted custom map.
pub struct TemplateStore {
    builtins: BTreeMap<String, DiagnosticTemplate>,
    custom: RwLock<BTreeMap<String, DiagnosticTemplate>>,
    path: PathBuf,
}

impl TemplateStore {
    /// Build a store over `builtins`, loading the custom map from `path`.
    ///
    /// A missing file is not an error (empty custom map). Invalid JSON or a
    /// template missing its required fields aborts the load.
    pub fn new(builtins: Vec<DiagnosticTemplate>, path: &Path) -> Result<Self, StoreError> {
        let builtins: BTreeMap<String, DiagnosticTemplate> = builtins
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        let mut custom = BTreeMap::new();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let file: StoreFile =
                    serde_json::from_str(&content).map_err(|e| StoreError::Json {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                for mut template in file.templates {
                    template.normalise();
                    if template.id.is_empty() {
                        return Err(StoreError::InvalidTemplate {
                            id: template.name,
                            reason: "missing id",
                        });
                    }
                    if template.name.is_empty() {
                        return Err(StoreError::InvalidTemplate {
                            id: template.id,
                            reason: "missing name",
                        });
                    }
                    if builtins.contains_key(&template.id) {
                        tracing::warn!(
                            template = %template.id,
                            "Custom template shadows a builtin, dropped"
                        );
                        continue;
                    }
                    custom.insert(template.id.clone(), template);
                }
                tracing::info!(
                    path = %path.display(),
                    custom = custom.len(),
                    "Custom templates loaded"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        Ok(Self {
            builtins,
            custom: RwLock::new(custom),
            path: path.to_path_buf(),
        })
    }

    /// Build a store with the embedded builtins over the default file inside
    /// `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Self::new(load_builtin_templates(), &data_dir.join(TEMPLATES_FILE_NAME))
    }

    /// Builtins with an empty custom map, ignoring whatever is on disk.
    /// Fallback for an unreadable custom file; the next successful save
    /// rewrites it.
    pub fn builtins_only(data_dir: &Path) -> Self {
        let builtins = load_builtin_templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        Self {
            builtins,
            custom: RwLock::new(BTreeMap::new()),
            path: data_dir.join(TEMPLATES_FILE_NAME),
        }
    }

    /// Union of builtins and custom, sorted case-insensitively by name with
    /// an ID tiebreak.
    pub fn list(&self) -> Vec<DiagnosticTemplate> {
        let custom = self.custom.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<DiagnosticTemplate> = self
            .builtins
            .values()
            .chain(custom.values())
            .cloned()
            .collect();
        all.sort_by(|a, b| {
            a.name
                .to_lowercase()
                .cmp(&b.name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Resolve the template set for an engine run.
    ///
    /// An empty ID list selects every enabled template; otherwise each ID is
    /// resolved preferring custom over builtin, unknown IDs skipped.
    pub fn select(&self, ids: &[String]) -> Vec<DiagnosticTemplate> {
        let custom = self.custom.read().unwrap_or_else(PoisonError::into_inner);
        if ids.is_empty() {
            return self
                .builtins
                .values()
                .chain(custom.values())
                .filter(|t| t.enabled)
                .cloned()
                .collect();
        }
        ids.iter()
            .filter_map(|id| custom.get(id).or_else(|| self.builtins.get(id)))
            .cloned()
            .collect()
    }

    /// Insert or replace a custom template, persisting the whole map.
    ///
    /// An empty ID is derived from the name. Builtin IDs are read-only.
    /// Returns the stored (normalised) template.
    pub fn upsert(&self, mut template: DiagnosticTemplate) -> Result<DiagnosticTemplate, StoreError> {
        template.normalise();
        if template.name.is_empty() {
            return Err(StoreError::InvalidTemplate {
                id: template.id,
                reason: "missing name",
            });
        }
        if template.id.is_empty() {
            template.id = derive_id(&template.name);
        }
        if self.builtins.contains_key(&template.id) {
            return Err(StoreError::BuiltinReadOnly { id: template.id });
        }

        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        custom.insert(template.id.clone(), template.clone());
        self.persist(&custom)?;
        tracing::info!(template = %template.id, "Custom template saved");
        Ok(template)
    }

    /// Delete a custom template. Builtin IDs reject; unknown IDs succeed
    /// silently.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.builtins.contains_key(id) {
            return Err(StoreError::BuiltinReadOnly { id: id.to_string() });
        }
        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        if custom.remove(id).is_some() {
            tracing::info!(template = id, "Custom template deleted");
        }
        self.persist(&custom)
    }

    /// Import a template set, optionally replacing the whole custom map.
    ///
    /// Entries with an empty name or an ID colliding with a builtin are
    /// skipped. Returns the number of templates imported.
    pub fn import(
        &self,
        templates: Vec<DiagnosticTemplate>,
        replace: bool,
    ) -> Result<usize, StoreError> {
        let mut custom = self.custom.write().unwrap_or_else(PoisonError::into_inner);
        if replace {
            custom.clear();
        }
        let mut imported = 0;
        for mut template in templates {
            template.normalise();
            if template.name.is_empty() {
                tracing::warn!("Skipping imported template with empty name");
                continue;
            }
            if template.id.is_empty() {
                template.id = derive_id(&template.name);
            }
            if self.builtins.contains_key(&template.id) {
                tracing::warn!(template = %template.id, "Skipping import colliding with builtin");
                continue;
            }
            custom.insert(template.id.clone(), template);
            imported += 1;
        }
        self.persist(&custom)?;
        tracing::info!(imported, replace, "Templates imported");
        Ok(imported)
    }

    /// Serialise the custom map to disk while the caller holds the write
    /// lock. Atomic via write-temp-then-rename.
    fn persist(&self, custom: &BTreeMap<String, DiagnosticTemplate>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
            set_mode(parent, 0o755);
        }

        let file = StoreFile {
            templates: custom.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| StoreError::Json {
            path: self.path.clone(),
            source: e,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes()).map_err(|e| StoreError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        set_mode(&tmp, 0o644);

        std::fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::Io {
                path: self.path.clone(),
                source: e,
            }
        })?;

        tracing::debug!(path = %self.path.display(), "Template store persisted");
        Ok(())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        tracing::debug!(path = %path.display(), error = %e, "Cannot set permissions");
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

// =============================================================================
// Unit tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn builtin(id: &str, name: &str) -> DiagnosticTemplate {
        serde_json::from_str(&format!(
            r#"{{"id": "{id}", "name": "{name}", "detector": {{"type": "high_ready"}}}}"#
        ))
        .unwrap()
    }

    fn custom_template(name: &str) -> DiagnosticTemplate {
        serde_json::from_str(&format!(
            r#"{{"name": "{name}", "detector": {{"type": "threshold_sustained"}}}}"#
        ))
        .unwrap()
    }

    fn store_in(dir: &TempDir) -> TemplateStore {
        let path = dir.path().join("templates.json");
        TemplateStore::new(vec![builtin("b1", "Builtin One")], &path).unwrap()
    }

    #[test]
    fn test_embedded_builtins_all_load() {
        let templates = load_builtin_templates();
        assert_eq!(templates.len(), builtin_template_sources().len());
        assert!(templates.iter().all(|t| !t.is_custom()));
        assert!(templates.iter().any(|t| t.id == "cpu.high_ready"));
    }

    #[test]
    fn test_upsert_derives_id_and_persists() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let stored = store.upsert(custom_template("My Rule")).unwrap();
        assert_eq!(stored.id, "custom.my.rule");

        let content =
            std::fs::read_to_string(dir.path().join("templates.json")).unwrap();
        let file: StoreFile = serde_json::from_str(&content).unwrap();
        assert_eq!(file.templates.len(), 1);
        assert_eq!(file.templates[0].id, "custom.my.rule");
    }

    #[test]
    fn test_delete_round_trip_leaves_empty_document() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.upsert(custom_template("My Rule")).unwrap();
        store.delete("custom.my.rule").unwrap();

        let content =
            std::fs::read_to_string(dir.path().join("templates.json")).unwrap();
        let file: StoreFile = serde_json::from_str(&content).unwrap();
        assert!(file.templates.is_empty());

        // Deleting an unknown ID succeeds silently.
        store.delete("custom.never.existed").unwrap();
    }

    #[test]
    fn test_builtin_ids_are_read_only() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut hijack = custom_template("Hijack");
        hijack.id = "b1".to_string();
        assert!(matches!(
            store.upsert(hijack),
            Err(StoreError::BuiltinReadOnly { .. })
        ));
        assert!(matches!(
            store.delete("b1"),
            Err(StoreError::BuiltinReadOnly { .. })
        ));

        // Neither attempt may touch the persisted document.
        let path = dir.path().join("templates.json");
        assert!(!path.exists(), "rejected mutations must not persist anything");
    }

    #[test]
    fn test_upsert_requires_name() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let nameless = custom_template("   ");
        assert!(matches!(
            store.upsert(nameless),
            Err(StoreError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn test_load_round_trip_and_builtin_shadow_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        {
            let store = TemplateStore::new(vec![builtin("b1", "Builtin One")], &path).unwrap();
            store.upsert(custom_template("Keep Me")).unwrap();
            let mut shadow = custom_template("Shadow");
            shadow.id = "custom.shadow".to_string();
            store.upsert(shadow).unwrap();
        }

        // Hand-edit the file to add a template shadowing the builtin ID.
        let content = std::fs::read_to_string(&path).unwrap();
        let mut file: StoreFile = serde_json::from_str(&content).unwrap();
        let mut bad = custom_template("Shadowing Builtin");
        bad.id = "b1".to_string();
        file.templates.push(bad);
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        let store = TemplateStore::new(vec![builtin("b1", "Builtin One")], &path).unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 3); // b1 + keep.me + shadow
        assert_eq!(
            store.select(&["b1".to_string()])[0].name,
            "Builtin One",
            "the builtin must win over the shadowing custom entry"
        );
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(
            TemplateStore::new(vec![], &path),
            Err(StoreError::Json { .. })
        ));
    }

    #[test]
    fn test_list_sorted_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let store = TemplateStore::new(
            vec![builtin("b1", "zeta"), builtin("b2", "Alpha")],
            &dir.path().join("templates.json"),
        )
        .unwrap();
        store.upsert(custom_template("beta")).unwrap();

        let names: Vec<String> = store.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Alpha", "beta", "zeta"]);
    }

    #[test]
    fn test_select_empty_ids_returns_enabled_only() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let mut disabled = custom_template("Disabled Rule");
        disabled.enabled = false;
        store.upsert(disabled).unwrap();
        store.upsert(custom_template("Enabled Rule")).unwrap();

        let selected = store.select(&[]);
        assert!(selected.iter().any(|t| t.id == "b1"));
        assert!(selected.iter().any(|t| t.id == "custom.enabled.rule"));
        assert!(!selected.iter().any(|t| t.id == "custom.disabled.rule"));
    }

    #[test]
    fn test_import_replace_and_skip_rules() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.upsert(custom_template("Old Rule")).unwrap();

        let mut colliding = custom_template("Collides");
        colliding.id = "b1".to_string();
        let imported = store
            .import(
                vec![
                    custom_template("New One"),
                    custom_template(""),
                    colliding,
                ],
                true,
            )
            .unwrap();

        assert_eq!(imported, 1);
        let listed = store.list();
        assert!(listed.iter().any(|t| t.id == "custom.new.one"));
        assert!(!listed.iter().any(|t| t.id == "custom.old.rule"));
    }
}
