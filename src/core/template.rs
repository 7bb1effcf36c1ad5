// ESX Doctor - core/template.rs
//
// Diagnostic template model: the JSON-persisted definition of one detector,
// its normalisation rules, and the structured column filter predicate.
// Detector types are a closed tagged variant; the engine compiles each one
// into a row processor (core/diagnose.rs). Adding a type means adding a
// variant and a processor; existing processors are untouched.

use crate::core::column::ParsedColumn;
use serde::{Deserialize, Serialize};

// =============================================================================
// Severity
// =============================================================================

/// Finding severity, ordered most severe first so findings sort naturally.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Detector definition
// =============================================================================

/// Closed set of detector types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectorType {
    /// Generic sustained-threshold streak; column selection is filter-driven.
    #[default]
    ThresholdSustained,
    HighReady,
    HighCostop,
    StorageLatency,
    LowNumaLocal,
    MemoryOvercommitHigh,
    NetworkOutboundDropHigh,
    DiskAdapterFailedReadsHigh,
    DiskAdapterDriverLatencyHigh,
    /// Dominance switching across a NUMA-load column set.
    NumaZigzag,
    /// Alias semantics of `NumaZigzag` for filter-driven column sets.
    ZigzagSwitch,
    /// Cross-entity high/low imbalance over NUMA-node processor time.
    NumaImbalance,
    /// Alias semantics of `NumaImbalance` for filter-driven column sets.
    DominanceImbalance,
    /// Boolean-active exclusive-affinity flags.
    ExclusiveAffinity,
}

/// Threshold comparison direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Greater,
    Less,
}

/// Type tag plus type-specific parameters. Zeroed numeric fields fall back
/// to per-type defaults at compile time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Detector {
    #[serde(rename = "type")]
    pub kind: DetectorType,
    pub threshold: f64,
    pub comparison: Comparison,
    pub min_consecutive: i64,
    pub min_switches: u32,
    pub min_gap: f64,
    pub high_threshold: f64,
    pub low_threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_attribute_equals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_object_equals: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_instance_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_instance_regex: Option<String>,
    pub filter: TemplateFilter,
}

// =============================================================================
// Template
// =============================================================================

/// One diagnostic template. IDs beginning with `custom.` are user-owned;
/// all others are read-only builtins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticTemplate {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub detector: Detector,
}

fn enabled_default() -> bool {
    true
}

/// ID prefix marking a user-owned template.
pub const CUSTOM_ID_PREFIX: &str = "custom.";

impl DiagnosticTemplate {
    /// Apply the store's normalisation rules in place.
    pub fn normalise(&mut self) {
        self.id = self.id.trim().to_string();
        self.name = self.name.trim().to_string();
        self.description = self.description.trim().to_string();
        if self.detector.min_consecutive <= 0 {
            self.detector.min_consecutive =
                crate::util::constants::DEFAULT_MIN_CONSECUTIVE as i64;
        }
        if self.detector.filter.logic.is_empty() {
            self.detector.filter.logic = "and".to_string();
        }
    }

    pub fn is_custom(&self) -> bool {
        self.id.starts_with(CUSTOM_ID_PREFIX)
    }
}

/// Derive a custom-template ID from a display name: lowercase, runs of
/// non-alphanumeric characters collapsed to `.`, prefixed `custom.`.
pub fn derive_id(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dot = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dot && !slug.is_empty() {
                slug.push('.');
            }
            pending_dot = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dot = true;
        }
    }
    format!("{CUSTOM_ID_PREFIX}{slug}")
}

// =============================================================================
// Structured column filter
// =============================================================================

/// Predicate over parsed columns: a condition list joined by and/or logic.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TemplateFilter {
    pub logic: String,
    pub conditions: Vec<FilterCondition>,
}

/// One condition: `field op value`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FilterCondition {
    pub field: String,
    pub op: String,
    pub value: String,
}

impl TemplateFilter {
    /// True when the filter has conditions to apply.
    pub fn is_active(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Evaluate against a parsed column.
    ///
    /// An empty condition list matches everything. A condition with an
    /// unknown field/op, or a regex that fails to compile, evaluates to
    /// false on its own without affecting its siblings.
    pub fn matches(&self, column: &ParsedColumn) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let or = self.logic.eq_ignore_ascii_case("or");
        if or {
            self.conditions.iter().any(|c| c.matches(column))
        } else {
            self.conditions.iter().all(|c| c.matches(column))
        }
    }
}

impl FilterCondition {
    fn matches(&self, column: &ParsedColumn) -> bool {
        let subject = match self.field.to_ascii_lowercase().as_str() {
            "object" => &column.object,
            "attribute" | "attributelabel" => &column.attribute_label,
            "instance" => &column.instance,
            "counter" => &column.counter,
            "raw" => &column.raw,
            _ => return false,
        };
        let subject_lower = subject.to_lowercase();
        let value_lower = self.value.to_lowercase();

        match self.op.to_ascii_lowercase().as_str() {
            "eq" => subject_lower == value_lower,
            "neq" => subject_lower != value_lower,
            "contains" => subject_lower.contains(&value_lower),
            "not_contains" => !subject_lower.contains(&value_lower),
            "regex" => compile_ci(&self.value).map_or(false, |re| re.is_match(subject)),
            "not_regex" => compile_ci(&self.value).map_or(false, |re| !re.is_match(subject)),
            "prefix" | "starts_with" => subject_lower.starts_with(&value_lower),
            "suffix" | "ends_with" => subject_lower.ends_with(&value_lower),
            _ => false,
        }
    }
}

/// Compile a case-insensitive regex; `None` on an invalid pattern.
pub fn compile_ci(pattern: &str) -> Option<regex::Regex> {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .ok()
}

// =============================================================================
// Tests
// =============================================================================
