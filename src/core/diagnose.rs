// ESX Doctor - core/diagnose.rs
//
// Streaming diagnostic engine.
//
// Two phases: compile the selected templates into row processors by matching
// each detector's interest against the parsed columns once, then run a single
// forward pass over the file feeding every processor each (timestamp, record)
// tuple. Findings are collected at finalize and sorted by severity, then
// title. A template that matches zero columns is silently dropped.
//
// Streak end-time asymmetry: a streak closed mid-scan records the breaking
// row's timestamp as its end; a streak still open at EOF closes against 0.
// This matches the behaviour perf engineers already rely on when correlating
// findings against the raw export.

use crate::core::column::{ParsedColumn, ReportKey};
use crate::core::csvline;
use crate::core::index::DataFile;
use crate::core::template::{
    compile_ci, Comparison, DetectorType, DiagnosticTemplate, Severity,
};
use crate::core::time;
use crate::util::constants::{
    AFFINITY_ENTITY_LIST_LIMIT, MAX_FINDINGS_PER_PROCESSOR, SCAN_BUFFER_SIZE,
};
use crate::util::error::EsxDoctorError;
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

// =============================================================================
// Findings
// =============================================================================

/// One emitted diagnostic finding.
///
/// `start`/`end` are Unix milliseconds; 0 means the boundary was not
/// observed (see the streak asymmetry note above).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticFinding {
    pub template_id: String,
    pub template_name: String,
    pub title: String,
    pub severity: Severity,
    pub report_key: ReportKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<Vec<String>>,
    pub start: i64,
    pub end: i64,
    pub summary: String,
}

// =============================================================================
// Row processors
// =============================================================================

/// Minimal capability a compiled detector exposes to the streaming pass.
pub trait RowProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &StringRecord);
    fn finalize(&mut self) -> Vec<DiagnosticFinding>;
}

/// A column a processor watches, with its display identity resolved once.
#[derive(Debug, Clone)]
struct WatchedColumn {
    idx: usize,
    instance: String,
    attribute: String,
}

impl WatchedColumn {
    fn from(col: &ParsedColumn) -> Self {
        Self {
            idx: col.idx,
            instance: col.instance.clone(),
            attribute: col.attribute_label.clone(),
        }
    }
}

/// Template identity stamped onto every finding a processor emits.
#[derive(Debug, Clone)]
struct FindingMeta {
    template_id: String,
    template_name: String,
    severity: Severity,
    report_key: ReportKey,
}

impl FindingMeta {
    fn from(template: &DiagnosticTemplate, report_key: ReportKey) -> Self {
        Self {
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            severity: template.severity,
            report_key,
        }
    }
}

fn parse_cell(record: &StringRecord, idx: usize) -> Option<f64> {
    record
        .get(idx)
        .and_then(|c| c.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// =============================================================================
// Per-type defaults and built-in column interest
// =============================================================================

/// Default threshold and comparison for the sustained detector family.
/// Used whenever a template leaves `threshold` unset (zero).
fn sustained_defaults(kind: DetectorType) -> Option<(f64, Comparison)> {
    use DetectorType::*;
    match kind {
        ThresholdSustained => Some((5.0, Comparison::Greater)),
        HighReady => Some((5.0, Comparison::Greater)),
        HighCostop => Some((3.0, Comparison::Greater)),
        StorageLatency => Some((20.0, Comparison::Greater)),
        LowNumaLocal => Some((85.0, Comparison::Less)),
        MemoryOvercommitHigh => Some((100.0, Comparison::Greater)),
        NetworkOutboundDropHigh => Some((1.0, Comparison::Greater)),
        DiskAdapterFailedReadsHigh => Some((5.0, Comparison::Greater)),
        DiskAdapterDriverLatencyHigh => Some((30.0, Comparison::Greater)),
        _ => None,
    }
}

/// Built-in attribute interest for sustained types, matched against the
/// lower-cased attribute label. The generic type has none: it selects
/// columns purely through its filter and include fields.
fn sustained_builtin_match(kind: DetectorType, attr: &str) -> bool {
    use DetectorType::*;
    match kind {
        HighReady => attr.contains("% ready"),
        HighCostop => attr.contains("% costop"),
        StorageLatency => attr.contains("millisec/command") || attr.contains("latency"),
        LowNumaLocal => attr.contains("% local"),
        MemoryOvercommitHigh => attr.contains("overcommit"),
        NetworkOutboundDropHigh => {
            attr.contains("dropped")
                && (attr.contains("tx") || attr.contains("outbound") || attr.contains("transmit"))
        }
        DiskAdapterFailedReadsHigh => attr.contains("failed read"),
        DiskAdapterDriverLatencyHigh => attr.contains("driver millisec"),
        _ => false,
    }
}

fn numa_load_match(attr: &str) -> bool {
    attr.contains("numa")
        && (attr.contains("load") || attr.contains("% used") || attr.contains("% processor time"))
}

fn numa_processor_time_match(attr: &str) -> bool {
    attr.contains("numa") && attr.contains("% processor time")
}

fn exclusive_affinity_match(attr: &str) -> bool {
    attr.contains("exclusive affinity")
}

/// Shared eligibility rule: a column is selected when it passes every
/// constraint (includes, excludes, active filter) and at least one positive
/// selector applies: the built-in interest, the filter, or an include.
fn eligible(template: &DiagnosticTemplate, col: &ParsedColumn, builtin: bool) -> bool {
    let det = &template.detector;

    if let Some(want) = &det.include_attribute_equals {
        if !col.attribute_label.eq_ignore_ascii_case(want) {
            return false;
        }
    }
    if let Some(want) = &det.include_object_equals {
        if !col.object.eq_ignore_ascii_case(want) {
            return false;
        }
    }
    if let Some(fragment) = &det.exclude_instance_contains {
        if col
            .instance
            .to_lowercase()
            .contains(&fragment.to_lowercase())
        {
            return false;
        }
    }
    if let Some(pattern) = &det.exclude_instance_regex {
        if let Some(re) = compile_ci(pattern) {
            if re.is_match(&col.instance) {
                return false;
            }
        }
    }
    if det.filter.is_active() && !det.filter.matches(col) {
        return false;
    }

    builtin
        || det.filter.is_active()
        || det.include_attribute_equals.is_some()
        || det.include_object_equals.is_some()
}

fn min_consecutive_of(template: &DiagnosticTemplate) -> u64 {
    let v = template.detector.min_consecutive;
    if v <= 0 {
        crate::util::constants::DEFAULT_MIN_CONSECUTIVE as u64
    } else {
        v as u64
    }
}

// =============================================================================
// Sustained-threshold processor
// =============================================================================

#[derive(Debug, Clone, Default)]
struct StreakState {
    cur_len: u64,
    cur_start: i64,
    cur_peak: f64,
    best_len: u64,
    best_start: i64,
    best_end: i64,
    best_peak: f64,
}

impl StreakState {
    /// Close the current streak against `end_ms` (0 at finalize), keeping it
    /// if it beats the best so far.
    fn reset(&mut self, end_ms: i64) {
        if self.cur_len > self.best_len {
            self.best_len = self.cur_len;
            self.best_start = self.cur_start;
            self.best_end = end_ms;
            self.best_peak = self.cur_peak;
        }
        self.cur_len = 0;
    }
}

/// Tracks one per-instance streak for every watched column of one template
/// within one report-key group.
struct SustainedProcessor {
    meta: FindingMeta,
    threshold: f64,
    comparison: Comparison,
    min_consecutive: u64,
    columns: Vec<WatchedColumn>,
    states: Vec<StreakState>,
}

impl SustainedProcessor {
    fn new(template: &DiagnosticTemplate, report_key: ReportKey, columns: Vec<WatchedColumn>) -> Self {
        let det = &template.detector;
        let (default_threshold, default_comparison) =
            sustained_defaults(det.kind).unwrap_or((0.0, Comparison::Greater));
        let (threshold, comparison) = if det.threshold != 0.0 {
            (det.threshold, det.comparison)
        } else {
            (default_threshold, default_comparison)
        };
        let states = vec![StreakState::default(); columns.len()];
        Self {
            meta: FindingMeta::from(template, report_key),
            threshold,
            comparison,
            min_consecutive: min_consecutive_of(template),
            columns,
            states,
        }
    }

}

impl RowProcessor for SustainedProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &StringRecord) {
        let ts_ms = ts.timestamp_millis();
        let threshold = self.threshold;
        let comparison = self.comparison;
        let passes = |value: f64| match comparison {
            Comparison::Greater => value > threshold,
            Comparison::Less => value < threshold,
        };
        for (col, state) in self.columns.iter().zip(self.states.iter_mut()) {
            match parse_cell(record, col.idx) {
                Some(value) if passes(value) => {
                    if state.cur_len == 0 {
                        state.cur_start = ts_ms;
                        state.cur_peak = value;
                    } else {
                        state.cur_peak = match self.comparison {
                            Comparison::Greater => state.cur_peak.max(value),
                            Comparison::Less => state.cur_peak.min(value),
                        };
                    }
                    state.cur_len += 1;
                }
                _ => state.reset(ts_ms),
            }
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        let mut findings = Vec::new();
        let direction = match self.comparison {
            Comparison::Greater => "above",
            Comparison::Less => "below",
        };
        for (col, state) in self.columns.iter().zip(self.states.iter_mut()) {
            state.reset(0);
            if state.best_len < self.min_consecutive {
                continue;
            }
            if findings.len() >= MAX_FINDINGS_PER_PROCESSOR {
                tracing::debug!(
                    template = %self.meta.template_id,
                    "Finding cap reached, remaining columns suppressed"
                );
                break;
            }
            findings.push(DiagnosticFinding {
                template_id: self.meta.template_id.clone(),
                template_name: self.meta.template_name.clone(),
                title: format!("{}: {}", self.meta.template_name, col.instance),
                severity: self.meta.severity,
                report_key: self.meta.report_key,
                attribute_label: Some(col.attribute.clone()),
                instances: Some(vec![col.instance.clone()]),
                start: state.best_start,
                end: state.best_end,
                summary: format!(
                    "{} consecutive samples {direction} {} (peak {})",
                    state.best_len, self.threshold, state.best_peak
                ),
            });
        }
        findings
    }
}

// =============================================================================
// Dominance-switch processor
// =============================================================================

/// Counts transitions of the argmax column across the matched set, only on
/// rows where the winner clears the runner-up by at least `min_gap`.
struct DominanceProcessor {
    meta: FindingMeta,
    min_gap: f64,
    min_switches: u32,
    columns: Vec<WatchedColumn>,
    prev_dominant: Option<usize>,
    switches: u32,
    observations: u64,
    first_switch: i64,
    last_switch: i64,
}

impl DominanceProcessor {
    fn new(template: &DiagnosticTemplate, report_key: ReportKey, columns: Vec<WatchedColumn>) -> Self {
        let det = &template.detector;
        Self {
            meta: FindingMeta::from(template, report_key),
            min_gap: if det.min_gap > 0.0 { det.min_gap } else { 3.0 },
            min_switches: if det.min_switches > 0 { det.min_switches } else { 4 },
            columns,
            prev_dominant: None,
            switches: 0,
            observations: 0,
            first_switch: 0,
            last_switch: 0,
        }
    }
}

impl RowProcessor for DominanceProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &StringRecord) {
        let mut best: Option<(usize, f64)> = None;
        let mut second: Option<f64> = None;
        for (i, col) in self.columns.iter().enumerate() {
            let Some(value) = parse_cell(record, col.idx) else {
                continue;
            };
            match best {
                Some((_, bv)) if value <= bv => {
                    second = Some(second.map_or(value, |s: f64| s.max(value)));
                }
                Some((_, bv)) => {
                    second = Some(second.map_or(bv, |s: f64| s.max(bv)));
                    best = Some((i, value));
                }
                None => best = Some((i, value)),
            }
        }

        let (Some((dominant, top)), Some(runner_up)) = (best, second) else {
            return;
        };
        if top - runner_up < self.min_gap {
            return;
        }

        self.observations += 1;
        if let Some(prev) = self.prev_dominant {
            if prev != dominant {
                self.switches += 1;
                let ts_ms = ts.timestamp_millis();
                if self.first_switch == 0 {
                    self.first_switch = ts_ms;
                }
                self.last_switch = ts_ms;
            }
        }
        self.prev_dominant = Some(dominant);
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        if self.switches < self.min_switches || self.observations < u64::from(self.min_switches) + 1
        {
            return Vec::new();
        }
        let instances: Vec<String> = self.columns.iter().map(|c| c.instance.clone()).collect();
        vec![DiagnosticFinding {
            template_id: self.meta.template_id.clone(),
            template_name: self.meta.template_name.clone(),
            title: self.meta.template_name.clone(),
            severity: self.meta.severity,
            report_key: self.meta.report_key,
            attribute_label: Some(self.columns[0].attribute.clone()),
            instances: Some(instances),
            start: self.first_switch,
            end: self.last_switch,
            summary: format!(
                "dominant entity switched {} times across {} qualifying samples",
                self.switches, self.observations
            ),
        }]
    }
}

// =============================================================================
// Range-imbalance processor
// =============================================================================

/// Tracks a single streak of rows where the hottest entity sits at or above
/// the high threshold while the coolest sits at or below the low one, with
/// at least `min_gap` between them.
struct ImbalanceProcessor {
    meta: FindingMeta,
    high_threshold: f64,
    low_threshold: f64,
    min_gap: f64,
    min_consecutive: u64,
    columns: Vec<WatchedColumn>,
    cur_len: u64,
    cur_start: i64,
    cur_high: String,
    cur_low: String,
    best_len: u64,
    best_start: i64,
    best_end: i64,
    best_high: String,
    best_low: String,
}

impl ImbalanceProcessor {
    fn new(template: &DiagnosticTemplate, report_key: ReportKey, columns: Vec<WatchedColumn>) -> Self {
        let det = &template.detector;
        Self {
            meta: FindingMeta::from(template, report_key),
            high_threshold: if det.high_threshold > 0.0 { det.high_threshold } else { 80.0 },
            low_threshold: if det.low_threshold > 0.0 { det.low_threshold } else { 20.0 },
            min_gap: if det.min_gap > 0.0 { det.min_gap } else { 40.0 },
            min_consecutive: min_consecutive_of(template),
            columns,
            cur_len: 0,
            cur_start: 0,
            cur_high: String::new(),
            cur_low: String::new(),
            best_len: 0,
            best_start: 0,
            best_end: 0,
            best_high: String::new(),
            best_low: String::new(),
        }
    }

    fn reset(&mut self, end_ms: i64) {
        if self.cur_len > self.best_len {
            self.best_len = self.cur_len;
            self.best_start = self.cur_start;
            self.best_end = end_ms;
            self.best_high = self.cur_high.clone();
            self.best_low = self.cur_low.clone();
        }
        self.cur_len = 0;
    }
}

impl RowProcessor for ImbalanceProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &StringRecord) {
        let ts_ms = ts.timestamp_millis();
        let mut hi: Option<(usize, f64)> = None;
        let mut lo: Option<(usize, f64)> = None;
        let mut finite = 0usize;
        for (i, col) in self.columns.iter().enumerate() {
            let Some(value) = parse_cell(record, col.idx) else {
                continue;
            };
            finite += 1;
            if hi.map_or(true, |(_, v)| value > v) {
                hi = Some((i, value));
            }
            if lo.map_or(true, |(_, v)| value < v) {
                lo = Some((i, value));
            }
        }

        let qualifies = match (hi, lo) {
            (Some((_, max)), Some((_, min))) if finite >= 2 => {
                max >= self.high_threshold
                    && min <= self.low_threshold
                    && max - min >= self.min_gap
            }
            _ => false,
        };

        if qualifies {
            let (hi_idx, _) = hi.unwrap_or((0, 0.0));
            let (lo_idx, _) = lo.unwrap_or((0, 0.0));
            if self.cur_len == 0 {
                self.cur_start = ts_ms;
                self.cur_high = self.columns[hi_idx].instance.clone();
                self.cur_low = self.columns[lo_idx].instance.clone();
            }
            self.cur_len += 1;
        } else {
            self.reset(ts_ms);
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        self.reset(0);
        if self.best_len < self.min_consecutive {
            return Vec::new();
        }
        vec![DiagnosticFinding {
            template_id: self.meta.template_id.clone(),
            template_name: self.meta.template_name.clone(),
            title: self.meta.template_name.clone(),
            severity: self.meta.severity,
            report_key: self.meta.report_key,
            attribute_label: Some(self.columns[0].attribute.clone()),
            instances: Some(vec![self.best_high.clone(), self.best_low.clone()]),
            start: self.best_start,
            end: self.best_end,
            summary: format!(
                "{} held at or above {} while {} stayed at or below {} for {} consecutive samples",
                self.best_high, self.high_threshold, self.best_low, self.low_threshold,
                self.best_len
            ),
        }]
    }
}

// =============================================================================
// Exclusive-affinity processor
// =============================================================================

#[derive(Debug, Clone, Default)]
struct AffinityState {
    hits: u64,
    first_seen: i64,
    last_seen: i64,
}

/// Flags columns whose boolean-like cells are ever truthy.
struct AffinityProcessor {
    meta: FindingMeta,
    columns: Vec<WatchedColumn>,
    states: Vec<AffinityState>,
}

impl AffinityProcessor {
    fn new(template: &DiagnosticTemplate, report_key: ReportKey, columns: Vec<WatchedColumn>) -> Self {
        let states = vec![AffinityState::default(); columns.len()];
        Self {
            meta: FindingMeta::from(template, report_key),
            columns,
            states,
        }
    }
}

fn truthy(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

impl RowProcessor for AffinityProcessor {
    fn on_row(&mut self, ts: DateTime<Utc>, record: &StringRecord) {
        let ts_ms = ts.timestamp_millis();
        for (col, state) in self.columns.iter().zip(self.states.iter_mut()) {
            let Some(cell) = record.get(col.idx) else {
                continue;
            };
            if truthy(cell) {
                if state.hits == 0 {
                    state.first_seen = ts_ms;
                }
                state.hits += 1;
                state.last_seen = ts_ms;
            }
        }
    }

    fn finalize(&mut self) -> Vec<DiagnosticFinding> {
        let mut entities: Vec<String> = Vec::new();
        let mut start = 0i64;
        let mut end = 0i64;
        for (col, state) in self.columns.iter().zip(self.states.iter()) {
            if state.hits == 0 {
                continue;
            }
            entities.push(col.instance.clone());
            if start == 0 || state.first_seen < start {
                start = state.first_seen;
            }
            end = end.max(state.last_seen);
        }
        if entities.is_empty() {
            return Vec::new();
        }

        let listed = if entities.len() > AFFINITY_ENTITY_LIST_LIMIT {
            format!(
                "{} and {} more",
                entities[..AFFINITY_ENTITY_LIST_LIMIT].join(", "),
                entities.len() - AFFINITY_ENTITY_LIST_LIMIT
            )
        } else {
            entities.join(", ")
        };

        vec![DiagnosticFinding {
            template_id: self.meta.template_id.clone(),
            template_name: self.meta.template_name.clone(),
            title: self.meta.template_name.clone(),
            severity: self.meta.severity,
            report_key: self.meta.report_key,
            attribute_label: Some(self.columns[0].attribute.clone()),
            instances: Some(entities.clone()),
            start,
            end,
            summary: format!(
                "exclusive affinity active on {} entities: {listed}",
                entities.len()
            ),
        }]
    }
}

// =============================================================================
// Compilation
// =============================================================================

/// Compile `templates` against the file's parsed columns.
pub fn compile(
    templates: &[DiagnosticTemplate],
    columns: &[ParsedColumn],
) -> Vec<Box<dyn RowProcessor>> {
    let mut processors: Vec<Box<dyn RowProcessor>> = Vec::new();

    for template in templates {
        let kind = template.detector.kind;
        match kind {
            k if sustained_defaults(k).is_some() => {
                // One processor per report-key group so findings route to the
                // right pane; each keeps per-instance state.
                let mut groups: BTreeMap<&'static str, (ReportKey, Vec<WatchedColumn>)> =
                    BTreeMap::new();
                for col in columns {
                    let builtin = sustained_builtin_match(k, &col.attribute_label.to_lowercase());
                    if eligible(template, col, builtin) {
                        let key = ReportKey::classify(col);
                        groups
                            .entry(key.as_str())
                            .or_insert_with(|| (key, Vec::new()))
                            .1
                            .push(WatchedColumn::from(col));
                    }
                }
                if groups.is_empty() {
                    tracing::debug!(template = %template.id, "No eligible columns, template dropped");
                }
                for (_, (key, cols)) in groups {
                    processors.push(Box::new(SustainedProcessor::new(template, key, cols)));
                }
            }
            DetectorType::NumaZigzag | DetectorType::ZigzagSwitch => {
                let cols: Vec<&ParsedColumn> = columns
                    .iter()
                    .filter(|c| {
                        eligible(template, c, numa_load_match(&c.attribute_label.to_lowercase()))
                    })
                    .collect();
                if cols.len() >= 2 {
                    let key = ReportKey::classify(cols[0]);
                    let watched = cols.iter().map(|c| WatchedColumn::from(c)).collect();
                    processors.push(Box::new(DominanceProcessor::new(template, key, watched)));
                } else {
                    tracing::debug!(template = %template.id, "Fewer than two eligible columns, template dropped");
                }
            }
            DetectorType::NumaImbalance | DetectorType::DominanceImbalance => {
                let cols: Vec<&ParsedColumn> = columns
                    .iter()
                    .filter(|c| {
                        eligible(
                            template,
                            c,
                            numa_processor_time_match(&c.attribute_label.to_lowercase()),
                        )
                    })
                    .collect();
                if cols.len() >= 2 {
                    let key = ReportKey::classify(cols[0]);
                    let watched = cols.iter().map(|c| WatchedColumn::from(c)).collect();
                    processors.push(Box::new(ImbalanceProcessor::new(template, key, watched)));
                } else {
                    tracing::debug!(template = %template.id, "Fewer than two eligible columns, template dropped");
                }
            }
            DetectorType::ExclusiveAffinity => {
                let cols: Vec<WatchedColumn> = columns
                    .iter()
                    .filter(|c| {
                        eligible(
                            template,
                            c,
                            exclusive_affinity_match(&c.attribute_label.to_lowercase()),
                        )
                    })
                    .map(WatchedColumn::from)
                    .collect();
                if cols.is_empty() {
                    tracing::debug!(template = %template.id, "No eligible columns, template dropped");
                } else {
                    let key = ReportKey::classify(
                        columns
                            .iter()
                            .find(|c| c.idx == cols[0].idx)
                            .unwrap_or(&columns[0]),
                    );
                    processors.push(Box::new(AffinityProcessor::new(template, key, cols)));
                }
            }
            _ => {}
        }
    }

    processors
}

// =============================================================================
// Streaming pass
// =============================================================================

/// Run the selected templates over `file` in a single forward pass.
///
/// Rows that fail to decode or time-parse are skipped without stopping the
/// scan. Findings come back sorted by severity (most severe first), then
/// title.
pub fn run(
    file: &DataFile,
    templates: &[DiagnosticTemplate],
) -> Result<Vec<DiagnosticFinding>, EsxDoctorError> {
    let parsed: Vec<ParsedColumn> = file
        .columns
        .iter()
        .enumerate()
        .skip(1)
        .map(|(idx, raw)| ParsedColumn::parse(idx, raw))
        .collect();

    let mut processors = compile(templates, &parsed);
    tracing::info!(
        file = %file.path.display(),
        templates = templates.len(),
        processors = processors.len(),
        "Diagnostics starting"
    );
    if processors.is_empty() {
        return Ok(Vec::new());
    }

    let mut handle = File::open(&file.path).map_err(|e| EsxDoctorError::Io {
        path: file.path.clone(),
        operation: "diagnostics",
        source: e,
    })?;
    handle
        .seek(SeekFrom::Start(file.data_start_offset))
        .map_err(|e| EsxDoctorError::Io {
            path: file.path.clone(),
            operation: "diagnostics",
            source: e,
        })?;
    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, handle);

    let mut raw = Vec::new();
    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).map_err(|e| EsxDoctorError::Io {
            path: file.path.clone(),
            operation: "diagnostics",
            source: e,
        })?;
        if n == 0 {
            break;
        }

        let record = match csvline::decode_line(csvline::trim_line(&raw)) {
            Ok(Some(record)) => record,
            _ => continue,
        };
        let Some(ts) = record.get(0).and_then(|c| time::parse_row_time(c, file.time_layout))
        else {
            continue;
        };

        for processor in &mut processors {
            processor.on_row(ts, &record);
        }
    }

    let mut findings: Vec<DiagnosticFinding> = processors
        .iter_mut()
        .flat_map(|p| p.finalize())
        .collect();
    findings.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.title.cmp(&b.title)));

    tracing::info!(findings = findings.len(), "Diagnostics complete");
    Ok(findings)
}

// =============================================================================
// Tests
// =============================================================================
