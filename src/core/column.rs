// ESX Doctor - core/column.rs
//
// PDH counter-path parsing and column classification.
//
// Counter columns in an export are headed by paths of the form
// `\\<host>\<object>(<instance>)\<counter>` (Windows Performance Data Helper
// convention, also produced by esxtop batch mode). Headers that do not match
// the form fall back to a safe catch-all so every column stays addressable.

use serde::Serialize;

/// Projection of a raw column header into its PDH parts.
///
/// Derived on demand from `DataFile::columns`; never stored in the
/// descriptor itself.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedColumn {
    /// Position of the column in the file (0 is the time column).
    pub idx: usize,

    /// The raw header text, unchanged.
    pub raw: String,

    /// PDH object, e.g. "Vcpu" or "Physical Disk". "Other" on fallback.
    pub object: String,

    /// Parenthesised instance, or "Global" when absent.
    pub instance: String,

    /// Counter name; remaining path segments joined by `\`.
    pub counter: String,

    /// Display form `"<object>: <counter>"`, collapsing instances of the
    /// same metric.
    pub attribute_label: String,

    /// Unit inferred from the counter name, empty when unknown.
    pub unit: &'static str,
}

impl ParsedColumn {
    /// Parse a raw header at column `idx`.
    pub fn parse(idx: usize, raw: &str) -> Self {
        if let Some(parsed) = parse_pdh_path(idx, raw) {
            return parsed;
        }

        // Fallback: anything that is not a counter path (including the time
        // column itself) is still addressable under a catch-all object.
        let counter = raw.to_string();
        Self {
            idx,
            raw: raw.to_string(),
            attribute_label: format!("Other: {counter}"),
            object: "Other".to_string(),
            instance: "Global".to_string(),
            unit: infer_unit(&counter),
            counter,
        }
    }
}

/// Parse a strict `\\host\object(instance)\counter` path.
///
/// Requires the leading `\\` and at least five backslash-delimited segments
/// (two empty ones from the prefix, host, object, counter).
fn parse_pdh_path(idx: usize, raw: &str) -> Option<ParsedColumn> {
    if !raw.starts_with("\\\\") {
        return None;
    }
    let segments: Vec<&str> = raw.split('\\').collect();
    if segments.len() < 5 {
        return None;
    }

    let object_part = segments[3];
    let (object, instance) = match object_part.find('(') {
        Some(open) => {
            let close = object_part.rfind(')').unwrap_or(object_part.len());
            let inst = &object_part[open + 1..close];
            (object_part[..open].to_string(), inst.to_string())
        }
        None => (object_part.to_string(), "Global".to_string()),
    };

    let counter = segments[4..].join("\\");
    let attribute_label = format!("{object}: {counter}");
    let unit = infer_unit(&counter);

    Some(ParsedColumn {
        idx,
        raw: raw.to_string(),
        object,
        instance,
        counter,
        attribute_label,
        unit,
    })
}

/// Infer a display unit from counter name patterns.
///
/// The "millisec" check runs before "/sec" so "MilliSec/Command" counters
/// classify as milliseconds rather than rates.
fn infer_unit(counter: &str) -> &'static str {
    let lower = counter.to_lowercase();
    if lower.contains('%') {
        "%"
    } else if lower.contains("mbytes") {
        "MBytes"
    } else if lower.contains("kbytes") {
        "KBytes"
    } else if lower.contains("watts") {
        "Watts"
    } else if lower.contains("mhz") {
        "MHz"
    } else if lower.contains("millisec") {
        "ms"
    } else if lower.contains("/sec") {
        "/sec"
    } else {
        ""
    }
}

// =============================================================================
// Report keys
// =============================================================================

/// Coarse grouping tag for findings so the viewer can route the user to the
/// relevant pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKey {
    Cpu,
    Memory,
    Numa,
    Network,
    Storage,
    Power,
    Vsan,
    Other,
}

impl ReportKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::Numa => "numa",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Power => "power",
            Self::Vsan => "vsan",
            Self::Other => "other",
        }
    }

    /// Classify a parsed column from its object and counter text.
    ///
    /// Precedence runs most-specific-first: a "VSAN Disk" object is vsan, not
    /// storage; a "Numa Node % Processor Time" column is numa, not cpu.
    pub fn classify(column: &ParsedColumn) -> Self {
        let text = format!("{} {}", column.object, column.counter).to_lowercase();
        if text.contains("vsan") {
            Self::Vsan
        } else if text.contains("numa") {
            Self::Numa
        } else if text.contains("power") || text.contains("watts") {
            Self::Power
        } else if text.contains("network") || text.contains("vmnic") || text.contains("port") {
            Self::Network
        } else if text.contains("disk")
            || text.contains("datastore")
            || text.contains("scsi")
            || text.contains("storage")
        {
            Self::Storage
        } else if text.contains("memory") || text.contains("mem ") {
            Self::Memory
        } else if text.contains("cpu") || text.contains("processor") {
            Self::Cpu
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for ReportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_pdh_path() {
        let col = ParsedColumn::parse(3, "\\\\esx01\\Vcpu(12:app-vm)\\% Ready");
        assert_eq!(col.idx, 3);
        assert_eq!(col.object, "Vcpu");
        assert_eq!(col.instance, "12:app-vm");
        assert_eq!(col.counter, "% Ready");
        assert_eq!(col.attribute_label, "Vcpu: % Ready");
        assert_eq!(col.unit, "%");
    }

    #[test]
    fn test_parse_without_instance_is_global() {
        let col = ParsedColumn::parse(1, "\\\\esx01\\Memory\\Overcommit Average");
        assert_eq!(col.object, "Memory");
        assert_eq!(col.instance, "Global");
        assert_eq!(col.counter, "Overcommit Average");
    }

    /// Counters containing backslashes keep every remaining segment.
    #[test]
    fn test_parse_multi_segment_counter() {
        let col = ParsedColumn::parse(1, "\\\\h\\Group Cpu(123:vm)\\Sub\\% Used");
        assert_eq!(col.counter, "Sub\\% Used");
        assert_eq!(col.attribute_label, "Group Cpu: Sub\\% Used");
    }

    #[test]
    fn test_parse_non_pdh_falls_back() {
        let col = ParsedColumn::parse(0, "Time");
        assert_eq!(col.object, "Other");
        assert_eq!(col.instance, "Global");
        assert_eq!(col.counter, "Time");
        assert_eq!(col.attribute_label, "Other: Time");
    }

    #[test]
    fn test_parse_short_path_falls_back() {
        let col = ParsedColumn::parse(2, "\\\\host\\Lonely");
        assert_eq!(col.object, "Other");
        assert_eq!(col.counter, "\\\\host\\Lonely");
    }

    #[test]
    fn test_unit_inference() {
        let unit = |c: &str| ParsedColumn::parse(0, c).unit;
        assert_eq!(unit("\\\\h\\Vcpu(0:a)\\% Used"), "%");
        assert_eq!(unit("\\\\h\\Memory(0:a)\\MBytes Granted"), "MBytes");
        assert_eq!(unit("\\\\h\\Memory(0:a)\\KBytes Swapped"), "KBytes");
        assert_eq!(unit("\\\\h\\Power(0)\\Watts Usage"), "Watts");
        assert_eq!(unit("\\\\h\\Group Cpu(0)\\MHz Used"), "MHz");
        assert_eq!(unit("\\\\h\\Network Port(n)\\Packets Transmitted/sec"), "/sec");
        assert_eq!(
            unit("\\\\h\\Physical Disk(vmhba0)\\Average Driver MilliSec/Command"),
            "ms"
        );
        assert_eq!(unit("\\\\h\\Vcpu(0:a)\\Plain Counter"), "");
    }

    #[test]
    fn test_report_key_precedence() {
        let key = |raw: &str| ReportKey::classify(&ParsedColumn::parse(0, raw));
        assert_eq!(key("\\\\h\\Numa Node(0)\\% Processor Time"), ReportKey::Numa);
        assert_eq!(key("\\\\h\\Vcpu(0:a)\\% Ready"), ReportKey::Cpu);
        assert_eq!(key("\\\\h\\Memory\\Overcommit Average"), ReportKey::Memory);
        assert_eq!(
            key("\\\\h\\Network Port(vmnic0)\\Outbound Packets Dropped"),
            ReportKey::Network
        );
        assert_eq!(
            key("\\\\h\\Physical Disk(vmhba0)\\Average Driver MilliSec/Command"),
            ReportKey::Storage
        );
        assert_eq!(key("\\\\h\\Power(0)\\Watts Usage"), ReportKey::Power);
        assert_eq!(key("\\\\h\\VSAN Disk(x)\\Reads/sec"), ReportKey::Vsan);
        assert_eq!(key("Header Text"), ReportKey::Other);
    }
}
