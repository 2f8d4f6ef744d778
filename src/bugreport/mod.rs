//! Bug Report Manager (C9): a write-only-from-checkers, read-only-for-
//! serialization store of bug reports, plus the exact JSON schema from
//! spec §6.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::io::Write;

/// Opaque, stable identifier for a registered bug type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BugTypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Importance {
    Low,
    Medium,
    High,
    #[serde(rename = "N/A")]
    NotApplicable,
}

/// Serializes as a bare string (spec §6: `"Security"|"Performance"|"Error"|
/// "Warning"|...`), so `Other` carries whatever string a checker supplies
/// without wrapping it in a tagged object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Security,
    Performance,
    Error,
    Warning,
    Other(String),
}

impl Serialize for Classification {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            Classification::Security => "Security",
            Classification::Performance => "Performance",
            Classification::Error => "Error",
            Classification::Warning => "Warning",
            Classification::Other(s) => s.as_str(),
        };
        serializer.serialize_str(s)
    }
}

/// One step in a witness path (spec §6 `DiagSteps` entry).
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagStep {
    pub file: String,
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llvm_ir: Option<String>,
    pub tip: String,
}

impl DiagStep {
    pub fn new(file: impl Into<String>, line: u32, tip: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            tip: tip.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BugReport {
    pub dominated: bool,
    pub valid: bool,
    pub score: i32,
    pub diag_steps: Vec<DiagStep>,
}

struct BugTypeEntry {
    name: String,
    description: String,
    importance: Importance,
    classification: Classification,
    reports: Vec<BugReport>,
}

/// Registered bug types and their accumulated reports for one analysis
/// session (spec §4.9, §5: "owned by a single analysis-run session").
#[derive(Default)]
pub struct BugReportManager {
    types: IndexMap<BugTypeId, BugTypeEntry>,
    by_name: IndexMap<String, BugTypeId>,
    next_id: u32,
    src_files: IndexSet<String>,
}

impl BugReportManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: registering the same name twice returns the same ID
    /// (spec §8 round-trip property).
    pub fn register_bug_type(&mut self, name: &str, description: &str, importance: Importance, classification: Classification) -> BugTypeId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = BugTypeId(self.next_id);
        self.next_id += 1;
        self.by_name.insert(name.to_string(), id);
        self.types.insert(
            id,
            BugTypeEntry {
                name: name.to_string(),
                description: description.to_string(),
                importance,
                classification,
                reports: Vec::new(),
            },
        );
        id
    }

    pub fn insert_report(&mut self, type_id: BugTypeId, report: BugReport) {
        for step in &report.diag_steps {
            self.src_files.insert(step.file.clone());
        }
        if let Some(entry) = self.types.get_mut(&type_id) {
            entry.reports.push(report);
        }
    }

    pub fn total_reports(&self) -> usize {
        self.types.values().map(|t| t.reports.len()).sum()
    }

    /// Writes the exact JSON schema from spec §6, keeping only reports whose
    /// score meets `min_score`.
    pub fn generate_json_report<W: Write>(&self, writer: W, min_score: i32) -> serde_json::Result<()> {
        let bug_types: Vec<JsonBugType> = self
            .types
            .values()
            .map(|entry| {
                let reports: Vec<JsonReport> = entry
                    .reports
                    .iter()
                    .filter(|r| r.score >= min_score)
                    .map(JsonReport::from)
                    .collect();
                JsonBugType {
                    name: entry.name.clone(),
                    description: entry.description.clone(),
                    importance: entry.importance,
                    classification: entry.classification.clone(),
                    total_reports: reports.len(),
                    reports,
                }
            })
            .collect();

        let total_bugs: usize = bug_types.iter().map(|t| t.total_reports).sum();
        let doc = JsonDocument {
            total_bugs,
            src_files: self.src_files.iter().cloned().collect(),
            bug_types,
        };
        serde_json::to_writer_pretty(writer, &doc)
    }

    /// Human-readable per-type counts (spec §4.9 `print_summary`).
    pub fn print_summary<W: std::fmt::Write>(&self, mut writer: W) -> std::fmt::Result {
        for entry in self.types.values() {
            writeln!(writer, "{}: {} report(s)", entry.name, entry.reports.len())?;
        }
        Ok(())
    }

    /// Whether any report of `min_score` or higher exists across all types
    /// (spec §6 CLI exit code: "0 if zero reports pass the min-score filter").
    pub fn has_passing_report(&self, min_score: i32) -> bool {
        self.types.values().any(|t| t.reports.iter().any(|r| r.score >= min_score))
    }
}

#[derive(Serialize)]
struct JsonDocument {
    #[serde(rename = "TotalBugs")]
    total_bugs: usize,
    #[serde(rename = "SrcFiles")]
    src_files: Vec<String>,
    #[serde(rename = "BugTypes")]
    bug_types: Vec<JsonBugType>,
}

#[derive(Serialize)]
struct JsonBugType {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Description")]
    description: String,
    #[serde(rename = "Importance")]
    importance: Importance,
    #[serde(rename = "Classification")]
    classification: Classification,
    #[serde(rename = "TotalReports")]
    total_reports: usize,
    #[serde(rename = "Reports")]
    reports: Vec<JsonReport>,
}

#[derive(Serialize)]
struct JsonReport {
    #[serde(rename = "Dominated")]
    dominated: bool,
    #[serde(rename = "Valid")]
    valid: bool,
    #[serde(rename = "Score")]
    score: i32,
    #[serde(rename = "DiagSteps")]
    diag_steps: Vec<DiagStep>,
}

impl From<&BugReport> for JsonReport {
    fn from(r: &BugReport) -> Self {
        JsonReport {
            dominated: r.dominated,
            valid: r.valid,
            score: r.score,
            diag_steps: r.diag_steps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bug_type_is_idempotent() {
        let mut mgr = BugReportManager::new();
        let a = mgr.register_bug_type("NULL Pointer Dereference", "desc", Importance::High, Classification::Security);
        let b = mgr.register_bug_type("NULL Pointer Dereference", "desc", Importance::High, Classification::Security);
        assert_eq!(a, b);
        assert_eq!(mgr.types.len(), 1);
    }

    #[test]
    fn json_schema_round_trips_and_filters_by_score() {
        let mut mgr = BugReportManager::new();
        let id = mgr.register_bug_type("NULL Pointer Dereference", "deref of a possibly-null pointer", Importance::High, Classification::Security);
        mgr.insert_report(
            id,
            BugReport {
                dominated: false,
                valid: true,
                score: 70,
                diag_steps: vec![
                    DiagStep::new("a.c", 3, "Null value originates here"),
                    DiagStep::new("a.c", 4, "Load from potentially null pointer"),
                ],
            },
        );
        mgr.insert_report(
            id,
            BugReport {
                dominated: false,
                valid: true,
                score: 40,
                diag_steps: vec![DiagStep::new("a.c", 9, "low confidence")],
            },
        );

        let mut buf = Vec::new();
        mgr.generate_json_report(&mut buf, 50).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["TotalBugs"], 1);
        assert_eq!(value["BugTypes"][0]["TotalReports"], 1);
        assert_eq!(value["BugTypes"][0]["Reports"][0]["Score"], 70);
        assert_eq!(value["SrcFiles"][0], "a.c");
    }

    #[test]
    fn has_passing_report_respects_min_score() {
        let mut mgr = BugReportManager::new();
        let id = mgr.register_bug_type("Use After Free", "d", Importance::High, Classification::Security);
        mgr.insert_report(
            id,
            BugReport {
                dominated: false,
                valid: true,
                score: 70,
                diag_steps: vec![],
            },
        );
        assert!(mgr.has_passing_report(70));
        assert!(!mgr.has_passing_report(71));
    }
}
