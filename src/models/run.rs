use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    System,
    Init,
    TocFetch,
    PdfGen,
    Ocr,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::System => "system",
            Stage::Init => "init",
            Stage::TocFetch => "toc_fetch",
            Stage::PdfGen => "pdf_gen",
            Stage::Ocr => "ocr",
            Stage::Complete => "complete",
            Stage::Error => "error",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Info,
    Warning,
    Error,
    Success,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Info => "info",
            LogStatus::Warning => "warning",
            LogStatus::Error => "error",
            LogStatus::Success => "success",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured progress event. Immutable once created; the run's
/// log map and the replay buffer only ever append.
///
/// An empty `profile` marks a system-level event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub profile: String,
    pub stage: Stage,
    pub message: String,
    pub status: LogStatus,
}

impl LogEntry {
    pub fn new<P, M>(profile: P, stage: Stage, message: M, status: LogStatus) -> Self
    where
        P: Into<String>,
        M: Into<String>,
    {
        Self {
            timestamp: Utc::now(),
            profile: profile.into(),
            stage,
            message: message.into(),
            status,
        }
    }

    /// True for events not tied to any profile.
    pub fn is_system(&self) -> bool {
        self.profile.is_empty()
    }
}

/// Metadata captured across a single run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub pdf_created: bool,
}

/// Overall status of a completed run, derived from its logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Error => f.write_str("error"),
        }
    }
}

/// Durable record of one orchestrator run. Written exactly once at run end,
/// immutable thereafter.
///
/// `logs` maps profile name to its chronological event sequence; insertion
/// order is iteration order, which is why this is an [`IndexMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub logs: IndexMap<String, Vec<LogEntry>>,
    #[serde(default)]
    pub metadata: RunMetadata,
}

impl RunRecord {
    pub fn new(id: String, logs: IndexMap<String, Vec<LogEntry>>, metadata: RunMetadata) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            logs,
            metadata,
        }
    }

    /// A run is an error if any profile's final event has error status,
    /// otherwise success.
    pub fn overall_status(&self) -> RunStatus {
        for entries in self.logs.values() {
            if let Some(last) = entries.last() {
                if last.status == LogStatus::Error {
                    return RunStatus::Error;
                }
            }
        }
        RunStatus::Success
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            profiles: self.logs.keys().cloned().collect(),
            status: self.overall_status(),
            pdf_created: self.metadata.pdf_created,
        }
    }
}

/// Listing row for run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub profiles: Vec<String>,
    pub status: RunStatus,
    pub pdf_created: bool,
}

/// Per-profile terminal result of one pipeline pass.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// All artifacts for the current cycle already existed.
    Skipped(String),
    Succeeded,
    Failed { stage: Stage, cause: String },
}

impl PipelineOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PipelineOutcome::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(profile: &str, stage: Stage, status: LogStatus) -> LogEntry {
        LogEntry::new(profile, stage, "msg", status)
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::TocFetch).unwrap(), "\"toc_fetch\"");
        assert_eq!(serde_json::to_string(&Stage::PdfGen).unwrap(), "\"pdf_gen\"");
        assert_eq!(serde_json::to_string(&LogStatus::Warning).unwrap(), "\"warning\"");
    }

    #[test]
    fn test_log_entry_system() {
        assert!(entry("", Stage::System, LogStatus::Info).is_system());
        assert!(!entry("alpha", Stage::Init, LogStatus::Info).is_system());
    }

    #[test]
    fn test_overall_status_success() {
        let mut logs = IndexMap::new();
        logs.insert(
            "alpha".to_string(),
            vec![
                entry("alpha", Stage::Init, LogStatus::Info),
                entry("alpha", Stage::Complete, LogStatus::Success),
            ],
        );
        let record = RunRecord::new("20240104_120000".to_string(), logs, RunMetadata::default());
        assert_eq!(record.overall_status(), RunStatus::Success);
    }

    #[test]
    fn test_overall_status_error_on_any_failed_profile() {
        let mut logs = IndexMap::new();
        logs.insert(
            "A".to_string(),
            vec![entry("A", Stage::Complete, LogStatus::Success)],
        );
        logs.insert(
            "B".to_string(),
            vec![
                entry("B", Stage::Init, LogStatus::Info),
                entry("B", Stage::TocFetch, LogStatus::Error),
            ],
        );
        let record = RunRecord::new("20240104_120001".to_string(), logs, RunMetadata::default());
        assert_eq!(record.overall_status(), RunStatus::Error);
    }

    #[test]
    fn test_non_terminal_error_does_not_fail_run() {
        // Only the final entry per profile counts.
        let mut logs = IndexMap::new();
        logs.insert(
            "A".to_string(),
            vec![
                entry("A", Stage::Ocr, LogStatus::Error),
                entry("A", Stage::Complete, LogStatus::Success),
            ],
        );
        let record = RunRecord::new("20240104_120002".to_string(), logs, RunMetadata::default());
        assert_eq!(record.overall_status(), RunStatus::Success);
    }

    #[test]
    fn test_record_json_shape() {
        let mut logs = IndexMap::new();
        logs.insert(
            "alpha".to_string(),
            vec![entry("alpha", Stage::Complete, LogStatus::Success)],
        );
        let record = RunRecord::new(
            "20240104_120003".to_string(),
            logs,
            RunMetadata { pdf_created: true },
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "20240104_120003");
        assert_eq!(json["metadata"]["pdf_created"], true);
        assert_eq!(json["logs"]["alpha"][0]["stage"], "complete");
        assert_eq!(json["logs"]["alpha"][0]["status"], "success");

        let roundtrip: RunRecord = serde_json::from_value(json).unwrap();
        assert_eq!(roundtrip.id, record.id);
        assert_eq!(roundtrip.logs.len(), 1);
    }

    #[test]
    fn test_summary() {
        let mut logs = IndexMap::new();
        logs.insert("beta".to_string(), vec![entry("beta", Stage::Ocr, LogStatus::Success)]);
        let record = RunRecord::new("20240104_120004".to_string(), logs, RunMetadata::default());

        let summary = record.summary();
        assert_eq!(summary.profiles, vec!["beta".to_string()]);
        assert_eq!(summary.status, RunStatus::Success);
        assert!(!summary.pdf_created);
    }
}
