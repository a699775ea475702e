use crate::models::{RunRecord, RunSummary};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use std::fs;
use thiserror::Error;

/// Errors from run-history persistence.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Run not found: {0}")]
    NotFound(String),

    #[error("Invalid run id: {0}")]
    InvalidId(String),

    #[error("Run storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse run record: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persists one JSON file per completed run and reads them back.
///
/// Run ids derive from the local wall clock (`YYYYMMDD_HHMMSS`), so
/// lexicographic order is chronological order.
#[derive(Debug, Clone)]
pub struct RunRecorder {
    runs_dir: Utf8PathBuf,
}

impl RunRecorder {
    pub fn new<P: AsRef<Utf8Path>>(runs_dir: P) -> Result<Self, RecorderError> {
        let runs_dir = runs_dir.as_ref().to_path_buf();
        fs::create_dir_all(runs_dir.as_std_path())?;
        Ok(Self { runs_dir })
    }

    /// Allocate the next run id. Appends a numeric suffix when a run from the
    /// same second already exists, keeping ids unique and still sortable.
    pub fn next_run_id(&self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
        if !self.record_path(&base).exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.record_path(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Write the record. Called exactly once per run; the record is immutable
    /// afterwards.
    pub fn save(&self, record: &RunRecord) -> Result<Utf8PathBuf, RecorderError> {
        validate_id(&record.id)?;
        let path = self.record_path(&record.id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(path.as_std_path(), json)?;
        tracing::info!("Saved run {}", record.id);
        Ok(path)
    }

    /// All stored runs, most recent first. Unreadable records are skipped
    /// with a logged error rather than failing the listing.
    pub fn list(&self) -> Result<Vec<RunSummary>, RecorderError> {
        let mut ids: Vec<String> = Vec::new();
        for dir_entry in fs::read_dir(self.runs_dir.as_std_path())? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = file_name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_record(&id) {
                Ok(mut record) => {
                    // The filename is authoritative for the id.
                    record.id = id;
                    summaries.push(record.summary());
                }
                Err(e) => {
                    tracing::error!("Failed to read run {}: {}", id, e);
                }
            }
        }
        Ok(summaries)
    }

    /// Load one run record by id.
    pub fn get(&self, id: &str) -> Result<RunRecord, RecorderError> {
        validate_id(id)?;
        if !self.record_path(id).exists() {
            return Err(RecorderError::NotFound(id.to_string()));
        }
        self.read_record(id)
    }

    fn read_record(&self, id: &str) -> Result<RunRecord, RecorderError> {
        let contents = fs::read_to_string(self.record_path(id).as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn record_path(&self, id: &str) -> Utf8PathBuf {
        self.runs_dir.join(format!("{id}.json"))
    }
}

/// Run ids become filenames; restrict the charset so a crafted id cannot
/// escape the runs directory.
fn validate_id(id: &str) -> Result<(), RecorderError> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(RecorderError::InvalidId(id.to_string()))
    }
}
