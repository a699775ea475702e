use crate::config::{ProfileStore, Settings};
use crate::models::{LogStatus, PipelineOutcome, RunRecord, Stage};
use crate::services::disk::DiskSpaceGuard;
use crate::services::lock::{LockError, RunLock};
use crate::services::pipeline::{truncate, PipelineConfig, ProfilePipeline};
use crate::services::process::ProcessRunner;
use crate::services::progress::{ProgressSink, ProgressSubscription, RUN_FINISHED_MESSAGE};
use crate::services::recorder::{RecorderError, RunRecorder};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by [`UpdateOrchestrator::run`].
///
/// Only [`Conflict`](UpdateError::Conflict) precedes any work; every other
/// fault is also recorded as structured progress, and the run is persisted
/// and the lock released regardless of how it ends.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Update already in progress")]
    Conflict,

    #[error("Insufficient disk space: {free_gb:.2} GB free, {required_gb:.2} GB required")]
    InsufficientSpace { free_gb: f64, required_gb: f64 },

    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Whether a detached trigger was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    Started,
    AlreadyRunning,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    /// Per-profile terminal results, in processing order.
    pub outcomes: IndexMap<String, PipelineOutcome>,
}

/// Top-level update driver: acquires the run lock, checks disk space, walks
/// every enabled profile through the pipeline, fans progress out through the
/// sink, and persists the finished run.
///
/// One logical task; profiles are processed strictly in sequence. The only
/// suspension points are subprocess I/O inside the pipeline, so the hosting
/// process stays free to serve unrelated work during a run.
pub struct UpdateOrchestrator {
    lock: RunLock,
    sink: ProgressSink,
    recorder: RunRecorder,
    pipeline: ProfilePipeline,
    profiles: ProfileStore,
    output_dir: Utf8PathBuf,
    min_free_space_gb: f64,
}

impl UpdateOrchestrator {
    pub fn new(
        settings: &Settings,
        profiles: ProfileStore,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self, RecorderError> {
        let sink = ProgressSink::new();
        let recorder = RunRecorder::new(settings.runs_dir())?;
        let pipeline = ProfilePipeline::new(
            runner,
            sink.clone(),
            PipelineConfig {
                aip_tool: settings.aip_tool.clone(),
                ocr_tool: settings.ocr_tool.clone(),
                cache_dir: settings.cache_dir.clone(),
                output_dir: settings.output_dir.clone(),
                ocr_jobs: settings.ocr_jobs,
                tool_timeout: settings.tool_timeout(),
            },
        );

        Ok(Self {
            lock: RunLock::new(settings.lock_file()),
            sink,
            recorder,
            pipeline,
            profiles,
            output_dir: settings.output_dir.clone(),
            min_free_space_gb: settings.min_free_space_gb,
        })
    }

    /// Whether an update run is active in this process.
    pub fn is_running(&self) -> bool {
        self.lock.is_held()
    }

    /// Attach a live progress subscriber (replay-then-tail).
    pub fn subscribe(&self) -> ProgressSubscription {
        self.sink.stream()
    }

    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// Run one update across all enabled profiles (or just the named one).
    ///
    /// Fails fast with [`UpdateError::Conflict`] if a run is already active.
    /// Every other outcome reaches the unconditional tail: the run record is
    /// persisted, per-run state is cleared, and the lock is released.
    pub async fn run(&self, profile_filter: Option<&str>) -> Result<RunReport, UpdateError> {
        let mut guard = self.lock.acquire().map_err(|e| match e {
            LockError::Conflict => UpdateError::Conflict,
            LockError::Io(io) => UpdateError::Fatal(io.into()),
        })?;

        self.sink.reset();
        let result = self.run_locked(profile_filter).await;

        // Unconditional tail: persist, clear, release. Failing to release
        // would permanently block all future runs.
        self.sink
            .emit("", Stage::System, RUN_FINISHED_MESSAGE, LogStatus::Info);
        let (logs, metadata) = self.sink.take_run();
        let run_id = self.recorder.next_run_id();
        let record = RunRecord::new(run_id.clone(), logs, metadata);
        if let Err(e) = self.recorder.save(&record) {
            tracing::error!("Failed to persist run {}: {}", run_id, e);
        }
        self.sink.reset();
        guard.release();

        result.map(|outcomes| RunReport { run_id, outcomes })
    }

    async fn run_locked(
        &self,
        profile_filter: Option<&str>,
    ) -> Result<IndexMap<String, PipelineOutcome>, UpdateError> {
        self.sink
            .emit("", Stage::System, "Starting update process", LogStatus::Info);

        let (has_space, free_gb) = DiskSpaceGuard::check(&self.output_dir, self.min_free_space_gb);
        if !has_space {
            let message = format!(
                "Insufficient disk space: {:.2} GB free, {:.2} GB required",
                free_gb, self.min_free_space_gb
            );
            self.sink
                .emit("", Stage::System, message, LogStatus::Error);
            return Err(UpdateError::InsufficientSpace {
                free_gb,
                required_gb: self.min_free_space_gb,
            });
        }
        self.sink.emit(
            "",
            Stage::System,
            format!("Disk space: {free_gb:.2} GB available"),
            LogStatus::Info,
        );

        let profiles = match self.profiles.load() {
            Ok(profiles) => profiles,
            Err(e) => {
                self.sink.emit(
                    "",
                    Stage::System,
                    format!("Fatal error: {}", truncate(&e.to_string(), 200)),
                    LogStatus::Error,
                );
                return Err(UpdateError::Fatal(e.into()));
            }
        };

        let selected: Vec<_> = profiles
            .into_iter()
            .filter(|p| p.enabled)
            .filter(|p| profile_filter.map_or(true, |name| p.name == name))
            .collect();

        self.sink.emit(
            "",
            Stage::System,
            format!("Found {} profile(s) to process", selected.len()),
            LogStatus::Info,
        );

        let mut outcomes = IndexMap::with_capacity(selected.len());
        for profile in &selected {
            // Profile boundary: one misbehaving profile must never abort the
            // loop, so everything the pipeline couldn't classify lands here.
            let outcome = match self.pipeline.run(profile).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let cause = truncate(&e.to_string(), 200);
                    self.sink.emit(
                        &profile.name,
                        Stage::Error,
                        format!("Exception: {cause}"),
                        LogStatus::Error,
                    );
                    tracing::error!("Profile {} failed with exception: {:#}", profile.name, e);
                    PipelineOutcome::Failed {
                        stage: Stage::Error,
                        cause,
                    }
                }
            };
            outcomes.insert(profile.name.clone(), outcome);
        }

        Ok(outcomes)
    }

    /// Hand the run off to the background so the trigger call returns
    /// immediately; callers only learn whether the run was accepted.
    pub fn try_run_detached(self: &Arc<Self>, profile_filter: Option<String>) -> TriggerStatus {
        if self.is_running() {
            return TriggerStatus::AlreadyRunning;
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.run(profile_filter.as_deref()).await {
                Ok(report) => {
                    tracing::info!("Background update run {} finished", report.run_id);
                }
                Err(UpdateError::Conflict) => {
                    tracing::warn!("Background update skipped: update already running");
                }
                Err(e) => {
                    tracing::error!("Background update failed: {}", e);
                }
            }
        });
        TriggerStatus::Started
    }
}
