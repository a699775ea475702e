use crate::models::{sanitize, LogStatus, PipelineOutcome, Profile, Stage};
use crate::services::process::{ProcessRunner, StreamSource, ToolCommand};
use crate::services::progress::ProgressSink;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::VecDeque;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// Tool stderr is truncated to this many characters in failure events.
const STDERR_TRUNCATE: usize = 200;

/// How many trailing OCR diagnostic lines are reported on failure.
const OCR_TAIL_LINES: usize = 10;

/// External-tool wiring for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Program invoked for TOC fetch/list and PDF rendering.
    pub aip_tool: String,
    /// Program invoked for OCR conversion.
    pub ocr_tool: String,
    pub cache_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    /// Worker count passed to the OCR tool's `--jobs`.
    pub ocr_jobs: usize,
    pub tool_timeout: Option<Duration>,
}

/// Drives one profile through the fixed stage sequence
/// init → toc_fetch → (AIRAC resolve) → pdf_gen → ocr → complete.
///
/// Stages are strictly sequential; a non-zero tool exit fails the profile
/// (recorded as progress, never raised), and existing artifacts for the
/// current AIRAC cycle short-circuit the expensive stages — the cycle id is
/// the cache key, the rendered file the cached value.
pub struct ProfilePipeline {
    runner: Arc<dyn ProcessRunner>,
    sink: ProgressSink,
    config: PipelineConfig,
}

impl ProfilePipeline {
    pub fn new(runner: Arc<dyn ProcessRunner>, sink: ProgressSink, config: PipelineConfig) -> Self {
        Self {
            runner,
            sink,
            config,
        }
    }

    fn aip_command(&self) -> ToolCommand {
        ToolCommand::new(&self.config.aip_tool)
            .args(["--cache", self.cache_path().as_str()])
            .timeout(self.config.tool_timeout)
    }

    fn cache_path(&self) -> Utf8PathBuf {
        self.config.cache_dir.join("dfs-aip")
    }

    /// Expected artifact paths for a profile and AIRAC cycle:
    /// `<output>/<sanitized>/<sanitized>_<cycle>.pdf` and its `_ocr` variant.
    pub fn artifact_paths(&self, profile: &Profile, cycle: &str) -> (Utf8PathBuf, Utf8PathBuf) {
        let base = sanitize(&profile.name);
        let dir = self.config.output_dir.join(&base);
        (
            dir.join(format!("{base}_{cycle}.pdf")),
            dir.join(format!("{base}_{cycle}_ocr.pdf")),
        )
    }

    /// Run the full pipeline for one profile.
    ///
    /// Tool failures and parse failures return a [`PipelineOutcome::Failed`];
    /// only faults outside the stage contract (spawn errors, filesystem
    /// errors) propagate, to be caught at the orchestrator's profile boundary.
    pub async fn run(&self, profile: &Profile) -> Result<PipelineOutcome> {
        let name = profile.name.as_str();
        self.sink
            .emit(name, Stage::Init, "Starting profile processing", LogStatus::Info);

        let profile_dir = self.config.output_dir.join(sanitize(name));
        fs::create_dir_all(&profile_dir)
            .with_context(|| format!("Failed to create output directory: {}", profile_dir))?;

        if let Some(failed) = self.toc_fetch(profile).await? {
            return Ok(failed);
        }

        let cycle = match self.resolve_airac_cycle(profile).await? {
            Some(cycle) => cycle,
            None => {
                self.sink
                    .emit(name, Stage::Init, "No AIRAC cycles found", LogStatus::Warning);
                return Ok(PipelineOutcome::Failed {
                    stage: Stage::Init,
                    cause: "No AIRAC cycles found".to_string(),
                });
            }
        };
        self.sink.emit(
            name,
            Stage::Init,
            format!("AIRAC date: {cycle}"),
            LogStatus::Info,
        );

        let (output_path, ocr_path) = self.artifact_paths(profile, &cycle);

        let pdf_skipped = if output_path.exists() {
            self.sink
                .emit(name, Stage::PdfGen, "PDF already exists", LogStatus::Info);
            true
        } else {
            if let Some(failed) = self.generate_pdf(profile, &output_path).await? {
                return Ok(failed);
            }
            false
        };

        let ocr_skipped = if ocr_path.exists() {
            self.sink
                .emit(name, Stage::Ocr, "OCR PDF already exists", LogStatus::Success);
            true
        } else {
            if let Some(failed) = self.run_ocr(profile, &output_path, &ocr_path).await? {
                return Ok(failed);
            }
            false
        };

        if pdf_skipped && ocr_skipped {
            return Ok(PipelineOutcome::Skipped(format!(
                "Artifacts up to date for AIRAC cycle {cycle}"
            )));
        }

        self.sink.emit(
            name,
            Stage::Complete,
            "Profile processing complete",
            LogStatus::Success,
        );
        Ok(PipelineOutcome::Succeeded)
    }

    async fn toc_fetch(&self, profile: &Profile) -> Result<Option<PipelineOutcome>> {
        let name = profile.name.as_str();
        self.sink.emit(
            name,
            Stage::TocFetch,
            format!("Fetching TOC ({})", profile.flight_rule.label()),
            LogStatus::Info,
        );

        let cmd = self
            .aip_command()
            .args(["toc", "fetch", profile.flight_rule.flag()]);
        let output = self.runner.run(&cmd).await?;

        if !output.success() {
            let cause = truncate(&output.stderr, STDERR_TRUNCATE);
            self.sink.emit(
                name,
                Stage::TocFetch,
                format!("Failed: {cause}"),
                LogStatus::Error,
            );
            return Ok(Some(PipelineOutcome::Failed {
                stage: Stage::TocFetch,
                cause,
            }));
        }

        self.sink.emit(
            name,
            Stage::TocFetch,
            "TOC fetched successfully",
            LogStatus::Success,
        );
        Ok(None)
    }

    async fn resolve_airac_cycle(&self, profile: &Profile) -> Result<Option<String>> {
        let cmd = self
            .aip_command()
            .args(["toc", "list", profile.flight_rule.flag()]);
        let output = self.runner.run(&cmd).await?;
        Ok(parse_airac_cycle(&output.stdout))
    }

    async fn generate_pdf(
        &self,
        profile: &Profile,
        output_path: &Utf8Path,
    ) -> Result<Option<PipelineOutcome>> {
        let name = profile.name.as_str();
        self.sink
            .emit(name, Stage::PdfGen, "Generating PDF", LogStatus::Info);
        self.sink.mark_pdf_created();

        let mut cmd = self
            .aip_command()
            .args(["pdf", "--output", output_path.as_str()])
            .arg("summary")
            .arg(profile.flight_rule.flag());
        for filter in &profile.filters {
            cmd = cmd.args(["-f", filter]);
        }

        // One stdout line per rendered page; stream it as a progress counter
        // instead of buffering.
        let mut child = self.runner.stream(&cmd, StreamSource::Stdout).await?;
        let mut page_count = 0usize;
        while let Some(line) = child.next_line().await {
            let page = line.trim();
            if !page.is_empty() {
                page_count += 1;
                self.sink.emit(
                    name,
                    Stage::PdfGen,
                    format!("Downloaded page {page_count}: {page}"),
                    LogStatus::Info,
                );
            }
        }
        let exit = child.wait().await?;

        if exit.exit_code != 0 {
            let cause = truncate(&exit.captured, STDERR_TRUNCATE);
            self.sink.emit(
                name,
                Stage::PdfGen,
                format!("Failed: {cause}"),
                LogStatus::Error,
            );
            return Ok(Some(PipelineOutcome::Failed {
                stage: Stage::PdfGen,
                cause,
            }));
        }

        self.sink.emit(
            name,
            Stage::PdfGen,
            format!("PDF complete ({:.1} MB)", file_size_mb(output_path)),
            LogStatus::Success,
        );
        Ok(None)
    }

    async fn run_ocr(
        &self,
        profile: &Profile,
        input_path: &Utf8Path,
        ocr_path: &Utf8Path,
    ) -> Result<Option<PipelineOutcome>> {
        let name = profile.name.as_str();
        self.sink.emit(
            name,
            Stage::Ocr,
            format!(
                "Starting OCR: {} -> {}",
                input_path.file_name().unwrap_or_default(),
                ocr_path.file_name().unwrap_or_default()
            ),
            LogStatus::Info,
        );
        self.sink.emit(
            name,
            Stage::Ocr,
            format!("Input PDF size: {:.1} MB", file_size_mb(input_path)),
            LogStatus::Info,
        );
        self.sink.emit(
            name,
            Stage::Ocr,
            format!("Using {} parallel worker(s)", self.config.ocr_jobs),
            LogStatus::Info,
        );

        let cmd = ToolCommand::new(&self.config.ocr_tool)
            .args(["--jobs", &self.config.ocr_jobs.to_string()])
            .arg(input_path.as_str())
            .arg(ocr_path.as_str())
            .timeout(self.config.tool_timeout);

        // The OCR tool writes diagnostics to stderr; stream them live and
        // keep a short tail for triage on failure.
        let mut child = self.runner.stream(&cmd, StreamSource::Stderr).await?;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(OCR_TAIL_LINES);
        while let Some(line) = child.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if tail.len() == OCR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
            self.sink.emit(name, Stage::Ocr, line, LogStatus::Info);
        }
        let exit = child.wait().await?;

        if exit.exit_code != 0 {
            self.sink.emit(
                name,
                Stage::Ocr,
                format!("Process exited with code {}", exit.exit_code),
                LogStatus::Error,
            );
            let tail_lines: Vec<&str> = tail.iter().map(String::as_str).collect();
            self.sink.emit(
                name,
                Stage::Ocr,
                format!("Last {} stderr lines: {:?}", OCR_TAIL_LINES, tail_lines),
                LogStatus::Error,
            );
            if !exit.captured.trim().is_empty() {
                self.sink.emit(
                    name,
                    Stage::Ocr,
                    format!("stdout: {}", truncate(&exit.captured, 500)),
                    LogStatus::Error,
                );
            }
            return Ok(Some(PipelineOutcome::Failed {
                stage: Stage::Ocr,
                cause: format!("Process exited with code {}", exit.exit_code),
            }));
        }

        self.sink.emit(
            name,
            Stage::Ocr,
            format!("OCR complete ({:.1} MB)", file_size_mb(ocr_path)),
            LogStatus::Success,
        );
        Ok(None)
    }
}

/// Extract the AIRAC cycle identifier from the TOC listing: the second
/// whitespace-delimited token of the first output line.
pub fn parse_airac_cycle(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

fn file_size_mb(path: &Utf8Path) -> f64 {
    fs::metadata(path.as_std_path())
        .map(|m| m.len() as f64 / (1024.0 * 1024.0))
        .unwrap_or(0.0)
}
