//! aip-updater - CLI entry point.
//!
//! Triggers update runs and inspects run history. A run walks every enabled
//! profile through the fetch/render/OCR pipeline exactly once; the CLI (or
//! cron invoking it) is the scheduler.

use aip_updater::models::PipelineOutcome;
use aip_updater::services::{TokioProcessRunner, UpdateError, UpdateOrchestrator};
use aip_updater::{ConfigManager, ProfileStore, APP_NAME, VERSION};
use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "aip-updater", version, about = "AIP document update orchestrator")]
struct Cli {
    /// Configuration directory containing aip-updater.yaml
    #[arg(long, global = true, default_value = "config")]
    config: Utf8PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one update across all enabled profiles
    Run {
        /// Process only the named profile
        #[arg(long)]
        profile: Option<String>,
    },
    /// List recorded runs, most recent first
    Runs,
    /// Print one run record as JSON
    Show { id: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config)?;
    let settings = config_manager.load_settings()?;

    let _log_guard = aip_updater::logging::setup_logging(
        Utf8PathBuf::from("logs").as_path(),
        APP_NAME,
        settings.debug_mode,
        true,
    )?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    settings.ensure_directories()?;

    let store = ProfileStore::new(settings.profiles_file());
    let orchestrator =
        UpdateOrchestrator::new(&settings, store, Arc::new(TokioProcessRunner::new()))?;

    match cli.command {
        Command::Run { profile } => match orchestrator.run(profile.as_deref()).await {
            Ok(report) => {
                let failed = report
                    .outcomes
                    .iter()
                    .filter(|(_, outcome)| outcome.is_failure())
                    .count();
                for (name, outcome) in &report.outcomes {
                    let verdict = match outcome {
                        PipelineOutcome::Succeeded => "ok".to_string(),
                        PipelineOutcome::Skipped(reason) => format!("skipped ({reason})"),
                        PipelineOutcome::Failed { stage, cause } => {
                            format!("failed at {stage}: {cause}")
                        }
                    };
                    println!("{name}: {verdict}");
                }
                println!("Run {} recorded", report.run_id);
                if failed > 0 {
                    tracing::warn!("{} profile(s) failed", failed);
                    return Ok(ExitCode::FAILURE);
                }
                Ok(ExitCode::SUCCESS)
            }
            Err(UpdateError::Conflict) => {
                eprintln!("An update is already in progress");
                Ok(ExitCode::FAILURE)
            }
            Err(e) => {
                eprintln!("Update failed: {e}");
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Runs => {
            for summary in orchestrator.recorder().list()? {
                println!(
                    "{}  {}  {} profile(s){}",
                    summary.id,
                    summary.status,
                    summary.profiles.len(),
                    if summary.pdf_created { "  pdf" } else { "" }
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { id } => {
            let record = orchestrator.recorder().get(&id)?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}
