// aip-updater - AIP document update orchestrator
//
// This is the library crate containing the core business logic and data
// structures. The binary crate (main.rs) provides the CLI entry point.

pub mod config;
pub mod logging;
pub mod models;
pub mod services;

// Re-export commonly used types for convenience
pub use config::{ConfigManager, ProfileStore, Settings};
pub use models::{FlightRule, Profile, RunRecord, RunSummary};
pub use services::{ProgressSink, UpdateError, UpdateOrchestrator};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
