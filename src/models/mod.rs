//! Data models for the AIP updater.
//!
//! - [`Profile`]: a named selection of flight rule and document sections,
//!   loaded from the profile store and treated as read-only by the orchestrator
//! - [`LogEntry`] / [`Stage`] / [`LogStatus`]: structured progress events
//! - [`RunRecord`] / [`RunSummary`]: the durable per-run record and its
//!   history listing row
//! - [`PipelineOutcome`]: per-profile terminal result of one pipeline pass
//!
//! All persisted types derive `Serialize`/`Deserialize`; the JSON field names
//! match the on-disk run-record format, so these structs are the wire contract.

pub mod profile;
pub mod run;

pub use profile::{sanitize, FlightRule, Profile, ProfileError};
pub use run::{
    LogEntry, LogStatus, PipelineOutcome, RunMetadata, RunRecord, RunStatus, RunSummary, Stage,
};
