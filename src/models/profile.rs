use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum length of a profile name.
pub const MAX_NAME_LEN: usize = 100;

/// Maximum length of a single section filter pattern.
pub const MAX_FILTER_LEN: usize = 200;

/// Maximum number of filters per profile.
pub const MAX_FILTERS: usize = 100;

fn name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid name regex"))
}

fn filter_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9/_.*-]+$").expect("Invalid filter regex"))
}

/// Errors produced by profile validation.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Invalid profile name: {0}. Only alphanumeric, dash, and underscore allowed (1-{MAX_NAME_LEN} chars)")]
    InvalidName(String),

    #[error("Invalid filter format: {0}. Only alphanumeric, dash, underscore, slash, period, and asterisk allowed")]
    InvalidFilter(String),

    #[error("Filter too long: {0}")]
    FilterTooLong(String),

    #[error("Too many filters: {0} (max {MAX_FILTERS})")]
    TooManyFilters(usize),
}

/// Flight rule a profile fetches documents for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlightRule {
    #[default]
    Vfr,
    Ifr,
}

impl FlightRule {
    /// Lowercase token as used in the profile store.
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightRule::Vfr => "vfr",
            FlightRule::Ifr => "ifr",
        }
    }

    /// Command-line flag passed to the external AIP tool (`--vfr` / `--ifr`).
    pub fn flag(&self) -> &'static str {
        match self {
            FlightRule::Vfr => "--vfr",
            FlightRule::Ifr => "--ifr",
        }
    }

    /// Uppercase label for progress messages.
    pub fn label(&self) -> &'static str {
        match self {
            FlightRule::Vfr => "VFR",
            FlightRule::Ifr => "IFR",
        }
    }
}

impl fmt::Display for FlightRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named document profile: which flight rule and which document sections
/// to fetch and render. Owned by the profile store; the orchestrator treats
/// profiles as read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,

    #[serde(default)]
    pub flight_rule: FlightRule,

    #[serde(default)]
    pub filters: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Profile {
    /// Create an enabled profile with no filters.
    pub fn new<S: Into<String>>(name: S, flight_rule: FlightRule) -> Self {
        Self {
            name: name.into(),
            flight_rule,
            filters: Vec::new(),
            enabled: true,
        }
    }

    /// Validate name and filter charsets.
    ///
    /// Filter patterns end up as subprocess arguments, so the charset check
    /// doubles as a command-injection guard.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.name.is_empty() || self.name.len() > MAX_NAME_LEN || !name_pattern().is_match(&self.name) {
            return Err(ProfileError::InvalidName(self.name.clone()));
        }

        if self.filters.len() > MAX_FILTERS {
            return Err(ProfileError::TooManyFilters(self.filters.len()));
        }

        for filter in &self.filters {
            if filter.len() > MAX_FILTER_LEN {
                return Err(ProfileError::FilterTooLong(filter.clone()));
            }
            if !filter_pattern().is_match(filter) {
                return Err(ProfileError::InvalidFilter(filter.clone()));
            }
        }

        Ok(())
    }
}

/// Map a profile name to a filesystem-safe form: anything outside
/// `[A-Za-z0-9-_]` becomes an underscore.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
