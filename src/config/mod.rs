use crate::models::{Profile, ProfileError};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// Application settings, loaded from `aip-updater.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_output_dir")]
    pub output_dir: Utf8PathBuf,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: Utf8PathBuf,

    #[serde(default = "default_data_dir")]
    pub data_dir: Utf8PathBuf,

    /// Minimum free disk space in GB required before a run may start.
    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: f64,

    /// Parallel worker count passed to the OCR tool.
    #[serde(default = "default_ocr_jobs")]
    pub ocr_jobs: usize,

    /// Program name or path of the external AIP tool.
    #[serde(default = "default_aip_tool")]
    pub aip_tool: String,

    /// Program name or path of the external OCR converter.
    #[serde(default = "default_ocr_tool")]
    pub ocr_tool: String,

    /// Optional per-invocation timeout for external tools, in seconds.
    /// Unset by default: a stuck tool is an accepted operational gap.
    #[serde(default)]
    pub tool_timeout_secs: Option<u64>,

    #[serde(default)]
    pub debug_mode: bool,
}

fn default_output_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("output")
}

fn default_cache_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("cache")
}

fn default_data_dir() -> Utf8PathBuf {
    Utf8PathBuf::from("data")
}

fn default_min_free_space_gb() -> f64 {
    1.0
}

fn default_ocr_jobs() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(2)
}

fn default_aip_tool() -> String {
    "aip".to_string()
}

fn default_ocr_tool() -> String {
    "ocrmypdf".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
            data_dir: default_data_dir(),
            min_free_space_gb: default_min_free_space_gb(),
            ocr_jobs: default_ocr_jobs(),
            aip_tool: default_aip_tool(),
            ocr_tool: default_ocr_tool(),
            tool_timeout_secs: None,
            debug_mode: false,
        }
    }
}

impl Settings {
    pub fn profiles_file(&self) -> Utf8PathBuf {
        self.data_dir.join("profiles.json")
    }

    pub fn runs_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("runs")
    }

    pub fn lock_file(&self) -> Utf8PathBuf {
        self.data_dir.join("update.lock")
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    /// Create the directory tree the updater works in.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.output_dir, &self.cache_dir, &self.data_dir, &self.runs_dir()] {
            fs::create_dir_all(dir.as_std_path())
                .with_context(|| format!("Failed to create directory: {}", dir))?;
        }
        Ok(())
    }
}

/// Loads and saves the YAML settings file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref();

        if !config_dir.exists() {
            fs::create_dir_all(config_dir.as_std_path())
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("aip-updater.yaml"),
        })
    }

    /// Load settings. On first run the file doesn't exist yet; defaults are
    /// written out so operators have a template to edit.
    pub fn load_settings(&self) -> Result<Settings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, writing defaults",
                self.settings_path
            );
            let defaults = Settings::default();
            self.save_settings(&defaults)?;
            return Ok(defaults);
        }

        let file_contents = fs::read_to_string(self.settings_path.as_std_path())
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let settings: Settings = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(self.settings_path.as_std_path(), yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }
}

/// Errors from profile storage.
#[derive(Error, Debug)]
pub enum ProfileStoreError {
    #[error("Profile '{0}' already exists")]
    Duplicate(String),

    #[error("Profile '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Invalid(#[from] ProfileError),

    #[error("Profile storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse profile store: {0}")]
    Parse(#[from] serde_json::Error),
}

/// JSON-file-backed profile storage. Simple collaborator of the orchestrator:
/// the orchestrator only ever reads from it.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: Utf8PathBuf,
}

impl ProfileStore {
    pub fn new<P: AsRef<Utf8Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// All stored profiles; empty when the store file doesn't exist yet.
    pub fn load(&self) -> Result<Vec<Profile>, ProfileStoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(self.path.as_std_path())?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, profiles: &[Profile]) -> Result<(), ProfileStoreError> {
        let json = serde_json::to_string_pretty(profiles)?;
        fs::write(self.path.as_std_path(), json)?;
        Ok(())
    }

    pub fn create(&self, profile: Profile) -> Result<(), ProfileStoreError> {
        profile.validate()?;
        let mut profiles = self.load()?;
        if profiles.iter().any(|p| p.name == profile.name) {
            return Err(ProfileStoreError::Duplicate(profile.name));
        }
        profiles.push(profile);
        self.save(&profiles)
    }

    pub fn update(&self, name: &str, profile: Profile) -> Result<(), ProfileStoreError> {
        profile.validate()?;
        let mut profiles = self.load()?;
        let Some(existing) = profiles.iter_mut().find(|p| p.name == name) else {
            return Err(ProfileStoreError::NotFound(name.to_string()));
        };
        *existing = profile;
        self.save(&profiles)
    }

    pub fn delete(&self, name: &str) -> Result<(), ProfileStoreError> {
        let mut profiles = self.load()?;
        let before = profiles.len();
        profiles.retain(|p| p.name != name);
        if profiles.len() == before {
            return Err(ProfileStoreError::NotFound(name.to_string()));
        }
        self.save(&profiles)
    }
}
