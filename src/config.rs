//! Engine configuration.
//!
//! Loaded from a JSON file (absent file means defaults) and then overridden
//! from `CADFORGE_*` environment variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::formats::Format;
use crate::process::PollConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

/// Flags passed to every format converter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConverterOptions {
    /// Absolute tessellation tolerance (mm).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default = "default_true")]
    pub binary_stl: bool,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            tolerance: Some(0.01),
            binary_stl: true,
            verbose: false,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Directory holding generated artifacts.
    pub work_dir: PathBuf,
    /// Directory holding rendered views, one subdirectory per artifact.
    pub render_dir: PathBuf,
    /// Geometry engine executable.
    pub mged: PathBuf,
    /// Raster render executable.
    pub rt: PathBuf,
    /// Converter executable per format; unset formats use their default tool.
    pub converters: BTreeMap<Format, PathBuf>,
    pub converter: ConverterOptions,
    pub artifact_poll: PollConfig,
    pub render_poll: PollConfig,
    pub render_size: u32,
    pub white_background: bool,
    /// Formats produced when a request names none.
    pub default_formats: Vec<Format>,
    /// Serialize identical concurrent builds behind a per-key lock.
    pub serialize_builds: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("models"),
            render_dir: PathBuf::from("render_output"),
            mged: PathBuf::from("mged"),
            rt: PathBuf::from("rt"),
            converters: BTreeMap::new(),
            converter: ConverterOptions::default(),
            artifact_poll: PollConfig::new(30, 150),
            render_poll: PollConfig::new(60, 200),
            render_size: 800,
            white_background: true,
            default_formats: vec![Format::Obj],
            serialize_builds: true,
        }
    }
}

impl EngineConfig {
    /// Config rooted at `dir`: artifacts in `dir`, renders in `dir/render`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            work_dir: dir.to_path_buf(),
            render_dir: dir.join("render"),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_vars<F>(mut self, var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = var("CADFORGE_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("CADFORGE_RENDER_DIR") {
            self.render_dir = PathBuf::from(dir);
        }
        if let Some(mged) = var("CADFORGE_MGED") {
            self.mged = PathBuf::from(mged);
        }
        if let Some(rt) = var("CADFORGE_RT") {
            self.rt = PathBuf::from(rt);
        }
        if let Some(value) = var("CADFORGE_POLL_ATTEMPTS") {
            self.artifact_poll.attempts = parse_env("CADFORGE_POLL_ATTEMPTS", &value)?;
        }
        if let Some(value) = var("CADFORGE_POLL_DELAY_MS") {
            self.artifact_poll.delay_ms = parse_env("CADFORGE_POLL_DELAY_MS", &value)?;
        }
        Ok(self)
    }

    pub fn converter_program(&self, format: Format) -> Option<PathBuf> {
        self.converters
            .get(&format)
            .cloned()
            .or_else(|| format.converter().map(PathBuf::from))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
