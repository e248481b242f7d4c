//! Configuration loading for abc2midi.
//!
//! Conversion settings come from compiled defaults, optionally overridden by
//! TOML files and then by `ABC2MIDI_*` environment variables. Command line
//! flags are applied last by the binary.
//!
//! # Usage
//!
//! ```rust,no_run
//! use abcconf::AbcConfig;
//!
//! let config = AbcConfig::load().expect("Failed to load config");
//! println!("ticks per quarter: {}", config.midi.ticks_per_quarter);
//! println!("workers: {}", config.batch.effective_jobs());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/abc2midi/config.toml` (system)
//! 2. `~/.config/abc2midi/config.toml` (user)
//! 3. `./abc2midi.toml` (local override), or the file given with `--config`
//! 4. Environment variables (`ABC2MIDI_*`)
//!
//! # Example Config
//!
//! ```toml
//! [midi]
//! ticks_per_quarter = 480
//! velocity = 80
//! program = 73
//!
//! [parse]
//! default_tempo = 120
//! strict = false
//!
//! [batch]
//! jobs = 4
//! extension = "abc"
//!
//! [log]
//! level = "info"
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, value: impl ToString, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// MIDI output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MidiConfig {
    /// Division written to the file header.
    pub ticks_per_quarter: u16,
    /// Note-on velocity (1-127).
    pub velocity: u8,
    /// Program change for every track, unless a tune sets its own.
    pub program: Option<u8>,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            ticks_per_quarter: 480,
            velocity: 80,
            program: None,
        }
    }
}

/// Notation interpretation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseConfig {
    /// Quarter-note BPM for tunes without a `Q:` field.
    pub default_tempo: u16,
    /// Fail on constructs that are otherwise skipped with a warning.
    pub strict: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            default_tempo: 120,
            strict: false,
        }
    }
}

/// Bulk conversion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Concurrent conversions. 0 uses the available parallelism.
    pub jobs: usize,
    /// Extension (without the dot) of song files picked up from a directory.
    pub extension: String,
}

impl BatchConfig {
    /// Worker count with 0 resolved to the machine's parallelism.
    pub fn effective_jobs(&self) -> usize {
        if self.jobs > 0 {
            return self.jobs;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            extension: "abc".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `abc=debug`.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Complete abc2midi configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AbcConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AbcConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/abc2midi/config.toml`
    /// 3. `~/.config/abc2midi/config.toml`
    /// 4. `./abc2midi.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file in place of `./abc2midi.toml`.
    ///
    /// System and user configs still load first. A missing explicit file is
    /// an error.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = AbcConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file = loader::load_from_file(&path)?;
            file.apply_to(&mut config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Check value ranges. Called after every layer has been applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tpq = self.midi.ticks_per_quarter;
        if !(1..=0x7FFF).contains(&tpq) {
            return Err(ConfigError::invalid(
                "midi.ticks_per_quarter",
                tpq,
                "must be between 1 and 32767",
            ));
        }
        if !(1..=127).contains(&self.midi.velocity) {
            return Err(ConfigError::invalid(
                "midi.velocity",
                self.midi.velocity,
                "must be between 1 and 127",
            ));
        }
        if let Some(program) = self.midi.program.filter(|p| *p > 127) {
            return Err(ConfigError::invalid(
                "midi.program",
                program,
                "must be between 0 and 127",
            ));
        }
        // Slower quarter notes overflow the MIDI tempo meta event
        if self.parse.default_tempo < 4 {
            return Err(ConfigError::invalid(
                "parse.default_tempo",
                self.parse.default_tempo,
                "must be at least 4",
            ));
        }
        if self.batch.extension.is_empty() {
            return Err(ConfigError::invalid("batch.extension", "", "must not be empty"));
        }
        Ok(())
    }
}
