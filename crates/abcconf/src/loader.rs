//! Config file discovery, loading, and environment variable overlay.

use crate::{AbcConfig, ConfigError};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override and is returned
/// even when missing, so loading reports it.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/abc2midi/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("abc2midi/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        files.push(path.to_path_buf());
        return files;
    }

    let local = PathBuf::from("abc2midi.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// One config file as written. Only the keys it sets are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    midi: MidiSection,
    parse: ParseSection,
    batch: BatchSection,
    log: LogSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MidiSection {
    ticks_per_quarter: Option<u16>,
    velocity: Option<u8>,
    program: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ParseSection {
    default_tempo: Option<u16>,
    strict: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BatchSection {
    jobs: Option<usize>,
    extension: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogSection {
    level: Option<String>,
}

impl ConfigFile {
    /// Overlay the keys this file sets onto `config`.
    pub fn apply_to(self, config: &mut AbcConfig) {
        let ConfigFile {
            midi,
            parse,
            batch,
            log,
        } = self;

        if let Some(v) = midi.ticks_per_quarter {
            config.midi.ticks_per_quarter = v;
        }
        if let Some(v) = midi.velocity {
            config.midi.velocity = v;
        }
        if midi.program.is_some() {
            config.midi.program = midi.program;
        }
        if let Some(v) = parse.default_tempo {
            config.parse.default_tempo = v;
        }
        if let Some(v) = parse.strict {
            config.parse.strict = v;
        }
        if let Some(v) = batch.jobs {
            config.batch.jobs = v;
        }
        if let Some(v) = batch.extension {
            config.batch.extension = v.trim_start_matches('.').to_string();
        }
        if let Some(v) = log.level {
            config.log.level = v;
        }
    }
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

fn parse_toml(contents: &str, path: &Path) -> Result<ConfigFile, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut AbcConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, |name| env::var(name).ok())
}

/// Apply overrides from any variable lookup.
pub fn apply_overrides_from(
    config: &mut AbcConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let mut var = |name: &str| {
        let value = lookup(name)?;
        sources.env_overrides.push(name.to_string());
        Some(value)
    };

    if let Some(v) = var("ABC2MIDI_TICKS_PER_QUARTER") {
        config.midi.ticks_per_quarter = parse_number("ABC2MIDI_TICKS_PER_QUARTER", &v)?;
    }
    if let Some(v) = var("ABC2MIDI_VELOCITY") {
        config.midi.velocity = parse_number("ABC2MIDI_VELOCITY", &v)?;
    }
    if let Some(v) = var("ABC2MIDI_PROGRAM") {
        config.midi.program = Some(parse_number("ABC2MIDI_PROGRAM", &v)?);
    }
    if let Some(v) = var("ABC2MIDI_DEFAULT_TEMPO") {
        config.parse.default_tempo = parse_number("ABC2MIDI_DEFAULT_TEMPO", &v)?;
    }
    if let Some(v) = var("ABC2MIDI_STRICT") {
        config.parse.strict = parse_flag("ABC2MIDI_STRICT", &v)?;
    }
    if let Some(v) = var("ABC2MIDI_JOBS") {
        config.batch.jobs = parse_number("ABC2MIDI_JOBS", &v)?;
    }
    if let Some(v) = var("ABC2MIDI_LOG_LEVEL") {
        config.log.level = v;
    }
    // Also support RUST_LOG
    if let Some(v) = var("RUST_LOG") {
        config.log.level = v;
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(name, value, "expected a number"))
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::invalid(name, value, "expected true or false")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overlay(vars: &[(&str, &str)]) -> Result<(AbcConfig, ConfigSources), ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = AbcConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |name| vars.get(name).cloned())?;
        Ok((config, sources))
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_cli_path_is_always_listed() {
        let missing = Path::new("/nonexistent/abc2midi.toml");
        let files = discover_config_files_with_override(Some(missing));
        assert_eq!(files.last().map(PathBuf::as_path), Some(missing));
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
[midi]
velocity = 100
"#;
        let mut config = AbcConfig::default();
        parse_toml(toml, Path::new("test.toml"))
            .unwrap()
            .apply_to(&mut config);

        assert_eq!(config.midi.velocity, 100);
        // Other values should be defaults
        assert_eq!(config.midi.ticks_per_quarter, 480);
        assert_eq!(config.batch.extension, "abc");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[midi]
ticks_per_quarter = 960
velocity = 64
program = 73

[parse]
default_tempo = 100
strict = true

[batch]
jobs = 2
extension = ".txt"

[log]
level = "debug"
"#;
        let mut config = AbcConfig::default();
        parse_toml(toml, Path::new("test.toml"))
            .unwrap()
            .apply_to(&mut config);

        assert_eq!(config.midi.ticks_per_quarter, 960);
        assert_eq!(config.midi.velocity, 64);
        assert_eq!(config.midi.program, Some(73));
        assert_eq!(config.parse.default_tempo, 100);
        assert!(config.parse.strict);
        assert_eq!(config.batch.jobs, 2);
        assert_eq!(config.batch.extension, "txt");
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_later_file_wins_only_where_set() {
        let mut config = AbcConfig::default();
        parse_toml("[midi]\nvelocity = 90\nprogram = 5\n", Path::new("a.toml"))
            .unwrap()
            .apply_to(&mut config);
        parse_toml("[midi]\nprogram = 6\n", Path::new("b.toml"))
            .unwrap()
            .apply_to(&mut config);

        assert_eq!(config.midi.velocity, 90);
        assert_eq!(config.midi.program, Some(6));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = parse_toml("[midi]\nvelocity = \"loud\"\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == Path::new("bad.toml")));
    }

    #[test]
    fn test_env_overrides() {
        let (config, sources) = overlay(&[
            ("ABC2MIDI_VELOCITY", "110"),
            ("ABC2MIDI_PROGRAM", "0"),
            ("ABC2MIDI_STRICT", "yes"),
            ("ABC2MIDI_JOBS", "4"),
            ("RUST_LOG", "abc=trace"),
        ])
        .unwrap();

        assert_eq!(config.midi.velocity, 110);
        assert_eq!(config.midi.program, Some(0));
        assert!(config.parse.strict);
        assert_eq!(config.batch.jobs, 4);
        assert_eq!(config.log.level, "abc=trace");
        assert_eq!(sources.env_overrides.len(), 5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let err = overlay(&[("ABC2MIDI_TICKS_PER_QUARTER", "lots")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { ref key, .. } if key == "ABC2MIDI_TICKS_PER_QUARTER"
        ));
        assert!(overlay(&[("ABC2MIDI_STRICT", "maybe")]).is_err());
    }
}
