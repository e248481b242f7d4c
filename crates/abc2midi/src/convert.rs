//! File level conversion: reading songs, writing MIDI, bulk and combine modes.

use abc::{FeedbackLevel, MidiParams, NotationDocument, ParseOptions, ParseResult};
use abcconf::AbcConfig;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::report::{BatchReport, Converted, Failed};

/// Everything a conversion needs, resolved from config and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub parse: ParseOptions,
    pub midi: MidiParams,
    /// Concurrent conversions in bulk mode, at least 1
    pub jobs: usize,
    /// Song file extension, without the dot
    pub extension: String,
}

impl Settings {
    pub fn from_config(config: &AbcConfig) -> Self {
        Settings {
            parse: ParseOptions {
                strict: config.parse.strict,
                default_bpm: config.parse.default_tempo,
            },
            midi: MidiParams {
                velocity: config.midi.velocity,
                ticks_per_beat: config.midi.ticks_per_quarter,
                program: config.midi.program,
                ..MidiParams::default()
            },
            jobs: config.batch.effective_jobs().max(1),
            extension: config.batch.extension.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings::from_config(&AbcConfig::default())
    }
}

/// Read and parse one song file, logging its feedback.
///
/// Bytes that are not valid UTF-8 are replaced rather than rejected.
pub fn load_song(path: &Path, options: &ParseOptions) -> Result<ParseResult<NotationDocument>> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let parsed = abc::parse_with(&text, options)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let file = display_name(path);
    for feedback in &parsed.feedback {
        match feedback.level {
            FeedbackLevel::Warning => warn!(file = %file, "{}", feedback),
            FeedbackLevel::Info => info!(file = %file, "{}", feedback),
        }
    }
    Ok(parsed)
}

/// Convert one song to one MIDI file.
pub fn convert_file(source: &Path, output: &Path, settings: &Settings) -> Result<Converted> {
    let parsed = load_song(source, &settings.parse)?;
    let doc = abc::to_midi_document(&parsed.value, &settings.midi)
        .with_context(|| format!("failed to convert {}", source.display()))?;

    write_atomic(output, &doc.to_bytes())?;
    debug!(source = %source.display(), output = %output.display(), "wrote MIDI file");

    Ok(Converted {
        source: source.to_path_buf(),
        output: output.to_path_buf(),
        tracks: doc.tracks.len(),
        warnings: parsed.warnings().count(),
    })
}

/// Song files in a directory, in name order.
pub fn list_songs(songs_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(songs_dir)
        .with_context(|| format!("failed to read songs directory {}", songs_dir.display()))?;

    let mut songs = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to read songs directory {}", songs_dir.display()))?
            .path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if matches && path.is_file() {
            songs.push(path);
        }
    }
    songs.sort();
    Ok(songs)
}

/// Convert every song in `songs_dir` to `<output_dir>/<stem>.mid`.
///
/// A failing file is recorded in the report and does not stop the batch.
pub async fn convert_songs(
    songs_dir: &Path,
    output_dir: &Path,
    settings: &Settings,
) -> Result<BatchReport> {
    let songs = list_songs(songs_dir, &settings.extension)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    info!(
        songs = songs.len(),
        jobs = settings.jobs,
        dir = %songs_dir.display(),
        "converting songs"
    );

    let shared = Arc::new(settings.clone());
    let output_dir = output_dir.to_path_buf();
    let outcomes = run_blocking(songs, settings.jobs, move |source| {
        convert_file(source, &output_dir.join(output_name(source)), &shared)
    })
    .await?;

    let mut report = BatchReport::default();
    for (source, outcome) in outcomes {
        match outcome {
            Ok(converted) => report.converted.push(converted),
            Err(e) => {
                warn!(file = %display_name(&source), "{:#}", e);
                report.failed.push(Failed {
                    source,
                    error: format!("{:#}", e),
                });
            }
        }
    }
    Ok(report)
}

/// Run `work` on every source on the blocking pool, at most `jobs` at a
/// time. Outcomes come back in input order; a panicking task becomes an
/// error for its own source.
async fn run_blocking<T, F>(
    sources: Vec<PathBuf>,
    jobs: usize,
    work: F,
) -> Result<Vec<(PathBuf, Result<T>)>>
where
    T: Send + 'static,
    F: Fn(&Path) -> Result<T> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(jobs.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::new();

    for (index, source) in sources.into_iter().enumerate() {
        let permit = semaphore.clone().acquire_owned().await?;
        let work = work.clone();
        let path = source.clone();
        let handle = tasks.spawn_blocking(move || {
            let _permit = permit;
            work(path.as_path())
        });
        pending.insert(handle.id(), (index, source));
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(e) => (
                e.id(),
                Err(anyhow::Error::new(e).context("conversion task panicked")),
            ),
        };
        if let Some((index, source)) = pending.remove(&id) {
            outcomes.push((index, source, outcome));
        }
    }
    outcomes.sort_by_key(|(index, _, _)| *index);

    Ok(outcomes
        .into_iter()
        .map(|(_, source, outcome)| (source, outcome))
        .collect())
}

/// Summary of a successful combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combined {
    pub output: PathBuf,
    pub tracks: usize,
    pub warnings: usize,
}

/// Convert several songs into one multi-track file, one track per song in
/// the given order.
///
/// Any failing song aborts the whole operation and nothing is written.
pub fn convert_and_combine(
    song_paths: &[PathBuf],
    output_path: &Path,
    settings: &Settings,
) -> Result<Combined> {
    let mut tunes = Vec::with_capacity(song_paths.len());
    let mut warnings = 0;
    for path in song_paths {
        let parsed = load_song(path, &settings.parse)?;
        warnings += parsed.warnings().count();
        tunes.push(parsed.value);
    }

    let doc = abc::combine_documents(&tunes, &settings.midi).with_context(|| {
        match find_failing(song_paths, &tunes, &settings.midi) {
            Some(path) => format!("failed to convert {}", path.display()),
            None => "failed to combine songs".to_string(),
        }
    })?;

    write_atomic(output_path, &doc.to_bytes())?;
    info!(
        songs = song_paths.len(),
        output = %output_path.display(),
        "combined songs"
    );

    Ok(Combined {
        output: output_path.to_path_buf(),
        tracks: doc.tracks.len(),
        warnings,
    })
}

/// The first song that fails to encode on its own.
fn find_failing<'a>(
    paths: &'a [PathBuf],
    tunes: &[NotationDocument],
    params: &MidiParams,
) -> Option<&'a PathBuf> {
    paths
        .iter()
        .zip(tunes)
        .find(|(_, tune)| abc::to_midi_document(tune, params).is_err())
        .map(|(path, _)| path)
}

/// Write through a temp file in the destination directory, then rename, so
/// a failed write never leaves a partial file behind.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.persist(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}

fn output_name(source: &Path) -> PathBuf {
    let mut name = source.file_stem().unwrap_or(source.as_os_str()).to_os_string();
    name.push(".mid");
    PathBuf::from(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
