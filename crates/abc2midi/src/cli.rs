//! Command line definition.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// abc2midi - convert ABC game song files to MIDI
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file used in place of ./abc2midi.toml
    #[arg(long, global = true, env = "ABC2MIDI_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Fail on repeats, broken rhythm and other constructs that are
    /// otherwise skipped with a warning
    #[arg(long, global = true)]
    pub strict: bool,

    /// Concurrent conversions in bulk mode (0 = one per CPU)
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Bulk convert a directory of ABC songs to MIDI files
    ConvertSongs {
        /// The directory containing the ABC songs
        #[arg(long)]
        songs_dir: PathBuf,

        /// The directory to save the MIDI files (created if missing)
        #[arg(long)]
        output_dir: PathBuf,
    },

    /// Convert and combine one or more ABC songs into a single MIDI file as
    /// separate tracks
    ConvertAndCombine {
        /// The paths to one or more ABC songs, in track order
        #[arg(long, required = true, num_args = 1..)]
        song_paths: Vec<PathBuf>,

        /// The path to save the combined MIDI file
        #[arg(long)]
        output_path: PathBuf,
    },
}
