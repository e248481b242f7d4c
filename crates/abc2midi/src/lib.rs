//! Command line front end for the `abc` crate.
//!
//! Bulk conversion of a song directory and combining several songs into one
//! multi-track MIDI file.

pub mod cli;
pub mod convert;
pub mod logging;
pub mod report;

pub use cli::{Cli, Commands};
pub use convert::{convert_and_combine, convert_songs, Combined, Settings};
pub use report::BatchReport;
