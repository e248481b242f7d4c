//! ABC song notation parser and MIDI generator.
//!
//! Parses the ABC dialect used by game song files into a structured AST and
//! renders it as a Standard MIDI File, either one file per tune or several
//! tunes combined as parallel tracks.
//!
//! # Example
//!
//! ```
//! use abc::{parse, to_midi, MidiParams};
//!
//! let abc = r#"
//! X:1
//! T:Test Tune
//! M:4/4
//! L:1/8
//! K:G
//! GABc dedB|cBAG D2D2|
//! "#;
//!
//! let result = parse(abc).unwrap();
//! if !result.has_warnings() {
//!     let midi_bytes = to_midi(&result.value, &MidiParams::default()).unwrap();
//!     assert_eq!(&midi_bytes[..4], b"MThd");
//! }
//! ```

pub mod ast;
pub mod error;
pub mod feedback;
pub mod midi;
pub mod parser;

pub use ast::*;
pub use error::{Error, Result};
pub use feedback::{Feedback, FeedbackLevel, ParseResult};
pub use midi::MidiDocument;

/// Options controlling how notation is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Turn constructs that would otherwise be skipped with a warning
    /// (repeats, broken rhythm, tempo changes) into errors.
    pub strict: bool,
    /// Quarter-note tempo used when a tune has no `Q:` field.
    pub default_bpm: u16,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            strict: false,
            default_bpm: Tempo::DEFAULT_BPM,
        }
    }
}

/// Parse ABC notation into a [`NotationDocument`] with default options.
///
/// This is a generous parser: anything it can skip is reported as feedback.
/// Malformed fields and notes are errors.
pub fn parse(input: &str) -> Result<ParseResult<NotationDocument>> {
    parse_with(input, &ParseOptions::default())
}

pub fn parse_with(input: &str, options: &ParseOptions) -> Result<ParseResult<NotationDocument>> {
    parser::parse_document(input, options)
}

/// Parameters for MIDI generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiParams {
    /// MIDI velocity for notes (1-127)
    pub velocity: u8,
    /// Ticks per quarter note (typically 480)
    pub ticks_per_beat: u16,
    /// First MIDI channel (0-15, default 0). Further tracks count up from
    /// here and skip channel 9.
    pub channel: u8,
    /// Program change emitted at the start of every track, unless the tune
    /// sets its own with `%%MIDI program`.
    pub program: Option<u8>,
}

impl MidiParams {
    /// Division written to the file header, clamped to the metrical range.
    pub fn division(&self) -> u16 {
        self.ticks_per_beat.clamp(1, 0x7FFF)
    }
}

impl Default for MidiParams {
    fn default() -> Self {
        MidiParams {
            velocity: 80,
            ticks_per_beat: 480,
            channel: 0,
            program: None,
        }
    }
}

/// Render a tune as an in-memory MIDI document, one track per voice.
pub fn to_midi_document(tune: &NotationDocument, params: &MidiParams) -> Result<MidiDocument> {
    midi::document(tune, params)
}

/// Convert a parsed tune to MIDI bytes (SMF format 0 for a single voice,
/// format 1 otherwise).
pub fn to_midi(tune: &NotationDocument, params: &MidiParams) -> Result<Vec<u8>> {
    Ok(to_midi_document(tune, params)?.to_bytes())
}

/// Render several tunes as one document, one track per tune in input order.
pub fn combine_documents(tunes: &[NotationDocument], params: &MidiParams) -> Result<MidiDocument> {
    midi::combine(tunes, params)
}

/// Combine several tunes into a single MIDI file.
pub fn combine(tunes: &[NotationDocument], params: &MidiParams) -> Result<Vec<u8>> {
    Ok(combine_documents(tunes, params)?.to_bytes())
}
