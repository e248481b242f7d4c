//! Errors that abort the conversion of a single tune.
//!
//! Anything the converter can degrade gracefully on is reported as
//! [`Feedback`](crate::Feedback) instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A field line or note token that cannot be interpreted.
    #[error("line {line}: malformed {context}: {message}")]
    NotationFormat {
        line: usize,
        context: String,
        message: String,
    },

    /// Bar-line or transposition dependent content. Only raised in strict
    /// mode; otherwise it is a warning.
    #[error("line {line}: unsupported construct {construct}")]
    UnsupportedConstruct { line: usize, construct: String },

    /// The resolved pitch does not fit in a MIDI note number.
    #[error("pitch {pitch} resolves to MIDI note {midi}, outside 0..=127")]
    OutOfRange { pitch: String, midi: i16 },

    /// A position, gap or tempo that a MIDI file cannot hold.
    #[error("timing out of range: {0}")]
    Timing(String),

    #[error("failed to write MIDI data: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Malformed value in a `<letter>:` field line.
    pub fn field(line: usize, field: char, message: impl Into<String>) -> Self {
        Error::NotationFormat {
            line,
            context: format!("{}: field", field),
            message: message.into(),
        }
    }

    /// Malformed token in a note line.
    pub fn body(line: usize, message: impl Into<String>) -> Self {
        Error::NotationFormat {
            line,
            context: "note".to_string(),
            message: message.into(),
        }
    }

    /// Line number the error refers to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::NotationFormat { line, .. } | Error::UnsupportedConstruct { line, .. } => {
                Some(*line)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
