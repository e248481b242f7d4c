//! Document model produced by the parser.
//!
//! Everything here is fully resolved: accidentals carry an absolute semitone
//! alteration and durations are exact rationals relative to the header's
//! default note length.

use std::fmt;

use num_rational::Ratio;
use num_traits::CheckedAdd;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One parsed tune.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotationDocument {
    pub header: Header,
    pub voices: Vec<Voice>,
}

impl NotationDocument {
    pub fn title(&self) -> &str {
        &self.header.title
    }

    /// Voices that contain at least one event.
    pub fn sounding_voices(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter().filter(|v| !v.events.is_empty())
    }
}

impl Default for NotationDocument {
    fn default() -> Self {
        NotationDocument {
            header: Header::default(),
            voices: vec![Voice::new(Voice::DEFAULT_ID)],
        }
    }
}

/// Tune header (metadata fields before the body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub reference: u32,
    pub title: String,
    pub titles: Vec<String>,
    pub key: Key,
    /// Retained for completeness; output timing never depends on it.
    pub meter: Option<Meter>,
    pub unit_length: UnitLength,
    pub tempo: Tempo,
    pub composer: Option<String>,
    pub rhythm: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub voice_defs: Vec<VoiceDef>,
    pub other_fields: Vec<InfoField>,
    /// MIDI program number from a `%%MIDI program` directive (0-127)
    pub midi_program: Option<u8>,
    /// Transposition hints found in the tune. Recognized, never applied.
    pub transpose_hints: Vec<String>,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            reference: 1,
            title: String::new(),
            titles: Vec::new(),
            key: Key::default(),
            meter: None,
            unit_length: UnitLength::default(),
            tempo: Tempo::default(),
            composer: None,
            rhythm: None,
            source: None,
            notes: None,
            voice_defs: Vec::new(),
            other_fields: Vec::new(),
            midi_program: None,
            transpose_hints: Vec::new(),
        }
    }
}

/// Key signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key {
    pub root: NoteName,
    pub accidental: Option<Accidental>,
    pub mode: Mode,
    /// Extra accidentals written after the key, e.g. `K:D ^g`.
    pub explicit_accidentals: Vec<(Accidental, NoteName)>,
}

impl Default for Key {
    fn default() -> Self {
        Key {
            root: NoteName::C,
            accidental: None,
            mode: Mode::Major,
            explicit_accidentals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteName {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl NoteName {
    /// Convert to semitone offset from C (0-11)
    pub fn to_semitone(&self) -> i8 {
        match self {
            NoteName::C => 0,
            NoteName::D => 2,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::G => 7,
            NoteName::A => 9,
            NoteName::B => 11,
        }
    }

    /// Position in C D E F G A B order, for indexing per-letter tables.
    pub fn index(&self) -> usize {
        match self {
            NoteName::C => 0,
            NoteName::D => 1,
            NoteName::E => 2,
            NoteName::F => 3,
            NoteName::G => 4,
            NoteName::A => 5,
            NoteName::B => 6,
        }
    }

    /// Parse a single letter, either case.
    pub fn from_char(c: char) -> Option<NoteName> {
        match c.to_ascii_uppercase() {
            'C' => Some(NoteName::C),
            'D' => Some(NoteName::D),
            'E' => Some(NoteName::E),
            'F' => Some(NoteName::F),
            'G' => Some(NoteName::G),
            'A' => Some(NoteName::A),
            'B' => Some(NoteName::B),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            NoteName::C => 'C',
            NoteName::D => 'D',
            NoteName::E => 'E',
            NoteName::F => 'F',
            NoteName::G => 'G',
            NoteName::A => 'A',
            NoteName::B => 'B',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accidental {
    DoubleSharp,
    Sharp,
    Natural,
    Flat,
    DoubleFlat,
}

impl Accidental {
    /// Convert to semitone offset
    pub fn to_semitone_offset(&self) -> i8 {
        match self {
            Accidental::DoubleSharp => 2,
            Accidental::Sharp => 1,
            Accidental::Natural => 0,
            Accidental::Flat => -1,
            Accidental::DoubleFlat => -2,
        }
    }

    /// ABC spelling of the mark.
    pub fn as_abc(&self) -> &'static str {
        match self {
            Accidental::DoubleSharp => "^^",
            Accidental::Sharp => "^",
            Accidental::Natural => "=",
            Accidental::Flat => "_",
            Accidental::DoubleFlat => "__",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    Major,
    Minor,
    Ionian,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
}

impl Mode {
    /// Parse mode from string (case-insensitive, allows abbreviations)
    pub fn parse(s: &str) -> Option<Mode> {
        let s = s.to_lowercase();
        match s.as_str() {
            "maj" | "major" | "" => Some(Mode::Major),
            "min" | "minor" | "m" => Some(Mode::Minor),
            "ion" | "ionian" => Some(Mode::Ionian),
            "dor" | "dorian" => Some(Mode::Dorian),
            "phr" | "phrygian" => Some(Mode::Phrygian),
            "lyd" | "lydian" => Some(Mode::Lydian),
            "mix" | "mixolydian" => Some(Mode::Mixolydian),
            "aeo" | "aeolian" => Some(Mode::Aeolian),
            "loc" | "locrian" => Some(Mode::Locrian),
            _ => None,
        }
    }

    /// Fifths to add to the major-key signature of the same root.
    pub fn fifths_offset(&self) -> i8 {
        match self {
            Mode::Major | Mode::Ionian => 0,
            Mode::Minor | Mode::Aeolian => -3,
            Mode::Dorian => -2,
            Mode::Phrygian => -4,
            Mode::Lydian => 1,
            Mode::Mixolydian => -1,
            Mode::Locrian => -5,
        }
    }
}

/// Meter/time signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Meter {
    Simple { numerator: u8, denominator: u8 },
    Common, // C = 4/4
    Cut,    // C| = 2/2
    None,   // Free meter
}

/// Unit note length (L: field), as a fraction of a whole note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLength {
    pub numerator: u16,
    pub denominator: u16,
}

impl UnitLength {
    pub fn ratio(&self) -> Ratio<u32> {
        Ratio::new(u32::from(self.numerator), u32::from(self.denominator))
    }
}

impl Default for UnitLength {
    fn default() -> Self {
        UnitLength {
            numerator: 1,
            denominator: 8,
        }
    }
}

/// Tempo (Q: field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    /// Length that receives one beat, as a fraction of a whole note.
    pub beat_unit: Duration,
    pub bpm: u16,
    pub text: Option<String>,
}

impl Tempo {
    /// Tempo assumed when a tune has no `Q:` field. Scales all output timing.
    pub const DEFAULT_BPM: u16 = 120;

    /// Quarter-note beats at the given BPM.
    pub fn quarter(bpm: u16) -> Self {
        Tempo {
            beat_unit: Duration::new(1, 4),
            bpm,
            text: None,
        }
    }

    /// Largest value the three-byte MIDI tempo meta event can hold.
    pub const MAX_MICROS_PER_QUARTER: u32 = 0xFF_FFFF;

    /// Microseconds per quarter note, as stored in the MIDI tempo meta event.
    ///
    /// Tempos too slow for three bytes, or so fast they round to zero, are
    /// [`Error::Timing`].
    pub fn micros_per_quarter(&self) -> Result<u32> {
        // 60e6 / (bpm * beat * 4)
        let beat = self.beat_unit.ratio();
        let quarters_per_minute = Ratio::new(
            u64::from(self.bpm.max(1)) * u64::from(*beat.numer()) * 4,
            u64::from(*beat.denom()),
        );
        let micros = (Ratio::from_integer(60_000_000u64) / quarters_per_minute)
            .round()
            .to_integer();
        u32::try_from(micros)
            .ok()
            .filter(|us| (1..=Self::MAX_MICROS_PER_QUARTER).contains(us))
            .ok_or_else(|| {
                Error::Timing(format!(
                    "tempo {}={} is {} us per quarter, outside 1..={}",
                    self.beat_unit,
                    self.bpm,
                    micros,
                    Self::MAX_MICROS_PER_QUARTER
                ))
            })
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Tempo::quarter(Tempo::DEFAULT_BPM)
    }
}

/// Generic info field (for fields we don't specifically handle)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoField {
    pub field_type: char,
    pub value: String,
}

/// Voice definition from a V: field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceDef {
    pub id: String,
    pub name: Option<String>,
    /// `octave=` hint; recorded, not applied.
    pub octave: Option<i8>,
    /// `transpose=` hint; recorded, not applied.
    pub transpose: Option<i8>,
}

impl VoiceDef {
    pub fn new(id: impl Into<String>) -> Self {
        VoiceDef {
            id: id.into(),
            name: None,
            octave: None,
            transpose: None,
        }
    }
}

/// A named melodic line, destined for one MIDI track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: Option<String>,
    pub events: Vec<Event>,
}

impl Voice {
    /// Id of the implicit voice of a tune without `V:` fields.
    pub const DEFAULT_ID: &'static str = "1";

    pub fn new(id: impl Into<String>) -> Self {
        Voice {
            id: id.into(),
            name: None,
            events: Vec::new(),
        }
    }
}

/// A musical event in a voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Note(Note),
    Rest(Rest),
    Chord(Chord),
}

impl Event {
    /// How far the event moves the time cursor.
    pub fn advance(&self) -> Duration {
        match self {
            Event::Note(note) => note.duration,
            Event::Rest(rest) => rest.duration,
            Event::Chord(chord) => chord.duration(),
        }
    }
}

/// A resolved pitch.
///
/// Octave 0 is the uppercase octave (`C` = middle C, MIDI 60) and octave 1
/// the lowercase one (`c` = MIDI 72).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch {
    pub letter: NoteName,
    pub octave: i8,
    /// The mark written on the note, if any.
    pub accidental: Option<Accidental>,
    /// Resolved semitone alteration (explicit mark, line override or key).
    pub alteration: i8,
}

impl Pitch {
    pub fn new(letter: NoteName, octave: i8) -> Self {
        Pitch {
            letter,
            octave,
            accidental: None,
            alteration: 0,
        }
    }

    pub fn with_alteration(mut self, alteration: i8) -> Self {
        self.alteration = alteration;
        self
    }

    /// MIDI note number before range checking.
    pub fn semitone(&self) -> i16 {
        60 + 12 * i16::from(self.octave)
            + i16::from(self.letter.to_semitone())
            + i16::from(self.alteration)
    }

    /// Convert to a MIDI note number, rejecting anything outside 0..=127.
    pub fn to_midi(&self) -> Result<u8> {
        let midi = self.semitone();
        u8::try_from(midi)
            .ok()
            .filter(|n| *n <= 127)
            .ok_or_else(|| Error::OutOfRange {
                pitch: self.to_string(),
                midi,
            })
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(acc) = self.accidental {
            f.write_str(acc.as_abc())?;
        }
        let letter = self.letter.as_char();
        if self.octave >= 1 {
            write!(f, "{}", letter.to_ascii_lowercase())?;
            for _ in 1..self.octave {
                f.write_str("'")?;
            }
        } else {
            write!(f, "{}", letter)?;
            for _ in self.octave..0 {
                f.write_str(",")?;
            }
        }
        Ok(())
    }
}

/// A single note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: Pitch,
    pub duration: Duration,
    /// Merges with the following note of the same pitch.
    pub tie: bool,
}

impl Note {
    /// Create a simple note with default duration
    pub fn new(pitch: Pitch) -> Self {
        Note {
            pitch,
            duration: Duration::unit(),
            tie: false,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn tied(mut self) -> Self {
        self.tie = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub duration: Duration,
}

impl Rest {
    pub fn new(duration: Duration) -> Self {
        Rest { duration }
    }
}

/// Simultaneous notes. Each note sounds for its own duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chord {
    pub notes: Vec<Note>,
}

impl Chord {
    /// Time advance: the shortest note of the chord.
    pub fn duration(&self) -> Duration {
        self.notes
            .iter()
            .map(|n| n.duration)
            .min()
            .unwrap_or_default()
    }
}

/// A positive rational length, in multiples of the default note length
/// (or of a whole note, for tempo beat units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Duration(Ratio<u32>);

impl Duration {
    /// Panics if either part is zero; use [`Duration::checked`] for input.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        assert!(numerator > 0, "duration must be positive");
        Duration(Ratio::new(numerator, denominator))
    }

    pub fn checked(numerator: u32, denominator: u32) -> Option<Self> {
        if numerator == 0 || denominator == 0 {
            None
        } else {
            Some(Duration(Ratio::new(numerator, denominator)))
        }
    }

    pub fn from_ratio(ratio: Ratio<u32>) -> Option<Self> {
        Self::checked(*ratio.numer(), *ratio.denom())
    }

    pub fn unit() -> Self {
        Duration(Ratio::from_integer(1))
    }

    pub fn ratio(&self) -> Ratio<u32> {
        self.0
    }

    pub fn numerator(&self) -> u32 {
        *self.0.numer()
    }

    pub fn denominator(&self) -> u32 {
        *self.0.denom()
    }

    pub fn checked_add(&self, other: &Duration) -> Option<Duration> {
        self.0.checked_add(&other.0).map(Duration)
    }

    /// Multiply by a positive factor.
    pub fn checked_scale(&self, factor: Ratio<u32>) -> Option<Duration> {
        num_traits::CheckedMul::checked_mul(&self.0, &factor).and_then(Self::from_ratio)
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::unit()
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) fn widen(r: Ratio<u32>) -> Ratio<u64> {
    Ratio::new(u64::from(*r.numer()), u64::from(*r.denom()))
}
