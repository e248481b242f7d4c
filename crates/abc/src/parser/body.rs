//! Tune body parsing: scanner tokens to per-voice events.
//!
//! Each logical line starts from the current voice's [`VoiceContext`] and
//! keeps its explicit accidentals in a line-local override table that is
//! dropped when the line ends. Ties are kept on the pending events and
//! resolved by [`collapse_ties`] once the whole body has been read.

use std::iter::Peekable;

use num_rational::Ratio;
use tracing::debug;

use crate::ast::{
    Accidental, Chord, Duration, Event, Header, Meter, Note, NoteName, Pitch, Rest, UnitLength,
    Voice, VoiceDef,
};
use crate::error::{Error, Result};
use crate::feedback::FeedbackCollector;

use super::header::{
    is_transpose_instruction, note_transpose_hint, parse_unit_length, parse_voice_def,
};
use super::key::{parse_key_field, KeyProfile};
use super::scanner::{Length, RestKind, Scanner, Token};

type Tokens<'a> = Peekable<Scanner<'a>>;

/// What a line of the body is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceContext {
    pub profile: KeyProfile,
    /// Current `L:` expressed in header default lengths.
    pub unit_scale: Ratio<u32>,
}

#[derive(Debug)]
struct VoiceState {
    voice: Voice,
    context: VoiceContext,
}

impl VoiceState {
    fn new(def: &VoiceDef, context: VoiceContext) -> Self {
        let mut voice = Voice::new(def.id.clone());
        voice.name = def.name.clone();
        VoiceState { voice, context }
    }
}

/// State that lives for one logical line only.
#[derive(Debug, Default)]
struct LineState {
    /// Explicit accidentals seen so far, per letter
    overrides: [Option<i8>; 7],
    tuplet: Option<TupletState>,
}

impl LineState {
    /// Scale factor for the next event, if a tuplet is open.
    fn next_tuplet_factor(&mut self) -> Option<Ratio<u32>> {
        let tuplet = self.tuplet.as_mut()?;
        let factor = tuplet.factor;
        tuplet.remaining -= 1;
        if tuplet.remaining == 0 {
            self.tuplet = None;
        }
        Some(factor)
    }
}

#[derive(Debug)]
struct TupletState {
    factor: Ratio<u32>,
    remaining: u8,
}

/// Collects events for every voice of one tune.
#[derive(Debug)]
pub struct BodyParser {
    header_unit: UnitLength,
    base: VoiceContext,
    compound_meter: bool,
    strict: bool,
    voices: Vec<VoiceState>,
    /// Index into `voices` that note lines go to
    current: usize,
    implicit_voice: bool,
}

impl BodyParser {
    pub fn new(header: &Header, strict: bool) -> Self {
        let base = VoiceContext {
            profile: KeyProfile::for_key(&header.key),
            unit_scale: Ratio::from_integer(1),
        };

        let mut voices: Vec<VoiceState> = header
            .voice_defs
            .iter()
            .map(|def| VoiceState::new(def, base))
            .collect();
        let implicit_voice = voices.is_empty();
        if implicit_voice {
            voices.push(VoiceState::new(&VoiceDef::new(Voice::DEFAULT_ID), base));
        }

        let compound_meter = matches!(
            header.meter,
            Some(Meter::Simple { numerator, .. }) if numerator > 3 && numerator % 3 == 0
        );

        BodyParser {
            header_unit: header.unit_length,
            base,
            compound_meter,
            strict,
            voices,
            current: 0,
            implicit_voice,
        }
    }

    fn context(&self) -> VoiceContext {
        self.voices[self.current].context
    }

    /// Apply a field line or inline field found in the body.
    pub fn apply_field(
        &mut self,
        header: &mut Header,
        name: char,
        value: &str,
        collector: &mut FeedbackCollector,
    ) -> Result<()> {
        let line = collector.line();

        match name {
            'K' => {
                let field = parse_key_field(value, line)?;
                for (attr, attr_value) in field.attributes {
                    note_transpose_hint(header, attr, attr_value, collector);
                }
                self.voices[self.current].context.profile = KeyProfile::for_key(&field.key);
            }
            'L' => {
                let unit = parse_unit_length(value, line)?;
                self.voices[self.current].context.unit_scale =
                    unit.ratio() / self.header_unit.ratio();
            }
            'V' => {
                let def = parse_voice_def(value, line)?;
                self.switch_voice(header, def, collector);
            }
            'Q' => self.unsupported(line, "tempo change 'Q:' in the tune body", collector)?,
            'I' if is_transpose_instruction(value) => {
                header.transpose_hints.push(format!("I:{}", value.trim()));
                collector.info(format!("transposition hint 'I:{}' ignored", value.trim()));
            }
            'M' | 'w' | 'W' => {}
            other => collector.info(format!("field '{}:' in the tune body ignored", other)),
        }

        Ok(())
    }

    fn switch_voice(&mut self, header: &mut Header, def: VoiceDef, collector: &mut FeedbackCollector) {
        if let Some(t) = def.transpose {
            note_transpose_hint(header, "transpose", &t.to_string(), collector);
        }
        if let Some(o) = def.octave {
            note_transpose_hint(header, "octave", &o.to_string(), collector);
        }

        match self.voices.iter().position(|v| v.voice.id == def.id) {
            Some(index) => {
                if def.name.is_some() {
                    self.voices[index].voice.name = def.name;
                }
                self.current = index;
            }
            None => {
                debug!(voice = %def.id, "voice declared in tune body");
                self.voices.push(VoiceState::new(&def, self.base));
                header.voice_defs.push(def);
                self.current = self.voices.len() - 1;
            }
        }
    }

    /// Record a construct that needs measure tracking or other unmodeled
    /// semantics. Fails in strict mode.
    fn unsupported(
        &self,
        line: usize,
        construct: impl Into<String>,
        collector: &mut FeedbackCollector,
    ) -> Result<()> {
        let construct = construct.into();
        if self.strict {
            return Err(Error::UnsupportedConstruct { line, construct });
        }
        collector.warning_with_suggestion(
            format!("{} is not supported, output may differ from the tune", construct),
            "write the passage out without it",
        );
        Ok(())
    }

    /// Parse one logical note line into the current voice.
    pub fn parse_line(
        &mut self,
        header: &mut Header,
        text: &str,
        collector: &mut FeedbackCollector,
    ) -> Result<()> {
        let line = collector.line();
        let mut state = LineState::default();
        let mut tokens = Scanner::new(text).peekable();

        while let Some(token) = tokens.next() {
            match token {
                Token::Accidental(accidental) => match tokens.next() {
                    Some(Token::Note(letter)) => {
                        let note = self.note(&mut state, Some(accidental), letter, &mut tokens, line)?;
                        self.push_event(&mut state, Event::Note(note), line)?;
                    }
                    _ => return Err(dangling_accidental(accidental, line)),
                },
                Token::Note(letter) => {
                    let note = self.note(&mut state, None, letter, &mut tokens, line)?;
                    self.push_event(&mut state, Event::Note(note), line)?;
                }
                Token::Rest(kind) => {
                    let length = take_length(&mut tokens);
                    match kind {
                        RestKind::MultiMeasure(bars) => self.unsupported(
                            line,
                            format!("multi-measure rest 'Z{}'", bars),
                            collector,
                        )?,
                        RestKind::Visible | RestKind::Invisible => {
                            let duration = self.duration(length, line)?;
                            self.push_event(&mut state, Event::Rest(Rest::new(duration)), line)?;
                        }
                    }
                }
                Token::ChordStart => self.chord(&mut state, &mut tokens, line, collector)?,
                Token::Tuplet { p, q, r } => {
                    state.tuplet = self.tuplet(p, q, r, collector);
                }
                Token::Bar(bar) => {
                    if bar.needs_measures() {
                        self.unsupported(line, format!("repeat bar '{}'", bar.as_abc()), collector)?;
                    }
                }
                Token::BrokenRhythm(marks) => {
                    self.unsupported(line, format!("broken rhythm '{}'", marks), collector)?
                }
                Token::Field { name, value } => {
                    let voice = self.current;
                    self.apply_field(header, name, value, collector)?;
                    if name == 'K' || self.current != voice {
                        state.overrides = [None; 7];
                    }
                }
                Token::Decoration(_) => {}
                Token::Ignored(text) => {
                    if !is_silent(text) {
                        collector.warning(format!("Skipping unknown character '{}'", text));
                    }
                }
                stray @ (Token::Octave(_) | Token::Length(_) | Token::Tie | Token::ChordEnd) => {
                    collector.warning(format!("stray {} ignored", describe(&stray)));
                }
            }
        }

        Ok(())
    }

    /// Read one note whose letter has just been consumed.
    fn note(
        &self,
        state: &mut LineState,
        accidental: Option<Accidental>,
        letter: char,
        tokens: &mut Tokens<'_>,
        line: usize,
    ) -> Result<Note> {
        let name = NoteName::from_char(letter)
            .ok_or_else(|| Error::body(line, format!("'{}' is not a note", letter)))?;

        let base_octave: i8 = if letter.is_ascii_lowercase() { 1 } else { 0 };
        let shift = match tokens.next_if(|t| matches!(t, Token::Octave(_))) {
            Some(Token::Octave(n)) => n,
            _ => 0,
        };

        let alteration = match accidental {
            Some(acc) => {
                let offset = acc.to_semitone_offset();
                state.overrides[name.index()] = Some(offset);
                offset
            }
            None => state.overrides[name.index()]
                .unwrap_or_else(|| self.context().profile.alteration(name)),
        };

        let duration = self.duration(take_length(tokens), line)?;
        let tie = tokens.next_if_eq(&Token::Tie).is_some();

        Ok(Note {
            pitch: Pitch {
                letter: name,
                octave: base_octave.saturating_add(shift),
                accidental,
                alteration,
            },
            duration,
            tie,
        })
    }

    /// Resolve a written length against the current unit.
    fn duration(&self, length: Option<Length>, line: usize) -> Result<Duration> {
        let written = match length {
            None => Duration::unit(),
            Some(Length {
                numerator,
                denominator,
            }) => Duration::checked(numerator, denominator).ok_or_else(|| {
                Error::body(line, format!("invalid note length {}/{}", numerator, denominator))
            })?,
        };
        written
            .checked_scale(self.context().unit_scale)
            .ok_or_else(|| Error::body(line, "note length out of range"))
    }

    /// Read a chord after its opening `[`.
    fn chord(
        &mut self,
        state: &mut LineState,
        tokens: &mut Tokens<'_>,
        line: usize,
        collector: &mut FeedbackCollector,
    ) -> Result<()> {
        let mut notes = Vec::new();

        loop {
            match tokens.next() {
                Some(Token::ChordEnd) => break,
                Some(Token::Note(letter)) => {
                    notes.push(self.note(state, None, letter, tokens, line)?);
                }
                Some(Token::Accidental(accidental)) => match tokens.next() {
                    Some(Token::Note(letter)) => {
                        notes.push(self.note(state, Some(accidental), letter, tokens, line)?);
                    }
                    _ => return Err(dangling_accidental(accidental, line)),
                },
                Some(Token::Decoration(_)) | Some(Token::Ignored(_)) => {}
                Some(other) => {
                    collector.warning(format!("{} inside a chord ignored", describe(&other)));
                }
                None => {
                    collector.warning("chord is missing its closing ']'");
                    break;
                }
            }
        }

        let multiplier = match take_length(tokens) {
            Some(Length {
                numerator,
                denominator,
            }) => Duration::checked(numerator, denominator)
                .ok_or_else(|| {
                    Error::body(line, format!("invalid chord length {}/{}", numerator, denominator))
                })?
                .ratio(),
            None => Ratio::from_integer(1),
        };
        let tie = tokens.next_if_eq(&Token::Tie).is_some();

        if notes.is_empty() {
            return Ok(());
        }

        for note in &mut notes {
            note.duration = note
                .duration
                .checked_scale(multiplier)
                .ok_or_else(|| Error::body(line, "chord length out of range"))?;
            note.tie = false;
        }

        let event = if notes.len() == 1 {
            let mut note = notes.swap_remove(0);
            note.tie = tie;
            Event::Note(note)
        } else {
            if tie {
                collector.warning("tie after a chord ignored");
            }
            Event::Chord(Chord { notes })
        };
        self.push_event(state, event, line)
    }

    fn tuplet(
        &self,
        p: u8,
        q: Option<u8>,
        r: Option<u8>,
        collector: &mut FeedbackCollector,
    ) -> Option<TupletState> {
        let q = q.unwrap_or_else(|| default_tuplet_q(p, self.compound_meter));
        let r = r.unwrap_or(p);
        if p < 2 || q == 0 || r == 0 {
            collector.warning(format!("tuplet '({}:{}:{}' ignored", p, q, r));
            return None;
        }
        Some(TupletState {
            factor: Ratio::new(u32::from(q), u32::from(p)),
            remaining: r,
        })
    }

    fn push_event(&mut self, state: &mut LineState, event: Event, line: usize) -> Result<()> {
        let event = match state.next_tuplet_factor() {
            Some(factor) => scale_event(event, factor)
                .ok_or_else(|| Error::body(line, "tuplet length out of range"))?,
            None => event,
        };
        self.voices[self.current].voice.events.push(event);
        Ok(())
    }

    /// Resolve pending ties and hand out the finished voices.
    pub fn finish(self) -> Vec<Voice> {
        let mut voices: Vec<Voice> = self
            .voices
            .into_iter()
            .map(|state| {
                let mut voice = state.voice;
                voice.events = collapse_ties(voice.events);
                voice
            })
            .collect();

        // An unused implicit voice only matters when it is the only one
        if self.implicit_voice && voices.len() > 1 && voices[0].events.is_empty() {
            voices.remove(0);
        }

        debug!(
            voices = voices.len(),
            events = voices.iter().map(|v| v.events.len()).sum::<usize>(),
            "parsed tune body"
        );
        voices
    }
}

/// Merge every tied note into the following note of the same sounding
/// pitch. A tie that is followed by anything else is dropped.
pub fn collapse_ties(events: Vec<Event>) -> Vec<Event> {
    let mut out: Vec<Event> = Vec::with_capacity(events.len());

    for event in events {
        if let (Some(Event::Note(prev)), Event::Note(next)) = (out.last_mut(), &event) {
            if prev.tie && prev.pitch.semitone() == next.pitch.semitone() {
                if let Some(total) = prev.duration.checked_add(&next.duration) {
                    prev.duration = total;
                    prev.tie = next.tie;
                    continue;
                }
            }
        }
        if let Some(Event::Note(prev)) = out.last_mut() {
            prev.tie = false;
        }
        out.push(event);
    }

    if let Some(Event::Note(last)) = out.last_mut() {
        last.tie = false;
    }
    out
}

fn scale_event(event: Event, factor: Ratio<u32>) -> Option<Event> {
    Some(match event {
        Event::Note(mut note) => {
            note.duration = note.duration.checked_scale(factor)?;
            Event::Note(note)
        }
        Event::Rest(rest) => Event::Rest(Rest::new(rest.duration.checked_scale(factor)?)),
        Event::Chord(mut chord) => {
            for note in &mut chord.notes {
                note.duration = note.duration.checked_scale(factor)?;
            }
            Event::Chord(chord)
        }
    })
}

/// Notes in the time of `q` for a tuplet of `p` when `q` is not written.
fn default_tuplet_q(p: u8, compound_meter: bool) -> u8 {
    match p {
        2 | 4 | 8 => 3,
        3 | 6 => 2,
        5 | 7 | 9 if compound_meter => 3,
        _ => 2,
    }
}

fn take_length(tokens: &mut Tokens<'_>) -> Option<Length> {
    match tokens.next_if(|t| matches!(t, Token::Length(_))) {
        Some(Token::Length(length)) => Some(length),
        _ => None,
    }
}

fn dangling_accidental(accidental: Accidental, line: usize) -> Error {
    Error::body(
        line,
        format!("accidental '{}' is not followed by a note", accidental.as_abc()),
    )
}

/// Characters that carry no meaning for playback.
fn is_silent(text: &str) -> bool {
    text.trim().is_empty() || matches!(text, "(" | ")" | "\\" | "`" | "y")
}

fn describe(token: &Token<'_>) -> String {
    match token {
        Token::Field { name, .. } => format!("field '[{}:]'", name),
        Token::Note(letter) => format!("note '{}'", letter),
        Token::Accidental(acc) => format!("accidental '{}'", acc.as_abc()),
        Token::Octave(_) => "octave mark".to_string(),
        Token::Length(length) => format!("length '{}/{}'", length.numerator, length.denominator),
        Token::Rest(_) => "rest".to_string(),
        Token::Tie => "tie '-'".to_string(),
        Token::Decoration(text) | Token::BrokenRhythm(text) | Token::Ignored(text) => {
            format!("'{}'", text)
        }
        Token::ChordStart => "'['".to_string(),
        Token::ChordEnd => "']'".to_string(),
        Token::Tuplet { p, .. } => format!("tuplet '({}'", p),
        Token::Bar(bar) => format!("bar '{}'", bar.as_abc()),
    }
}
