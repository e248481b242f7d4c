//! Voices to absolute-tick MIDI messages.
//!
//! The time cursor is kept as an exact rational position and only rounded
//! when a message is stamped, so rounding never accumulates. Positions whose
//! exact form no longer fits in 64 bits are an error, never a wrap.

use num_rational::Ratio;
use num_traits::{CheckedAdd, CheckedMul};

use crate::ast::{widen, Event, Tempo, UnitLength, Voice};
use crate::error::{Error, Result};

use super::track_channel;

/// A channel or meta message, without timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ProgramChange { channel: u8, program: u8 },
    Tempo { micros_per_quarter: u32 },
    TrackName(String),
}

impl MidiMessage {
    /// Wire bytes of the message, without the delta time.
    ///
    /// Values that do not fit their field are [`Error::Timing`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => vec![0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, key } => vec![0x80 | (channel & 0x0F), key & 0x7F, 0],
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::Tempo { micros_per_quarter } => {
                let us = *micros_per_quarter;
                if us > Tempo::MAX_MICROS_PER_QUARTER {
                    return Err(Error::Timing(format!(
                        "tempo of {} us per quarter does not fit in three bytes",
                        us
                    )));
                }
                vec![
                    0xFF,
                    0x51,
                    0x03,
                    ((us >> 16) & 0xFF) as u8,
                    ((us >> 8) & 0xFF) as u8,
                    (us & 0xFF) as u8,
                ]
            }
            MidiMessage::TrackName(name) => {
                let mut out = vec![0xFF, 0x03];
                let len = u32::try_from(name.len()).unwrap_or(u32::MAX);
                super::container::write_vlq(&mut out, len)?;
                out.extend_from_slice(name.as_bytes());
                out
            }
        };
        Ok(bytes)
    }

    pub fn is_note_off(&self) -> bool {
        matches!(self, MidiMessage::NoteOff { .. })
    }
}

/// A message stamped with its absolute tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMidiEvent {
    pub tick: u64,
    pub message: MidiMessage,
}

impl TimedMidiEvent {
    pub fn new(tick: u64, message: MidiMessage) -> Self {
        TimedMidiEvent { tick, message }
    }
}

/// Everything one track needs besides its events.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackParams {
    pub ticks_per_quarter: u16,
    /// Channel of the first voice; later voices count up from it.
    pub channel: u8,
    pub velocity: u8,
    pub program: Option<u8>,
    pub tempo: Tempo,
    pub name: Option<String>,
}

/// Encode voices into one track's messages.
///
/// Every voice starts at tick 0. Voice `n` plays on the `n`-th channel after
/// `params.channel` (see [`track_channel`]), so overlapping voices never cut
/// each other's notes. The track opens with its name, a program change per
/// channel and exactly one tempo message.
pub fn encode_track(
    voices: &[&Voice],
    unit: UnitLength,
    params: &TrackParams,
) -> Result<Vec<TimedMidiEvent>> {
    let mut events = Vec::new();

    if let Some(name) = &params.name {
        events.push(TimedMidiEvent::new(0, MidiMessage::TrackName(name.clone())));
    }
    if let Some(program) = params.program {
        for index in 0..voices.len().max(1) {
            events.push(TimedMidiEvent::new(
                0,
                MidiMessage::ProgramChange {
                    channel: track_channel(params.channel, index),
                    program,
                },
            ));
        }
    }
    events.push(TimedMidiEvent::new(
        0,
        MidiMessage::Tempo {
            micros_per_quarter: params.tempo.micros_per_quarter()?,
        },
    ));

    let clock = Clock::new(unit, params.ticks_per_quarter);
    for (index, voice) in voices.iter().enumerate() {
        let mut writer = VoiceWriter {
            clock: &clock,
            channel: track_channel(params.channel, index),
            velocity: params.velocity,
            voice_id: &voice.id,
            events: &mut events,
        };
        writer.voice(voice)?;
    }

    Ok(events)
}

/// Converts positions in default note lengths to ticks.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    ticks_per_unit: Ratio<u64>,
}

impl Clock {
    pub fn new(unit: UnitLength, ticks_per_quarter: u16) -> Self {
        // unit is a fraction of a whole note; a whole note is four quarters
        let ticks_per_unit = widen(unit.ratio()) * Ratio::from_integer(4 * u64::from(ticks_per_quarter));
        Clock { ticks_per_unit }
    }

    /// Round half up to the nearest tick. `None` when the exact product
    /// overflows.
    pub fn tick(&self, position: Ratio<u64>) -> Option<u64> {
        let exact = position.checked_mul(&self.ticks_per_unit)?;
        let rounded = exact.checked_add(&Ratio::new(1, 2))?;
        Some(rounded.floor().to_integer())
    }
}

struct VoiceWriter<'a> {
    clock: &'a Clock,
    channel: u8,
    velocity: u8,
    voice_id: &'a str,
    events: &'a mut Vec<TimedMidiEvent>,
}

impl VoiceWriter<'_> {
    fn voice(&mut self, voice: &Voice) -> Result<()> {
        let mut cursor: Ratio<u64> = Ratio::from_integer(0);
        // A tied note still sounding: key and start position
        let mut held: Option<(u8, Ratio<u64>)> = None;

        for event in &voice.events {
            let end = self.advance(cursor, event)?;
            match event {
                Event::Note(note) => {
                    let key = note.pitch.to_midi()?;
                    let start = match held.take() {
                        Some((held_key, held_start)) if held_key == key => held_start,
                        Some((held_key, held_start)) => {
                            self.note(held_key, held_start, cursor)?;
                            cursor
                        }
                        None => cursor,
                    };
                    if note.tie {
                        held = Some((key, start));
                    } else {
                        self.note(key, start, end)?;
                    }
                }
                Event::Rest(_) => {
                    if let Some((key, start)) = held.take() {
                        self.note(key, start, cursor)?;
                    }
                }
                Event::Chord(chord) => {
                    if let Some((key, start)) = held.take() {
                        self.note(key, start, cursor)?;
                    }
                    for note in &chord.notes {
                        let key = note.pitch.to_midi()?;
                        let release = self.later(cursor, note.duration.ratio())?;
                        self.note(key, cursor, release)?;
                    }
                }
            }
            cursor = end;
        }

        if let Some((key, start)) = held {
            self.note(key, start, cursor)?;
        }
        Ok(())
    }

    /// Cursor position after `event`.
    fn advance(&self, cursor: Ratio<u64>, event: &Event) -> Result<Ratio<u64>> {
        self.later(cursor, event.advance().ratio())
    }

    fn later(&self, position: Ratio<u64>, length: Ratio<u32>) -> Result<Ratio<u64>> {
        position
            .checked_add(&widen(length))
            .ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> Error {
        Error::Timing(format!(
            "note lengths in voice {} cannot be placed exactly on the timeline",
            self.voice_id
        ))
    }

    /// Emit a note-on/note-off pair. Notes last at least one tick.
    fn note(&mut self, key: u8, start: Ratio<u64>, end: Ratio<u64>) -> Result<()> {
        let on = self.clock.tick(start).ok_or_else(|| self.overflow())?;
        let off = self.clock.tick(end).ok_or_else(|| self.overflow())?.max(on.saturating_add(1));
        let channel = self.channel;

        self.events.push(TimedMidiEvent::new(
            on,
            MidiMessage::NoteOn {
                channel,
                key,
                velocity: self.velocity,
            },
        ));
        self.events
            .push(TimedMidiEvent::new(off, MidiMessage::NoteOff { channel, key }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Chord, Duration, Note, NoteName, Pitch, Rest};
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    fn params() -> TrackParams {
        TrackParams {
            ticks_per_quarter: 480,
            channel: 0,
            velocity: 80,
            program: None,
            tempo: Tempo::quarter(120),
            name: None,
        }
    }

    fn quarter_unit() -> UnitLength {
        UnitLength {
            numerator: 1,
            denominator: 4,
        }
    }

    fn note(letter: NoteName, num: u32, den: u32) -> Event {
        Event::Note(Note::new(Pitch::new(letter, 0)).with_duration(Duration::new(num, den)))
    }

    fn voice(events: Vec<Event>) -> Voice {
        let mut voice = Voice::new("1");
        voice.events = events;
        voice
    }

    /// (tick, is_on, key) for every note message
    fn notes(events: &[TimedMidiEvent]) -> Vec<(u64, bool, u8)> {
        events
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::NoteOn { key, .. } => Some((e.tick, true, key)),
                MidiMessage::NoteOff { key, .. } => Some((e.tick, false, key)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_one_beat_is_480_ticks() {
        let voice = voice(vec![note(NoteName::C, 1, 1)]);
        let events = encode_track(&[&voice], quarter_unit(), &params()).unwrap();
        assert_eq!(notes(&events), vec![(0, true, 60), (480, false, 60)]);
    }

    #[test]
    fn test_eighth_note_unit() {
        let voice = voice(vec![note(NoteName::C, 1, 1), note(NoteName::D, 3, 2)]);
        let events = encode_track(&[&voice], UnitLength::default(), &params()).unwrap();
        assert_eq!(
            notes(&events),
            vec![(0, true, 60), (240, false, 60), (240, true, 62), (600, false, 62)]
        );
    }

    #[test]
    fn test_track_prelude() {
        let mut p = params();
        p.program = Some(40);
        p.name = Some("Lead".to_string());
        let events = encode_track(&[], quarter_unit(), &p).unwrap();

        assert_eq!(
            events,
            vec![
                TimedMidiEvent::new(0, MidiMessage::TrackName("Lead".to_string())),
                TimedMidiEvent::new(0, MidiMessage::ProgramChange { channel: 0, program: 40 }),
                TimedMidiEvent::new(0, MidiMessage::Tempo { micros_per_quarter: 500_000 }),
            ]
        );
    }

    #[test]
    fn test_exactly_one_tempo() {
        let a = voice(vec![note(NoteName::C, 1, 1)]);
        let b = voice(vec![note(NoteName::E, 1, 1)]);
        let events = encode_track(&[&a, &b], quarter_unit(), &params()).unwrap();
        let tempos = events
            .iter()
            .filter(|e| matches!(e.message, MidiMessage::Tempo { .. }))
            .count();
        assert_eq!(tempos, 1);
        assert_eq!(notes(&events).len(), 4);
    }

    #[test]
    fn test_rest_advances_cursor() {
        let voice = voice(vec![
            note(NoteName::C, 1, 1),
            Event::Rest(Rest::new(Duration::new(2, 1))),
            note(NoteName::D, 1, 1),
        ]);
        let events = encode_track(&[&voice], quarter_unit(), &params()).unwrap();
        assert_eq!(
            notes(&events),
            vec![(0, true, 60), (480, false, 60), (1440, true, 62), (1920, false, 62)]
        );
    }

    #[test]
    fn test_ties_extend_the_sounding_note() {
        let c = Note::new(Pitch::new(NoteName::C, 0));
        let voice = voice(vec![
            Event::Note(c.clone().tied()),
            Event::Note(c.clone().tied()),
            Event::Note(c),
        ]);
        let events = encode_track(&[&voice], quarter_unit(), &params()).unwrap();
        assert_eq!(notes(&events), vec![(0, true, 60), (1440, false, 60)]);
    }

    #[test]
    fn test_tie_to_other_pitch_ends_the_note() {
        let voice = voice(vec![
            Event::Note(Note::new(Pitch::new(NoteName::C, 0)).tied()),
            note(NoteName::D, 1, 1),
        ]);
        let events = encode_track(&[&voice], quarter_unit(), &params()).unwrap();
        assert_eq!(
            notes(&events),
            vec![(0, true, 60), (480, false, 60), (480, true, 62), (960, false, 62)]
        );
    }

    #[test]
    fn test_chord_notes_start_together() {
        let chord = Event::Chord(Chord {
            notes: vec![
                Note::new(Pitch::new(NoteName::C, 0)).with_duration(Duration::new(2, 1)),
                Note::new(Pitch::new(NoteName::E, 0)),
            ],
        });
        let voice = voice(vec![chord, note(NoteName::G, 1, 1)]);
        let events = encode_track(&[&voice], quarter_unit(), &params()).unwrap();
        assert_eq!(
            notes(&events),
            vec![
                (0, true, 60),
                (960, false, 60),
                (0, true, 64),
                (480, false, 64),
                (480, true, 67),
                (960, false, 67),
            ]
        );
    }

    #[test]
    fn test_triplets_round_half_up_without_drift() {
        // One tick per quarter: thirds land between ticks, the next whole
        // beat still lands exactly on tick 1
        let third = || note(NoteName::C, 1, 3);
        let voice = voice(vec![third(), third(), third(), note(NoteName::D, 1, 1)]);
        let events = encode_track(&[&voice], quarter_unit(), &TrackParams {
            ticks_per_quarter: 1,
            ..params()
        })
        .unwrap();
        let ons: Vec<u64> = notes(&events)
            .into_iter()
            .filter(|(_, on, _)| *on)
            .map(|(tick, _, _)| tick)
            .collect();
        // 0, 1/3 -> 0, 2/3 -> 1, 1 -> 1
        assert_eq!(ons, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_clock_rounds_half_up() {
        let clock = Clock::new(quarter_unit(), 1);
        assert_eq!(clock.tick(Ratio::new(1, 2)), Some(1));
        assert_eq!(clock.tick(Ratio::new(3, 2)), Some(2));
        assert_eq!(clock.tick(Ratio::new(1, 3)), Some(0));
        assert_eq!(clock.tick(Ratio::new(u64::MAX, 1)), None);
    }

    #[test]
    fn test_prime_lengths_fail_instead_of_overflowing() {
        // The common denominator of 1/2, 1/3 .. 1/61 is past u64
        let primes = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61];
        let mut events: Vec<Event> = primes.iter().map(|&p| note(NoteName::C, 1, p)).collect();
        events.push(note(NoteName::C, 1, 1));
        let voice = voice(events);

        let err = encode_track(&[&voice], quarter_unit(), &params()).unwrap_err();
        match err {
            Error::Timing(message) => assert!(message.contains("voice 1"), "{}", message),
            other => panic!("expected Timing, got {:?}", other),
        }
    }

    #[test]
    fn test_voices_get_their_own_channels() {
        // Same key in both voices, overlapping: each note-off stays on its channel
        let long = voice(vec![note(NoteName::C, 4, 1)]);
        let short = voice(vec![note(NoteName::C, 1, 1)]);
        let mut p = params();
        p.channel = 8;
        p.program = Some(40);
        let events = encode_track(&[&long, &short], quarter_unit(), &p).unwrap();

        let programs: Vec<u8> = events
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::ProgramChange { channel, .. } => Some(channel),
                _ => None,
            })
            .collect();
        assert_eq!(programs, vec![8, 10]);

        let offs: Vec<(u64, u8)> = events
            .iter()
            .filter_map(|e| match e.message {
                MidiMessage::NoteOff { channel, .. } => Some((e.tick, channel)),
                _ => None,
            })
            .collect();
        assert_eq!(offs, vec![(1920, 8), (480, 10)]);
    }

    #[test]
    fn test_tempo_out_of_range_fails() {
        let mut p = params();
        p.tempo = Tempo::quarter(2);
        let err = encode_track(&[], quarter_unit(), &p).unwrap_err();
        assert!(matches!(err, Error::Timing(_)));
    }

    #[test]
    fn test_out_of_range_pitch_fails() {
        let mut pitch = Pitch::new(NoteName::G, 5).with_alteration(1);
        pitch.accidental = Some(crate::ast::Accidental::Sharp);
        let voice = voice(vec![Event::Note(Note::new(pitch))]);
        let err = encode_track(&[&voice], quarter_unit(), &params()).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { midi: 128, .. }));
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(
            MidiMessage::NoteOn {
                channel: 2,
                key: 60,
                velocity: 80
            }
            .to_bytes()
            .unwrap(),
            vec![0x92, 60, 80]
        );
        assert_eq!(
            MidiMessage::Tempo {
                micros_per_quarter: 500_000
            }
            .to_bytes()
            .unwrap(),
            vec![0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]
        );
        assert!(MidiMessage::Tempo {
            micros_per_quarter: 0x100_0000
        }
        .to_bytes()
        .is_err());
        assert_eq!(
            MidiMessage::TrackName("Hi".to_string()).to_bytes().unwrap(),
            vec![0xFF, 0x03, 0x02, b'H', b'i']
        );
    }
}
