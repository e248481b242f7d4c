//! Standard MIDI File serialization.

use std::io::Write;

use crate::error::{Error, Result};

use super::encode::TimedMidiEvent;

/// Largest value a four-byte variable-length quantity can hold.
pub const MAX_VLQ: u32 = 0x0FFF_FFFF;

const END_OF_TRACK: [u8; 4] = [0x00, 0xFF, 0x2F, 0x00];

/// The body of one `MTrk` chunk: delta-timed messages ending in an
/// end-of-track meta event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiTrackBytes(Vec<u8>);

impl MidiTrackBytes {
    /// Serialize events in tick order. At equal ticks note-offs go first so
    /// repeated notes retrigger; otherwise the given order is kept.
    ///
    /// A gap between consecutive events longer than [`MAX_VLQ`] ticks is
    /// [`Error::Timing`].
    pub fn encode(mut events: Vec<TimedMidiEvent>) -> Result<Self> {
        events.sort_by_key(|e| (e.tick, !e.message.is_note_off()));

        let mut out = Vec::new();
        let mut last_tick = 0u64;
        for event in &events {
            let gap = event.tick - last_tick;
            let delta = u32::try_from(gap)
                .ok()
                .filter(|d| *d <= MAX_VLQ)
                .ok_or_else(|| {
                    Error::Timing(format!(
                        "gap of {} ticks before tick {} exceeds the delta limit of {}",
                        gap, event.tick, MAX_VLQ
                    ))
                })?;
            write_vlq(&mut out, delta)?;
            out.extend(event.message.to_bytes()?);
            last_tick = event.tick;
        }

        out.extend_from_slice(&END_OF_TRACK);
        Ok(MidiTrackBytes(out))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A complete MIDI file: header values plus track chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiDocument {
    /// Ticks per quarter note
    pub division: u16,
    pub tracks: Vec<MidiTrackBytes>,
}

impl MidiDocument {
    pub fn new(division: u16) -> Self {
        MidiDocument {
            division,
            tracks: Vec::new(),
        }
    }

    pub fn push_track(&mut self, track: MidiTrackBytes) {
        self.tracks.push(track);
    }

    /// SMF format: 0 for a single track, 1 otherwise.
    pub fn format(&self) -> u16 {
        if self.tracks.len() == 1 {
            0
        } else {
            1
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            14 + self.tracks.iter().map(|t| t.len() + 8).sum::<usize>(),
        );

        // Header chunk: MThd
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&self.format().to_be_bytes());
        out.extend_from_slice(&(self.tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.division.to_be_bytes());

        // Track chunks: MTrk
        for track in &self.tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(track.len() as u32).to_be_bytes());
            out.extend_from_slice(track.as_bytes());
        }

        out
    }

    /// Write the file to a sink.
    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(&self.to_bytes())?;
        sink.flush()?;
        Ok(())
    }
}

/// Append a value as a MIDI variable-length quantity. Values above
/// [`MAX_VLQ`] need a fifth byte, which readers reject.
pub fn write_vlq(out: &mut Vec<u8>, value: u32) -> Result<()> {
    if value > MAX_VLQ {
        return Err(Error::Timing(format!(
            "{} does not fit in a variable-length quantity",
            value
        )));
    }
    let mut bytes = [0u8; 4];
    let mut len = 0;
    let mut rest = value;
    loop {
        bytes[len] = (rest & 0x7F) as u8;
        len += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for (i, byte) in bytes[..len].iter().enumerate().rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(byte | continuation);
    }
    Ok(())
}
