//! MIDI generation from parsed tunes.
//!
//! [`encode`] turns voices into timed messages and [`container`] writes them
//! out as a Standard MIDI File.

pub mod container;
pub mod encode;

use tracing::debug;

use crate::ast::{NotationDocument, Voice};
use crate::error::Result;
use crate::MidiParams;

pub use container::{MidiDocument, MidiTrackBytes};
pub use encode::{encode_track, MidiMessage, TimedMidiEvent, TrackParams};

/// GM percussion channel, never assigned automatically.
const DRUM_CHANNEL: u8 = 9;

/// One track per sounding voice. A tune without notes still gets one track
/// carrying its tempo.
pub fn document(tune: &NotationDocument, params: &MidiParams) -> Result<MidiDocument> {
    let mut doc = MidiDocument::new(params.division());

    let voices: Vec<&Voice> = tune.sounding_voices().collect();
    if voices.is_empty() {
        let track = track_params(tune, params, params.channel, title_name(tune));
        doc.push_track(MidiTrackBytes::encode(encode_track(
            &[],
            tune.header.unit_length,
            &track,
        )?)?);
        return Ok(doc);
    }

    let single = voices.len() == 1;
    for (index, voice) in voices.into_iter().enumerate() {
        let name = voice
            .name
            .clone()
            .or_else(|| if single { title_name(tune) } else { Some(voice.id.clone()) });
        let track = track_params(tune, params, track_channel(params.channel, index), name);
        let events = encode_track(&[voice], tune.header.unit_length, &track)?;
        doc.push_track(MidiTrackBytes::encode(events)?);
    }

    debug!(tracks = doc.tracks.len(), format = doc.format(), "encoded tune");
    Ok(doc)
}

/// One track per tune, in order. Every voice of a tune shares its track but
/// plays on a channel of its own; channels keep counting across tunes.
///
/// Fails on the first tune that cannot be encoded; nothing is produced.
pub fn combine(tunes: &[NotationDocument], params: &MidiParams) -> Result<MidiDocument> {
    let mut doc = MidiDocument::new(params.division());
    let mut next_channel = 0;

    for tune in tunes {
        let voices: Vec<&Voice> = tune.sounding_voices().collect();
        let channel = track_channel(params.channel, next_channel);
        next_channel += voices.len().max(1);

        let track = track_params(tune, params, channel, title_name(tune));
        let events = encode_track(&voices, tune.header.unit_length, &track)?;
        doc.push_track(MidiTrackBytes::encode(events)?);
    }

    debug!(tracks = doc.tracks.len(), "combined tunes");
    Ok(doc)
}

fn track_params(
    tune: &NotationDocument,
    params: &MidiParams,
    channel: u8,
    name: Option<String>,
) -> TrackParams {
    TrackParams {
        ticks_per_quarter: params.division(),
        channel,
        velocity: params.velocity,
        // %%MIDI program in the tune wins over the caller's choice
        program: tune.header.midi_program.or(params.program),
        tempo: tune.header.tempo.clone(),
        name,
    }
}

fn title_name(tune: &NotationDocument) -> Option<String> {
    Some(tune.title().to_string()).filter(|t| !t.is_empty())
}

/// Channel for the `index`-th track: counts up from `base`, wrapping at 16
/// and skipping the percussion channel.
pub fn track_channel(base: u8, index: usize) -> u8 {
    let mut channel = base & 0x0F;
    let mut remaining = index;
    while remaining > 0 {
        channel = (channel + 1) % 16;
        if channel != DRUM_CHANNEL {
            remaining -= 1;
        }
    }
    channel
}
