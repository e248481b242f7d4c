//! Header field interpretation.
//!
//! Field values are parsed here for both header and body lines; the line
//! driver in [`super`] decides which fields apply where.

use crate::ast::{Duration, Header, InfoField, Meter, Tempo, UnitLength, VoiceDef};
use crate::error::{Error, Result};
use crate::feedback::FeedbackCollector;

use super::key::parse_key_field;

/// Whether a field ends the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFlow {
    Continue,
    BodyStarts,
}

/// Apply one header field line to the header being built.
pub fn apply_header_field(
    header: &mut Header,
    name: char,
    value: &str,
    collector: &mut FeedbackCollector,
) -> Result<HeaderFlow> {
    let line = collector.line();
    let value = value.trim();

    match name {
        'X' => {
            header.reference = value.parse().unwrap_or_else(|_| {
                collector.warning(format!("Invalid X: value '{}', using 1", value));
                1
            });
        }
        'T' => {
            if header.title.is_empty() {
                header.title = value.to_string();
            } else {
                header.titles.push(value.to_string());
            }
        }
        'M' => header.meter = Some(parse_meter(value, line)?),
        'L' => header.unit_length = parse_unit_length(value, line)?,
        'Q' => header.tempo = parse_tempo(value, line, header.tempo.bpm)?,
        'K' => {
            let field = parse_key_field(value, line)?;
            for (attr, attr_value) in field.attributes {
                note_transpose_hint(header, attr, attr_value, collector);
            }
            header.key = field.key;
            return Ok(HeaderFlow::BodyStarts);
        }
        'C' => header.composer = Some(value.to_string()),
        'R' => header.rhythm = Some(value.to_string()),
        'S' => header.source = Some(value.to_string()),
        'N' => header.notes = Some(value.to_string()),
        'V' => {
            let def = parse_voice_def(value, line)?;
            record_voice_hints(header, &def, collector);
            if let Some(existing) = header.voice_defs.iter_mut().find(|d| d.id == def.id) {
                *existing = def;
            } else {
                header.voice_defs.push(def);
            }
        }
        'I' if is_transpose_instruction(value) => {
            header.transpose_hints.push(format!("I:{}", value));
            collector.info(format!("transposition hint 'I:{}' ignored", value));
        }
        'w' | 'W' => {}
        _ => header.other_fields.push(InfoField {
            field_type: name,
            value: value.to_string(),
        }),
    }

    Ok(HeaderFlow::Continue)
}

pub fn is_transpose_instruction(value: &str) -> bool {
    let word = value.split_whitespace().next().unwrap_or_default();
    word.eq_ignore_ascii_case("transpose") || word.to_ascii_lowercase().starts_with("transpose=")
}

/// Record `transpose=` and `octave=` attributes without applying them.
pub fn note_transpose_hint(
    header: &mut Header,
    attr: &str,
    value: &str,
    collector: &mut FeedbackCollector,
) {
    if matches!(attr, "transpose" | "octave" | "t") {
        header.transpose_hints.push(format!("{}={}", attr, value));
        collector.info(format!("transposition hint '{}={}' ignored", attr, value));
    }
}

fn record_voice_hints(header: &mut Header, def: &VoiceDef, collector: &mut FeedbackCollector) {
    if let Some(t) = def.transpose {
        note_transpose_hint(header, "transpose", &t.to_string(), collector);
    }
    if let Some(o) = def.octave {
        note_transpose_hint(header, "octave", &o.to_string(), collector);
    }
}

/// Parse meter field value (e.g., "4/4", "C", "C|", "6/8", "2+3/8")
pub fn parse_meter(value: &str, line: usize) -> Result<Meter> {
    match value.trim() {
        "C" => Ok(Meter::Common),
        "C|" => Ok(Meter::Cut),
        "none" | "free" => Ok(Meter::None),
        "" => Err(Error::field(line, 'M', "meter is empty")),
        other => {
            let (num, den) = other
                .split_once('/')
                .ok_or_else(|| Error::field(line, 'M', format!("invalid meter '{}'", other)))?;

            // Additive numerators like 2+3+2
            let numerator = num
                .split('+')
                .map(|part| part.trim().parse::<u8>().ok().filter(|n| *n > 0))
                .try_fold(0u8, |acc, part| acc.checked_add(part?));
            let denominator = den.trim().parse::<u8>().ok().filter(|d| *d > 0);

            match (numerator, denominator) {
                (Some(numerator), Some(denominator)) => Ok(Meter::Simple {
                    numerator,
                    denominator,
                }),
                _ => Err(Error::field(line, 'M', format!("invalid meter '{}'", other))),
            }
        }
    }
}

/// Parse unit length field value (e.g., "1/8", "1/16", "1")
pub fn parse_unit_length(value: &str, line: usize) -> Result<UnitLength> {
    let (numerator, denominator) = parse_fraction(value)
        .ok_or_else(|| Error::field(line, 'L', format!("invalid note length '{}'", value.trim())))?;
    let numerator = u16::try_from(numerator)
        .map_err(|_| Error::field(line, 'L', "note length out of range"))?;
    let denominator = u16::try_from(denominator)
        .map_err(|_| Error::field(line, 'L', "note length out of range"))?;
    Ok(UnitLength {
        numerator,
        denominator,
    })
}

/// Parse tempo field value (e.g., "1/4=120", "120", "\"Allegro\" 1/4=120",
/// "1/4 1/8=90").
///
/// A text-only tempo keeps `fallback_bpm` at a quarter-note beat.
pub fn parse_tempo(value: &str, line: usize, fallback_bpm: u16) -> Result<Tempo> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::field(line, 'Q', "tempo is empty"));
    }

    // Quoted text may come before or after the beat definition
    let mut text = None;
    let mut rest = String::new();
    let mut parts = trimmed.split('"');
    if let Some(outside) = parts.next() {
        rest.push_str(outside);
    }
    while let Some(inside) = parts.next() {
        if text.is_none() && !inside.is_empty() {
            text = Some(inside.to_string());
        }
        if let Some(outside) = parts.next() {
            rest.push(' ');
            rest.push_str(outside);
        }
    }
    let rest = rest.trim();

    let invalid = || Error::field(line, 'Q', format!("invalid tempo '{}'", trimmed));

    if rest.is_empty() {
        return match text {
            Some(text) => Ok(Tempo {
                text: Some(text),
                ..Tempo::quarter(fallback_bpm)
            }),
            None => Err(invalid()),
        };
    }

    let (beat_unit, bpm_text) = match rest.split_once('=') {
        Some((beats, bpm)) => {
            // Several beat lengths add up: "1/4 1/8=90" is a dotted quarter
            let mut total: Option<Duration> = None;
            for part in beats.split_whitespace() {
                let (n, d) = parse_fraction(part).ok_or_else(invalid)?;
                let beat = Duration::checked(n, d).ok_or_else(invalid)?;
                total = match total {
                    Some(sum) => Some(sum.checked_add(&beat).ok_or_else(invalid)?),
                    None => Some(beat),
                };
            }
            (total.ok_or_else(invalid)?, bpm.trim())
        }
        None => (Duration::new(1, 4), rest),
    };

    let bpm = bpm_text
        .parse::<u16>()
        .ok()
        .filter(|bpm| *bpm > 0)
        .ok_or_else(invalid)?;

    let tempo = Tempo {
        beat_unit,
        bpm,
        text,
    };
    // Tempos the MIDI meta event cannot hold fail with the field line
    tempo.micros_per_quarter().map_err(|e| Error::field(line, 'Q', e.to_string()))?;
    Ok(tempo)
}

/// Parse a positive fraction like "1/8" or a bare count like "1".
pub fn parse_fraction(s: &str) -> Option<(u32, u32)> {
    let s = s.trim();
    let (num, den) = match s.split_once('/') {
        Some((num, den)) => (num.trim().parse().ok()?, den.trim().parse().ok()?),
        None => (s.parse().ok()?, 1),
    };
    if num == 0 || den == 0 {
        None
    } else {
        Some((num, den))
    }
}

/// Parse a V: voice definition field.
///
/// Format: `V:id [name="..."] [clef=...] [octave=...] [transpose=...]`
///
/// Examples:
/// - `V:1`
/// - `V:Melody name="Lead Melody" clef=treble`
/// - `V:Bass clef=bass octave=-1`
pub fn parse_voice_def(value: &str, line: usize) -> Result<VoiceDef> {
    let trimmed = value.trim();
    let (id, remaining) = match trimmed.split_once(char::is_whitespace) {
        Some((id, rest)) => (id, rest.trim()),
        None => (trimmed, ""),
    };
    if id.is_empty() {
        return Err(Error::field(line, 'V', "voice id is missing"));
    }

    let mut voice = VoiceDef::new(id);

    voice.name = quoted_attribute(remaining, "name").or_else(|| quoted_attribute(remaining, "nm"));

    for word in remaining.split_whitespace() {
        let Some((attr, attr_value)) = word.split_once('=') else {
            continue;
        };
        match attr {
            "octave" => voice.octave = attr_value.parse().ok(),
            "transpose" | "t" => voice.transpose = attr_value.parse().ok(),
            _ => {}
        }
    }

    Ok(voice)
}

/// Value of `attr="..."`, quotes removed.
fn quoted_attribute(s: &str, attr: &str) -> Option<String> {
    let pattern = format!("{}=\"", attr);
    let start = s.find(&pattern)? + pattern.len();
    let after = &s[start..];
    let end = after.find('"')?;
    Some(after[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_meter() {
        assert_eq!(parse_meter("C", 1).unwrap(), Meter::Common);
        assert_eq!(parse_meter("C|", 1).unwrap(), Meter::Cut);
        assert_eq!(
            parse_meter("6/8", 1).unwrap(),
            Meter::Simple {
                numerator: 6,
                denominator: 8
            }
        );
        assert_eq!(
            parse_meter("2+3+2/8", 1).unwrap(),
            Meter::Simple {
                numerator: 7,
                denominator: 8
            }
        );
        assert!(parse_meter("waltz", 3).is_err());
        assert!(parse_meter("3/0", 3).is_err());
    }

    #[test]
    fn test_parse_unit_length() {
        assert_eq!(
            parse_unit_length("1/16", 1).unwrap(),
            UnitLength {
                numerator: 1,
                denominator: 16
            }
        );
        assert_eq!(
            parse_unit_length("1", 1).unwrap(),
            UnitLength {
                numerator: 1,
                denominator: 1
            }
        );
        for bad in ["", "1/0", "0/8", "eighth", "1/70000"] {
            assert!(parse_unit_length(bad, 2).is_err(), "L:{}", bad);
        }
    }

    #[test]
    fn test_parse_tempo_full() {
        let tempo = parse_tempo("1/4=120", 1, 120).unwrap();
        assert_eq!(tempo.bpm, 120);
        assert_eq!(tempo.beat_unit, Duration::new(1, 4));
    }

    #[test]
    fn test_parse_tempo_with_text() {
        let tempo = parse_tempo("\"Allegro\" 1/4=144", 1, 120).unwrap();
        assert_eq!(tempo.bpm, 144);
        assert_eq!(tempo.text, Some("Allegro".to_string()));

        let trailing = parse_tempo("3/8=60 \"Lento\"", 1, 120).unwrap();
        assert_eq!(trailing.beat_unit, Duration::new(3, 8));
        assert_eq!(trailing.text, Some("Lento".to_string()));
    }

    #[test]
    fn test_parse_tempo_just_bpm() {
        let tempo = parse_tempo("100", 1, 120).unwrap();
        assert_eq!(tempo.bpm, 100);
        assert_eq!(tempo.beat_unit, Duration::new(1, 4));
    }

    #[test]
    fn test_parse_tempo_compound_beat() {
        let tempo = parse_tempo("1/4 1/8=90", 1, 120).unwrap();
        assert_eq!(tempo.beat_unit, Duration::new(3, 8));
        assert_eq!(tempo.bpm, 90);
    }

    #[test]
    fn test_parse_tempo_text_only_keeps_fallback() {
        let tempo = parse_tempo("\"Andante\"", 1, 96).unwrap();
        assert_eq!(tempo.bpm, 96);
        assert_eq!(tempo.text, Some("Andante".to_string()));
    }

    #[test]
    fn test_parse_tempo_errors() {
        for bad in ["", "fast", "1/4=", "1/4=0", "0/4=120", "1/4=abc"] {
            let err = parse_tempo(bad, 9, 120).unwrap_err();
            assert_eq!(err.line(), Some(9), "Q:{}", bad);
        }
    }

    #[test]
    fn test_parse_tempo_too_slow_for_midi() {
        let err = parse_tempo("1/4=3", 5, 120).unwrap_err();
        assert_eq!(err.line(), Some(5));
        assert!(err.to_string().contains("us per quarter"), "{}", err);

        assert!(parse_tempo("1/4=4", 5, 120).is_ok());
        assert!(parse_tempo("1/8=4", 5, 120).is_err());
    }

    #[test]
    fn test_parse_voice_def() {
        let voice = parse_voice_def("Melody name=\"Lead Melody\" clef=treble", 1).unwrap();
        assert_eq!(voice.id, "Melody");
        assert_eq!(voice.name, Some("Lead Melody".to_string()));

        let bass = parse_voice_def("Bass clef=bass octave=-1 transpose=-12", 1).unwrap();
        assert_eq!(bass.octave, Some(-1));
        assert_eq!(bass.transpose, Some(-12));

        assert!(parse_voice_def("  ", 4).is_err());
    }

    #[test]
    fn test_apply_header_fields() {
        let mut header = Header::default();
        let mut collector = FeedbackCollector::new();

        for (name, value) in [('X', "3"), ('T', "Main"), ('T', "Sub"), ('C', "Someone")] {
            let flow = apply_header_field(&mut header, name, value, &mut collector).unwrap();
            assert_eq!(flow, HeaderFlow::Continue);
        }
        let flow = apply_header_field(&mut header, 'K', "D", &mut collector).unwrap();

        assert_eq!(flow, HeaderFlow::BodyStarts);
        assert_eq!(header.reference, 3);
        assert_eq!(header.title, "Main");
        assert_eq!(header.titles, vec!["Sub".to_string()]);
        assert_eq!(header.composer, Some("Someone".to_string()));
    }

    #[test]
    fn test_transpose_hints_are_recorded_not_applied() {
        let mut header = Header::default();
        let mut collector = FeedbackCollector::new();

        apply_header_field(&mut header, 'I', "transpose -2", &mut collector).unwrap();
        apply_header_field(&mut header, 'V', "1 transpose=3", &mut collector).unwrap();
        apply_header_field(&mut header, 'K', "G transpose=-1", &mut collector).unwrap();

        assert_eq!(header.transpose_hints.len(), 3);
        assert_eq!(collector.feedback().len(), 3);
        assert!(collector.feedback().iter().all(|f| f.message.contains("ignored")));
    }
}
