//! Key signature parsing and accidental profiles.

use winnow::Parser;

use crate::ast::{Accidental, Key, Mode, NoteName};
use crate::error::{Error, Result};

use super::scanner::{parse_accidental, parse_pitch_letter};

/// Order in which sharps are added to a key signature.
const SHARP_ORDER: [NoteName; 7] = [
    NoteName::F,
    NoteName::C,
    NoteName::G,
    NoteName::D,
    NoteName::A,
    NoteName::E,
    NoteName::B,
];

/// Order in which flats are added to a key signature.
const FLAT_ORDER: [NoteName; 7] = [
    NoteName::B,
    NoteName::E,
    NoteName::A,
    NoteName::D,
    NoteName::G,
    NoteName::C,
    NoteName::F,
];

/// A parsed `K:` value.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyField<'a> {
    pub key: Key,
    /// `name=value` attributes, which never affect pitch (`clef=bass`,
    /// `transpose=-2`, ...).
    pub attributes: Vec<(&'a str, &'a str)>,
}

/// Parse a K: field value (e.g., "G", "Am", "D dorian", "F#m", "Bb", "D ^g").
pub fn parse_key_field(value: &str, line: usize) -> Result<KeyField<'_>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::field(line, 'K', "key signature is empty"));
    }

    let mut words = trimmed.split_whitespace().peekable();
    let mut key = Key::default();
    let mut attributes = Vec::new();

    // First word holds the tonic and possibly a glued mode ("F#m")
    let first = words.next().unwrap_or_default();
    if first.eq_ignore_ascii_case("none") {
        // No signature; C profile
    } else if first.starts_with(['^', '_', '=']) {
        // Explicit accidentals only, on a C base
        key.explicit_accidentals.push(parse_explicit(first, line)?);
    } else {
        let mut chars = first.chars();
        let root = chars
            .next()
            .and_then(NoteName::from_char)
            .ok_or_else(|| Error::field(line, 'K', format!("unknown key '{}'", first)))?;
        let rest = chars.as_str();

        let (accidental, mode_text) = match rest.chars().next() {
            Some('#') => (Some(Accidental::Sharp), &rest[1..]),
            Some('b') => (Some(Accidental::Flat), &rest[1..]),
            _ => (None, rest),
        };

        // Mode may be glued ("Am") or the next word ("A minor")
        let mode_text = if mode_text.is_empty() {
            match words.peek() {
                Some(word) if !word.starts_with(['^', '_', '=']) && !word.contains('=') => {
                    words.next().unwrap_or_default()
                }
                _ => "",
            }
        } else {
            mode_text
        };

        key.root = root;
        key.accidental = accidental;
        key.mode = Mode::parse(mode_text)
            .ok_or_else(|| Error::field(line, 'K', format!("unknown mode '{}'", mode_text)))?;
    }

    for word in words {
        if word.starts_with(['^', '_', '=']) {
            key.explicit_accidentals.push(parse_explicit(word, line)?);
        } else if let Some((name, value)) = word.split_once('=') {
            attributes.push((name, value));
        } else {
            return Err(Error::field(
                line,
                'K',
                format!("unexpected '{}' after key", word),
            ));
        }
    }

    Ok(KeyField { key, attributes })
}

/// Parse one explicit accidental such as `^f` or `_B`.
fn parse_explicit(word: &str, line: usize) -> Result<(Accidental, NoteName)> {
    let mut input = word;
    let parsed = (parse_accidental, parse_pitch_letter).parse_next(&mut input);
    match parsed {
        Ok((accidental, letter)) if input.is_empty() => {
            let name = NoteName::from_char(letter)
                .ok_or_else(|| Error::field(line, 'K', format!("bad accidental '{}'", word)))?;
            Ok((accidental, name))
        }
        _ => Err(Error::field(
            line,
            'K',
            format!("bad accidental '{}'", word),
        )),
    }
}

/// Semitone alteration per letter implied by a key, indexed C D E F G A B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyProfile([i8; 7]);

impl KeyProfile {
    pub fn for_key(key: &Key) -> Self {
        let mut alterations = [0i8; 7];

        let fifths = key_fifths(key);
        if fifths > 0 {
            for i in 0..fifths as usize {
                alterations[SHARP_ORDER[i % 7].index()] += 1;
            }
        } else {
            for i in 0..fifths.unsigned_abs() as usize {
                alterations[FLAT_ORDER[i % 7].index()] -= 1;
            }
        }

        for (accidental, letter) in &key.explicit_accidentals {
            alterations[letter.index()] = accidental.to_semitone_offset();
        }

        KeyProfile(alterations)
    }

    pub fn alteration(&self, letter: NoteName) -> i8 {
        self.0[letter.index()]
    }
}

/// Position on the circle of fifths: positive counts sharps, negative flats.
pub fn key_fifths(key: &Key) -> i8 {
    let major = match key.root {
        NoteName::C => 0,
        NoteName::G => 1,
        NoteName::D => 2,
        NoteName::A => 3,
        NoteName::E => 4,
        NoteName::B => 5,
        NoteName::F => -1,
    };
    let shift = match key.accidental {
        Some(Accidental::Sharp) => 7,
        Some(Accidental::Flat) => -7,
        _ => 0,
    };
    major + shift + key.mode.fifths_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(value: &str) -> Key {
        parse_key_field(value, 1).unwrap().key
    }

    fn profile(value: &str) -> [i8; 7] {
        KeyProfile::for_key(&key(value)).0
    }

    #[test]
    fn test_parse_simple_key() {
        let key = key("G");
        assert_eq!(key.root, NoteName::G);
        assert_eq!(key.accidental, None);
        assert_eq!(key.mode, Mode::Major);
    }

    #[test]
    fn test_parse_minor_and_sharp_keys() {
        let am = key("Am");
        assert_eq!(am.root, NoteName::A);
        assert_eq!(am.mode, Mode::Minor);

        let fsm = key("F#m");
        assert_eq!(fsm.root, NoteName::F);
        assert_eq!(fsm.accidental, Some(Accidental::Sharp));
        assert_eq!(fsm.mode, Mode::Minor);

        let ebm = key("Ebm");
        assert_eq!(ebm.accidental, Some(Accidental::Flat));
        assert_eq!(ebm.mode, Mode::Minor);
    }

    #[test]
    fn test_parse_modal_key() {
        assert_eq!(key("D dorian").mode, Mode::Dorian);
        assert_eq!(key("E mix").mode, Mode::Mixolydian);
        assert_eq!(key("g").root, NoteName::G);
    }

    #[test]
    fn test_parse_key_with_attributes() {
        let field = parse_key_field("G clef=bass transpose=-2", 1).unwrap();
        assert_eq!(field.key.root, NoteName::G);
        assert_eq!(field.attributes, vec![("clef", "bass"), ("transpose", "-2")]);
    }

    #[test]
    fn test_parse_explicit_accidentals() {
        let key = key("D ^g _B");
        assert_eq!(
            key.explicit_accidentals,
            vec![
                (Accidental::Sharp, NoteName::G),
                (Accidental::Flat, NoteName::B)
            ]
        );
    }

    #[test]
    fn test_parse_none_key() {
        assert_eq!(key("none"), Key::default());
    }

    #[test]
    fn test_malformed_keys_fail() {
        for value in ["", "  ", "H", "C blues", "G ^", "G ^x"] {
            let err = parse_key_field(value, 7).unwrap_err();
            assert_eq!(err.line(), Some(7), "K:{}", value);
        }
    }

    #[test]
    fn test_major_profiles() {
        // C D E F G A B
        assert_eq!(profile("C"), [0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(profile("G"), [0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(profile("D"), [1, 0, 0, 1, 0, 0, 0]);
        assert_eq!(profile("A"), [1, 0, 0, 1, 1, 0, 0]);
        assert_eq!(profile("E"), [1, 1, 0, 1, 1, 0, 0]);
        assert_eq!(profile("B"), [1, 1, 0, 1, 1, 1, 0]);
        assert_eq!(profile("F#"), [1, 1, 1, 1, 1, 1, 0]);
        assert_eq!(profile("C#"), [1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(profile("F"), [0, 0, 0, 0, 0, 0, -1]);
        assert_eq!(profile("Bb"), [0, 0, -1, 0, 0, 0, -1]);
        assert_eq!(profile("Eb"), [0, 0, -1, 0, 0, -1, -1]);
        assert_eq!(profile("Ab"), [0, -1, -1, 0, 0, -1, -1]);
        assert_eq!(profile("Db"), [0, -1, -1, 0, -1, -1, -1]);
        assert_eq!(profile("Gb"), [-1, -1, -1, 0, -1, -1, -1]);
        assert_eq!(profile("Cb"), [-1, -1, -1, -1, -1, -1, -1]);
    }

    #[test]
    fn test_modal_profiles() {
        // A minor and D dorian share C major's signature
        assert_eq!(profile("Am"), profile("C"));
        assert_eq!(profile("D dor"), profile("C"));
        assert_eq!(profile("Em"), profile("G"));
        assert_eq!(profile("Dm"), profile("F"));
    }

    #[test]
    fn test_explicit_accidentals_override_profile() {
        // D major with a sharpened G and a naturalized F
        assert_eq!(profile("D ^g =f"), [1, 0, 0, 0, 1, 0, 0]);
    }
}
