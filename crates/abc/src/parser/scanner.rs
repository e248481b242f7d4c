//! Token scanner for note lines, using winnow combinators.
//!
//! A [`Scanner`] walks one line lazily and never fails: anything it does not
//! recognize comes out as [`Token::Ignored`].

use winnow::ascii::{digit0, digit1};
use winnow::combinator::{alt, delimited, opt, preceded, terminated};
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use crate::ast::Accidental;

type PResult<T> = winnow::ModalResult<T>;

/// A lexical unit of a note line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Inline field such as `[K:G]` or `[V:2]`
    Field { name: char, value: &'a str },
    /// Pitch letter, case preserved
    Note(char),
    Accidental(Accidental),
    /// Net octave shift of a run of `'` and `,` marks
    Octave(i8),
    Length(Length),
    Rest(RestKind),
    Tie,
    /// Ornament, annotation or grace group; never affects pitch or duration
    Decoration(&'a str),
    ChordStart,
    ChordEnd,
    Tuplet { p: u8, q: Option<u8>, r: Option<u8> },
    Bar(BarLine),
    BrokenRhythm(&'a str),
    /// Whitespace, slurs and unknown characters
    Ignored(&'a str),
}

/// A length modifier as written. Either part may be zero when the source
/// text was out of range; the event parser rejects those.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Length {
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestKind {
    /// `z`
    Visible,
    /// `x`
    Invisible,
    /// `Z4` = 4 bars
    MultiMeasure(u16),
}

/// Bar line types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarLine {
    Single,      // |
    Double,      // ||
    End,         // |]
    Start,       // [|
    RepeatStart, // |:
    RepeatEnd,   // :|
    RepeatBoth,  // ::
    Ending(u8),  // |1 [2 :|2
}

impl BarLine {
    /// Repeats and endings need measure tracking to play correctly.
    pub fn needs_measures(&self) -> bool {
        !matches!(
            self,
            BarLine::Single | BarLine::Double | BarLine::End | BarLine::Start
        )
    }

    pub fn as_abc(&self) -> String {
        match self {
            BarLine::Single => "|".to_string(),
            BarLine::Double => "||".to_string(),
            BarLine::End => "|]".to_string(),
            BarLine::Start => "[|".to_string(),
            BarLine::RepeatStart => "|:".to_string(),
            BarLine::RepeatEnd => ":|".to_string(),
            BarLine::RepeatBoth => "::".to_string(),
            BarLine::Ending(n) => format!("|{}", n),
        }
    }
}

/// Lazy token stream over one line.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    input: &'a str,
}

impl<'a> Scanner<'a> {
    pub fn new(line: &'a str) -> Self {
        Scanner { input: line }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.input.is_empty() {
            return None;
        }

        let checkpoint = self.input;
        match token.parse_next(&mut self.input) {
            Ok(tok) if self.input.len() < checkpoint.len() => Some(tok),
            _ => {
                // Unknown character - pass it through
                let c = checkpoint.chars().next()?;
                let (ignored, rest) = checkpoint.split_at(c.len_utf8());
                self.input = rest;
                Some(Token::Ignored(ignored))
            }
        }
    }
}

fn token<'a>(input: &mut &'a str) -> PResult<Token<'a>> {
    alt((
        take_while(1.., [' ', '\t', '\\']).map(Token::Ignored),
        inline_field,
        parse_bar.map(Token::Bar),
        parse_tuplet,
        one_of(['(', ')']).take().map(Token::Ignored),
        parse_decoration.map(Token::Decoration),
        parse_accidental.map(Token::Accidental),
        parse_pitch_letter.map(Token::Note),
        parse_octave_modifier.map(Token::Octave),
        parse_length.map(Token::Length),
        parse_rest.map(Token::Rest),
        '-'.value(Token::Tie),
        '['.value(Token::ChordStart),
        ']'.value(Token::ChordEnd),
        take_while(1.., ['>', '<']).map(Token::BrokenRhythm),
    ))
    .parse_next(input)
}

/// Parse an inline field `[K:G]`
fn inline_field<'a>(input: &mut &'a str) -> PResult<Token<'a>> {
    let (name, value) = delimited(
        '[',
        (
            terminated(one_of(|c: char| c.is_ascii_alphabetic()), ':'),
            take_till(0.., ']'),
        ),
        ']',
    )
    .parse_next(input)?;
    Ok(Token::Field {
        name,
        value: value.trim(),
    })
}

/// Parse a bar line. Longer patterns are tried first.
pub fn parse_bar(input: &mut &str) -> PResult<BarLine> {
    alt((
        "[|".value(BarLine::Start),
        "|]".value(BarLine::End),
        "||".value(BarLine::Double),
        "|:".value(BarLine::RepeatStart),
        "::".value(BarLine::RepeatBoth),
        preceded(":|", opt(small_number)).map(|n| match n {
            Some(n) => BarLine::Ending(n),
            None => BarLine::RepeatEnd,
        }),
        preceded('|', small_number).map(BarLine::Ending),
        preceded('[', small_number).map(BarLine::Ending),
        '|'.value(BarLine::Single),
    ))
    .parse_next(input)
}

/// Parse a tuplet marker `(3`, `(3:2`, `(3:2:4`
fn parse_tuplet<'a>(input: &mut &'a str) -> PResult<Token<'a>> {
    let (p, q, r) = preceded(
        '(',
        (
            small_number,
            opt(preceded(':', opt(small_number))),
            opt(preceded(':', opt(small_number))),
        ),
    )
    .parse_next(input)?;
    Ok(Token::Tuplet {
        p,
        q: q.flatten(),
        r: r.flatten(),
    })
}

fn small_number(input: &mut &str) -> PResult<u8> {
    digit1.try_map(str::parse::<u8>).parse_next(input)
}

/// Parse a decoration: `!trill!`, `+fermata+`, `"Am"`, `{gab}`, or a
/// one-character short form.
pub fn parse_decoration<'a>(input: &mut &'a str) -> PResult<&'a str> {
    alt((
        ('!', take_till(1.., '!'), '!').take(),
        ('+', take_till(1.., '+'), '+').take(),
        ('"', take_till(0.., '"'), '"').take(),
        ('{', take_till(0.., '}'), '}').take(),
        one_of(['.', '~', 'H', 'L', 'M', 'O', 'P', 'S', 'T', 'u', 'v']).take(),
    ))
    .parse_next(input)
}

/// Parse an accidental (^, ^^, _, __, =)
pub fn parse_accidental(input: &mut &str) -> PResult<Accidental> {
    alt((
        "^^".value(Accidental::DoubleSharp),
        "^".value(Accidental::Sharp),
        "__".value(Accidental::DoubleFlat),
        "_".value(Accidental::Flat),
        "=".value(Accidental::Natural),
    ))
    .parse_next(input)
}

/// Parse a pitch letter. Case is kept: it selects the base octave.
pub fn parse_pitch_letter(input: &mut &str) -> PResult<char> {
    one_of(['C', 'D', 'E', 'F', 'G', 'A', 'B', 'c', 'd', 'e', 'f', 'g', 'a', 'b']).parse_next(input)
}

/// Parse octave modifiers (', ,) into a net shift
pub fn parse_octave_modifier(input: &mut &str) -> PResult<i8> {
    let marks: &str = take_while(1.., ['\'', ',']).parse_next(input)?;
    let ups = marks.chars().filter(|c| *c == '\'').count() as i64;
    let downs = marks.len() as i64 - ups;
    Ok((ups - downs).clamp(i64::from(i8::MIN), i64::from(i8::MAX)) as i8)
}

/// Parse a length modifier (2, /2, /, //, 3/2, 3/)
pub fn parse_length(input: &mut &str) -> PResult<Length> {
    alt((
        (digit1, opt(parse_divisor)).map(|(num, den): (&str, Option<u32>)| Length {
            numerator: num.parse().unwrap_or(0),
            denominator: den.unwrap_or(1),
        }),
        parse_divisor.map(|den| Length {
            numerator: 1,
            denominator: den,
        }),
    ))
    .parse_next(input)
}

/// Parse the divisor part of a length. Each bare slash halves.
fn parse_divisor(input: &mut &str) -> PResult<u32> {
    let (slashes, digits): (&str, &str) = (take_while(1.., '/'), digit0).parse_next(input)?;
    let extra_halvings = slashes.len() as u32 - 1;
    let den = if digits.is_empty() {
        2u32.checked_pow(extra_halvings + 1)
    } else {
        digits
            .parse::<u32>()
            .ok()
            .and_then(|d| d.checked_mul(2u32.checked_pow(extra_halvings)?))
    };
    Ok(den.unwrap_or(0))
}

/// Parse a rest (z, x, Z)
pub fn parse_rest(input: &mut &str) -> PResult<RestKind> {
    alt((
        'z'.value(RestKind::Visible),
        'x'.value(RestKind::Invisible),
        preceded('Z', digit0).map(|count: &str| RestKind::MultiMeasure(count.parse().unwrap_or(1))),
    ))
    .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan(line: &str) -> Vec<Token<'_>> {
        Scanner::new(line).collect()
    }

    /// Drops whitespace so expectations stay readable
    fn scan_significant(line: &str) -> Vec<Token<'_>> {
        Scanner::new(line)
            .filter(|t| !matches!(t, Token::Ignored(s) if s.trim().is_empty()))
            .collect()
    }

    fn len(numerator: u32, denominator: u32) -> Token<'static> {
        Token::Length(Length {
            numerator,
            denominator,
        })
    }

    #[test]
    fn test_parse_accidental() {
        let mut input = "^";
        assert_eq!(parse_accidental(&mut input).unwrap(), Accidental::Sharp);

        let mut input = "^^";
        assert_eq!(parse_accidental(&mut input).unwrap(), Accidental::DoubleSharp);

        let mut input = "__";
        assert_eq!(parse_accidental(&mut input).unwrap(), Accidental::DoubleFlat);

        let mut input = "=";
        assert_eq!(parse_accidental(&mut input).unwrap(), Accidental::Natural);
    }

    #[test]
    fn test_parse_octave_modifier() {
        let mut input = "''";
        assert_eq!(parse_octave_modifier(&mut input).unwrap(), 2);

        let mut input = ",,";
        assert_eq!(parse_octave_modifier(&mut input).unwrap(), -2);

        let mut input = "',";
        assert_eq!(parse_octave_modifier(&mut input).unwrap(), 0);

        let mut input = "";
        assert!(parse_octave_modifier(&mut input).is_err());
    }

    #[test]
    fn test_parse_length() {
        let cases = [
            ("2", (2, 1)),
            ("/2", (1, 2)),
            ("/", (1, 2)),
            ("//", (1, 4)),
            ("3/2", (3, 2)),
            ("3/", (3, 2)),
            ("3//", (3, 4)),
            ("16", (16, 1)),
        ];
        for (text, (numerator, denominator)) in cases {
            let mut input = text;
            assert_eq!(
                parse_length(&mut input).unwrap(),
                Length {
                    numerator,
                    denominator
                },
                "length {}",
                text
            );
            assert!(input.is_empty(), "length {} left {:?}", text, input);
        }
    }

    #[test]
    fn test_parse_length_out_of_range_is_zero() {
        let mut input = "99999999999";
        assert_eq!(parse_length(&mut input).unwrap().numerator, 0);

        let mut input = "/0";
        assert_eq!(parse_length(&mut input).unwrap().denominator, 0);
    }

    #[test]
    fn test_parse_rest() {
        let mut input = "z";
        assert_eq!(parse_rest(&mut input).unwrap(), RestKind::Visible);

        let mut input = "x";
        assert_eq!(parse_rest(&mut input).unwrap(), RestKind::Invisible);

        let mut input = "Z4";
        assert_eq!(parse_rest(&mut input).unwrap(), RestKind::MultiMeasure(4));
    }

    #[test]
    fn test_scan_note_with_modifiers() {
        assert_eq!(
            scan("^C,2-"),
            vec![
                Token::Accidental(Accidental::Sharp),
                Token::Note('C'),
                Token::Octave(-1),
                len(2, 1),
                Token::Tie,
            ]
        );
    }

    #[test]
    fn test_scan_rest_and_length() {
        assert_eq!(scan("z3/2"), vec![Token::Rest(RestKind::Visible), len(3, 2)]);
    }

    #[test]
    fn test_scan_bars() {
        let bars: Vec<_> = scan("|:C:|D||E|]F|1G:|2A::B[|")
            .into_iter()
            .filter_map(|t| match t {
                Token::Bar(b) => Some(b),
                _ => None,
            })
            .collect();

        assert_eq!(
            bars,
            vec![
                BarLine::RepeatStart,
                BarLine::RepeatEnd,
                BarLine::Double,
                BarLine::End,
                BarLine::Ending(1),
                BarLine::Ending(2),
                BarLine::RepeatBoth,
                BarLine::Start,
            ]
        );
        assert!(BarLine::RepeatEnd.needs_measures());
        assert!(!BarLine::Double.needs_measures());
    }

    #[test]
    fn test_scan_chord() {
        assert_eq!(
            scan("[CEg]2"),
            vec![
                Token::ChordStart,
                Token::Note('C'),
                Token::Note('E'),
                Token::Note('g'),
                Token::ChordEnd,
                len(2, 1),
            ]
        );
    }

    #[test]
    fn test_scan_inline_field() {
        assert_eq!(
            scan("C[K:G]D"),
            vec![
                Token::Note('C'),
                Token::Field {
                    name: 'K',
                    value: "G"
                },
                Token::Note('D'),
            ]
        );
    }

    #[test]
    fn test_scan_decorations() {
        assert_eq!(
            scan_significant(".C ~D !trill!E \"Am\"F {ga}B Tc"),
            vec![
                Token::Decoration("."),
                Token::Note('C'),
                Token::Decoration("~"),
                Token::Note('D'),
                Token::Decoration("!trill!"),
                Token::Note('E'),
                Token::Decoration("\"Am\""),
                Token::Note('F'),
                Token::Decoration("{ga}"),
                Token::Note('B'),
                Token::Decoration("T"),
                Token::Note('c'),
            ]
        );
    }

    #[test]
    fn test_scan_tuplets_and_slurs() {
        assert_eq!(
            scan_significant("(3abc (3:2:4 (CD)"),
            vec![
                Token::Tuplet {
                    p: 3,
                    q: None,
                    r: None
                },
                Token::Note('a'),
                Token::Note('b'),
                Token::Note('c'),
                Token::Tuplet {
                    p: 3,
                    q: Some(2),
                    r: Some(4)
                },
                Token::Ignored("("),
                Token::Note('C'),
                Token::Note('D'),
                Token::Ignored(")"),
            ]
        );
    }

    #[test]
    fn test_scan_broken_rhythm() {
        assert_eq!(
            scan("A>B"),
            vec![Token::Note('A'), Token::BrokenRhythm(">"), Token::Note('B')]
        );
    }

    #[test]
    fn test_scan_never_fails() {
        let junk = "&*@#$% é ! [K: \"unterminated {oops";
        let tokens = scan(junk);
        let rebuilt: usize = tokens
            .iter()
            .map(|t| match t {
                Token::Ignored(s) | Token::Decoration(s) | Token::BrokenRhythm(s) => s.len(),
                _ => 1,
            })
            .sum();
        assert!(!tokens.is_empty());
        assert!(rebuilt <= junk.len());
        assert!(tokens.iter().any(|t| *t == Token::Ignored("é")));
    }

    #[test]
    fn test_scanner_restarts_per_line() {
        let first: Vec<_> = Scanner::new("^C").collect();
        let second: Vec<_> = Scanner::new("C").collect();
        assert_eq!(second, vec![Token::Note('C')]);
        assert_eq!(first.len(), 2);
    }
}
