//! ABC notation parser.
//!
//! The parser is generous: anything it can skip or assume is collected as
//! feedback, and only malformed fields or note tokens abort the tune.

pub mod body;
pub mod header;
pub mod key;
pub mod scanner;

use tracing::debug;

use crate::ast::{Header, NotationDocument, Tempo};
use crate::error::Result;
use crate::feedback::{FeedbackCollector, ParseResult};
use crate::ParseOptions;

use body::BodyParser;
use header::{apply_header_field, is_transpose_instruction, HeaderFlow};

/// Parse one tune into a [`NotationDocument`].
pub fn parse_document(input: &str, options: &ParseOptions) -> Result<ParseResult<NotationDocument>> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let mut collector = FeedbackCollector::new();
    let mut header = Header {
        tempo: Tempo::quarter(options.default_bpm),
        ..Header::default()
    };

    let mut lines = input.lines().enumerate().map(|(i, line)| (i + 1, line));
    let mut found_key = false;
    let mut first_body_line = None;

    for (number, raw) in lines.by_ref() {
        collector.set_line(number);

        if let Some(directive) = raw.trim().strip_prefix("%%") {
            apply_directive(&mut header, directive, true, &mut collector);
            continue;
        }
        let content = strip_comment(raw).trim();
        if content.is_empty() {
            continue;
        }

        match field_line(content) {
            Some((name, value)) => {
                if apply_header_field(&mut header, name, value, &mut collector)?
                    == HeaderFlow::BodyStarts
                {
                    found_key = true;
                    break;
                }
            }
            None => {
                first_body_line = Some((number, raw));
                break;
            }
        }
    }

    if !found_key {
        collector.warning_with_suggestion(
            "Missing K: field, assuming K:C",
            "Add a K: field before the music (e.g., K:C for C major)",
        );
    }

    let mut body = BodyParser::new(&header, options.strict);
    let mut logical = String::new();
    let mut logical_start = 0;

    for (number, raw) in first_body_line.into_iter().chain(lines) {
        collector.set_line(number);

        if let Some(directive) = raw.trim().strip_prefix("%%") {
            apply_directive(&mut header, directive, false, &mut collector);
            continue;
        }
        let content = strip_comment(raw).trim();
        if content.is_empty() {
            continue;
        }

        if logical.is_empty() {
            if let Some((name, value)) = field_line(content) {
                body.apply_field(&mut header, name, value, &mut collector)?;
                continue;
            }
            logical_start = number;
        }

        // A trailing backslash continues the line
        match content.strip_suffix('\\') {
            Some(part) => {
                logical.push_str(part);
                logical.push(' ');
            }
            None => {
                logical.push_str(content);
                collector.set_line(logical_start);
                body.parse_line(&mut header, &logical, &mut collector)?;
                logical.clear();
            }
        }
    }

    if !logical.is_empty() {
        collector.set_line(logical_start);
        body.parse_line(&mut header, &logical, &mut collector)?;
    }

    let document = NotationDocument {
        voices: body.finish(),
        header,
    };
    let feedback = collector.into_feedback();
    debug!(
        title = %document.header.title,
        voices = document.voices.len(),
        feedback = feedback.len(),
        "parsed tune"
    );

    Ok(ParseResult::new(document, feedback))
}

/// Split `K:G` style lines into name and value.
fn field_line(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let name = chars.next().filter(char::is_ascii_alphabetic)?;
    let value = chars.as_str().strip_prefix(':')?;
    Some((name, value))
}

fn strip_comment(line: &str) -> &str {
    match line.find('%') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

/// Handle a `%%` directive line. Only MIDI program and transposition
/// directives mean anything here.
fn apply_directive(
    header: &mut Header,
    directive: &str,
    in_header: bool,
    collector: &mut FeedbackCollector,
) {
    let mut words = directive.split_whitespace();
    match words.next() {
        Some("MIDI") => match words.next() {
            Some("program") => {
                // "%%MIDI program 40" or "%%MIDI program <channel> 40"
                let program = words
                    .last()
                    .and_then(|n| n.parse::<u8>().ok())
                    .filter(|p| *p <= 127);
                match program {
                    Some(program) if in_header => header.midi_program = Some(program),
                    Some(program) => collector.info(format!(
                        "MIDI program {} in the tune body ignored",
                        program
                    )),
                    None => collector.warning(format!(
                        "invalid MIDI program directive '%%{}'",
                        directive.trim()
                    )),
                }
            }
            Some(word) if is_transpose_instruction(word) => note_directive_hint(header, directive, collector),
            _ => debug!(directive = directive.trim(), "MIDI directive ignored"),
        },
        Some(word) if is_transpose_instruction(word) => note_directive_hint(header, directive, collector),
        _ => {}
    }
}

fn note_directive_hint(header: &mut Header, directive: &str, collector: &mut FeedbackCollector) {
    let hint = format!("%%{}", directive.trim());
    collector.info(format!("transposition hint '{}' ignored", hint));
    header.transpose_hints.push(hint);
}
