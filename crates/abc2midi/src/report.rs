//! Per-file outcomes of a bulk conversion.

use owo_colors::OwoColorize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub source: PathBuf,
    pub output: PathBuf,
    pub tracks: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failed {
    pub source: PathBuf,
    /// Full error chain, one line
    pub error: String,
}

/// Successes and failures of one `convert-songs` run, in file name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub converted: Vec<Converted>,
    pub failed: Vec<Failed>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.converted.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Human readable summary with one line per file.
    pub fn render(&self, color: bool) -> String {
        let mut out = String::new();

        for c in &self.converted {
            let mark = if color {
                "✓".bright_green().to_string()
            } else {
                "✓".to_string()
            };
            let _ = write!(out, "{} {} -> {}", mark, name(&c.source), c.output.display());
            if c.warnings > 0 {
                let note = format!("({} warnings)", c.warnings);
                if color {
                    let _ = write!(out, " {}", note.yellow());
                } else {
                    let _ = write!(out, " {}", note);
                }
            }
            out.push('\n');
        }

        for f in &self.failed {
            let mark = if color {
                "✗".bright_red().to_string()
            } else {
                "✗".to_string()
            };
            let _ = writeln!(out, "{} {}: {}", mark, name(&f.source), f.error);
        }

        let summary = format!(
            "Converted {} of {} songs, {} failed",
            self.converted.len(),
            self.total(),
            self.failed.len()
        );
        if color && !self.is_success() {
            let _ = writeln!(out, "{}", summary.bright_red().bold());
        } else if color {
            let _ = writeln!(out, "{}", summary.bright_green().bold());
        } else {
            let _ = writeln!(out, "{}", summary);
        }

        out
    }
}

fn name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
