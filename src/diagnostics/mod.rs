//! Normalizes raw tool output into one `Diagnostic` shape.
//!
//! Four text families are understood: lint (clang-tidy style), deep analysis
//! (cppcheck / clang analyzer), sanitizer reports, and generic compiler
//! output. Parsing is pure; anything unrecognized degrades to raw text in the
//! renderers instead of being dropped.

mod analyzer;
mod lint;
mod render;
mod sanitizer;

pub use analyzer::parse_deep_analysis;
pub use lint::{parse_generic, parse_lint};
pub use render::{render_human, render_machine, render_raw, strip_path_prefix, Palette};
pub use sanitizer::parse_sanitizer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on context text attached to one diagnostic.
pub const MAX_CONTEXT_CHARS: usize = 2_048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }

    /// Map a tool's severity word onto the three-level model.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal error" | "fatal" => Severity::Error,
            "warning" | "style" | "performance" | "portability" => Severity::Warning,
            _ => Severity::Note,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    /// 0 when the tool does not report a column
    pub column: u32,
    pub severity: Severity,
    pub message: String,
    pub check: Option<String>,
    pub context: Option<String>,
}

/// Which parser understands a gate's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticFormat {
    Lint,
    DeepAnalysis,
    Sanitizer,
    Compiler,
    None,
}

impl DiagnosticFormat {
    pub fn parse(self, text: &str) -> Vec<Diagnostic> {
        match self {
            DiagnosticFormat::Lint => parse_lint(text),
            DiagnosticFormat::DeepAnalysis => parse_deep_analysis(text),
            DiagnosticFormat::Sanitizer => parse_sanitizer(text),
            DiagnosticFormat::Compiler => parse_generic(text),
            DiagnosticFormat::None => Vec::new(),
        }
    }

    /// clang-tidy prints findings on stdout; compilers, analyzers and
    /// sanitizers on stderr.
    pub fn reads_stdout(self) -> bool {
        matches!(self, DiagnosticFormat::Lint)
    }
}

pub(crate) fn parse_number(raw: Option<regex::Match<'_>>) -> u32 {
    raw.and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0)
}

pub(crate) fn normalize_file(raw: &str) -> String {
    raw.trim().trim_start_matches("./").replace('\\', "/")
}
