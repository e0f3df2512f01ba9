use super::{Diagnostic, Severity};
use crate::sandbox::SANDBOX_WORKDIR;
use crate::util::{strip_ansi_sequences, truncate};
use crossterm::style::{Color, Stylize};
use std::path::Path;

const MACHINE_MESSAGE_MAX_CHARS: usize = 240;
const RAW_INDENT: &str = "    ";

/// Colors for the human formatter. Passed in explicitly; `plain()` disables
/// styling for pipes and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub enabled: bool,
    pub error: Color,
    pub warning: Color,
    pub note: Color,
    pub location: Color,
    pub check: Color,
    pub context: Color,
}

impl Default for Palette {
    fn default() -> Self {
        Self::colored()
    }
}

impl Palette {
    pub fn colored() -> Self {
        Self {
            enabled: true,
            error: Color::Red,
            warning: Color::Yellow,
            note: Color::Cyan,
            location: Color::White,
            check: Color::Magenta,
            context: Color::DarkGrey,
        }
    }

    pub fn plain() -> Self {
        Self {
            enabled: false,
            ..Self::colored()
        }
    }

    fn severity_color(&self, severity: Severity) -> Color {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Note => self.note,
        }
    }

    fn paint(&self, text: &str, color: Color, bold: bool) -> String {
        if !self.enabled {
            return text.to_string();
        }
        if bold {
            format!("{}", text.with(color).bold())
        } else {
            format!("{}", text.with(color))
        }
    }
}

/// Multi-line, colorized form for people.
pub fn render_human(diagnostic: &Diagnostic, palette: &Palette) -> String {
    let mut out = String::new();
    out.push_str(&palette.paint(&location(diagnostic, &diagnostic.file), palette.location, true));
    out.push_str(": ");
    out.push_str(&palette.paint(
        diagnostic.severity.as_str(),
        palette.severity_color(diagnostic.severity),
        true,
    ));
    out.push_str(": ");
    out.push_str(&diagnostic.message);
    if let Some(check) = &diagnostic.check {
        out.push(' ');
        out.push_str(&palette.paint(&format!("[{}]", check), palette.check, false));
    }
    if let Some(context) = &diagnostic.context {
        for line in context.lines() {
            out.push('\n');
            out.push_str(RAW_INDENT);
            out.push_str(&palette.paint(line, palette.context, false));
        }
    }
    out
}

/// Compact form for the generation collaborator: one diagnostic per line,
/// path prefixes stripped, at most `max_lines` lines including the
/// truncation marker.
pub fn render_machine(diagnostics: &[Diagnostic], max_lines: usize) -> String {
    if max_lines == 0 || diagnostics.is_empty() {
        return String::new();
    }
    let fits = diagnostics.len() <= max_lines;
    let shown = if fits { diagnostics.len() } else { max_lines - 1 };

    let mut lines = diagnostics[..shown]
        .iter()
        .map(machine_line)
        .collect::<Vec<_>>();
    if !fits {
        lines.push(format!(
            "... {} more diagnostics omitted",
            diagnostics.len() - shown
        ));
    }
    lines.join("\n")
}

fn machine_line(diagnostic: &Diagnostic) -> String {
    let file = strip_path_prefix(&diagnostic.file);
    let message = diagnostic.message.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut line = format!(
        "{}: {}: {}",
        location(diagnostic, &file),
        diagnostic.severity,
        truncate(&message, MACHINE_MESSAGE_MAX_CHARS)
    );
    if let Some(check) = &diagnostic.check {
        line.push_str(&format!(" [{}]", check));
    }
    line
}

fn location(diagnostic: &Diagnostic, file: &str) -> String {
    if file.is_empty() {
        return "<unknown>".to_string();
    }
    match (diagnostic.line, diagnostic.column) {
        (0, _) => file.to_string(),
        (line, 0) => format!("{}:{}", file, line),
        (line, column) => format!("{}:{}:{}", file, line, column),
    }
}

/// Fallback when no known format matched: indented raw text, first
/// `max_lines` non-empty lines, ANSI codes removed.
pub fn render_raw(text: &str, max_lines: usize) -> String {
    let cleaned = strip_ansi_sequences(text);
    let lines = cleaned
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>();
    let mut out = lines
        .iter()
        .take(max_lines)
        .map(|line| format!("{}{}", RAW_INDENT, line.trim_end()))
        .collect::<Vec<_>>();
    if lines.len() > max_lines {
        out.push(format!(
            "{}... {} more lines omitted",
            RAW_INDENT,
            lines.len() - max_lines
        ));
    }
    out.join("\n")
}

/// Drop sandbox and scratch-directory prefixes so feedback names files the
/// way the artifact does.
pub fn strip_path_prefix(file: &str) -> String {
    let mut path = file.trim();
    let workdir_prefix = format!("{}/", SANDBOX_WORKDIR);
    if let Some(rest) = path.strip_prefix(&workdir_prefix) {
        path = rest;
    }
    if let Some(idx) = path.find("/crucible-") {
        if let Some(slash) = path[idx + 1..].find('/') {
            path = &path[idx + 1 + slash + 1..];
        }
    }
    let path = path.trim_start_matches("./");
    if path.starts_with('/') {
        return Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string());
    }
    path.to_string()
}
