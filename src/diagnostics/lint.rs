use super::{normalize_file, parse_number, Diagnostic, Severity};
use regex::Regex;
use std::sync::OnceLock;

fn lint_line_regex() -> Option<&'static Regex> {
    // Example:
    //   path/file.cpp:10:5: warning: unused variable 'x' [clang-diagnostic-unused-variable]
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<sev>fatal error|error|warning|note):\s*(?P<msg>.*?)(?:\s*\[(?P<check>[^\[\]]+)\])?\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn columnless_line_regex() -> Option<&'static Regex> {
    // Example (lizard, linkers):
    //   main.c:42: warning: parse_args has 19 CCN and 4 params (60 NLOC, 211 tokens)
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^\s:][^:]*):(?P<line>\d+):\s*(?P<sev>fatal error|error|warning|note):\s*(?P<msg>.*?)(?:\s*\[(?P<check>[^\[\]]+)\])?\s*$",
        )
        .ok()
    })
    .as_ref()
}

/// One regex extraction per line; anything else is ignored.
pub fn parse_lint(text: &str) -> Vec<Diagnostic> {
    let Some(re) = lint_line_regex() else {
        return Vec::new();
    };
    parse_with(re, text)
}

/// Compiler output shares the lint shape; tools that omit the column are
/// accepted as a second pass.
pub fn parse_generic(text: &str) -> Vec<Diagnostic> {
    let diagnostics = parse_lint(text);
    if !diagnostics.is_empty() {
        return diagnostics;
    }
    match columnless_line_regex() {
        Some(re) => parse_with(re, text),
        None => Vec::new(),
    }
}

fn parse_with(re: &Regex, text: &str) -> Vec<Diagnostic> {
    text.lines()
        .filter_map(|raw| {
            let caps = re.captures(raw)?;
            let file = normalize_file(caps.name("file")?.as_str());
            let line = parse_number(caps.name("line"));
            let column = parse_number(caps.name("col"));
            let severity = Severity::from_token(caps.name("sev")?.as_str());
            let message = caps.name("msg")?.as_str().trim().to_string();
            let check = caps
                .name("check")
                .map(|m| m.as_str().trim().to_string())
                .filter(|c| !c.is_empty());
            Some(Diagnostic {
                file,
                line,
                column,
                severity,
                message,
                check,
                context: None,
            })
        })
        .collect()
}
