use super::{normalize_file, parse_number, Diagnostic, Severity};
use regex::Regex;
use std::sync::OnceLock;

fn bracketed_location_regex() -> Option<&'static Regex> {
    // Example (cppcheck legacy template):
    //   [main.cpp:12]: (error) Array 'a[10]' accessed at index 10, which is out of bounds.
    //   [main.cpp:4] -> [main.cpp:9]: (warning) Either the condition is redundant or ...
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*\[(?P<file>[^\]:]+):(?P<line>\d+)\](?:\s*->\s*\[[^\]]+\])*:?\s*\((?P<sev>[A-Za-z]+)\)\s*(?P<msg>.*?)\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn compiler_style_id_regex() -> Option<&'static Regex> {
    // Example (cppcheck --template=gcc, clang --analyze):
    //   main.cpp:12:5: error: Array 'a[10]' accessed at index 10 [arrayIndexOutOfBounds]
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<sev>[A-Za-z]+(?: error)?):\s*(?P<msg>.*?)\s*\[(?P<check>[^\[\]]+)\]\s*$",
        )
        .ok()
    })
    .as_ref()
}

/// Two line shapes are tried in order; the first one that matches anything
/// owns the whole input. Shapes are never mixed.
pub fn parse_deep_analysis(text: &str) -> Vec<Diagnostic> {
    for re in [bracketed_location_regex(), compiler_style_id_regex()]
        .into_iter()
        .flatten()
    {
        let diagnostics = parse_shape(re, text);
        if !diagnostics.is_empty() {
            return diagnostics;
        }
    }
    Vec::new()
}

fn parse_shape(re: &Regex, text: &str) -> Vec<Diagnostic> {
    text.lines()
        .filter_map(|raw| {
            let caps = re.captures(raw)?;
            Some(Diagnostic {
                file: normalize_file(caps.name("file")?.as_str()),
                line: parse_number(caps.name("line")),
                column: parse_number(caps.name("col")),
                severity: Severity::from_token(caps.name("sev")?.as_str()),
                message: caps.name("msg")?.as_str().trim().to_string(),
                check: caps.name("check").map(|m| m.as_str().trim().to_string()),
                context: None,
            })
        })
        .collect()
}
