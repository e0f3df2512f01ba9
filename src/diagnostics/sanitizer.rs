use super::{normalize_file, parse_number, Diagnostic, Severity, MAX_CONTEXT_CHARS};
use regex::Regex;
use std::sync::OnceLock;

const CONTEXT_TRUNCATED_MARKER: &str = "... [context truncated]";

fn summary_regex() -> Option<&'static Regex> {
    // Example:
    //   ==4242==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x602000000014 at pc ...
    //   WARNING: ThreadSanitizer: data race (pid=77)
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:==\d+==\s*)?(?P<kind>ERROR|WARNING):\s*(?P<tool>[A-Za-z]*Sanitizer):\s*(?P<msg>.*?)\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn runtime_error_regex() -> Option<&'static Regex> {
    // Example (UBSan):
    //   main.cpp:7:15: runtime error: signed integer overflow: 2147483647 + 1 cannot be represented in type 'int'
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<file>[^\s:][^:]*):(?P<line>\d+):(?P<col>\d+):\s*runtime error:\s*(?P<msg>.*?)\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn frame_regex() -> Option<&'static Regex> {
    // Example:
    //   #0 0x4f3c2a in main /work/main.cpp:12:5
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*#\d+\s+0x[0-9A-Fa-f]+").ok())
        .as_ref()
}

fn source_location_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<file>[^\s:()]+\.(?:c|cc|cpp|cxx|h|hh|hpp|hxx|inl)):(?P<line>\d+)(?::(?P<col>\d+))?",
        )
        .ok()
    })
    .as_ref()
}

/// Stateful scan: a summary line (or a single-line runtime error) opens a
/// diagnostic, indented and stack-frame lines become its bounded context,
/// and the next summary line or end of input flushes it.
pub fn parse_sanitizer(text: &str) -> Vec<Diagnostic> {
    let (Some(summary_re), Some(runtime_re)) = (summary_regex(), runtime_error_regex()) else {
        return Vec::new();
    };

    let mut diagnostics = Vec::new();
    let mut open: Option<OpenDiagnostic> = None;

    for raw in text.lines() {
        if let Some(caps) = summary_re.captures(raw) {
            if let Some(done) = open.take() {
                diagnostics.push(done.finish());
            }
            let tool = caps.name("tool").map(|m| m.as_str()).unwrap_or("Sanitizer");
            let message = clean_summary_message(caps.name("msg").map(|m| m.as_str()).unwrap_or(""));
            let severity = match caps.name("kind").map(|m| m.as_str()) {
                Some("ERROR") => Severity::Error,
                _ => Severity::Warning,
            };
            open = Some(OpenDiagnostic::new(Diagnostic {
                file: String::new(),
                line: 0,
                column: 0,
                severity,
                check: Some(check_id(tool, &message)),
                message,
                context: None,
            }));
            continue;
        }

        if let Some(caps) = runtime_re.captures(raw) {
            if let Some(done) = open.take() {
                diagnostics.push(done.finish());
            }
            open = Some(OpenDiagnostic::new(Diagnostic {
                file: caps
                    .name("file")
                    .map(|m| normalize_file(m.as_str()))
                    .unwrap_or_default(),
                line: parse_number(caps.name("line")),
                column: parse_number(caps.name("col")),
                severity: Severity::Error,
                message: caps
                    .name("msg")
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                check: Some("UndefinedBehaviorSanitizer".to_string()),
                context: None,
            }));
            continue;
        }

        if let Some(current) = open.as_mut() {
            if is_context_line(raw) {
                current.append(raw);
            }
        }
    }

    if let Some(done) = open.take() {
        diagnostics.push(done.finish());
    }
    diagnostics
}

struct OpenDiagnostic {
    diagnostic: Diagnostic,
    context: String,
    truncated: bool,
}

impl OpenDiagnostic {
    fn new(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostic,
            context: String::new(),
            truncated: false,
        }
    }

    fn append(&mut self, raw: &str) {
        let line = raw.trim();
        if self.diagnostic.file.is_empty() {
            if let Some((file, line_no, column)) = user_source_location(line) {
                self.diagnostic.file = file;
                self.diagnostic.line = line_no;
                self.diagnostic.column = column;
            }
        }
        if self.truncated {
            return;
        }
        if self.context.len() + line.len() + 1 > MAX_CONTEXT_CHARS {
            self.truncated = true;
            return;
        }
        if !self.context.is_empty() {
            self.context.push('\n');
        }
        self.context.push_str(line);
    }

    fn finish(mut self) -> Diagnostic {
        if self.truncated {
            if !self.context.is_empty() {
                self.context.push('\n');
            }
            self.context.push_str(CONTEXT_TRUNCATED_MARKER);
        }
        if !self.context.is_empty() {
            self.diagnostic.context = Some(self.context);
        }
        self.diagnostic
    }
}

fn is_context_line(raw: &str) -> bool {
    if raw.trim().is_empty() {
        return false;
    }
    raw.starts_with(' ')
        || raw.starts_with('\t')
        || frame_regex().map(|re| re.is_match(raw)).unwrap_or(false)
}

/// First source location in a frame that is not inside the system toolchain.
fn user_source_location(line: &str) -> Option<(String, u32, u32)> {
    let re = source_location_regex()?;
    re.captures_iter(line).find_map(|caps| {
        let file = caps.name("file")?.as_str();
        if file.starts_with("/usr/") || file.starts_with("/lib") || file.contains("compiler-rt") {
            return None;
        }
        Some((
            normalize_file(file),
            parse_number(caps.name("line")),
            parse_number(caps.name("col")),
        ))
    })
}

fn clean_summary_message(raw: &str) -> String {
    let mut message = raw.trim();
    for cut in [" at pc ", " (pid="] {
        if let Some(idx) = message.find(cut) {
            message = &message[..idx];
        }
    }
    message.trim().to_string()
}

/// `AddressSanitizer/heap-buffer-overflow` when the report names a bug
/// class, else just the tool.
fn check_id(tool: &str, message: &str) -> String {
    match message.split_whitespace().next() {
        Some(kind) if kind.contains('-') => format!("{}/{}", tool, kind.trim_end_matches(':')),
        _ => tool.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_with_two_frames_is_one_diagnostic() {
        let text = "\
=================================================================
==4242==ERROR: AddressSanitizer: heap-buffer-overflow on address 0x602000000014 at pc 0x4f3c2a bp 0x7ffd sp 0x7ffd
    #0 0x4f3c2a in fill /work/main.cpp:12:5
    #1 0x4f3d10 in main /work/main.cpp:20:3
";
        let diags = parse_sanitizer(text);
        assert_eq!(diags.len(), 1);
        let d = &diags[0];
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "heap-buffer-overflow on address 0x602000000014");
        assert_eq!(
            d.check.as_deref(),
            Some("AddressSanitizer/heap-buffer-overflow")
        );
        let context = d.context.as_deref().unwrap();
        assert!(context.contains("/work/main.cpp:12:5"));
        assert!(context.contains("/work/main.cpp:20:3"));
        assert_eq!(d.file, "/work/main.cpp");
        assert_eq!((d.line, d.column), (12, 5));
    }

    #[test]
    fn runtime_error_line_opens_a_diagnostic() {
        let text = "main.cpp:7:15: runtime error: signed integer overflow: 2147483647 + 1 cannot be represented in type 'int'\nSUMMARY: UndefinedBehaviorSanitizer: undefined-behavior main.cpp:7:15\n";
        let diags = parse_sanitizer(text);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].file, "main.cpp");
        assert_eq!(diags[0].line, 7);
        assert!(diags[0].message.starts_with("signed integer overflow"));
        assert_eq!(diags[0].context, None);
    }

    #[test]
    fn next_summary_flushes_previous() {
        let text = "\
WARNING: ThreadSanitizer: data race (pid=77)
  Write of size 4 at 0x7b04 by thread T1:
    #0 worker /work/race.cpp:8:11 (a.out+0x1234)
WARNING: ThreadSanitizer: data race (pid=77)
  Read of size 4 at 0x7b04 by main thread:
";
        let diags = parse_sanitizer(text);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].message, "data race");
        assert_eq!(diags[0].check.as_deref(), Some("ThreadSanitizer"));
        assert_eq!(diags[0].severity, Severity::Warning);
        assert_eq!(diags[0].line, 8);
        assert!(diags[1].context.as_deref().unwrap().contains("main thread"));
    }

    #[test]
    fn context_is_bounded() {
        let mut text = String::from("==1==ERROR: LeakSanitizer: detected memory leaks\n");
        for i in 0..500 {
            text.push_str(&format!("    #{} 0x{:x} in frame_{} /work/deep.cpp:{}:1\n", i, i + 4096, i, i + 1));
        }
        let diags = parse_sanitizer(&text);
        assert_eq!(diags.len(), 1);
        let context = diags[0].context.as_deref().unwrap();
        assert!(context.len() <= MAX_CONTEXT_CHARS + CONTEXT_TRUNCATED_MARKER.len() + 1);
        assert!(context.ends_with(CONTEXT_TRUNCATED_MARKER));
    }

    #[test]
    fn system_frames_do_not_set_location() {
        let text = "\
==9==ERROR: AddressSanitizer: SEGV on unknown address 0x000000000000
    #0 0x7f in strlen /usr/include/string.h:10:2
    #1 0x4f in count /work/src/text.c:33:9
";
        let diags = parse_sanitizer(text);
        assert_eq!(diags[0].file, "/work/src/text.c");
        assert_eq!(diags[0].line, 33);
        assert_eq!(diags[0].check.as_deref(), Some("AddressSanitizer"));
    }

    #[test]
    fn lines_before_any_summary_are_ignored() {
        assert!(parse_sanitizer("    #0 0x1 in main /work/a.c:1:1\nplain output\n").is_empty());
    }
}
