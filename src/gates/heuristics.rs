//! Text scans over C/C++ source.
//!
//! These are regex and brace-matching approximations, not a parser. They can
//! be fooled by macros and unusual formatting and are kept as best-effort
//! signals.

use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::OnceLock;

fn threading_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"std::(?:thread|jthread|async|mutex|shared_mutex|atomic|condition_variable)\b|\bpthread_(?:create|mutex_lock|t)\b|#\s*include\s*<(?:thread|pthread\.h|threads\.h|mutex|atomic|future)>|#\s*pragma\s+omp\s+parallel|\bthrd_create\b",
        )
        .ok()
    })
    .as_ref()
}

/// True when the text uses any recognized threading API.
pub fn has_threading_indicators(text: &str) -> bool {
    threading_regex()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Blank out comment bodies and string/char literal contents, keeping byte
/// offsets and newlines intact so positions map back to the original text.
pub fn mask_comments_and_literals(text: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        Char,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();
    // Inside a numeric literal, where `'` is a digit separator (`1'000`)
    let mut in_number = false;
    let mut prev = '\n';
    let blank = |out: &mut String, ch: char| {
        if ch == '\n' {
            out.push('\n');
        } else {
            for _ in 0..ch.len_utf8() {
                out.push(' ');
            }
        }
    };

    while let Some(ch) = chars.next() {
        match state {
            State::Code => match ch {
                '\'' if in_number && chars.peek().is_some_and(|next| next.is_ascii_alphanumeric()) => {
                    out.push(ch);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                '"' => {
                    out.push('"');
                    state = State::Str;
                }
                '\'' => {
                    out.push('\'');
                    state = State::Char;
                }
                _ => {
                    if ch.is_ascii_digit() && !(prev.is_ascii_alphanumeric() || prev == '_') {
                        in_number = true;
                    } else if !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_') {
                        in_number = false;
                    }
                    out.push(ch);
                }
            },
            State::LineComment => {
                blank(&mut out, ch);
                if ch == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else {
                    blank(&mut out, ch);
                }
            }
            State::Str | State::Char => {
                let closing = if state == State::Str { '"' } else { '\'' };
                if ch == '\\' {
                    blank(&mut out, ch);
                    if let Some(escaped) = chars.next() {
                        blank(&mut out, escaped);
                    }
                } else if ch == closing {
                    out.push(ch);
                    state = State::Code;
                } else if ch == '\n' {
                    // Unterminated literal; resynchronize at the line end.
                    out.push('\n');
                    state = State::Code;
                } else {
                    blank(&mut out, ch);
                }
            }
        }
        if state != State::Code {
            in_number = false;
        }
        prev = ch;
    }
    out
}

/// Byte index of the delimiter closing the one at `open`. Expects masked
/// text (see [`mask_comments_and_literals`]).
pub fn matching_delimiter(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let opener = *bytes.get(open)?;
    let closer = match opener {
        b'{' => b'}',
        b'(' => b')',
        b'[' => b']',
        _ => return None,
    };
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        if b == opener {
            depth += 1;
        } else if b == closer {
            depth -= 1;
            if depth == 0 {
                return Some(idx);
            }
        }
    }
    None
}

/// 1-based line number of a byte offset.
pub fn line_of(text: &str, offset: usize) -> u32 {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() as u32 + 1
}

fn entry_point_regex() -> Option<&'static Regex> {
    // Example:
    //   int main(int argc, char **argv) {
    //   int main(void)
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*(?:(?:static|extern|inline|signed)\s+)*(?:int|void|auto)\s+main\s*\(").ok()
    })
    .as_ref()
}

/// Byte range of the program entry point definition, signature through the
/// closing brace.
pub fn find_entry_point(text: &str) -> Option<Range<usize>> {
    let re = entry_point_regex()?;
    let masked = mask_comments_and_literals(text);
    let found = re.find(&masked)?;
    let paren = found.end() - 1;
    let params_end = matching_delimiter(&masked, paren)?;
    let body_start = masked[params_end + 1..]
        .find(|c: char| !c.is_whitespace())
        .map(|idx| params_end + 1 + idx)?;
    if masked.as_bytes().get(body_start) != Some(&b'{') {
        return None;
    }
    let body_end = matching_delimiter(&masked, body_start)?;
    Some(found.start()..body_end + 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBody {
    pub name: String,
    pub line: u32,
    pub body: Range<usize>,
}

fn isr_regex() -> Option<&'static Regex> {
    // Example:
    //   ISR(TIMER1_COMPA_vect) {
    //   void USART1_IRQHandler(void) {
    //   void __attribute__((interrupt("IRQ"))) tick_isr(void) {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\bISR\s*\(\s*(?P<avr>\w+)[^)]*\)|\b(?P<cmsis>\w+_(?:IRQ)?Handler)\s*\([^)]*\)|__attribute__\s*\(\(\s*(?:interrupt|isr|signal)\b[^;{]*?\b(?P<attr>\w+)\s*\([^)]*\)",
        )
        .ok()
    })
    .as_ref()
}

/// Interrupt service routine definitions with their body ranges.
pub fn find_isr_bodies(text: &str) -> Vec<FunctionBody> {
    let Some(re) = isr_regex() else {
        return Vec::new();
    };
    let masked = mask_comments_and_literals(text);
    let mut bodies = Vec::new();
    for caps in re.captures_iter(&masked) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let Some(name) = caps
            .name("avr")
            .or_else(|| caps.name("cmsis"))
            .or_else(|| caps.name("attr"))
        else {
            continue;
        };
        // A `;` before the `{` means a prototype.
        let rest = &masked[whole.end()..];
        let Some(open_rel) = rest.find(['{', ';']) else {
            continue;
        };
        if rest.as_bytes()[open_rel] != b'{' {
            continue;
        }
        let open = whole.end() + open_rel;
        let Some(close) = matching_delimiter(&masked, open) else {
            continue;
        };
        bodies.push(FunctionBody {
            name: name.as_str().to_string(),
            line: line_of(text, whole.start()),
            body: open..close + 1,
        });
    }
    bodies
}

fn isr_unsafe_call_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?P<call>malloc|calloc|realloc|free|printf|fprintf|puts|sleep|usleep|nanosleep|HAL_Delay|vTaskDelay|pthread_mutex_lock)\s*\(|\b(?P<keyword>new|delete)\b|\bstd::(?P<stream>cout|cerr)\b|\b(?P<guard>lock_guard|unique_lock|scoped_lock)\b|\.(?P<lock>lock)\s*\(",
        )
        .ok()
    })
    .as_ref()
}

/// `(handler, call, line)` for every blocking or allocating call made
/// directly inside an interrupt handler.
pub fn find_isr_unsafe_calls(text: &str) -> Vec<(String, String, u32)> {
    let Some(re) = isr_unsafe_call_regex() else {
        return Vec::new();
    };
    let masked = mask_comments_and_literals(text);
    let mut found = Vec::new();
    for isr in find_isr_bodies(text) {
        let body = &masked[isr.body.clone()];
        for caps in re.captures_iter(body) {
            let call = ["call", "keyword", "stream", "guard", "lock"]
                .iter()
                .find_map(|group| caps.name(group))
                .map(|m| m.as_str().to_string());
            if let (Some(call), Some(whole)) = (call, caps.get(0)) {
                found.push((
                    isr.name.clone(),
                    call,
                    line_of(text, isr.body.start + whole.start()),
                ));
            }
        }
    }
    found
}

pub const BANNED_CALLS: &[&str] = &[
    "gets", "strcpy", "strcat", "sprintf", "vsprintf", "system", "tmpnam", "mktemp",
];

fn banned_call_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        let names = BANNED_CALLS.join("|");
        Regex::new(&format!(r"(?P<prefix>\.|->)?\b(?P<name>{})\s*\(", names)).ok()
    })
    .as_ref()
}

/// `(call, line)` for each use of a banned libc function outside comments
/// and literals. Member calls with the same name are ignored.
pub fn find_banned_calls(text: &str) -> Vec<(String, u32)> {
    let Some(re) = banned_call_regex() else {
        return Vec::new();
    };
    let masked = mask_comments_and_literals(text);
    re.captures_iter(&masked)
        .filter(|caps| caps.name("prefix").is_none())
        .filter_map(|caps| {
            let name = caps.name("name")?;
            Some((name.as_str().to_string(), line_of(text, name.start())))
        })
        .collect()
}

fn loop_header_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:for|while)\s*\(").ok())
        .as_ref()
}

fn allocation_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bnew\b|\b(?:malloc|calloc|realloc)\s*\(|\bstd::make_(?:unique|shared)\b").ok()
    })
    .as_ref()
}

/// Heap allocations inside loop bodies, each counted once even when loops
/// nest.
pub fn count_allocations_in_loops(text: &str) -> usize {
    let (Some(loops), Some(allocs)) = (loop_header_regex(), allocation_regex()) else {
        return 0;
    };
    let masked = mask_comments_and_literals(text);
    let mut seen = BTreeSet::new();
    for header in loops.find_iter(&masked) {
        let paren = header.end() - 1;
        let Some(cond_end) = matching_delimiter(&masked, paren) else {
            continue;
        };
        let Some(offset) = masked[cond_end + 1..].find(|c: char| !c.is_whitespace()) else {
            continue;
        };
        let open = cond_end + 1 + offset;
        if masked.as_bytes()[open] != b'{' {
            continue;
        }
        let Some(close) = matching_delimiter(&masked, open) else {
            continue;
        };
        for alloc in allocs.find_iter(&masked[open..close]) {
            seen.insert(open + alloc.start());
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threading_indicators_are_detected() {
        assert!(has_threading_indicators("#include <thread>\n"));
        assert!(has_threading_indicators("pthread_create(&t, NULL, run, NULL);"));
        assert!(has_threading_indicators("std::atomic<int> n{0};"));
        assert!(has_threading_indicators("#pragma omp parallel for"));
        assert!(!has_threading_indicators("int threads = 4; // configurable"));
    }

    #[test]
    fn masking_preserves_offsets() {
        let text = "int a; // gets(x)\nchar *s = \"strcpy(\"; /* é */ int b;";
        let masked = mask_comments_and_literals(text);
        assert_eq!(masked.len(), text.len());
        assert!(!masked.contains("gets"));
        assert!(!masked.contains("strcpy"));
        assert!(masked.ends_with("int b;"));
        assert_eq!(masked.lines().count(), 2);
    }

    #[test]
    fn digit_separators_do_not_open_char_literals() {
        let text = "int n = 1'000'000; unsigned m = 0xFF'FF; char c = u8'a'; strcpy(d, s);";
        let masked = mask_comments_and_literals(text);
        assert_eq!(masked.len(), text.len());
        assert!(masked.contains("1'000'000;"));
        assert!(masked.contains("0xFF'FF;"));
        assert!(masked.contains("u8' ';"));
        assert!(masked.ends_with("strcpy(d, s);"));
    }

    #[test]
    fn entry_point_spans_the_whole_definition() {
        let text = "int add(int a, int b) { return a + b; }\n\nint main(void) {\n  if (add(1, 2) != 3) { return 1; }\n  puts(\"}\");\n  return 0;\n}\n";
        let range = find_entry_point(text).unwrap();
        assert!(text[range.clone()].starts_with("int main(void)"));
        assert!(text[range.clone()].ends_with("return 0;\n}"));
        assert_eq!(&text[..range.start], "int add(int a, int b) { return a + b; }\n\n");
    }

    #[test]
    fn entry_point_prototype_is_ignored() {
        assert_eq!(find_entry_point("int main(void);\n"), None);
        assert_eq!(find_entry_point("int helper(void) { return 0; }"), None);
    }

    #[test]
    fn isr_unsafe_calls_are_reported() {
        let text = "\
void USART1_IRQHandler(void);
void USART1_IRQHandler(void) {
    char *buf = malloc(16);
    printf(\"rx\\n\");
    free(buf);
}
ISR(TIMER1_COMPA_vect) {
    ticks++;
}
void __attribute__((interrupt(\"IRQ\"))) tick_isr(void) {
    HAL_Delay(1);
}
";
        let calls = find_isr_unsafe_calls(text);
        let names = calls.iter().map(|(_, c, _)| c.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["malloc", "printf", "free", "HAL_Delay"]);
        assert_eq!(calls[0].0, "USART1_IRQHandler");
        assert_eq!(calls[0].2, 3);
        assert_eq!(calls[3].0, "tick_isr");
    }

    #[test]
    fn banned_calls_skip_comments_and_members() {
        let text = "// never use gets()\nvoid f(char *d, const char *s) {\n  strcpy(d, s);\n  obj.system(1);\n  sprintf(d, \"%s\", s);\n}\n";
        let found = find_banned_calls(text);
        assert_eq!(
            found,
            vec![("strcpy".to_string(), 3), ("sprintf".to_string(), 5)]
        );
    }

    #[test]
    fn allocations_in_nested_loops_count_once() {
        let text = "\
void tick() {
    for (int i = 0; i < n; ++i) {
        while (busy()) {
            auto *p = new Particle();
        }
        buf = malloc(8);
    }
    auto *once = new World();
}
";
        assert_eq!(count_allocations_in_loops(text), 2);
    }

    #[test]
    fn line_numbers_are_one_based() {
        assert_eq!(line_of("a\nb\nc", 0), 1);
        assert_eq!(line_of("a\nb\nc", 4), 3);
    }
}
