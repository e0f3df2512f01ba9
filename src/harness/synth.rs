use super::{AcceptanceCriteria, Example};
use crate::artifact::Language;
use crate::gates::heuristics::{find_entry_point, mask_comments_and_literals};
use regex::Regex;
use std::fmt::Write as _;
use std::sync::OnceLock;

const WARMUP_CALLS: u32 = 10;
const CONCURRENT_WORKERS: u32 = 4;
const CONCURRENT_ROUNDS: u32 = 100;

/// Candidate source with its `main` definition cut out.
pub fn strip_entry_point(source: &str) -> String {
    match find_entry_point(source) {
        Some(range) => {
            let mut stripped = String::with_capacity(source.len());
            stripped.push_str(&source[..range.start]);
            stripped.push_str("/* entry point removed by crucible */");
            stripped.push_str(&source[range.end..]);
            stripped
        }
        None => source.to_string(),
    }
}

enum Comparison {
    Exact,
    Text,
    Approximate,
    Braced,
}

fn comparison(expected: &str) -> Comparison {
    let trimmed = expected.trim();
    if trimmed.starts_with('"') {
        return Comparison::Text;
    }
    if trimmed.starts_with('{') {
        return Comparison::Braced;
    }
    let looks_floating = trimmed.contains('.') || trimmed.contains(['e', 'E']) && !trimmed.starts_with("0x");
    if looks_floating && trimmed.trim_end_matches(['f', 'F']).parse::<f64>().is_ok() {
        return Comparison::Approximate;
    }
    Comparison::Exact
}

/// Escape text for use inside a C string literal.
fn c_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// `None` for expectations the language cannot compare (braced lists in C).
fn check_expression(example: &Example, language: Language) -> Option<String> {
    let check = match (language, comparison(&example.expected)) {
        (Language::Cxx, Comparison::Exact) => {
            format!("crucible_harness::same({}, {})", example.call, example.expected)
        }
        (Language::Cxx, Comparison::Text) => format!(
            "crucible_harness::same_text({}, {})",
            example.call, example.expected
        ),
        (Language::Cxx, Comparison::Approximate) => {
            format!("crucible_harness::near({}, {})", example.call, example.expected)
        }
        (Language::C, Comparison::Exact) => {
            format!("CRUCIBLE_SAME({}, {})", example.call, example.expected)
        }
        (Language::C, Comparison::Text) => {
            format!("CRUCIBLE_SAME_TEXT({}, {})", example.call, example.expected)
        }
        (Language::C, Comparison::Approximate) => {
            format!("CRUCIBLE_NEAR({}, {})", example.call, example.expected)
        }
        (Language::Cxx, Comparison::Braced) => format!(
            "crucible_harness::same({call}, std::decay_t<decltype({call})>{expected})",
            call = example.call,
            expected = example.expected
        ),
        (Language::C, Comparison::Braced) => return None,
    };
    Some(check)
}

const CXX_ACCEPTANCE_PRELUDE: &str = r#"
#include <cstdio>
#include <cstring>
#include <string>
#include <type_traits>

namespace crucible_harness {
int passed = 0;
int failed = 0;

template <typename A, typename E>
bool same(const A& actual, const E& expected) {
    return actual == expected;
}

template <typename A>
bool same_text(const A& actual, const char* expected) {
    return std::string(actual) == expected;
}

inline bool same_text(const char* actual, const char* expected) {
    return actual != nullptr && std::strcmp(actual, expected) == 0;
}

template <typename A>
bool near(const A& actual, double expected) {
    const double diff = static_cast<double>(actual) - expected;
    const double scale = 1.0 + (expected < 0 ? -expected : expected);
    return (diff < 0 ? -diff : diff) <= 1e-6 * scale;
}

void report(bool ok, const char* expr, const char* want, int line) {
    if (ok) {
        ++passed;
        std::printf("PASS: %s == %s\n", expr, want);
    } else {
        ++failed;
        std::printf("FAIL: %s != %s (definition of done line %d)\n", expr, want, line);
    }
}
}  // namespace crucible_harness
"#;

const C_ACCEPTANCE_PRELUDE: &str = r#"
#include <stdbool.h>
#include <stdio.h>
#include <string.h>

static int crucible_passed = 0;
static int crucible_failed = 0;

#define CRUCIBLE_SAME(actual, expected) ((actual) == (expected))
#define CRUCIBLE_SAME_TEXT(actual, expected) ((actual) != NULL && strcmp((actual), (expected)) == 0)
#define CRUCIBLE_NEAR(actual, expected) crucible_near((double)(actual), (double)(expected))

static int crucible_near(double actual, double expected) {
    const double diff = actual - expected;
    const double scale = 1.0 + (expected < 0 ? -expected : expected);
    return (diff < 0 ? -diff : diff) <= 1e-6 * scale;
}

static void crucible_report(int ok, const char *expr, const char *want, int line) {
    if (ok) {
        ++crucible_passed;
        printf("PASS: %s == %s\n", expr, want);
    } else {
        ++crucible_failed;
        printf("FAIL: %s != %s (definition of done line %d)\n", expr, want, line);
    }
}
"#;

/// Self-checking program: the candidate without its entry point, one
/// checked assertion per example, a tally, exit 1 on any mismatch. `None`
/// when there are no examples.
pub fn synthesize_acceptance(
    source: &str,
    criteria: &AcceptanceCriteria,
    language: Language,
) -> Option<String> {
    if criteria.examples.is_empty() {
        return None;
    }
    let mut out = String::new();
    out.push_str("// Acceptance harness generated by crucible.\n");
    out.push_str(&strip_entry_point(source));
    out.push('\n');

    match language {
        Language::Cxx => {
            out.push_str(CXX_ACCEPTANCE_PRELUDE);
            if criteria.thread_safe {
                out.push_str("\n#include <atomic>\n#include <thread>\n#include <vector>\n");
            }
            out.push_str("\nint main() {\n");
            for example in &criteria.examples {
                let Some(check) = check_expression(example, language) else {
                    continue;
                };
                let _ = writeln!(
                    out,
                    "    crucible_harness::report({}, {}, {}, {});",
                    check,
                    c_string(&example.call),
                    c_string(&example.expected),
                    example.line
                );
            }
            if criteria.thread_safe {
                push_concurrent_round(&mut out, criteria);
            }
            out.push_str(
                "    std::printf(\"%d passed, %d failed\\n\", crucible_harness::passed, crucible_harness::failed);\n",
            );
            out.push_str("    return crucible_harness::failed == 0 ? 0 : 1;\n}\n");
        }
        Language::C => {
            out.push_str(C_ACCEPTANCE_PRELUDE);
            out.push_str("\nint main(void) {\n");
            for example in &criteria.examples {
                let Some(check) = check_expression(example, language) else {
                    continue;
                };
                let _ = writeln!(
                    out,
                    "    crucible_report({}, {}, {}, {});",
                    check,
                    c_string(&example.call),
                    c_string(&example.expected),
                    example.line
                );
            }
            out.push_str("    printf(\"%d passed, %d failed\\n\", crucible_passed, crucible_failed);\n");
            out.push_str("    return crucible_failed == 0 ? 0 : 1;\n}\n");
        }
    }
    Some(out)
}

/// Re-evaluate every example from several threads at once and report any
/// result that differs from the sequential pass.
fn push_concurrent_round(out: &mut String, criteria: &AcceptanceCriteria) {
    out.push_str("    if (crucible_harness::failed == 0) {\n");
    out.push_str("        std::atomic<int> mismatches{0};\n");
    out.push_str("        std::vector<std::thread> workers;\n");
    let _ = writeln!(out, "        for (int t = 0; t < {}; ++t) {{", CONCURRENT_WORKERS);
    out.push_str("            workers.emplace_back([&mismatches]() {\n");
    let _ = writeln!(
        out,
        "                for (int round = 0; round < {}; ++round) {{",
        CONCURRENT_ROUNDS
    );
    for check in criteria
        .examples
        .iter()
        .filter_map(|example| check_expression(example, Language::Cxx))
    {
        let _ = writeln!(out, "                    if (!{}) ++mismatches;", check);
    }
    out.push_str("                }\n            });\n        }\n");
    out.push_str("        for (auto& worker : workers) worker.join();\n");
    out.push_str(
        "        crucible_harness::report(mismatches.load() == 0, \"concurrent calls\", \"sequential results\", 0);\n",
    );
    out.push_str("    }\n");
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchTarget {
    pub call: String,
    pub returns_void: bool,
}

fn declaration_regex() -> Option<&'static Regex> {
    // Example:
    //   static unsigned long long fib(int n) {
    //   std::string render(const std::string& name) const {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^[ \t]*(?:(?:static|inline|constexpr|extern)\s+)*(?P<ret>(?:const\s+)?(?:(?:unsigned|signed)\s+)?(?:int|long|short|double|float|bool|char|size_t|void|std::\w+|u?int\d+_t)\b[\w\s\*&:<>,]*?)\b(?P<name>[A-Za-z_]\w*)\s*\((?P<params>[^()]*)\)\s*(?:const\s*)?(?:noexcept\s*)?\{",
        )
        .ok()
    })
    .as_ref()
}

/// Literal argument for a single parameter, or `None` when the type is not
/// one we can fabricate a value for.
fn sample_argument(param: &str) -> Option<&'static str> {
    let param = param.trim();
    let mutable_ref = param.contains('&') && !param.contains("const");
    if mutable_ref {
        return None;
    }
    if param.contains("char") && param.contains('*') || param.contains("string") {
        return Some("\"crucible\"");
    }
    if param.contains('*') {
        return None;
    }
    if param.contains("double") || param.contains("float") {
        return Some("1.5");
    }
    if param.contains("bool") {
        return Some("true");
    }
    let integral = ["int", "long", "short", "size_t", "unsigned", "char"];
    if integral.iter().any(|t| param.contains(t)) {
        return Some("42");
    }
    None
}

/// What the benchmark calls: the first example's expression, else the first
/// non-entry-point function we can call with zero or one fabricated argument.
pub fn benchmark_target(source: &str, criteria: &AcceptanceCriteria) -> Option<BenchTarget> {
    if let Some(example) = criteria.examples.first() {
        return Some(BenchTarget {
            call: example.call.clone(),
            returns_void: false,
        });
    }
    let re = declaration_regex()?;
    let masked = mask_comments_and_literals(&strip_entry_point(source));
    re.captures_iter(&masked).find_map(|caps| {
        let name = caps.name("name")?.as_str();
        if name == "main" {
            return None;
        }
        let params = caps.name("params")?.as_str().trim();
        let call = if params.is_empty() || params == "void" {
            format!("{}()", name)
        } else if params.contains(',') {
            return None;
        } else {
            format!("{}({})", name, sample_argument(params)?)
        };
        Some(BenchTarget {
            call,
            returns_void: caps.name("ret")?.as_str().trim() == "void",
        })
    })
}

/// Timing program: 10 warm-up calls, then N timed calls; exits 1 only when
/// elapsed milliseconds exceed the ceiling. `None` without a budget or a
/// callable target.
pub fn synthesize_benchmark(
    source: &str,
    criteria: &AcceptanceCriteria,
    language: Language,
) -> Option<String> {
    let budget = criteria.budget?;
    let target = benchmark_target(source, criteria)?;

    let mut out = String::new();
    out.push_str("// Benchmark harness generated by crucible.\n");
    out.push_str(&strip_entry_point(source));
    out.push('\n');

    match language {
        Language::Cxx => {
            out.push_str(
                r#"
#include <chrono>
#include <cstdio>
#include <type_traits>

namespace crucible_bench {
template <typename F>
inline void run_once(F&& f) {
    if constexpr (std::is_void_v<decltype(f())>) {
        f();
    } else {
        auto result = f();
        asm volatile("" : : "r"(&result) : "memory");
    }
}
}  // namespace crucible_bench

int main() {
"#,
            );
            let _ = writeln!(out, "    auto call = []() {{ return {}; }};", target.call);
            let _ = writeln!(
                out,
                "    for (int i = 0; i < {}; ++i) crucible_bench::run_once(call);",
                WARMUP_CALLS
            );
            out.push_str("    const auto start = std::chrono::steady_clock::now();\n");
            let _ = writeln!(
                out,
                "    for (unsigned long long i = 0; i < {}ULL; ++i) crucible_bench::run_once(call);",
                budget.iterations
            );
            out.push_str("    const auto end = std::chrono::steady_clock::now();\n");
            out.push_str(
                "    const double elapsed_ms = std::chrono::duration<double, std::milli>(end - start).count();\n",
            );
            let _ = writeln!(
                out,
                "    std::printf(\"elapsed_ms=%.3f budget_ms={} iterations={}\\n\", elapsed_ms);",
                budget.max_ms, budget.iterations
            );
            let _ = writeln!(out, "    if (elapsed_ms > {}.0) {{", budget.max_ms);
            let _ = writeln!(
                out,
                "        std::printf(\"FAIL: {} calls took %.3f ms, budget {} ms\\n\", elapsed_ms);",
                budget.iterations, budget.max_ms
            );
            out.push_str("        return 1;\n    }\n    return 0;\n}\n");
        }
        Language::C => {
            out.push_str(
                r#"
#include <stdio.h>
#include <time.h>

static double crucible_now_ms(void) {
    struct timespec ts;
    timespec_get(&ts, TIME_UTC);
    return (double)ts.tv_sec * 1000.0 + (double)ts.tv_nsec / 1e6;
}

"#,
            );
            let statement = if target.returns_void {
                format!("{};", target.call)
            } else {
                format!(
                    "{{ __typeof__({call}) crucible_result = {call}; __asm__ volatile(\"\" : : \"r\"(&crucible_result) : \"memory\"); }}",
                    call = target.call
                )
            };
            out.push_str("int main(void) {\n    unsigned long long i;\n");
            let _ = writeln!(out, "    for (i = 0; i < {}ULL; ++i) {}", WARMUP_CALLS, statement);
            out.push_str("    double start = crucible_now_ms();\n");
            let _ = writeln!(
                out,
                "    for (i = 0; i < {}ULL; ++i) {}",
                budget.iterations, statement
            );
            out.push_str("    double elapsed_ms = crucible_now_ms() - start;\n");
            let _ = writeln!(
                out,
                "    printf(\"elapsed_ms=%.3f budget_ms={} iterations={}\\n\", elapsed_ms);",
                budget.max_ms, budget.iterations
            );
            let _ = writeln!(out, "    if (elapsed_ms > {}.0) {{", budget.max_ms);
            let _ = writeln!(
                out,
                "        printf(\"FAIL: {} calls took %.3f ms, budget {} ms\\n\", elapsed_ms);",
                budget.iterations, budget.max_ms
            );
            out.push_str("        return 1;\n    }\n    return 0;\n}\n");
        }
    }
    Some(out)
}
