//! Definition of Done → extra gates
//!
//! A free-text Definition of Done is mined for worked examples
//! (`factorial(5) == 120`), behavioral flags and a performance budget. The
//! examples become an acceptance program and the budget a benchmark program;
//! both are compiled and run in the sandbox after the core gates pass.

mod synth;

pub use synth::{benchmark_target, strip_entry_point, synthesize_acceptance, synthesize_benchmark, BenchTarget};

use crate::artifact::{Artifact, Language};
use crate::gates::heuristics::find_entry_point;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

pub const ACCEPTANCE_FILE_STEM: &str = "crucible_acceptance";
pub const BENCHMARK_FILE_STEM: &str = "crucible_benchmark";

/// One worked example from the Definition of Done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Call expression, e.g. `factorial(5)`
    pub call: String,
    /// Expected value as a source literal, e.g. `120` or `"cba"`
    pub expected: String,
    /// 1-based line in the Definition of Done
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceBudget {
    pub iterations: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriteria {
    pub examples: Vec<Example>,
    pub handle_empty: bool,
    pub handle_negative: bool,
    pub thread_safe: bool,
    pub budget: Option<PerformanceBudget>,
}

fn example_regex() -> Option<&'static Regex> {
    // Example:
    //   factorial(5) == 120
    //   - reverse("abc") should return "cba".
    //   max_of(abs(-3), 2) -> 3
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:[-*+]\s+|\d+[.)]\s+)?(?P<call>[A-Za-z_][\w:]*\s*\([^()]*(?:\([^()]*\)[^()]*)*\))\s*(?:==|->|=>|should\s+return|returns|must\s+return)\s*(?P<expected>.+?)\s*[.;,]?\s*$",
        )
        .ok()
    })
    .as_ref()
}

fn literal_regex() -> Option<&'static Regex> {
    // Example:
    //   120   -3   2.5f   0x1F   1'000   "cba"   'x'   true   nullptr
    //   {1, 2, 3}   std::string("cba")   std::vector<int>{1, 2}
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^(?:[-+]?(?:\d[\d']*(?:\.\d*)?|\.\d+)(?:[eE][-+]?\d+)?[uUlLfF]*|[-+]?0[xX][0-9a-fA-F']+[uUlL]*|"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)+'|true|false|nullptr|NULL|\{.*\}|[A-Za-z_][\w:]*(?:<[\w:<>, *&]*>)?\s*(?:\(.*\)|\{.*\}))$"#,
        )
        .ok()
    })
    .as_ref()
}

/// Whether `expected` can be pasted into a comparison as-is.
fn is_source_literal(expected: &str) -> bool {
    literal_regex().is_some_and(|re| re.is_match(expected))
}

fn budget_regex() -> Option<&'static Regex> {
    // Example:
    //   Must process 1000 items in under 50 ms
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?P<n>\d[\d,_]*)\s*(?:items|iterations|calls|elements)\s+in\s+(?:under|less\s+than)\s+(?P<ms>\d[\d,_]*)\s*ms\b",
        )
        .ok()
    })
    .as_ref()
}

fn parse_count(raw: &str) -> Option<u64> {
    raw.chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
}

impl AcceptanceCriteria {
    pub fn parse(text: &str) -> Self {
        let mut criteria = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.replace('`', "");
            let lower = line.to_ascii_lowercase();

            if let Some(caps) = example_regex().and_then(|re| re.captures(&line)) {
                if let (Some(call), Some(expected)) = (caps.name("call"), caps.name("expected")) {
                    if is_source_literal(expected.as_str().trim()) {
                        criteria.examples.push(Example {
                            call: call.as_str().trim().to_string(),
                            expected: expected.as_str().trim().to_string(),
                            line: idx + 1,
                        });
                    }
                }
            }

            if lower.contains("empty") {
                criteria.handle_empty = true;
            }
            if lower.contains("negative") {
                criteria.handle_negative = true;
            }
            if lower.contains("thread-safe") || lower.contains("thread safe") || lower.contains("threadsafe") {
                criteria.thread_safe = true;
            }

            if criteria.budget.is_none() {
                if let Some(caps) = budget_regex().and_then(|re| re.captures(&line)) {
                    let iterations = caps.name("n").and_then(|m| parse_count(m.as_str()));
                    let max_ms = caps.name("ms").and_then(|m| parse_count(m.as_str()));
                    if let (Some(iterations), Some(max_ms)) = (iterations, max_ms) {
                        if iterations > 0 {
                            criteria.budget = Some(PerformanceBudget { iterations, max_ms });
                        }
                    }
                }
            }
        }
        criteria
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
            && self.budget.is_none()
            && !self.handle_empty
            && !self.handle_negative
            && !self.thread_safe
    }

    /// Behavioral requirements that no synthesized program checks, phrased
    /// for the generation collaborator.
    pub fn requirement_notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.handle_empty {
            notes.push("must handle empty input".to_string());
        }
        if self.handle_negative {
            notes.push("must handle negative input".to_string());
        }
        if self.thread_safe {
            notes.push("must be thread-safe".to_string());
        }
        if let Some(budget) = self.budget {
            notes.push(format!(
                "must complete {} calls in under {} ms",
                budget.iterations, budget.max_ms
            ));
        }
        notes
    }
}

/// Artifacts to compile for the acceptance gates. The file holding the
/// entry point (or the first source file) is replaced by the harness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarnessSet {
    pub acceptance: Option<Artifact>,
    pub benchmark: Option<Artifact>,
}

impl HarnessSet {
    pub fn is_empty(&self) -> bool {
        self.acceptance.is_none() && self.benchmark.is_none()
    }
}

pub fn build_harnesses(artifact: &Artifact, criteria: &AcceptanceCriteria) -> HarnessSet {
    let sources = artifact.source_files();
    let Some(host) = sources
        .iter()
        .find(|f| find_entry_point(&f.content).is_some())
        .or_else(|| sources.first())
    else {
        return HarnessSet::default();
    };
    let language = artifact.language();

    let replace_host = |stem: &str, source: String| {
        let mut harness = artifact.clone();
        harness.remove(&host.name);
        harness.insert(harness_file_name(&host.name, stem, language), source);
        harness
    };

    HarnessSet {
        acceptance: synthesize_acceptance(&host.content, criteria, language)
            .map(|source| replace_host(ACCEPTANCE_FILE_STEM, source)),
        benchmark: synthesize_benchmark(&host.content, criteria, language)
            .map(|source| replace_host(BENCHMARK_FILE_STEM, source)),
    }
}

/// Harness file next to the file it replaces, so relative includes resolve.
fn harness_file_name(host: &str, stem: &str, language: Language) -> String {
    let file = format!("{}.{}", stem, language.harness_extension());
    match Path::new(host).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            format!("{}/{}", parent.to_string_lossy(), file)
        }
        _ => file,
    }
}
