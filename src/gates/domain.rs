use super::heuristics::{count_allocations_in_loops, find_banned_calls, find_isr_unsafe_calls};
use super::GateId;
use crate::artifact::Artifact;
use crate::sandbox::StageReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const METRIC_PREFIX: &str = "crucible-metric ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainCategory {
    Game,
    Embedded,
    Security,
    Performance,
}

impl DomainCategory {
    pub const ALL: [DomainCategory; 4] = [
        DomainCategory::Game,
        DomainCategory::Embedded,
        DomainCategory::Security,
        DomainCategory::Performance,
    ];

    pub fn as_str(self) -> &'static str {
        self.gate_id().as_str()
    }

    pub fn gate_id(self) -> GateId {
        match self {
            DomainCategory::Game => GateId::Game,
            DomainCategory::Embedded => GateId::Embedded,
            DomainCategory::Security => GateId::Security,
            DomainCategory::Performance => GateId::Performance,
        }
    }

    pub fn from_gate(id: GateId) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.gate_id() == id)
    }
}

impl fmt::Display for DomainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsrViolation {
    pub handler: String,
    pub call: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannedCall {
    pub name: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetrics {
    pub elapsed_ms: Option<u64>,
    pub peak_rss_kb: Option<u64>,
    pub rss_budget_kb: u64,
    /// Heap allocations inside loop bodies (reported, never failing)
    pub loop_allocations: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedMetrics {
    pub max_stack_bytes: Option<u64>,
    pub stack_budget_bytes: u64,
    pub text_bytes: Option<u64>,
    pub isr_unsafe_calls: Vec<IsrViolation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub banned_calls: Vec<BannedCall>,
    /// `None` when flawfinder is not in the image
    pub analyzer_hits: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub best_ms: Option<u64>,
    pub budget_ms: u64,
    pub runs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "domain", rename_all = "snake_case")]
pub enum DomainMetrics {
    Game(GameMetrics),
    Embedded(EmbeddedMetrics),
    Security(SecurityMetrics),
    Performance(PerformanceMetrics),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainOutcome {
    pub passed: bool,
    pub metrics: DomainMetrics,
    /// Why the gate failed; empty on success
    pub detail: String,
}

/// Collect `crucible-metric key=value` lines from both streams.
pub fn parse_metric_lines(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix(METRIC_PREFIX))
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn metric_u64(metrics: &BTreeMap<String, String>, key: &str) -> Option<u64> {
    metrics.get(key).and_then(|v| v.parse().ok())
}

fn budget(argument: &str, fallback: u64) -> u64 {
    argument.trim().parse().unwrap_or(fallback)
}

/// Verdict for one domain gate from its sandbox report plus host-side scans
/// of the artifact text.
pub fn evaluate_domain(
    category: DomainCategory,
    report: &StageReport,
    artifact: &Artifact,
    argument: &str,
) -> DomainOutcome {
    let metrics = parse_metric_lines(&format!("{}\n{}", report.stdout, report.stderr));
    let text = artifact.combined_text();
    let mut failures = Vec::new();
    if !report.success {
        failures.push(report.detail.clone());
    }

    let metrics = match category {
        DomainCategory::Game => {
            let rss_budget_kb = budget(argument, 256).saturating_mul(1024);
            let peak_rss_kb = metric_u64(&metrics, "peak_rss_kb");
            if let Some(peak) = peak_rss_kb.filter(|&kb| kb > rss_budget_kb) {
                failures.push(format!(
                    "peak resident memory {} KiB exceeds budget {} KiB",
                    peak, rss_budget_kb
                ));
            }
            DomainMetrics::Game(GameMetrics {
                elapsed_ms: metric_u64(&metrics, "elapsed_ms"),
                peak_rss_kb,
                rss_budget_kb,
                loop_allocations: count_allocations_in_loops(&text),
            })
        }
        DomainCategory::Embedded => {
            let stack_budget_bytes = budget(argument, 1024);
            let max_stack_bytes = metric_u64(&metrics, "max_stack_bytes");
            if let Some(stack) = max_stack_bytes.filter(|&b| b > stack_budget_bytes) {
                failures.push(format!(
                    "largest stack frame {} bytes exceeds budget {} bytes",
                    stack, stack_budget_bytes
                ));
            }
            let isr_unsafe_calls = find_isr_unsafe_calls(&text)
                .into_iter()
                .map(|(handler, call, line)| IsrViolation {
                    handler,
                    call,
                    line,
                })
                .collect::<Vec<_>>();
            for violation in &isr_unsafe_calls {
                failures.push(format!(
                    "interrupt handler {} calls {} (line {})",
                    violation.handler, violation.call, violation.line
                ));
            }
            DomainMetrics::Embedded(EmbeddedMetrics {
                max_stack_bytes,
                stack_budget_bytes,
                text_bytes: metric_u64(&metrics, "text_bytes"),
                isr_unsafe_calls,
            })
        }
        DomainCategory::Security => {
            let banned_calls = find_banned_calls(&text)
                .into_iter()
                .map(|(name, line)| BannedCall { name, line })
                .collect::<Vec<_>>();
            for call in &banned_calls {
                failures.push(format!("banned call {}() at line {}", call.name, call.line));
            }
            let analyzer_hits = metric_u64(&metrics, "analyzer_hits");
            if let Some(hits) = analyzer_hits.filter(|&h| h > 0) {
                failures.push(format!("flawfinder reported {} finding(s)", hits));
            }
            DomainMetrics::Security(SecurityMetrics {
                banned_calls,
                analyzer_hits,
            })
        }
        DomainCategory::Performance => {
            let budget_ms = budget(argument, 1000);
            let best_ms = metric_u64(&metrics, "best_ms");
            if let Some(best) = best_ms.filter(|&ms| ms > budget_ms) {
                failures.push(format!(
                    "best run {} ms exceeds budget {} ms",
                    best, budget_ms
                ));
            }
            DomainMetrics::Performance(PerformanceMetrics {
                best_ms,
                budget_ms,
                runs: metric_u64(&metrics, "runs").unwrap_or(0) as u32,
            })
        }
    };

    DomainOutcome {
        passed: failures.is_empty(),
        metrics,
        detail: failures.join("\n"),
    }
}
