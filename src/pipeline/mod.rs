//! Validation pipeline
//!
//! Runs the planned gates against one artifact, strictly in order:
//! core gates (fail-fast on the first gating failure), then the acceptance
//! gates synthesized from a Definition of Done (only when every core gate
//! passed), then any enabled domain gates (always). Gate failures are data
//! in the returned [`PipelineRun`]; only infrastructure errors and
//! cancellation end a run early.

#[cfg(test)]
mod tests;

use crate::artifact::Artifact;
use crate::diagnostics::{render_machine, render_raw, Diagnostic, Severity};
use crate::error::PipelineError;
use crate::gates::{
    evaluate_domain, took_fallback, unavailable_tool, DomainCategory, DomainMetrics, GateCatalog, GateCategory,
    GateId, GateKind, GateScope, PlannedGate, ScriptContext,
};
use crate::harness::{build_harnesses, AcceptanceCriteria};
use crate::sandbox::{Stage, StageReport, StageRunner, ToolInventory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Shell exit status for "command not found".
const COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Domain gate categories to run in addition to the core gates
    #[serde(default)]
    pub domains: Vec<DomainCategory>,
    /// Line cap for feedback sent back to the generator
    #[serde(default = "default_max_feedback_lines")]
    pub max_feedback_lines: usize,
    /// Line cap for raw output shown when no diagnostics could be parsed
    #[serde(default = "default_raw_fallback_lines")]
    pub raw_fallback_lines: usize,
    #[serde(default = "default_c_standard")]
    pub c_standard: String,
    #[serde(default = "default_cxx_standard")]
    pub cxx_standard: String,
    /// Hard wall-clock limit per gate invocation
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Ask the image which tools exist before running
    #[serde(default)]
    pub probe_tools: bool,
}

fn default_max_feedback_lines() -> usize {
    30
}

fn default_raw_fallback_lines() -> usize {
    20
}

fn default_c_standard() -> String {
    "c11".to_string()
}

fn default_cxx_standard() -> String {
    "c++17".to_string()
}

fn default_stage_timeout_secs() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            max_feedback_lines: default_max_feedback_lines(),
            raw_fallback_lines: default_raw_fallback_lines(),
            c_standard: default_c_standard(),
            cxx_standard: default_cxx_standard(),
            stage_timeout_secs: default_stage_timeout_secs(),
            probe_tools: false,
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate: GateId,
    pub name: String,
    pub category: GateCategory,
    /// Source file for per-file gates
    pub target: Option<String>,
    pub kind: GateKind,
    pub status: GateStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    pub diagnostics: Vec<Diagnostic>,
    pub skip_notice: Option<String>,
    pub metrics: Option<DomainMetrics>,
    /// Failure detail; empty when the gate passed
    pub detail: String,
}

impl GateResult {
    fn skipped(gate: &PlannedGate, target: Option<&str>, notice: String, elapsed: Duration) -> Self {
        Self {
            gate: gate.id(),
            name: gate.spec.name.to_string(),
            category: gate.spec.category,
            target: target.map(str::to_string),
            kind: gate.kind,
            status: GateStatus::Skipped,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms: elapsed.as_millis() as u64,
            diagnostics: Vec::new(),
            skip_notice: Some(notice),
            metrics: None,
            detail: String::new(),
        }
    }

    /// A failed gating gate. Informational failures and skips never count.
    pub fn counts_as_failure(&self) -> bool {
        self.status == GateStatus::Failed && self.kind == GateKind::Gating
    }

    /// `lint:src/main.cpp`, or just the gate id for whole-artifact gates.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{}:{}", self.gate, target),
            None => self.gate.to_string(),
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub results: Vec<GateResult>,
    pub outcome: PipelineOutcome,
    pub files: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl PipelineRun {
    pub fn passed(&self) -> bool {
        self.outcome == PipelineOutcome::Pass
    }

    pub fn failures(&self) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(|r| r.counts_as_failure())
    }

    pub fn results_for(&self, gate: GateId) -> impl Iterator<Item = &GateResult> {
        self.results.iter().filter(move |r| r.gate == gate)
    }

    pub fn contains(&self, gate: GateId) -> bool {
        self.results_for(gate).next().is_some()
    }

    pub fn feedback(&self, max_lines: usize, raw_lines: usize) -> String {
        compose_feedback(self, max_lines, raw_lines)
    }
}

/// Compact text for the generation collaborator: one header per failing
/// gate followed by its diagnostics in machine form, or its raw output when
/// nothing could be parsed. At most `max_lines` lines.
pub fn compose_feedback(run: &PipelineRun, max_lines: usize, raw_lines: usize) -> String {
    if max_lines == 0 {
        return String::new();
    }
    let mut lines = Vec::new();
    for result in run.failures() {
        lines.push(format!("[{}] {} failed", result.label(), result.name));
        let body = if result.diagnostics.is_empty() {
            let raw = if result.detail.trim().is_empty() {
                &result.stderr
            } else {
                &result.detail
            };
            render_raw(raw, raw_lines)
        } else {
            render_machine(&result.diagnostics, max_lines)
        };
        lines.extend(body.lines().filter(|l| !l.is_empty()).map(str::to_string));
    }
    if lines.len() > max_lines {
        let omitted = lines.len() - (max_lines - 1);
        lines.truncate(max_lines - 1);
        lines.push(format!("... {} more lines omitted", omitted));
    }
    lines.join("\n")
}

/// Emitted around every gate invocation.
#[derive(Debug, Clone, Copy)]
pub enum ProgressEvent<'a> {
    GateStarted {
        gate: GateId,
        name: &'a str,
        target: Option<&'a str>,
    },
    GateFinished(&'a GateResult),
}

pub struct ValidationPipeline<R> {
    runner: R,
    catalog: GateCatalog,
    config: PipelineConfig,
    inventory: Option<ToolInventory>,
}

impl<R: StageRunner> ValidationPipeline<R> {
    pub fn new(runner: R, catalog: GateCatalog, config: PipelineConfig) -> Self {
        Self {
            runner,
            catalog,
            config,
            inventory: None,
        }
    }

    /// Tools known to be missing are skipped (or swapped for a fallback)
    /// without launching a container.
    pub fn with_inventory(mut self, inventory: ToolInventory) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        artifact: &Artifact,
        criteria: Option<&AcceptanceCriteria>,
        progress: &mut (dyn FnMut(ProgressEvent<'_>) + Send),
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, PipelineError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let inventory = self.inventory.as_ref();
        let ctx = self.script_context(artifact);
        let mut results = Vec::new();

        tracing::info!(files = ?artifact.names(), language = ?ctx.language, "validation started");

        let mut core_failed = false;
        'core: for gate in self.catalog.plan_core(artifact, inventory) {
            for target in targets(&gate, &ctx) {
                let result = self
                    .run_gate(&gate, artifact, &ctx, target.as_deref(), progress, cancel)
                    .await?;
                let failed = result.counts_as_failure();
                results.push(result);
                if failed {
                    core_failed = true;
                    break 'core;
                }
            }
        }

        if !core_failed {
            if let Some(criteria) = criteria {
                self.run_acceptance(artifact, criteria, &mut results, progress, cancel)
                    .await?;
            }
        }

        for gate in self.catalog.plan_domain(artifact, inventory) {
            let result = self
                .run_gate(&gate, artifact, &ctx, None, progress, cancel)
                .await?;
            results.push(result);
        }

        let outcome = if results.iter().any(GateResult::counts_as_failure) {
            PipelineOutcome::Fail
        } else {
            PipelineOutcome::Pass
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(outcome = ?outcome, gates = results.len(), elapsed_ms, "validation finished");

        Ok(PipelineRun {
            results,
            outcome,
            files: artifact.names(),
            started_at,
            elapsed_ms,
        })
    }

    async fn run_acceptance(
        &self,
        artifact: &Artifact,
        criteria: &AcceptanceCriteria,
        results: &mut Vec<GateResult>,
        progress: &mut (dyn FnMut(ProgressEvent<'_>) + Send),
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let harnesses = build_harnesses(artifact, criteria);
        let mut ids = Vec::new();
        if harnesses.acceptance.is_some() {
            ids.push(GateId::Acceptance);
        }
        if harnesses.benchmark.is_some() {
            ids.push(GateId::Benchmark);
        }

        for gate in self
            .catalog
            .plan_acceptance(&ids, artifact, self.inventory.as_ref())
        {
            let harness = match gate.id() {
                GateId::Acceptance => harnesses.acceptance.as_ref(),
                GateId::Benchmark => harnesses.benchmark.as_ref(),
                _ => None,
            };
            let Some(harness) = harness else {
                continue;
            };
            let ctx = self.script_context(harness);
            let result = self
                .run_gate(&gate, harness, &ctx, None, progress, cancel)
                .await?;
            let failed = result.counts_as_failure();
            results.push(result);
            if failed {
                break;
            }
        }
        Ok(())
    }

    fn script_context(&self, artifact: &Artifact) -> ScriptContext {
        ScriptContext::new(artifact, &self.config.c_standard, &self.config.cxx_standard)
    }

    async fn run_gate(
        &self,
        gate: &PlannedGate,
        artifact: &Artifact,
        ctx: &ScriptContext,
        target: Option<&str>,
        progress: &mut (dyn FnMut(ProgressEvent<'_>) + Send),
        cancel: &CancellationToken,
    ) -> Result<GateResult, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        progress(ProgressEvent::GateStarted {
            gate: gate.id(),
            name: gate.spec.name,
            target,
        });

        let result = match &gate.unavailable {
            Some(notice) => GateResult::skipped(gate, target, notice.clone(), Duration::ZERO),
            None => {
                let stage = Stage {
                    name: match target {
                        Some(file) => format!("{}:{}", gate.id(), file),
                        None => gate.id().to_string(),
                    },
                    script: gate.script(ctx, target),
                    timeout: self.config.stage_timeout(),
                    needs_ptrace: gate.spec.needs_ptrace,
                };
                let report = self.runner.run_stage(artifact, &stage, cancel).await?;
                interpret(gate, artifact, target, report)
            }
        };

        match result.status {
            GateStatus::Skipped => tracing::info!(
                gate = %result.label(),
                notice = result.skip_notice.as_deref().unwrap_or(""),
                "gate skipped"
            ),
            status => tracing::debug!(
                gate = %result.label(),
                status = ?status,
                diagnostics = result.diagnostics.len(),
                elapsed_ms = result.elapsed_ms,
                "gate finished"
            ),
        }
        progress(ProgressEvent::GateFinished(&result));
        Ok(result)
    }
}

fn targets(gate: &PlannedGate, ctx: &ScriptContext) -> Vec<Option<String>> {
    match gate.spec.scope {
        GateScope::PerFile => ctx.files.iter().cloned().map(Some).collect(),
        GateScope::WholeArtifact => vec![None],
    }
}

/// Turn a stage report into a gate verdict.
fn interpret(
    gate: &PlannedGate,
    artifact: &Artifact,
    target: Option<&str>,
    report: StageReport,
) -> GateResult {
    if let Some(tool) = unavailable_tool(&report.stdout) {
        return GateResult::skipped(
            gate,
            target,
            format!("{} not installed in sandbox image", tool),
            report.elapsed,
        );
    }
    if report.exit_code == Some(COMMAND_NOT_FOUND_EXIT_CODE) && report.stderr.contains("not found") {
        return GateResult::skipped(
            gate,
            target,
            format!("command not found: {}", report.stderr.trim()),
            report.elapsed,
        );
    }

    let substitute;
    let gate = if gate.fallback.is_some() && took_fallback(&report.stdout) {
        tracing::debug!(gate = %gate.id(), "script ran the fallback tool");
        substitute = gate.with_fallback(artifact.language());
        &substitute
    } else {
        gate
    };

    let (primary, secondary) = if gate.format.reads_stdout() {
        (&report.stdout, &report.stderr)
    } else {
        (&report.stderr, &report.stdout)
    };
    let mut diagnostics = gate.format.parse(primary);
    if diagnostics.is_empty() {
        diagnostics = gate.format.parse(secondary);
    }

    let mut status = if report.success {
        GateStatus::Passed
    } else {
        GateStatus::Failed
    };
    let mut detail = report.detail.clone();
    let mut metrics = None;

    if let Some(category) = DomainCategory::from_gate(gate.id()) {
        let outcome = evaluate_domain(category, &report, artifact, &gate.argument);
        status = if outcome.passed {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        detail = outcome.detail;
        metrics = Some(outcome.metrics);
    }

    GateResult {
        gate: gate.id(),
        name: gate.spec.name.to_string(),
        category: gate.spec.category,
        target: target.map(str::to_string),
        kind: gate.kind,
        status,
        stdout: report.stdout,
        stderr: report.stderr,
        elapsed_ms: report.elapsed.as_millis() as u64,
        diagnostics,
        skip_notice: None,
        metrics,
        detail,
    }
}
