use super::*;
use crate::diagnostics::Severity;
use crate::error::{InfraError, SandboxError};
use crate::gates::DomainCategory;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Mutex;

const BROKEN_MAIN: &str = "\
#include <cstdio>

int main() {
    int total = 5
    std::printf(\"%d\\n\", total);
    return 0;
}
";

const FIXED_MAIN: &str = "\
#include <cstdio>

int main() {
    int total = 5;
    std::printf(\"%d\\n\", total);
    return 0;
}
";

const THREADED_MAIN: &str = "\
#include <thread>

int main() {
    int hits = 0;
    std::thread worker([&hits] { ++hits; });
    worker.join();
    return hits == 1 ? 0 : 1;
}
";

fn pass() -> StageReport {
    StageReport {
        success: true,
        exit_code: Some(0),
        timed_out: false,
        stdout: String::new(),
        stderr: String::new(),
        detail: String::new(),
        elapsed: Duration::from_millis(3),
    }
}

fn fail(stdout: &str, stderr: &str) -> StageReport {
    StageReport {
        success: false,
        exit_code: Some(1),
        timed_out: false,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        detail: if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        },
        elapsed: Duration::from_millis(3),
    }
}

fn tool_missing(tool: &str) -> StageReport {
    StageReport {
        stdout: format!("crucible: tool unavailable: {}\n", tool),
        ..pass()
    }
}

/// Answers each stage from a script keyed by gate id; unscripted gates pass.
#[derive(Default)]
struct FakeRunner {
    responses: HashMap<String, StageReport>,
    infra_failure: bool,
    calls: Mutex<Vec<(String, bool)>>,
}

impl FakeRunner {
    fn respond(mut self, gate: &str, report: StageReport) -> Self {
        self.responses.insert(gate.to_string(), report);
        self
    }

    fn stage_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl StageRunner for FakeRunner {
    fn run_stage(
        &self,
        _artifact: &Artifact,
        stage: &Stage,
        _cancel: &CancellationToken,
    ) -> impl Future<Output = Result<StageReport, SandboxError>> + Send {
        self.calls
            .lock()
            .unwrap()
            .push((stage.name.clone(), stage.needs_ptrace));
        let gate = stage.name.split(':').next().unwrap_or_default().to_string();
        let outcome = if self.infra_failure {
            Err(SandboxError::Infrastructure(InfraError::ImageUnavailable {
                image: "toolchain:latest".to_string(),
                detail: "manifest unknown".to_string(),
            }))
        } else {
            Ok(self.responses.get(&gate).cloned().unwrap_or_else(pass))
        };
        async move { outcome }
    }
}

fn pipeline(runner: FakeRunner) -> ValidationPipeline<FakeRunner> {
    ValidationPipeline::new(runner, GateCatalog::default(), PipelineConfig::default())
}

fn pipeline_with_domains(runner: FakeRunner, domains: Vec<DomainCategory>) -> ValidationPipeline<FakeRunner> {
    let config = PipelineConfig {
        domains: domains.clone(),
        ..PipelineConfig::default()
    };
    ValidationPipeline::new(runner, GateCatalog::new(BTreeMap::new(), domains), config)
}

async fn validate(
    pipeline: &ValidationPipeline<FakeRunner>,
    artifact: &Artifact,
    criteria: Option<&AcceptanceCriteria>,
) -> (PipelineRun, Vec<String>) {
    let mut events = Vec::new();
    let mut progress = |event: ProgressEvent<'_>| match event {
        ProgressEvent::GateStarted { gate, target, .. } => {
            events.push(format!("start {}{}", gate, target.map(|t| format!(":{t}")).unwrap_or_default()))
        }
        ProgressEvent::GateFinished(result) => {
            events.push(format!("finish {} {:?}", result.label(), result.status))
        }
    };
    let run = pipeline
        .run(artifact, criteria, &mut progress, &CancellationToken::new())
        .await
        .unwrap();
    (run, events)
}

fn gate_sequence(run: &PipelineRun) -> Vec<&'static str> {
    run.results.iter().map(|r| r.gate.as_str()).collect()
}

#[tokio::test]
async fn first_gating_failure_stops_the_core_sequence() {
    let runner = FakeRunner::default().respond(
        "asan",
        fail("", "==12==ERROR: AddressSanitizer: stack-buffer-overflow on address 0x7ffc\n    #0 0x4f in main /work/main.cpp:5:9\n"),
    );
    let pipeline = pipeline(runner);
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert_eq!(
        gate_sequence(&run),
        vec!["lint", "static-analysis", "header-hygiene", "complexity", "strict-compile", "asan"]
    );
    let names = pipeline.runner().stage_names();
    assert!(!names.iter().any(|n| n == "ubsan" || n == "run"));

    let asan = run.results.last().unwrap();
    assert_eq!(asan.status, GateStatus::Failed);
    assert_eq!(asan.diagnostics.len(), 1);
    assert_eq!(asan.diagnostics[0].line, 5);
}

#[tokio::test]
async fn informational_failures_never_fail_the_run() {
    let runner = FakeRunner::default().respond(
        "header-hygiene",
        fail("", "main.cpp should add these lines:\n#include <cstdint>\n"),
    );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert!(run.passed());
    let hygiene = run.results_for(GateId::HeaderHygiene).next().unwrap();
    assert_eq!(hygiene.status, GateStatus::Failed);
    assert_eq!(hygiene.kind, GateKind::Informational);
    assert!(run.contains(GateId::Run));
}

#[tokio::test]
async fn missing_cppcheck_without_inventory_runs_the_advisory_analyzer() {
    let runner = FakeRunner::default().respond(
        "static-analysis",
        fail(
            "crucible: fallback: clang++\n",
            "main.cpp:4:9: warning: Value stored to 'total' is never read [deadcode.DeadStores]\n",
        ),
    );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert!(run.passed());
    let analysis = run.results_for(GateId::StaticAnalysis).next().unwrap();
    assert_eq!(analysis.status, GateStatus::Failed);
    assert_eq!(analysis.kind, GateKind::Informational);
    assert!(analysis.skip_notice.is_none());
    assert!(run.contains(GateId::StrictCompile));
}

#[tokio::test]
async fn cppcheck_findings_still_gate_when_it_is_installed() {
    let runner = FakeRunner::default().respond(
        "static-analysis",
        fail("", "main.cpp:5:12: error: Array 'b[8]' accessed at index 8, which is out of bounds. [arrayIndexOutOfBounds]\n"),
    );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert_eq!(gate_sequence(&run), vec!["lint", "static-analysis"]);
    assert_eq!(run.results[1].kind, GateKind::Gating);
}

#[tokio::test]
async fn sentinel_text_from_the_program_is_a_real_failure() {
    let runner = FakeRunner::default().respond(
        "run",
        fail("result: 3\ncrucible: tool unavailable: lizard\n", ""),
    );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    let result = run.results_for(GateId::Run).next().unwrap();
    assert_eq!(result.status, GateStatus::Failed);
    assert!(result.skip_notice.is_none());
}

#[tokio::test]
async fn lint_error_stops_every_later_core_gate() {
    let runner = FakeRunner::default().respond(
        "lint",
        fail(
            "main.cpp:4:5: error: 'strcpy' is insecure [clang-analyzer-security.insecureAPI.strcpy]\n",
            "",
        ),
    );
    let pipeline = pipeline_with_domains(runner, vec![DomainCategory::Security]);
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert_eq!(gate_sequence(&run), vec!["lint", "security"]);
    assert_eq!(pipeline.runner().stage_names(), vec!["lint:main.cpp", "security"]);
    let lint = &run.results[0];
    assert_eq!(lint.errors().count(), 1);
    assert!(run.feedback(30, 20).starts_with("[lint:main.cpp]"));
}

#[tokio::test]
async fn missing_tool_sentinel_becomes_a_skip() {
    let runner = FakeRunner::default().respond("complexity", tool_missing("lizard"));
    let (run, events) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert!(run.passed());
    let complexity = run.results_for(GateId::Complexity).next().unwrap();
    assert_eq!(complexity.status, GateStatus::Skipped);
    assert_eq!(
        complexity.skip_notice.as_deref(),
        Some("lizard not installed in sandbox image")
    );
    assert!(events.contains(&"finish complexity:main.cpp Skipped".to_string()));
    assert!(run.contains(GateId::StrictCompile));
}

#[tokio::test]
async fn probed_absent_tool_is_skipped_without_a_launch() {
    let inventory = ToolInventory::parse("absent lizard\npresent clang++\n");
    let pipeline = pipeline(FakeRunner::default()).with_inventory(inventory);
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert!(run.passed());
    assert_eq!(
        run.results_for(GateId::Complexity).next().unwrap().status,
        GateStatus::Skipped
    );
    assert!(!pipeline
        .runner()
        .stage_names()
        .iter()
        .any(|n| n.starts_with("complexity")));
}

#[tokio::test]
async fn tsan_runs_only_with_threading_indicators() {
    let serial_pipeline = pipeline(FakeRunner::default());
    let (serial, _) = validate(&serial_pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;
    assert!(!serial.contains(GateId::Tsan));

    let threaded_pipeline = pipeline(FakeRunner::default());
    let (threaded, _) = validate(&threaded_pipeline, &Artifact::single("main.cpp", THREADED_MAIN), None).await;
    assert!(threaded.contains(GateId::Tsan));

    let calls = threaded_pipeline.runner().calls.lock().unwrap().clone();
    let ptrace = calls
        .iter()
        .filter(|(_, needs_ptrace)| *needs_ptrace)
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ptrace, vec!["tsan"]);
}

#[tokio::test]
async fn per_file_gates_run_once_per_translation_unit() {
    let mut artifact = Artifact::new();
    artifact.insert("main.cpp", "#include \"util.h\"\nint main() { return twice(0); }\n");
    artifact.insert("util.h", "int twice(int x);\n");
    artifact.insert("util.cpp", "int twice(int x) { return 2 * x; }\n");
    let pipeline = pipeline(FakeRunner::default());
    let (run, _) = validate(&pipeline, &artifact, None).await;

    assert!(run.passed());
    let names = pipeline.runner().stage_names();
    assert!(names.contains(&"lint:main.cpp".to_string()));
    assert!(names.contains(&"lint:util.cpp".to_string()));
    assert!(!names.iter().any(|n| n.ends_with("util.h")));
    assert_eq!(run.results_for(GateId::StrictCompile).count(), 1);
    assert_eq!(run.files, vec!["main.cpp", "util.h", "util.cpp"]);
}

#[tokio::test]
async fn domain_gates_run_regardless_of_core_outcome() {
    let runner = FakeRunner::default().respond(
        "lint",
        fail("main.cpp:4:5: warning: variable 'x' is uninitialized [cppcoreguidelines-init-variables]\n", ""),
    );
    let pipeline = pipeline_with_domains(runner, vec![DomainCategory::Security]);
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert_eq!(gate_sequence(&run), vec!["lint", "security"]);
    let security = run.results_for(GateId::Security).next().unwrap();
    assert_eq!(security.status, GateStatus::Passed);
    assert!(matches!(security.metrics, Some(DomainMetrics::Security(_))));
}

#[tokio::test]
async fn domain_failure_does_not_interrupt_core_gates() {
    let source = "#include <cstring>\nint main() { char b[8]; std::strcpy(b, \"hi\"); return b[0] == 'h' ? 0 : 1; }\n";
    let pipeline = pipeline_with_domains(FakeRunner::default(), vec![DomainCategory::Security]);
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", source), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert!(run.contains(GateId::Run));
    let security = run.results.last().unwrap();
    assert_eq!(security.gate, GateId::Security);
    assert_eq!(security.status, GateStatus::Failed);
    assert!(security.detail.contains("banned call strcpy()"));
}

#[tokio::test]
async fn acceptance_gates_run_only_after_core_passes() {
    let criteria = AcceptanceCriteria::parse("square(3) == 9\n1000 calls in under 50 ms\n");
    let source = "int square(int x) { return x * x; }\nint main() { return square(2) - 4; }\n";

    let pipeline = pipeline(FakeRunner::default());
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", source), Some(&criteria)).await;
    assert!(run.passed());
    let sequence = gate_sequence(&run);
    assert_eq!(&sequence[sequence.len() - 2..], &["acceptance", "benchmark"]);

    let failing_core = FakeRunner::default().respond("strict-compile", fail("", "main.cpp:1:1: error: boom\n"));
    let pipeline = pipeline_with_domains(failing_core, Vec::new());
    let (run, _) = validate(&pipeline, &Artifact::single("main.cpp", source), Some(&criteria)).await;
    assert!(!run.contains(GateId::Acceptance));
    assert!(!run.contains(GateId::Benchmark));
}

#[tokio::test]
async fn first_acceptance_failure_stops_acceptance_sequence() {
    let criteria = AcceptanceCriteria::parse("square(3) == 9\n1000 calls in under 50 ms\n");
    let source = "int square(int x) { return x + x; }\nint main() { return 0; }\n";
    let runner = FakeRunner::default().respond(
        "acceptance",
        fail("FAIL: square(3) != 9 (definition of done line 1)\n0 passed, 1 failed\n", ""),
    );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", source), Some(&criteria)).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert!(run.contains(GateId::Acceptance));
    assert!(!run.contains(GateId::Benchmark));
    let feedback = run.feedback(30, 20);
    assert!(feedback.contains("[acceptance] Acceptance harness failed"));
    assert!(feedback.contains("FAIL: square(3) != 9"));
}

#[tokio::test]
async fn progress_brackets_every_gate() {
    let pipeline = pipeline(FakeRunner::default());
    let (run, events) = validate(&pipeline, &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert_eq!(events.len(), run.results.len() * 2);
    assert_eq!(events[0], "start lint:main.cpp");
    assert_eq!(events[1], "finish lint:main.cpp Passed");
    assert_eq!(events.last().map(String::as_str), Some("finish run Passed"));
}

#[tokio::test]
async fn infrastructure_errors_abort_the_run() {
    let runner = FakeRunner {
        infra_failure: true,
        ..FakeRunner::default()
    };
    let err = pipeline(runner)
        .run(
            &Artifact::single("main.cpp", FIXED_MAIN),
            None,
            &mut |_: ProgressEvent<'_>| {},
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Infrastructure(InfraError::ImageUnavailable { .. })
    ));
}

#[tokio::test]
async fn cancelled_token_stops_before_any_launch() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let pipeline = pipeline(FakeRunner::default());
    let err = pipeline
        .run(&Artifact::single("main.cpp", FIXED_MAIN), None, &mut |_: ProgressEvent<'_>| {}, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
    assert!(pipeline.runner().stage_names().is_empty());
}

#[tokio::test]
async fn scenario_missing_semicolon_fails_compilation() {
    let runner = FakeRunner::default()
        .respond("lint", tool_missing("clang-tidy"))
        .respond("static-analysis", tool_missing("cppcheck"))
        .respond("header-hygiene", tool_missing("include-what-you-use"))
        .respond("complexity", tool_missing("lizard"))
        .respond(
            "strict-compile",
            fail(
                "",
                "main.cpp:4:20: error: expected ';' at end of declaration\n    int total = 5\n                   ^\n                   ;\n1 error generated.\n",
            ),
        );
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", BROKEN_MAIN), None).await;

    assert_eq!(run.outcome, PipelineOutcome::Fail);
    assert!(!run.contains(GateId::Tsan));
    let compile = run.results.last().unwrap();
    assert_eq!(compile.gate, GateId::StrictCompile);
    assert_eq!(compile.status, GateStatus::Failed);
    let errors = compile.errors().collect::<Vec<_>>();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].file, "main.cpp");
    assert_eq!((errors[0].line, errors[0].column), (4, 20));
    assert_eq!(errors[0].severity, Severity::Error);

    let feedback = run.feedback(30, 20);
    assert_eq!(
        feedback,
        "[strict-compile] Strict compile failed\nmain.cpp:4:20: error: expected ';' at end of declaration"
    );
}

#[tokio::test]
async fn scenario_corrected_artifact_passes_every_core_gate() {
    let (run, _) = validate(&pipeline(FakeRunner::default()), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    assert!(run.passed());
    assert_eq!(
        gate_sequence(&run),
        vec![
            "lint",
            "static-analysis",
            "header-hygiene",
            "complexity",
            "strict-compile",
            "asan",
            "ubsan",
            "msan",
            "run"
        ]
    );
    assert!(run.results.iter().all(|r| r.status == GateStatus::Passed));
    assert_eq!(run.feedback(30, 20), "");
}

#[tokio::test]
async fn unparsed_failure_output_falls_back_to_raw_text() {
    let runner = FakeRunner::default().respond("run", fail("", "Segmentation fault (core dumped)\n"));
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    let feedback = run.feedback(30, 20);
    assert!(feedback.contains("[run] Optimized run failed"));
    assert!(feedback.contains("    Segmentation fault (core dumped)"));
}

#[tokio::test]
async fn run_serializes_for_reports() {
    let runner = FakeRunner::default().respond("lint", fail("main.cpp:1:1: error: bad [x]\n", ""));
    let (run, _) = validate(&pipeline(runner), &Artifact::single("main.cpp", FIXED_MAIN), None).await;

    let json = serde_json::to_value(&run).unwrap();
    assert_eq!(json["outcome"], "fail");
    assert_eq!(json["results"][0]["gate"], "lint");
    assert_eq!(json["results"][0]["status"], "failed");
    assert_eq!(json["results"][0]["diagnostics"][0]["check"], "x");
}

#[test]
fn feedback_is_capped() {
    let diagnostics = (1..=50)
        .map(|line| Diagnostic {
            file: "/work/main.cpp".to_string(),
            line,
            column: 1,
            severity: Severity::Error,
            message: "bad".to_string(),
            check: None,
            context: None,
        })
        .collect::<Vec<_>>();
    let run = PipelineRun {
        results: vec![GateResult {
            gate: GateId::Lint,
            name: "Lint (clang-tidy)".to_string(),
            category: GateCategory::Core,
            target: Some("main.cpp".to_string()),
            kind: GateKind::Gating,
            status: GateStatus::Failed,
            stdout: String::new(),
            stderr: String::new(),
            elapsed_ms: 1,
            diagnostics,
            skip_notice: None,
            metrics: None,
            detail: String::new(),
        }],
        outcome: PipelineOutcome::Fail,
        files: vec!["main.cpp".to_string()],
        started_at: Utc::now(),
        elapsed_ms: 1,
    };
    let feedback = compose_feedback(&run, 10, 20);
    let lines = feedback.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0], "[lint:main.cpp] Lint (clang-tidy) failed");
    assert_eq!(lines[1], "main.cpp:1:1: error: bad");
    assert!(lines[9].starts_with("... "));
}
