use super::{
    Conditional, CxxRuntime, GateCategory, GateFallback, GateId, GateKind, GateScope, GateSpec,
};
use crate::diagnostics::DiagnosticFormat;

const CLANG_ANALYZER: GateFallback = GateFallback {
    tool: "{cc}",
    template: "{cc} --analyze -Xanalyzer -analyzer-output=text {std} {includes} {file} -o /dev/null",
    kind: GateKind::Informational,
    format: DiagnosticFormat::DeepAnalysis,
};

const MSAN_LIBCXX: CxxRuntime = CxxRuntime {
    label: "msan-instrumented libc++ (/opt/msan)",
    dir: "/opt/msan/lib",
    flags: "-stdlib=libc++ -nostdinc++ -isystem /opt/msan/include/c++/v1 -L/opt/msan/lib -Wl,-rpath,/opt/msan/lib",
};

/// Ordered by how cheaply each gate catches a defect: text-level checks
/// first, dynamic analysis last.
pub static CORE_GATES: [GateSpec; 10] = [
    GateSpec {
        id: GateId::Lint,
        name: "Lint (clang-tidy)",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::PerFile,
        tool: Some("clang-tidy"),
        template: "clang-tidy --quiet {arg} {file} -- {std} {includes}",
        default_arg: "-checks=-*,bugprone-*,cert-*,clang-analyzer-*,performance-*,portability-* -warnings-as-errors=bugprone-*,cert-*,clang-analyzer-*",
        condition: Conditional::Always,
        format: DiagnosticFormat::Lint,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::StaticAnalysis,
        name: "Static analysis (cppcheck)",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::PerFile,
        tool: Some("cppcheck"),
        template: "cppcheck --quiet --error-exitcode=1 --inline-suppr --template=gcc {arg} {includes} {file}",
        default_arg: "--enable=warning,performance,portability",
        condition: Conditional::Always,
        format: DiagnosticFormat::DeepAnalysis,
        needs_ptrace: false,
        fallback: Some(CLANG_ANALYZER),
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::HeaderHygiene,
        name: "Header hygiene (include-what-you-use)",
        category: GateCategory::Core,
        kind: GateKind::Informational,
        scope: GateScope::PerFile,
        tool: Some("include-what-you-use"),
        template: "include-what-you-use {arg} {std} {includes} {file}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Complexity,
        name: "Complexity (lizard)",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::PerFile,
        tool: Some("lizard"),
        template: "lizard --warnings_only {arg} {file}",
        default_arg: "--CCN 15 --length 100 --arguments 6",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::StrictCompile,
        name: "Strict compile",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -Wall -Wextra -Wpedantic -Wshadow -Wformat=2 -Werror -O2 -D_FORTIFY_SOURCE=2 -fstack-protector-strong -fPIE -pie -pthread {arg} {includes} {files} -o {bin}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Asan,
        name: "AddressSanitizer",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -g -O1 -fsanitize=address -fno-omit-frame-pointer -pthread {includes} {files} -o {bin} && ASAN_OPTIONS=detect_leaks=1:abort_on_error=0 {bin} {arg}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Sanitizer,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Ubsan,
        name: "UndefinedBehaviorSanitizer",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -g -O1 -fsanitize=undefined -fno-sanitize-recover=undefined -fno-omit-frame-pointer -pthread {includes} {files} -o {bin} && UBSAN_OPTIONS=print_stacktrace=1 {bin} {arg}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Sanitizer,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Msan,
        name: "MemorySanitizer",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -g -O1 -fsanitize=memory -fsanitize-memory-track-origins=2 -fno-omit-frame-pointer {runtime} {includes} {files} -o {bin} && {bin} {arg}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Sanitizer,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: Some(MSAN_LIBCXX),
    },
    GateSpec {
        id: GateId::Tsan,
        name: "ThreadSanitizer",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -g -O1 -fsanitize=thread -pthread {includes} {files} -o {bin} && TSAN_OPTIONS=halt_on_error=1 {bin} {arg}",
        default_arg: "",
        condition: Conditional::ThreadingIndicators,
        format: DiagnosticFormat::Sanitizer,
        needs_ptrace: true,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Run,
        name: "Optimized run",
        category: GateCategory::Core,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -O2 -DNDEBUG -pthread {includes} {files} -o {bin} && {bin} {arg}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
];

/// Synthesized from a Definition of Done; the pipeline swaps the harness
/// file into the artifact before rendering these.
pub static ACCEPTANCE_GATES: [GateSpec; 2] = [
    GateSpec {
        id: GateId::Acceptance,
        name: "Acceptance harness",
        category: GateCategory::Acceptance,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -g -O1 -fsanitize=address,undefined -pthread {arg} {includes} {files} -o {bin} && {bin}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Benchmark,
        name: "Performance budget",
        category: GateCategory::Acceptance,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -O2 -DNDEBUG -pthread {arg} {includes} {files} -o {bin} && {bin}",
        default_arg: "",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
];

/// Opt-in checks. Scripts print `crucible-metric key=value` lines; the
/// verdict is computed host-side from those and the text heuristics.
pub static DOMAIN_GATES: [GateSpec; 4] = [
    GateSpec {
        id: GateId::Game,
        name: "Game: memory and frame budget",
        category: GateCategory::Domain,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -O2 -DNDEBUG -pthread {includes} {files} -o {bin} || exit 1
start=$(date +%s%N)
if [ -x /usr/bin/time ]; then /usr/bin/time -f 'crucible-metric peak_rss_kb=%M' {bin} >/dev/null; else {bin} >/dev/null; fi
status=$?
end=$(date +%s%N)
echo \"crucible-metric elapsed_ms=$(( (end - start) / 1000000 ))\"
exit $status",
        // Peak resident memory budget in MiB
        default_arg: "256",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Embedded,
        name: "Embedded: stack usage and ISR safety",
        category: GateCategory::Domain,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "mkdir -p /tmp/su || exit 1
for f in {files}; do {cc} {std} -Os -fstack-usage {includes} -c \"$f\" -o \"/tmp/su/$(basename \"$f\").o\" || exit 1; done
cat /tmp/su/*.su 2>/dev/null | awk 'BEGIN { m = 0 } { v = $(NF-1) + 0; if (v > m) m = v } END { print \"crucible-metric max_stack_bytes=\" m }'
if command -v size >/dev/null 2>&1; then size -t /tmp/su/*.o | tail -n 1 | awk '{ print \"crucible-metric text_bytes=\" $1 }'; fi",
        // Worst-case frame size budget in bytes
        default_arg: "1024",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Security,
        name: "Security: banned calls and flawfinder",
        category: GateCategory::Domain,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: None,
        template: "if command -v flawfinder >/dev/null 2>&1; then
hits=$(flawfinder --quiet --dataonly --minlevel={arg} {files} | grep -c ':[0-9]*: *\\[')
echo \"crucible-metric analyzer_hits=$hits\"
flawfinder --quiet --dataonly --minlevel={arg} {files} >&2
fi
exit 0",
        // flawfinder minimum risk level
        default_arg: "3",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
    GateSpec {
        id: GateId::Performance,
        name: "Performance: optimized runtime budget",
        category: GateCategory::Domain,
        kind: GateKind::Gating,
        scope: GateScope::WholeArtifact,
        tool: Some("{cc}"),
        template: "{cc} {std} -O3 -DNDEBUG -pthread {includes} {files} -o {bin} || exit 1
best=
for i in 1 2 3; do
s=$(date +%s%N); {bin} >/dev/null || exit 1; e=$(date +%s%N)
t=$(( (e - s) / 1000000 ))
if [ -z \"$best\" ] || [ \"$t\" -lt \"$best\" ]; then best=$t; fi
done
echo \"crucible-metric best_ms=$best\"
echo \"crucible-metric runs=3\"",
        // Best-of-three wall-clock budget in milliseconds
        default_arg: "1000",
        condition: Conditional::Always,
        format: DiagnosticFormat::Compiler,
        needs_ptrace: false,
        fallback: None,
        cxx_runtime: None,
    },
];
