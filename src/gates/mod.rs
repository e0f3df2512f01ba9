//! Gate catalog
//!
//! Every check the pipeline can run is a static [`GateSpec`]: the tool it
//! needs, a shell command template, how its output is read, and whether its
//! failure counts. The catalog layers per-gate configuration and the sandbox
//! tool inventory on top of those tables and hands the pipeline a plan.

mod builtin;
mod domain;
pub mod heuristics;

pub use builtin::{ACCEPTANCE_GATES, CORE_GATES, DOMAIN_GATES};
pub use domain::{
    evaluate_domain, parse_metric_lines, BannedCall, DomainCategory, DomainMetrics,
    DomainOutcome, EmbeddedMetrics, GameMetrics, IsrViolation, PerformanceMetrics,
    SecurityMetrics,
};

use crate::artifact::{Artifact, Language};
use crate::config::{Config, GateOverride};
use crate::diagnostics::DiagnosticFormat;
use crate::sandbox::ToolInventory;
use crate::util::shell_quote;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Printed by a gate script when its backing tool is missing from the image.
pub const TOOL_UNAVAILABLE_SENTINEL: &str = "crucible: tool unavailable:";

/// First line a gate script prints when it switched to the fallback tool.
pub const FALLBACK_MARKER: &str = "crucible: fallback:";

/// Placeholder in a tool name that resolves to the artifact's compiler.
const COMPILER_PLACEHOLDER: &str = "{cc}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateId {
    Lint,
    StaticAnalysis,
    HeaderHygiene,
    Complexity,
    StrictCompile,
    Asan,
    Ubsan,
    Msan,
    Tsan,
    Run,
    Acceptance,
    Benchmark,
    Game,
    Embedded,
    Security,
    Performance,
}

impl GateId {
    pub const ALL: [GateId; 16] = [
        GateId::Lint,
        GateId::StaticAnalysis,
        GateId::HeaderHygiene,
        GateId::Complexity,
        GateId::StrictCompile,
        GateId::Asan,
        GateId::Ubsan,
        GateId::Msan,
        GateId::Tsan,
        GateId::Run,
        GateId::Acceptance,
        GateId::Benchmark,
        GateId::Game,
        GateId::Embedded,
        GateId::Security,
        GateId::Performance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GateId::Lint => "lint",
            GateId::StaticAnalysis => "static-analysis",
            GateId::HeaderHygiene => "header-hygiene",
            GateId::Complexity => "complexity",
            GateId::StrictCompile => "strict-compile",
            GateId::Asan => "asan",
            GateId::Ubsan => "ubsan",
            GateId::Msan => "msan",
            GateId::Tsan => "tsan",
            GateId::Run => "run",
            GateId::Acceptance => "acceptance",
            GateId::Benchmark => "benchmark",
            GateId::Game => "game",
            GateId::Embedded => "embedded",
            GateId::Security => "security",
            GateId::Performance => "performance",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|id| id.as_str() == wanted)
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    Core,
    Acceptance,
    Domain,
}

/// Whether a failure counts against the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Gating,
    /// Reports findings, never fails the run
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// Once per eligible source file
    PerFile,
    /// Once with the full file set and include directories
    WholeArtifact,
}

/// Predicate deciding whether a gate belongs in a run at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conditional {
    Always,
    ThreadingIndicators,
}

impl Conditional {
    pub fn holds(self, artifact: &Artifact) -> bool {
        match self {
            Conditional::Always => true,
            Conditional::ThreadingIndicators => {
                heuristics::has_threading_indicators(&artifact.combined_text())
            }
        }
    }
}

/// Substitute used when the preferred tool is missing from the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateFallback {
    pub tool: &'static str,
    pub template: &'static str,
    pub kind: GateKind,
    pub format: DiagnosticFormat,
}

/// Extra compile flags and a presence check for an instrumented C++ runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CxxRuntime {
    pub label: &'static str,
    pub dir: &'static str,
    pub flags: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSpec {
    pub id: GateId,
    pub name: &'static str,
    pub category: GateCategory,
    pub kind: GateKind,
    pub scope: GateScope,
    /// Binary the script needs; `{cc}` resolves to the artifact's compiler
    pub tool: Option<&'static str>,
    pub template: &'static str,
    pub default_arg: &'static str,
    pub condition: Conditional,
    pub format: DiagnosticFormat,
    pub needs_ptrace: bool,
    pub fallback: Option<GateFallback>,
    pub cxx_runtime: Option<CxxRuntime>,
}

impl GateSpec {
    pub fn lookup(id: GateId) -> Option<&'static GateSpec> {
        all_specs().find(|spec| spec.id == id)
    }
}

/// Every gate in catalog order: core, acceptance, domain.
pub fn all_specs() -> impl Iterator<Item = &'static GateSpec> {
    CORE_GATES
        .iter()
        .chain(ACCEPTANCE_GATES.iter())
        .chain(DOMAIN_GATES.iter())
}

fn resolve_tool(tool: &str, language: Language) -> String {
    tool.replace(COMPILER_PLACEHOLDER, language.compiler())
}

/// Values substituted into command templates for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptContext {
    pub language: Language,
    pub std_flag: String,
    pub files: Vec<String>,
    pub includes: Vec<String>,
}

impl ScriptContext {
    pub fn new(artifact: &Artifact, c_standard: &str, cxx_standard: &str) -> Self {
        let language = artifact.language();
        let standard = match language {
            Language::C => c_standard,
            Language::Cxx => cxx_standard,
        };
        Self {
            language,
            std_flag: format!("-std={}", standard),
            files: artifact
                .source_files()
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            includes: artifact.include_dirs(),
        }
    }
}

/// Expand `{file} {files} {includes} {cc} {std} {arg} {bin} {runtime}`.
/// File names are shell-quoted; `{arg}` is inserted verbatim.
pub fn render_template(
    template: &str,
    ctx: &ScriptContext,
    file: Option<&str>,
    arg: &str,
    bin: &str,
    runtime: &str,
) -> String {
    let files = ctx
        .files
        .iter()
        .map(|f| shell_quote(f))
        .collect::<Vec<_>>()
        .join(" ");
    let includes = ctx
        .includes
        .iter()
        .map(|dir| format!("-I{}", shell_quote(dir)))
        .collect::<Vec<_>>()
        .join(" ");
    let rendered = template
        .replace("{file}", &file.map(shell_quote).unwrap_or_default())
        .replace("{files}", &files)
        .replace("{includes}", &includes)
        .replace("{cc}", ctx.language.compiler())
        .replace("{std}", &ctx.std_flag)
        .replace("{arg}", arg)
        .replace("{bin}", bin)
        .replace("{runtime}", runtime);
    collapse_spaces(&rendered)
}

fn collapse_spaces(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut previous_space = false;
    for ch in script.chars() {
        if ch == ' ' {
            if !previous_space {
                out.push(ch);
            }
            previous_space = true;
        } else {
            out.push(ch);
            previous_space = false;
        }
    }
    out.trim().to_string()
}

fn tool_guard(tool: &str) -> String {
    format!(
        "command -v {} >/dev/null 2>&1 || {{ echo {}; exit 0; }}",
        shell_quote(tool),
        shell_quote(&format!("{} {}", TOOL_UNAVAILABLE_SENTINEL, tool))
    )
}

fn directory_guard(dir: &str, label: &str) -> String {
    format!(
        "[ -d {} ] || {{ echo {}; exit 0; }}",
        shell_quote(dir),
        shell_quote(&format!("{} {}", TOOL_UNAVAILABLE_SENTINEL, label))
    )
}

/// Name of the missing tool if the script's first output line is the
/// unavailability sentinel. Guards run before the command, so a sentinel
/// anywhere else came from the program under test.
pub fn unavailable_tool(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .next()?
        .trim_end()
        .strip_prefix(TOOL_UNAVAILABLE_SENTINEL)
        .map(|rest| rest.trim().to_string())
}

/// Whether the script reported switching to its fallback tool.
pub fn took_fallback(stdout: &str) -> bool {
    stdout
        .lines()
        .next()
        .is_some_and(|line| line.trim_end().starts_with(FALLBACK_MARKER))
}

/// A gate resolved against configuration and the tool inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGate {
    pub spec: &'static GateSpec,
    pub kind: GateKind,
    pub tool: Option<String>,
    pub template: &'static str,
    pub format: DiagnosticFormat,
    pub argument: String,
    /// Known before running that the gate cannot execute
    pub unavailable: Option<String>,
    /// Substitute the script picks itself when no inventory settled the
    /// choice up front
    pub fallback: Option<GateFallback>,
}

impl PlannedGate {
    pub fn id(&self) -> GateId {
        self.spec.id
    }

    /// The same gate running the fallback tool.
    pub fn with_fallback(&self, language: Language) -> PlannedGate {
        let mut gate = self.clone();
        if let Some(fallback) = gate.fallback.take() {
            gate.kind = fallback.kind;
            gate.tool = Some(resolve_tool(fallback.tool, language));
            gate.template = fallback.template;
            gate.format = fallback.format;
        }
        gate
    }

    /// Full `sh -c` script: tool guard, runtime guard, then the command.
    pub fn script(&self, ctx: &ScriptContext, file: Option<&str>) -> String {
        let mut parts = Vec::new();
        match (&self.tool, &self.fallback) {
            (Some(tool), Some(_)) => {
                let substitute = self.with_fallback(ctx.language);
                let fallback_tool = substitute.tool.clone().unwrap_or_default();
                parts.push(format!("if ! command -v {} >/dev/null 2>&1; then", shell_quote(tool)));
                parts.push(format!(
                    "command -v {} >/dev/null 2>&1 || {{ echo {}; exit 0; }}",
                    shell_quote(&fallback_tool),
                    shell_quote(&format!("{} {}", TOOL_UNAVAILABLE_SENTINEL, tool))
                ));
                parts.push(format!(
                    "echo {}",
                    shell_quote(&format!("{} {}", FALLBACK_MARKER, fallback_tool))
                ));
                parts.push(substitute.script(ctx, file));
                parts.push("exit $?".to_string());
                parts.push("fi".to_string());
            }
            (Some(tool), None) => parts.push(tool_guard(tool)),
            (None, _) => {}
        }
        let mut runtime_flags = "";
        if let (Language::Cxx, Some(runtime)) = (ctx.language, self.spec.cxx_runtime) {
            parts.push(directory_guard(runtime.dir, runtime.label));
            runtime_flags = runtime.flags;
        }
        let bin = format!("/tmp/crucible-{}", self.spec.id);
        parts.push(render_template(
            self.template,
            ctx,
            file,
            &self.argument,
            &bin,
            runtime_flags,
        ));
        parts.join("\n")
    }
}

/// Row of `crucible gates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: GateId,
    pub name: &'static str,
    pub category: GateCategory,
    pub kind: GateKind,
    pub scope: GateScope,
    pub tool: Option<&'static str>,
    pub enabled: bool,
    pub argument: String,
}

/// Static gate tables plus per-gate configuration.
#[derive(Debug, Clone, Default)]
pub struct GateCatalog {
    overrides: BTreeMap<String, GateOverride>,
    domains: Vec<DomainCategory>,
}

impl GateCatalog {
    pub fn new(overrides: BTreeMap<String, GateOverride>, domains: Vec<DomainCategory>) -> Self {
        Self { overrides, domains }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.gates.clone(), config.pipeline.domains.clone())
    }

    /// Core and acceptance gates are on unless disabled; domain gates are
    /// off unless their category is selected or the override enables them.
    pub fn is_enabled(&self, spec: &GateSpec) -> bool {
        if let Some(enabled) = self
            .overrides
            .get(spec.id.as_str())
            .and_then(|o| o.enabled)
        {
            return enabled;
        }
        match spec.category {
            GateCategory::Core | GateCategory::Acceptance => true,
            GateCategory::Domain => self
                .domains
                .iter()
                .any(|domain| domain.gate_id() == spec.id),
        }
    }

    pub fn argument(&self, spec: &GateSpec) -> String {
        self.overrides
            .get(spec.id.as_str())
            .and_then(|o| o.argument.clone())
            .unwrap_or_else(|| spec.default_arg.to_string())
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        all_specs()
            .map(|spec| CatalogEntry {
                id: spec.id,
                name: spec.name,
                category: spec.category,
                kind: spec.kind,
                scope: spec.scope,
                tool: spec.tool,
                enabled: self.is_enabled(spec),
                argument: self.argument(spec),
            })
            .collect()
    }

    /// Binaries worth probing before a run.
    pub fn probe_tools(&self) -> Vec<String> {
        let mut tools = Vec::new();
        for spec in all_specs().filter(|spec| self.is_enabled(spec)) {
            let names = spec
                .tool
                .into_iter()
                .chain(spec.fallback.map(|f| f.tool));
            for name in names {
                for language in [Language::C, Language::Cxx] {
                    let resolved = resolve_tool(name, language);
                    if !tools.contains(&resolved) {
                        tools.push(resolved);
                    }
                }
            }
        }
        tools
    }

    /// Enabled core gates in priority order. Gates whose predicate is false
    /// for this artifact are left out entirely.
    pub fn plan_core(&self, artifact: &Artifact, inventory: Option<&ToolInventory>) -> Vec<PlannedGate> {
        self.plan(CORE_GATES.iter(), artifact, inventory)
    }

    pub fn plan_acceptance(
        &self,
        ids: &[GateId],
        artifact: &Artifact,
        inventory: Option<&ToolInventory>,
    ) -> Vec<PlannedGate> {
        self.plan(
            ACCEPTANCE_GATES.iter().filter(|spec| ids.contains(&spec.id)),
            artifact,
            inventory,
        )
    }

    pub fn plan_domain(&self, artifact: &Artifact, inventory: Option<&ToolInventory>) -> Vec<PlannedGate> {
        self.plan(DOMAIN_GATES.iter(), artifact, inventory)
    }

    fn plan(
        &self,
        specs: impl Iterator<Item = &'static GateSpec>,
        artifact: &Artifact,
        inventory: Option<&ToolInventory>,
    ) -> Vec<PlannedGate> {
        let language = artifact.language();
        specs
            .filter(|spec| self.is_enabled(spec))
            .filter(|spec| spec.condition.holds(artifact))
            .map(|spec| self.resolve(spec, language, inventory))
            .collect()
    }

    fn resolve(
        &self,
        spec: &'static GateSpec,
        language: Language,
        inventory: Option<&ToolInventory>,
    ) -> PlannedGate {
        let mut planned = PlannedGate {
            spec,
            kind: spec.kind,
            tool: spec.tool.map(|t| resolve_tool(t, language)),
            template: spec.template,
            format: spec.format,
            argument: self.argument(spec),
            unavailable: None,
            fallback: spec.fallback,
        };
        let Some(inventory) = inventory else {
            return planned;
        };
        let fallback = planned.fallback.take();
        let Some(tool) = planned.tool.clone() else {
            return planned;
        };
        if inventory.is_available(&tool) {
            return planned;
        }
        match fallback {
            Some(fallback) if inventory.is_available(&resolve_tool(fallback.tool, language)) => {
                tracing::debug!(gate = %spec.id, missing = %tool, fallback = fallback.tool, "using fallback tool");
                planned.fallback = Some(fallback);
                planned = planned.with_fallback(language);
            }
            _ => {
                planned.unavailable = Some(format!("{} not installed in sandbox image", tool));
            }
        }
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ScriptContext {
        ScriptContext::new(&Artifact::single("main.cpp", "int main() {}"), "c11", "c++17")
    }

    #[test]
    fn core_gates_keep_priority_order() {
        let ids = CORE_GATES.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "lint",
                "static-analysis",
                "header-hygiene",
                "complexity",
                "strict-compile",
                "asan",
                "ubsan",
                "msan",
                "tsan",
                "run"
            ]
        );
    }

    #[test]
    fn gate_ids_parse_from_config_keys() {
        for id in GateId::ALL {
            assert_eq!(GateId::parse(id.as_str()), Some(id));
            assert!(GateSpec::lookup(id).is_some(), "no spec for {id}");
        }
        assert_eq!(GateId::parse("nope"), None);
    }

    #[test]
    fn template_expansion_quotes_files() {
        let ctx = ScriptContext {
            language: Language::C,
            std_flag: "-std=c11".to_string(),
            files: vec!["main.c".to_string(), "my util.c".to_string()],
            includes: vec![".".to_string(), "include".to_string()],
        };
        let out = render_template("{cc} {std} {arg} {includes} {files} -o {bin}", &ctx, None, "", "/tmp/x", "");
        assert_eq!(out, "clang -std=c11 -I. -Iinclude main.c 'my util.c' -o /tmp/x");
    }

    #[test]
    fn script_starts_with_tool_guard() {
        let catalog = GateCatalog::default();
        let plan = catalog.plan_core(&Artifact::single("main.cpp", "int main() {}"), None);
        let lint = &plan[0];
        let script = lint.script(&ctx(), Some("main.cpp"));
        assert!(script.starts_with("command -v clang-tidy"));
        assert!(script.contains("crucible: tool unavailable: clang-tidy"));
        assert!(script.contains("main.cpp -- -std=c++17 -I."));
    }

    #[test]
    fn msan_guards_instrumented_runtime_for_cxx_only() {
        let catalog = GateCatalog::default();
        let cxx = Artifact::single("main.cpp", "int main() {}");
        let msan = catalog
            .plan_core(&cxx, None)
            .into_iter()
            .find(|g| g.id() == GateId::Msan)
            .unwrap();
        assert!(msan.script(&ctx(), None).contains("[ -d "));

        let c = Artifact::single("main.c", "int main(void) { return 0; }");
        let c_ctx = ScriptContext::new(&c, "c11", "c++17");
        let msan_c = catalog
            .plan_core(&c, None)
            .into_iter()
            .find(|g| g.id() == GateId::Msan)
            .unwrap();
        assert!(!msan_c.script(&c_ctx, None).contains("[ -d "));
    }

    #[test]
    fn sentinel_names_the_missing_tool() {
        assert_eq!(
            unavailable_tool("crucible: tool unavailable: lizard\n").as_deref(),
            Some("lizard")
        );
        assert_eq!(unavailable_tool("all fine"), None);
    }

    #[test]
    fn sentinel_printed_by_the_program_is_not_a_skip() {
        assert_eq!(
            unavailable_tool("result: 3\ncrucible: tool unavailable: lizard\n"),
            None
        );
        assert!(!took_fallback("ok\ncrucible: fallback: clang\n"));
        assert!(took_fallback("crucible: fallback: clang\nwarning\n"));
    }

    #[test]
    fn static_analysis_without_inventory_picks_its_tool_in_the_script() {
        let plan = GateCatalog::default().plan_core(&Artifact::single("main.cpp", "int main() {}"), None);
        let analysis = plan
            .iter()
            .find(|g| g.id() == GateId::StaticAnalysis)
            .unwrap();
        assert_eq!(analysis.kind, GateKind::Gating);
        assert!(analysis.fallback.is_some());

        let script = analysis.script(&ctx(), Some("main.cpp"));
        let lines = script.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "if ! command -v cppcheck >/dev/null 2>&1; then");
        assert_eq!(
            lines[1],
            "command -v clang++ >/dev/null 2>&1 || { echo 'crucible: tool unavailable: cppcheck'; exit 0; }"
        );
        assert_eq!(lines[2], "echo 'crucible: fallback: clang++'");
        assert!(lines[3].starts_with("command -v clang++"));
        assert!(lines[4].starts_with("clang++ --analyze"));
        assert_eq!(&lines[5..7], &["exit $?", "fi"]);
        assert!(lines[7].starts_with("cppcheck --quiet"));

        let substitute = analysis.with_fallback(Language::Cxx);
        assert_eq!(substitute.kind, GateKind::Informational);
        assert!(substitute.fallback.is_none());
    }

    #[test]
    fn tsan_is_dropped_without_threading_indicators() {
        let catalog = GateCatalog::default();
        let serial = Artifact::single("main.cpp", "int main() { return 0; }");
        assert!(!catalog
            .plan_core(&serial, None)
            .iter()
            .any(|g| g.id() == GateId::Tsan));

        let threaded = Artifact::single(
            "main.cpp",
            "#include <thread>\nint main() { std::thread t([]{}); t.join(); }",
        );
        assert!(catalog
            .plan_core(&threaded, None)
            .iter()
            .any(|g| g.id() == GateId::Tsan));
    }

    #[test]
    fn overrides_disable_gates_and_replace_arguments() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "complexity".to_string(),
            GateOverride {
                enabled: Some(false),
                argument: None,
            },
        );
        overrides.insert(
            "run".to_string(),
            GateOverride {
                enabled: None,
                argument: Some("--fast".to_string()),
            },
        );
        let catalog = GateCatalog::new(overrides, Vec::new());
        let plan = catalog.plan_core(&Artifact::single("a.c", "int main(void){return 0;}"), None);
        assert!(!plan.iter().any(|g| g.id() == GateId::Complexity));
        let run = plan.iter().find(|g| g.id() == GateId::Run).unwrap();
        assert_eq!(run.argument, "--fast");
    }

    #[test]
    fn domain_gates_follow_selected_categories() {
        let artifact = Artifact::single("a.c", "int main(void){return 0;}");
        assert!(GateCatalog::default().plan_domain(&artifact, None).is_empty());

        let catalog = GateCatalog::new(BTreeMap::new(), vec![DomainCategory::Security]);
        let plan = catalog.plan_domain(&artifact, None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].id(), GateId::Security);
    }

    #[test]
    fn missing_cppcheck_falls_back_to_informational_analyzer() {
        let inventory = ToolInventory::parse("absent cppcheck\npresent clang++\n");
        let plan = GateCatalog::default().plan_core(
            &Artifact::single("main.cpp", "int main() {}"),
            Some(&inventory),
        );
        let analysis = plan
            .iter()
            .find(|g| g.id() == GateId::StaticAnalysis)
            .unwrap();
        assert_eq!(analysis.kind, GateKind::Informational);
        assert_eq!(analysis.tool.as_deref(), Some("clang++"));
        assert!(analysis.unavailable.is_none());
        assert!(analysis.fallback.is_none());
        assert!(analysis.script(&ctx(), Some("main.cpp")).starts_with("command -v clang++"));
    }

    #[test]
    fn missing_tool_without_fallback_is_marked_unavailable() {
        let inventory = ToolInventory::parse("absent lizard\n");
        let plan = GateCatalog::default().plan_core(
            &Artifact::single("main.cpp", "int main() {}"),
            Some(&inventory),
        );
        let complexity = plan.iter().find(|g| g.id() == GateId::Complexity).unwrap();
        assert!(complexity.unavailable.as_deref().unwrap().contains("lizard"));
    }

    #[test]
    fn probe_list_resolves_compiler_for_both_languages() {
        let tools = GateCatalog::default().probe_tools();
        assert!(tools.contains(&"clang".to_string()));
        assert!(tools.contains(&"clang++".to_string()));
        assert!(tools.contains(&"cppcheck".to_string()));
        assert!(!tools.iter().any(|t| t.contains('{')));
    }
}
