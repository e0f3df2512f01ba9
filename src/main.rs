use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use crucible::artifact::{load_artifacts, LoadedArtifact};
use crucible::config::Config;
use crucible::diagnostics::{render_human, render_raw, Palette};
use crucible::error::{InfraError, PipelineError, SandboxError};
use crucible::gates::{DomainCategory, GateCatalog, GateKind};
use crucible::harness::{build_harnesses, AcceptanceCriteria};
use crucible::pipeline::{GateResult, GateStatus, PipelineRun, ProgressEvent, ValidationPipeline};
use crucible::sandbox::{Sandbox, ToolInventory};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

const EXIT_GATE_FAILURE: u8 = 1;
const EXIT_INFRASTRUCTURE: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(
    name = "crucible",
    about = "Sandboxed correctness gates for generated C and C++",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gate pipeline against source files or directories
    Validate(ValidateArgs),
    /// Check the container runtime and which gate tools the image provides
    Doctor(DoctorArgs),
    /// List the gate catalog
    Gates,
    /// Print the harness programs a Definition of Done would produce
    Harness(HarnessArgs),
    /// Show or initialize the configuration file
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// C/C++ files or directories to validate
    #[arg(required = true)]
    paths: Vec<PathBuf>,
    /// Validate all inputs as one artifact instead of one per source file
    #[arg(long)]
    together: bool,
    /// Definition of Done file; examples and budgets become extra gates
    #[arg(long)]
    dod: Option<PathBuf>,
    /// Enable a domain gate (repeatable)
    #[arg(long, value_enum)]
    domain: Vec<DomainArg>,
    /// Print the pipeline runs as JSON on stdout
    #[arg(long)]
    json: bool,
    #[arg(long)]
    no_color: bool,
    /// Sandbox image override
    #[arg(long)]
    image: Option<String>,
    /// Per-gate timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Probe the image for gate tools before running
    #[arg(long)]
    probe: bool,
}

#[derive(Args, Debug)]
struct DoctorArgs {
    #[arg(long)]
    image: Option<String>,
}

#[derive(Args, Debug)]
struct HarnessArgs {
    /// Definition of Done file
    #[arg(long)]
    dod: PathBuf,
    /// Source files or directories forming the artifact
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Write the default configuration if none exists
    #[arg(long)]
    init: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DomainArg {
    Game,
    Embedded,
    Security,
    Performance,
}

impl From<DomainArg> for DomainCategory {
    fn from(arg: DomainArg) -> Self {
        match arg {
            DomainArg::Game => DomainCategory::Game,
            DomainArg::Embedded => DomainCategory::Embedded,
            DomainArg::Security => DomainCategory::Security,
            DomainArg::Performance => DomainCategory::Performance,
        }
    }
}

#[derive(Serialize)]
struct ArtifactReport<'a> {
    artifact: &'a str,
    run: &'a PipelineRun,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Validate(args) => run_validate(args).await,
        Commands::Doctor(args) => run_doctor(args).await,
        Commands::Gates => run_gates(),
        Commands::Harness(args) => run_harness(args),
        Commands::Config(args) => run_config(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_INFRASTRUCTURE)
        }
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n  Interrupted, stopping the current gate...");
            token.cancel();
        }
    });
    cancel
}

fn read_criteria(path: &Path) -> Result<Option<AcceptanceCriteria>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read Definition of Done {}", path.display()))?;
    let criteria = AcceptanceCriteria::parse(&text);
    if criteria.is_empty() {
        eprintln!(
            "  Definition of Done {} has no examples or budgets; running core gates only",
            path.display()
        );
        return Ok(None);
    }
    Ok(Some(criteria))
}

async fn run_validate(args: ValidateArgs) -> Result<ExitCode> {
    let mut config = Config::load();
    if let Some(image) = args.image {
        config.sandbox.image = image;
    }
    if let Some(timeout) = args.timeout {
        config.pipeline.stage_timeout_secs = timeout;
    }
    if !args.domain.is_empty() {
        config.pipeline.domains = args.domain.iter().copied().map(DomainCategory::from).collect();
    }
    if args.probe {
        config.pipeline.probe_tools = true;
    }

    let artifacts = load_artifacts(&args.paths, args.together)?;
    if artifacts.is_empty() {
        anyhow::bail!("no C/C++ source files found in the given paths");
    }
    let criteria = match &args.dod {
        Some(path) => read_criteria(path)?,
        None => None,
    };

    let sandbox = Sandbox::detect(&config.sandbox)?;
    let cancel = cancel_on_interrupt();
    let catalog = GateCatalog::from_config(&config);
    let probe = catalog.probe_tools();
    let mut pipeline = ValidationPipeline::new(sandbox.clone(), catalog, config.pipeline.clone());

    if config.pipeline.probe_tools {
        let tools = probe.iter().map(String::as_str).collect::<Vec<_>>();
        match sandbox.probe_tools(&tools, &cancel).await {
            Ok(inventory) => pipeline = pipeline.with_inventory(inventory),
            Err(SandboxError::Cancelled) => return Ok(ExitCode::from(EXIT_CANCELLED)),
            Err(SandboxError::Infrastructure(err)) => return Err(err.into()),
        }
    }

    let palette = if args.no_color || args.json || !std::io::stdout().is_terminal() {
        Palette::plain()
    } else {
        Palette::colored()
    };

    let mut runs = Vec::new();
    for LoadedArtifact { label, artifact } in &artifacts {
        eprintln!("🔍 Validating {} ({} file(s))", label, artifact.files().len());
        let mut progress = |event: ProgressEvent<'_>| print_progress(event);
        match pipeline
            .run(artifact, criteria.as_ref(), &mut progress, &cancel)
            .await
        {
            Ok(run) => {
                if !args.json {
                    print_run(label, &run, &palette, pipeline.config().raw_fallback_lines);
                }
                runs.push((label.as_str(), run));
            }
            Err(PipelineError::Cancelled) => {
                eprintln!("  Validation cancelled");
                return Ok(ExitCode::from(EXIT_CANCELLED));
            }
            Err(PipelineError::Infrastructure(err)) => return Err(infra_error(err)),
        }
    }

    if args.json {
        let reports = runs
            .iter()
            .map(|(label, run)| ArtifactReport {
                artifact: label,
                run,
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }

    let failed = runs.iter().filter(|(_, run)| !run.passed()).count();
    if runs.len() > 1 {
        eprintln!(
            "\n{} of {} artifact(s) passed",
            runs.len() - failed,
            runs.len()
        );
    }
    Ok(if failed > 0 {
        ExitCode::from(EXIT_GATE_FAILURE)
    } else {
        ExitCode::SUCCESS
    })
}

fn infra_error(err: InfraError) -> anyhow::Error {
    anyhow::Error::new(err).context("sandbox infrastructure failure")
}

fn print_progress(event: ProgressEvent<'_>) {
    match event {
        ProgressEvent::GateStarted { name, target, .. } => match target {
            Some(file) => eprintln!("  ▶ {} [{}]", name, file),
            None => eprintln!("  ▶ {}", name),
        },
        ProgressEvent::GateFinished(result) => {
            let mark = match (result.status, result.kind) {
                (GateStatus::Passed, _) => "✓",
                (GateStatus::Skipped, _) => "⊘",
                (GateStatus::Failed, GateKind::Gating) => "✗",
                (GateStatus::Failed, GateKind::Informational) => "!",
            };
            match &result.skip_notice {
                Some(notice) => eprintln!("    {} {} skipped: {}", mark, result.label(), notice),
                None => eprintln!("    {} {} ({} ms)", mark, result.label(), result.elapsed_ms),
            }
        }
    }
}

fn print_run(label: &str, run: &PipelineRun, palette: &Palette, raw_lines: usize) {
    for result in run.results.iter().filter(|r| r.status == GateStatus::Failed) {
        print_failure(result, palette, raw_lines);
    }
    let verdict = if run.passed() { "PASS" } else { "FAIL" };
    println!(
        "{} {} ({} gate(s), {} ms)",
        verdict,
        label,
        run.results.len(),
        run.elapsed_ms
    );
}

fn print_failure(result: &GateResult, palette: &Palette, raw_lines: usize) {
    let advisory = if result.kind == GateKind::Informational {
        " (informational)"
    } else {
        ""
    };
    println!("\n── {} failed{} ──", result.label(), advisory);
    if result.diagnostics.is_empty() {
        let raw = if result.detail.trim().is_empty() {
            &result.stderr
        } else {
            &result.detail
        };
        println!("{}", render_raw(raw, raw_lines));
        return;
    }
    for diagnostic in &result.diagnostics {
        println!("{}", render_human(diagnostic, palette));
    }
}

async fn run_doctor(args: DoctorArgs) -> Result<ExitCode> {
    let mut config = Config::load();
    if let Some(image) = args.image {
        config.sandbox.image = image;
    }
    println!("Config:  {}", Config::config_location());

    let sandbox = match Sandbox::detect(&config.sandbox) {
        Ok(sandbox) => sandbox,
        Err(err) => {
            println!("Runtime: ✗ {}", err);
            return Ok(ExitCode::from(EXIT_INFRASTRUCTURE));
        }
    };
    println!("Runtime: {} ({})", sandbox.runtime(), sandbox.binary().display());
    println!("Image:   {}", sandbox.image());

    let catalog = GateCatalog::from_config(&config);
    let probe = catalog.probe_tools();
    let tools = probe.iter().map(String::as_str).collect::<Vec<_>>();
    let cancel = cancel_on_interrupt();
    let inventory: ToolInventory = match sandbox.probe_tools(&tools, &cancel).await {
        Ok(inventory) => inventory,
        Err(SandboxError::Cancelled) => return Ok(ExitCode::from(EXIT_CANCELLED)),
        Err(SandboxError::Infrastructure(err)) => {
            println!("Probe:   ✗ {}", err);
            return Ok(ExitCode::from(EXIT_INFRASTRUCTURE));
        }
    };

    println!("\nTools:");
    for tool in &tools {
        let mark = if inventory.is_available(tool) { "✓" } else { "✗" };
        println!("  {} {}", mark, tool);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_gates() -> Result<ExitCode> {
    let config = Config::load();
    let catalog = GateCatalog::from_config(&config);
    println!(
        "{:<16} {:<11} {:<14} {:<14} {:<8} TOOL",
        "GATE", "CATEGORY", "KIND", "SCOPE", "ENABLED"
    );
    for entry in catalog.entries() {
        println!(
            "{:<16} {:<11} {:<14} {:<14} {:<8} {}",
            entry.id.as_str(),
            format!("{:?}", entry.category).to_lowercase(),
            format!("{:?}", entry.kind).to_lowercase(),
            format!("{:?}", entry.scope).to_lowercase(),
            if entry.enabled { "yes" } else { "no" },
            entry.tool.unwrap_or("-")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn run_harness(args: HarnessArgs) -> Result<ExitCode> {
    let Some(criteria) = read_criteria(&args.dod)? else {
        return Ok(ExitCode::from(EXIT_GATE_FAILURE));
    };
    let loaded = load_artifacts(&args.paths, true)?;
    let Some(LoadedArtifact { artifact, .. }) = loaded.into_iter().next() else {
        anyhow::bail!("no C/C++ source files found in the given paths");
    };

    let harnesses = build_harnesses(&artifact, &criteria);
    if harnesses.is_empty() {
        eprintln!("  Nothing to synthesize: no usable examples or benchmark target");
        return Ok(ExitCode::from(EXIT_GATE_FAILURE));
    }
    for note in criteria.requirement_notes() {
        eprintln!("  note: {}", note);
    }
    for harness in [&harnesses.acceptance, &harnesses.benchmark].into_iter().flatten() {
        for file in harness.files().iter().filter(|f| artifact.get(&f.name) != Some(f.content.as_str())) {
            println!("// ===== {} =====", file.name);
            println!("{}", file.content);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_config(args: ConfigArgs) -> Result<ExitCode> {
    if args.init {
        let exists = Config::config_path().map(|p| p.exists()).unwrap_or(false);
        if exists {
            println!("Config already exists at {}", Config::config_location());
            return Ok(ExitCode::SUCCESS);
        }
        let path = Config::default().save().map_err(anyhow::Error::msg)?;
        println!("Wrote default config to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    let config = Config::load();
    println!("# {}", Config::config_location());
    println!("{}", config.to_toml().map_err(anyhow::Error::msg)?);
    Ok(ExitCode::SUCCESS)
}
