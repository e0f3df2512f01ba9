//! Sandbox executor: one command per call inside an isolated,
//! network-disabled, time-bounded container.

mod process;
mod scratch;

pub use process::{run_with_deadline, ChildError, ChildOutput};
pub use scratch::ScratchDir;

use crate::artifact::Artifact;
use crate::error::{InfraError, SandboxError};
use crate::util::{find_on_path, shell_quote, truncate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Fixed mount point of the artifact inside the sandbox.
pub const SANDBOX_WORKDIR: &str = "/work";

/// Exit code container runtimes use for their own failures (as opposed to
/// the contained command's).
const RUNTIME_ERROR_EXIT_CODE: i32 = 125;
const CONTAINER_REMOVE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const DETAIL_MAX_CHARS: usize = 4_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container runtimes in order of preference
    #[serde(default = "default_runtimes")]
    pub runtimes: Vec<String>,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: u32,
}

fn default_runtimes() -> Vec<String> {
    // Rootless/daemonless first.
    vec!["podman".to_string(), "docker".to_string()]
}

fn default_image() -> String {
    "ghcr.io/crucible-dev/cxx-toolchain:latest".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_pids_limit() -> u32 {
    256
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtimes: default_runtimes(),
            image: default_image(),
            memory: default_memory(),
            pids_limit: default_pids_limit(),
        }
    }
}

/// One command to run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    /// Label for logs, e.g. `lint:main.cpp`
    pub name: String,
    /// POSIX shell script executed with `sh -c` in [`SANDBOX_WORKDIR`]
    pub script: String,
    pub timeout: Duration,
    /// Relax process-introspection limits (data-race detection needs to
    /// control address-space layout).
    pub needs_ptrace: bool,
}

/// What happened to one sandboxed command. A failed report is a gate
/// failure, not an infrastructure problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Failure detail: the error stream, or a fallback when it is empty
    pub detail: String,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn from_output(output: ChildOutput, timeout: Duration, elapsed: Duration) -> Self {
        let exit_code = output.status.and_then(|s| s.code());
        let success = !output.timed_out && output.status.map(|s| s.success()).unwrap_or(false);
        let detail = if success {
            String::new()
        } else if output.timed_out {
            format!("timed out after {}s", timeout.as_secs_f64())
        } else if !output.stderr.trim().is_empty() {
            truncate(output.stderr.trim(), DETAIL_MAX_CHARS)
        } else if !output.stdout.trim().is_empty() {
            truncate(output.stdout.trim(), DETAIL_MAX_CHARS)
        } else {
            match exit_code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            }
        };
        Self {
            success,
            exit_code,
            timed_out: output.timed_out,
            stdout: output.stdout,
            stderr: output.stderr,
            detail,
            elapsed,
        }
    }
}

/// Which toolchain binaries the sandbox image exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInventory {
    pub present: BTreeSet<String>,
    pub absent: BTreeSet<String>,
}

impl ToolInventory {
    pub fn parse(probe_output: &str) -> Self {
        let mut inventory = Self::default();
        for line in probe_output.lines() {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("present"), Some(tool)) => {
                    inventory.present.insert(tool.to_string());
                }
                (Some("absent"), Some(tool)) => {
                    inventory.absent.insert(tool.to_string());
                }
                _ => {}
            }
        }
        inventory
    }

    /// Unknown tools count as available; the tool sentinel catches them later.
    pub fn is_available(&self, tool: &str) -> bool {
        !self.absent.contains(tool)
    }
}

/// The seam between the validation pipeline and whatever executes stages.
pub trait StageRunner: Send + Sync {
    fn run_stage(
        &self,
        artifact: &Artifact,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<StageReport, SandboxError>> + Send;
}

/// Resolved container runtime and image. Established once per session and
/// shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct Sandbox {
    runtime: String,
    binary: PathBuf,
    image: String,
    memory: String,
    pids_limit: u32,
}

impl Sandbox {
    /// Pick the first runtime from the preference list present on this host.
    pub fn detect(config: &SandboxConfig) -> Result<Self, InfraError> {
        Self::detect_with(config, find_on_path)
    }

    pub fn detect_with(
        config: &SandboxConfig,
        lookup: impl Fn(&str) -> Option<PathBuf>,
    ) -> Result<Self, InfraError> {
        for runtime in &config.runtimes {
            if let Some(binary) = lookup(runtime) {
                tracing::debug!(runtime = %runtime, binary = %binary.display(), "sandbox runtime selected");
                return Ok(Self {
                    runtime: runtime.clone(),
                    binary,
                    image: config.image.clone(),
                    memory: config.memory.clone(),
                    pids_limit: config.pids_limit,
                });
            }
        }
        Err(InfraError::NoRuntimeFound {
            tried: config.runtimes.clone(),
        })
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn build_run_args(&self, scratch: &Path, container_name: &str, stage: &Stage) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "--network=none".to_string(),
            "--memory".to_string(),
            self.memory.clone(),
            "--pids-limit".to_string(),
            self.pids_limit.to_string(),
            "-v".to_string(),
            format!("{}:{}:ro,Z", scratch.display(), SANDBOX_WORKDIR),
            "-w".to_string(),
            SANDBOX_WORKDIR.to_string(),
            "--tmpfs".to_string(),
            "/tmp:rw,exec".to_string(),
        ];
        if stage.needs_ptrace {
            args.extend([
                "--cap-add".to_string(),
                "SYS_PTRACE".to_string(),
                "--security-opt".to_string(),
                "seccomp=unconfined".to_string(),
            ]);
        } else {
            args.extend([
                "--security-opt".to_string(),
                "no-new-privileges".to_string(),
            ]);
        }
        args.extend([
            self.image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            stage.script.clone(),
        ]);
        args
    }

    /// Copy the artifact into a fresh scratch directory and run one stage
    /// against it.
    pub async fn execute(
        &self,
        artifact: &Artifact,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> Result<StageReport, SandboxError> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        let scratch = ScratchDir::materialize(artifact)?;
        let container = format!("crucible-{}", Uuid::new_v4().simple());

        let mut command = Command::new(&self.binary);
        command.args(self.build_run_args(scratch.path(), &container, stage));

        tracing::debug!(stage = %stage.name, container = %container, "starting sandboxed stage");
        let start = Instant::now();
        let result = run_with_deadline(&mut command, stage.timeout, cancel).await;
        let elapsed = start.elapsed();

        if let Err(err) = &result {
            if err.child_started() {
                self.force_remove(&container).await;
            }
        }

        match result {
            Err(ChildError::Spawn(source)) | Err(ChildError::Wait(source)) => {
                Err(InfraError::Launch {
                    binary: self.binary.clone(),
                    source,
                }
                .into())
            }
            Err(ChildError::Cancelled) => {
                tracing::info!(stage = %stage.name, "sandboxed stage cancelled");
                Err(SandboxError::Cancelled)
            }
            Ok(output) => {
                if output.timed_out {
                    self.force_remove(&container).await;
                    tracing::warn!(
                        stage = %stage.name,
                        timeout_secs = stage.timeout.as_secs(),
                        "sandboxed stage timed out; container killed"
                    );
                }
                let exit_code = output.status.and_then(|s| s.code());
                if exit_code == Some(RUNTIME_ERROR_EXIT_CODE)
                    && is_runtime_failure(&output.stderr)
                {
                    return Err(InfraError::ImageUnavailable {
                        image: self.image.clone(),
                        detail: truncate(output.stderr.trim(), DETAIL_MAX_CHARS),
                    }
                    .into());
                }
                let report = StageReport::from_output(output, stage.timeout, elapsed);
                tracing::debug!(
                    stage = %stage.name,
                    success = report.success,
                    exit_code = ?report.exit_code,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "sandboxed stage finished"
                );
                Ok(report)
            }
        }
    }

    /// Ask the image which toolchain binaries exist. One container launch.
    pub async fn probe_tools(
        &self,
        tools: &[&str],
        cancel: &CancellationToken,
    ) -> Result<ToolInventory, SandboxError> {
        let stage = Stage {
            name: "probe".to_string(),
            script: probe_script(tools),
            timeout: PROBE_TIMEOUT,
            needs_ptrace: false,
        };
        let report = self.execute(&Artifact::new(), &stage, cancel).await?;
        if !report.success {
            return Err(InfraError::ImageUnavailable {
                image: self.image.clone(),
                detail: report.detail,
            }
            .into());
        }
        Ok(ToolInventory::parse(&report.stdout))
    }

    async fn force_remove(&self, container: &str) {
        let mut command = Command::new(&self.binary);
        command.args(["rm", "-f", container]);
        let never = CancellationToken::new();
        if let Err(err) = run_with_deadline(&mut command, CONTAINER_REMOVE_TIMEOUT, &never).await {
            tracing::warn!(container = %container, error = ?err, "failed to remove sandbox container");
        }
    }
}

impl StageRunner for Sandbox {
    fn run_stage(
        &self,
        artifact: &Artifact,
        stage: &Stage,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<StageReport, SandboxError>> + Send {
        self.execute(artifact, stage, cancel)
    }
}

pub fn probe_script(tools: &[&str]) -> String {
    let names = tools
        .iter()
        .map(|tool| shell_quote(tool))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "for t in {}; do if command -v \"$t\" >/dev/null 2>&1; then echo \"present $t\"; else echo \"absent $t\"; fi; done",
        names
    )
}

fn is_runtime_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("error response from daemon")
        || lower.contains("unable to find image")
        || lower.contains("image not known")
        || lower.contains("manifest unknown")
        || lower.contains("pull access denied")
        || lower.lines().any(|line| line.trim_start().starts_with("error:"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::detect_with(&SandboxConfig::default(), |name| {
            (name == "docker").then(|| PathBuf::from("/usr/bin/docker"))
        })
        .unwrap()
    }

    fn stage(needs_ptrace: bool) -> Stage {
        Stage {
            name: "tsan".to_string(),
            script: "true".to_string(),
            timeout: Duration::from_secs(5),
            needs_ptrace,
        }
    }

    #[test]
    fn detect_prefers_first_available_runtime() {
        let podman = Sandbox::detect_with(&SandboxConfig::default(), |name| {
            Some(PathBuf::from(format!("/usr/bin/{}", name)))
        })
        .unwrap();
        assert_eq!(podman.runtime(), "podman");

        assert_eq!(sandbox().runtime(), "docker");
    }

    #[test]
    fn detect_fails_without_runtime() {
        let err = Sandbox::detect_with(&SandboxConfig::default(), |_| None).unwrap_err();
        match err {
            InfraError::NoRuntimeFound { tried } => assert_eq!(tried, vec!["podman", "docker"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_args_isolate_the_stage() {
        let args = sandbox().build_run_args(Path::new("/tmp/crucible-x"), "crucible-1", &stage(false));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"/tmp/crucible-x:/work:ro,Z".to_string()));
        assert!(args.contains(&"no-new-privileges".to_string()));
        assert!(!args.contains(&"SYS_PTRACE".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("true"));
    }

    #[test]
    fn only_ptrace_stages_relax_introspection() {
        let args = sandbox().build_run_args(Path::new("/tmp/s"), "c", &stage(true));
        assert!(args.contains(&"SYS_PTRACE".to_string()));
        assert!(args.contains(&"seccomp=unconfined".to_string()));
    }

    #[test]
    fn tool_inventory_parses_probe_output() {
        let inventory = ToolInventory::parse("present clang-tidy\nabsent cppcheck\nnoise\n");
        assert!(inventory.is_available("clang-tidy"));
        assert!(!inventory.is_available("cppcheck"));
        assert!(inventory.is_available("lizard"));
    }

    #[test]
    fn runtime_failures_are_recognized() {
        assert!(is_runtime_failure(
            "Unable to find image 'x:latest' locally\ndocker: Error response from daemon: pull access denied"
        ));
        assert!(is_runtime_failure("Error: x: image not known"));
        assert!(!is_runtime_failure("main.cpp:3:1: error: expected ';'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn report_uses_stderr_then_stdout_as_detail() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo only-stdout; exit 2");
        let output = run_with_deadline(&mut cmd, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        let report = StageReport::from_output(output, Duration::from_secs(5), Duration::ZERO);
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(2));
        assert_eq!(report.detail, "only-stdout");
    }

    #[test]
    fn probe_script_quotes_tool_names() {
        let script = probe_script(&["clang-tidy", "c++"]);
        assert!(script.starts_with("for t in clang-tidy c++;"));
    }
}
