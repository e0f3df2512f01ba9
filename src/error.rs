//! Error taxonomy shared by the sandbox, pipeline and episode layers.
//!
//! Gate failures are not errors: they travel as data inside `GateResult`.
//! Only infrastructure problems and cancellation abort a run.

use std::path::PathBuf;

/// The sandbox itself could not be brought up. Fatal to the current run and
/// never counted against the escalation budget.
#[derive(Debug, thiserror::Error)]
pub enum InfraError {
    #[error("no container runtime found on PATH (tried: {})", tried.join(", "))]
    NoRuntimeFound { tried: Vec<String> },
    #[error("failed to launch sandbox runtime '{}': {source}", binary.display())]
    Launch {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sandbox image '{image}' is unavailable: {detail}")]
    ImageUnavailable { image: String, detail: String },
    #[error("failed to prepare scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error("artifact file '{name}' rejected: {reason}")]
    ArtifactPath { name: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(transparent)]
    Infrastructure(#[from] InfraError),
    #[error("sandboxed stage cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Infrastructure(#[from] InfraError),
    #[error("validation cancelled")]
    Cancelled,
}

impl From<SandboxError> for PipelineError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Infrastructure(infra) => PipelineError::Infrastructure(infra),
            SandboxError::Cancelled => PipelineError::Cancelled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error(transparent)]
    Infrastructure(#[from] InfraError),
    #[error("episode cancelled")]
    Cancelled,
    #[error("generation failed: {0:#}")]
    Generation(#[source] anyhow::Error),
    #[error("review failed: {0:#}")]
    Review(#[source] anyhow::Error),
}

impl From<PipelineError> for EpisodeError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Infrastructure(infra) => EpisodeError::Infrastructure(infra),
            PipelineError::Cancelled => EpisodeError::Cancelled,
        }
    }
}
