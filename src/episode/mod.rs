//! Generation episode
//!
//! Drives one user request through generate → validate → revise under the
//! escalation controller, with an optional advisory review once every
//! sandbox gate passes. Generation and review are collaborators behind
//! traits; the CLI never talks to a model directly.


use crate::artifact::Artifact;
use crate::error::EpisodeError;
use crate::escalation::{
    Decision, EscalationConfig, EscalationController, EscalationExhausted, ReviewBudget,
};
use crate::harness::AcceptanceCriteria;
use crate::pipeline::{PipelineRun, ProgressEvent, ValidationPipeline};
use crate::sandbox::StageRunner;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// What the generation collaborator is asked to build.
#[derive(Debug, Clone, Default)]
pub struct EpisodeRequest {
    pub prompt: String,
    pub criteria: Option<AcceptanceCriteria>,
}

impl EpisodeRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            criteria: None,
        }
    }

    pub fn with_definition_of_done(mut self, text: &str) -> Self {
        let criteria = AcceptanceCriteria::parse(text);
        self.criteria = (!criteria.is_empty()).then_some(criteria);
        self
    }

    /// Behavioral requirements the harnesses cannot check, for the prompt.
    pub fn requirement_notes(&self) -> Vec<String> {
        self.criteria
            .as_ref()
            .map(AcceptanceCriteria::requirement_notes)
            .unwrap_or_default()
    }
}

/// Produces and revises artifacts at a given capability tier.
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        request: &EpisodeRequest,
        tier: &str,
    ) -> impl Future<Output = anyhow::Result<Artifact>> + Send;

    /// `feedback` is the compact machine-formatted failure report of the
    /// previous attempt (or the reviewer's concerns).
    fn revise(
        &self,
        artifact: &Artifact,
        feedback: &str,
        tier: &str,
    ) -> impl Future<Output = anyhow::Result<Artifact>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    Concerns(String),
}

/// Advisory review after every sandbox gate passed.
pub trait Reviewer: Send + Sync {
    fn review(&self, artifact: &Artifact) -> impl Future<Output = anyhow::Result<ReviewVerdict>> + Send;
}

/// Reviewer used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReview;

impl Reviewer for NoReview {
    fn review(&self, _artifact: &Artifact) -> impl Future<Output = anyhow::Result<ReviewVerdict>> + Send {
        async { Ok(ReviewVerdict::Approved) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewOutcome {
    Approved,
    /// Review cap reached (or attempts ran out) with the concerns still open
    Overridden { concerns: String },
}

#[derive(Debug, Clone)]
pub enum EpisodeOutcome {
    Accepted {
        artifact: Artifact,
        run: PipelineRun,
        attempts: u32,
        tiers: Vec<String>,
        review: ReviewOutcome,
    },
    Exhausted {
        artifact: Artifact,
        run: PipelineRun,
        error: EscalationExhausted,
    },
}

impl EpisodeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, EpisodeOutcome::Accepted { .. })
    }

    pub fn artifact(&self) -> &Artifact {
        match self {
            EpisodeOutcome::Accepted { artifact, .. } | EpisodeOutcome::Exhausted { artifact, .. } => {
                artifact
            }
        }
    }

    pub fn last_run(&self) -> &PipelineRun {
        match self {
            EpisodeOutcome::Accepted { run, .. } | EpisodeOutcome::Exhausted { run, .. } => run,
        }
    }
}

pub struct Episode<'a, R, G, V = NoReview> {
    pipeline: &'a ValidationPipeline<R>,
    generator: &'a G,
    reviewer: Option<&'a V>,
    controller: EscalationController,
}

impl<'a, R, G> Episode<'a, R, G, NoReview> {
    pub fn new(pipeline: &'a ValidationPipeline<R>, generator: &'a G, escalation: EscalationConfig) -> Self {
        Self {
            pipeline,
            generator,
            reviewer: None,
            controller: EscalationController::new(escalation),
        }
    }
}

impl<'a, R, G, V> Episode<'a, R, G, V> {
    pub fn with_reviewer<V2: Reviewer>(self, reviewer: &'a V2) -> Episode<'a, R, G, V2> {
        Episode {
            pipeline: self.pipeline,
            generator: self.generator,
            reviewer: Some(reviewer),
            controller: self.controller,
        }
    }

    pub fn controller(&self) -> &EscalationController {
        &self.controller
    }
}

impl<'a, R, G, V> Episode<'a, R, G, V>
where
    R: StageRunner,
    G: Generator,
    V: Reviewer,
{
    /// Run one request to acceptance or exhaustion. Infrastructure errors
    /// and cancellation end the episode without consuming an attempt.
    pub async fn run(
        &mut self,
        request: &EpisodeRequest,
        progress: &mut (dyn FnMut(ProgressEvent<'_>) + Send),
        cancel: &CancellationToken,
    ) -> Result<EpisodeOutcome, EpisodeError> {
        self.controller.reset();
        let (max_lines, raw_lines) = {
            let config = self.pipeline.config();
            (config.max_feedback_lines, config.raw_fallback_lines)
        };

        let tier = self.controller.current_tier().to_string();
        tracing::info!(tier = %tier, "generating initial artifact");
        let mut artifact = self
            .generator
            .generate(request, &tier)
            .await
            .map_err(EpisodeError::Generation)?;

        loop {
            if cancel.is_cancelled() {
                return Err(EpisodeError::Cancelled);
            }
            let run = self
                .pipeline
                .run(&artifact, request.criteria.as_ref(), progress, cancel)
                .await?;
            self.controller.advance();

            let feedback = match self.controller.decide(&run, max_lines, raw_lines) {
                Decision::Exhausted(error) => {
                    tracing::warn!(attempts = error.attempts, "escalation exhausted");
                    return Ok(EpisodeOutcome::Exhausted {
                        artifact,
                        run,
                        error,
                    });
                }
                Decision::Retry { feedback, .. } => feedback,
                Decision::Accept => match self.review(&artifact).await? {
                    ReviewVerdict::Approved => {
                        return Ok(self.accepted(artifact, run, ReviewOutcome::Approved));
                    }
                    ReviewVerdict::Concerns(concerns) => {
                        let budget = self.controller.record_review_failure();
                        if budget == ReviewBudget::Accept || !self.controller.can_retry() {
                            tracing::info!(
                                review_failures = self.controller.review_failures(),
                                "accepting artifact over open review concerns"
                            );
                            return Ok(self.accepted(artifact, run, ReviewOutcome::Overridden { concerns }));
                        }
                        format!("[review] advisory review raised concerns\n{}", concerns.trim())
                    }
                },
            };

            let tier = self.controller.current_tier().to_string();
            tracing::info!(
                attempt = self.controller.total_attempts() + 1,
                tier = %tier,
                "revising artifact"
            );
            artifact = self
                .generator
                .revise(&artifact, &feedback, &tier)
                .await
                .map_err(EpisodeError::Generation)?;
        }
    }

    async fn review(&self, artifact: &Artifact) -> Result<ReviewVerdict, EpisodeError> {
        match self.reviewer {
            Some(reviewer) => reviewer.review(artifact).await.map_err(EpisodeError::Review),
            None => Ok(ReviewVerdict::Approved),
        }
    }

    fn accepted(&self, artifact: Artifact, run: PipelineRun, review: ReviewOutcome) -> EpisodeOutcome {
        tracing::info!(attempts = self.controller.total_attempts(), "artifact accepted");
        EpisodeOutcome::Accepted {
            artifact,
            run,
            attempts: self.controller.total_attempts(),
            tiers: self.controller.history().to_vec(),
            review,
        }
    }
}
