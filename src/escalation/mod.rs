//! Escalation controller
//!
//! Bounds the generate → validate → revise loop of one episode. Attempts are
//! counted monotonically and mapped onto an ordered list of capability tiers
//! in fixed windows, so a failing episode climbs to stronger tiers and never
//! steps back down. Advisory review failures have their own, smaller cap.

use crate::pipeline::PipelineRun;
use serde::{Deserialize, Serialize};

/// Used when the configured tier list is empty.
const FALLBACK_TIER: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Capability tier labels, weakest first
    #[serde(default = "default_tiers")]
    pub tiers: Vec<String>,
    /// Attempts spent at each tier before moving up
    #[serde(default = "default_attempts_per_tier")]
    pub attempts_per_tier: u32,
    /// Absolute ceiling on generation attempts per episode
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Advisory review failures tolerated before accepting anyway
    #[serde(default = "default_max_review_failures")]
    pub max_review_failures: u32,
}

fn default_tiers() -> Vec<String> {
    vec![
        "fast".to_string(),
        "balanced".to_string(),
        "frontier".to_string(),
    ]
}

fn default_attempts_per_tier() -> u32 {
    2
}

fn default_max_attempts() -> u32 {
    6
}

fn default_max_review_failures() -> u32 {
    2
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            attempts_per_tier: default_attempts_per_tier(),
            max_attempts: default_max_attempts(),
            max_review_failures: default_max_review_failures(),
        }
    }
}

/// Attempt budget spent without an artifact passing every gating gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("escalation exhausted after {attempts} attempts (tiers tried: {})", tiers.join(" -> "))]
pub struct EscalationExhausted {
    pub attempts: u32,
    /// Tier used for each attempt, in order
    pub tiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Retry { tier: String, feedback: String },
    Exhausted(EscalationExhausted),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewBudget {
    Retry,
    /// Review cap reached; every sandbox gate passed, so keep the artifact
    Accept,
}

#[derive(Debug, Clone)]
pub struct EscalationController {
    config: EscalationConfig,
    total_attempts: u32,
    review_failures: u32,
    history: Vec<String>,
}

impl EscalationController {
    pub fn new(mut config: EscalationConfig) -> Self {
        if config.tiers.is_empty() {
            config.tiers.push(FALLBACK_TIER.to_string());
        }
        config.attempts_per_tier = config.attempts_per_tier.max(1);
        Self {
            config,
            total_attempts: 0,
            review_failures: 0,
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn review_failures(&self) -> u32 {
        self.review_failures
    }

    /// Tiers used so far, one entry per attempt.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn can_retry(&self) -> bool {
        self.total_attempts < self.config.max_attempts
    }

    /// Tier for the next attempt. Pinned to the top tier once the ceiling
    /// is reached.
    pub fn current_tier(&self) -> &str {
        let top = self.config.tiers.len() - 1;
        let index = if self.can_retry() {
            ((self.total_attempts / self.config.attempts_per_tier) as usize).min(top)
        } else {
            top
        };
        &self.config.tiers[index]
    }

    /// Count one attempt and return the tier it runs at.
    pub fn advance(&mut self) -> String {
        let tier = self.current_tier().to_string();
        self.total_attempts += 1;
        self.history.push(tier.clone());
        tracing::debug!(attempt = self.total_attempts, tier = %tier, "escalation attempt");
        tier
    }

    /// What to do after validating the latest attempt.
    pub fn decide(&self, run: &PipelineRun, max_feedback_lines: usize, raw_lines: usize) -> Decision {
        if run.passed() {
            return Decision::Accept;
        }
        if !self.can_retry() {
            return Decision::Exhausted(self.exhausted());
        }
        Decision::Retry {
            tier: self.current_tier().to_string(),
            feedback: run.feedback(max_feedback_lines, raw_lines),
        }
    }

    pub fn record_review_failure(&mut self) -> ReviewBudget {
        self.review_failures += 1;
        if self.review_failures >= self.config.max_review_failures {
            ReviewBudget::Accept
        } else {
            ReviewBudget::Retry
        }
    }

    pub fn exhausted(&self) -> EscalationExhausted {
        EscalationExhausted {
            attempts: self.total_attempts,
            tiers: self.history.clone(),
        }
    }

    /// Start a new episode. Never called implicitly.
    pub fn reset(&mut self) {
        self.total_attempts = 0;
        self.review_failures = 0;
        self.history.clear();
    }
}
