//! Pass summary: the externally visible result of one pass.

use serde::{Deserialize, Serialize};

use fleet_core::Utilization;
use fleet_state::ScalingDirection;

/// What happened to one deployment during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailOutcome {
    /// A resize was applied.
    Scaled,
    /// Sampled and evaluated; no resize needed.
    Unchanged,
    /// Not evaluated or not acted on (hold, drift, lease busy, tier moved).
    Skipped,
    /// Sampling or resizing failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassDetail {
    pub deployment_id: String,
    /// Utilization observed this pass, if sampling succeeded.
    pub usage: Option<Utilization>,
    pub decision_reason: String,
    pub scaled: bool,
    pub direction: ScalingDirection,
    pub outcome: DetailOutcome,
}

impl PassDetail {
    pub(crate) fn new(deployment_id: &str, outcome: DetailOutcome, reason: impl Into<String>) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            usage: None,
            decision_reason: reason.into(),
            scaled: false,
            direction: ScalingDirection::None,
            outcome,
        }
    }

    pub(crate) fn with_usage(mut self, usage: Utilization) -> Self {
        self.usage = Some(usage);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub checked: usize,
    pub scaled_up: usize,
    pub scaled_down: usize,
    pub errors: usize,
    /// Active deployments not started before the budget ran out.
    pub deferred: usize,
    pub details: Vec<PassDetail>,
}

impl PassSummary {
    /// Merge per-worker results.
    pub fn from_details(mut details: Vec<PassDetail>, deferred: usize) -> Self {
        details.sort_by(|a, b| a.deployment_id.cmp(&b.deployment_id));
        let scaled = |dir: ScalingDirection| details.iter().filter(|d| d.scaled && d.direction == dir).count();
        let scaled_up = scaled(ScalingDirection::Up);
        let scaled_down = scaled(ScalingDirection::Down);
        let errors = details
            .iter()
            .filter(|d| d.outcome == DetailOutcome::Error)
            .count();
        Self {
            checked: details.len(),
            scaled_up,
            scaled_down,
            errors,
            deferred,
            details,
        }
    }
}
