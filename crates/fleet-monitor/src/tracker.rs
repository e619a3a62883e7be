//! Consecutive-failure tracking for sampled deployments.
//!
//! A successful sample resets the counter and derives health from the
//! reported power state. Failed samples count up; at the threshold health
//! becomes `unknown` and stays there until a sample succeeds.

use tracing::{debug, warn};

use fleet_hosting::ServerState;
use fleet_state::{Deployment, HealthStatus};

/// Result of one sampling attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Usage was read; the server reported this power state.
    Observed(ServerState),
    /// The hosting call failed.
    Failed,
}

/// Fold a sampling result into the deployment's health fields.
///
/// Returns `true` if anything changed and the record needs writing.
pub fn record(deployment: &mut Deployment, result: ProbeResult, failure_threshold: u32) -> bool {
    let before = (deployment.consecutive_failures, deployment.health);

    match result {
        ProbeResult::Observed(state) => {
            deployment.consecutive_failures = 0;
            deployment.health = match state {
                ServerState::Running => HealthStatus::Healthy,
                _ => HealthStatus::Degraded,
            };
            if before.1 == HealthStatus::Unknown && deployment.health != HealthStatus::Unknown {
                debug!(deployment = %deployment.id, "sampling recovered");
            }
        }
        ProbeResult::Failed => {
            deployment.consecutive_failures = deployment.consecutive_failures.saturating_add(1);
            if deployment.consecutive_failures >= failure_threshold
                && deployment.health != HealthStatus::Unknown
            {
                warn!(
                    deployment = %deployment.id,
                    failures = deployment.consecutive_failures,
                    threshold = failure_threshold,
                    "deployment health unknown after repeated sampling failures"
                );
                deployment.health = HealthStatus::Unknown;
            }
        }
    }

    before != (deployment.consecutive_failures, deployment.health)
}
