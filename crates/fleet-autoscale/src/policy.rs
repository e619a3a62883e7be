//! Scaling policy engine.

use serde::Serialize;
use tracing::debug;

use fleet_core::config::ScalingConfig;
use fleet_core::{Tier, TierTable};
use fleet_state::{Deployment, ResourceSample, ScalingDirection, ScalingEvent, ScalingOutcome};

/// Reasons attached to decisions that do not scale.
pub mod reason {
    pub const COOLDOWN: &str = "cooldown";
    pub const WITHIN_BOUNDS: &str = "within bounds";
    pub const AT_CEILING: &str = "already at ceiling tier";
    pub const AT_FLOOR: &str = "at purchased floor tier";
    pub const INSUFFICIENT_SAMPLES: &str = "insufficient samples";
}

/// Outcome of evaluating one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingDecision {
    pub should_scale: bool,
    pub direction: ScalingDirection,
    /// Target tier; set only when `should_scale`.
    pub new_tier: Option<Tier>,
    pub reason: String,
}

impl ScalingDecision {
    pub fn no_change(reason: &str) -> Self {
        Self {
            should_scale: false,
            direction: ScalingDirection::None,
            new_tier: None,
            reason: reason.to_string(),
        }
    }

    fn scale(direction: ScalingDirection, new_tier: Tier, reason: String) -> Self {
        Self {
            should_scale: true,
            direction,
            new_tier: Some(new_tier),
            reason,
        }
    }
}

/// Timestamps from a deployment's scaling history the policy depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScalingHistory {
    /// Most recent scaling event of any outcome.
    pub last_event_at: Option<u64>,
    /// Most recent event that changed the tier.
    pub last_applied_at: Option<u64>,
}

impl ScalingHistory {
    pub fn new(latest: Option<&ScalingEvent>, latest_applied: Option<&ScalingEvent>) -> Self {
        Self {
            last_event_at: latest.map(|e| e.decided_at),
            last_applied_at: latest_applied.map(|e| e.decided_at),
        }
    }

    /// Build from events ordered newest first.
    pub fn from_events(events: &[ScalingEvent]) -> Self {
        Self::new(
            events.first(),
            events.iter().find(|e| e.outcome == ScalingOutcome::Applied),
        )
    }
}

/// Threshold-and-window policy. Thresholds are percentages.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub upper_threshold: f64,
    pub lower_threshold: f64,
    /// M: consecutive over-threshold samples required to step up.
    pub scale_up_samples: usize,
    /// N: consecutive under-threshold samples required to step down.
    pub scale_down_samples: usize,
    pub cooldown_secs: u64,
}

impl ScalingPolicy {
    pub fn from_config(config: &ScalingConfig) -> Self {
        Self {
            upper_threshold: config.upper_threshold,
            lower_threshold: config.lower_threshold,
            scale_up_samples: config.scale_up_samples.max(1),
            scale_down_samples: config.scale_down_samples.max(config.scale_up_samples.max(1)),
            cooldown_secs: config.cooldown().as_secs(),
        }
    }

    /// How many recent samples a caller must load for [`ScalingPolicy::decide`].
    pub fn sample_window(&self) -> usize {
        self.scale_up_samples.max(self.scale_down_samples)
    }

    /// Decide whether `deployment` should change tier.
    ///
    /// `samples` must be ordered newest first.
    pub fn decide(
        &self,
        deployment: &Deployment,
        samples: &[ResourceSample],
        history: ScalingHistory,
        tiers: &TierTable,
        now: u64,
    ) -> ScalingDecision {
        let decision = self.evaluate(deployment, samples, history, tiers, now);
        debug!(
            deployment = %deployment.id,
            tier = %deployment.tier,
            should_scale = decision.should_scale,
            direction = %decision.direction,
            reason = %decision.reason,
            "scaling decision"
        );
        decision
    }

    fn evaluate(
        &self,
        deployment: &Deployment,
        samples: &[ResourceSample],
        history: ScalingHistory,
        tiers: &TierTable,
        now: u64,
    ) -> ScalingDecision {
        if let Some(at) = history.last_event_at
            && now.saturating_sub(at) < self.cooldown_secs
        {
            return ScalingDecision::no_change(reason::COOLDOWN);
        }

        // Samples up to and including the second of the last resize were
        // measured against the old limits.
        let fresh_len = match history.last_applied_at {
            Some(cutoff) => samples
                .iter()
                .take_while(|s| s.sampled_at > cutoff)
                .count(),
            None => samples.len(),
        };
        let fresh = &samples[..fresh_len];

        let m = self.scale_up_samples;
        if fresh.len() >= m
            && fresh[..m]
                .iter()
                .all(|s| s.utilization.any_above(self.upper_threshold))
        {
            return match next_step(deployment.tier, tiers) {
                Some(up) => ScalingDecision::scale(
                    ScalingDirection::Up,
                    up,
                    format!(
                        "utilization above {}% in last {m} samples",
                        self.upper_threshold
                    ),
                ),
                None => ScalingDecision::no_change(reason::AT_CEILING),
            };
        }

        let n = self.scale_down_samples;
        if fresh.len() >= n
            && fresh[..n]
                .iter()
                .all(|s| s.utilization.all_below(self.lower_threshold))
        {
            return match deployment.tier.prev() {
                Some(down) if deployment.tier > deployment.floor_tier => ScalingDecision::scale(
                    ScalingDirection::Down,
                    down,
                    format!(
                        "utilization below {}% in last {n} samples",
                        self.lower_threshold
                    ),
                ),
                _ => ScalingDecision::no_change(reason::AT_FLOOR),
            };
        }

        if fresh.len() < m {
            return ScalingDecision::no_change(reason::INSUFFICIENT_SAMPLES);
        }
        ScalingDecision::no_change(reason::WITHIN_BOUNDS)
    }
}

fn next_step(tier: Tier, tiers: &TierTable) -> Option<Tier> {
    tier.next().filter(|_| tier < tiers.ceiling())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{RawUsage, Utilization};
    use fleet_state::{Actor, DeploymentStatus, HealthStatus};

    const NOW: u64 = 100_000;

    fn policy() -> ScalingPolicy {
        ScalingPolicy {
            upper_threshold: 80.0,
            lower_threshold: 30.0,
            scale_up_samples: 3,
            scale_down_samples: 6,
            cooldown_secs: 900,
        }
    }

    fn deployment(tier: Tier, floor: Tier) -> Deployment {
        Deployment {
            id: "d1".into(),
            order_ref: "o1".into(),
            customer_id: "c".into(),
            guild_id: "g".into(),
            server_id: Some("s1".into()),
            tier,
            floor_tier: floor,
            limits: TierTable::default().limits(tier),
            status: DeploymentStatus::Active,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            hold_reason: None,
            created_at: 0,
            provisioned_at: Some(0),
            updated_at: 0,
        }
    }

    /// Samples from memory percentages given oldest first, five minutes apart,
    /// the last one at `NOW`. Returned newest first.
    fn memory_samples(pcts: &[f64]) -> Vec<ResourceSample> {
        let n = pcts.len() as u64;
        let mut samples: Vec<ResourceSample> = pcts
            .iter()
            .enumerate()
            .map(|(i, &pct)| ResourceSample {
                deployment_id: "d1".into(),
                sampled_at: NOW - (n - 1 - i as u64) * 300,
                utilization: Utilization {
                    memory_pct: pct,
                    cpu_pct: 5.0,
                    disk_pct: 5.0,
                },
                usage: RawUsage::default(),
            })
            .collect();
        samples.reverse();
        samples
    }

    fn decide(d: &Deployment, samples: &[ResourceSample], history: ScalingHistory) -> ScalingDecision {
        policy().decide(d, samples, history, &TierTable::default(), NOW)
    }

    #[test]
    fn sustained_pressure_scales_up() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[85.0, 87.0, 90.0]), ScalingHistory::default());

        assert!(decision.should_scale);
        assert_eq!(decision.direction, ScalingDirection::Up);
        assert_eq!(decision.new_tier, Some(Tier::Pro));
    }

    #[test]
    fn spike_then_normal_does_not_scale() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[50.0, 95.0, 50.0]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::WITHIN_BOUNDS));

        // Two hot samples out of three is still not enough.
        let decision = decide(&d, &memory_samples(&[50.0, 95.0, 95.0]), ScalingHistory::default());
        assert!(!decision.should_scale);
    }

    #[test]
    fn threshold_is_strict() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[80.0, 80.0, 80.0]), ScalingHistory::default());
        assert!(!decision.should_scale);
    }

    #[test]
    fn any_dimension_counts_for_scale_up() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let mut samples = memory_samples(&[10.0, 10.0, 10.0]);
        samples[0].utilization.cpu_pct = 120.0;
        samples[1].utilization.disk_pct = 81.0;
        samples[2].utilization.cpu_pct = 99.0;

        let decision = decide(&d, &samples, ScalingHistory::default());
        assert_eq!(decision.direction, ScalingDirection::Up);
    }

    #[test]
    fn ceiling_tier_does_not_scale_up() {
        let d = deployment(Tier::Business, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[95.0, 95.0, 95.0]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::AT_CEILING));
    }

    #[test]
    fn sustained_idle_scales_down_one_step() {
        let d = deployment(Tier::Business, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[10.0; 6]), ScalingHistory::default());

        assert_eq!(decision.direction, ScalingDirection::Down);
        assert_eq!(decision.new_tier, Some(Tier::Pro));
    }

    #[test]
    fn scale_down_needs_the_longer_window() {
        let d = deployment(Tier::Pro, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[10.0; 5]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::WITHIN_BOUNDS));

        let decision = decide(
            &d,
            &memory_samples(&[10.0, 10.0, 10.0, 31.0, 10.0, 10.0]),
            ScalingHistory::default(),
        );
        assert!(!decision.should_scale);
    }

    #[test]
    fn never_below_purchased_floor() {
        let d = deployment(Tier::Pro, Tier::Pro);
        let decision = decide(&d, &memory_samples(&[5.0; 6]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::AT_FLOOR));

        let d = deployment(Tier::Starter, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[5.0; 6]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::AT_FLOOR));
    }

    #[test]
    fn cooldown_overrides_thresholds() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let history = ScalingHistory {
            last_event_at: Some(NOW - 600),
            last_applied_at: None,
        };
        let decision = decide(&d, &memory_samples(&[90.0, 90.0, 90.0]), history);
        assert_eq!(decision, ScalingDecision::no_change(reason::COOLDOWN));

        // Expired cooldown lets the decision through.
        let history = ScalingHistory {
            last_event_at: Some(NOW - 900),
            last_applied_at: None,
        };
        assert!(decide(&d, &memory_samples(&[90.0, 90.0, 90.0]), history).should_scale);
    }

    #[test]
    fn samples_before_last_resize_are_ignored() {
        let d = deployment(Tier::Pro, Tier::Starter);
        // Resize applied between the second and third newest samples.
        let applied_at = NOW - 450;
        let history = ScalingHistory {
            last_event_at: Some(applied_at),
            last_applied_at: Some(applied_at),
        };
        let policy = ScalingPolicy {
            cooldown_secs: 0,
            ..policy()
        };
        let decision = policy.decide(
            &d,
            &memory_samples(&[90.0, 90.0, 90.0, 90.0]),
            history,
            &TierTable::default(),
            NOW,
        );
        assert_eq!(decision, ScalingDecision::no_change(reason::INSUFFICIENT_SAMPLES));
    }

    #[test]
    fn sample_in_the_resize_second_is_stale() {
        let d = deployment(Tier::Pro, Tier::Starter);
        let policy = ScalingPolicy {
            cooldown_secs: 0,
            ..policy()
        };
        // The sample that triggered the resize shares its timestamp.
        let mut samples = memory_samples(&[90.0, 90.0, 90.0]);
        let history = ScalingHistory {
            last_event_at: Some(samples[2].sampled_at),
            last_applied_at: Some(samples[2].sampled_at),
        };
        let decide = |samples: &[ResourceSample]| {
            policy.decide(&d, samples, history, &TierTable::default(), NOW)
        };
        assert_eq!(
            decide(&samples),
            ScalingDecision::no_change(reason::INSUFFICIENT_SAMPLES)
        );

        // A third post-resize sample makes the window complete.
        let mut newer = samples[0].clone();
        newer.sampled_at = NOW + 300;
        samples.insert(0, newer);
        assert_eq!(decide(&samples).new_tier, Some(Tier::Business));
    }

    #[test]
    fn too_few_samples() {
        let d = deployment(Tier::Starter, Tier::Starter);
        let decision = decide(&d, &memory_samples(&[95.0, 95.0]), ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::INSUFFICIENT_SAMPLES));
        let decision = decide(&d, &[], ScalingHistory::default());
        assert_eq!(decision, ScalingDecision::no_change(reason::INSUFFICIENT_SAMPLES));
    }

    #[test]
    fn history_from_events() {
        let table = TierTable::default();
        let event = |at, outcome| ScalingEvent {
            deployment_id: "d1".into(),
            decided_at: at,
            direction: ScalingDirection::Up,
            reason: String::new(),
            actor: Actor::Autoscaler,
            old_tier: Tier::Starter,
            new_tier: Tier::Pro,
            old_resources: table.limits(Tier::Starter),
            new_resources: table.limits(Tier::Pro),
            outcome,
        };
        let events = vec![
            event(300, ScalingOutcome::Failed),
            event(200, ScalingOutcome::Applied),
            event(100, ScalingOutcome::Applied),
        ];
        let history = ScalingHistory::from_events(&events);
        assert_eq!(history.last_event_at, Some(300));
        assert_eq!(history.last_applied_at, Some(200));
        assert_eq!(ScalingHistory::from_events(&[]), ScalingHistory::default());
    }

    #[test]
    fn from_config_maps_fields() {
        let policy = ScalingPolicy::from_config(&ScalingConfig::default());
        assert_eq!(policy, self::policy());
        assert_eq!(policy.sample_window(), 6);
    }
}
