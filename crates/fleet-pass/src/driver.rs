//! One monitoring pass across all active deployments.
//!
//! A fixed number of workers drain a shared queue. Each worker runs one
//! deployment's pipeline (sample, decide, execute) to completion before
//! checking the deadline and taking the next; deployments still queued when
//! the budget runs out are counted as deferred and left for the next pass.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use fleet_autoscale::{ScalingHistory, ScalingPolicy};
use fleet_core::config::PassConfig;
use fleet_core::epoch_secs;
use fleet_hosting::HostingError;
use fleet_monitor::ResourceMonitor;
use fleet_provision::{ProvisionError, Provisioner, ResizeRequest};
use fleet_state::{Actor, Deployment, DeploymentStatus, ScalingOutcome, StateError, StateStore};

use crate::summary::{DetailOutcome, PassDetail, PassSummary};

pub const DRIFT_REASON: &str = "suspended on hosting platform";

#[derive(Debug, Error)]
pub enum PassError {
    #[error("a pass is already running")]
    AlreadyRunning,

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("hosting error: {0}")]
    Hosting(#[from] HostingError),
}

#[derive(Debug, Clone)]
pub struct PassOptions {
    /// Worker pool size.
    pub concurrency: usize,
    /// Wall-clock budget for the whole pass.
    pub budget: Duration,
}

impl PassOptions {
    pub fn from_config(config: &PassConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            budget: config.budget(),
        }
    }
}

/// Everything a worker needs; shared by all workers of a pass.
struct Pipeline {
    store: StateStore,
    monitor: Arc<ResourceMonitor>,
    provisioner: Arc<Provisioner>,
    policy: ScalingPolicy,
}

pub struct PassDriver {
    pipeline: Arc<Pipeline>,
    options: PassOptions,
    /// Held for the duration of a pass; `try_lock` refuses overlap.
    running: Mutex<()>,
}

impl PassDriver {
    pub fn new(
        store: StateStore,
        monitor: Arc<ResourceMonitor>,
        provisioner: Arc<Provisioner>,
        policy: ScalingPolicy,
        options: PassOptions,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                monitor,
                provisioner,
                policy,
            }),
            options,
            running: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ScalingPolicy {
        &self.pipeline.policy
    }

    /// Run one pass. Fails only if a pass is already running in this
    /// process or the deployment list cannot be read; per-deployment
    /// failures are reported in the summary.
    pub async fn run_pass(&self) -> Result<PassSummary, PassError> {
        let _running = self.running.try_lock().map_err(|_| PassError::AlreadyRunning)?;
        let started = Instant::now();
        let deadline = started + self.options.budget;

        let deployments = self
            .pipeline
            .store
            .list_deployments_by_status(DeploymentStatus::Active)?;
        let total = deployments.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(deployments)));
        let workers = self.options.concurrency.min(total);
        info!(deployments = total, workers, "pass started");

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = queue.clone();
            let pipeline = self.pipeline.clone();
            handles.push(tokio::spawn(async move {
                let mut details = Vec::new();
                loop {
                    if Instant::now() >= deadline {
                        debug!(worker, "pass budget exhausted");
                        break;
                    }
                    let Some(deployment) = queue.lock().await.pop_front() else {
                        break;
                    };
                    details.push(pipeline.process(deployment).await);
                }
                details
            }));
        }

        let mut details = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(worker_details) => details.extend(worker_details),
                Err(e) => error!(error = %e, "pass worker panicked"),
            }
        }
        let deferred = queue.lock().await.len();

        let summary = PassSummary::from_details(details, deferred);
        info!(
            checked = summary.checked,
            scaled_up = summary.scaled_up,
            scaled_down = summary.scaled_down,
            errors = summary.errors,
            deferred = summary.deferred,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pass finished"
        );
        Ok(summary)
    }
}

impl Pipeline {
    /// Sample, decide and (maybe) resize one deployment. Never fails; every
    /// outcome becomes a detail row.
    async fn process(&self, listed: Deployment) -> PassDetail {
        let id = listed.id.clone();

        // Re-read: an admin call may have changed it since the pass listed it.
        let deployment = match self.store.get_deployment(&id) {
            Ok(Some(d)) if d.status == DeploymentStatus::Active => d,
            Ok(_) => return PassDetail::new(&id, DetailOutcome::Skipped, "no longer active"),
            Err(e) => return PassDetail::new(&id, DetailOutcome::Error, e.to_string()),
        };

        if let Some(reason) = &deployment.hold_reason {
            debug!(deployment = %id, %reason, "skipping held deployment");
            return PassDetail::new(&id, DetailOutcome::Skipped, format!("on hold: {reason}"));
        }

        let now = epoch_secs();
        let observation = match self.monitor.sample_at(&deployment, now).await {
            Ok(o) => o,
            Err(e) => {
                if e.is_permanent() {
                    self.hold(&id, &e);
                }
                return PassDetail::new(&id, DetailOutcome::Error, e.to_string());
            }
        };
        let usage = observation.sample.utilization;

        if observation.suspended {
            warn!(deployment = %id, "server suspended on hosting platform but active in store");
            return PassDetail::new(&id, DetailOutcome::Skipped, DRIFT_REASON).with_usage(usage);
        }

        let decision = match self.decide(&deployment, now) {
            Ok(d) => d,
            Err(e) => {
                return PassDetail::new(&id, DetailOutcome::Error, e.to_string()).with_usage(usage);
            }
        };
        if !decision.should_scale {
            return PassDetail::new(&id, DetailOutcome::Unchanged, decision.reason).with_usage(usage);
        }
        let Some(new_tier) = decision.new_tier else {
            return PassDetail::new(&id, DetailOutcome::Unchanged, decision.reason).with_usage(usage);
        };

        let request = ResizeRequest {
            new_tier,
            actor: Actor::Autoscaler,
            reason: decision.reason.clone(),
            expected_tier: Some(deployment.tier),
        };
        match self.provisioner.update_resources(&id, request).await {
            Ok(result) if result.outcome == ScalingOutcome::Applied => {
                let mut detail =
                    PassDetail::new(&id, DetailOutcome::Scaled, decision.reason).with_usage(usage);
                detail.scaled = true;
                detail.direction = decision.direction;
                detail
            }
            Ok(_) => PassDetail::new(&id, DetailOutcome::Skipped, "tier changed before resize")
                .with_usage(usage),
            Err(ProvisionError::InProgress(_)) => {
                PassDetail::new(&id, DetailOutcome::Skipped, "operation in progress").with_usage(usage)
            }
            Err(e) => {
                if e.is_permanent() {
                    self.hold(&id, &e);
                }
                PassDetail::new(&id, DetailOutcome::Error, e.to_string()).with_usage(usage)
            }
        }
    }

    fn decide(
        &self,
        deployment: &Deployment,
        now: u64,
    ) -> Result<fleet_autoscale::ScalingDecision, StateError> {
        let samples = self
            .store
            .list_recent_samples(&deployment.id, self.policy.sample_window())?;
        let history = ScalingHistory::new(
            self.store.latest_scaling_event(&deployment.id)?.as_ref(),
            self.store
                .latest_applied_scaling_event(&deployment.id)?
                .as_ref(),
        );
        Ok(self.policy.decide(
            deployment,
            &samples,
            history,
            self.provisioner.tiers(),
            now,
        ))
    }

    fn hold(&self, id: &str, cause: &dyn std::fmt::Display) {
        if let Err(e) = self.provisioner.hold(id, &cause.to_string()) {
            error!(deployment = %id, error = %e, "failed to place operator hold");
        }
    }
}
