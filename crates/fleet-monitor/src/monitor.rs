//! Resource monitor: reads live usage for one deployment and records it.
//!
//! Appending a sample (and keeping the failure counter current) is the
//! only durable effect; the monitor never decides or acts on scaling.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use fleet_core::{Utilization, epoch_secs};
use fleet_hosting::{HostingApi, HostingError, RetryPolicy, ServerState};
use fleet_state::{Deployment, ResourceSample, StateError, StateStore};

use crate::tracker::{self, ProbeResult};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("deployment {0} has no hosting server")]
    NoServer(String),

    #[error("hosting error: {0}")]
    Hosting(#[from] HostingError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl MonitorError {
    /// Retrying next cycle cannot fix this; an operator has to look.
    pub fn is_permanent(&self) -> bool {
        match self {
            MonitorError::NoServer(_) => true,
            MonitorError::Hosting(e) => e.is_permanent(),
            MonitorError::State(_) => false,
        }
    }
}

/// One successful read of a deployment's server.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub sample: ResourceSample,
    pub suspended: bool,
    pub state: ServerState,
}

impl Observation {
    pub fn utilization(&self) -> &Utilization {
        &self.sample.utilization
    }
}

pub struct ResourceMonitor {
    store: StateStore,
    hosting: Arc<dyn HostingApi>,
    retry: RetryPolicy,
    failure_threshold: u32,
}

impl ResourceMonitor {
    pub fn new(
        store: StateStore,
        hosting: Arc<dyn HostingApi>,
        retry: RetryPolicy,
        failure_threshold: u32,
    ) -> Self {
        Self {
            store,
            hosting,
            retry,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Read live utilization without recording anything.
    pub async fn observe(&self, deployment: &Deployment, now: u64) -> Result<Observation, MonitorError> {
        let server_id = deployment
            .server_id
            .as_deref()
            .ok_or_else(|| MonitorError::NoServer(deployment.id.clone()))?;

        let live = self
            .retry
            .run("get_utilization", || self.hosting.get_utilization(server_id))
            .await?;

        Ok(Observation {
            sample: ResourceSample {
                deployment_id: deployment.id.clone(),
                sampled_at: now,
                utilization: Utilization::compute(&live.usage, &deployment.limits),
                usage: live.usage,
            },
            suspended: live.suspended,
            state: live.state,
        })
    }

    /// Sample a deployment now. See [`ResourceMonitor::sample_at`].
    pub async fn sample(&self, deployment: &Deployment) -> Result<Observation, MonitorError> {
        self.sample_at(deployment, epoch_secs()).await
    }

    /// Read, persist the sample, and update the failure counter.
    ///
    /// On a hosting failure the counter is bumped (and health may become
    /// `unknown`) before the error is returned.
    pub async fn sample_at(
        &self,
        deployment: &Deployment,
        now: u64,
    ) -> Result<Observation, MonitorError> {
        match self.observe(deployment, now).await {
            Ok(observation) => {
                self.store.append_sample(&observation.sample)?;
                self.record(deployment, ProbeResult::Observed(observation.state), now)?;
                debug!(
                    deployment = %deployment.id,
                    memory_pct = observation.sample.utilization.memory_pct,
                    cpu_pct = observation.sample.utilization.cpu_pct,
                    disk_pct = observation.sample.utilization.disk_pct,
                    "sample recorded"
                );
                Ok(observation)
            }
            Err(MonitorError::State(e)) => Err(MonitorError::State(e)),
            Err(e) => {
                warn!(deployment = %deployment.id, error = %e, "sampling failed");
                self.record(deployment, ProbeResult::Failed, now)?;
                Err(e)
            }
        }
    }

    fn record(&self, deployment: &Deployment, result: ProbeResult, now: u64) -> Result<(), MonitorError> {
        // Cheap pre-check on the caller's copy; the write re-applies on fresh state.
        let mut preview = deployment.clone();
        if !tracker::record(&mut preview, result, self.failure_threshold) {
            return Ok(());
        }
        let threshold = self.failure_threshold;
        self.store.update_deployment(&deployment.id, |d| {
            if tracker::record(d, result, threshold) {
                d.updated_at = now;
            }
        })?;
        Ok(())
    }
}
