//! Wires the controller components together from a [`FleetConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::sync::watch;
use tracing::{info, warn};

use fleet_autoscale::ScalingPolicy;
use fleet_core::{FleetConfig, epoch_secs};
use fleet_hosting::{HostingApi, PanelClient, RetryPolicy};
use fleet_monitor::ResourceMonitor;
use fleet_pass::{PassDriver, PassOptions, ReconcileReport};
use fleet_provision::{Provisioner, WebhookNotifier};
use fleet_state::StateStore;

/// How often `serve` prunes old samples in the background.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Every long-lived component of the controller.
pub struct Fleet {
    pub config: FleetConfig,
    pub store: StateStore,
    pub hosting: Arc<dyn HostingApi>,
    pub retry: RetryPolicy,
    pub monitor: Arc<ResourceMonitor>,
    pub provisioner: Arc<Provisioner>,
    pub driver: Arc<PassDriver>,
}

impl Fleet {
    /// Open the store on disk and talk to the real hosting panel.
    pub fn open(config: FleetConfig) -> anyhow::Result<Self> {
        let db_path = Path::new(&config.server.data_path);
        if let Some(dir) = db_path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create data directory {}", dir.display()))?;
        }
        let store = StateStore::open(db_path)
            .with_context(|| format!("open state store {}", db_path.display()))?;
        info!(path = %db_path.display(), "state store opened");

        let hosting: Arc<dyn HostingApi> =
            Arc::new(PanelClient::new(&config.hosting).context("build hosting client")?);
        Self::assemble(config, store, hosting)
    }

    /// Build the components around an existing store and hosting backend.
    pub fn assemble(
        config: FleetConfig,
        store: StateStore,
        hosting: Arc<dyn HostingApi>,
    ) -> anyhow::Result<Self> {
        let tiers = config.tier_table()?;
        let retry = RetryPolicy::from_config(&config.retry);

        let monitor = Arc::new(ResourceMonitor::new(
            store.clone(),
            hosting.clone(),
            retry.clone(),
            config.monitor.failure_threshold,
        ));

        let mut provisioner = Provisioner::new(store.clone(), hosting.clone(), tiers, retry.clone())
            .with_holder(format!("fleetd-{}", std::process::id()))
            .with_lease_ttl(config.pass.lease_ttl())
            .with_template(config.hosting.template.clone());
        if let Some(url) = config.notify.webhook_url.as_deref() {
            let timeout = config.notify.timeout();
            let notifier = WebhookNotifier::new(url, timeout).context("build webhook client")?;
            provisioner = provisioner
                .with_notifier(Arc::new(notifier))
                .with_notify_timeout(timeout);
            info!("customer notifications enabled");
        }
        let provisioner = Arc::new(provisioner);

        let driver = Arc::new(PassDriver::new(
            store.clone(),
            monitor.clone(),
            provisioner.clone(),
            ScalingPolicy::from_config(&config.scaling),
            PassOptions::from_config(&config.pass),
        ));

        Ok(Self {
            config,
            store,
            hosting,
            retry,
            monitor,
            provisioner,
            driver,
        })
    }

    /// The HTTP surface.
    pub fn router(&self) -> Router {
        let state = fleet_api::ApiState {
            store: self.store.clone(),
            provisioner: self.provisioner.clone(),
            monitor: self.monitor.clone(),
            driver: self.driver.clone(),
            upgrade_threshold: self.config.scaling.upper_threshold,
        };
        fleet_api::build_router(state, &self.config.auth)
    }

    /// Delete samples older than `retention` (default: the configured one).
    pub fn prune(&self, retention: Option<Duration>) -> anyhow::Result<u64> {
        let retention = retention.unwrap_or_else(|| self.config.samples.retention());
        let cutoff = epoch_secs().saturating_sub(retention.as_secs());
        let removed = self.store.prune_samples_before(cutoff)?;
        info!(removed, cutoff, "old samples pruned");
        Ok(removed)
    }

    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        Ok(fleet_pass::reconcile(&self.store, self.hosting.as_ref(), &self.retry).await?)
    }

    /// Prune on an interval until `shutdown` flips.
    pub async fn run_pruner(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.prune(None) {
                        warn!(error = %e, "sample pruning failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Load `path` if given, otherwise defaults; env overrides apply either way.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    match path {
        Some(p) => {
            FleetConfig::load(p).with_context(|| format!("load config {}", p.display()))
        }
        None => {
            let mut config = FleetConfig::default();
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
    }
}
