//! Provisioning executor: the only writer of a deployment's live
//! resources and lifecycle status.
//!
//! Every mutating operation takes the deployment's store lease before the
//! first external call and releases it on every exit path, so concurrent
//! callers (a pass, an admin request, another process) get
//! [`ProvisionError::InProgress`] instead of interleaving. Hosting calls go
//! through the shared [`RetryPolicy`]; a failed call never changes stored
//! state beyond the audit records.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use fleet_core::config::ServerTemplate;
use fleet_core::{Tier, TierTable, epoch_secs};
use fleet_hosting::{HostingApi, RetryPolicy, ServerSpec};
use fleet_state::{
    ActionKind, ActionOutcome, ActionRecord, Actor, Deployment, DeploymentStatus, HealthStatus,
    ScalingDirection, ScalingEvent, ScalingOutcome, StateStore,
};

use crate::error::ProvisionError;
use crate::lease::LeaseGuard;
use crate::notify::{Notification, NotificationKind, Notifier, NotifyError};

/// A paid order asking for a new bot deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub order_ref: String,
    pub customer_id: String,
    pub guild_id: String,
    /// Purchased tier; also the floor for automatic scale-down.
    pub tier: Tier,
    /// Server name on the hosting panel.
    #[serde(default)]
    pub name: Option<String>,
}

/// Parameters of an `update_resources` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeRequest {
    pub new_tier: Tier,
    pub actor: Actor,
    pub reason: String,
    /// Tier the caller decided from. If the stored tier differs at execution
    /// time the resize is recorded as skipped.
    pub expected_tier: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResizeResult {
    pub deployment: Deployment,
    pub outcome: ScalingOutcome,
}

pub struct Provisioner {
    store: StateStore,
    hosting: Arc<dyn HostingApi>,
    tiers: TierTable,
    retry: RetryPolicy,
    holder: String,
    lease_ttl_secs: u64,
    template: ServerTemplate,
    notifier: Option<Arc<dyn Notifier>>,
    notify_timeout: Duration,
}

impl Provisioner {
    pub fn new(
        store: StateStore,
        hosting: Arc<dyn HostingApi>,
        tiers: TierTable,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            hosting,
            tiers,
            retry,
            holder: format!("fleetd-{}", uuid::Uuid::new_v4()),
            lease_ttl_secs: 300,
            template: ServerTemplate::default(),
            notifier: None,
            notify_timeout: Duration::from_secs(5),
        }
    }

    /// Name recorded on leases taken by this executor.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl_secs = ttl.as_secs().max(1);
        self
    }

    pub fn with_template(mut self, template: ServerTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Upper bound on one notification; the operation returns once it passes.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Create the hosting server for an order and record the deployment.
    ///
    /// Idempotent per order: an order that already has a non-terminated
    /// deployment gets that deployment back.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<Deployment, ProvisionError> {
        let now = epoch_secs();
        let order_key = format!("order:{}", request.order_ref);
        let _order_guard =
            LeaseGuard::acquire(&self.store, &order_key, &self.holder, self.lease_ttl_secs, now)?;

        if let Some(existing) = self.store.find_by_order_ref(&request.order_ref)? {
            info!(deployment = %existing.id, order = %request.order_ref, "order already provisioned");
            return Ok(existing);
        }

        let limits = self.tiers.limits(request.tier);
        let deployment = Deployment {
            id: uuid::Uuid::new_v4().to_string(),
            order_ref: request.order_ref.clone(),
            customer_id: request.customer_id,
            guild_id: request.guild_id,
            server_id: None,
            tier: request.tier,
            floor_tier: request.tier,
            limits,
            status: DeploymentStatus::Provisioning,
            health: HealthStatus::Unknown,
            consecutive_failures: 0,
            hold_reason: None,
            created_at: now,
            provisioned_at: None,
            updated_at: now,
        };
        let guard = self.lock(&deployment.id)?;
        self.store.put_deployment(&deployment)?;

        let short_id = deployment.id.split('-').next().unwrap_or(&deployment.id);
        let spec = ServerSpec {
            name: request.name.unwrap_or_else(|| format!("bot-{short_id}")),
            external_id: request.order_ref,
            limits,
            template: self.template.clone(),
        };

        match self
            .retry
            .run("create_server", || self.hosting.create_server(&spec))
            .await
        {
            Ok(server_id) => {
                let done = epoch_secs();
                let created = self.store.update_deployment(&deployment.id, |d| {
                    d.server_id = Some(server_id.clone());
                    d.status = DeploymentStatus::Active;
                    d.health = HealthStatus::Healthy;
                    d.provisioned_at = Some(done);
                    d.updated_at = done;
                })?;
                self.log_action(
                    &created.id,
                    ActionKind::Provision,
                    Actor::Admin,
                    ActionOutcome::Succeeded,
                    format!("server {server_id} at {}", created.tier),
                );
                info!(deployment = %created.id, server = %server_id, tier = %created.tier, "deployment provisioned");
                drop(guard);
                Ok(created)
            }
            Err(e) => {
                let failed_at = epoch_secs();
                self.store.update_deployment(&deployment.id, |d| {
                    d.status = DeploymentStatus::Error;
                    d.updated_at = failed_at;
                })?;
                self.log_action(
                    &deployment.id,
                    ActionKind::Provision,
                    Actor::Admin,
                    ActionOutcome::Failed,
                    e.to_string(),
                );
                warn!(deployment = %deployment.id, error = %e, "provisioning failed");
                Err(e.into())
            }
        }
    }

    pub async fn suspend(&self, id: &str, actor: Actor) -> Result<Deployment, ProvisionError> {
        self.set_power(id, actor, DeploymentStatus::Suspended).await
    }

    pub async fn unsuspend(&self, id: &str, actor: Actor) -> Result<Deployment, ProvisionError> {
        self.set_power(id, actor, DeploymentStatus::Active).await
    }

    /// Delete the hosting server and retire the deployment. The row is kept.
    pub async fn terminate(&self, id: &str, actor: Actor) -> Result<Deployment, ProvisionError> {
        let guard = self.lock(id)?;
        let current = self.load(id)?;

        if current.status == DeploymentStatus::Terminated {
            self.log_action(id, ActionKind::Terminate, actor, ActionOutcome::NoOp, "already terminated");
            return Ok(current);
        }

        // A deployment whose creation failed has nothing to delete.
        if let Some(server_id) = current.server_id.as_deref()
            && let Err(e) = self.retry.run("delete", || self.hosting.delete(server_id)).await
        {
            self.log_action(id, ActionKind::Terminate, actor, ActionOutcome::Failed, e.to_string());
            warn!(deployment = %id, error = %e, "terminate failed");
            return Err(e.into());
        }

        let now = epoch_secs();
        let updated = self.store.update_deployment(id, |d| {
            d.status = DeploymentStatus::Terminated;
            d.updated_at = now;
        })?;
        self.log_action(id, ActionKind::Terminate, actor, ActionOutcome::Succeeded, "");
        info!(deployment = %id, actor = ?actor, "deployment terminated");
        drop(guard);

        self.notify(&updated, NotificationKind::Terminated).await;
        Ok(updated)
    }

    /// Move a deployment to another tier.
    ///
    /// On success the new tier, its limits and an `applied` scaling event are
    /// committed together. On hosting failure stored resources are left as
    /// they were and a `failed` event is appended.
    pub async fn update_resources(
        &self,
        id: &str,
        request: ResizeRequest,
    ) -> Result<ResizeResult, ProvisionError> {
        let guard = self.lock(id)?;
        let current = self.load(id)?;

        if !matches!(
            current.status,
            DeploymentStatus::Active | DeploymentStatus::Suspended
        ) {
            return Err(ProvisionError::InvalidTransition {
                id: id.to_string(),
                action: "resize",
                status: current.status,
            });
        }

        let now = epoch_secs();
        let new_limits = self.tiers.limits(request.new_tier);
        let mut event = ScalingEvent {
            deployment_id: id.to_string(),
            decided_at: now,
            direction: direction(current.tier, request.new_tier),
            reason: request.reason.clone(),
            actor: request.actor,
            old_tier: current.tier,
            new_tier: request.new_tier,
            old_resources: current.limits,
            new_resources: new_limits,
            outcome: ScalingOutcome::Skipped,
        };

        if let Some(expected) = request.expected_tier
            && expected != current.tier
        {
            event.reason = format!(
                "{}; tier changed from {expected} to {} before execution",
                request.reason, current.tier
            );
            self.store.append_scaling_event(&event)?;
            self.log_action(id, ActionKind::Resize, request.actor, ActionOutcome::NoOp, &event.reason);
            info!(deployment = %id, expected = %expected, tier = %current.tier, "resize skipped, tier moved");
            return Ok(ResizeResult {
                deployment: current,
                outcome: ScalingOutcome::Skipped,
            });
        }

        if request.new_tier == current.tier {
            self.log_action(
                id,
                ActionKind::Resize,
                request.actor,
                ActionOutcome::NoOp,
                format!("already at {}", current.tier),
            );
            return Ok(ResizeResult {
                deployment: current,
                outcome: ScalingOutcome::Skipped,
            });
        }

        let server_id = current
            .server_id
            .as_deref()
            .ok_or_else(|| ProvisionError::NoServer(id.to_string()))?;

        match self
            .retry
            .run("resize", || self.hosting.resize(server_id, &new_limits))
            .await
        {
            Ok(()) => {
                event.outcome = ScalingOutcome::Applied;
                let updated = self.store.apply_resize(&event, epoch_secs()).inspect_err(|e| {
                    error!(deployment = %id, tier = %request.new_tier, error = %e, "resize applied on hosting but not recorded");
                })?;
                self.log_action(
                    id,
                    ActionKind::Resize,
                    request.actor,
                    ActionOutcome::Succeeded,
                    format!("{} -> {}", current.tier, request.new_tier),
                );
                info!(
                    deployment = %id,
                    from = %current.tier,
                    to = %request.new_tier,
                    actor = ?request.actor,
                    reason = %request.reason,
                    "resize applied"
                );
                drop(guard);

                self.notify(
                    &updated,
                    NotificationKind::Resized {
                        from: current.tier,
                        to: request.new_tier,
                    },
                )
                .await;
                Ok(ResizeResult {
                    deployment: updated,
                    outcome: ScalingOutcome::Applied,
                })
            }
            Err(e) => {
                event.outcome = ScalingOutcome::Failed;
                self.store.append_scaling_event(&event)?;
                self.log_action(id, ActionKind::Resize, request.actor, ActionOutcome::Failed, e.to_string());
                warn!(deployment = %id, to = %request.new_tier, error = %e, "resize failed");
                Err(e.into())
            }
        }
    }

    /// Flag a deployment for operator attention; passes skip it until released.
    pub fn hold(&self, id: &str, reason: &str) -> Result<Deployment, ProvisionError> {
        let _guard = self.lock(id)?;
        self.load(id)?;
        let now = epoch_secs();
        let held = self.store.update_deployment(id, |d| {
            d.hold_reason = Some(reason.to_string());
            d.updated_at = now;
        })?;
        self.log_action(id, ActionKind::Hold, Actor::Autoscaler, ActionOutcome::Succeeded, reason);
        warn!(deployment = %id, reason, "deployment held for operator");
        Ok(held)
    }

    pub fn release_hold(&self, id: &str) -> Result<Deployment, ProvisionError> {
        let _guard = self.lock(id)?;
        let current = self.load(id)?;
        if current.hold_reason.is_none() {
            self.log_action(id, ActionKind::ReleaseHold, Actor::Admin, ActionOutcome::NoOp, "not held");
            return Ok(current);
        }
        let now = epoch_secs();
        let released = self.store.update_deployment(id, |d| {
            d.hold_reason = None;
            d.consecutive_failures = 0;
            d.updated_at = now;
        })?;
        self.log_action(id, ActionKind::ReleaseHold, Actor::Admin, ActionOutcome::Succeeded, "");
        info!(deployment = %id, "operator hold released");
        Ok(released)
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn set_power(
        &self,
        id: &str,
        actor: Actor,
        target: DeploymentStatus,
    ) -> Result<Deployment, ProvisionError> {
        let (kind, verb, notice) = match target {
            DeploymentStatus::Suspended => {
                (ActionKind::Suspend, "suspend", NotificationKind::Suspended)
            }
            _ => (ActionKind::Unsuspend, "unsuspend", NotificationKind::Unsuspended),
        };

        let guard = self.lock(id)?;
        let current = self.load(id)?;

        if current.status == target {
            self.log_action(id, kind, actor, ActionOutcome::NoOp, format!("already {target}"));
            return Ok(current);
        }
        if !current.status.can_transition_to(target) {
            return Err(ProvisionError::InvalidTransition {
                id: id.to_string(),
                action: verb,
                status: current.status,
            });
        }
        let server_id = current
            .server_id
            .as_deref()
            .ok_or_else(|| ProvisionError::NoServer(id.to_string()))?;

        let result = match target {
            DeploymentStatus::Suspended => {
                self.retry.run(verb, || self.hosting.suspend(server_id)).await
            }
            _ => self.retry.run(verb, || self.hosting.unsuspend(server_id)).await,
        };
        if let Err(e) = result {
            self.log_action(id, kind, actor, ActionOutcome::Failed, e.to_string());
            warn!(deployment = %id, action = verb, error = %e, "power change failed");
            return Err(e.into());
        }

        let now = epoch_secs();
        let updated = self.store.update_deployment(id, |d| {
            d.status = target;
            d.updated_at = now;
        })?;
        self.log_action(id, kind, actor, ActionOutcome::Succeeded, "");
        info!(deployment = %id, status = %target, actor = ?actor, "deployment status changed");
        drop(guard);

        self.notify(&updated, notice).await;
        Ok(updated)
    }

    fn lock(&self, id: &str) -> Result<LeaseGuard, ProvisionError> {
        LeaseGuard::acquire(&self.store, id, &self.holder, self.lease_ttl_secs, epoch_secs())
    }

    fn load(&self, id: &str) -> Result<Deployment, ProvisionError> {
        self.store
            .get_deployment(id)?
            .ok_or_else(|| ProvisionError::NotFound(id.to_string()))
    }

    /// Append to the action log. The log is an audit aid; a failed write is
    /// reported but does not fail the operation it describes.
    fn log_action(
        &self,
        id: &str,
        action: ActionKind,
        actor: Actor,
        outcome: ActionOutcome,
        detail: impl Into<String>,
    ) {
        let record = ActionRecord {
            deployment_id: id.to_string(),
            at: epoch_secs(),
            action,
            actor,
            outcome,
            detail: detail.into(),
        };
        if let Err(e) = self.store.append_action(&record) {
            warn!(deployment = %id, error = %e, "failed to append action log");
        }
    }

    async fn notify(&self, deployment: &Deployment, kind: NotificationKind) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification = Notification {
            deployment_id: deployment.id.clone(),
            customer_id: deployment.customer_id.clone(),
            guild_id: deployment.guild_id.clone(),
            kind,
        };
        let sent = tokio::time::timeout(self.notify_timeout, notifier.notify(&notification))
            .await
            .unwrap_or(Err(NotifyError::Timeout(self.notify_timeout)));
        if let Err(e) = sent {
            warn!(deployment = %deployment.id, error = %e, "customer notification failed");
        }
    }
}

fn direction(from: Tier, to: Tier) -> ScalingDirection {
    match to.cmp(&from) {
        std::cmp::Ordering::Greater => ScalingDirection::Up,
        std::cmp::Ordering::Less => ScalingDirection::Down,
        std::cmp::Ordering::Equal => ScalingDirection::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fleet_core::RawUsage;
    use fleet_hosting::HostingError;
    use fleet_hosting::memory::{ANY_SERVER, InMemoryHosting, Op};

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::Status(500))
        }
    }

    struct HangingNotifier;

    #[async_trait]
    impl Notifier for HangingNotifier {
        async fn notify(&self, _: &Notification) -> Result<(), NotifyError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        store: StateStore,
        hosting: Arc<InMemoryHosting>,
        notifier: Arc<RecordingNotifier>,
        provisioner: Provisioner,
    }

    fn fixture() -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        let hosting = Arc::new(InMemoryHosting::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let provisioner = Provisioner::new(
            store.clone(),
            hosting.clone(),
            TierTable::default(),
            RetryPolicy::immediate(3),
        )
        .with_holder("test")
        .with_notifier(notifier.clone());
        Fixture {
            store,
            hosting,
            notifier,
            provisioner,
        }
    }

    /// An active deployment at `tier` backed by a fake server.
    fn active(f: &Fixture, id: &str, tier: Tier) -> Deployment {
        let limits = TierTable::default().limits(tier);
        let server_id = format!("srv-{id}");
        f.hosting.add_server(&server_id, limits, RawUsage::default());
        let d = Deployment {
            id: id.into(),
            order_ref: format!("order-{id}"),
            customer_id: "cust".into(),
            guild_id: "guild".into(),
            server_id: Some(server_id),
            tier,
            floor_tier: Tier::Starter,
            limits,
            status: DeploymentStatus::Active,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            hold_reason: None,
            created_at: 1,
            provisioned_at: Some(1),
            updated_at: 1,
        };
        f.store.put_deployment(&d).unwrap();
        d
    }

    fn resize_to(tier: Tier) -> ResizeRequest {
        ResizeRequest {
            new_tier: tier,
            actor: Actor::Admin,
            reason: "test".into(),
            expected_tier: None,
        }
    }

    fn order(order_ref: &str) -> ProvisionRequest {
        ProvisionRequest {
            order_ref: order_ref.into(),
            customer_id: "cust".into(),
            guild_id: "guild".into(),
            tier: Tier::Pro,
            name: None,
        }
    }

    // ── Provision ──────────────────────────────────────────────────

    #[tokio::test]
    async fn provision_creates_active_deployment_at_floor() {
        let f = fixture();
        let d = f.provisioner.provision(order("o-1")).await.unwrap();

        assert_eq!(d.status, DeploymentStatus::Active);
        assert_eq!(d.tier, Tier::Pro);
        assert_eq!(d.floor_tier, Tier::Pro);
        assert_eq!(d.limits, TierTable::default().limits(Tier::Pro));
        assert!(d.provisioned_at.is_some());

        let server = f.hosting.server(d.server_id.as_deref().unwrap()).unwrap();
        assert_eq!(server.limits, d.limits);
        assert_eq!(server.external_id, "o-1");

        let actions = f.store.list_actions(&d.id, 10).unwrap();
        assert_eq!(actions[0].action, ActionKind::Provision);
        assert_eq!(actions[0].outcome, ActionOutcome::Succeeded);
        // Leases are released.
        assert!(f.store.get_lease(&d.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn provision_is_idempotent_per_order() {
        let f = fixture();
        let first = f.provisioner.provision(order("o-1")).await.unwrap();
        let second = f.provisioner.provision(order("o-1")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(f.hosting.calls(Op::Create), 1);
    }

    #[tokio::test]
    async fn provision_failure_marks_error() {
        let f = fixture();
        f.hosting.inject_fault(
            ANY_SERVER,
            Some(Op::Create),
            HostingError::Unauthorized { status: 403 },
            None,
        );

        let err = f.provisioner.provision(order("o-1")).await.unwrap_err();
        assert!(err.is_permanent());

        let stored = f.store.find_by_order_ref("o-1").unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Error);
        assert!(stored.server_id.is_none());
    }

    // ── Suspend / unsuspend ────────────────────────────────────────

    #[tokio::test]
    async fn suspend_and_unsuspend_toggle() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);

        let d = f.provisioner.suspend("d1", Actor::Admin).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Suspended);
        assert!(f.hosting.server("srv-d1").unwrap().suspended);

        let d = f.provisioner.unsuspend("d1", Actor::Admin).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Active);
        assert!(!f.hosting.server("srv-d1").unwrap().suspended);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, NotificationKind::Suspended);
    }

    #[tokio::test]
    async fn suspend_when_already_suspended_is_noop() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);

        f.provisioner.suspend("d1", Actor::Admin).await.unwrap();
        let d = f.provisioner.suspend("d1", Actor::Admin).await.unwrap();

        assert_eq!(d.status, DeploymentStatus::Suspended);
        assert_eq!(f.hosting.calls(Op::Suspend), 1);
        let actions = f.store.list_actions("d1", 1).unwrap();
        assert_eq!(actions[0].outcome, ActionOutcome::NoOp);
    }

    #[tokio::test]
    async fn suspend_rejects_invalid_transition() {
        let f = fixture();
        let mut d = active(&f, "d1", Tier::Starter);
        d.status = DeploymentStatus::Terminated;
        f.store.put_deployment(&d).unwrap();

        let err = f.provisioner.suspend("d1", Actor::Admin).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidTransition { .. }));
        assert_eq!(f.hosting.calls(Op::Suspend), 0);
    }

    #[tokio::test]
    async fn unknown_deployment_is_not_found() {
        let f = fixture();
        let err = f.provisioner.terminate("ghost", Actor::Admin).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    // ── Mutual exclusion ───────────────────────────────────────────

    #[tokio::test]
    async fn held_lease_rejects_operations() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        f.store
            .try_acquire_lease("d1", "someone-else", 60, epoch_secs())
            .unwrap()
            .unwrap();

        let err = f.provisioner.suspend("d1", Actor::Admin).await.unwrap_err();
        assert!(matches!(err, ProvisionError::InProgress(_)));
        let err = f
            .provisioner
            .update_resources("d1", resize_to(Tier::Pro))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::InProgress(_)));
        assert_eq!(f.hosting.calls(Op::Suspend), 0);
        assert_eq!(f.hosting.calls(Op::Resize), 0);
    }

    #[tokio::test]
    async fn concurrent_resizes_do_not_overlap() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        f.hosting.set_latency(Duration::from_millis(50));

        let (a, b) = tokio::join!(
            f.provisioner.update_resources("d1", resize_to(Tier::Pro)),
            f.provisioner.update_resources("d1", resize_to(Tier::Pro)),
        );

        let results = [a, b];
        let applied = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(ProvisionError::InProgress(_))))
            .count();
        assert_eq!((applied, busy), (1, 1));
        assert_eq!(f.hosting.calls(Op::Resize), 1);
        assert_eq!(f.store.list_scaling_events("d1", 10).unwrap().len(), 1);
    }

    // ── Resize ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn resize_applies_tier_limits() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);

        let result = f
            .provisioner
            .update_resources("d1", resize_to(Tier::Pro))
            .await
            .unwrap();
        assert_eq!(result.outcome, ScalingOutcome::Applied);

        let pro = TierTable::default().limits(Tier::Pro);
        let stored = f.store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Pro);
        assert_eq!(stored.limits, pro);
        assert_eq!(f.hosting.server("srv-d1").unwrap().limits, pro);

        let event = f.store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(event.outcome, ScalingOutcome::Applied);
        assert_eq!(event.direction, ScalingDirection::Up);
        assert_eq!(event.old_tier, Tier::Starter);
        assert_eq!(event.new_resources, pro);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(
            sent[0].kind,
            NotificationKind::Resized {
                from: Tier::Starter,
                to: Tier::Pro
            }
        );
    }

    #[tokio::test]
    async fn resize_down_steps_to_lower_tier_limits() {
        let f = fixture();
        active(&f, "d1", Tier::Business);

        let request = ResizeRequest {
            new_tier: Tier::Pro,
            actor: Actor::Autoscaler,
            reason: "idle".into(),
            expected_tier: Some(Tier::Business),
        };
        let result = f.provisioner.update_resources("d1", request).await.unwrap();
        assert_eq!(result.outcome, ScalingOutcome::Applied);
        assert_eq!(result.deployment.tier, Tier::Pro);

        let table = TierTable::default();
        let pro = table.limits(Tier::Pro);
        assert_eq!(f.store.get_deployment("d1").unwrap().unwrap().limits, pro);
        assert_eq!(f.hosting.server("srv-d1").unwrap().limits, pro);

        let event = f.store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(event.direction, ScalingDirection::Down);
        assert_eq!(event.actor, Actor::Autoscaler);
        assert_eq!(event.old_resources, table.limits(Tier::Business));
        assert_eq!(event.new_resources, pro);

        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(
            sent[0].kind,
            NotificationKind::Resized {
                from: Tier::Business,
                to: Tier::Pro
            }
        );
    }

    #[tokio::test]
    async fn permanent_resize_failure_leaves_limits_untouched() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        let before = serde_json::to_vec(&f.store.get_deployment("d1").unwrap().unwrap()).unwrap();
        f.hosting.inject_fault(
            "srv-d1",
            Some(Op::Resize),
            HostingError::NotFound("srv-d1".into()),
            None,
        );

        let err = f
            .provisioner
            .update_resources("d1", resize_to(Tier::Pro))
            .await
            .unwrap_err();
        assert!(err.is_permanent());
        // Permanent errors are not retried.
        assert_eq!(f.hosting.calls(Op::Resize), 1);

        let after = serde_json::to_vec(&f.store.get_deployment("d1").unwrap().unwrap()).unwrap();
        assert_eq!(before, after);

        let event = f.store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(event.outcome, ScalingOutcome::Failed);
        assert!(f.notifier.sent.lock().unwrap().is_empty());
        assert!(f.store.get_lease("d1").unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_resize_failure_is_retried() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        f.hosting.inject_fault(
            "srv-d1",
            Some(Op::Resize),
            HostingError::from_status(503, "srv-d1", String::new()),
            Some(2),
        );

        let result = f
            .provisioner
            .update_resources("d1", resize_to(Tier::Pro))
            .await
            .unwrap();
        assert_eq!(result.outcome, ScalingOutcome::Applied);
        assert_eq!(f.hosting.calls(Op::Resize), 3);
    }

    #[tokio::test]
    async fn resize_skips_when_tier_moved() {
        let f = fixture();
        active(&f, "d1", Tier::Pro);

        let request = ResizeRequest {
            expected_tier: Some(Tier::Starter),
            ..resize_to(Tier::Pro)
        };
        let result = f.provisioner.update_resources("d1", request).await.unwrap();

        assert_eq!(result.outcome, ScalingOutcome::Skipped);
        assert_eq!(f.hosting.calls(Op::Resize), 0);
        let event = f.store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(event.outcome, ScalingOutcome::Skipped);
    }

    #[tokio::test]
    async fn resize_to_current_tier_is_noop() {
        let f = fixture();
        active(&f, "d1", Tier::Pro);

        let result = f
            .provisioner
            .update_resources("d1", resize_to(Tier::Pro))
            .await
            .unwrap();
        assert_eq!(result.outcome, ScalingOutcome::Skipped);
        assert!(f.store.latest_scaling_event("d1").unwrap().is_none());
    }

    #[tokio::test]
    async fn notification_failure_is_swallowed() {
        let f = fixture();
        let provisioner = Provisioner::new(
            f.store.clone(),
            f.hosting.clone(),
            TierTable::default(),
            RetryPolicy::immediate(1),
        )
        .with_notifier(Arc::new(FailingNotifier));
        active(&f, "d1", Tier::Starter);

        let result = provisioner.update_resources("d1", resize_to(Tier::Pro)).await;
        assert_eq!(result.unwrap().outcome, ScalingOutcome::Applied);
    }

    #[tokio::test]
    async fn hanging_notifier_does_not_block_resize() {
        let f = fixture();
        let provisioner = Provisioner::new(
            f.store.clone(),
            f.hosting.clone(),
            TierTable::default(),
            RetryPolicy::immediate(1),
        )
        .with_notifier(Arc::new(HangingNotifier))
        .with_notify_timeout(Duration::from_millis(50));
        active(&f, "d1", Tier::Starter);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            provisioner.update_resources("d1", resize_to(Tier::Pro)),
        )
        .await
        .expect("resize returned while the webhook hung");
        assert_eq!(result.unwrap().outcome, ScalingOutcome::Applied);
        assert_eq!(f.store.get_deployment("d1").unwrap().unwrap().tier, Tier::Pro);
    }

    // ── Terminate / hold ───────────────────────────────────────────

    #[tokio::test]
    async fn terminate_retains_row() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);

        let d = f.provisioner.terminate("d1", Actor::Admin).await.unwrap();
        assert_eq!(d.status, DeploymentStatus::Terminated);
        assert!(f.hosting.server("srv-d1").is_none());
        assert!(f.store.get_deployment("d1").unwrap().is_some());

        let again = f.provisioner.terminate("d1", Actor::Admin).await.unwrap();
        assert_eq!(again.status, DeploymentStatus::Terminated);
        assert_eq!(f.hosting.calls(Op::Delete), 1);
    }

    #[tokio::test]
    async fn terminate_failure_keeps_status() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        f.hosting.inject_fault(
            "srv-d1",
            Some(Op::Delete),
            HostingError::Unauthorized { status: 401 },
            None,
        );

        assert!(f.provisioner.terminate("d1", Actor::Admin).await.is_err());
        let stored = f.store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(stored.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn hold_and_release() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);

        let held = f.provisioner.hold("d1", "unknown server").unwrap();
        assert_eq!(held.hold_reason.as_deref(), Some("unknown server"));

        let released = f.provisioner.release_hold("d1").unwrap();
        assert!(released.hold_reason.is_none());
        assert!(matches!(
            f.provisioner.release_hold("ghost"),
            Err(ProvisionError::NotFound(_))
        ));

        let kinds: Vec<ActionKind> = f
            .store
            .list_actions("d1", 10)
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(kinds, vec![ActionKind::ReleaseHold, ActionKind::Hold]);
    }

    #[tokio::test]
    async fn hold_changes_wait_for_the_lease() {
        let f = fixture();
        active(&f, "d1", Tier::Starter);
        f.provisioner.hold("d1", "unknown server").unwrap();
        let lease = f
            .store
            .try_acquire_lease("d1", "someone-else", 60, epoch_secs())
            .unwrap()
            .unwrap();

        assert!(matches!(
            f.provisioner.release_hold("d1"),
            Err(ProvisionError::InProgress(_))
        ));
        assert!(matches!(
            f.provisioner.hold("d1", "again"),
            Err(ProvisionError::InProgress(_))
        ));
        let stored = f.store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(stored.hold_reason.as_deref(), Some("unknown server"));

        f.store.release_lease("d1", &lease.token).unwrap();
        assert!(f.provisioner.release_hold("d1").unwrap().hold_reason.is_none());
    }
}
