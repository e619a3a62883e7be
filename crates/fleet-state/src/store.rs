//! StateStore: redb-backed persistence for the bot fleet.
//!
//! Provides typed operations over deployments, their append-only history
//! (samples, scaling events, action log), and per-deployment leases. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).
//!
//! redb serializes write transactions, so every read-modify-write below
//! that happens inside one write transaction is atomic with respect to
//! every other user of the same database.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SAMPLES).map_err(map_err!(Table))?;
        txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        txn.open_table(ACTIONS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        put_json(&txn, DEPLOYMENTS, &deployment.id, deployment)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment.id, status = %deployment.status, "deployment stored");
        Ok(())
    }

    /// Get a deployment by id.
    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all deployments.
    pub fn list_deployments(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// List deployments in the given lifecycle status.
    pub fn list_deployments_by_status(
        &self,
        status: DeploymentStatus,
    ) -> StateResult<Vec<Deployment>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    /// Find the live (non-terminated) deployment created for an order.
    pub fn find_by_order_ref(&self, order_ref: &str) -> StateResult<Option<Deployment>> {
        Ok(self
            .list_deployments()?
            .into_iter()
            .find(|d| d.order_ref == order_ref && !d.status.is_terminal()))
    }

    /// Atomically read, modify and write back one deployment.
    ///
    /// Returns the updated record. `updated_at` is left to the caller.
    pub fn update_deployment<F>(&self, id: &str, f: F) -> StateResult<Deployment>
    where
        F: FnOnce(&mut Deployment),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deployment: Deployment = get_json(&txn, DEPLOYMENTS, id)?
            .ok_or_else(|| StateError::DeploymentNotFound(id.to_string()))?;
        f(&mut deployment);
        put_json(&txn, DEPLOYMENTS, id, &deployment)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(deployment)
    }

    /// Record an applied resize: the new tier/limits and the scaling event
    /// land in one transaction, so neither is visible without the other.
    /// Fails with [`StateError::TierConflict`] if the stored tier is no
    /// longer the event's `old_tier`.
    pub fn apply_resize(
        &self,
        event: &ScalingEvent,
        updated_at: u64,
    ) -> StateResult<Deployment> {
        let id = event.deployment_id.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deployment: Deployment = get_json(&txn, DEPLOYMENTS, id)?
            .ok_or_else(|| StateError::DeploymentNotFound(id.to_string()))?;
        if deployment.tier != event.old_tier {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::TierConflict {
                id: id.to_string(),
                expected: event.old_tier,
                found: deployment.tier,
            });
        }
        deployment.tier = event.new_tier;
        deployment.limits = event.new_resources;
        deployment.updated_at = updated_at;
        put_json(&txn, DEPLOYMENTS, id, &deployment)?;
        append_history(&txn, SCALING_EVENTS, id, event.decided_at, event)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %id, tier = %deployment.tier, "resize persisted");
        Ok(deployment)
    }

    // ── Samples ────────────────────────────────────────────────────

    /// Append a resource sample.
    pub fn append_sample(&self, sample: &ResourceSample) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        append_history(&txn, SAMPLES, &sample.deployment_id, sample.sampled_at, sample)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recent `limit` samples for a deployment, newest first.
    pub fn list_recent_samples(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> StateResult<Vec<ResourceSample>> {
        self.list_history(SAMPLES, deployment_id, limit)
    }

    /// Delete samples older than `cutoff` (unix seconds). Returns the number removed.
    pub fn prune_samples_before(&self, cutoff: u64) -> StateResult<u64> {
        // Collect keys in a read transaction first.
        let keys: Vec<String> = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            let mut keys = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let sample: ResourceSample = decode(value.value())?;
                if sample.sampled_at < cutoff {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };
        // Delete in a write transaction.
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(SAMPLES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(removed = keys.len(), cutoff, "samples pruned");
        Ok(keys.len() as u64)
    }

    // ── Scaling events ─────────────────────────────────────────────

    /// Append a scaling event without touching the deployment.
    pub fn append_scaling_event(&self, event: &ScalingEvent) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        append_history(&txn, SCALING_EVENTS, &event.deployment_id, event.decided_at, event)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recent `limit` scaling events for a deployment, newest first.
    pub fn list_scaling_events(
        &self,
        deployment_id: &str,
        limit: usize,
    ) -> StateResult<Vec<ScalingEvent>> {
        self.list_history(SCALING_EVENTS, deployment_id, limit)
    }

    /// The latest scaling event for a deployment, if any.
    pub fn latest_scaling_event(&self, deployment_id: &str) -> StateResult<Option<ScalingEvent>> {
        Ok(self.list_scaling_events(deployment_id, 1)?.into_iter().next())
    }

    /// The latest scaling event that actually changed the deployment's tier.
    pub fn latest_applied_scaling_event(
        &self,
        deployment_id: &str,
    ) -> StateResult<Option<ScalingEvent>> {
        let (start, end) = history_range(deployment_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SCALING_EVENTS).map_err(map_err!(Table))?;
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let event: ScalingEvent = decode(value.value())?;
            if event.outcome == ScalingOutcome::Applied {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    // ── Action log ─────────────────────────────────────────────────

    pub fn append_action(&self, record: &ActionRecord) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        append_history(&txn, ACTIONS, &record.deployment_id, record.at, record)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// The most recent `limit` actions for a deployment, newest first.
    pub fn list_actions(&self, deployment_id: &str, limit: usize) -> StateResult<Vec<ActionRecord>> {
        self.list_history(ACTIONS, deployment_id, limit)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Try to take the exclusive lease on a deployment.
    ///
    /// Succeeds if no lease exists or the existing one expired before `now`.
    /// Returns `None` while another holder's lease is live.
    pub fn try_acquire_lease(
        &self,
        deployment_id: &str,
        holder: &str,
        ttl_secs: u64,
        now: u64,
    ) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing: Option<Lease> = get_json(&txn, LEASES, deployment_id)?;
        if let Some(current) = existing.filter(|l| l.expires_at > now) {
            txn.abort().map_err(map_err!(Transaction))?;
            debug!(deployment = %deployment_id, holder = %current.holder, "lease busy");
            return Ok(None);
        }

        let lease = Lease {
            deployment_id: deployment_id.to_string(),
            holder: holder.to_string(),
            token: uuid::Uuid::new_v4().to_string(),
            acquired_at: now,
            expires_at: now.saturating_add(ttl_secs),
        };
        put_json(&txn, LEASES, deployment_id, &lease)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment_id, %holder, "lease acquired");
        Ok(Some(lease))
    }

    /// Release a lease. Only the holder of `token` can release it; returns
    /// whether a lease was removed.
    pub fn release_lease(&self, deployment_id: &str, token: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existing: Option<Lease> = get_json(&txn, LEASES, deployment_id)?;
        let released = match existing {
            Some(lease) if lease.token == token => {
                let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
                table.remove(deployment_id).map_err(map_err!(Write))?;
                true
            }
            _ => false,
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment = %deployment_id, released, "lease released");
        Ok(released)
    }

    /// Current lease on a deployment, expired or not.
    pub fn get_lease(&self, deployment_id: &str) -> StateResult<Option<Lease>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(deployment_id).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn list_history<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        deployment_id: &str,
        limit: usize,
    ) -> StateResult<Vec<T>> {
        let (start, end) = history_range(deployment_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
            .rev()
            .take(limit)
        {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Corrupt))
}

fn get_json<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table_def: JsonTable,
    key: &str,
) -> StateResult<Option<T>> {
    let table = txn.open_table(table_def).map_err(map_err!(Table))?;
    let value = match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Some(decode(guard.value())?),
        None => None,
    };
    Ok(value)
}

fn put_json<T: Serialize>(
    txn: &WriteTransaction,
    table_def: JsonTable,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
    let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Append a row to a history table, disambiguating rows that share a
/// timestamp with a per-second sequence number.
fn append_history<T: Serialize>(
    txn: &WriteTransaction,
    table_def: JsonTable,
    deployment_id: &str,
    timestamp: u64,
    value: &T,
) -> StateResult<()> {
    let second_start = history_key(deployment_id, timestamp, 0);
    let second_end = history_key(deployment_id, timestamp.saturating_add(1), 0);
    let seq = {
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        table
            .range(second_start.as_str()..second_end.as_str())
            .map_err(map_err!(Read))?
            .count() as u32
    };
    put_json(txn, table_def, &history_key(deployment_id, timestamp, seq), value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{RawUsage, Tier, TierTable, Utilization};

    fn test_deployment(id: &str, status: DeploymentStatus) -> Deployment {
        Deployment {
            id: id.to_string(),
            order_ref: format!("order-{id}"),
            customer_id: "cust-1".to_string(),
            guild_id: "guild-1".to_string(),
            server_id: Some(format!("srv-{id}")),
            tier: Tier::Starter,
            floor_tier: Tier::Starter,
            limits: TierTable::default().limits(Tier::Starter),
            status,
            health: HealthStatus::Healthy,
            consecutive_failures: 0,
            hold_reason: None,
            created_at: 1000,
            provisioned_at: Some(1000),
            updated_at: 1000,
        }
    }

    fn test_sample(id: &str, at: u64, memory_pct: f64) -> ResourceSample {
        ResourceSample {
            deployment_id: id.to_string(),
            sampled_at: at,
            utilization: Utilization {
                memory_pct,
                cpu_pct: 10.0,
                disk_pct: 10.0,
            },
            usage: RawUsage::default(),
        }
    }

    fn test_event(id: &str, at: u64, outcome: ScalingOutcome) -> ScalingEvent {
        let table = TierTable::default();
        ScalingEvent {
            deployment_id: id.to_string(),
            decided_at: at,
            direction: ScalingDirection::Up,
            reason: "test".to_string(),
            actor: Actor::Autoscaler,
            old_tier: Tier::Starter,
            new_tier: Tier::Pro,
            old_resources: table.limits(Tier::Starter),
            new_resources: table.limits(Tier::Pro),
            outcome,
        }
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deployment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let d = test_deployment("d1", DeploymentStatus::Active);

        store.put_deployment(&d).unwrap();
        assert_eq!(store.get_deployment("d1").unwrap(), Some(d));
        assert!(store.get_deployment("nope").unwrap().is_none());
    }

    #[test]
    fn deployment_list_by_status() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("a", DeploymentStatus::Active)).unwrap();
        store.put_deployment(&test_deployment("b", DeploymentStatus::Active)).unwrap();
        store.put_deployment(&test_deployment("c", DeploymentStatus::Suspended)).unwrap();

        assert_eq!(store.list_deployments().unwrap().len(), 3);
        assert_eq!(
            store.list_deployments_by_status(DeploymentStatus::Active).unwrap().len(),
            2
        );
        assert_eq!(
            store.list_deployments_by_status(DeploymentStatus::Terminated).unwrap().len(),
            0
        );
    }

    #[test]
    fn find_by_order_ref_ignores_terminated() {
        let store = StateStore::open_in_memory().unwrap();
        let mut old = test_deployment("old", DeploymentStatus::Terminated);
        old.order_ref = "order-x".to_string();
        store.put_deployment(&old).unwrap();
        assert!(store.find_by_order_ref("order-x").unwrap().is_none());

        let mut live = test_deployment("new", DeploymentStatus::Active);
        live.order_ref = "order-x".to_string();
        store.put_deployment(&live).unwrap();
        assert_eq!(store.find_by_order_ref("order-x").unwrap().unwrap().id, "new");
    }

    #[test]
    fn update_deployment_in_place() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("d1", DeploymentStatus::Active)).unwrap();

        let updated = store
            .update_deployment("d1", |d| {
                d.consecutive_failures += 1;
                d.health = HealthStatus::Unknown;
            })
            .unwrap();
        assert_eq!(updated.consecutive_failures, 1);

        let stored = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(stored.health, HealthStatus::Unknown);
    }

    #[test]
    fn update_missing_deployment_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.update_deployment("ghost", |_| {}).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn apply_resize_writes_deployment_and_event() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("d1", DeploymentStatus::Active)).unwrap();

        let updated = store
            .apply_resize(&test_event("d1", 2000, ScalingOutcome::Applied), 2000)
            .unwrap();
        assert_eq!(updated.limits, TierTable::default().limits(Tier::Pro));

        let stored = store.get_deployment("d1").unwrap().unwrap();
        assert_eq!(stored.tier, Tier::Pro);
        assert_eq!(stored.updated_at, 2000);
        let latest = store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(latest.outcome, ScalingOutcome::Applied);

        let missing = store.apply_resize(&test_event("ghost", 2000, ScalingOutcome::Applied), 2000);
        assert!(matches!(missing, Err(StateError::DeploymentNotFound(_))));
        assert!(store.list_scaling_events("ghost", 1).unwrap().is_empty());
    }

    #[test]
    fn apply_resize_rejects_a_moved_tier() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_deployment(&test_deployment("d1", DeploymentStatus::Active)).unwrap();
        store
            .apply_resize(&test_event("d1", 2000, ScalingOutcome::Applied), 2000)
            .unwrap();

        // Second starter -> pro resize: the deployment is already at pro.
        let err = store
            .apply_resize(&test_event("d1", 2100, ScalingOutcome::Applied), 2100)
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::TierConflict {
                expected: Tier::Starter,
                found: Tier::Pro,
                ..
            }
        ));
        assert_eq!(store.list_scaling_events("d1", 10).unwrap().len(), 1);
        assert_eq!(store.get_deployment("d1").unwrap().unwrap().updated_at, 2000);
    }

    // ── History ────────────────────────────────────────────────────

    #[test]
    fn samples_come_back_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        for (at, pct) in [(1000, 10.0), (1060, 20.0), (1120, 30.0)] {
            store.append_sample(&test_sample("d1", at, pct)).unwrap();
        }
        store.append_sample(&test_sample("d2", 1200, 99.0)).unwrap();

        let recent = store.list_recent_samples("d1", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].sampled_at, 1120);
        assert_eq!(recent[1].sampled_at, 1060);

        assert_eq!(store.list_recent_samples("d1", 10).unwrap().len(), 3);
        assert_eq!(store.list_recent_samples("d2", 10).unwrap().len(), 1);
    }

    #[test]
    fn samples_sharing_a_timestamp_are_all_kept() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_sample(&test_sample("d1", 1000, 10.0)).unwrap();
        store.append_sample(&test_sample("d1", 1000, 20.0)).unwrap();

        let recent = store.list_recent_samples("d1", 10).unwrap();
        assert_eq!(recent.len(), 2);
        // Later append wins the "newest" slot.
        assert_eq!(recent[0].utilization.memory_pct, 20.0);
    }

    #[test]
    fn prune_removes_only_old_samples() {
        let store = StateStore::open_in_memory().unwrap();
        for at in [100, 200, 300, 400] {
            store.append_sample(&test_sample("d1", at, 50.0)).unwrap();
        }
        store.append_scaling_event(&test_event("d1", 100, ScalingOutcome::Applied)).unwrap();

        assert_eq!(store.prune_samples_before(300).unwrap(), 2);
        let left = store.list_recent_samples("d1", 10).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|s| s.sampled_at >= 300));
        // Events are never pruned.
        assert_eq!(store.list_scaling_events("d1", 10).unwrap().len(), 1);
    }

    #[test]
    fn latest_scaling_event_is_newest() {
        let store = StateStore::open_in_memory().unwrap();
        store.append_scaling_event(&test_event("d1", 1000, ScalingOutcome::Failed)).unwrap();
        store.append_scaling_event(&test_event("d1", 2000, ScalingOutcome::Applied)).unwrap();

        let latest = store.latest_scaling_event("d1").unwrap().unwrap();
        assert_eq!(latest.decided_at, 2000);
        assert!(store.latest_scaling_event("d2").unwrap().is_none());

        store.append_scaling_event(&test_event("d1", 3000, ScalingOutcome::Skipped)).unwrap();
        let applied = store.latest_applied_scaling_event("d1").unwrap().unwrap();
        assert_eq!(applied.decided_at, 2000);
    }

    #[test]
    fn action_log_appends() {
        let store = StateStore::open_in_memory().unwrap();
        for (at, outcome) in [(10, ActionOutcome::Succeeded), (20, ActionOutcome::NoOp)] {
            store
                .append_action(&ActionRecord {
                    deployment_id: "d1".to_string(),
                    at,
                    action: ActionKind::Suspend,
                    actor: Actor::Admin,
                    outcome,
                    detail: String::new(),
                })
                .unwrap();
        }
        let actions = store.list_actions("d1", 10).unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].outcome, ActionOutcome::NoOp);
    }

    // ── Leases ─────────────────────────────────────────────────────

    #[test]
    fn lease_is_exclusive_until_released() {
        let store = StateStore::open_in_memory().unwrap();

        let lease = store.try_acquire_lease("d1", "worker-a", 60, 1000).unwrap().unwrap();
        assert!(store.try_acquire_lease("d1", "worker-b", 60, 1001).unwrap().is_none());
        // Other deployments are independent.
        assert!(store.try_acquire_lease("d2", "worker-b", 60, 1001).unwrap().is_some());

        assert!(store.release_lease("d1", &lease.token).unwrap());
        assert!(store.try_acquire_lease("d1", "worker-b", 60, 1002).unwrap().is_some());
    }

    #[test]
    fn lease_release_requires_token() {
        let store = StateStore::open_in_memory().unwrap();
        store.try_acquire_lease("d1", "worker-a", 60, 1000).unwrap().unwrap();

        assert!(!store.release_lease("d1", "not-the-token").unwrap());
        assert!(store.get_lease("d1").unwrap().is_some());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let store = StateStore::open_in_memory().unwrap();
        let stale = store.try_acquire_lease("d1", "crashed", 60, 1000).unwrap().unwrap();

        let fresh = store.try_acquire_lease("d1", "worker-b", 60, 1060).unwrap().unwrap();
        assert_eq!(fresh.holder, "worker-b");
        // The crashed holder can no longer release the new lease.
        assert!(!store.release_lease("d1", &stale.token).unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_deployment(&test_deployment("d1", DeploymentStatus::Active)).unwrap();
            store.append_sample(&test_sample("d1", 1000, 42.0)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_deployment("d1").unwrap().is_some());
        assert_eq!(store.list_recent_samples("d1", 5).unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_deployments().unwrap().is_empty());
        assert!(store.list_recent_samples("any", 10).unwrap().is_empty());
        assert!(store.list_scaling_events("any", 10).unwrap().is_empty());
        assert!(store.list_actions("any", 10).unwrap().is_empty());
        assert!(store.get_lease("any").unwrap().is_none());
        assert!(!store.release_lease("any", "t").unwrap());
        assert_eq!(store.prune_samples_before(u64::MAX).unwrap(), 0);
    }
}
