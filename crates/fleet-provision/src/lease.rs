//! RAII guard over a store lease.

use tracing::warn;

use fleet_state::{Lease, StateStore};

use crate::error::ProvisionError;

/// Holds a deployment lease; releases it when dropped.
pub(crate) struct LeaseGuard {
    store: StateStore,
    lease: Lease,
}

impl LeaseGuard {
    /// Take the lease on `key` or fail with [`ProvisionError::InProgress`].
    pub(crate) fn acquire(
        store: &StateStore,
        key: &str,
        holder: &str,
        ttl_secs: u64,
        now: u64,
    ) -> Result<Self, ProvisionError> {
        match store.try_acquire_lease(key, holder, ttl_secs, now)? {
            Some(lease) => Ok(Self {
                store: store.clone(),
                lease,
            }),
            None => Err(ProvisionError::InProgress(key.to_string())),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // Expiry reclaims the lease if this fails.
        if let Err(e) = self
            .store
            .release_lease(&self.lease.deployment_id, &self.lease.token)
        {
            warn!(key = %self.lease.deployment_id, error = %e, "failed to release lease");
        }
    }
}
