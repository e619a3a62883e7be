//! In-process hosting backend with fault injection.
//!
//! Used by the tests of every crate above this one (enable the `testing`
//! feature). Faults are keyed by server id, or `"*"` for every server, and
//! optionally limited to one operation and a number of occurrences.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use fleet_core::{RawUsage, ResourceLimits};

use crate::{HostingApi, HostingError, ServerSpec, ServerState, ServerSummary, ServerUtilization};

/// Matches any server in [`InMemoryHosting::inject_fault`].
pub const ANY_SERVER: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    GetUtilization,
    Resize,
    Suspend,
    Unsuspend,
    Delete,
    Create,
    List,
}

/// A server as the fake control-plane sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeServer {
    pub name: String,
    pub external_id: String,
    pub limits: ResourceLimits,
    pub usage: RawUsage,
    pub suspended: bool,
    pub state: ServerState,
}

#[derive(Debug)]
struct Fault {
    server_id: String,
    op: Option<Op>,
    error: HostingError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    servers: HashMap<String, FakeServer>,
    faults: Vec<Fault>,
    calls: HashMap<Op, usize>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryHosting {
    inner: Mutex<Inner>,
    latency: Mutex<Duration>,
}

impl InMemoryHosting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running server with the given usage.
    pub fn add_server(&self, server_id: &str, limits: ResourceLimits, usage: RawUsage) {
        self.lock().servers.insert(
            server_id.to_string(),
            FakeServer {
                name: server_id.to_string(),
                external_id: String::new(),
                limits,
                usage,
                suspended: false,
                state: ServerState::Running,
            },
        );
    }

    pub fn set_usage(&self, server_id: &str, usage: RawUsage) {
        if let Some(server) = self.lock().servers.get_mut(server_id) {
            server.usage = usage;
        }
    }

    /// Flip the suspended flag without going through the API (out-of-band change).
    pub fn set_suspended(&self, server_id: &str, suspended: bool) {
        if let Some(server) = self.lock().servers.get_mut(server_id) {
            server.suspended = suspended;
        }
    }

    pub fn remove_server(&self, server_id: &str) {
        self.lock().servers.remove(server_id);
    }

    pub fn server(&self, server_id: &str) -> Option<FakeServer> {
        self.lock().servers.get(server_id).cloned()
    }

    /// Fail calls on `server_id` (or [`ANY_SERVER`]) with `error`.
    ///
    /// `op = None` matches every operation; `times = None` fails forever.
    pub fn inject_fault(
        &self,
        server_id: &str,
        op: Option<Op>,
        error: HostingError,
        times: Option<u32>,
    ) {
        self.lock().faults.push(Fault {
            server_id: server_id.to_string(),
            op,
            error,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut l) = self.latency.lock() {
            *l = latency;
        }
    }

    /// Number of calls made for `op`, including failed ones.
    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply latency, count the call, and return an injected fault if one matches.
    async fn enter(&self, op: Op, server_id: &str) -> Result<(), HostingError> {
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.lock();
        *inner.calls.entry(op).or_insert(0) += 1;

        let hit = inner.faults.iter().position(|f| {
            (f.server_id == server_id || f.server_id == ANY_SERVER)
                && f.op.is_none_or(|o| o == op)
                && f.remaining != Some(0)
        });
        if let Some(idx) = hit {
            let fault = &mut inner.faults[idx];
            if let Some(n) = fault.remaining.as_mut() {
                *n -= 1;
            }
            return Err(fault.error.clone());
        }
        Ok(())
    }

    fn with_server<T>(
        &self,
        server_id: &str,
        f: impl FnOnce(&mut FakeServer) -> T,
    ) -> Result<T, HostingError> {
        self.lock()
            .servers
            .get_mut(server_id)
            .map(f)
            .ok_or_else(|| HostingError::NotFound(server_id.to_string()))
    }
}

#[async_trait]
impl HostingApi for InMemoryHosting {
    async fn get_utilization(&self, server_id: &str) -> Result<ServerUtilization, HostingError> {
        self.enter(Op::GetUtilization, server_id).await?;
        self.with_server(server_id, |s| ServerUtilization {
            usage: s.usage,
            suspended: s.suspended,
            state: s.state,
        })
    }

    async fn resize(&self, server_id: &str, limits: &ResourceLimits) -> Result<(), HostingError> {
        self.enter(Op::Resize, server_id).await?;
        self.with_server(server_id, |s| s.limits = *limits)
    }

    async fn suspend(&self, server_id: &str) -> Result<(), HostingError> {
        self.enter(Op::Suspend, server_id).await?;
        self.with_server(server_id, |s| {
            s.suspended = true;
            s.state = ServerState::Offline;
        })
    }

    async fn unsuspend(&self, server_id: &str) -> Result<(), HostingError> {
        self.enter(Op::Unsuspend, server_id).await?;
        self.with_server(server_id, |s| {
            s.suspended = false;
            s.state = ServerState::Running;
        })
    }

    async fn delete(&self, server_id: &str) -> Result<(), HostingError> {
        self.enter(Op::Delete, server_id).await?;
        self.lock()
            .servers
            .remove(server_id)
            .map(|_| ())
            .ok_or_else(|| HostingError::NotFound(server_id.to_string()))
    }

    async fn create_server(&self, spec: &ServerSpec) -> Result<String, HostingError> {
        self.enter(Op::Create, &spec.name).await?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let server_id = format!("srv-{}", inner.next_id);
        inner.servers.insert(
            server_id.clone(),
            FakeServer {
                name: spec.name.clone(),
                external_id: spec.external_id.clone(),
                limits: spec.limits,
                usage: RawUsage::default(),
                suspended: false,
                state: ServerState::Running,
            },
        );
        Ok(server_id)
    }

    async fn list_servers(&self) -> Result<Vec<ServerSummary>, HostingError> {
        self.enter(Op::List, ANY_SERVER).await?;
        let mut servers: Vec<ServerSummary> = self
            .lock()
            .servers
            .iter()
            .map(|(id, s)| ServerSummary {
                server_id: id.clone(),
                name: s.name.clone(),
                external_id: (!s.external_id.is_empty()).then(|| s.external_id.clone()),
                suspended: s.suspended,
            })
            .collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::TierTable;
    use fleet_core::Tier;

    fn starter() -> ResourceLimits {
        TierTable::default().limits(Tier::Starter)
    }

    #[tokio::test]
    async fn faults_expire_after_count() {
        let hosting = InMemoryHosting::new();
        hosting.add_server("s1", starter(), RawUsage::default());
        hosting.inject_fault(
            "s1",
            Some(Op::GetUtilization),
            HostingError::from_status(503, "s1", String::new()),
            Some(1),
        );

        assert!(hosting.get_utilization("s1").await.unwrap_err().is_transient());
        assert!(hosting.get_utilization("s1").await.is_ok());
        assert_eq!(hosting.calls(Op::GetUtilization), 2);
    }

    #[tokio::test]
    async fn faults_are_scoped_to_server_and_op() {
        let hosting = InMemoryHosting::new();
        hosting.add_server("s1", starter(), RawUsage::default());
        hosting.add_server("s2", starter(), RawUsage::default());
        hosting.inject_fault("s1", Some(Op::Resize), HostingError::NotFound("s1".into()), None);

        assert!(hosting.get_utilization("s1").await.is_ok());
        assert!(hosting.resize("s2", &starter()).await.is_ok());
        assert!(hosting.resize("s1", &starter()).await.is_err());
        assert!(hosting.resize("s1", &starter()).await.is_err());
    }

    #[tokio::test]
    async fn lifecycle_calls_mutate_the_fake() {
        let hosting = InMemoryHosting::new();
        let spec = ServerSpec {
            name: "bot".into(),
            external_id: "order-1".into(),
            limits: starter(),
            template: Default::default(),
        };
        let id = hosting.create_server(&spec).await.unwrap();

        hosting.suspend(&id).await.unwrap();
        assert!(hosting.server(&id).unwrap().suspended);
        hosting.unsuspend(&id).await.unwrap();
        assert!(!hosting.server(&id).unwrap().suspended);

        let listed = hosting.list_servers().await.unwrap();
        assert_eq!(listed[0].external_id.as_deref(), Some("order-1"));

        hosting.delete(&id).await.unwrap();
        assert!(matches!(hosting.delete(&id).await, Err(HostingError::NotFound(_))));
    }
}
