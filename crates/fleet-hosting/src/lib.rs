//! fleet-hosting: client for the external hosting control-plane.
//!
//! [`HostingApi`] is the seam every other component talks through. The
//! production implementation is [`PanelClient`] (HTTP); tests inject the
//! in-process backend from [`memory`] (feature `testing`).

pub mod error;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod panel;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use fleet_core::config::ServerTemplate;
use fleet_core::{RawUsage, ResourceLimits};

pub use error::HostingError;
pub use panel::PanelClient;
pub use retry::RetryPolicy;

/// Power state reported by the control-plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Running,
    Starting,
    Stopping,
    Offline,
    #[serde(other)]
    Unknown,
}

/// Live usage and state of one server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServerUtilization {
    pub usage: RawUsage,
    pub suspended: bool,
    pub state: ServerState,
}

/// What to create on the control-plane for a new deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSpec {
    pub name: String,
    /// Our reference stored on the server (the order reference).
    pub external_id: String,
    pub limits: ResourceLimits,
    pub template: ServerTemplate,
}

/// One server as listed by the control-plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSummary {
    pub server_id: String,
    pub name: String,
    pub external_id: Option<String>,
    pub suspended: bool,
}

/// Operations the controller needs from the hosting control-plane.
///
/// Server ids are opaque handles returned by [`HostingApi::create_server`].
#[async_trait]
pub trait HostingApi: Send + Sync {
    async fn get_utilization(&self, server_id: &str) -> Result<ServerUtilization, HostingError>;

    async fn resize(&self, server_id: &str, limits: &ResourceLimits) -> Result<(), HostingError>;

    async fn suspend(&self, server_id: &str) -> Result<(), HostingError>;

    async fn unsuspend(&self, server_id: &str) -> Result<(), HostingError>;

    async fn delete(&self, server_id: &str) -> Result<(), HostingError>;

    /// Create a server and return its handle.
    async fn create_server(&self, spec: &ServerSpec) -> Result<String, HostingError>;

    async fn list_servers(&self) -> Result<Vec<ServerSummary>, HostingError>;
}
