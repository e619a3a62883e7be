//! Domain types for the deployment store.
//!
//! These types represent the persisted state of hosted bot deployments and
//! their append-only history. All types are serializable to/from JSON for
//! storage in redb tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use fleet_core::{RawUsage, ResourceLimits, Tier, Utilization};

/// Unique identifier for a deployment.
pub type DeploymentId = String;

// ── Deployment ─────────────────────────────────────────────────────

/// One customer's hosted bot instance and its resource/lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    /// Order that paid for this deployment.
    pub order_ref: String,
    pub customer_id: String,
    pub guild_id: String,
    /// Opaque server handle on the hosting control-plane. `None` until the
    /// server has been created.
    pub server_id: Option<String>,
    /// Current tier.
    pub tier: Tier,
    /// Tier the customer purchased; automatic scale-down never goes below it.
    pub floor_tier: Tier,
    /// Always exactly the tier table entry for `tier`.
    pub limits: ResourceLimits,
    pub status: DeploymentStatus,
    pub health: HealthStatus,
    /// Consecutive failed sampling attempts.
    pub consecutive_failures: u32,
    /// Set when a permanent hosting error needs an operator. Passes skip
    /// held deployments.
    pub hold_reason: Option<String>,
    /// Unix timestamp (seconds) when this record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when the server was confirmed running.
    pub provisioned_at: Option<u64>,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Provisioning,
    Active,
    Suspended,
    Terminated,
    Error,
}

impl DeploymentStatus {
    /// `terminated` is the only state nothing leaves.
    pub fn is_terminal(self) -> bool {
        self == DeploymentStatus::Terminated
    }

    /// Whether the lifecycle state machine allows `self -> to`.
    ///
    /// ```text
    /// provisioning → active ⇄ suspended
    /// any non-terminal → terminated | error
    /// ```
    pub fn can_transition_to(self, to: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        match (self, to) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Error, Error) => false,
            (_, Error) => true,
            (Provisioning, Active) => true,
            (Active, Suspended) | (Suspended, Active) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Suspended => "suspended",
            DeploymentStatus::Terminated => "terminated",
            DeploymentStatus::Error => "error",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisioning" => Ok(DeploymentStatus::Provisioning),
            "active" => Ok(DeploymentStatus::Active),
            "suspended" => Ok(DeploymentStatus::Suspended),
            "terminated" => Ok(DeploymentStatus::Terminated),
            "error" => Ok(DeploymentStatus::Error),
            other => Err(format!("unknown deployment status: {other}")),
        }
    }
}

/// Health as observed by the resource monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unknown,
}

// ── Samples ───────────────────────────────────────────────────────

/// One utilization observation. Written only by the resource monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSample {
    pub deployment_id: DeploymentId,
    /// Unix timestamp (seconds).
    pub sampled_at: u64,
    #[serde(flatten)]
    pub utilization: Utilization,
    #[serde(flatten)]
    pub usage: RawUsage,
}

// ── Scaling events ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingDirection {
    Up,
    Down,
    None,
}

impl fmt::Display for ScalingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScalingDirection::Up => "up",
            ScalingDirection::Down => "down",
            ScalingDirection::None => "none",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingOutcome {
    Applied,
    Skipped,
    Failed,
}

/// Who initiated an executor operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Autoscaler,
    Admin,
}

/// Audit record of a resize decision that was acted on (or explicitly not).
/// Written only by the provisioning executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingEvent {
    pub deployment_id: DeploymentId,
    /// Unix timestamp (seconds).
    pub decided_at: u64,
    pub direction: ScalingDirection,
    pub reason: String,
    pub actor: Actor,
    pub old_tier: Tier,
    pub new_tier: Tier,
    pub old_resources: ResourceLimits,
    pub new_resources: ResourceLimits,
    pub outcome: ScalingOutcome,
}

// ── Action log ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Provision,
    Suspend,
    Unsuspend,
    Resize,
    Terminate,
    Hold,
    ReleaseHold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    NoOp,
    Failed,
}

/// One executor operation against a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionRecord {
    pub deployment_id: DeploymentId,
    /// Unix timestamp (seconds).
    pub at: u64,
    pub action: ActionKind,
    pub actor: Actor,
    pub outcome: ActionOutcome,
    pub detail: String,
}

// ── Leases ────────────────────────────────────────────────────────

/// Exclusive right to mutate one deployment until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lease {
    pub deployment_id: DeploymentId,
    pub holder: String,
    /// Proof of ownership required to release.
    pub token: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}

/// Build the composite key for a history table row.
pub(crate) fn history_key(deployment_id: &str, timestamp: u64, seq: u32) -> String {
    format!("{deployment_id}:{timestamp:020}:{seq:06}")
}

/// Half-open key range covering every history row of one deployment.
pub(crate) fn history_range(deployment_id: &str) -> (String, String) {
    // ';' sorts immediately after ':'.
    (format!("{deployment_id}:"), format!("{deployment_id};"))
}
