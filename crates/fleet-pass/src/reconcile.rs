//! Read-only comparison of the store against the hosting platform.
//!
//! Nothing here mutates either side. The report is for an operator who
//! decides whether to terminate, re-provision or delete by hand.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fleet_hosting::{HostingApi, RetryPolicy};
use fleet_state::{DeploymentStatus, StateStore};

use crate::driver::PassError;

/// A deployment whose server the hosting platform no longer knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingServer {
    pub deployment_id: String,
    pub server_id: String,
    pub status: DeploymentStatus,
}

/// A server that no live deployment references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanServer {
    pub server_id: String,
    pub name: String,
    pub external_id: Option<String>,
}

/// Store and platform disagree on whether the bot is suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMismatch {
    pub deployment_id: String,
    pub server_id: String,
    pub status: DeploymentStatus,
    pub hosting_suspended: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub missing_servers: Vec<MissingServer>,
    pub orphan_servers: Vec<OrphanServer>,
    pub status_mismatches: Vec<StatusMismatch>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_servers.is_empty()
            && self.orphan_servers.is_empty()
            && self.status_mismatches.is_empty()
    }
}

/// Build the report. Terminated deployments are ignored; their servers
/// count as orphans if still present.
pub async fn reconcile(
    store: &StateStore,
    hosting: &dyn HostingApi,
    retry: &RetryPolicy,
) -> Result<ReconcileReport, PassError> {
    let servers = retry.run("list_servers", || hosting.list_servers()).await?;
    let by_id: HashMap<&str, bool> = servers
        .iter()
        .map(|s| (s.server_id.as_str(), s.suspended))
        .collect();

    let mut report = ReconcileReport::default();
    let mut referenced = HashSet::new();

    for deployment in store.list_deployments()? {
        if deployment.status.is_terminal() {
            continue;
        }
        let Some(server_id) = deployment.server_id.clone() else {
            continue;
        };
        referenced.insert(server_id.clone());

        match by_id.get(server_id.as_str()) {
            None => report.missing_servers.push(MissingServer {
                deployment_id: deployment.id,
                server_id,
                status: deployment.status,
            }),
            Some(&suspended) => {
                let expected = match deployment.status {
                    DeploymentStatus::Active => Some(false),
                    DeploymentStatus::Suspended => Some(true),
                    _ => None,
                };
                if expected.is_some_and(|e| e != suspended) {
                    report.status_mismatches.push(StatusMismatch {
                        deployment_id: deployment.id,
                        server_id,
                        status: deployment.status,
                        hosting_suspended: suspended,
                    });
                }
            }
        }
    }

    report.orphan_servers = servers
        .into_iter()
        .filter(|s| !referenced.contains(&s.server_id))
        .map(|s| OrphanServer {
            server_id: s.server_id,
            name: s.name,
            external_id: s.external_id,
        })
        .collect();

    if report.is_clean() {
        info!("store and hosting platform agree");
    } else {
        warn!(
            missing = report.missing_servers.len(),
            orphans = report.orphan_servers.len(),
            mismatches = report.status_mismatches.len(),
            "store and hosting platform disagree"
        );
    }
    Ok(report)
}
