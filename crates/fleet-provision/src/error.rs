//! Executor error types.

use thiserror::Error;

use fleet_hosting::HostingError;
use fleet_state::{DeploymentStatus, StateError};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("operation in progress on {0}")]
    InProgress(String),

    #[error("cannot {action} deployment {id} in status {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: DeploymentStatus,
    },

    #[error("deployment {0} has no hosting server")]
    NoServer(String),

    #[error("hosting error: {0}")]
    Hosting(#[from] HostingError),

    #[error("state error: {0}")]
    State(#[from] StateError),
}

impl ProvisionError {
    /// Needs an operator: retrying on the next pass cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProvisionError::Hosting(e) => e.is_permanent(),
            ProvisionError::NoServer(_) => true,
            _ => false,
        }
    }
}
