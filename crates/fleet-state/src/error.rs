//! Deployment store errors.
//!
//! redb failures are kept as text, tagged by the stage that failed. Callers
//! branch only on [`StateError::DeploymentNotFound`] and
//! [`StateError::TierConflict`].

use thiserror::Error;

use fleet_core::Tier;

use crate::types::DeploymentId;

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open deployment store: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("store table unavailable: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    /// A stored value no longer parses as the record type.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),

    /// A resize was recorded against a tier the deployment is no longer at.
    #[error("deployment {id} is at tier {found}, resize was decided from {expected}")]
    TierConflict {
        id: DeploymentId,
        expected: Tier,
        found: Tier,
    },
}

impl StateError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeploymentNotFound(_))
    }
}
