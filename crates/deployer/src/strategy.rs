//! Deployment strategy selection

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a contract reaches the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Routed through a funded ephemeral deployer; the ledger assigns the address
    Internal,
    /// Self-paying deployment to a client-derived, pre-funded address
    #[default]
    External,
}

impl DeploymentStrategy {
    /// Strategies to try, in order, for a requested strategy
    pub fn attempt_order(requested: DeploymentStrategy) -> &'static [DeploymentStrategy] {
        match requested {
            DeploymentStrategy::Internal => {
                &[DeploymentStrategy::Internal, DeploymentStrategy::External]
            }
            DeploymentStrategy::External => &[DeploymentStrategy::External],
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStrategy::Internal => write!(f, "internal"),
            DeploymentStrategy::External => write!(f, "external"),
        }
    }
}
