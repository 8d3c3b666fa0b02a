//! Audit configuration, loaded from the environment.

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Reject the null once the risk estimate drops below this.
    pub risk_limit: f64,
    /// Largest fraction of the statistic a single worst-case draw may lose.
    pub max_loss: f64,
    /// Shrinkage weight `d` of the a-priori error rates.
    pub shrinkage_weight: f64,
    pub without_replacement: bool,
    /// Stop at the first draw whose risk estimate is under the limit.
    pub terminate_on_reject: bool,
    /// Whether samplers may reshuffle between rounds.
    pub allow_reset: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            risk_limit: 0.05,
            max_loss: 0.90,
            shrinkage_weight: 100.0,
            without_replacement: true,
            terminate_on_reject: true,
            allow_reset: true,
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            risk_limit: std::env::var("RLA_RISK_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.risk_limit),
            max_loss: std::env::var("RLA_MAX_LOSS").ok().and_then(|v| v.parse().ok()).unwrap_or(d.max_loss),
            shrinkage_weight: std::env::var("RLA_SHRINKAGE_D").ok().and_then(|v| v.parse().ok()).unwrap_or(d.shrinkage_weight),
            without_replacement: std::env::var("RLA_WITHOUT_REPLACEMENT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.without_replacement),
            terminate_on_reject: std::env::var("RLA_TERMINATE_ON_REJECT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.terminate_on_reject),
            allow_reset: std::env::var("RLA_ALLOW_RESET").ok().and_then(|v| v.parse().ok()).unwrap_or(d.allow_reset),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.risk_limit > 0.0 && self.risk_limit < 1.0) {
            return Err(AuditError::InvalidConfig(format!(
                "risk_limit must be in (0, 1), got {}",
                self.risk_limit
            )));
        }
        if !(self.max_loss > 0.0 && self.max_loss < 1.0) {
            return Err(AuditError::InvalidConfig(format!(
                "max_loss must be in (0, 1), got {}",
                self.max_loss
            )));
        }
        if !(self.shrinkage_weight >= 1.0) {
            return Err(AuditError::InvalidConfig(format!(
                "shrinkage_weight must be >= 1, got {}",
                self.shrinkage_weight
            )));
        }
        Ok(())
    }
}
