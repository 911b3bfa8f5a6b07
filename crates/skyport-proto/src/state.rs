//! Tunnel lifecycle state machine
//!
//! ```text
//! Unprovisioned -> Provisioning -> Booting -> Establishing -> Monitoring
//!                                                 ^              |
//!                                                 |              v
//!                                                 +--------> Degraded -> Failed
//!
//! any state --cleanup--> TornDown
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Unprovisioned,
    Provisioning,
    Booting,
    Establishing,
    Monitoring,
    Degraded,
    Failed,
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid tunnel state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TunnelState,
    pub to: TunnelState,
}

impl TunnelState {
    /// Terminal states accept no transition other than a (repeated) teardown
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunnelState::Failed | TunnelState::TornDown)
    }

    /// Whether a link is expected to exist in this state
    pub fn has_link(&self) -> bool {
        matches!(
            self,
            TunnelState::Establishing | TunnelState::Monitoring | TunnelState::Degraded
        )
    }

    pub fn can_transition_to(&self, to: TunnelState) -> bool {
        use TunnelState::*;

        match (*self, to) {
            // Cleanup is valid from everywhere, including a repeated cleanup
            (_, TornDown) => true,
            (TornDown, _) => false,
            (Failed, _) => false,
            (_, Failed) => true,
            (Unprovisioned, Provisioning)
            | (Provisioning, Booting)
            | (Booting, Establishing)
            | (Establishing, Monitoring)
            | (Monitoring, Degraded)
            | (Degraded, Monitoring)
            | (Degraded, Establishing)
            | (Establishing, Degraded) => true,
            _ => false,
        }
    }

    /// Validate and return the next state
    pub fn transition(self, to: TunnelState) -> Result<TunnelState, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Unprovisioned => "unprovisioned",
            TunnelState::Provisioning => "provisioning",
            TunnelState::Booting => "booting",
            TunnelState::Establishing => "establishing",
            TunnelState::Monitoring => "monitoring",
            TunnelState::Degraded => "degraded",
            TunnelState::Failed => "failed",
            TunnelState::TornDown => "torn_down",
        };
        f.write_str(s)
    }
}
