//! Allow/block-list enforcement and the autonomy gate for skill actions.

use crate::config::SecurityConfig;
use crate::GatewayKind;
use serde::{Deserialize, Serialize};

/// Three-tier permission gate controlling which skill action classes may
/// execute. Consulted by individual skills, not by the routing pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Readonly,
    #[default]
    Supervised,
    Full,
}

/// What a skill action does to the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Lookups and computation. Always permitted.
    Read,
    /// State mutations (remember, schedule, file writes).
    Write,
    /// Shell execution, filesystem deletes. Full autonomy only.
    Execute,
}

impl AutonomyLevel {
    pub fn permits(self, action: ActionClass) -> bool {
        match action {
            ActionClass::Read => true,
            ActionClass::Write => matches!(self, Self::Supervised | Self::Full),
            ActionClass::Execute => matches!(self, Self::Full),
        }
    }
}

/// User/channel allow- and block-list checks, consulted by the gateway
/// boundary before any message enters the pipeline.
#[derive(Debug, Clone)]
pub struct SecurityGate {
    config: SecurityConfig,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn autonomy(&self) -> AutonomyLevel {
        self.config.autonomy
    }

    /// Blocklist wins. With no allowlist configured, default allow;
    /// otherwise membership (exact id, "gateway:id" compound, or "*")
    /// is required.
    pub fn is_user_allowed(&self, user_id: &str, gateway: GatewayKind) -> bool {
        allowed(
            user_id,
            gateway,
            &self.config.blocked_users,
            &self.config.allowed_users,
        )
    }

    /// Same shape as the user check, for channel identifiers.
    pub fn is_channel_allowed(&self, channel_id: &str, gateway: GatewayKind) -> bool {
        allowed(
            channel_id,
            gateway,
            &self.config.blocked_channels,
            &self.config.allowed_channels,
        )
    }
}

fn allowed(id: &str, gateway: GatewayKind, blocklist: &[String], allowlist: &[String]) -> bool {
    let compound = format!("{}:{}", gateway.as_str(), id);

    if blocklist.iter().any(|entry| entry == id || entry == &compound) {
        return false;
    }

    if allowlist.is_empty() {
        return true;
    }

    allowlist
        .iter()
        .any(|entry| entry == "*" || entry == id || entry == &compound)
}
