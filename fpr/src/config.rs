//! Lifecycle and mode configuration (§6.2 "Lifecycle", "Mode/config").

use fpr_core::frame::Mac;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PowerMode {
    Normal,
    /// Multiplies every cadence/timeout by `LOW_POWER_FACTOR` (§4.8).
    Low,
}

pub const LOW_POWER_FACTOR: u32 = 4;

impl PowerMode {
    pub fn scale(self, base: std::time::Duration) -> std::time::Duration {
        match self {
            Self::Normal => base,
            Self::Low => base * LOW_POWER_FACTOR,
        }
    }
}

/// Top-level `init` configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub channel: u8,
    pub power_mode: PowerMode,
}

impl Default for Config {
    fn default() -> Self {
        Self { channel: 1, power_mode: PowerMode::Normal }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionMode {
    Auto,
    Manual,
}

/// Host-side approval callback: return `true` to approve a pending peer.
pub type ApprovalCallback = Arc<dyn Fn(Mac) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct HostConfig {
    pub max_peers: usize,
    pub connection_mode: ConnectionMode,
    pub request_cb: Option<ApprovalCallback>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { max_peers: 8, connection_mode: ConnectionMode::Auto, request_cb: None }
    }
}

/// Client-side discovery/selection callbacks.
pub type DiscoveryCallback = Arc<dyn Fn(Mac, &str) + Send + Sync>;
pub type SelectionCallback = Arc<dyn Fn(Mac, &str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct ClientConfig {
    pub connection_mode: ClientConnectionModeConfig,
    pub discovery_cb: Option<DiscoveryCallback>,
    pub selection_cb: Option<SelectionCallback>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum ClientConnectionModeConfig {
    #[default]
    Auto,
    Manual,
}
