#![allow(clippy::must_use_candidate)]

mod diff;
mod env;
mod error;
mod flags;
mod group;
mod loader;
mod server;
mod store;
mod telemetry;
mod upstream;

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

pub use diff::{diff, SettingsDiff};
pub use error::ConfigError;
pub use flags::{RoutingConfig, SmartRoutingConfig};
pub use group::{Group, GroupServer};
pub use server::{HealthConfig, ServerConfig};
pub use store::{SettingsEvent, SettingsPersist, SettingsStore};
pub use telemetry::{ExportProtocol, ExporterConfig, TelemetryConfig};
pub use upstream::{
    ApiKeyLocation, HeaderInsert, HttpTransport, OpenApiSecurity, OpenApiTransport, StdioTransport,
    ToolOverlay, TransportSpec, UpstreamAuth, UpstreamSpec,
};

/// Default keep-alive interval in seconds
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
/// Default per-call timeout in seconds (0 disables)
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 60;
/// Default idle session expiry in seconds
const DEFAULT_IDLE_SESSION_SECS: u64 = 30 * 60;

/// The authoritative hub configuration
///
/// A `Settings` value is an immutable snapshot: readers receive it behind an
/// `Arc` from the [`SettingsStore`] and never observe torn state. All
/// mutation goes through [`SettingsStore::mutate`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream MCP server definitions keyed by name
    #[serde(default)]
    pub upstreams: IndexMap<String, UpstreamSpec>,
    /// Named groups of upstreams with optional tool allowlists
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Vector-similarity routing for the `$smart` scope
    #[serde(default)]
    pub smart_routing: SmartRoutingConfig,
    /// Scope resolution policy
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Default upstream keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_interval: u64,
    /// Per-call deadline in seconds; 0 disables the deadline
    #[serde(default = "default_call_timeout")]
    pub call_timeout: u64,
    /// Idle session expiry in seconds
    #[serde(default = "default_idle_session_timeout")]
    pub idle_session_timeout: u64,
    /// When true, tools of degraded upstreams are dropped from `tools/list`
    #[serde(default)]
    pub hide_degraded_upstreams_from_list: bool,
    /// Telemetry export configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

fn default_keep_alive() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}
fn default_call_timeout() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECS
}
fn default_idle_session_timeout() -> u64 {
    DEFAULT_IDLE_SESSION_SECS
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstreams: IndexMap::new(),
            groups: Vec::new(),
            smart_routing: SmartRoutingConfig::default(),
            routing: RoutingConfig::default(),
            keep_alive_interval: default_keep_alive(),
            call_timeout: default_call_timeout(),
            idle_session_timeout: default_idle_session_timeout(),
            hide_degraded_upstreams_from_list: false,
            telemetry: None,
        }
    }
}

impl Settings {
    /// Look up a group by name or id string
    pub fn find_group(&self, key: &str) -> Option<&Group> {
        self.groups
            .iter()
            .find(|g| g.name == key || g.id.to_string() == key)
    }

    /// Effective keep-alive interval for the named upstream
    pub fn keep_alive_for(&self, name: &str) -> Duration {
        self.upstreams
            .get(name)
            .and_then(|u| u.keep_alive_interval_ms)
            .map_or_else(
                || Duration::from_secs(self.keep_alive_interval),
                Duration::from_millis,
            )
    }

    /// Per-call deadline, `None` when disabled
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout > 0).then(|| Duration::from_secs(self.call_timeout))
    }

    /// Idle session expiry
    pub fn idle_session_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_session_timeout)
    }
}
