//! Mesh-wide compiler defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Defaults applied wherever a policy leaves a field unset.
///
/// # Example
///
/// ```rust
/// use pilot_compiler::MeshConfig;
///
/// let mesh: MeshConfig = serde_json::from_str(r#"{"dns_refresh_rate": {"secs": 30, "nanos": 0}}"#).unwrap();
/// assert_eq!(mesh.dns_refresh_rate.as_secs(), 30);
/// assert_eq!(mesh.connect_timeout.as_secs(), 10);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Upstream connect timeout.
    pub connect_timeout: Duration,
    /// Refresh rate of STRICT_DNS clusters.
    pub dns_refresh_rate: Duration,
    /// How long a proxy waits for the first EDS response; zero disables.
    pub initial_fetch_timeout: Duration,
    /// Pattern for alt stat names of outbound clusters.
    pub outbound_cluster_stat_name: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            dns_refresh_rate: Duration::from_secs(5),
            initial_fetch_timeout: Duration::ZERO,
            outbound_cluster_stat_name: None,
        }
    }
}
