//! Server configuration.

use std::time::Duration;

use pilot_compiler::{ClusterMode, MeshConfig};
use pilot_core::{PilotError, PilotResult};
use serde::{Deserialize, Serialize};

/// Configuration for the discovery server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identifier stamped on every response.
    pub control_plane_id: String,
    /// Responses buffered per stream before the stream task waits.
    pub response_buffer_size: usize,
    /// Compilations allowed to run at once.
    pub compile_concurrency: usize,
    /// Close streams with no traffic in either direction for this long.
    ///
    /// Disabled by default. Never fires while a response awaits its ACK.
    pub idle_timeout: Option<Duration>,
    /// HTTP/2 keepalive interval.
    pub keepalive_interval: Option<Duration>,
    /// HTTP/2 keepalive timeout.
    pub keepalive_timeout: Option<Duration>,
    /// Maximum concurrent streams per connection.
    pub max_concurrent_streams: Option<u32>,
    /// Maximum decoded request size in bytes.
    pub max_request_size: usize,
    /// How long shutdown waits for open streams.
    pub grace_period: Duration,
    /// Cluster naming scheme.
    pub cluster_mode: ClusterMode,
    /// Compiler defaults.
    pub mesh: MeshConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_plane_id: "meshpilot".to_string(),
            response_buffer_size: 16,
            compile_concurrency: 4,
            idle_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_timeout: Some(Duration::from_secs(10)),
            max_concurrent_streams: Some(100),
            max_request_size: 4 * 1024 * 1024, // 4MB
            grace_period: Duration::from_secs(30),
            cluster_mode: ClusterMode::Default,
            mesh: MeshConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> PilotResult<()> {
        if self.compile_concurrency == 0 {
            return Err(PilotError::Configuration(
                "compile_concurrency must be at least 1".into(),
            ));
        }
        if self.response_buffer_size == 0 {
            return Err(PilotError::Configuration(
                "response_buffer_size must be at least 1".into(),
            ));
        }
        if self.idle_timeout == Some(Duration::ZERO) {
            return Err(PilotError::Configuration(
                "idle_timeout must be positive; use None to disable".into(),
            ));
        }
        Ok(())
    }
}
