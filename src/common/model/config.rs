use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::utils::logger::LoggerConfig;

/// Gateway session configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    /// WebSocket address of the gateway (`ws://` or `wss://`)
    pub addr: String,
    /// Fixed delay before re-dialing after a session ends, in milliseconds
    pub reconnect_delay_ms: u64,
    /// Heartbeat cadence used until the gateway dictates one, in seconds
    pub initial_heartbeat_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            addr: "ws://127.0.0.1:9090/ws".to_string(),
            reconnect_delay_ms: 1000,
            initial_heartbeat_secs: 60,
        }
    }
}

/// Node identity and capacity
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node id; derived from the hostname when unset
    pub id: Option<String>,
    /// Maximum number of jobs executing at once
    pub max_concurrency: usize,
    /// Depth of the pool's job queue
    pub job_queue_depth: usize,
    /// Buffer of inbound requests between the session and the controller
    pub request_buffer: usize,
    /// Buffer of outbound commands waiting for the session writer
    pub command_buffer: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            id: None,
            max_concurrency: 16,
            job_queue_depth: 10,
            request_buffer: 100,
            command_buffer: 1000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ControllerConfig {
    /// Per-request TTL when the request does not carry one, in seconds
    pub default_ttl_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            default_ttl_secs: 300,
        }
    }
}

impl ControllerConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// HTTP backend configuration
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Proxy used when a request enables proxying
    pub proxy_url: Option<String>,
    /// Proxy used when a crawler asks for high reliability
    pub reliable_proxy_url: Option<String>,
    /// Idle connections kept per host
    pub pool_size: usize,
    /// Maximum response size in bytes
    pub max_response_size: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        DownloaderConfig {
            timeout_secs: 30,
            user_agent: concat!("crawlet/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy_url: None,
            reliable_proxy_url: None,
            pool_size: 32,
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

impl fmt::Debug for DownloaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "***REDACTED***");
        f.debug_struct("DownloaderConfig")
            .field("timeout_secs", &self.timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("proxy_url", &redact(&self.proxy_url))
            .field("reliable_proxy_url", &redact(&self.reliable_proxy_url))
            .field("pool_size", &self.pool_size)
            .field("max_response_size", &self.max_response_size)
            .finish()
    }
}

/// Main Configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub node: NodeConfig,
    pub controller: ControllerConfig,
    pub downloader: DownloaderConfig,
    pub logger: LoggerConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self, String> {
        let config_str = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let mut config: Config = toml::from_str(&config_str).map_err(|e| e.to_string())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("CRAWLET_GATEWAY_ADDR") {
            self.gateway.addr = addr;
        }
        if let Ok(id) = std::env::var("CRAWLET_NODE_ID") {
            if !id.trim().is_empty() {
                self.node.id = Some(id.trim().to_string());
            }
        }
        if let Ok(max) = std::env::var("CRAWLET_MAX_CONCURRENCY") {
            match max.trim().parse::<usize>() {
                Ok(v) => self.node.max_concurrency = v,
                Err(e) => log::warn!("ignoring CRAWLET_MAX_CONCURRENCY={max:?}: {e}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node.max_concurrency == 0 {
            return Err("node.max_concurrency must be greater than 0".to_string());
        }
        if self.node.job_queue_depth == 0 {
            return Err("node.job_queue_depth must be greater than 0".to_string());
        }
        if self.node.request_buffer == 0 || self.node.command_buffer == 0 {
            return Err("node buffers must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.gateway.reconnect_delay_ms)
    }

    pub fn initial_heartbeat(&self) -> Duration {
        Duration::from_secs(self.gateway.initial_heartbeat_secs)
    }
}
