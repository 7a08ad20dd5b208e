use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Device-id segment the controller uses on its own lwt topic
    #[serde(default = "default_controller_mac")]
    pub controller_mac: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Telemetry fan-in is opt-in per deployment
    #[serde(default)]
    pub telemetry: bool,
}

fn default_client_id() -> String {
    "rtk-controller".to_string()
}
fn default_controller_mac() -> String {
    "000000000001".to_string()
}
fn default_keep_alive() -> u64 {
    20
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RpcLimits {
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_result_timeout_ms")]
    pub result_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_per_device_inflight")]
    pub per_device_inflight: usize,
    #[serde(default = "default_global_inflight")]
    pub global_inflight: usize,
}

fn default_ack_timeout_ms() -> u64 {
    1_000
}
fn default_result_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_per_device_inflight() -> usize {
    8
}
fn default_global_inflight() -> usize {
    256
}

impl Default for RpcLimits {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            result_timeout_ms: default_result_timeout_ms(),
            max_retries: default_max_retries(),
            per_device_inflight: default_per_device_inflight(),
            global_inflight: default_global_inflight(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolLimits {
    #[serde(default = "default_session_tool_inflight")]
    pub per_session_inflight: usize,
    #[serde(default = "default_global_tool_inflight")]
    pub global_inflight: usize,
    /// Active-traffic (Test) runs allowed at once per device
    #[serde(default = "default_test_per_device")]
    pub test_per_device: usize,
}

fn default_session_tool_inflight() -> usize {
    16
}
fn default_global_tool_inflight() -> usize {
    64
}
fn default_test_per_device() -> usize {
    1
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            per_session_inflight: default_session_tool_inflight(),
            global_inflight: default_global_tool_inflight(),
            test_per_device: default_test_per_device(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionLimits {
    #[serde(default = "default_max_active_sessions")]
    pub max_active: usize,
}

fn default_max_active_sessions() -> usize {
    32
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_active: default_max_active_sessions(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// sqlx connection string, e.g. `sqlite://rtk_controller.db?mode=rwc`
    pub path: String,
    /// Persist every raw MQTT frame under the `mqtt_log:` prefix
    #[serde(default)]
    pub mqtt_log: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolsConfig {
    /// Enabled tool names; empty means all built-ins
    #[serde(default)]
    pub enabled: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
        }
    }
}

/// Immutable controller configuration, loaded once at startup and replaced
/// atomically on reload
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerConfig {
    pub tenant: String,
    pub site: String,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub rpc: RpcLimits,
    #[serde(default)]
    pub tools: ToolLimits,
    #[serde(default)]
    pub sessions: SessionLimits,
    pub storage: StorageConfig,
    #[serde(default)]
    pub toolbox: ToolsConfig,
    #[serde(default = "default_ingress_capacity")]
    pub ingress_capacity: usize,
}

fn default_ingress_capacity() -> usize {
    4096
}

impl ControllerConfig {
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default settings
            .set_default("mqtt.host", "localhost")?
            .set_default("mqtt.port", 1883)?
            .set_default("storage.path", "sqlite://rtk_controller.db?mode=rwc")?
            // Base config file - e.g. config/default.toml, required
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(true))
            // Per-environment overrides - e.g. config/production.toml
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Environment variables (e.g. RTK__MQTT__HOST=10.0.0.1)
            .add_source(Environment::with_prefix("RTK").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_in() {
        let cfg: ControllerConfig = serde_json::from_value(serde_json::json!({
            "tenant": "acme",
            "site": "home-1",
            "mqtt": { "host": "localhost", "port": 1883 },
            "storage": { "path": "sqlite::memory:" }
        }))
        .unwrap();

        assert_eq!(cfg.rpc.ack_timeout_ms, 1_000);
        assert_eq!(cfg.rpc.per_device_inflight, 8);
        assert_eq!(cfg.tools.per_session_inflight, 16);
        assert_eq!(cfg.sessions.max_active, 32);
        assert_eq!(cfg.ingress_capacity, 4096);
        assert!(!cfg.storage.mqtt_log);
        assert!(cfg.toolbox.enabled.is_empty());
        assert_eq!(cfg.mqtt.client_id, "rtk-controller");
    }
}
