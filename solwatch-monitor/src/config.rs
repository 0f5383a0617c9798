use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Topic suffixes under the configured prefix, one per bus contract.
pub mod topics {
    pub const TELEMETRY_LIVE: &str = "telemetry/live@v1";
    pub const DEVICE_ONLINE: &str = "telemetry/online@v1";
    pub const HISTORY_QUERY: &str = "history/query@v1";
    pub const HISTORY_RESULT: &str = "history/result@v1";
    pub const PARAMS_READ: &str = "params/read@v1";
    pub const PARAMS_SET: &str = "params/set@v1";
    pub const PARAMS_DATA: &str = "params/data@v1";
    pub const FIRMWARE_INFO: &str = "firmware/info@v1";
    pub const FIRMWARE_OTA: &str = "firmware/ota@v1";
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub mqtt: MqttConf,
    #[serde(default)]
    pub http: HttpConf,
    #[serde(default)]
    pub session: SessionConf,
    #[serde(default)]
    pub liveness: LivenessConf,
    #[serde(default)]
    pub auth: AuthConf,
    #[serde(default)]
    pub storage: StorageConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Leading segment of every bus topic (ex: "solwatch").
    pub topic_prefix: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConf {
    pub bind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConf {
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LivenessConf {
    pub degraded_after_secs: u64,
    pub offline_after_secs: u64,
    pub tick_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AuthConf {
    /// Backend sign-in endpoint. Unset = dev mode, credentials accepted unchecked.
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StorageConf {
    /// Object storage base URL for firmware images. Unset disables uploads.
    pub base_url: Option<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "solwatch-monitor".into(),
            topic_prefix: "solwatch".into(),
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl Default for SessionConf {
    fn default() -> Self {
        Self { idle_timeout_secs: 60 }
    }
}

impl Default for LivenessConf {
    fn default() -> Self {
        Self {
            degraded_after_secs: 60,
            offline_after_secs: 120,
            tick_secs: 5,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            http: HttpConf::default(),
            session: SessionConf::default(),
            liveness: LivenessConf::default(),
            auth: AuthConf::default(),
            storage: StorageConf::default(),
        }
    }
}

impl MqttConf {
    /// Full topic for a suffix from [`topics`].
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}/{}", self.topic_prefix, suffix)
    }
}

pub async fn load_config() -> MonitorConfig {
    let path = std::env::var("SOLWATCH_CONFIG").unwrap_or_else(|_| "solwatch.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return MonitorConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {}: {}", path, e);
            MonitorConfig::default()
        })
    } else {
        warn!("no {}, using default config", path);
        MonitorConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_ordered() {
        let cfg = MonitorConfig::default();
        assert!(cfg.liveness.degraded_after_secs < cfg.liveness.offline_after_secs);
        assert_eq!(cfg.session.idle_timeout_secs, 60);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: MonitorConfig = serde_yaml::from_str("mqtt:\n  host: broker.lan\n  port: 1884\n  client_id: mon1\n  topic_prefix: solwatch\n").unwrap();
        assert_eq!(cfg.mqtt.host, "broker.lan");
        assert_eq!(cfg.liveness.tick_secs, 5);
        assert_eq!(cfg.http.bind, "0.0.0.0:8080");
    }

    #[test]
    fn topic_joins_prefix() {
        let mqtt = MqttConf::default();
        assert_eq!(mqtt.topic(topics::TELEMETRY_LIVE), "solwatch/telemetry/live@v1");
    }
}
