use tokio::time::Duration;

use dmind_broker::BrokerConfig;
use dminddb::SWEEP_INTERVAL_SECS;

/// Runtime configuration, read from the environment with workable defaults
/// for a local broker. Malformed numeric values fall back to the default
/// with a warning rather than refusing to start.
#[derive(Debug, Clone, PartialEq)]
pub struct MinderConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub keep_alive_secs: u64,
    pub db_path: String,
    pub sweep_interval: Duration,
}

impl Default for MinderConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            keep_alive_secs: 60,
            db_path: "./devices.db".to_string(),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }
}

impl MinderConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            mqtt_host: env_string("DMIND_MQTT_HOST", defaults.mqtt_host),
            mqtt_port: env_parsed("DMIND_MQTT_PORT", defaults.mqtt_port),
            keep_alive_secs: env_parsed("DMIND_KEEP_ALIVE_SECS", defaults.keep_alive_secs),
            db_path: env_string("DMIND_DB_PATH", defaults.db_path),
            sweep_interval: Duration::from_secs(env_parsed(
                "DMIND_SWEEP_INTERVAL_SECS",
                SWEEP_INTERVAL_SECS,
            )),
        }
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            keep_alive_secs: self.keep_alive_secs,
            ..BrokerConfig::default()
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Unparseable {key:} value {raw:}, using {default:}");
                default
            }
        },
        Err(_) => default,
    }
}
