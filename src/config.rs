use crate::forward::Backoff;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Budget of one remote hop: where it lives and how hard to try.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HopConfig {
    pub endpoint: String,
    pub timeout_secs: f64,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl HopConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl Default for HopConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout_secs: 10.0,
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

/// One downstream sink of the publish fan-out.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub name: String,
    pub url: String,
    pub timeout_secs: f64,
    pub max_attempts: u32,
}

impl SinkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            name: "ingest".to_string(),
            url: String::new(),
            timeout_secs: 8.0,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub listen_host: String,
    pub listen_port: u16,
    /// Root under which the capture stage drops images and sidecar JSON.
    pub captures_root: PathBuf,
    pub prompt_hop: HopConfig,
    pub detection_hop: HopConfig,
    /// Ask the detection service to render boxes itself instead of
    /// drawing them locally.
    pub annotate_in_service: bool,
    pub sinks: Vec<SinkConfig>,
    pub event_buffer_size: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5050,
            captures_root: PathBuf::from("captures"),
            prompt_hop: HopConfig {
                endpoint: "http://127.0.0.1:5051/prompts".to_string(),
                timeout_secs: 20.0,
                max_attempts: 3,
                backoff: Backoff::default(),
            },
            detection_hop: HopConfig {
                endpoint: "http://127.0.0.1:5060/infer".to_string(),
                timeout_secs: 45.0,
                max_attempts: 7,
                backoff: Backoff::default(),
            },
            annotate_in_service: false,
            sinks: Vec::new(),
            event_buffer_size: 64,
        }
    }
}

impl Configuration {
    /// Load from an optional TOML file plus `PERCEPT_RELAY_*` environment
    /// overrides (`PERCEPT_RELAY_LISTEN_PORT`,
    /// `PERCEPT_RELAY_DETECTION_HOP__MAX_ATTEMPTS`, ...). Missing keys
    /// fall back to the defaults above.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        builder
            .add_source(Environment::with_prefix("PERCEPT_RELAY").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let configuration = Configuration::default();
        assert_eq!(configuration.prompt_hop.timeout_secs, 20.0);
        assert_eq!(configuration.prompt_hop.max_attempts, 3);
        assert_eq!(configuration.detection_hop.timeout_secs, 45.0);
        assert_eq!(configuration.detection_hop.max_attempts, 7);
        assert!(!configuration.annotate_in_service);
    }

    #[test]
    fn load_without_file_yields_defaults() {
        let configuration = Configuration::load(None).expect("defaults should deserialize");
        assert_eq!(configuration.listen_addr(), "0.0.0.0:5050");
        assert!(configuration.sinks.is_empty());
    }
}
