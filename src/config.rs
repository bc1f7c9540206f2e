use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the conwatch agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Bounded event queue capacity. Default: 1000.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How often to publish metrics snapshots to sinks. Default: 10s.
    #[serde(default = "default_export_interval", with = "humantime_serde")]
    pub export_interval: Duration,

    /// BPF ring buffer size in bytes. Default: 4MB.
    #[serde(default = "default_ring_buffer_size")]
    pub ring_buffer_size: usize,

    /// Backend sink configuration. Default: one prometheus sink on port 8080.
    #[serde(default = "default_adapters")]
    pub adapters: Vec<AdapterConfig>,
}

/// Configuration for one backend sink.
#[derive(Debug, Clone, Deserialize)]
pub struct AdapterConfig {
    /// Sink type tag ("noop", "prometheus", "statsd"). Unrecognized tags fall
    /// back to the no-op sink with a warning.
    #[serde(rename = "type")]
    pub kind: String,

    /// Sink-specific settings (e.g. "port" for prometheus, "host" for statsd).
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_export_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_ring_buffer_size() -> usize {
    4 * 1024 * 1024 // 4MB
}

fn default_adapters() -> Vec<AdapterConfig> {
    vec![AdapterConfig {
        kind: "prometheus".to_string(),
        settings: HashMap::from([("port".to_string(), "8080".to_string())]),
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            queue_capacity: default_queue_capacity(),
            export_interval: default_export_interval(),
            ring_buffer_size: default_ring_buffer_size(),
            adapters: default_adapters(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Built-in configuration used when no config file is given.
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be positive");
        }

        if self.export_interval.is_zero() {
            bail!("export_interval must be positive");
        }

        if self.ring_buffer_size == 0 {
            bail!("ring_buffer_size must be positive");
        }

        if self.adapters.is_empty() {
            bail!("at least one adapter is required");
        }

        for adapter in &self.adapters {
            if adapter.kind.is_empty() {
                bail!("adapter type must not be empty");
            }

            if adapter.kind == "prometheus" {
                if let Some(port) = adapter.settings.get("port") {
                    port.parse::<u16>()
                        .with_context(|| format!("invalid prometheus port: {port}"))?;
                }
            }
        }

        Ok(())
    }
}
