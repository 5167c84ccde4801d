//! `dgrpcd.toml` configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServeConfig {
    /// Address to bind the datagram socket on.
    #[serde(default = "ServeConfig::default_bind")]
    pub bind: String,
    /// Requested send-buffer size; 0 picks a family-aware default
    /// (`dgrpc_core::sizing`).
    #[serde(default)]
    pub send_sz: usize,
    /// Requested recv-buffer size; 0 picks a family-aware default.
    #[serde(default)]
    pub recv_sz: usize,
    /// Duplicate-reply cache capacity. Omit to run without a cache.
    #[serde(default = "ServeConfig::default_cache_size")]
    pub cache_size: Option<usize>,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "ServeConfig::default_log_filter")]
    pub log_filter: String,
}

impl ServeConfig {
    fn default_bind() -> String {
        "0.0.0.0:9111".into()
    }
    fn default_cache_size() -> Option<usize> {
        Some(64)
    }
    fn default_log_filter() -> String {
        "warn".into()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn default_example() -> Self {
        Self {
            bind: Self::default_bind(),
            send_sz: 0,
            recv_sz: 0,
            cache_size: Self::default_cache_size(),
            log_filter: Self::default_log_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_round_trips_through_toml() {
        let example = ServeConfig::default_example();
        let text = toml::to_string_pretty(&example).unwrap();
        let parsed: ServeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.bind, example.bind);
        assert_eq!(parsed.cache_size, example.cache_size);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let parsed: ServeConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.bind, ServeConfig::default_bind());
        assert_eq!(parsed.cache_size, ServeConfig::default_cache_size());
    }
}
