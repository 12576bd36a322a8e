use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::packet::LayerId;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfigInput {
    pub version: u32,
    pub fanout: FanOutConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FanOutConfigInput {
    pub max_subscribers: Option<usize>,
    pub pli_interval_ms: Option<u64>,
    pub default_spatial_layer: Option<LayerId>,
    pub default_temporal_layer: Option<LayerId>,
}

/// Settings for a one-to-many relay stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutConfig {
    /// Upper bound on attached subscribers.
    pub max_subscribers: usize,
    /// Minimum spacing between keyframe requests forwarded to the publisher.
    pub pli_interval: Duration,
    /// Spatial tier given to subscribers that don't ask for one
    /// (`None` forwards every layer).
    pub default_spatial_layer: Option<LayerId>,
    pub default_temporal_layer: Option<LayerId>,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 64,
            pli_interval: Duration::from_millis(1000),
            default_spatial_layer: None,
            default_temporal_layer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayConfig {
    pub version: u32,
    pub fanout: FanOutConfig,
}

impl RelayConfigInput {
    pub fn resolve(self) -> Result<RelayConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = FanOutConfig::default();
        let max_subscribers = self
            .fanout
            .max_subscribers
            .unwrap_or(defaults.max_subscribers);
        if max_subscribers == 0 {
            return Err(ConfigError::Invalid {
                field: "fanout.max_subscribers",
                reason: "must be at least 1",
            });
        }

        let fanout = FanOutConfig {
            max_subscribers,
            pli_interval: self
                .fanout
                .pli_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pli_interval),
            default_spatial_layer: self.fanout.default_spatial_layer,
            default_temporal_layer: self.fanout.default_temporal_layer,
        };

        Ok(RelayConfig { version, fanout })
    }
}

impl RelayConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let parsed: RelayConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading relay config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing relay config {}", path.display()))
    }
}
