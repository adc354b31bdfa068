use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Primary scroll axis. The math is axis-agnostic; the renderer decides
/// what "primary" means on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Vertical,
    Horizontal,
}

/// Engine configuration. Unknown keys are rejected; every numeric field is
/// validated at construction and invalid values are fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Block size `B`: granularity of loading and block-state tracking.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Fallback primary-axis size for unmeasured items, in pixels.
    #[serde(default = "default_estimated_item_size")]
    pub estimated_item_size: f32,
    /// Indices kept rendered outside the strictly visible window.
    #[serde(default = "default_overscan")]
    pub overscan: u32,
    /// Loader concurrency cap.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    /// Loader queue cap; overflow drops the oldest entry.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: u32,
    /// Velocity (px/ms) above which load requests are dropped.
    #[serde(default = "default_cancel_threshold")]
    pub cancel_threshold: f32,
    /// LRU cap on measured item sizes.
    #[serde(default = "default_measurement_cache_cap")]
    pub measurement_cache_cap: u32,
    /// First retry window after a block load failure.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u32,
    /// Upper bound on the exponential retry window.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u32,
    #[serde(default)]
    pub orientation: Orientation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            estimated_item_size: default_estimated_item_size(),
            overscan: default_overscan(),
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            cancel_threshold: default_cancel_threshold(),
            measurement_cache_cap: default_measurement_cache_cap(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            orientation: Orientation::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML fragment. Missing keys fall back to defaults, unknown
    /// keys are an error.
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let config: EngineConfig =
            toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.page_size == 0 {
            return Err(EngineError::Config("page_size must be at least 1".into()));
        }
        if !(self.estimated_item_size > 0.0) || !self.estimated_item_size.is_finite() {
            return Err(EngineError::Config(
                "estimated_item_size must be a positive finite number".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(EngineError::Config(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(EngineError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if !(self.cancel_threshold > 0.0) || !self.cancel_threshold.is_finite() {
            return Err(EngineError::Config(
                "cancel_threshold must be a positive finite number".into(),
            ));
        }
        if self.measurement_cache_cap == 0 {
            return Err(EngineError::Config(
                "measurement_cache_cap must be at least 1".into(),
            ));
        }
        if self.backoff_base_ms == 0 {
            return Err(EngineError::Config(
                "backoff_base_ms must be at least 1".into(),
            ));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(EngineError::Config(
                "backoff_cap_ms must not be below backoff_base_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_page_size() -> u32 {
    20
}
fn default_estimated_item_size() -> f32 {
    50.0
}
fn default_overscan() -> u32 {
    5
}
fn default_max_concurrent() -> u32 {
    1
}
fn default_queue_capacity() -> u32 {
    50
}
fn default_cancel_threshold() -> f32 {
    1.0
}
fn default_measurement_cache_cap() -> u32 {
    500
}
fn default_backoff_base_ms() -> u32 {
    1000
}
fn default_backoff_cap_ms() -> u32 {
    30000
}
