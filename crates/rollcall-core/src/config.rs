//! Matching and learning settings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LOW_THRESHOLD: f32 = 50.0;
pub const DEFAULT_HIGH_THRESHOLD: f32 = 60.0;
pub const DEFAULT_MAX_ENCODINGS: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("threshold {name} = {value} is outside [0, 100]")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("low_threshold ({low}) must be below high_threshold ({high})")]
    ThresholdOrder { low: f32, high: f32 },
    #[error("max_encodings must be at least 1")]
    ZeroCapacity,
}

/// Engine settings. Thresholds are confidence percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Below this confidence a probe is Unknown.
    pub low_threshold: f32,
    /// At or above this confidence a probe is High and auto-confirmed.
    pub high_threshold: f32,
    /// Whether confirmed probes are added to the student's gallery.
    pub adaptive_learning: bool,
    /// Gallery capacity per student.
    pub max_encodings: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            low_threshold: DEFAULT_LOW_THRESHOLD,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
            adaptive_learning: true,
            max_encodings: DEFAULT_MAX_ENCODINGS,
        }
    }
}

impl EngineConfig {
    /// Check `0 <= low < high <= 100` and `max_encodings >= 1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("low_threshold", self.low_threshold),
            ("high_threshold", self.high_threshold),
        ] {
            // NaN fails this range check too.
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.low_threshold >= self.high_threshold {
            return Err(ConfigError::ThresholdOrder {
                low: self.low_threshold,
                high: self.high_threshold,
            });
        }
        if self.max_encodings == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }

    /// Validate and return self, for use at load time.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}
