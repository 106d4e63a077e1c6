//! Monitoring configuration.
//!
//! Configuration is read from JSON into plain records. Accumulator records
//! keep their interval and time unit as strings; they are resolved into an
//! [`AccumulatorDefinition`] when the repository binds them, so an
//! unrecognized unit is reported for that accumulator alone.
//!
//! ```json
//! {
//!   "accumulators": [
//!     {
//!       "name": "OS-OpenFiles-1m",
//!       "producer_name": "OS",
//!       "stat_name": "OS",
//!       "value_name": "OpenFiles",
//!       "interval_name": "1m",
//!       "time_unit": "MILLISECONDS"
//!     }
//!   ],
//!   "max_accumulated_values": 200,
//!   "tick_interval_ms": 1000,
//!   "auto_tie_sweep_interval_ms": 5000
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::accumulator::DEFAULT_MAX_VALUES;
use crate::definition::{AccumulatorDefinition, Interval, TimeUnit};
use crate::error::{ConfigError, Result};

fn default_interval_name() -> String {
    crate::stats::DEFAULT_INTERVAL.to_string()
}

fn default_time_unit() -> String {
    TimeUnit::default().as_str().to_string()
}

fn default_max_values() -> usize {
    DEFAULT_MAX_VALUES
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_sweep_ms() -> u64 {
    5_000
}

/// One configured accumulator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorConfig {
    /// Unique accumulator name.
    pub name: String,
    /// Id of the producer to read from.
    pub producer_name: String,
    /// Name of the statistic inside the producer.
    pub stat_name: String,
    /// Which value of the statistic to accumulate.
    pub value_name: String,
    /// Interval name, `"default"` if omitted.
    #[serde(default = "default_interval_name")]
    pub interval_name: String,
    /// Time unit identifier, `"MILLISECONDS"` if omitted.
    #[serde(default = "default_time_unit")]
    pub time_unit: String,
}

impl AccumulatorConfig {
    /// Resolves this record into a definition.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidTimeUnit`] if the time unit is not recognized
    /// - [`ConfigError::InvalidInterval`] if the interval is not recognized
    pub fn to_definition(&self) -> std::result::Result<AccumulatorDefinition, ConfigError> {
        let time_unit: TimeUnit =
            self.time_unit
                .parse()
                .map_err(|_| ConfigError::InvalidTimeUnit {
                    value: self.time_unit.clone(),
                    accumulator: self.name.clone(),
                })?;

        let interval =
            Interval::parse(&self.interval_name).ok_or_else(|| ConfigError::InvalidInterval {
                value: self.interval_name.clone(),
                accumulator: self.name.clone(),
            })?;

        Ok(AccumulatorDefinition {
            name: self.name.clone(),
            producer_id: self.producer_name.clone(),
            stat_name: self.stat_name.clone(),
            value_name: self.value_name.clone(),
            interval,
            time_unit,
        })
    }
}

/// Top-level monitoring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Accumulators to bind at startup, in order.
    #[serde(default)]
    pub accumulators: Vec<AccumulatorConfig>,

    /// History capacity of every accumulator.
    #[serde(default = "default_max_values")]
    pub max_accumulated_values: usize,

    /// How often the accumulator ticker samples, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_interval_ms: u64,

    /// How often pending ties are swept, in milliseconds.
    #[serde(default = "default_sweep_ms")]
    pub auto_tie_sweep_interval_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            accumulators: Vec::new(),
            max_accumulated_values: default_max_values(),
            tick_interval_ms: default_tick_ms(),
            auto_tie_sweep_interval_ms: default_sweep_ms(),
        }
    }
}

impl MonitoringConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`], [`ConfigError::Parse`] or
    /// [`ConfigError::InvalidSetting`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::InvalidSetting`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings. Accumulator records are checked when bound.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] for a zero capacity or period.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_accumulated_values == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "max_accumulated_values",
                reason: "must be > 0".to_string(),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "tick_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.auto_tie_sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "auto_tie_sweep_interval_ms",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// The accumulator tick period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// The auto-tie sweep period.
    pub fn auto_tie_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.auto_tie_sweep_interval_ms)
    }
}
