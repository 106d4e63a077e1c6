//! Definitions: immutable records describing a desired binding.
//!
//! A [`Definition`] names a producer and a statistic inside it. Concrete
//! definition types add whatever their tieable needs; an
//! [`AccumulatorDefinition`] adds the value name to read, the sampling
//! [`Interval`] and the [`TimeUnit`] durations are reported in.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TieError;

/// A declared intent to bind to a statistic of a producer.
pub trait Definition: Clone + Send + Sync + 'static {
    /// Unique name of the definition.
    fn name(&self) -> &str;

    /// Id of the producer owning the target statistic.
    fn producer_id(&self) -> &str;

    /// Name of the target statistic.
    fn stat_name(&self) -> &str;

    /// Checks that the definition can be bound at all.
    ///
    /// # Errors
    ///
    /// Returns [`TieError::InvalidDefinition`] if the name, producer id or
    /// statistic name is empty.
    fn validate(&self) -> Result<(), TieError> {
        require_fields(self)
    }
}

/// Fails if any of the fields every definition shares is blank.
fn require_fields<D: Definition>(definition: &D) -> Result<(), TieError> {
    let blank = [
        ("name", definition.name()),
        ("producer id", definition.producer_id()),
        ("statistic name", definition.stat_name()),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    match blank {
        Some((field, _)) => Err(TieError::InvalidDefinition {
            definition: definition.name().to_string(),
            reason: format!("{field} must not be empty"),
        }),
        None => Ok(()),
    }
}

/// Unit that duration values are converted into when read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    /// Nanoseconds (no conversion).
    Nanoseconds,
    /// Microseconds.
    Microseconds,
    /// Milliseconds.
    #[default]
    Milliseconds,
    /// Seconds.
    Seconds,
}

impl TimeUnit {
    /// Every recognized unit.
    pub const ALL: [Self; 4] = [
        Self::Nanoseconds,
        Self::Microseconds,
        Self::Milliseconds,
        Self::Seconds,
    ];

    /// Canonical identifier used in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nanoseconds => "NANOSECONDS",
            Self::Microseconds => "MICROSECONDS",
            Self::Milliseconds => "MILLISECONDS",
            Self::Seconds => "SECONDS",
        }
    }

    /// Converts a nanosecond duration into this unit.
    ///
    /// ```rust
    /// use accrue::definition::TimeUnit;
    ///
    /// assert_eq!(TimeUnit::Milliseconds.convert_nanos(2_500_000), 2.5);
    /// assert_eq!(TimeUnit::Nanoseconds.convert_nanos(42), 42.0);
    /// ```
    #[allow(clippy::cast_precision_loss)] // reporting values, not exact arithmetic
    pub fn convert_nanos(self, nanos: u64) -> f64 {
        let nanos = nanos as f64;
        match self {
            Self::Nanoseconds => nanos,
            Self::Microseconds => nanos / 1_000.0,
            Self::Milliseconds => nanos / 1_000_000.0,
            Self::Seconds => nanos / 1_000_000_000.0,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no [`TimeUnit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTimeUnit;

impl FromStr for TimeUnit {
    type Err = UnknownTimeUnit;

    /// Parses a unit identifier, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or(UnknownTimeUnit)
    }
}

/// Name of the interval that is sampled on every tick.
pub const SNAPSHOT_INTERVAL: &str = "snapshot";

/// Sampling cadence of an accumulator, and the interval read from its statistic.
///
/// `"default"` and `"snapshot"` have no period and are sampled on every tick.
/// Named intervals are a positive number followed by `s`, `m`, `h` or `d`,
/// e.g. `"1m"`, `"15m"`, `"1h"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval {
    name: String,
    period: Option<Duration>,
}

impl Interval {
    /// Parses an interval name, returning `None` if it is not recognized.
    ///
    /// ```rust
    /// use accrue::definition::Interval;
    /// use std::time::Duration;
    ///
    /// assert_eq!(Interval::parse("5m").and_then(|i| i.period()), Some(Duration::from_secs(300)));
    /// assert_eq!(Interval::parse("default").and_then(|i| i.period()), None);
    /// assert!(Interval::parse("fortnight").is_none());
    /// ```
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name == crate::stats::DEFAULT_INTERVAL || name == SNAPSHOT_INTERVAL {
            return Some(Self {
                name: name.to_string(),
                period: None,
            });
        }

        let (split, _) = name.char_indices().last()?;
        let (amount, suffix) = name.split_at(split);
        let amount: u64 = amount.parse().ok().filter(|&n| n > 0)?;
        let seconds = match suffix {
            "s" => amount,
            "m" => amount.checked_mul(60)?,
            "h" => amount.checked_mul(3_600)?,
            "d" => amount.checked_mul(86_400)?,
            _ => return None,
        };

        Some(Self {
            name: name.to_string(),
            period: Some(Duration::from_secs(seconds)),
        })
    }

    /// The interval sampled on every tick.
    pub fn default_interval() -> Self {
        Self {
            name: crate::stats::DEFAULT_INTERVAL.to_string(),
            period: None,
        }
    }

    /// The interval name as configured.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum time between two samples, `None` to sample on every tick.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::default_interval()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("unrecognized interval '{value}'"))
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.name
    }
}

/// Definition of an accumulator.
///
/// Reads `value_name` of statistic `stat_name` in producer `producer_id`,
/// sampled every `interval`, with durations expressed in `time_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorDefinition {
    /// Unique accumulator name.
    pub name: String,
    /// Id of the producer owning the statistic.
    pub producer_id: String,
    /// Name of the statistic inside the producer.
    pub stat_name: String,
    /// Which value of the statistic to accumulate.
    pub value_name: String,
    /// Sampling cadence, also passed to the statistic as interval name.
    pub interval: Interval,
    /// Unit duration values are converted into.
    pub time_unit: TimeUnit,
}

impl AccumulatorDefinition {
    /// Creates a definition sampled on every tick, in milliseconds.
    pub fn new(
        name: impl Into<String>,
        producer_id: impl Into<String>,
        stat_name: impl Into<String>,
        value_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            producer_id: producer_id.into(),
            stat_name: stat_name.into(),
            value_name: value_name.into(),
            interval: Interval::default(),
            time_unit: TimeUnit::default(),
        }
    }

    /// Sets the interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the time unit.
    #[must_use]
    pub fn with_time_unit(mut self, time_unit: TimeUnit) -> Self {
        self.time_unit = time_unit;
        self
    }
}

impl Definition for AccumulatorDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn stat_name(&self) -> &str {
        &self.stat_name
    }

    fn validate(&self) -> Result<(), TieError> {
        if self.value_name.trim().is_empty() {
            return Err(TieError::InvalidDefinition {
                definition: self.name.clone(),
                reason: "value name must not be empty".to_string(),
            });
        }
        require_fields(self)
    }
}
