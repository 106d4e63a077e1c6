//! Accumulators: tieables that sample a value of their statistic over time.
//!
//! An [`Accumulator`] is created untied from an [`AccumulatorDefinition`].
//! Once tied it reads one value of its statistic, converts durations into
//! the configured [`TimeUnit`](crate::definition::TimeUnit), and keeps a
//! bounded history of samples taken on [`tick`](Accumulator::tick).
//!
//! Reads never fail. An untied accumulator, a statistic that was dropped by
//! its producer, or a value name the statistic does not know all read as
//! [`Reading::NoData`].

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

use crate::definition::AccumulatorDefinition;
use crate::stats::StatValue;
use crate::tie::{TieSlot, Tieable};

/// History capacity used when none is configured.
pub const DEFAULT_MAX_VALUES: usize = 200;

/// The current value of an accumulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Nothing to report yet.
    NoData,
    /// The converted value.
    Value(f64),
}

impl Reading {
    /// Returns the value, if any.
    pub fn value(self) -> Option<f64> {
        match self {
            Self::NoData => None,
            Self::Value(v) => Some(v),
        }
    }

    /// Returns `true` for [`Reading::NoData`].
    pub fn is_no_data(self) -> bool {
        matches!(self, Self::NoData)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => f.write_str("no data"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// One sample in an accumulator's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccumulatedValue {
    /// Sample time in nanoseconds since epoch.
    pub timestamp: u64,
    /// The converted value.
    pub value: f64,
}

#[derive(Debug, Default)]
struct History {
    values: VecDeque<AccumulatedValue>,
    last_sample: Option<u64>,
}

/// A tieable that accumulates one value of its statistic.
pub struct Accumulator {
    definition: AccumulatorDefinition,
    slot: TieSlot,
    capacity: usize,
    history: Mutex<History>,
}

impl Accumulator {
    /// Creates an untied accumulator keeping at most `capacity` samples.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(definition: AccumulatorDefinition, capacity: usize) -> Self {
        Self {
            definition,
            slot: TieSlot::new(),
            capacity: capacity.max(1),
            history: Mutex::new(History::default()),
        }
    }

    /// The accumulator name.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Name of the tied statistic, if tied and still alive.
    pub fn statistic_name(&self) -> Option<String> {
        self.slot.statistic().map(|s| s.name().to_string())
    }

    /// Reads the current value from the tied statistic.
    pub fn value(&self) -> Reading {
        let Some(statistic) = self.slot.statistic() else {
            return Reading::NoData;
        };

        match statistic.value(&self.definition.value_name, self.definition.interval.name()) {
            None => Reading::NoData,
            Some(StatValue::Duration(nanos)) => {
                Reading::Value(self.definition.time_unit.convert_nanos(nanos))
            }
            Some(other) => Reading::Value(other.as_f64()),
        }
    }

    /// Samples the current value if the interval elapsed since the last sample.
    ///
    /// `now` is in nanoseconds since epoch. Returns the recorded sample, or
    /// `None` if the interval has not elapsed or there is no data.
    pub fn tick(&self, now: u64) -> Option<AccumulatedValue> {
        let mut history = self.history.lock();

        if let (Some(period), Some(last)) = (self.definition.interval.period(), history.last_sample) {
            let period_ns = u64::try_from(period.as_nanos()).unwrap_or(u64::MAX);
            if now.saturating_sub(last) < period_ns {
                return None;
            }
        }

        let value = self.value().value()?;
        let sample = AccumulatedValue {
            timestamp: now,
            value,
        };

        history.values.push_back(sample);
        while history.values.len() > self.capacity {
            history.values.pop_front();
        }
        history.last_sample = Some(now);

        Some(sample)
    }

    /// All samples in the history, oldest first.
    pub fn values(&self) -> Vec<AccumulatedValue> {
        self.history.lock().values.iter().copied().collect()
    }

    /// The most recent sample.
    pub fn last_value(&self) -> Option<AccumulatedValue> {
        self.history.lock().values.back().copied()
    }

    /// Maximum number of samples kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Tieable for Accumulator {
    type Definition = AccumulatorDefinition;

    fn definition(&self) -> &AccumulatorDefinition {
        &self.definition
    }

    fn slot(&self) -> &TieSlot {
        &self.slot
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("name", &self.definition.name)
            .field("tied", &self.slot.is_tied())
            .field("samples", &self.history.lock().values.len())
            .finish_non_exhaustive()
    }
}
