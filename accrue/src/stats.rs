//! Statistic objects exposed by producers.
//!
//! A [`Statistic`] is a named, live value object owned by exactly one
//! producer. Instrumented code updates it on the hot path; this crate only
//! ever reads it, so every read here must be safe to run concurrently with
//! writers. The implementations in this module store their values in
//! atomics for that reason.
//!
//! # Example
//!
//! ```rust
//! use accrue::stats::{GenericStats, StatValue, Statistic, ValueKind};
//!
//! let stats = GenericStats::new("queue", [
//!     ("depth", ValueKind::Gauge),
//!     ("processed", ValueKind::Count),
//! ]);
//! stats.set("depth", 12.0);
//! stats.add("processed", 3.0);
//!
//! assert_eq!(stats.value("depth", "default"), Some(StatValue::Gauge(12.0)));
//! assert_eq!(stats.value("processed", "default"), Some(StatValue::Count(3)));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Interval name used when a statistic does not track separate intervals.
pub const DEFAULT_INTERVAL: &str = "default";

/// A single value read from a statistic.
///
/// Values are typed so that consumers can convert durations into the time
/// unit they were configured with while leaving counts and gauges untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatValue {
    /// A monotonically increasing count.
    Count(u64),
    /// A point-in-time measurement.
    Gauge(f64),
    /// A duration, in nanoseconds.
    Duration(u64),
}

impl StatValue {
    /// Returns the raw numeric value without any unit conversion.
    #[allow(clippy::cast_precision_loss)] // counts beyond 2^53 lose precision, acceptable for reporting
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Count(v) | Self::Duration(v) => v as f64,
            Self::Gauge(v) => v,
        }
    }
}

/// The kind of a value slot inside a [`GenericStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Read back as [`StatValue::Count`].
    Count,
    /// Read back as [`StatValue::Gauge`].
    Gauge,
    /// Read back as [`StatValue::Duration`], stored in nanoseconds.
    Duration,
}

/// A named live value object exposed by a producer.
///
/// Implementations must tolerate `value` being called from any thread while
/// the owning subsystem updates the statistic.
pub trait Statistic: Send + Sync {
    /// The statistic's name, unique within its producer.
    fn name(&self) -> &str;

    /// Names of the values this statistic can report.
    fn value_names(&self) -> Vec<String>;

    /// Reads a value by name for the given interval.
    ///
    /// Returns `None` if the value name or the interval is unknown.
    /// Statistics that do not track intervals separately answer every
    /// interval with their current value.
    fn value(&self, value_name: &str, interval: &str) -> Option<StatValue>;
}

impl fmt::Debug for dyn Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statistic")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// An `f64` stored in an `AtomicU64` bit pattern.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug)]
struct Slot {
    name: String,
    kind: ValueKind,
    value: AtomicF64,
}

/// A statistic with a fixed set of atomically updated values.
///
/// Suitable for producers exposing plain counters and gauges. The value set
/// is fixed at construction; updates to unknown value names are ignored.
#[derive(Debug)]
pub struct GenericStats {
    name: String,
    slots: Vec<Slot>,
}

impl GenericStats {
    /// Creates a statistic with the given value names and kinds, all zero.
    pub fn new<I, N>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (N, ValueKind)>,
        N: Into<String>,
    {
        Self {
            name: name.into(),
            slots: values
                .into_iter()
                .map(|(name, kind)| Slot {
                    name: name.into(),
                    kind,
                    value: AtomicF64::default(),
                })
                .collect(),
        }
    }

    /// Overwrites a value. Returns `false` if the value name is unknown.
    pub fn set(&self, value_name: &str, value: f64) -> bool {
        let Some(slot) = self.slot(value_name) else {
            return false;
        };
        slot.value.store(value);
        true
    }

    /// Adds to a value. Returns `false` if the value name is unknown.
    pub fn add(&self, value_name: &str, delta: f64) -> bool {
        let Some(slot) = self.slot(value_name) else {
            return false;
        };
        slot.value.add(delta);
        true
    }

    fn slot(&self, value_name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == value_name)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // stored values are non-negative whole numbers
fn to_u64(value: f64) -> u64 {
    value.max(0.0).round() as u64
}

impl Statistic for GenericStats {
    fn name(&self) -> &str {
        &self.name
    }

    fn value_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name.clone()).collect()
    }

    fn value(&self, value_name: &str, _interval: &str) -> Option<StatValue> {
        let slot = self.slot(value_name)?;
        let raw = slot.value.load();
        Some(match slot.kind {
            ValueKind::Count => StatValue::Count(to_u64(raw)),
            ValueKind::Gauge => StatValue::Gauge(raw),
            ValueKind::Duration => StatValue::Duration(to_u64(raw)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_generic_stats_typed_reads() {
        let stats = GenericStats::new(
            "os",
            [
                ("open", ValueKind::Count),
                ("load", ValueKind::Gauge),
                ("cpu", ValueKind::Duration),
            ],
        );

        assert!(stats.set("open", 17.0));
        assert!(stats.set("load", 0.75));
        assert!(stats.set("cpu", 1_500_000.0));

        assert_eq!(stats.value("open", DEFAULT_INTERVAL), Some(StatValue::Count(17)));
        assert_eq!(stats.value("load", "1m"), Some(StatValue::Gauge(0.75)));
        assert_eq!(
            stats.value("cpu", DEFAULT_INTERVAL),
            Some(StatValue::Duration(1_500_000))
        );
        assert_eq!(stats.value("missing", DEFAULT_INTERVAL), None);
        assert!(!stats.set("missing", 1.0));
        assert_eq!(stats.value_names(), vec!["open", "load", "cpu"]);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let stats = Arc::new(GenericStats::new("calls", [("req", ValueKind::Count)]));

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.add("req", 1.0);
                    }
                })
            })
            .collect();

        // Reads race with the writers and must never fail.
        for _ in 0..100 {
            assert!(stats.value("req", DEFAULT_INTERVAL).is_some());
        }

        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(stats.value("req", DEFAULT_INTERVAL), Some(StatValue::Count(4000)));
    }
}
