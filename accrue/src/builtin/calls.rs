//! Built-in on-demand producer counting method calls.
//!
//! Each method name gets its own [`CallStats`] the first time a call is
//! recorded for it. Accumulators configured for a method that has not been
//! called yet stay pending and tie on the first call.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::producer::{OnDemandProducer, Producer, ProducerKind, StatisticsListener};
use crate::stats::{StatValue, Statistic};

use super::BUILTIN_SUBSYSTEM;

/// Call counters for one method.
///
/// Values: `req` (calls), `err` (failed calls), `time` (total duration)
/// and `avg` (mean duration per call).
pub struct CallStats {
    name: String,
    requests: AtomicU64,
    errors: AtomicU64,
    total_nanos: AtomicU64,
}

impl CallStats {
    /// Creates zeroed counters for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            total_nanos: AtomicU64::new(0),
        }
    }

    /// Records one call.
    pub fn record(&self, duration: Duration, failed: bool) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of recorded calls.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Number of failed calls.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Statistic for CallStats {
    fn name(&self) -> &str {
        &self.name
    }

    fn value_names(&self) -> Vec<String> {
        ["req", "err", "time", "avg"].map(String::from).to_vec()
    }

    fn value(&self, value_name: &str, _interval: &str) -> Option<StatValue> {
        match value_name {
            "req" => Some(StatValue::Count(self.requests())),
            "err" => Some(StatValue::Count(self.errors())),
            "time" => Some(StatValue::Duration(self.total_nanos.load(Ordering::Relaxed))),
            "avg" => {
                let requests = self.requests();
                let total = self.total_nanos.load(Ordering::Relaxed);
                Some(StatValue::Duration(total.checked_div(requests).unwrap_or(0)))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for CallStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStats")
            .field("name", &self.name)
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish_non_exhaustive()
    }
}

/// On-demand producer with one [`CallStats`] per method.
#[derive(Debug)]
pub struct MethodCallProducer {
    inner: OnDemandProducer<CallStats>,
}

impl MethodCallProducer {
    /// Creates a producer with the given id and category.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            inner: OnDemandProducer::new(id, category, |name: &str| CallStats::new(name))
                .with_subsystem(BUILTIN_SUBSYSTEM),
        }
    }

    /// Records a call of `method`, creating its statistic on first use.
    pub fn record_call(&self, method: &str, duration: Duration, failed: bool) {
        self.inner.get_or_create(method).record(duration, failed);
    }

    /// Counters of `method`, if it was called.
    pub fn method(&self, method: &str) -> Option<Arc<CallStats>> {
        self.inner.get(method)
    }
}

impl Producer for MethodCallProducer {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn category(&self) -> &str {
        self.inner.category()
    }

    fn subsystem(&self) -> &str {
        self.inner.subsystem()
    }

    fn statistics(&self) -> Vec<Arc<dyn Statistic>> {
        self.inner.statistics()
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::OnDemand
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }

    fn subscribe(&self, listener: Weak<dyn StatisticsListener>) {
        self.inner.subscribe(listener);
    }
}
