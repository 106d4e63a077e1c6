//! Producers: runtime components that expose named statistics.
//!
//! A producer has a stable identifier, a category, a subsystem and the list
//! of statistics it currently owns. Producers come in two kinds:
//!
//! - [`ProducerKind::Eager`] producers create every statistic up front. A
//!   statistic missing from an eager producer will never appear.
//! - [`ProducerKind::OnDemand`] producers create statistics lazily, for
//!   example one per monitored method on its first call. Their statistic list
//!   may grow at any point during the process lifetime.
//!
//! Producers announce changes to their statistic set in two ways: a
//! monotonically increasing [`Producer::version`] counter, and change events
//! delivered to subscribed [`StatisticsListener`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::stats::Statistic;

/// Subsystem reported by producers that do not name one.
pub const DEFAULT_SUBSYSTEM: &str = "default";

/// Whether a producer creates its statistics up front or lazily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProducerKind {
    /// All statistics exist once the producer is registered.
    Eager,
    /// Statistics may be created at any time after registration.
    OnDemand,
}

/// Receives notifications when a producer's statistic set changes.
pub trait StatisticsListener: Send + Sync {
    /// Called after the producer with the given id added statistics.
    fn statistics_changed(&self, producer_id: &str);
}

/// A source of live statistics.
///
/// # Contract
///
/// Implementations that can change their statistic set must report
/// [`ProducerKind::OnDemand`], increment [`version`](Producer::version)
/// after every change and notify subscribers. The defaults describe an eager
/// producer whose statistic set never changes.
pub trait Producer: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Category, e.g. `"os"` or `"service"`.
    fn category(&self) -> &str;

    /// Subsystem the producer belongs to.
    fn subsystem(&self) -> &str {
        DEFAULT_SUBSYSTEM
    }

    /// Snapshot of the statistics the producer currently exposes.
    fn statistics(&self) -> Vec<Arc<dyn Statistic>>;

    /// Whether statistics may appear after registration.
    fn kind(&self) -> ProducerKind {
        ProducerKind::Eager
    }

    /// Snapshot version of the statistic set.
    fn version(&self) -> u64 {
        0
    }

    /// Subscribes to statistic set changes. Eager producers ignore this.
    fn subscribe(&self, listener: Weak<dyn StatisticsListener>) {
        let _ = listener;
    }
}

impl fmt::Debug for dyn Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.id())
            .field("category", &self.category())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// A list of weakly held listeners for producer implementations.
///
/// Dead listeners are pruned on every notification. The internal lock is
/// released before any listener runs, so listeners may call back into the
/// producer.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Weak<dyn StatisticsListener>>>,
}

impl ListenerSet {
    /// Creates an empty listener set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add(&self, listener: Weak<dyn StatisticsListener>) {
        self.listeners.lock().push(listener);
    }

    /// Notifies every live listener that `producer_id` changed.
    pub fn notify(&self, producer_id: &str) {
        let live: Vec<Arc<dyn StatisticsListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            listener.statistics_changed(producer_id);
        }
    }

    /// Number of listeners still alive.
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live listener is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

/// An eager producer with a fixed list of statistics.
#[derive(Debug)]
pub struct StaticProducer {
    id: String,
    category: String,
    subsystem: String,
    statistics: Vec<Arc<dyn Statistic>>,
}

impl StaticProducer {
    /// Creates a producer with no statistics.
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            subsystem: DEFAULT_SUBSYSTEM.to_string(),
            statistics: Vec::new(),
        }
    }

    /// Sets the subsystem.
    #[must_use]
    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    /// Adds a statistic.
    #[must_use]
    pub fn with_statistic(mut self, statistic: Arc<dyn Statistic>) -> Self {
        self.statistics.push(statistic);
        self
    }
}

impl Producer for StaticProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    fn statistics(&self) -> Vec<Arc<dyn Statistic>> {
        self.statistics.clone()
    }
}

type Factory<S> = Box<dyn Fn(&str) -> S + Send + Sync>;

struct OnDemandInner<S> {
    ordered: Vec<Arc<S>>,
    by_name: HashMap<String, Arc<S>>,
}

/// A producer that creates statistics lazily, on first use.
///
/// Statistics are created by a factory closure the first time
/// [`get_or_create`](OnDemandProducer::get_or_create) sees a name. Every
/// creation bumps the version counter and notifies subscribed listeners.
pub struct OnDemandProducer<S> {
    id: String,
    category: String,
    subsystem: String,
    factory: Factory<S>,
    inner: RwLock<OnDemandInner<S>>,
    version: AtomicU64,
    listeners: ListenerSet,
}

impl<S: Statistic + 'static> OnDemandProducer<S> {
    /// Creates an on-demand producer with a statistic factory.
    pub fn new<F>(id: impl Into<String>, category: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str) -> S + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            category: category.into(),
            subsystem: DEFAULT_SUBSYSTEM.to_string(),
            factory: Box::new(factory),
            inner: RwLock::new(OnDemandInner {
                ordered: Vec::new(),
                by_name: HashMap::new(),
            }),
            version: AtomicU64::new(0),
            listeners: ListenerSet::new(),
        }
    }

    /// Sets the subsystem.
    #[must_use]
    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = subsystem.into();
        self
    }

    /// Returns the statistic with the given name, creating it if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<S> {
        if let Some(existing) = self.inner.read().by_name.get(name) {
            return Arc::clone(existing);
        }

        let created = {
            let mut inner = self.inner.write();
            if let Some(existing) = inner.by_name.get(name) {
                return Arc::clone(existing);
            }
            let created = Arc::new((self.factory)(name));
            inner.ordered.push(Arc::clone(&created));
            inner.by_name.insert(name.to_string(), Arc::clone(&created));
            self.version.fetch_add(1, Ordering::AcqRel);
            created
        };

        tracing::debug!(producer = %self.id, statistic = name, "created statistic on demand");
        self.listeners.notify(&self.id);
        created
    }

    /// Returns the statistic with the given name, if it was created.
    pub fn get(&self, name: &str) -> Option<Arc<S>> {
        self.inner.read().by_name.get(name).cloned()
    }

    /// Number of statistics created so far.
    pub fn len(&self) -> usize {
        self.inner.read().ordered.len()
    }

    /// Returns `true` if no statistic was created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Statistic + 'static> Producer for OnDemandProducer<S> {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    fn statistics(&self) -> Vec<Arc<dyn Statistic>> {
        self.inner
            .read()
            .ordered
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn Statistic>)
            .collect()
    }

    fn kind(&self) -> ProducerKind {
        ProducerKind::OnDemand
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn subscribe(&self, listener: Weak<dyn StatisticsListener>) {
        self.listeners.add(listener);
    }
}

impl<S> fmt::Debug for OnDemandProducer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandProducer")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("version", &self.version.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Result of looking a statistic up in a [`StatisticIndex`].
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Exactly one statistic carries the name.
    Found(Arc<dyn Statistic>),
    /// No statistic carries the name.
    Missing,
    /// More than one statistic carries the name.
    Ambiguous(usize),
}

/// A name to statistic lookup table over one producer snapshot.
///
/// Duplicate names are kept rather than collapsed, so a lookup of a
/// duplicated name reports [`Lookup::Ambiguous`] instead of silently picking
/// one of the candidates.
#[derive(Debug, Default)]
pub struct StatisticIndex {
    version: u64,
    by_name: HashMap<String, Vec<Arc<dyn Statistic>>>,
}

impl StatisticIndex {
    /// Builds an index from a producer's current statistics.
    ///
    /// The version is read before the snapshot, so an index never claims a
    /// newer version than the statistics it holds.
    pub fn of(producer: &dyn Producer) -> Self {
        let version = producer.version();
        Self::build(version, producer.statistics())
    }

    /// Builds an index from an explicit snapshot.
    pub fn build(version: u64, statistics: Vec<Arc<dyn Statistic>>) -> Self {
        let mut by_name: HashMap<String, Vec<Arc<dyn Statistic>>> = HashMap::new();
        for statistic in statistics {
            by_name
                .entry(statistic.name().to_string())
                .or_default()
                .push(statistic);
        }
        Self { version, by_name }
    }

    /// Looks up a statistic by exact name.
    pub fn find(&self, name: &str) -> Lookup {
        match self.by_name.get(name).map(Vec::as_slice) {
            None | Some([]) => Lookup::Missing,
            Some([single]) => Lookup::Found(Arc::clone(single)),
            Some(many) => Lookup::Ambiguous(many.len()),
        }
    }

    /// The producer version this index was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of distinct statistic names.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns `true` if the snapshot held no statistics.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::stats::{GenericStats, ValueKind};

    fn gauge(name: &str) -> Arc<dyn Statistic> {
        Arc::new(GenericStats::new(name, [("value", ValueKind::Gauge)]))
    }

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
    }

    impl StatisticsListener for CountingListener {
        fn statistics_changed(&self, _producer_id: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_static_producer_is_eager() {
        let producer = StaticProducer::new("X", "service")
            .with_subsystem("api")
            .with_statistic(gauge("latency"))
            .with_statistic(gauge("errors"));

        assert_eq!(producer.id(), "X");
        assert_eq!(producer.subsystem(), "api");
        assert_eq!(producer.kind(), ProducerKind::Eager);
        assert_eq!(producer.version(), 0);

        let names: Vec<_> = producer
            .statistics()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["latency", "errors"]);
    }

    #[test]
    fn test_on_demand_creation_bumps_version_once() {
        let producer = OnDemandProducer::new("Y", "queue", |name| {
            GenericStats::new(name, [("depth", ValueKind::Gauge)])
        });
        assert!(producer.is_empty());
        assert_eq!(producer.kind(), ProducerKind::OnDemand);

        let first = producer.get_or_create("queueDepth");
        let again = producer.get_or_create("queueDepth");

        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(producer.version(), 1);
        assert_eq!(producer.len(), 1);
        assert!(producer.get("other").is_none());
    }

    #[test]
    fn test_on_demand_notifies_live_listeners_only() {
        let producer = OnDemandProducer::new("Y", "queue", |name| {
            GenericStats::new(name, [("depth", ValueKind::Gauge)])
        });

        let live = Arc::new(CountingListener::default());
        let live_dyn: Arc<dyn StatisticsListener> = live.clone();
        producer.subscribe(Arc::downgrade(&live_dyn));

        {
            let dropped: Arc<dyn StatisticsListener> = Arc::new(CountingListener::default());
            producer.subscribe(Arc::downgrade(&dropped));
        }

        producer.get_or_create("a");
        producer.get_or_create("a");
        producer.get_or_create("b");

        assert_eq!(live.calls.load(Ordering::SeqCst), 2);
        assert_eq!(producer.listeners.len(), 1);
    }

    #[test]
    fn test_index_reports_missing_and_ambiguous() {
        let producer = StaticProducer::new("X", "service")
            .with_statistic(gauge("latency"))
            .with_statistic(gauge("errors"))
            .with_statistic(gauge("errors"));

        let index = StatisticIndex::of(&producer);
        assert_eq!(index.len(), 2);

        match index.find("latency") {
            Lookup::Found(s) => assert_eq!(s.name(), "latency"),
            other => panic!("expected a match, got {other:?}"),
        }
        assert!(matches!(index.find("errors"), Lookup::Ambiguous(2)));
        assert!(matches!(index.find("missing"), Lookup::Missing));
        assert!(StatisticIndex::build(0, Vec::new()).is_empty());
    }
}
