//! Generic tie engine.
//!
//! The engine turns [`Definition`]s into [`Tieable`]s and binds them to the
//! statistic they name. What a tieable is and how a statistic is matched are
//! supplied by a [`Binder`]; the engine owns everything around it:
//!
//! 1. validate the definition
//! 2. resolve the producer through the [`ProducerRegistry`]
//! 3. create the tieable through [`Binder::create`]
//! 4. attempt an immediate tie through [`Binder::tie`]
//! 5. store the tieable in the live collection
//! 6. hand pending tieables to the [`AutoTieQueue`]
//!
//! A definition whose producer is unknown, or whose statistic is missing from
//! an eager producer, fails and is never stored.
//!
//! # Locking
//!
//! The live collection is a `RwLock<Vec<Arc<_>>>`. Readers clone the `Arc`s
//! and release the lock before touching any statistic. Lock order is live
//! collection, then producer internals. The pending queue lock is never held
//! while a producer or the binder runs.
//!
//! Statistic lookup tables are built per attempt and dropped afterwards, so
//! the engine never keeps a statistic alive past its producer.

pub mod auto;

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use crate::definition::Definition;
use crate::error::TieError;
use crate::producer::{Producer, StatisticIndex};
use crate::registry::ProducerRegistry;
use crate::stats::Statistic;

pub use auto::{AutoTieQueue, RetryReport};

/// Outcome of a successful tie attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieOutcome {
    /// The tieable now references its statistic.
    Tied,
    /// The statistic does not exist yet; the tieable waits for auto-tie.
    Pending,
}

/// Write-once, non-owning reference from a tieable to its statistic.
///
/// Once set, the reference is never replaced. The statistic stays owned by
/// its producer; if the producer drops it, reads through the slot return
/// `None`.
#[derive(Default)]
pub struct TieSlot {
    statistic: OnceLock<Weak<dyn Statistic>>,
}

impl TieSlot {
    /// Creates an untied slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ties the slot to a statistic.
    ///
    /// Returns `true` if this call tied the slot, `false` if it was already
    /// tied (in which case the existing reference is kept).
    pub fn tie(&self, statistic: &Arc<dyn Statistic>) -> bool {
        self.statistic.set(Arc::downgrade(statistic)).is_ok()
    }

    /// Whether the slot was ever tied.
    pub fn is_tied(&self) -> bool {
        self.statistic.get().is_some()
    }

    /// The tied statistic, if tied and still alive.
    pub fn statistic(&self) -> Option<Arc<dyn Statistic>> {
        self.statistic.get().and_then(Weak::upgrade)
    }

    /// Whether the slot references exactly this statistic instance.
    pub fn is_tied_to(&self, statistic: &Arc<dyn Statistic>) -> bool {
        self.statistic()
            .is_some_and(|tied| Arc::ptr_eq(&tied, statistic))
    }
}

impl fmt::Debug for TieSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieSlot")
            .field("tied", &self.is_tied())
            .field("statistic", &self.statistic().map(|s| s.name().to_string()))
            .finish()
    }
}

/// A definition paired with a (possibly unresolved) binding to a statistic.
pub trait Tieable: Send + Sync + 'static {
    /// The definition type this tieable is created from.
    type Definition: Definition;

    /// The originating definition.
    fn definition(&self) -> &Self::Definition;

    /// The slot holding the binding.
    fn slot(&self) -> &TieSlot;

    /// Whether the tieable was tied.
    fn is_tied(&self) -> bool {
        self.slot().is_tied()
    }

    /// Ties the tieable; a no-op returning `false` if it was already tied.
    fn tie_to(&self, statistic: &Arc<dyn Statistic>) -> bool {
        self.slot().tie(statistic)
    }
}

/// The hooks a concrete repository plugs into the [`TieEngine`].
pub trait Binder: Send + Sync + 'static {
    /// Definition type accepted by this binder.
    type Definition: Definition;

    /// Tieable type produced by this binder.
    type Tieable: Tieable<Definition = Self::Definition>;

    /// Creates an untied tieable from a definition.
    fn create(&self, definition: Self::Definition) -> Self::Tieable;

    /// Matches the tieable against a snapshot of the producer's statistics.
    ///
    /// # Errors
    ///
    /// Returns a [`TieError`] when the binding can never succeed.
    fn tie(
        &self,
        tieable: &Self::Tieable,
        producer: &dyn Producer,
        index: &StatisticIndex,
    ) -> Result<TieOutcome, TieError>;
}

/// Binds definitions to statistics and owns the resulting tieables.
pub struct TieEngine<B: Binder> {
    registry: Arc<ProducerRegistry>,
    binder: Arc<B>,
    tieables: RwLock<Vec<Arc<B::Tieable>>>,
    auto_tie: RwLock<Arc<AutoTieQueue<B>>>,
}

impl<B: Binder> TieEngine<B> {
    /// Creates an engine with an empty live collection.
    pub fn new(registry: Arc<ProducerRegistry>, binder: B) -> Self {
        let binder = Arc::new(binder);
        Self {
            registry,
            auto_tie: RwLock::new(AutoTieQueue::new(Arc::clone(&binder))),
            binder,
            tieables: RwLock::new(Vec::new()),
        }
    }

    /// Creates a tieable from a definition and ties it if possible.
    ///
    /// On success the tieable is a permanent member of the live collection.
    /// If its statistic does not exist yet on an on-demand producer, it is
    /// returned untied and re-attempted by the auto-tie queue.
    ///
    /// # Errors
    ///
    /// - [`TieError::InvalidDefinition`] if the definition fails validation
    /// - [`TieError::ProducerNotFound`] if the producer is not registered
    /// - whatever [`Binder::tie`] reports, e.g. [`TieError::StatisticNotFound`]
    pub fn create_tieable(&self, definition: B::Definition) -> Result<Arc<B::Tieable>, TieError> {
        definition.validate()?;

        let producer = self.registry.lookup(definition.producer_id()).ok_or_else(|| {
            TieError::ProducerNotFound {
                producer_id: definition.producer_id().to_string(),
                definition: definition.name().to_string(),
            }
        })?;

        let tieable = Arc::new(self.binder.create(definition));
        let index = StatisticIndex::of(producer.as_ref());
        let outcome = self.binder.tie(&tieable, producer.as_ref(), &index)?;

        let mut tieables = self.tieables.write();
        tieables.push(Arc::clone(&tieable));
        if outcome == TieOutcome::Pending {
            self.auto_tie
                .read()
                .enqueue(Arc::clone(&tieable), producer, index.version());
        }

        Ok(tieable)
    }

    /// Snapshot of the live collection, in creation order.
    pub fn tieables(&self) -> Vec<Arc<B::Tieable>> {
        self.tieables.read().clone()
    }

    /// Number of live tieables.
    pub fn len(&self) -> usize {
        self.tieables.read().len()
    }

    /// Returns `true` if the live collection is empty.
    pub fn is_empty(&self) -> bool {
        self.tieables.read().is_empty()
    }

    /// Number of tieables waiting for their statistic.
    pub fn pending_count(&self) -> usize {
        self.auto_tie.read().len()
    }

    /// Re-attempts pending ties whose producer changed since the last attempt.
    pub fn retry_pending(&self) -> RetryReport {
        self.queue().retry_changed()
    }

    /// Re-attempts every pending tie regardless of producer versions.
    pub fn sweep(&self) -> RetryReport {
        self.queue().sweep()
    }

    /// Re-attempts pending ties of one producer.
    pub fn notify_statistics_changed(&self, producer_id: &str) -> RetryReport {
        self.queue().retry_producer(producer_id)
    }

    /// Discards every tieable and every pending tie.
    ///
    /// The previous generation's queue is closed, so statistics appearing
    /// later can no longer tie tieables created before the reset.
    pub fn reset(&self) {
        let mut tieables = self.tieables.write();
        let fresh = AutoTieQueue::new(Arc::clone(&self.binder));
        let previous = std::mem::replace(&mut *self.auto_tie.write(), fresh);
        previous.close();
        tieables.clear();
    }

    /// The registry producers are resolved from.
    pub fn registry(&self) -> &Arc<ProducerRegistry> {
        &self.registry
    }

    /// The binder supplying the matching rule.
    pub fn binder(&self) -> &B {
        &self.binder
    }

    fn queue(&self) -> Arc<AutoTieQueue<B>> {
        Arc::clone(&self.auto_tie.read())
    }
}

impl<B: Binder> fmt::Debug for TieEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieEngine")
            .field("tieables", &self.len())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::producer::{Lookup, OnDemandProducer, ProducerKind, StaticProducer};
    use crate::stats::{GenericStats, ValueKind};

    /// Minimal definition for exercising the engine without accumulators.
    #[derive(Debug, Clone)]
    pub(crate) struct ProbeDefinition {
        pub name: String,
        pub producer_id: String,
        pub stat_name: String,
    }

    impl Definition for ProbeDefinition {
        fn name(&self) -> &str {
            &self.name
        }

        fn producer_id(&self) -> &str {
            &self.producer_id
        }

        fn stat_name(&self) -> &str {
            &self.stat_name
        }
    }

    #[derive(Debug)]
    pub(crate) struct Probe {
        definition: ProbeDefinition,
        slot: TieSlot,
    }

    impl Tieable for Probe {
        type Definition = ProbeDefinition;

        fn definition(&self) -> &ProbeDefinition {
            &self.definition
        }

        fn slot(&self) -> &TieSlot {
            &self.slot
        }
    }

    pub(crate) struct ProbeBinder;

    impl Binder for ProbeBinder {
        type Definition = ProbeDefinition;
        type Tieable = Probe;

        fn create(&self, definition: ProbeDefinition) -> Probe {
            Probe {
                definition,
                slot: TieSlot::new(),
            }
        }

        fn tie(
            &self,
            tieable: &Probe,
            producer: &dyn Producer,
            index: &StatisticIndex,
        ) -> Result<TieOutcome, TieError> {
            match (index.find(&tieable.definition.stat_name), producer.kind()) {
                (Lookup::Found(stat), _) => {
                    tieable.tie_to(&stat);
                    Ok(TieOutcome::Tied)
                }
                (_, ProducerKind::OnDemand) => Ok(TieOutcome::Pending),
                (_, ProducerKind::Eager) => Err(TieError::StatisticNotFound {
                    stat_name: tieable.definition.stat_name.clone(),
                    producer_id: producer.id().to_string(),
                    definition: tieable.definition.name.clone(),
                }),
            }
        }
    }

    pub(crate) fn probe(name: &str, producer_id: &str, stat_name: &str) -> ProbeDefinition {
        ProbeDefinition {
            name: name.to_string(),
            producer_id: producer_id.to_string(),
            stat_name: stat_name.to_string(),
        }
    }

    pub(crate) fn gauge(name: &str) -> GenericStats {
        GenericStats::new(name, [("value", ValueKind::Gauge)])
    }

    fn registry() -> Arc<ProducerRegistry> {
        let registry = Arc::new(ProducerRegistry::new());
        registry.register(Arc::new(
            StaticProducer::new("X", "service")
                .with_statistic(Arc::new(gauge("latency")))
                .with_statistic(Arc::new(gauge("errors"))),
        ));
        registry
    }

    #[test]
    fn test_slot_is_write_once() {
        let first: Arc<dyn Statistic> = Arc::new(gauge("a"));
        let second: Arc<dyn Statistic> = Arc::new(gauge("a"));

        let slot = TieSlot::new();
        assert!(!slot.is_tied());
        assert!(slot.tie(&first));
        assert!(!slot.tie(&second));
        assert!(slot.is_tied_to(&first));
        assert!(!slot.is_tied_to(&second));
    }

    #[test]
    fn test_slot_degrades_when_statistic_dropped() {
        let slot = TieSlot::new();
        {
            let stat: Arc<dyn Statistic> = Arc::new(gauge("gone"));
            slot.tie(&stat);
        }
        assert!(slot.is_tied());
        assert!(slot.statistic().is_none());
    }

    #[test]
    fn test_create_ties_eager_statistic() {
        let engine = TieEngine::new(registry(), ProbeBinder);

        let probe = engine.create_tieable(probe("p", "X", "latency")).unwrap();

        assert!(probe.is_tied());
        assert_eq!(probe.slot().statistic().map(|s| s.name().to_string()), Some("latency".to_string()));
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_failed_definitions_are_not_stored() {
        let engine = TieEngine::new(registry(), ProbeBinder);

        let err = engine.create_tieable(probe("p", "Z", "latency")).unwrap_err();
        assert!(matches!(err, TieError::ProducerNotFound { ref producer_id, .. } if producer_id == "Z"));

        let err = engine.create_tieable(probe("q", "X", "missing")).unwrap_err();
        assert!(matches!(err, TieError::StatisticNotFound { ref stat_name, .. } if stat_name == "missing"));

        let err = engine.create_tieable(probe("", "X", "latency")).unwrap_err();
        assert!(matches!(err, TieError::InvalidDefinition { .. }));

        assert!(engine.is_empty());
    }

    #[test]
    fn test_pending_tie_resolves_on_producer_event() {
        let registry = registry();
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        registry.register(producer.clone());
        let engine = TieEngine::new(registry, ProbeBinder);

        let probe = engine.create_tieable(probe("p", "Y", "queueDepth")).unwrap();
        assert!(!probe.is_tied());
        assert_eq!(engine.pending_count(), 1);

        let created = producer.get_or_create("queueDepth");
        let created: Arc<dyn Statistic> = created;

        assert!(probe.slot().is_tied_to(&created));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn test_unregistered_producer_releases_statistic() {
        let registry = registry();
        let engine = TieEngine::new(Arc::clone(&registry), ProbeBinder);

        let probe = engine.create_tieable(probe("p", "X", "latency")).unwrap();
        assert!(probe.slot().statistic().is_some());

        registry.unregister("X");
        assert!(probe.is_tied());
        assert!(probe.slot().statistic().is_none());
    }

    #[test]
    fn test_reset_closes_previous_generation() {
        let registry = registry();
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        registry.register(producer.clone());
        let engine = TieEngine::new(registry, ProbeBinder);

        let old = engine.create_tieable(probe("p", "Y", "queueDepth")).unwrap();
        engine.reset();
        assert!(engine.is_empty());
        assert_eq!(engine.pending_count(), 0);

        producer.get_or_create("queueDepth");
        assert!(!old.is_tied());
    }
}
