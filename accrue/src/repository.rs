//! Accumulator repository: the tie engine specialized for accumulators.
//!
//! The repository creates [`Accumulator`]s from definitions, matches them
//! against producer statistics and owns every live accumulator.
//!
//! # Matching rule
//!
//! The producer's current statistics are indexed by name. Exactly one
//! statistic with the definition's statistic name is a match. No match is an
//! error for an eager producer and a pending auto-tie for an on-demand one.
//! Several statistics sharing the name are reported as
//! [`TieError::AmbiguousStatistic`] rather than resolved by list order.
//!
//! # Startup
//!
//! [`AccumulatorRepository::load_config`] binds a whole batch synchronously.
//! A failing definition never stops the rest of the batch; every failure is
//! collected in the returned [`BindingReport`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use accrue::definition::AccumulatorDefinition;
//! use accrue::producer::StaticProducer;
//! use accrue::registry::ProducerRegistry;
//! use accrue::repository::AccumulatorRepository;
//! use accrue::stats::{GenericStats, ValueKind};
//!
//! let registry = Arc::new(ProducerRegistry::new());
//! registry.register(Arc::new(
//!     StaticProducer::new("X", "service")
//!         .with_statistic(Arc::new(GenericStats::new("latency", [("avg", ValueKind::Gauge)]))),
//! ));
//!
//! let repository = AccumulatorRepository::new(registry, 100);
//! let report = repository.load([AccumulatorDefinition::new("x-latency", "X", "latency", "avg")]);
//!
//! assert!(report.is_complete());
//! assert!(repository.accumulator("x-latency").is_some());
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::accumulator::{AccumulatedValue, Accumulator};
use crate::config::AccumulatorConfig;
use crate::definition::AccumulatorDefinition;
use crate::error::{BindingFailure, FailureCause, StartupError, TieError};
use crate::producer::{Lookup, Producer, ProducerKind, StatisticIndex};
use crate::registry::ProducerRegistry;
use crate::tie::{Binder, RetryReport, TieEngine, TieOutcome, Tieable};

/// The accumulator matching rule and factory.
#[derive(Debug, Clone)]
pub struct AccumulatorBinder {
    max_values: usize,
}

impl AccumulatorBinder {
    /// Creates a binder whose accumulators keep `max_values` samples.
    pub fn new(max_values: usize) -> Self {
        Self { max_values }
    }
}

impl Binder for AccumulatorBinder {
    type Definition = AccumulatorDefinition;
    type Tieable = Accumulator;

    fn create(&self, definition: AccumulatorDefinition) -> Accumulator {
        Accumulator::new(definition, self.max_values)
    }

    fn tie(
        &self,
        accumulator: &Accumulator,
        producer: &dyn Producer,
        index: &StatisticIndex,
    ) -> Result<TieOutcome, TieError> {
        let definition = accumulator.definition();

        match index.find(&definition.stat_name) {
            Lookup::Found(statistic) => {
                accumulator.tie_to(&statistic);
                Ok(TieOutcome::Tied)
            }
            Lookup::Ambiguous(count) => Err(TieError::AmbiguousStatistic {
                stat_name: definition.stat_name.clone(),
                producer_id: producer.id().to_string(),
                count,
                definition: definition.name.clone(),
            }),
            Lookup::Missing => match producer.kind() {
                ProducerKind::OnDemand => Ok(TieOutcome::Pending),
                ProducerKind::Eager => Err(TieError::StatisticNotFound {
                    stat_name: definition.stat_name.clone(),
                    producer_id: producer.id().to_string(),
                    definition: definition.name.clone(),
                }),
            },
        }
    }
}

/// Outcome of binding a batch of definitions.
#[derive(Debug, Default)]
pub struct BindingReport {
    /// Number of definitions in the batch.
    pub total: usize,
    /// Names of accumulators tied immediately.
    pub tied: Vec<String>,
    /// Names of accumulators waiting for an on-demand statistic.
    pub pending: Vec<String>,
    /// Definitions that could not be bound.
    pub failures: Vec<BindingFailure>,
}

impl BindingReport {
    /// Returns `true` if no definition failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns a report with failures into a [`StartupError`].
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] carrying every failure if any definition failed.
    pub fn into_result(self) -> Result<Self, StartupError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(StartupError {
                total: self.total,
                failures: self.failures,
            })
        }
    }

    /// The tie error reported for a definition, if it failed while tying.
    pub fn tie_error(&self, definition: &str) -> Option<&TieError> {
        self.failures
            .iter()
            .find(|f| f.definition == definition)
            .and_then(|f| f.source.as_tie())
    }
}

/// Where a batch entry came from, kept to replay the batch on reset.
#[derive(Debug, Clone)]
enum Source {
    Definition(AccumulatorDefinition),
    Config(AccumulatorConfig),
}

impl Source {
    fn name(&self) -> &str {
        match self {
            Self::Definition(d) => &d.name,
            Self::Config(c) => &c.name,
        }
    }
}

/// Owns every live accumulator.
#[derive(Debug)]
pub struct AccumulatorRepository {
    engine: TieEngine<AccumulatorBinder>,
    loaded: Mutex<Vec<Source>>,
}

impl AccumulatorRepository {
    /// Creates an empty repository resolving producers through `registry`.
    pub fn new(registry: Arc<ProducerRegistry>, max_values: usize) -> Self {
        Self {
            engine: TieEngine::new(registry, AccumulatorBinder::new(max_values)),
            loaded: Mutex::new(Vec::new()),
        }
    }

    /// Binds a batch of definitions.
    pub fn load<I>(&self, definitions: I) -> BindingReport
    where
        I: IntoIterator<Item = AccumulatorDefinition>,
    {
        self.load_sources(definitions.into_iter().map(Source::Definition).collect())
    }

    /// Binds a batch of configured accumulators.
    ///
    /// Records with an unrecognized interval or time unit are reported as
    /// failures of this batch.
    pub fn load_config(&self, accumulators: &[AccumulatorConfig]) -> BindingReport {
        self.load_sources(accumulators.iter().cloned().map(Source::Config).collect())
    }

    /// Creates and ties a single accumulator outside the startup batch.
    ///
    /// # Errors
    ///
    /// See [`TieEngine::create_tieable`].
    pub fn create_accumulator(
        &self,
        definition: AccumulatorDefinition,
    ) -> Result<Arc<Accumulator>, TieError> {
        self.engine.create_tieable(definition)
    }

    /// Snapshot of every live accumulator, in creation order.
    pub fn accumulators(&self) -> Vec<Arc<Accumulator>> {
        self.engine.tieables()
    }

    /// Looks an accumulator up by name.
    pub fn accumulator(&self, name: &str) -> Option<Arc<Accumulator>> {
        self.engine
            .tieables()
            .into_iter()
            .find(|acc| acc.name() == name)
    }

    /// Number of live accumulators.
    pub fn len(&self) -> usize {
        self.engine.len()
    }

    /// Returns `true` if there are no live accumulators.
    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    /// Number of accumulators waiting for their statistic.
    pub fn pending_count(&self) -> usize {
        self.engine.pending_count()
    }

    /// Re-attempts pending ties whose producer changed.
    pub fn retry_pending(&self) -> RetryReport {
        self.engine.retry_pending()
    }

    /// Re-attempts every pending tie.
    pub fn sweep(&self) -> RetryReport {
        self.engine.sweep()
    }

    /// Re-attempts pending ties of a producer that created statistics.
    pub fn notify_statistics_changed(&self, producer_id: &str) -> RetryReport {
        self.engine.notify_statistics_changed(producer_id)
    }

    /// Samples every accumulator whose interval elapsed.
    ///
    /// Returns the samples recorded, keyed by accumulator name.
    pub fn tick_all(&self, now: u64) -> Vec<(String, AccumulatedValue)> {
        self.accumulators()
            .iter()
            .filter_map(|acc| acc.tick(now).map(|v| (acc.name().to_string(), v)))
            .collect()
    }

    /// Discards every accumulator and replays the batches loaded so far.
    ///
    /// Accumulators created by [`create_accumulator`](Self::create_accumulator)
    /// are not replayed.
    pub fn reset(&self) -> BindingReport {
        self.engine.reset();
        let sources = self.loaded.lock().clone();
        tracing::debug!(definitions = sources.len(), "replaying binding pass after reset");
        self.bind_all(&sources)
    }

    /// The registry producers are resolved from.
    pub fn registry(&self) -> &Arc<ProducerRegistry> {
        self.engine.registry()
    }

    fn load_sources(&self, sources: Vec<Source>) -> BindingReport {
        let report = self.bind_all(&sources);
        self.loaded.lock().extend(sources);
        report
    }

    fn bind_all(&self, sources: &[Source]) -> BindingReport {
        let mut report = BindingReport {
            total: sources.len(),
            ..BindingReport::default()
        };

        for source in sources {
            match self.bind(source) {
                Ok(acc) if acc.is_tied() => report.tied.push(acc.name().to_string()),
                Ok(acc) => report.pending.push(acc.name().to_string()),
                Err(cause) => {
                    tracing::warn!(accumulator = source.name(), "binding failed: {cause}");
                    report.failures.push(BindingFailure {
                        definition: source.name().to_string(),
                        source: cause,
                    });
                }
            }
        }

        tracing::info!(
            total = report.total,
            tied = report.tied.len(),
            pending = report.pending.len(),
            failed = report.failures.len(),
            "accumulator binding pass finished"
        );
        report
    }

    fn bind(&self, source: &Source) -> Result<Arc<Accumulator>, FailureCause> {
        let definition = match source {
            Source::Definition(d) => d.clone(),
            Source::Config(c) => c.to_definition()?,
        };
        Ok(self.engine.create_tieable(definition)?)
    }
}
