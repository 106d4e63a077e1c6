//! Auto-tie: deferred binding for statistics that do not exist yet.
//!
//! When a definition targets an on-demand producer that has not created the
//! named statistic, the engine parks the (tieable, producer) pair here. A
//! pending entry moves to tied exactly once, or stays pending forever if the
//! statistic never appears.
//!
//! Entries are re-attempted when:
//!
//! - the producer reports a statistic set change (the queue subscribes itself
//!   as a [`StatisticsListener`] once per producer)
//! - someone calls [`AutoTieQueue::retry_producer`] explicitly
//! - a periodic sweep runs ([`AutoTieQueue::retry_changed`] or the forced
//!   [`AutoTieQueue::sweep`])
//!
//! Each entry remembers the producer version it was last matched against, so
//! non-forced retries skip producers whose statistic set did not change.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Binder, TieOutcome, Tieable};
use crate::definition::Definition;
use crate::producer::{Producer, StatisticIndex, StatisticsListener};

/// Counts from one retry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Entries that were tied by this pass.
    pub tied: usize,
    /// Entries that were matched again and are still pending.
    pub attempted: usize,
    /// Entries left in the queue after the pass.
    pub remaining: usize,
}

struct PendingTie<T> {
    tieable: Arc<T>,
    producer: Arc<dyn Producer>,
    seen_version: u64,
}

/// Which entries a retry pass looks at.
#[derive(Clone, Copy)]
enum Scope<'a> {
    Changed,
    Producer(&'a str),
    All,
}

/// The pending set of one tie engine generation.
pub struct AutoTieQueue<B: Binder> {
    binder: Arc<B>,
    pending: Mutex<Vec<PendingTie<B::Tieable>>>,
    subscribed: Mutex<HashSet<String>>,
    closed: AtomicBool,
    this: Weak<Self>,
}

impl<B: Binder> AutoTieQueue<B> {
    /// Creates an empty, open queue.
    pub fn new(binder: Arc<B>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            binder,
            pending: Mutex::new(Vec::new()),
            subscribed: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// Parks a tieable until its statistic appears.
    ///
    /// `seen_version` is the producer version the failed match was made
    /// against. If the producer moved past it by the time the entry is
    /// queued, the entry is retried right away.
    pub fn enqueue(&self, tieable: Arc<B::Tieable>, producer: Arc<dyn Producer>, seen_version: u64) {
        if self.is_closed() {
            return;
        }

        let producer_id = producer.id().to_string();
        tracing::debug!(
            definition = tieable.definition().name(),
            producer = %producer_id,
            statistic = tieable.definition().stat_name(),
            "statistic not created yet, waiting for auto-tie"
        );

        let first_for_producer = self.subscribed.lock().insert(producer_id.clone());
        if first_for_producer {
            let listener: Weak<dyn StatisticsListener> = self.this.clone();
            producer.subscribe(listener);
        }

        self.pending.lock().push(PendingTie {
            tieable,
            producer: Arc::clone(&producer),
            seen_version,
        });

        // Read after the push: a change event fired before this point found
        // no entry to retry.
        if producer.version() != seen_version {
            self.retry_producer(&producer_id);
        }
    }

    /// Retries entries whose producer version changed since their last attempt.
    pub fn retry_changed(&self) -> RetryReport {
        self.retry(Scope::Changed)
    }

    /// Retries entries of one producer whose version changed.
    pub fn retry_producer(&self, producer_id: &str) -> RetryReport {
        self.retry(Scope::Producer(producer_id))
    }

    /// Retries every entry, ignoring versions.
    pub fn sweep(&self) -> RetryReport {
        self.retry(Scope::All)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every pending entry and refuses new ones.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "discarded pending ties");
        }
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn retry(&self, scope: Scope<'_>) -> RetryReport {
        let mut report = RetryReport::default();
        let mut scope = scope;

        loop {
            if self.is_closed() {
                return report;
            }

            // Producers and the binder run without the queue lock held, so a
            // producer may notify from inside `statistics()`.
            let taken = std::mem::take(&mut *self.pending.lock());
            let kept = self.match_entries(taken, scope, &mut report);

            let mut pending = self.pending.lock();
            if self.is_closed() {
                pending.clear();
                report.remaining = 0;
                return report;
            }

            // A change event that fired while the entries were taken out
            // found an empty queue; pick those changes up here.
            let missed = kept
                .iter()
                .any(|entry| entry.producer.version() != entry.seen_version);

            let queued_meanwhile = std::mem::replace(&mut *pending, kept);
            pending.extend(queued_meanwhile);
            report.remaining = pending.len();
            drop(pending);

            if !missed {
                return report;
            }
            scope = Scope::Changed;
        }
    }

    fn match_entries(
        &self,
        entries: Vec<PendingTie<B::Tieable>>,
        scope: Scope<'_>,
        report: &mut RetryReport,
    ) -> Vec<PendingTie<B::Tieable>> {
        let mut indexes: HashMap<String, StatisticIndex> = HashMap::new();
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in entries {
            // Already tied through another path: retrying is a no-op.
            if entry.tieable.is_tied() {
                continue;
            }

            let in_scope = match scope {
                Scope::Changed => entry.producer.version() != entry.seen_version,
                Scope::Producer(id) => {
                    id == entry.producer.id() && entry.producer.version() != entry.seen_version
                }
                Scope::All => true,
            };
            if !in_scope {
                kept.push(entry);
                continue;
            }

            let index = indexes
                .entry(entry.producer.id().to_string())
                .or_insert_with(|| StatisticIndex::of(entry.producer.as_ref()));
            entry.seen_version = index.version();

            match self.binder.tie(&entry.tieable, entry.producer.as_ref(), index) {
                Ok(TieOutcome::Tied) => {
                    tracing::debug!(
                        definition = entry.tieable.definition().name(),
                        producer = entry.producer.id(),
                        "auto-tied"
                    );
                    report.tied += 1;
                }
                Ok(TieOutcome::Pending) => {
                    report.attempted += 1;
                    kept.push(entry);
                }
                Err(e) => {
                    tracing::warn!(
                        definition = entry.tieable.definition().name(),
                        producer = entry.producer.id(),
                        "auto-tie failed, keeping entry pending: {e}"
                    );
                    report.attempted += 1;
                    kept.push(entry);
                }
            }
        }

        kept
    }
}

impl<B: Binder> StatisticsListener for AutoTieQueue<B> {
    fn statistics_changed(&self, producer_id: &str) {
        let report = self.retry_producer(producer_id);
        if report.tied > 0 {
            tracing::debug!(producer = producer_id, tied = report.tied, "statistics changed");
        }
    }
}

impl<B: Binder> fmt::Debug for AutoTieQueue<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoTieQueue")
            .field("pending", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;

    use super::*;
    use crate::producer::{ListenerSet, OnDemandProducer, ProducerKind};
    use crate::stats::Statistic;
    use crate::tie::tests::{ProbeBinder, gauge, probe};

    fn parked(
        queue: &AutoTieQueue<ProbeBinder>,
        producer: &Arc<OnDemandProducer<crate::stats::GenericStats>>,
        stat_name: &str,
    ) -> Arc<crate::tie::tests::Probe> {
        let tieable = Arc::new(ProbeBinder.create(probe("p", "Y", stat_name)));
        queue.enqueue(Arc::clone(&tieable), producer.clone(), producer.version());
        tieable
    }

    /// Whether a [`HookedProducer`] creates its statistic on subscribe or on read.
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum CreateOn {
        Subscribe,
        FirstRead,
    }

    /// On-demand producer that creates `queueDepth` from inside a hook and
    /// notifies synchronously.
    struct HookedProducer {
        create_on: CreateOn,
        statistics: Mutex<Vec<Arc<dyn Statistic>>>,
        version: AtomicU64,
        listeners: ListenerSet,
    }

    impl HookedProducer {
        fn new(create_on: CreateOn) -> Self {
            Self {
                create_on,
                statistics: Mutex::new(Vec::new()),
                version: AtomicU64::new(0),
                listeners: ListenerSet::new(),
            }
        }

        fn create(&self) -> bool {
            let mut statistics = self.statistics.lock();
            if !statistics.is_empty() {
                return false;
            }
            statistics.push(Arc::new(gauge("queueDepth")));
            self.version.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    impl Producer for HookedProducer {
        fn id(&self) -> &str {
            "Y"
        }

        fn category(&self) -> &str {
            "queue"
        }

        fn statistics(&self) -> Vec<Arc<dyn Statistic>> {
            if self.create_on == CreateOn::FirstRead && self.create() {
                self.listeners.notify("Y");
            }
            self.statistics.lock().clone()
        }

        fn kind(&self) -> ProducerKind {
            ProducerKind::OnDemand
        }

        fn version(&self) -> u64 {
            self.version.load(Ordering::SeqCst)
        }

        fn subscribe(&self, listener: Weak<dyn StatisticsListener>) {
            self.listeners.add(listener);
            if self.create_on == CreateOn::Subscribe && self.create() {
                self.listeners.notify("Y");
            }
        }
    }

    #[test]
    fn test_statistic_created_during_subscribe_ties() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(HookedProducer::new(CreateOn::Subscribe));

        let tieable = Arc::new(ProbeBinder.create(probe("p", "Y", "queueDepth")));
        queue.enqueue(Arc::clone(&tieable), producer.clone(), producer.version());

        assert!(tieable.is_tied());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_producer_notifying_from_statistics_does_not_deadlock() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(HookedProducer::new(CreateOn::FirstRead));

        let tieable = Arc::new(ProbeBinder.create(probe("p", "Y", "queueDepth")));
        queue.enqueue(Arc::clone(&tieable), producer.clone(), producer.version());
        assert_eq!(queue.len(), 1);

        let report = queue.sweep();
        assert_eq!(report.tied, 1);
        assert_eq!(report.remaining, 0);
        assert!(tieable.is_tied());
    }

    #[test]
    fn test_retry_skips_unchanged_producers() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        let _tieable = parked(&queue, &producer, "queueDepth");

        assert_eq!(queue.retry_changed(), RetryReport { tied: 0, attempted: 0, remaining: 1 });
        assert_eq!(queue.sweep(), RetryReport { tied: 0, attempted: 1, remaining: 1 });
    }

    #[test]
    fn test_unrelated_statistic_keeps_entry_pending() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        let tieable = parked(&queue, &producer, "queueDepth");

        producer.get_or_create("other");
        assert!(!tieable.is_tied());
        assert_eq!(queue.len(), 1);

        // The event already consumed the version change.
        assert_eq!(queue.retry_changed().attempted, 0);
    }

    #[test]
    fn test_retry_after_tie_is_noop() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        let tieable = parked(&queue, &producer, "queueDepth");

        let stat: Arc<dyn Statistic> = producer.get_or_create("queueDepth");
        assert!(tieable.slot().is_tied_to(&stat));

        for _ in 0..3 {
            assert_eq!(queue.sweep(), RetryReport::default());
        }
        assert!(tieable.slot().is_tied_to(&stat));
    }

    #[test]
    fn test_statistic_created_before_enqueue_is_not_missed() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        let stale_version = producer.version();
        producer.get_or_create("queueDepth");

        let tieable = Arc::new(ProbeBinder.create(probe("p", "Y", "queueDepth")));
        queue.enqueue(Arc::clone(&tieable), producer.clone(), stale_version);

        assert!(tieable.is_tied());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_accepts_nothing() {
        let queue = AutoTieQueue::new(Arc::new(ProbeBinder));
        let producer = Arc::new(OnDemandProducer::new("Y", "queue", gauge));
        let tieable = parked(&queue, &producer, "queueDepth");

        queue.close();
        assert!(queue.is_empty());

        let late = parked(&queue, &producer, "queueDepth");
        producer.get_or_create("queueDepth");

        assert!(!tieable.is_tied());
        assert!(!late.is_tied());
        assert_eq!(queue.sweep(), RetryReport::default());
    }
}
