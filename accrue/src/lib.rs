//! # accrue
//!
//! Binds accumulator definitions to live statistics exposed by runtime producers.
//!
//! Instrumented code publishes statistics through producers registered in a
//! [`ProducerRegistry`]. accrue takes declarative accumulator definitions
//! ("sample value `avg` of statistic `latency` in producer `X`"), ties each
//! one to the matching live statistic and samples it over time.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - A tie is established at most once and never changes afterwards
//! - Statistics that do not exist yet on an on-demand producer are tied
//!   automatically when the producer creates them
//! - A failing definition never stops the rest of a batch; every failure is reported
//! - Reads never fail: a missing or dropped statistic reads as [`Reading::NoData`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use accrue::{AccumulatorDefinition, AccumulatorRepository, ProducerRegistry, Reading};
//! use accrue::builtin::MethodCallProducer;
//!
//! let registry = Arc::new(ProducerRegistry::new());
//! let calls = Arc::new(MethodCallProducer::new("Calls", "service"));
//! registry.register(calls.clone());
//!
//! let repository = AccumulatorRepository::new(registry, 100);
//! let report = repository.load([AccumulatorDefinition::new("fetch-calls", "Calls", "fetch", "req")]);
//! assert_eq!(report.pending, vec!["fetch-calls".to_string()]);
//!
//! // The first call creates the statistic and the pending accumulator ties to it.
//! calls.record_call("fetch", Duration::from_millis(3), false);
//!
//! let acc = repository.accumulator("fetch-calls").unwrap();
//! assert_eq!(acc.value(), Reading::Value(1.0));
//! ```
//!
//! ## Architecture
//!
//! - [`ProducerRegistry`] resolves producer ids to [`Producer`]s
//! - [`TieEngine`](tie::TieEngine) creates tieables from definitions and ties them,
//!   parking unresolved ones in an [`AutoTieQueue`](tie::AutoTieQueue)
//! - [`AccumulatorRepository`] is the engine specialized for [`Accumulator`]s
//! - [`MonitoringContext`] owns a repository built from a [`MonitoringConfig`]
//!   and its background tasks
//!
//! ## Modules
//!
//! - [`stats`]: Statistics and their values
//! - [`producer`]: Producer capability, static and on-demand producers
//! - [`registry`]: Producer registry
//! - [`definition`]: Definitions, intervals and time units
//! - [`tie`]: Generic tie engine and auto-tie retry
//! - [`accumulator`]: Accumulators and their history
//! - [`repository`]: Accumulator repository and binding reports
//! - [`config`]: JSON configuration
//! - [`context`]: Monitoring context and background tasks
//! - [`builtin`]: Built-in OS and method-call producers
//! - [`task`]: Periodic background tasks
//! - [`error`]: Error types

pub mod accumulator;
pub mod builtin;
pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod producer;
pub mod registry;
pub mod repository;
pub mod stats;
pub mod task;
pub mod tie;

// Re-export primary API types at crate root for convenience.
pub use accumulator::{AccumulatedValue, Accumulator, Reading};
pub use config::{AccumulatorConfig, MonitoringConfig};
pub use context::MonitoringContext;
pub use definition::{AccumulatorDefinition, Definition, Interval, TimeUnit};
pub use error::{AccrueError, Result};
pub use producer::{OnDemandProducer, Producer, ProducerKind, StaticProducer};
pub use registry::ProducerRegistry;
pub use repository::{AccumulatorRepository, BindingReport};
pub use stats::{GenericStats, StatValue, Statistic, ValueKind};
