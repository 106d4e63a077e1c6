//! The monitoring context: configuration, registry and repository in one place.
//!
//! A [`MonitoringContext`] is created explicitly and passed to whoever needs
//! it. It binds the configured accumulators and can run two background
//! tasks: a sweeper that re-attempts pending ties and a ticker that samples
//! every accumulator.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use accrue::builtin::OsProducer;
//! use accrue::config::MonitoringConfig;
//! use accrue::context::MonitoringContext;
//! use accrue::registry::ProducerRegistry;
//!
//! let config = MonitoringConfig::from_json_str(r#"{
//!     "accumulators": [
//!         {"name": "open-files", "producer_name": "OS", "stat_name": "OS", "value_name": "OpenFiles"}
//!     ]
//! }"#)?;
//!
//! let registry = Arc::new(ProducerRegistry::new());
//! registry.register(Arc::new(OsProducer::new()));
//!
//! let context = MonitoringContext::start(config, registry)?;
//! assert!(context.repository().accumulator("open-files").is_some());
//! # Ok::<(), accrue::error::AccrueError>(())
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::registry::ProducerRegistry;
use crate::repository::{AccumulatorRepository, BindingReport};
use crate::task::{PeriodicTask, timestamp_ns};

/// Owns the accumulator repository and its background tasks.
#[derive(Debug)]
pub struct MonitoringContext {
    config: MonitoringConfig,
    repository: Arc<AccumulatorRepository>,
    tasks: Mutex<Vec<PeriodicTask>>,
}

impl MonitoringContext {
    /// Binds the configured accumulators without failing on bad definitions.
    ///
    /// Failed definitions are listed in the returned report; the rest are
    /// tied or pending.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`](crate::error::ConfigError::InvalidSetting)
    /// if the settings are unusable.
    pub fn bind(
        config: MonitoringConfig,
        registry: Arc<ProducerRegistry>,
    ) -> Result<(Self, BindingReport)> {
        config.validate()?;

        let repository = Arc::new(AccumulatorRepository::new(
            registry,
            config.max_accumulated_values,
        ));
        let report = repository.load_config(&config.accumulators);

        let context = Self {
            config,
            repository,
            tasks: Mutex::new(Vec::new()),
        };
        Ok((context, report))
    }

    /// Binds the configured accumulators and starts the background tasks.
    ///
    /// Startup fails closed: every definition is attempted, and if any of
    /// them failed the whole batch is reported as a
    /// [`StartupError`](crate::error::StartupError).
    ///
    /// # Errors
    ///
    /// Returns [`AccrueError::Startup`](crate::error::AccrueError::Startup)
    /// with every failed definition, a config error for unusable settings,
    /// or a spawn error if a background thread cannot be created.
    pub fn start(config: MonitoringConfig, registry: Arc<ProducerRegistry>) -> Result<Self> {
        let (context, report) = Self::bind(config, registry)?;
        let report = report.into_result()?;

        tracing::info!(
            tied = report.tied.len(),
            pending = report.pending.len(),
            "monitoring started"
        );

        context.spawn_background()?;
        Ok(context)
    }

    /// Starts the auto-tie sweeper and the accumulator ticker.
    ///
    /// Both tasks hold a weak reference to the repository. Calling this
    /// again while tasks are running does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`AccrueError::Spawn`](crate::error::AccrueError::Spawn) if
    /// a thread cannot be created.
    pub fn spawn_background(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return Ok(());
        }

        let repository = Arc::downgrade(&self.repository);
        tasks.push(PeriodicTask::spawn(
            "accrue-auto-tie",
            self.config.auto_tie_sweep_interval(),
            move || sweep(&repository),
        )?);

        let repository = Arc::downgrade(&self.repository);
        tasks.push(PeriodicTask::spawn(
            "accrue-ticker",
            self.config.tick_interval(),
            move || tick(&repository),
        )?);

        Ok(())
    }

    /// Stops the background tasks.
    pub fn stop(&self) {
        let tasks: Vec<PeriodicTask> = self.tasks.lock().drain(..).collect();
        for mut task in tasks {
            task.stop();
        }
    }

    /// Discards every accumulator and binds the configured batch again.
    pub fn reset(&self) -> BindingReport {
        self.repository.reset()
    }

    /// The active configuration.
    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// The accumulator repository.
    pub fn repository(&self) -> &Arc<AccumulatorRepository> {
        &self.repository
    }

    /// The producer registry.
    pub fn registry(&self) -> &Arc<ProducerRegistry> {
        self.repository.registry()
    }

    /// Number of running background tasks.
    pub fn running_tasks(&self) -> usize {
        self.tasks.lock().iter().filter(|t| t.is_running()).count()
    }
}

impl Drop for MonitoringContext {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sweep(repository: &Weak<AccumulatorRepository>) {
    let Some(repository) = repository.upgrade() else {
        return;
    };
    let report = repository.sweep();
    if report.tied > 0 {
        tracing::info!(
            tied = report.tied,
            remaining = report.remaining,
            "auto-tie sweep bound pending accumulators"
        );
    }
}

fn tick(repository: &Weak<AccumulatorRepository>) {
    let Some(repository) = repository.upgrade() else {
        return;
    };
    let samples = repository.tick_all(timestamp_ns());
    tracing::trace!(samples = samples.len(), "accumulators ticked");
}
