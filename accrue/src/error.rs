//! Error types for the accrue binding layer.

use thiserror::Error;

/// The main error type for all accrue operations.
///
/// This enum covers every error condition the binding layer reports, from
/// reading configuration to tying definitions to statistics at startup.
#[derive(Error, Debug)]
pub enum AccrueError {
    /// Error while tying a definition to a statistic.
    #[error("tie error: {0}")]
    Tie(#[from] TieError),

    /// Error while reading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The startup binding pass finished with failures.
    #[error("startup error: {0}")]
    Startup(#[from] StartupError),

    /// A background task thread could not be spawned.
    #[error("failed to spawn task '{task}': {source}")]
    Spawn {
        /// Name of the task.
        task: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur when tying a definition to a statistic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TieError {
    /// The definition names a producer that is not registered.
    #[error("producer '{producer_id}' not found for definition '{definition}'")]
    ProducerNotFound {
        /// The producer id that could not be resolved.
        producer_id: String,
        /// The name of the definition that referenced it.
        definition: String,
    },

    /// The definition names a statistic an eager producer does not expose.
    #[error("statistic '{stat_name}' not found in producer '{producer_id}' for definition '{definition}'")]
    StatisticNotFound {
        /// The missing statistic name.
        stat_name: String,
        /// The producer that was searched.
        producer_id: String,
        /// The name of the definition that referenced it.
        definition: String,
    },

    /// The producer exposes more than one statistic with the requested name.
    #[error("statistic '{stat_name}' is ambiguous in producer '{producer_id}': {count} statistics share the name (definition '{definition}')")]
    AmbiguousStatistic {
        /// The duplicated statistic name.
        stat_name: String,
        /// The producer exposing the duplicates.
        producer_id: String,
        /// How many statistics carry the name.
        count: usize,
        /// The name of the definition that referenced it.
        definition: String,
    },

    /// The definition itself is malformed.
    #[error("invalid definition '{definition}': {reason}")]
    InvalidDefinition {
        /// The name of the offending definition.
        definition: String,
        /// Why the definition is invalid.
        reason: String,
    },
}

/// Errors that can occur while reading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configured time unit is not one of the recognized units.
    #[error("invalid time unit '{value}' in accumulator '{accumulator}'")]
    InvalidTimeUnit {
        /// The unrecognized time unit identifier.
        value: String,
        /// The accumulator that used it.
        accumulator: String,
    },

    /// The configured interval is not one of the recognized intervals.
    #[error("invalid interval '{value}' in accumulator '{accumulator}'")]
    InvalidInterval {
        /// The unrecognized interval name.
        value: String,
        /// The accumulator that used it.
        accumulator: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: std::path::PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("failed to parse config: {source}")]
    Parse {
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// A setting holds an unusable value.
    #[error("invalid setting {setting}: {reason}")]
    InvalidSetting {
        /// The setting name.
        setting: &'static str,
        /// Why the value is unusable.
        reason: String,
    },
}

impl ConfigError {
    /// Returns the accumulator name this error refers to, if any.
    pub fn accumulator(&self) -> Option<&str> {
        match self {
            Self::InvalidTimeUnit { accumulator, .. } | Self::InvalidInterval { accumulator, .. } => {
                Some(accumulator)
            }
            _ => None,
        }
    }
}

/// A single definition that could not be bound during a binding pass.
#[derive(Error, Debug)]
#[error("{definition}: {source}")]
pub struct BindingFailure {
    /// Name of the definition that failed.
    pub definition: String,
    /// What went wrong.
    #[source]
    pub source: FailureCause,
}

/// Underlying cause of a [`BindingFailure`].
#[derive(Error, Debug)]
pub enum FailureCause {
    /// The definition could not be built from configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The definition could not be tied.
    #[error(transparent)]
    Tie(#[from] TieError),
}

impl FailureCause {
    /// Returns the tie error, if this failure happened while tying.
    pub fn as_tie(&self) -> Option<&TieError> {
        match self {
            Self::Tie(e) => Some(e),
            Self::Config(_) => None,
        }
    }
}

/// The startup binding pass completed, but some definitions failed.
///
/// Every failure of the batch is carried, not just the first one.
#[derive(Error, Debug)]
#[error("{} of {total} accumulator definition(s) failed to bind: {}", failures.len(), summary(failures))]
pub struct StartupError {
    /// Number of definitions in the batch.
    pub total: usize,
    /// Each failed definition with its cause.
    pub failures: Vec<BindingFailure>,
}

fn summary(failures: &[BindingFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Type alias for `Result<T, AccrueError>`.
pub type Result<T> = std::result::Result<T, AccrueError>;
