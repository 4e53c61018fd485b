use thiserror::Error;

pub type TallyResult<T> = Result<T, TallyError>;

#[derive(Error, Debug)]
pub enum TallyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown aggregator: {0}")]
    UnknownAggregator(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Failure to produce a typed value for one row.
///
/// The extractor absorbs these: the row is skipped, the aggregation goes on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("cannot convert {value:?} to {target}")]
    Convert { value: String, target: &'static str },

    #[error("row {0} has no cell for this column")]
    Missing(usize),

    #[error("derived value not yet computed")]
    Pending,

    #[error("derivation failed: {0}")]
    Derivation(String),
}

/// Failure of an aggregator function over its input values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregateError {
    #[error("no values to aggregate")]
    EmptyInput,

    #[error("cannot compare {0} with {1}")]
    Incomparable(&'static str, &'static str),

    #[error("{0} is not numeric")]
    NotNumeric(&'static str),

    #[error("{0}")]
    Message(String),
}

/// Failure of a derived-value computation. Stored as the cache resolution,
/// so it is cloned out to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeriveError {
    #[error("template references unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}': {source}")]
    Value {
        column: String,
        source: ConversionError,
    },

    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("command template is empty")]
    EmptyCommand,

    #[error("derivation task aborted: {0}")]
    Aborted(String),
}
