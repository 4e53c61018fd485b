//! Aggregation and derivation engine

pub mod background;
pub mod binding;
pub mod derived;
pub mod extract;
pub mod registry;
pub mod shell;
pub mod stats;

pub use background::{collect_reports, Background};
pub use binding::{
    attach_aggregators, compute_and_report, display_name, format_aggregator_list,
    parse_aggregator_list, publish, render, CollectingSink, Report, StatusSink, TracingSink,
};
pub use derived::{Derived, DerivedCache, Lookup};
pub use extract::{value_rows, values, NullPolicy, NullText, Progress, ValueRows};
pub use registry::{Aggregate, Aggregator, AggregatorEntry, AggregatorFn, AggregatorRegistry};
pub use shell::{
    OutputPart, ProcessRunner, ShellCache, ShellColumn, ShellKey, ShellOutput, ShellTemplate,
    TokioRunner,
};
pub use stats::{median, percentile_at, quantile_cut_points, PercentileTable};
