//! Column <-> aggregator binding
//!
//! Attaching, listing and parsing the aggregators of a column, and turning an
//! aggregate into the string shown to the user.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::registry::{Aggregate, Aggregator, AggregatorRegistry};
use crate::error::TallyResult;
use crate::types::{Column, RowId, Sheet, Value};

//==============================================================================
// Status sinks
//==============================================================================

/// Fire-and-forget display of a computed result
pub trait StatusSink: Send + Sync {
    fn report(&self, status: &str);
}

/// Logs each status at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn report(&self, status: &str) {
        info!(target: "tally::status", "{}", status);
    }
}

/// Keeps every status, in arrival order
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl StatusSink for CollectingSink {
    fn report(&self, status: &str) {
        self.lines.lock().push(status.to_string());
    }
}

//==============================================================================
// Binding
//==============================================================================

/// Attach every aggregator named in `names` to every column in `columns`.
///
/// Family names attach each member. An aggregator already on a column (same
/// object) is not added twice. Unknown names fail before anything is attached.
/// Returns how many attachments were made.
pub fn attach_aggregators<S: AsRef<str>>(
    registry: &AggregatorRegistry,
    columns: &[Arc<Column>],
    names: &[S],
) -> TallyResult<usize> {
    let mut resolved = Vec::new();
    for name in names {
        resolved.extend(registry.resolve(name.as_ref())?);
    }

    let mut added = 0;
    for aggr in &resolved {
        for column in columns {
            if column.attach(aggr) {
                debug!(column = column.name(), aggregator = aggr.name(), "attached aggregator");
                added += 1;
            }
        }
    }
    Ok(added)
}

/// Space-joined names of the column's aggregators, in attachment order
pub fn format_aggregator_list(column: &Column) -> String {
    column
        .aggregators()
        .iter()
        .map(|a| a.name().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Replace the column's aggregators with those named in `text`.
/// On an unknown name the column is left unchanged.
pub fn parse_aggregator_list(
    registry: &AggregatorRegistry,
    column: &Column,
    text: &str,
) -> TallyResult<()> {
    let mut aggregators = Vec::new();
    for token in text.split_whitespace() {
        aggregators.extend(registry.resolve(token)?);
    }
    column.set_aggregators(aggregators);
    Ok(())
}

/// Header for an aggregate of a column, e.g. `size_sum`
pub fn display_name(column: &Column, aggregator: &Aggregator) -> String {
    format!("{}_{}", column.name(), aggregator.name())
}

//==============================================================================
// Reports
//==============================================================================

/// A computed aggregate and its display form
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub label: String,
    pub outcome: Aggregate,
    pub display: String,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.display)
    }
}

/// Display form of an aggregate: converted to the aggregator's result type
/// (or the column's type), then formatted by the column. A failed conversion
/// falls back to the raw value.
pub fn render(column: &Column, aggregator: &Aggregator, outcome: &Aggregate) -> String {
    match outcome {
        Aggregate::Value(value) => {
            let kind = aggregator.result_type().unwrap_or(column.kind());
            match kind.coerce(value.clone()) {
                Ok(typed) => column.format(&typed),
                Err(e) => {
                    warn!(
                        column = column.name(),
                        aggregator = aggregator.name(),
                        error = %e,
                        "result conversion failed; showing raw value"
                    );
                    column.format(value)
                }
            }
        }
        Aggregate::Empty => column.format(&Value::Null),
        Aggregate::Error(e) => format!("error: {}", e),
    }
}

/// Run `aggregator` over `rows`, publish the formatted result to `sink`, and
/// return the report. Never fails: errors become the displayed result.
pub fn compute_and_report(
    column: &Column,
    aggregator: &Aggregator,
    sheet: &dyn Sheet,
    rows: &[RowId],
    sink: &dyn StatusSink,
) -> Report {
    let outcome = aggregator.apply(column, sheet, rows);
    publish(column, aggregator, outcome, sink)
}

/// Render an already computed aggregate and hand it to `sink`
pub fn publish(
    column: &Column,
    aggregator: &Aggregator,
    outcome: Aggregate,
    sink: &dyn StatusSink,
) -> Report {
    let display = render(column, aggregator, &outcome);
    sink.report(&display);
    Report {
        label: display_name(column, aggregator),
        outcome,
        display,
    }
}
