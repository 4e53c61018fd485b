//! Aggregator registry
//!
//! Maps names to aggregators, or to ordered aggregator families (`q4` is
//! `p25 p50 p75`). Registration is append-only from the engine's point of
//! view; lookups see either the old or the new entry, never a partial one.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use super::extract::{value_rows, values};
use super::stats::{median, PercentileTable};
use crate::error::{AggregateError, TallyError, TallyResult};
use crate::types::{Column, ColumnType, RowId, Sheet, Value};

/// Outcome of applying an aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Value(Value),
    /// Nothing to aggregate: no answer, which is not the same as zero
    Empty,
    /// The aggregator failed on non-empty input
    Error(AggregateError),
}

impl Aggregate {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Aggregate::Value(v) => Some(v),
            _ => None,
        }
    }
}

pub type BulkFn = Arc<dyn Fn(&[Value]) -> Result<Value, AggregateError> + Send + Sync>;
pub type RowAwareFn = Arc<dyn Fn(&Column, &dyn Sheet, &[RowId]) -> Aggregate + Send + Sync>;

/// The two aggregator shapes
#[derive(Clone)]
pub enum AggregatorFn {
    /// Runs over the extracted values of the column
    Bulk(BulkFn),
    /// Runs over the column and rows directly, for aggregators that need row identity
    RowAware(RowAwareFn),
}

/// A named aggregation function with an optional display type
pub struct Aggregator {
    name: String,
    result_type: Option<ColumnType>,
    func: AggregatorFn,
}

impl Aggregator {
    pub fn bulk<F>(name: impl Into<String>, result_type: Option<ColumnType>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, AggregateError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            result_type,
            func: AggregatorFn::Bulk(Arc::new(func)),
        }
    }

    pub fn row_aware<F>(name: impl Into<String>, result_type: Option<ColumnType>, func: F) -> Self
    where
        F: Fn(&Column, &dyn Sheet, &[RowId]) -> Aggregate + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            result_type,
            func: AggregatorFn::RowAware(Arc::new(func)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type used to display the result, overriding the column's own type
    pub fn result_type(&self) -> Option<ColumnType> {
        self.result_type
    }

    pub fn func(&self) -> &AggregatorFn {
        &self.func
    }

    /// Aggregate `column` over `rows`.
    ///
    /// Bulk functions see the materialized values; a failure over zero values
    /// is [`Aggregate::Empty`], over any values it is [`Aggregate::Error`].
    pub fn apply(&self, column: &Column, sheet: &dyn Sheet, rows: &[RowId]) -> Aggregate {
        match &self.func {
            AggregatorFn::Bulk(f) => {
                let vals: Vec<Value> = values(column, sheet, rows).collect();
                match f(&vals) {
                    Ok(v) => Aggregate::Value(v),
                    Err(_) if vals.is_empty() => Aggregate::Empty,
                    Err(e) => Aggregate::Error(e),
                }
            }
            AggregatorFn::RowAware(f) => f(column, sheet, rows),
        }
    }
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self.func {
            AggregatorFn::Bulk(_) => "bulk",
            AggregatorFn::RowAware(_) => "row-aware",
        };
        f.debug_struct("Aggregator")
            .field("name", &self.name)
            .field("result_type", &self.result_type)
            .field("shape", &shape)
            .finish()
    }
}

/// What a registry name maps to
#[derive(Debug, Clone)]
pub enum AggregatorEntry {
    Single(Arc<Aggregator>),
    Family(Vec<Arc<Aggregator>>),
}

impl AggregatorEntry {
    pub fn members(&self) -> Vec<Arc<Aggregator>> {
        match self {
            AggregatorEntry::Single(a) => vec![Arc::clone(a)],
            AggregatorEntry::Family(all) => all.clone(),
        }
    }
}

fn percentile_name() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^p(\d{1,3})$").expect("static pattern"))
}

/// Name -> aggregator lookup, shared by reference across the engine
#[derive(Debug, Default)]
pub struct AggregatorRegistry {
    entries: RwLock<Vec<(String, AggregatorEntry)>>,
    percentiles: PercentileTable,
}

impl AggregatorRegistry {
    /// A registry with no names registered
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the built-in aggregators
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register_builtins();
        registry
    }

    /// Register (or replace) `name`
    pub fn register(&self, name: impl Into<String>, entry: AggregatorEntry) {
        let name = name.into();
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = entry,
            None => entries.push((name, entry)),
        }
    }

    pub fn register_bulk<F>(&self, name: &str, result_type: Option<ColumnType>, func: F) -> Arc<Aggregator>
    where
        F: Fn(&[Value]) -> Result<Value, AggregateError> + Send + Sync + 'static,
    {
        let aggr = Arc::new(Aggregator::bulk(name, result_type, func));
        self.register(name, AggregatorEntry::Single(Arc::clone(&aggr)));
        aggr
    }

    /// Register a bulk function that also takes fixed extra arguments
    pub fn register_bulk_with_args<F>(
        &self,
        name: &str,
        result_type: Option<ColumnType>,
        func: F,
        args: Vec<Value>,
    ) -> Arc<Aggregator>
    where
        F: Fn(&[Value], &[Value]) -> Result<Value, AggregateError> + Send + Sync + 'static,
    {
        self.register_bulk(name, result_type, move |vals| func(vals, &args))
    }

    pub fn register_row_aware<F>(&self, name: &str, result_type: Option<ColumnType>, func: F) -> Arc<Aggregator>
    where
        F: Fn(&Column, &dyn Sheet, &[RowId]) -> Aggregate + Send + Sync + 'static,
    {
        let aggr = Arc::new(Aggregator::row_aware(name, result_type, func));
        self.register(name, AggregatorEntry::Single(Arc::clone(&aggr)));
        aggr
    }

    pub fn register_family(&self, name: &str, members: Vec<Arc<Aggregator>>) {
        self.register(name, AggregatorEntry::Family(members));
    }

    pub fn get(&self, name: &str) -> Option<AggregatorEntry> {
        self.entries
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, entry)| entry.clone())
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|(n, _)| n.clone()).collect()
    }

    /// Aggregators a name stands for. `p<N>` resolves to the memoized percentile
    /// even when not registered, so attached lists always parse back.
    pub fn resolve(&self, name: &str) -> TallyResult<Vec<Arc<Aggregator>>> {
        if let Some(entry) = self.get(name) {
            return Ok(entry.members());
        }
        percentile_name()
            .captures(name)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|pct| *pct <= 100)
            .map(|pct| vec![self.percentile(pct)])
            .ok_or_else(|| TallyError::UnknownAggregator(name.to_string()))
    }

    pub fn percentile(&self, pct: u32) -> Arc<Aggregator> {
        self.percentiles.get(pct)
    }

    pub fn quantiles(&self, q: u32) -> Vec<Arc<Aggregator>> {
        self.percentiles.quantiles(q)
    }

    fn register_builtins(&self) {
        self.register_bulk("min", None, |vals| extreme(vals, std::cmp::Ordering::Less));
        self.register_bulk("max", None, |vals| extreme(vals, std::cmp::Ordering::Greater));
        self.register_bulk("avg", Some(ColumnType::Float), mean);
        self.register_bulk("mean", Some(ColumnType::Float), mean);
        self.register_bulk("median", None, median);
        self.register_bulk("sum", None, sum);
        self.register_bulk("distinct", Some(ColumnType::Len), distinct);
        self.register_bulk("count", Some(ColumnType::Int), |vals| {
            Ok(Value::Int(vals.len() as i64))
        });
        self.register_bulk("list", None, |vals| Ok(Value::List(vals.to_vec())));

        for q in [3, 4, 5, 10] {
            self.register_family(&format!("q{}", q), self.quantiles(q));
        }

        self.register_row_aware("keymax", Some(ColumnType::Any), keymax);
        debug!(names = self.entries.read().len(), "registered builtin aggregators");
    }
}

//==============================================================================
// Built-in aggregator functions
//==============================================================================

/// First value that no later value beats in direction `wanted`
fn extreme(vals: &[Value], wanted: std::cmp::Ordering) -> Result<Value, AggregateError> {
    let mut best: Option<&Value> = None;
    for v in vals {
        best = match best {
            Some(b) if v.compare(b)? != wanted => Some(b),
            _ => Some(v),
        };
    }
    best.cloned().ok_or(AggregateError::EmptyInput)
}

pub fn mean(vals: &[Value]) -> Result<Value, AggregateError> {
    if vals.is_empty() {
        return Err(AggregateError::EmptyInput);
    }
    let mut total = 0.0;
    for v in vals {
        total += v.as_f64().ok_or(AggregateError::NotNumeric(v.type_name()))?;
    }
    Ok(Value::Float(total / vals.len() as f64))
}

pub fn sum(vals: &[Value]) -> Result<Value, AggregateError> {
    vals.iter().try_fold(Value::Int(0), |acc, v| acc.add(v))
}

/// Unique values in first-seen order
pub fn distinct(vals: &[Value]) -> Result<Value, AggregateError> {
    let mut seen = HashSet::new();
    Ok(Value::List(
        vals.iter()
            .filter(|v| seen.insert(v.key()))
            .cloned()
            .collect(),
    ))
}

/// Row key of the row holding the maximum value.
///
/// Ties go to the earliest row in iteration order: a later row replaces the
/// current best only when strictly greater.
pub fn keymax(column: &Column, sheet: &dyn Sheet, rows: &[RowId]) -> Aggregate {
    let mut best: Option<(Value, RowId)> = None;
    for (value, row) in value_rows(column, sheet, rows) {
        best = match best {
            None => Some((value, row)),
            Some((b, brow)) => match value.compare(&b) {
                Ok(std::cmp::Ordering::Greater) => Some((value, row)),
                Ok(_) => Some((b, brow)),
                Err(e) => return Aggregate::Error(e),
            },
        };
    }
    match best {
        Some((_, row)) => Aggregate::Value(sheet.row_key(row).to_value()),
        None => Aggregate::Empty,
    }
}
