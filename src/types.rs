use parking_lot::RwLock;
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::core::Aggregator;
use crate::error::{AggregateError, ConversionError};

/// Position of a row within its sheet
pub type RowId = usize;

/// A derived cell that resolves once its background computation finishes
pub type DeferredValue = Pin<Box<dyn Future<Output = Result<Value, ConversionError>> + Send + 'static>>;

/// Default cadence of progress events, in rows
pub const DEFAULT_PROGRESS_EVERY: usize = 1000;

//==============================================================================
// Typed values
//==============================================================================

/// A typed cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Ordered values (`list`, `distinct`, multi-column row keys)
    List(Vec<Value>),
}

/// Hashable projection of a [`Value`], used for set semantics.
/// Integral floats collapse onto the matching integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    List(Vec<ValueKey>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view; booleans count as 0/1
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Total order within a kind; numbers compare across int/float/bool.
    pub fn compare(&self, other: &Value) -> Result<Ordering, AggregateError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                Ok(x.total_cmp(&y))
            }
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            (Value::Null, Value::Null) => Ok(Ordering::Equal),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            (a, b) => Err(AggregateError::Incomparable(a.type_name(), b.type_name())),
        }
    }

    /// Values of different classes never compare: null, numeric, text, list
    pub fn order_class(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => 1,
            Value::Text(_) => 2,
            Value::List(_) => 3,
        }
    }

    /// Total order over every value, for sorting.
    ///
    /// Agrees with [`Value::compare`] wherever that succeeds. Classes order by
    /// [`Value::order_class`]; numbers order by their float value, then exactly
    /// by their integral part so large ints keep a consistent order.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let x = a.as_f64().unwrap_or(0.0);
                let y = b.as_f64().unwrap_or(0.0);
                x.total_cmp(&y)
                    .then_with(|| a.integral_part().cmp(&b.integral_part()))
            }
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.sort_cmp(y))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (a, b) => a.order_class().cmp(&b.order_class()),
        }
    }

    fn integral_part(&self) -> i64 {
        match self {
            Value::Int(i) => *i,
            Value::Bool(b) => i64::from(*b),
            Value::Float(f) if f.fract() == 0.0 => *f as i64,
            _ => 0,
        }
    }

    /// Numeric addition. Integers stay integers until they overflow.
    pub fn add(&self, other: &Value) -> Result<Value, AggregateError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(a
                .checked_add(*b)
                .map(Value::Int)
                .unwrap_or(Value::Float(*a as f64 + *b as f64))),
            (Value::Bool(_) | Value::Int(_), Value::Bool(_) | Value::Int(_)) => {
                let sum = self.as_f64().unwrap_or(0.0) + other.as_f64().unwrap_or(0.0);
                Ok(Value::Int(sum as i64))
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Value::Float(x + y)),
                (None, _) => Err(AggregateError::NotNumeric(a.type_name())),
                (_, None) => Err(AggregateError::NotNumeric(b.type_name())),
            },
        }
    }

    pub fn key(&self) -> ValueKey {
        match self {
            Value::Null => ValueKey::Null,
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Int(i) => ValueKey::Int(*i),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    ValueKey::Int(*f as i64)
                } else {
                    ValueKey::Float(f.to_bits())
                }
            }
            Value::Text(s) => ValueKey::Text(s.clone()),
            Value::List(items) => ValueKey::List(items.iter().map(Value::key).collect()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_number(*x)),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                let strs: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", strs.join(", "))
            }
        }
    }
}

impl From<&serde_yaml::Value> for Value {
    fn from(raw: &serde_yaml::Value) -> Self {
        match raw {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_yaml::Value::String(s) => Value::Text(s.clone()),
            serde_yaml::Value::Sequence(seq) => Value::List(seq.iter().map(Value::from).collect()),
            other => Value::Text(serde_yaml::to_string(other).unwrap_or_default().trim().to_string()),
        }
    }
}

/// Format a number for display, removing unnecessary decimal places
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        return format!("{}", n);
    }
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

//==============================================================================
// Column types
//==============================================================================

/// Declared column type: drives conversion of raw cells and of aggregate results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Any,
    #[serde(alias = "str", alias = "string")]
    Text,
    #[serde(alias = "integer")]
    Int,
    #[serde(alias = "number")]
    Float,
    #[serde(alias = "boolean")]
    Bool,
    /// Length of a collection (the result type of `distinct`)
    Len,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Any => "any",
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Len => "len",
        }
    }

    /// Convert a value to this type. Null passes through untouched.
    pub fn coerce(&self, value: Value) -> Result<Value, ConversionError> {
        let fail = |v: &Value, target| ConversionError::Convert {
            value: v.to_string(),
            target,
        };
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::Any, v) => Ok(v),
            (ColumnType::Text, v) => Ok(Value::Text(v.to_string())),
            (ColumnType::Int, Value::Int(i)) => Ok(Value::Int(i)),
            (ColumnType::Int, Value::Float(f)) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
            (ColumnType::Int, Value::Bool(b)) => Ok(Value::Int(b as i64)),
            (ColumnType::Int, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => Err(fail(&Value::Text(s), "int")),
            },
            (ColumnType::Float, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Ok(Value::Float(f)),
                Err(_) => Err(fail(&Value::Text(s), "float")),
            },
            (ColumnType::Float, v) => v.as_f64().map(Value::Float).ok_or_else(|| fail(&v, "float")),
            (ColumnType::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (ColumnType::Bool, Value::Int(i)) => Ok(Value::Bool(i != 0)),
            (ColumnType::Bool, Value::Text(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail(&Value::Text(s), "bool")),
            },
            (ColumnType::Len, Value::List(items)) => Ok(Value::Int(items.len() as i64)),
            (ColumnType::Len, Value::Text(s)) => Ok(Value::Int(s.chars().count() as i64)),
            (ColumnType::Int | ColumnType::Float | ColumnType::Bool | ColumnType::Len, v) => {
                Err(fail(&v, self.name()))
            }
        }
    }
}

//==============================================================================
// Columns and rows
//==============================================================================

/// A named, typed column with its attached aggregators.
///
/// Shared by every row of its sheet; the aggregator list is the only mutable part.
#[derive(Debug)]
pub struct Column {
    name: String,
    kind: ColumnType,
    aggregators: RwLock<Vec<Arc<Aggregator>>>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            aggregators: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ColumnType {
        self.kind
    }

    /// Snapshot of the attached aggregators, in attachment order
    pub fn aggregators(&self) -> Vec<Arc<Aggregator>> {
        self.aggregators.read().clone()
    }

    /// Append `aggregator` unless this exact object is already attached.
    /// Returns whether it was added.
    pub fn attach(&self, aggregator: &Arc<Aggregator>) -> bool {
        let mut attached = self.aggregators.write();
        if attached.iter().any(|a| Arc::ptr_eq(a, aggregator)) {
            return false;
        }
        attached.push(Arc::clone(aggregator));
        true
    }

    pub fn set_aggregators(&self, aggregators: Vec<Arc<Aggregator>>) {
        *self.aggregators.write() = aggregators;
    }

    /// Display form of a value of this column
    pub fn format(&self, value: &Value) -> String {
        value.to_string()
    }
}

/// Row identity, stable for the lifetime of the sheet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RowKey {
    /// Sheets without key columns identify rows by position
    Index(usize),
    /// Display values of the key columns
    Keys(Vec<String>),
}

impl RowKey {
    pub fn to_value(&self) -> Value {
        match self {
            RowKey::Index(i) => Value::Int(*i as i64),
            RowKey::Keys(keys) if keys.len() == 1 => Value::Text(keys[0].clone()),
            RowKey::Keys(keys) => Value::List(keys.iter().cloned().map(Value::Text).collect()),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Index(i) => write!(f, "#{}", i),
            RowKey::Keys(keys) => write!(f, "{}", keys.join(", ")),
        }
    }
}

/// What the engine needs from a host sheet
pub trait Sheet: Send + Sync {
    fn name(&self) -> &str;

    fn column(&self, name: &str) -> Option<Arc<Column>>;

    /// The typed value of `column` at `row`; fails on bad or missing data
    fn typed_value(&self, column: &Column, row: RowId) -> Result<Value, ConversionError>;

    fn row_key(&self, row: RowId) -> RowKey;

    /// Awaitable value of a column computed in the background. `None` for
    /// columns whose `typed_value` is already final.
    fn deferred_value(&self, _column: &Column, _row: RowId) -> Option<DeferredValue> {
        None
    }

    /// Null predicate used when extracting values for aggregation
    fn is_null(&self, value: &Value) -> bool {
        value.is_null()
    }

    fn progress_every(&self) -> usize {
        DEFAULT_PROGRESS_EVERY
    }
}
