//! Value extraction: (column, rows) -> lazy (value, row) pairs
//!
//! Rows whose typed value fails to convert, or is null, are skipped.
//! One malformed cell never aborts an aggregation.

use std::slice;
use tracing::{debug, trace};

use crate::types::{Column, RowId, Sheet, Value, DEFAULT_PROGRESS_EVERY};

//==============================================================================
// Null predicate
//==============================================================================

/// Decides whether a typed value counts as null for aggregation
pub trait NullPolicy: Send + Sync {
    fn is_null(&self, value: &Value) -> bool;
}

impl<F> NullPolicy for F
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn is_null(&self, value: &Value) -> bool {
        self(value)
    }
}

/// `Value::Null`, plus an optional sentinel text (e.g. `""` or `"NA"`)
#[derive(Debug, Clone, Default)]
pub struct NullText {
    pub text: Option<String>,
}

impl NullText {
    pub fn new(text: Option<String>) -> Self {
        Self { text }
    }
}

impl NullPolicy for NullText {
    fn is_null(&self, value: &Value) -> bool {
        match (value, &self.text) {
            (Value::Null, _) => true,
            (Value::Text(s), Some(null)) => s == null,
            _ => false,
        }
    }
}

//==============================================================================
// Progress
//==============================================================================

/// Passthrough iterator that reports how many items it has yielded
pub struct Progress<I> {
    inner: I,
    label: &'static str,
    every: usize,
    seen: usize,
}

impl<I: Iterator> Progress<I> {
    pub fn new(inner: I, label: &'static str) -> Self {
        Self::with_every(inner, label, DEFAULT_PROGRESS_EVERY)
    }

    pub fn with_every(inner: I, label: &'static str, every: usize) -> Self {
        Self {
            inner,
            label,
            every: every.max(1),
            seen: 0,
        }
    }
}

impl<I: Iterator> Iterator for Progress<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        match self.inner.next() {
            Some(item) => {
                self.seen += 1;
                if self.seen % self.every == 0 {
                    trace!(label = self.label, rows = self.seen, "progress");
                }
                Some(item)
            }
            None => {
                if self.seen > 0 {
                    debug!(label = self.label, rows = self.seen, "done");
                }
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

//==============================================================================
// Extractor
//==============================================================================

/// Lazy sequence of significant `(value, row)` pairs
pub struct ValueRows<'a> {
    column: &'a Column,
    sheet: &'a dyn Sheet,
    rows: Progress<slice::Iter<'a, RowId>>,
}

impl Iterator for ValueRows<'_> {
    type Item = (Value, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        for &row in self.rows.by_ref() {
            match self.sheet.typed_value(self.column, row) {
                Ok(value) if self.sheet.is_null(&value) => {}
                Ok(value) => return Some((value, row)),
                Err(e) => trace!(column = self.column.name(), row, error = %e, "skipping row"),
            }
        }
        None
    }
}

/// Generate `(value, row)` for `rows` of `column`, excluding errors and nulls
pub fn value_rows<'a>(column: &'a Column, sheet: &'a dyn Sheet, rows: &'a [RowId]) -> ValueRows<'a> {
    ValueRows {
        column,
        sheet,
        rows: Progress::with_every(rows.iter(), "calculating", sheet.progress_every()),
    }
}

/// Value-only projection of [`value_rows`]
pub fn values<'a>(
    column: &'a Column,
    sheet: &'a dyn Sheet,
    rows: &'a [RowId],
) -> impl Iterator<Item = Value> + 'a {
    value_rows(column, sheet, rows).map(|(value, _)| value)
}
