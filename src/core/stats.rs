//! Order statistics: median, linear-interpolation percentiles, quantile families
//!
//! Percentile aggregators are memoized by integer percentage, so asking for
//! `p50` twice yields the same aggregator object (and attaching it twice is a no-op).

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::extract::values;
use super::registry::{Aggregate, Aggregator};
use crate::error::AggregateError;
use crate::types::Value;

/// Sort values ascending, failing if any pair cannot be compared.
///
/// Every value must share the first value's order class; the sort itself
/// then runs on a total order.
pub fn sort_values(mut values: Vec<Value>) -> Result<Vec<Value>, AggregateError> {
    if let Some(first) = values.first() {
        let class = first.order_class();
        if let Some(odd) = values.iter().find(|v| v.order_class() != class) {
            return Err(AggregateError::Incomparable(first.type_name(), odd.type_name()));
        }
    }
    values.sort_by(Value::sort_cmp);
    Ok(values)
}

/// Upper median: element `n / 2` of the sorted values, never interpolated
pub fn median(values: &[Value]) -> Result<Value, AggregateError> {
    let sorted = sort_values(values.to_vec())?;
    sorted
        .get(sorted.len() / 2)
        .cloned()
        .ok_or(AggregateError::EmptyInput)
}

/// Linear-interpolation percentile of ascending `sorted` values.
///
/// `fraction` is clamped to `[0, 1]`. Rank `k = (n - 1) * fraction`; an integral
/// rank returns that element as-is, otherwise the two neighbours are blended.
pub fn percentile_at(sorted: &[Value], fraction: f64) -> Result<Option<Value>, AggregateError> {
    if sorted.is_empty() {
        return Ok(None);
    }
    let k = (sorted.len() - 1) as f64 * fraction.clamp(0.0, 1.0);
    let (f, c) = (k.floor(), k.ceil());
    if f == c {
        return Ok(Some(sorted[k as usize].clone()));
    }
    let lower = &sorted[f as usize];
    let upper = &sorted[c as usize];
    let d0 = lower
        .as_f64()
        .ok_or(AggregateError::NotNumeric(lower.type_name()))?
        * (c - k);
    let d1 = upper
        .as_f64()
        .ok_or(AggregateError::NotNumeric(upper.type_name()))?
        * (k - f);
    Ok(Some(Value::Float(d0 + d1)))
}

/// Cut points of a q-quantile family: `round(100 * i / q)` for `i` in `1..q`.
/// Ties round to even.
pub fn quantile_cut_points(q: u32) -> Vec<u32> {
    (1..q)
        .map(|i| {
            let num = 100 * i;
            let (quot, rem) = (num / q, num % q);
            match (2 * rem).cmp(&q) {
                Ordering::Greater => quot + 1,
                Ordering::Equal if quot % 2 == 1 => quot + 1,
                _ => quot,
            }
        })
        .collect()
}

fn build_percentile(pct: u32) -> Aggregator {
    let fraction = f64::from(pct) / 100.0;
    Aggregator::row_aware(format!("p{}", pct), None, move |column, sheet, rows| {
        let collected: Vec<Value> = values(column, sheet, rows).collect();
        let sorted = match sort_values(collected) {
            Ok(sorted) => sorted,
            Err(e) => return Aggregate::Error(e),
        };
        match percentile_at(&sorted, fraction) {
            Ok(Some(v)) => Aggregate::Value(v),
            Ok(None) => Aggregate::Empty,
            Err(e) => Aggregate::Error(e),
        }
    })
}

/// Percentile aggregators keyed by integer percentage, built on first request
#[derive(Debug, Default)]
pub struct PercentileTable {
    built: Mutex<BTreeMap<u32, Arc<Aggregator>>>,
}

impl PercentileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `p<pct>` aggregator; the same object for every call with `pct`
    pub fn get(&self, pct: u32) -> Arc<Aggregator> {
        let mut built = self.built.lock();
        Arc::clone(
            built
                .entry(pct)
                .or_insert_with(|| Arc::new(build_percentile(pct))),
        )
    }

    /// Ordered percentile aggregators of the q-quantile family
    pub fn quantiles(&self, q: u32) -> Vec<Arc<Aggregator>> {
        quantile_cut_points(q)
            .into_iter()
            .map(|pct| self.get(pct))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.built.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
