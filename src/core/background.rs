//! Background execution of aggregations
//!
//! The aggregation itself runs on the blocking pool; reporting is a
//! continuation on the resulting future. Callers get a `JoinHandle` and may
//! drop it: the work and its report still happen.

use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::binding::{publish, Report, StatusSink};
use super::registry::Aggregator;
use crate::error::{TallyError, TallyResult};
use crate::types::{Column, RowId, Sheet};

#[derive(Debug, Clone)]
pub struct Background {
    handle: Handle,
}

impl Background {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Background pool of the runtime we are running in.
    ///
    /// # Panics
    /// Outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a blocking computation off the caller's thread
    pub fn spawn_compute<T, F>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.handle.spawn_blocking(f)
    }

    /// Aggregate in the background, then publish the result to `sink`.
    ///
    /// A panicking aggregator resolves to [`TallyError::Task`]; nothing is published.
    pub fn spawn_report(
        &self,
        sheet: Arc<dyn Sheet>,
        column: Arc<Column>,
        aggregator: Arc<Aggregator>,
        rows: Arc<[RowId]>,
        sink: Arc<dyn StatusSink>,
    ) -> JoinHandle<TallyResult<Report>> {
        let computation = {
            let column = Arc::clone(&column);
            let aggregator = Arc::clone(&aggregator);
            self.spawn_compute(move || aggregator.apply(&column, sheet.as_ref(), &rows))
        };
        self.handle.spawn(async move {
            let outcome = computation
                .await
                .map_err(|e| TallyError::Task(e.to_string()))?;
            Ok(publish(&column, &aggregator, outcome, sink.as_ref()))
        })
    }

    /// One background report per (column, attached aggregator), in column order
    pub fn spawn_reports(
        &self,
        sheet: Arc<dyn Sheet>,
        columns: &[Arc<Column>],
        rows: Arc<[RowId]>,
        sink: Arc<dyn StatusSink>,
    ) -> Vec<JoinHandle<TallyResult<Report>>> {
        let mut handles = Vec::new();
        for column in columns {
            for aggregator in column.aggregators() {
                handles.push(self.spawn_report(
                    Arc::clone(&sheet),
                    Arc::clone(column),
                    aggregator,
                    Arc::clone(&rows),
                    Arc::clone(&sink),
                ));
            }
        }
        handles
    }
}

/// Wait for every report, keeping spawn order
pub async fn collect_reports(handles: Vec<JoinHandle<TallyResult<Report>>>) -> Vec<TallyResult<Report>> {
    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(match handle.await {
            Ok(report) => report,
            Err(e) => Err(TallyError::Task(e.to_string())),
        });
    }
    reports
}
