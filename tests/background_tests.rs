//! Background aggregation and status reporting

use pretty_assertions::assert_eq;
use royalbit_tally::core::{
    attach_aggregators, collect_reports, Aggregate, Aggregator, AggregatorRegistry, Background,
    CollectingSink, StatusSink,
};
use royalbit_tally::error::TallyError;
use royalbit_tally::table::Table;
use royalbit_tally::types::{ColumnType, RowId, Sheet, Value};
use std::sync::Arc;

fn sizes() -> Table {
    let mut table = Table::new("sizes");
    table.add_column("size", ColumnType::Int);
    for v in [5, 1, 9, 3] {
        table.add_row(vec![Value::Int(v)]).unwrap();
    }
    table
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_report_publishes_to_sink() {
    let table = Arc::new(sizes());
    let registry = AggregatorRegistry::new();
    let column = table.column("size").unwrap();
    let max = registry.resolve("max").unwrap().remove(0);
    let rows: Arc<[RowId]> = table.row_ids().into();
    let sink = Arc::new(CollectingSink::new());

    let report = Background::current()
        .spawn_report(table.clone(), column, max, rows, sink.clone())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.label, "size_max");
    assert_eq!(report.outcome, Aggregate::Value(Value::Int(9)));
    assert_eq!(sink.lines(), vec!["9"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_reports_keeps_attachment_order() {
    let table = Arc::new(sizes());
    let registry = AggregatorRegistry::new();
    let column = table.column("size").unwrap();
    attach_aggregators(&registry, &[column.clone()], &["min", "q4", "count"]).unwrap();
    let rows: Arc<[RowId]> = table.row_ids().into();
    let sink = Arc::new(CollectingSink::new());

    let handles = Background::current().spawn_reports(table.clone(), &[column], rows, sink.clone());
    let reports = collect_reports(handles).await;

    let labels: Vec<String> = reports
        .iter()
        .map(|r| r.as_ref().unwrap().label.clone())
        .collect();
    assert_eq!(
        labels,
        vec!["size_min", "size_p25", "size_p50", "size_p75", "size_count"]
    );
    let displays: Vec<String> = reports
        .into_iter()
        .map(|r| r.unwrap().display)
        .collect();
    assert_eq!(displays, vec!["1", "2", "4", "6", "4"]);
    assert_eq!(sink.lines().len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_handle_still_reports() {
    let table = Arc::new(sizes());
    let registry = AggregatorRegistry::new();
    let column = table.column("size").unwrap();
    let sum = registry.resolve("sum").unwrap().remove(0);
    let rows: Arc<[RowId]> = table.row_ids().into();
    let sink = Arc::new(CollectingSink::new());

    drop(Background::current().spawn_report(table.clone(), column, sum, rows, sink.clone()));

    for _ in 0..100 {
        if !sink.lines().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(sink.lines(), vec!["18"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_aggregator_is_a_task_error() {
    let table = Arc::new(sizes());
    let column = table.column("size").unwrap();
    let boom = Arc::new(Aggregator::bulk("boom", None, |_| panic!("boom")));
    let rows: Arc<[RowId]> = table.row_ids().into();
    let sink = Arc::new(CollectingSink::new());
    let status: Arc<dyn StatusSink> = sink.clone();

    let result = Background::current()
        .spawn_report(table.clone(), column, boom, rows, status)
        .await
        .unwrap();

    assert!(matches!(result, Err(TallyError::Task(_))));
    assert!(sink.lines().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawn_compute_runs_off_thread() {
    let background = Background::current();
    let caller = std::thread::current().id();
    let worker = background
        .spawn_compute(move || std::thread::current().id())
        .await
        .unwrap();
    assert_ne!(caller, worker);
}
