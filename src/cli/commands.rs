use crate::config::TallyConfig;
use crate::core::{
    attach_aggregators, collect_reports, Aggregate, AggregatorEntry, AggregatorRegistry,
    Background, Report, ShellCache, ShellTemplate, StatusSink, TokioRunner, TracingSink,
};
use crate::error::{TallyError, TallyResult};
use crate::parser;
use crate::table::Table;
use crate::types::{Column, Sheet};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Execute the aggregators command
pub fn aggregators(registry: &AggregatorRegistry) -> TallyResult<()> {
    println!("{}", "📋 Available aggregators".bold().green());
    for line in aggregator_lines(registry) {
        println!("   {}", line);
    }
    Ok(())
}

/// One line per registered name; families list their members
pub fn aggregator_lines(registry: &AggregatorRegistry) -> Vec<String> {
    registry
        .names()
        .into_iter()
        .filter_map(|name| {
            registry.get(&name).map(|entry| match entry {
                AggregatorEntry::Single(_) => name,
                AggregatorEntry::Family(members) => {
                    let parts: Vec<&str> = members.iter().map(|m| m.name()).collect();
                    format!("{} ({})", name, parts.join(" "))
                }
            })
        })
        .collect()
}

/// Execute the aggregate command
pub async fn aggregate(
    file: PathBuf,
    columns: Vec<String>,
    names: Vec<String>,
    json: bool,
    registry: &AggregatorRegistry,
    config: &TallyConfig,
) -> TallyResult<()> {
    if !json {
        println!("{}", "🧮 Tally - Aggregating columns".bold().green());
        println!("   File: {}\n", file.display());
    }

    let table = parser::parse_table(&file, registry, config)?;
    let selected = select_columns(&table, &columns)?;
    attach_aggregators(registry, &selected, &names)?;

    let rows: Arc<[usize]> = table.row_ids().into();
    let reports = run_reports(Arc::new(table), &selected, rows).await;
    print_reports(&reports, json)
}

/// Execute the derive command
pub async fn derive(
    file: PathBuf,
    template: String,
    names: Vec<String>,
    json: bool,
    registry: &AggregatorRegistry,
    config: &TallyConfig,
) -> TallyResult<()> {
    if !json {
        println!("{}", "🐚 Tally - Deriving shell column".bold().green());
        println!("   File: {}", file.display());
        println!("   Command: {}\n", template.bright_yellow());
    }

    let mut table = parser::parse_table(&file, registry, config)?;
    let cache = Arc::new(ShellCache::new(Handle::current()));
    let derived = table.add_shell_columns(
        ShellTemplate::new(template, config.sigil),
        cache,
        Arc::new(TokioRunner),
    )?;
    let table = Arc::new(table);

    let mut tasks = Vec::with_capacity(table.row_count());
    for row in table.row_ids() {
        let table = Arc::clone(&table);
        let column = Arc::clone(&derived[0]);
        tasks.push(tokio::spawn(async move { table.derive(&column, row).await }));
    }

    let mut outputs = Vec::with_capacity(tasks.len());
    for (row, task) in tasks.into_iter().enumerate() {
        let derived = task
            .await
            .map_err(|e| TallyError::Task(e.to_string()))??;
        outputs.push((table.row_key(row).to_string(), derived));
    }

    if json {
        let rows: Vec<_> = outputs
            .iter()
            .map(|(key, derived)| match derived {
                Ok(text) => json!({ "row": key, "output": text }),
                Err(e) => json!({ "row": key, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
    } else {
        for (key, derived) in &outputs {
            match derived {
                Ok(text) => {
                    println!("   {} {}", key.bright_blue().bold(), "→".cyan());
                    for line in text.lines() {
                        println!("      {}", line);
                    }
                }
                Err(e) => println!("   {} {} {}", key.bright_blue().bold(), "❌".red(), e),
            }
        }
        println!();
    }

    if names.is_empty() {
        return Ok(());
    }
    attach_aggregators(registry, &derived, &names)?;
    let rows: Arc<[usize]> = table.row_ids().into();
    let reports = run_reports(table, &derived, rows).await;
    print_reports(&reports, json)
}

/// Named columns, or every column that has aggregators attached (or, when
/// none do, every column)
fn select_columns(table: &Table, names: &[String]) -> TallyResult<Vec<Arc<Column>>> {
    if names.is_empty() {
        let all = table.columns();
        let with_aggregators: Vec<_> = all
            .iter()
            .filter(|c| !c.aggregators().is_empty())
            .cloned()
            .collect();
        return Ok(if with_aggregators.is_empty() {
            all
        } else {
            with_aggregators
        });
    }
    names
        .iter()
        .map(|name| {
            table
                .column(name)
                .ok_or_else(|| TallyError::UnknownColumn(name.clone()))
        })
        .collect()
}

async fn run_reports(
    sheet: Arc<dyn Sheet>,
    columns: &[Arc<Column>],
    rows: Arc<[usize]>,
) -> Vec<TallyResult<Report>> {
    let sink: Arc<dyn StatusSink> = Arc::new(TracingSink);
    let handles = Background::current().spawn_reports(sheet, columns, rows, sink);
    collect_reports(handles).await
}

/// JSON form of a report
pub fn report_json(report: &Report) -> serde_json::Value {
    match &report.outcome {
        Aggregate::Value(_) => json!({ "name": report.label, "value": report.display }),
        Aggregate::Empty => json!({ "name": report.label, "value": null }),
        Aggregate::Error(e) => json!({ "name": report.label, "error": e.to_string() }),
    }
}

fn print_reports(reports: &[TallyResult<Report>], json: bool) -> TallyResult<()> {
    if json {
        let items: Vec<_> = reports
            .iter()
            .map(|r| match r {
                Ok(report) => report_json(report),
                Err(e) => json!({ "error": e.to_string() }),
            })
            .collect();
        let text = serde_json::to_string_pretty(&items)
            .map_err(|e| TallyError::Parse(format!("JSON output failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    if reports.is_empty() {
        println!("{}", "⚠️  No aggregators attached".yellow());
        return Ok(());
    }
    println!("{}", "✅ Results:".bold().green());
    for report in reports {
        match report {
            Ok(r) => match r.outcome {
                Aggregate::Error(_) => println!("   {}: {}", r.label.cyan(), r.display.red()),
                Aggregate::Empty => println!("   {}: {}", r.label.cyan(), "(no values)".dimmed()),
                Aggregate::Value(_) => println!("   {}: {}", r.label.cyan(), r.display.bold()),
            },
            Err(e) => println!("   {} {}", "❌".red(), e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AggregateError;
    use crate::types::Value;

    #[test]
    fn test_aggregator_lines() {
        let registry = AggregatorRegistry::new();
        let lines = aggregator_lines(&registry);
        assert_eq!(lines[0], "min");
        assert!(lines.contains(&"q4 (p25 p50 p75)".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("keymax"));
    }

    #[test]
    fn test_report_json() {
        let report = Report {
            label: "size_sum".to_string(),
            outcome: Aggregate::Value(Value::Int(3)),
            display: "3".to_string(),
        };
        assert_eq!(report_json(&report), json!({ "name": "size_sum", "value": "3" }));

        let empty = Report {
            outcome: Aggregate::Empty,
            display: String::new(),
            ..report.clone()
        };
        assert_eq!(report_json(&empty), json!({ "name": "size_sum", "value": null }));

        let failed = Report {
            outcome: Aggregate::Error(AggregateError::NotNumeric("text")),
            display: "error: text is not numeric".to_string(),
            ..report
        };
        assert_eq!(
            report_json(&failed),
            json!({ "name": "size_sum", "error": "text is not numeric" })
        );
    }

    #[test]
    fn test_select_columns() {
        let mut table = Table::new("t");
        let a = table.add_column("a", crate::types::ColumnType::Int);
        table.add_column("b", crate::types::ColumnType::Int);
        assert_eq!(select_columns(&table, &[]).unwrap().len(), 2);

        let registry = AggregatorRegistry::new();
        attach_aggregators(&registry, &[a], &["sum"]).unwrap();
        let selected = select_columns(&table, &[]).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "a");

        assert!(matches!(
            select_columns(&table, &["zzz".to_string()]),
            Err(TallyError::UnknownColumn(_))
        ));
    }
}
