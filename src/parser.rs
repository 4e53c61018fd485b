//! YAML table files
//!
//! ```yaml
//! name: files
//! key: [filename]
//! columns:
//!   - name: filename
//!     type: text
//!   - name: size
//!     type: int
//!     aggregators: sum max q4
//! rows:
//!   - [a.txt, 120]
//!   - {filename: b.txt, size: n/a}
//! ```
//!
//! Rows are either sequences (cells in column order) or mappings by column name.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::TallyConfig;
use crate::core::{parse_aggregator_list, AggregatorRegistry};
use crate::error::{TallyError, TallyResult};
use crate::table::Table;
use crate::types::{ColumnType, Value};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TableFile {
    name: Option<String>,
    #[serde(default)]
    key: Vec<String>,
    columns: Vec<ColumnDecl>,
    #[serde(default)]
    rows: Vec<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ColumnDecl {
    name: String,
    #[serde(default, rename = "type")]
    kind: ColumnType,
    /// Aggregator list in the whitespace-separated mini-format
    #[serde(default)]
    aggregators: Option<String>,
}

/// Parse a table file
pub fn parse_table(path: &Path, registry: &AggregatorRegistry, config: &TallyConfig) -> TallyResult<Table> {
    let content = std::fs::read_to_string(path)?;
    let fallback = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    parse_table_str(&content, fallback, registry, config)
}

/// Parse table YAML; `fallback_name` is used when the file names no table
pub fn parse_table_str(
    content: &str,
    fallback_name: &str,
    registry: &AggregatorRegistry,
    config: &TallyConfig,
) -> TallyResult<Table> {
    let file: TableFile = serde_yaml::from_str(content)?;
    if file.columns.is_empty() {
        return Err(TallyError::Parse("Table declares no columns".to_string()));
    }

    let mut table = Table::new(file.name.unwrap_or_else(|| fallback_name.to_string()))
        .with_null_policy(Arc::new(config.null_policy()))
        .with_progress_every(config.progress_every);

    let mut names = Vec::with_capacity(file.columns.len());
    for decl in &file.columns {
        if names.contains(&decl.name.as_str()) {
            return Err(TallyError::Parse(format!("Duplicate column '{}'", decl.name)));
        }
        names.push(decl.name.as_str());
        let column = table.add_column(decl.name.clone(), decl.kind);
        if let Some(list) = &decl.aggregators {
            parse_aggregator_list(registry, &column, list)?;
        }
    }

    for (i, raw) in file.rows.iter().enumerate() {
        let cells = match raw {
            serde_yaml::Value::Sequence(seq) => seq.iter().map(Value::from).collect(),
            serde_yaml::Value::Mapping(map) => {
                for field in map.keys() {
                    let field = field.as_str().unwrap_or_default();
                    if !names.contains(&field) {
                        return Err(TallyError::Parse(format!(
                            "Row {} references unknown column '{}'",
                            i, field
                        )));
                    }
                }
                names
                    .iter()
                    .map(|name| map.get(*name).map(Value::from).unwrap_or(Value::Null))
                    .collect()
            }
            other => {
                return Err(TallyError::Parse(format!(
                    "Row {} must be a sequence or mapping, got {:?}",
                    i, other
                )))
            }
        };
        table.add_row(cells)?;
    }

    table.set_keys(file.key)?;
    Ok(table)
}
