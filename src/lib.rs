//! Tally - column aggregation and cached derived columns
//!
//! This library extracts typed values from table columns, applies named
//! aggregators to them (min, max, mean, median, percentiles, quantile
//! families, ...), and computes expensive derived columns through a
//! single-flight cache.
//!
//! # Features
//!
//! - Lazy value extraction that skips unconvertible and null cells
//! - Aggregator registry with bulk and row-aware aggregators
//! - Linear-interpolation percentiles and quantile families (`q3`, `q4`, `q5`, `q10`)
//! - Shell-derived columns: one process run per row, cached, never blocking reads
//! - Background aggregation with results published to a status sink
//!
//! # Example
//!
//! ```no_run
//! use royalbit_tally::config::TallyConfig;
//! use royalbit_tally::core::{attach_aggregators, compute_and_report, AggregatorRegistry, TracingSink};
//! use royalbit_tally::parser::parse_table;
//! use royalbit_tally::types::Sheet;
//! use std::path::Path;
//!
//! let registry = AggregatorRegistry::new();
//! let table = parse_table(Path::new("files.yaml"), &registry, &TallyConfig::default())?;
//! let size = table.column("size").expect("size column");
//! attach_aggregators(&registry, &[size.clone()], &["sum", "q4"])?;
//!
//! let rows = table.row_ids();
//! for aggregator in size.aggregators() {
//!     let report = compute_and_report(&size, &aggregator, &table, &rows, &TracingSink);
//!     println!("{}", report);
//! }
//! # Ok::<(), royalbit_tally::error::TallyError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod parser;
pub mod table;
pub mod types;

// Re-export commonly used types
pub use error::{TallyError, TallyResult};
pub use types::{Column, ColumnType, RowId, RowKey, Sheet, Value};
