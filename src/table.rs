//! In-memory table: the sheet the CLI aggregates over
//!
//! Data columns read raw cells and convert them to the declared type. Shell
//! columns project a cached per-row process run.

use std::sync::Arc;

use crate::core::{
    Derived, Lookup, NullPolicy, NullText, OutputPart, ProcessRunner, ShellCache, ShellColumn,
    ShellTemplate,
};
use crate::error::{ConversionError, TallyError, TallyResult};
use crate::types::{
    Column, ColumnType, DeferredValue, RowId, RowKey, Sheet, Value, DEFAULT_PROGRESS_EVERY,
};

/// Where a column's values come from
#[derive(Clone)]
pub enum ColumnSource {
    /// Index into each row's raw cells
    Field(usize),
    Shell(Arc<ShellColumn>, OutputPart),
}

pub struct Table {
    name: String,
    columns: Vec<(Arc<Column>, ColumnSource)>,
    fields: usize,
    keys: Vec<String>,
    rows: Vec<Vec<Value>>,
    nulls: Arc<dyn NullPolicy>,
    progress_every: usize,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            fields: 0,
            keys: Vec::new(),
            rows: Vec::new(),
            nulls: Arc::new(NullText::default()),
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    pub fn with_null_policy(mut self, nulls: Arc<dyn NullPolicy>) -> Self {
        self.nulls = nulls;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every.max(1);
        self
    }

    /// Add a data column; its cells are at the next field position of each row
    pub fn add_column(&mut self, name: impl Into<String>, kind: ColumnType) -> Arc<Column> {
        let column = Arc::new(Column::new(name, kind));
        self.columns
            .push((Arc::clone(&column), ColumnSource::Field(self.fields)));
        self.fields += 1;
        column
    }

    pub fn add_row(&mut self, cells: Vec<Value>) -> TallyResult<RowId> {
        if cells.len() > self.fields {
            return Err(TallyError::Parse(format!(
                "Row {} has {} cells, table '{}' has {} columns",
                self.rows.len(),
                cells.len(),
                self.name,
                self.fields
            )));
        }
        self.rows.push(cells);
        Ok(self.rows.len() - 1)
    }

    /// Identify rows by these columns instead of by position
    pub fn set_keys(&mut self, keys: Vec<String>) -> TallyResult<()> {
        for key in &keys {
            match self.source(key) {
                Some(ColumnSource::Field(_)) => {}
                Some(ColumnSource::Shell(..)) => {
                    return Err(TallyError::Parse(format!(
                        "Derived column '{}' cannot be a key",
                        key
                    )))
                }
                None => return Err(TallyError::UnknownColumn(key.clone())),
            }
        }
        self.keys = keys;
        Ok(())
    }

    /// Add `<template>`, `<template>_stdout` and `<template>_stderr`, all backed
    /// by one cached process run per row.
    ///
    /// Fails without adding anything if one of those names is already taken.
    pub fn add_shell_columns(
        &mut self,
        template: ShellTemplate,
        cache: Arc<ShellCache>,
        runner: Arc<dyn ProcessRunner>,
    ) -> TallyResult<Vec<Arc<Column>>> {
        const PARTS: [OutputPart; 3] =
            [OutputPart::Combined, OutputPart::Stdout, OutputPart::Stderr];
        let names: Vec<String> = PARTS
            .iter()
            .map(|part| format!("{}{}", template.text(), part.suffix()))
            .collect();
        if let Some(taken) = names.iter().find(|name| self.column(name).is_some()) {
            return Err(TallyError::Parse(format!(
                "Column '{}' already exists in table '{}'",
                taken, self.name
            )));
        }

        let shell = Arc::new(ShellColumn::new(template, cache, runner));
        Ok(PARTS
            .into_iter()
            .zip(names)
            .map(|(part, name)| {
                let column = Arc::new(Column::new(name, ColumnType::Text));
                self.columns.push((
                    Arc::clone(&column),
                    ColumnSource::Shell(Arc::clone(&shell), part),
                ));
                column
            })
            .collect())
    }

    pub fn columns(&self) -> Vec<Arc<Column>> {
        self.columns.iter().map(|(c, _)| Arc::clone(c)).collect()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Every row, in order
    pub fn row_ids(&self) -> Vec<RowId> {
        (0..self.rows.len()).collect()
    }

    fn source(&self, name: &str) -> Option<&ColumnSource> {
        self.columns
            .iter()
            .find(|(c, _)| c.name() == name)
            .map(|(_, source)| source)
    }

    /// Source of `column`: this table's own column object, else the first
    /// column of the same name
    fn source_of(&self, column: &Column) -> Option<&ColumnSource> {
        self.columns
            .iter()
            .find(|(c, _)| std::ptr::eq(c.as_ref(), column))
            .map(|(_, source)| source)
            .or_else(|| self.source(column.name()))
    }

    /// Derived text of a shell column at `row`, waiting for the process if needed
    pub async fn derive(&self, column: &Column, row: RowId) -> TallyResult<Derived<String>> {
        match self.source_of(column) {
            Some(ColumnSource::Shell(shell, part)) => Ok(shell
                .get(self, row)
                .await
                .map(|output| part.project(&output))),
            _ => Err(TallyError::UnknownColumn(format!(
                "{} is not a derived column",
                column.name()
            ))),
        }
    }
}

impl Sheet for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn column(&self, name: &str) -> Option<Arc<Column>> {
        self.columns
            .iter()
            .find(|(c, _)| c.name() == name)
            .map(|(c, _)| Arc::clone(c))
    }

    fn typed_value(&self, column: &Column, row: RowId) -> Result<Value, ConversionError> {
        match self.source_of(column) {
            Some(ColumnSource::Field(i)) => {
                let raw = self
                    .rows
                    .get(row)
                    .and_then(|cells| cells.get(*i))
                    .ok_or(ConversionError::Missing(row))?;
                column.kind().coerce(raw.clone())
            }
            Some(ColumnSource::Shell(shell, part)) => match shell.poll(self, row) {
                Lookup::Pending => Err(ConversionError::Pending),
                Lookup::Resolved(Ok(output)) => Ok(Value::Text(part.project(&output))),
                Lookup::Resolved(Err(e)) => Err(ConversionError::Derivation(e.to_string())),
            },
            None => Err(ConversionError::Missing(row)),
        }
    }

    fn deferred_value(&self, column: &Column, row: RowId) -> Option<DeferredValue> {
        match self.source_of(column)? {
            ColumnSource::Shell(shell, part) => {
                let part = *part;
                let output = shell.resolve(self, row);
                let value: DeferredValue = Box::pin(async move {
                    match output.await {
                        Ok(output) => Ok(Value::Text(part.project(&output))),
                        Err(e) => Err(ConversionError::Derivation(e.to_string())),
                    }
                });
                Some(value)
            }
            ColumnSource::Field(_) => None,
        }
    }

    fn row_key(&self, row: RowId) -> RowKey {
        if self.keys.is_empty() {
            return RowKey::Index(row);
        }
        RowKey::Keys(
            self.keys
                .iter()
                .map(|name| match self.column(name) {
                    Some(column) => self
                        .typed_value(&column, row)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                    None => String::new(),
                })
                .collect(),
        )
    }

    fn is_null(&self, value: &Value) -> bool {
        self.nulls.is_null(value)
    }

    fn progress_every(&self) -> usize {
        self.progress_every
    }
}
