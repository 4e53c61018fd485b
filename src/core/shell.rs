//! Shell-derived columns
//!
//! A shell column runs a command per row, built from a template whose
//! `$name` tokens are replaced by that row's values of sibling columns. The
//! output is cached per (column, row key); the process runs at most once per row.

use async_trait::async_trait;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::derived::{Derived, DerivedCache, Lookup};
use crate::error::DeriveError;
use crate::types::{DeferredValue, RowId, RowKey, Sheet};

/// Cache key of a derived cell: which shell column, which row
pub type ShellKey = (u64, RowKey);

pub type ShellCache = DerivedCache<ShellKey, ShellOutput>;

static NEXT_SHELL_ID: AtomicU64 = AtomicU64::new(1);

//==============================================================================
// Process output
//==============================================================================

/// Captured output of one process run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ShellOutput {
    /// stdout followed by stderr, without trailing newlines
    pub fn combined(&self) -> String {
        let out = self.stdout.trim_end_matches('\n');
        let err = self.stderr.trim_end_matches('\n');
        match (out.is_empty(), err.is_empty()) {
            (_, true) => out.to_string(),
            (true, false) => err.to_string(),
            (false, false) => format!("{}\n{}", out, err),
        }
    }
}

/// Which part of a [`ShellOutput`] a column shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputPart {
    Combined,
    Stdout,
    Stderr,
}

impl OutputPart {
    pub fn project(&self, output: &ShellOutput) -> String {
        match self {
            OutputPart::Combined => output.combined(),
            OutputPart::Stdout => output.stdout.trim_end_matches('\n').to_string(),
            OutputPart::Stderr => output.stderr.trim_end_matches('\n').to_string(),
        }
    }

    /// Column name suffix
    pub fn suffix(&self) -> &'static str {
        match self {
            OutputPart::Combined => "",
            OutputPart::Stdout => "_stdout",
            OutputPart::Stderr => "_stderr",
        }
    }
}

//==============================================================================
// Process runners
//==============================================================================

/// Runs an argv to completion, capturing both output streams
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<ShellOutput, DeriveError>;
}

/// Spawns real processes with `tokio::process`.
/// A non-zero exit status is not an error; the output is still the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, argv: &[String]) -> Result<ShellOutput, DeriveError> {
        let (program, args) = argv.split_first().ok_or(DeriveError::EmptyCommand)?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DeriveError::Spawn {
                program: program.clone(),
                message: e.to_string(),
            })?;
        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

//==============================================================================
// Templates
//==============================================================================

/// Whitespace-separated command template with sigil-prefixed column references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellTemplate {
    text: String,
    sigil: char,
}

impl ShellTemplate {
    pub fn new(text: impl Into<String>, sigil: char) -> Self {
        Self {
            text: text.into(),
            sigil,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Column names referenced by the template
    pub fn references(&self) -> Vec<&str> {
        self.text
            .split_whitespace()
            .filter_map(|token| token.strip_prefix(self.sigil))
            .collect()
    }

    /// Build the argv for `row`.
    ///
    /// Plain columns are read now. References to derived columns are awaited
    /// by the returned future, so a template can read another shell column's
    /// output while that column is still running.
    pub fn expand(
        &self,
        sheet: &dyn Sheet,
        row: RowId,
    ) -> impl Future<Output = Result<Vec<String>, DeriveError>> + Send + 'static {
        let bound = self.bind(sheet, row);
        async move {
            let args = match bound {
                Ok(args) => args,
                Err(e) => return Err(e),
            };
            let mut argv = Vec::with_capacity(args.len());
            for arg in args {
                match arg {
                    Arg::Ready(text) => argv.push(text),
                    Arg::Deferred { column, value } => match value.await {
                        Ok(value) => argv.push(value.to_string()),
                        Err(source) => return Err(DeriveError::Value { column, source }),
                    },
                }
            }
            if argv.is_empty() {
                return Err(DeriveError::EmptyCommand);
            }
            Ok(argv)
        }
    }

    fn bind(&self, sheet: &dyn Sheet, row: RowId) -> Result<Vec<Arg>, DeriveError> {
        let mut args = Vec::new();
        for token in self.text.split_whitespace() {
            let name = match token.strip_prefix(self.sigil) {
                Some(name) => name,
                None => {
                    args.push(Arg::Ready(token.to_string()));
                    continue;
                }
            };
            let column = sheet
                .column(name)
                .ok_or_else(|| DeriveError::UnknownColumn(name.to_string()))?;
            if let Some(value) = sheet.deferred_value(&column, row) {
                args.push(Arg::Deferred {
                    column: name.to_string(),
                    value,
                });
                continue;
            }
            let value = sheet
                .typed_value(&column, row)
                .map_err(|source| DeriveError::Value {
                    column: name.to_string(),
                    source,
                })?;
            args.push(Arg::Ready(value.to_string()));
        }
        Ok(args)
    }
}

/// One argv slot of a bound template
enum Arg {
    Ready(String),
    Deferred { column: String, value: DeferredValue },
}

//==============================================================================
// Shell column
//==============================================================================

/// The derivation behind a shell column and its `_stdout`/`_stderr` projections
pub struct ShellColumn {
    id: u64,
    template: ShellTemplate,
    cache: Arc<ShellCache>,
    runner: Arc<dyn ProcessRunner>,
}

impl ShellColumn {
    pub fn new(template: ShellTemplate, cache: Arc<ShellCache>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            id: NEXT_SHELL_ID.fetch_add(1, Ordering::Relaxed),
            template,
            cache,
            runner,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn template(&self) -> &ShellTemplate {
        &self.template
    }

    pub fn key(&self, sheet: &dyn Sheet, row: RowId) -> ShellKey {
        (self.id, sheet.row_key(row))
    }

    /// Start (or join) the derivation for `row` without waiting
    pub fn poll(&self, sheet: &dyn Sheet, row: RowId) -> Lookup<ShellOutput> {
        self.cache
            .poll(self.key(sheet, row), || self.derivation(sheet, row))
    }

    /// Output for `row`, waiting for the derivation if it is still running
    pub async fn get(&self, sheet: &dyn Sheet, row: RowId) -> Derived<ShellOutput> {
        self.resolve(sheet, row).await
    }

    /// Like [`get`](Self::get), as a future that no longer borrows the sheet
    pub fn resolve(
        &self,
        sheet: &dyn Sheet,
        row: RowId,
    ) -> impl Future<Output = Derived<ShellOutput>> + Send + 'static {
        let cache = Arc::clone(&self.cache);
        let key = self.key(sheet, row);
        let derivation = self.derivation(sheet, row);
        async move { cache.get(key, move || derivation).await }
    }

    /// Bind the template now; run the process when the returned future is polled
    fn derivation(
        &self,
        sheet: &dyn Sheet,
        row: RowId,
    ) -> impl Future<Output = Derived<ShellOutput>> + Send + 'static {
        let argv = self.template.expand(sheet, row);
        let runner = Arc::clone(&self.runner);
        async move {
            match argv.await {
                Ok(argv) => runner.run(&argv).await,
                Err(e) => Err(e),
            }
        }
    }
}
