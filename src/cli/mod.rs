//! CLI command handlers

pub mod commands;

pub use commands::{aggregate, aggregators, derive};
