use clap::{Parser, Subcommand};
use royalbit_tally::cli;
use royalbit_tally::config::TallyConfig;
use royalbit_tally::core::AggregatorRegistry;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Column aggregation and cached shell-derived columns for YAML tables.")]
#[command(long_about = "Tally - Column aggregation for YAML tables

Aggregates typed columns (min, max, mean, median, sum, distinct, count,
percentiles, quantile families, keymax) and derives columns from shell
commands, running each command at most once per row.

COMMANDS:
  aggregators - List available aggregators
  aggregate   - Aggregate table columns
  derive      - Add a shell-derived column and show its values

EXAMPLES:
  tally aggregate files.yaml -c size -a sum -a q4
  tally derive files.yaml 'wc -c $filename' -a count
  tally aggregators

CONFIG:
  --config tally.yaml (or TALLY_CONFIG) with keys:
  null_text, sigil, workers, progress_every")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(long, global = true, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Text treated as null when aggregating
    #[arg(long = "null", global = true, env = "TALLY_NULL")]
    null_text: Option<String>,

    /// Background worker threads
    #[arg(long, global = true, env = "TALLY_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available aggregators
    Aggregators,

    #[command(long_about = "Aggregate table columns.

Attaches the given aggregators to the selected columns (in addition to any
declared in the file with 'aggregators:') and reports every result.
Rows whose value cannot be converted to the column type are skipped.

Family names expand to percentiles: q4 = p25 p50 p75.
Any pN (0-100) is accepted directly.")]
    /// Aggregate table columns
    Aggregate {
        /// Path to YAML table file
        file: PathBuf,

        /// Column to aggregate (repeatable; default: columns with aggregators)
        #[arg(short, long = "column")]
        columns: Vec<String>,

        /// Aggregator name (repeatable)
        #[arg(short, long = "agg")]
        aggregators: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    #[command(long_about = "Add a shell-derived column and show its values.

Tokens starting with the sigil ($ by default) are replaced by the row's
value of that column. The command runs once per row; stdout and stderr
are captured. Also adds <command>_stdout and <command>_stderr columns.")]
    /// Add a shell-derived column
    Derive {
        /// Path to YAML table file
        file: PathBuf,

        /// Command template, e.g. 'wc -c $filename'
        template: String,

        /// Aggregator for the derived columns (repeatable)
        #[arg(short, long = "agg")]
        aggregators: Vec<String>,

        /// Placeholder sigil
        #[arg(long)]
        sigil: Option<char>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<TallyConfig> {
    let mut config = match &cli.config {
        Some(path) => TallyConfig::load(path)?,
        None => TallyConfig::default(),
    };
    if let Some(null_text) = &cli.null_text {
        config.null_text = Some(null_text.clone());
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Commands::Derive {
        sigil: Some(sigil), ..
    } = &cli.command
    {
        config.sigil = *sigil;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "royalbit_tally=info,tally=warn,tally::status=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let registry = AggregatorRegistry::new();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Aggregators => cli::aggregators(&registry),

            Commands::Aggregate {
                file,
                columns,
                aggregators,
                json,
            } => cli::aggregate(file, columns, aggregators, json, &registry, &config).await,

            Commands::Derive {
                file,
                template,
                aggregators,
                json,
                ..
            } => cli::derive(file, template, aggregators, json, &registry, &config).await,
        }
    })?;
    Ok(())
}
