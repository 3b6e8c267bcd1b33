//! dsdiff CLI - compare tables across many data sources.

use clap::{Parser, Subcommand};
use dsdiff::{BdiffOptions, Config, DsdiffError, Session};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dsdiff")]
#[command(about = "Compare tables across many data sources")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare tables of every data source against the base data source
    Bdiff {
        /// Tables to compare [default: commands.bdiff_tables]
        tables: Vec<String>,

        /// Skip tables with more base rows than this (0 disables the guard)
        #[arg(long)]
        max_rows: Option<u64>,

        /// Rows fetched per target page (0 reads whole tables)
        #[arg(long)]
        batch_size: Option<u64>,

        /// Directory receiving <table>.csv reports
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Look up every row of a table on each data source by its first column
    Diff {
        /// Table to diff
        table: String,

        /// Position of the base among enabled data sources
        #[arg(long, default_value_t = 0)]
        base: usize,

        /// Directory receiving diff-<table>.csv [default: commands.bdiff_output_dir]
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Count rows of tables on every data source
    Count {
        /// Tables to count [default: commands.count_tables]
        tables: Vec<String>,

        /// Output CSV file
        #[arg(short, long, default_value = "count.csv")]
        output: PathBuf,
    },

    /// Test data source connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), DsdiffError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(DsdiffError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Bdiff {
            tables,
            max_rows,
            batch_size,
            output_dir,
        } => {
            if let Some(max_rows) = max_rows {
                config.commands.bdiff_max_rows = max_rows;
            }
            if let Some(batch_size) = batch_size {
                config.commands.bdiff_batch_size = batch_size;
            }
            if let Some(dir) = output_dir {
                config.commands.bdiff_output_dir = dir;
            }
            config.validate()?;

            let tables = if tables.is_empty() {
                config.commands.bdiff_tables.clone()
            } else {
                tables
            };
            if tables.is_empty() {
                return Err(DsdiffError::Config(
                    "no tables given and commands.bdiff_tables is empty".to_string(),
                ));
            }

            let options = BdiffOptions::from_config(&config);
            let session = connect(config).await?;
            let result = session.bdiff(options).run(&tables).await;
            session.close().await;
            let summary = result?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                println!("\nBdiff {}!", summary.status);
                println!("  Run ID: {}", summary.run_id);
                println!("  Duration: {:.2}s", summary.duration_seconds);
                println!(
                    "  Tables: {} compared, {} skipped, {} failed (of {})",
                    summary.tables_compared,
                    summary.tables_skipped,
                    summary.tables_failed,
                    summary.tables_total
                );
                println!(
                    "  Rows: {} extra, {} missing, {} different",
                    summary.extra, summary.missing, summary.diff
                );
                if summary.schema_mismatches > 0 {
                    println!("  Schema mismatches: {}", summary.schema_mismatches);
                }
                for table in &summary.tables {
                    if let Some(ref path) = table.report {
                        println!("  {} -> {}", table.table, path.display());
                    }
                    if let Some(ref err) = table.error {
                        println!("  {} failed: {}", table.table, err);
                    }
                    for target in table.targets.iter().filter(|t| t.error.is_some()) {
                        println!(
                            "  {} at {} failed: {}",
                            table.table,
                            target.data_source_key,
                            target.error.as_deref().unwrap_or_default()
                        );
                    }
                }
            }

            if summary.has_failures() {
                return Err(DsdiffError::Executor(format!(
                    "bdiff run {} finished with failures",
                    summary.run_id
                )));
            }
        }

        Commands::Diff {
            table,
            base,
            output_dir,
        } => {
            let sources = config.enabled_sources().len();
            if base >= sources {
                return Err(DsdiffError::Config(format!(
                    "--base {} out of range ({} enabled data sources)",
                    base, sources
                )));
            }
            let output_dir = output_dir.unwrap_or_else(|| config.commands.bdiff_output_dir.clone());

            let session = connect(config).await?;
            let result = session.row_diff(base, output_dir).run(&table).await;
            session.close().await;
            let summary = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Row diff of {} against {}:", summary.table, summary.base);
                for target in &summary.targets {
                    match target.error {
                        Some(ref err) => println!("  {} failed: {}", target.data_source_key, err),
                        None => println!(
                            "  {}: {} rows, {} missing, {} duplicated, {} changed",
                            target.data_source_key,
                            target.rows_checked,
                            target.no_data,
                            target.duplicated,
                            target.changed
                        ),
                    }
                }
                println!("\nResult saved to {}", summary.output.display());
            }

            if summary.has_failures() {
                return Err(DsdiffError::Executor(format!(
                    "row diff of {} finished with failures",
                    summary.table
                )));
            }
        }

        Commands::Count { tables, output } => {
            let tables = if tables.is_empty() {
                config.commands.count_tables.clone()
            } else {
                tables
            };
            if tables.is_empty() {
                return Err(DsdiffError::Config(
                    "no tables given and commands.count_tables is empty".to_string(),
                ));
            }

            let session = connect(config).await?;
            let result = session.count(output).run(&tables).await;
            session.close().await;
            let summary = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Row counts ({}):", summary.data_sources.join(", "));
                for table in &summary.tables {
                    let counts: Vec<String> = table
                        .counts
                        .iter()
                        .map(|c| c.map(|n| n.to_string()).unwrap_or_else(|| "ERROR".into()))
                        .collect();
                    let marker = if table.consistent() { "✓" } else { "✗" };
                    println!("  {} {}: {}", marker, table.table, counts.join(", "));
                }
                println!("\nResult saved to {}", summary.output.display());
            }
        }

        Commands::HealthCheck => {
            let result = Session::health_check(&config).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                for source in &result.sources {
                    println!(
                        "  [{}] {} ({}): {} ({}ms)",
                        source.index,
                        source.key,
                        source.db_type,
                        if source.connected { "OK" } else { "FAILED" },
                        source.latency_ms
                    );
                    if let Some(ref err) = source.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if let Some(failed) = result.sources.iter().find(|s| !s.connected) {
                return Err(DsdiffError::connect(
                    failed.key.clone(),
                    "health check failed",
                ));
            }
        }
    }

    Ok(())
}

/// Connect a session and cancel it when a shutdown signal arrives.
async fn connect(config: Config) -> Result<Session, DsdiffError> {
    let signal_token = setup_signal_handler();
    let session = Session::connect(config).await?;

    let session_token = session.cancel_token();
    tokio::spawn(async move {
        signal_token.cancelled().await;
        session_token.cancel();
    });
    Ok(session)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Abandoning queued jobs...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to setup {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Abandoning queued jobs...");
            token.cancel();
        }
    });

    cancel_token
}
