use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use common::{Config, Error, Result};
use engine::{Backtest, BacktestReport, CsvFeed, RunConfig, StrategyFactory};

/// Replay a strategy definition against historical candles.
#[derive(Debug, Parser)]
#[command(name = "backtester", version)]
struct Cli {
    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Path to the strategy definition (TOML).
    source: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let Some(source) = cli.source else {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    };

    if !source.is_file() {
        eprintln!("File not found: {}", source.display());
        return ExitCode::from(&Error::Config(format!("missing {}", source.display())));
    }

    match run(&source).await {
        Ok(report) => {
            if cli.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        let err = Error::from(e);
                        error!(error = %err, "Failed to encode report");
                        return ExitCode::from(&err);
                    }
                }
            } else {
                println!("{report}");
            }
            ExitCode::SUCCESS
        }
        Err(Error::Compilation(diagnostics)) => {
            eprintln!("{} failed to compile:", source.display());
            for d in &diagnostics {
                eprintln!("  {d}");
            }
            ExitCode::from(&Error::Compilation(diagnostics))
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(&e)
        }
    }
}

async fn run(source: &Path) -> Result<BacktestReport> {
    // ── Config ────────────────────────────────────────────────────────────────
    let defaults = Config::from_env()?;
    let text = tokio::fs::read_to_string(source).await?;

    // ── Compile ───────────────────────────────────────────────────────────────
    let compiled = StrategyFactory::default().compile_or_error(&text)?;
    let base = source.parent().unwrap_or_else(|| Path::new("."));
    let config = RunConfig::resolve(&compiled.backtest, &defaults)?.with_base_dir(base);
    info!(
        strategy = %compiled.template.name,
        security = %config.security.id,
        from = %config.from,
        to = %config.to,
        data_dir = %config.data_dir.display(),
        "Starting backtest"
    );

    // ── Replay ────────────────────────────────────────────────────────────────
    let feed = CsvFeed::new(&config.data_dir, &config.security.id, config.from, config.to);
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; run to completion.
            std::future::pending::<()>().await;
        }
    };
    Backtest::new(compiled, config).run(feed, interrupt).await
}
