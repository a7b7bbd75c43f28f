mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use scrape_logging::{scrape_info, scrape_warn};
use tokio_util::sync::CancellationToken;

use crate::commands::RunArgs;
use crate::config::{AppConfig, DEFAULT_CONFIG_PATH};

/// Fetch feed articles with escalating strategies and keep a deduplicated store.
#[derive(Parser, Debug)]
#[command(name = "scrape", version, about)]
struct Cli {
    /// Settings file (RON). Defaults to ./scrape.ron when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output; repeat for trace.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write log lines to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read the configured feeds, extract every item and update the store.
    Run {
        /// Items taken per feed, overriding each feed's limit.
        #[arg(long)]
        limit: Option<usize>,
        /// Only the feed with this name.
        #[arg(long)]
        feed: Option<String>,
        /// Comma-separated strategy chain, e.g. "basic,enhanced".
        #[arg(long)]
        strategies: Option<String>,
        /// Store file, overriding the configured one.
        #[arg(long)]
        store: Option<PathBuf>,
        /// Write the run report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Extract a single URL and print the attempts and content.
    Extract {
        url: String,
        /// Fallback text used when every strategy fails.
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long)]
        strategies: Option<String>,
    },
    /// Summarize the rows in the store.
    Stats {
        #[arg(long)]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::initialize(
        logging::resolve_level(cli.verbose, cli.quiet, &config.log_level),
        cli.log_file.as_deref(),
    );
    match &config.source {
        Some(path) => scrape_info!("loaded configuration from {}", path.display()),
        None => scrape_info!("no {} found, using defaults", DEFAULT_CONFIG_PATH),
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            scrape_warn!("interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    match cli.command {
        Command::Run {
            limit,
            feed,
            strategies,
            store,
            report,
        } => {
            let args = RunArgs {
                limit,
                feed,
                strategies,
                store,
                report,
            };
            commands::run(&config, args, &cancel).await
        }
        Command::Extract {
            url,
            summary,
            strategies,
        } => commands::extract(&config, url, summary, strategies, &cancel).await,
        Command::Stats { store } => commands::stats(&config, store),
    }
}
