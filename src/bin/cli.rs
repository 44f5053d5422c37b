//! regwatch CLI
//!
//! Local execution entry point.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use regwatch::{
    error::Result,
    models::Config,
    pipeline::Orchestrator,
    services::{fetchers_from_config, notifier_from_config},
    storage::{LocalStore, SnapshotStore, Slot},
    utils::{
        http,
        log::{LogSink, header, summary},
    },
};

/// regwatch - Regulator registry change detection
#[derive(Parser, Debug)]
#[command(
    name = "regwatch",
    version,
    about = "Detects changes in regulator registries and reports them"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "regwatch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every source, update accepted state and notify about changes
    Run,

    /// Validate configuration
    Validate,

    /// Show accepted state per source
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env();
    log::info!("Loaded configuration from {}", cli.config.display());

    let store = LocalStore::from_config(&config.paths);

    match cli.command {
        Command::Run => {
            config.validate()?;

            let client = http::create_client(&config.http)?;
            let fetchers = fetchers_from_config(&config, &client);
            if fetchers.is_empty() {
                log::warn!("No sources configured. Set simple_urls or a registry base_url.");
                return Ok(());
            }
            let notifier = notifier_from_config(&config, &client);

            log::info!("{}", header("regwatch run"));
            let orchestrator = Orchestrator::new(&store, &fetchers, notifier.as_ref(), &LogSink)
                .with_fetch_timeout(config.http.fetch_timeout());

            let report = orchestrator.run().await?;
            let run = &report.summary;

            let mut items = vec![
                ("first run", run.is_first_run.to_string()),
                ("succeeded", run.succeeded().to_string()),
                ("changed", run.changed().to_string()),
                ("failed", run.failed().to_string()),
                (
                    "duration",
                    format!("{}s", (run.finished_at - run.started_at).num_seconds()),
                ),
            ];
            items.extend(
                run.outcomes
                    .iter()
                    .map(|(source, outcome)| (source.as_str(), outcome.to_string())),
            );
            log::info!("{}", summary("Run complete", &items));

            if let Some(fault) = report.fault {
                log::error!("Run finished with a reconciliation fault: {}", fault);
                return Err(fault);
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
            log::info!("  simple urls: {}", config.simple_urls.len());
            for registry in &config.registries {
                log::info!(
                    "  registry {}: {}",
                    registry.name,
                    if registry.is_enabled() {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
            }
            log::info!(
                "  notifications: {}",
                if config.notify.webhook_url.is_some() {
                    "webhook"
                } else {
                    "log only"
                }
            );
        }

        Command::Info => {
            log::info!("Accepted state: {}", config.paths.accepted_dir.display());

            if !store.slot_exists(Slot::Accepted).await {
                log::info!("No accepted state yet; the next run is a first run.");
            } else {
                let sources = store.list_sources(Slot::Accepted).await?;
                let mut items = Vec::with_capacity(sources.len());
                for source in &sources {
                    let keys = store.list_keys(Slot::Accepted, source).await?;
                    items.push((source.as_str(), format!("{} records", keys.len())));
                }
                log::info!("{}", summary("Accepted sources", &items));
            }

            if store.slot_exists(Slot::Candidate).await {
                log::warn!(
                    "Candidate state present at {} (run in progress or interrupted)",
                    config.paths.candidate_dir.display()
                );
            }
        }
    }

    Ok(())
}
