//! labormap CLI
//!
//! Local execution entry point: one-shot updates, periodic mode, and
//! status/config inspection against a storage directory.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use labormap::{
    error::{AppError, Result},
    models::{Config, DatasetConfig},
    pipeline::{UpdateOrchestrator, UpdateOutcome, UpdateRequest},
    services::{BlsClient, FallbackEstimator, MockSource, SeriesSource},
    storage::{DatasetStorage, LocalStorage, ResultCache},
};

/// labormap - county employment figures for map geometry
#[derive(Parser, Debug)]
#[command(
    name = "labormap",
    version,
    about = "Merge county employment series into geometry documents"
)]
struct Cli {
    /// Path to storage directory containing config and data files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Serve figures from the built-in mock instead of the upstream API
    #[arg(long)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and merge employment figures
    Update {
        /// Only update this dataset
        #[arg(long)]
        dataset: Option<String>,

        /// Ignore cached results
        #[arg(long)]
        force: bool,

        /// Only update these regions (comma separated)
        #[arg(long, value_delimiter = ',', requires = "dataset")]
        regions: Option<Vec<String>>,
    },

    /// Keep datasets fresh on the configured interval
    Watch,

    /// Show cached result freshness per dataset
    Status,

    /// Validate configuration
    Validate,
}

/// Initialize logging; `RUST_LOG` wins over the given default.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn build_source(config: &Config, mock: bool) -> Result<Arc<dyn SeriesSource>> {
    if mock {
        let registries = config
            .datasets
            .iter()
            .map(DatasetConfig::registry)
            .collect::<Result<Vec<_>>>()?;
        log::info!("Using mock upstream for {} dataset(s)", registries.len());
        return Ok(Arc::new(MockSource::from_registries(
            &registries,
            &FallbackEstimator::new(),
        )));
    }

    if config.upstream.registration_key.is_none() {
        log::warn!("No registration key configured; upstream limits are lower");
    }
    Ok(Arc::new(BlsClient::new(&config.upstream)?))
}

fn log_outcome(outcome: &UpdateOutcome) -> Result<()> {
    let reports = match outcome {
        UpdateOutcome::Skipped => {
            log::info!("Update skipped: another update is in progress");
            return Ok(());
        }
        UpdateOutcome::Completed(reports) => reports,
    };

    for report in reports {
        match &report.error {
            Some(error) => log::error!("✗ {}: {}", report.dataset, error),
            None => log::info!(
                "✓ {}: {} regions ({} upstream, {} estimated, {} unmatched){}",
                report.dataset,
                report.regions,
                report.upstream,
                report.estimated,
                report.unmatched,
                if report.from_cache { " [cached]" } else { "" }
            ),
        }
        for unresolved in &report.unresolved {
            log::warn!(
                "  '{}' not in registry '{}'",
                unresolved.region,
                unresolved.registry
            );
        }
    }

    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        return Err(AppError::validation(format!("{failed} dataset(s) failed to update")));
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.storage_dir.join("config.toml");
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        Config::load(&config_path)
            .map(|c| c.logging.level)
            .unwrap_or_else(|_| "info".to_string())
    };
    init_logging(&level);

    log::info!("labormap starting...");

    let config = Config::load_or_default(&config_path).with_env();
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let storage = LocalStorage::new(&cli.storage_dir).with_cache_ttl(config.schedule.cache_ttl());

    match cli.command {
        Command::Update {
            dataset,
            force,
            regions,
        } => {
            config.validate()?;
            let orchestrator = open(&config, &storage, cli.mock).await?;

            let mut request = match dataset {
                Some(key) => UpdateRequest::dataset(key),
                None => UpdateRequest::all(),
            };
            if let Some(regions) = regions {
                request = request.with_regions(regions);
            }
            if force {
                request = request.forced();
            }

            let outcome = orchestrator.update(request).await?;
            log_outcome(&outcome)?;
            log::info!("Update complete!");
        }

        Command::Watch => {
            config.validate()?;
            let orchestrator = open(&config, &storage, cli.mock).await?;
            let periodic = orchestrator.start_periodic();

            tokio::select! {
                result = periodic => {
                    if let Err(e) = result {
                        log::error!("Periodic updates stopped: {}", e);
                    }
                }
                result = tokio::signal::ctrl_c() => {
                    result?;
                    log::info!("Interrupted, shutting down");
                }
            }

            let status = orchestrator.status().await;
            if let Some(error) = status.last_error {
                log::warn!("Last update error: {}", error);
            }
        }

        Command::Status => {
            log::info!("Storage directory: {}", cli.storage_dir.display());
            let cache = storage.load_cache().await?.unwrap_or_default();
            let now = Utc::now();

            for dataset in &config.datasets {
                let output = cli.storage_dir.join(&dataset.output);
                log::info!(
                    "{}: merged document {}",
                    dataset.key,
                    if output.exists() { "present" } else { "not found" }
                );

                match cache.entries().find(|(key, _)| *key == &dataset.key) {
                    Some((_, result_set)) => log::info!(
                        "  results fetched {} ({}), {}/{} usable",
                        result_set.fetched_at.to_rfc3339(),
                        if cache.is_fresh_at(result_set, now) { "fresh" } else { "expired" },
                        result_set.usable_count(),
                        result_set.observations.len()
                    ),
                    None => log::info!("  no cached results"),
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            for dataset in &config.datasets {
                let registry = dataset.registry()?;
                log::info!(
                    "✓ {}: {} regions, collection '{}'",
                    dataset.key,
                    registry.len(),
                    dataset.collection
                );
            }

            log::info!("All validations passed!");
        }
    }

    log::info!("Done!");

    Ok(())
}

/// Build the orchestrator with the persisted cache loaded.
async fn open(config: &Config, storage: &LocalStorage, mock: bool) -> Result<UpdateOrchestrator> {
    let cache = match storage.load_cache().await {
        Ok(Some(cache)) => {
            log::info!("Loaded {} cached result set(s)", cache.len());
            cache
        }
        Ok(None) => ResultCache::default(),
        Err(e) => {
            log::warn!("Ignoring unreadable result cache: {}", e);
            ResultCache::default()
        }
    };

    UpdateOrchestrator::new(
        config,
        build_source(config, mock)?,
        Arc::new(storage.clone()),
        cache,
    )
}
