// src/main.rs - Console automoderator: JSON events on stdin, actions on stdout

use anyhow::{Context, Result};
use log::{error, info, warn, LevelFilter};
use std::env;
use std::sync::Arc;
use std::time::Duration;

use automod::prelude::*;

const DEFAULT_CONFIG_PATH: &str = "config/automod_config.yaml";
const DEFAULT_SWEEP_SECONDS: u64 = 60;

fn log_level() -> LevelFilter {
    match env::var("LOG_LEVEL") {
        Ok(level) => level.parse().unwrap_or_else(|_| {
            eprintln!("Unknown LOG_LEVEL '{}', using info", level);
            LevelFilter::Info
        }),
        Err(_) => LevelFilter::Info,
    }
}

fn sweep_period() -> Duration {
    let seconds = env::var("AUTOMOD_SWEEP_SECONDS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
        .unwrap_or(DEFAULT_SWEEP_SECONDS);
    Duration::from_secs(seconds)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::new()
        .filter_level(log_level())
        .parse_default_env()
        .init();

    info!("Starting automod v{}", automod::VERSION);

    let config_path = env::var("AUTOMOD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config_manager = Arc::new(ConfigurationManager::new(&config_path));
    config_manager
        .initialize()
        .await
        .with_context(|| format!("failed to initialize rule configuration at {}", config_path))?;

    info!(
        "Loaded {} enabled rules from {}",
        config_manager.get_active_ruleset().enabled_count(),
        config_path
    );

    // Report hot reloads as they happen
    let mut changes = config_manager.subscribe_to_changes();
    tokio::spawn(async move {
        while let Ok(change) = changes.recv().await {
            match change {
                ConfigChangeEvent::RulesReloaded { file } => info!("Rules reloaded from {}", file),
                ConfigChangeEvent::ValidationError { file, error } => {
                    warn!("Keeping previous rules, {} is invalid: {}", file, error)
                }
            }
        }
    });

    let moderator = Arc::new(AutoModerator::new(
        Arc::clone(&config_manager),
        Arc::new(ConsoleActionPrinter),
    ));

    let mut source = ConsoleSource::stdin();
    let receivers: Vec<_> = source.take_event_receiver().into_iter().collect();
    source.connect().await?;
    info!("Reading events from {}", source.platform_name());

    let processors = moderator.start(receivers);
    let maintenance = moderator.start_maintenance(sweep_period());

    tokio::select! {
        _ = async {
            for processor in processors {
                if let Err(e) = processor.await {
                    error!("Event processor failed: {}", e);
                }
            }
        } => {
            info!("All events processed");
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        }
    }

    maintenance.abort();
    source.disconnect().await?;

    let stats = moderator.get_stats().await;
    info!(
        "Processed {} events, rule hits: {}",
        stats.get("events_processed").cloned().unwrap_or_default(),
        stats.get("rule_hits").cloned().unwrap_or_default()
    );

    Ok(())
}
