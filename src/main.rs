use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

use cfb_edge::config::Config;
use cfb_edge::data::DataManager;
use cfb_edge::engine::{PredictionEngine, VarianceDetector};
use cfb_edge::factors::FactorRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    let games = config.games()?;

    let registry = FactorRegistry::with_defaults();
    registry.validate_configuration()?;
    info!(
        "{} factors loaded, season {}, week {}",
        registry.len(),
        config.season(),
        config.week
    );

    let data = DataManager::from_config(&config)?;
    let engine = PredictionEngine::new(data, registry, VarianceDetector::default());

    let results = engine.predict_slate(&games, config.week).await;
    for result in results {
        match result {
            Ok(prediction) => {
                println!("{}", serde_json::to_string_pretty(&prediction.to_record())?);
            }
            Err(e) => warn!("Skipped: {}", e),
        }
    }

    let cache = engine.data_manager().cache_stats();
    debug!(
        "Cache: {} entries, {} hits, {} misses, {} evictions",
        cache.entries, cache.hits, cache.misses, cache.evictions
    );
    for (source, left) in engine.data_manager().quota().await {
        debug!(
            "{}: {} calls left in budget, burst {:?}",
            source, left.budget, left.burst
        );
    }
    for stats in engine.registry().execution_stats() {
        debug!(
            "{}: {} runs, {} active, {} failed",
            stats.name, stats.runs, stats.activations, stats.failures
        );
    }

    Ok(())
}
