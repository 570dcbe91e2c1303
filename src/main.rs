use std::sync::Arc;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber;

use floodgate::config::FloodgateConfig;
use floodgate::ratelimit::{RateLimitRules, RateLimiter};

/// Demo driver: replays a scripted sequence of (key, time) decisions.
#[derive(Parser, Debug)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Default quota per window (ignored when --config is set)
    #[arg(long, default_value_t = 5)]
    rate: i64,

    /// Window length in seconds (ignored when --config is set)
    #[arg(long, default_value_t = 60)]
    window: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let args = Args::parse();

    info!("Starting Floodgate rate limiter demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let (limiter, sweep_interval) = match args.config {
        Some(path) => {
            let config = FloodgateConfig::from_file(&path)?;
            info!(
                default_rate = config.rules.default_rate,
                window_secs = config.rules.window_secs,
                overrides = config.rules.overrides.len(),
                "Configuration loaded"
            );
            let interval = config.sweep_interval();
            (Arc::new(config.build_limiter()?), interval)
        }
        None => {
            let rules = RateLimitRules::new(args.rate, args.window);
            info!(
                default_rate = rules.default_rate,
                window_secs = rules.window_secs,
                "Using command-line limits"
            );
            (
                Arc::new(RateLimiter::from_rules(rules)?),
                std::time::Duration::from_secs(60),
            )
        }
    };

    let sweeper = limiter.spawn_sweeper(sweep_interval);

    // The first five requests fit the default 5-per-60s quota; the sixth is
    // still within 60s of the first and is rejected; by 170s the timestamp
    // at 100s has expired and the window has slid forward.
    let script = [
        ("user123", 100),
        ("user123", 110),
        ("user123", 115),
        ("user123", 120),
        ("user123", 125),
        ("user123", 130),
        ("user123", 170),
    ];

    for (key, time) in script {
        let admitted = limiter.is_allowed(key, time)?;
        info!(key = %key, time = time, admitted = admitted, "Decision");
    }

    sweeper.abort();
    info!("Floodgate demo finished");
    Ok(())
}
