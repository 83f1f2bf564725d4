//! # bifrost-watch
//!
//! Runs a streamer provider described by a YAML file until Ctrl-C. Every
//! report period it prints the scheduling state of each streamer as one JSON
//! line, followed by the requested key lookups.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueHint};
use prometheus::{Encoder, TextEncoder};

use lib_bifrost::configs::BifrostConfig;
use lib_bifrost::loggers::{setup_logging, LoggingOptions};
use lib_bifrost::metrics::{MetricsFactory, StreamerMetrics};
use lib_bifrost::{LocalFileStreamer, MapKey, StreamerProvider};

#[derive(Parser, Debug)]
#[clap(
    name = "bifrost-watch",
    version,
    author = "ckir",
    about = "Keeps the configured datasets loaded and reports on them."
)]
struct Cli {
    /// Provider configuration file (.yaml/.yml).
    #[clap(long, short = 'c', env = "BIFROST_CONFIG", value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Fallback log filter when RUST_LOG is not set.
    #[clap(long, env = "BIFROST_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory for JSON log files; console only when omitted.
    #[clap(long, env = "BIFROST_LOG_DIR", value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,

    /// Seconds between two reports.
    #[clap(long, default_value_t = 10)]
    report_every: u64,

    /// Key to print on every report, as STREAMER=KEY.
    #[clap(long = "lookup", short = 'l', value_name = "STREAMER=KEY", action = ArgAction::Append)]
    lookups: Vec<String>,

    /// Also print the Prometheus exposition text on every report.
    #[clap(long, action = ArgAction::SetTrue)]
    print_metrics: bool,
}

fn split_lookup(lookup: &str) -> Result<(&str, &str)> {
    lookup.split_once('=')
        .filter(|(name, key)| !name.is_empty() && !key.is_empty())
        .with_context(|| format!("lookup '{}' is not STREAMER=KEY", lookup))
}

fn report(provider: &StreamerProvider, lookups: &[String]) -> Result<()> {
    for name in provider.names() {
        if let Some(streamer) = provider.get(&name) {
            let info = streamer.sched_info().snapshot();
            let entries = streamer.container().len();
            println!(
                "{}",
                serde_json::json!({ "streamer": name, "entries": entries, "sched": info })
            );
        }
    }

    for lookup in lookups {
        let (name, key) = split_lookup(lookup)?;
        let Some(container) = provider.container(name) else {
            println!("{}: no such streamer", lookup);
            continue;
        };
        let value = container.get(&MapKey::from(key)).or_else(|| {
            key.parse::<i64>()
                .ok()
                .and_then(|k| container.get(&MapKey::Int(k)))
        });
        match value {
            Some(value) => println!("{} => {}", lookup, value),
            None => println!("{} => (not found)", lookup),
        }
    }
    Ok(())
}

fn print_metrics(factory: &MetricsFactory) -> Result<()> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&factory.registry().gather(), &mut buffer)?;
    print!("{}", String::from_utf8(buffer)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    for lookup in &args.lookups {
        split_lookup(lookup)?;
    }

    let mut logging = LoggingOptions::console(args.log_level.clone());
    if let Some(dir) = &args.log_dir {
        logging = logging.with_log_dir(dir);
    }
    let _guard = setup_logging(&logging)?;

    let config = BifrostConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let factory = config.metrics.clone().map(MetricsFactory::new);
    let metrics = match &factory {
        Some(factory) => StreamerMetrics::new(factory)?,
        None => StreamerMetrics::noop(),
    };

    let provider = StreamerProvider::new(config.provider.clone());
    for cfg in config.streamers {
        let name = cfg.name.clone();
        let streamer = LocalFileStreamer::new(cfg).with_metrics(metrics.clone());
        provider
            .register(Arc::new(streamer))
            .await
            .with_context(|| format!("registering streamer '{}'", name))?;
    }
    provider.spawn_janitor();
    tracing::info!(
        "Provider '{}' running {} streamer(s); press Ctrl-C to stop",
        provider.name(),
        provider.len()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(args.report_every.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                report(&provider, &args.lookups)?;
                if args.print_metrics {
                    if let Some(factory) = &factory {
                        print_metrics(factory)?;
                    }
                }
            }
        }
    }

    provider.shutdown().await;
    Ok(())
}
