//! # Provider Smoke Run
//!
//! Writes two small datasets to a temporary directory, runs a provider over
//! them for a few refresh periods while the files change, and prints what the
//! readers see along the way.
//!
//! ## Purpose:
//! A quick end-to-end check of the whole pipeline with real files and real
//! timers, including Prometheus output, without any external service.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{Encoder, TextEncoder};

use lib_bifrost::configs::BifrostConfig;
use lib_bifrost::metrics::{MetricsFactory, StreamerMetrics};
use lib_bifrost::{LocalFileStreamer, MapKey, StreamerProvider};

/// # Main Smoke Function
#[tokio::main]
async fn main() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let users = dir.path().join("users.tsv");
    let prices = dir.path().join("prices.json");
    fs::write(&users, "alice\t{\"age\": 31}\nbob\t{\"age\": 27}\n")?;
    fs::write(&prices, r#"{"1": 9.5, "2": 12.25}"#)?;

    let yaml = format!(
        r#"
provider:
  name: smoke
  expire_time: 30
  expire_check_interval: 1
streamers:
  - name: users
    path: {users}
    update_mode: incremental
    interval: 1
    is_sync: true
    user_data: {{ with_mode: false }}
  - name: prices
    path: {prices}
    parser: json_document
    interval: 1
    user_data: {{ key_type: int }}
metrics:
  Open: {{ Prometheus: true }}
  MonitorSystem: {{ Default: {{ Namespace: bifrost, Subsystem: smoke }} }}
"#,
        users = users.display(),
        prices = prices.display()
    );
    let config = BifrostConfig::from_yaml(&yaml).context("smoke config")?;

    let factory = MetricsFactory::new(config.metrics.clone().unwrap_or_default());
    let metrics = StreamerMetrics::new(&factory)?;

    let provider = StreamerProvider::new(config.provider.clone());
    for cfg in config.streamers {
        let streamer = LocalFileStreamer::new(cfg).with_metrics(metrics.clone());
        provider.register(Arc::new(streamer)).await?;
    }
    provider.spawn_janitor();

    // --- STEP 1: sync streamer is readable right away ---
    let users_container = provider.container("users").context("users registered")?;
    println!("alice => {:?}", users_container.get(&MapKey::from("alice")));

    // --- STEP 2: change both files and watch the next cycles pick them up ---
    fs::write(&users, "carol\t{\"age\": 45}\n")?;
    fs::write(&prices, r#"{"3": 1.0}"#)?;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    for name in provider.names() {
        if let Some(streamer) = provider.get(&name) {
            let info = streamer.sched_info().snapshot();
            println!(
                "{name}: version {} entries {} cycles {} failures {} last_error {:?}",
                info.version,
                streamer.container().len(),
                info.cycles,
                info.failures,
                info.last_error
            );
        }
    }
    println!("carol => {:?}", users_container.get(&MapKey::from("carol")));
    let prices_container = provider.container("prices").context("prices registered")?;
    println!("3 => {:?}", prices_container.get(&MapKey::Int(3)));
    println!("1 => {:?}", prices_container.get(&MapKey::Int(1)));

    // --- STEP 3: metrics ---
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&factory.registry().gather(), &mut buffer)?;
    println!("{}", String::from_utf8(buffer)?);

    provider.shutdown().await;
    println!("--- Smoke run finished ---");
    Ok(())
}
