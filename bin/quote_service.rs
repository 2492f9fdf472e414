//! # Quote Service
//!
//! Long-running service exposing path finding, quoting and oracle prices over JSON lines.
//!
//! ## Overview
//!
//! This service:
//! - Loads `Config.toml` (or `--config`) plus `SDK_*` environment overrides
//! - Reads pools and price feeds through an ethers HTTP provider (`rpc.http_url`);
//!   without one it runs offline on an in-memory reader
//! - Refreshes the configured pools and records TWAP observations periodically
//! - Runs the oracle auto-update loop
//! - Answers one JSON request per stdin line with one JSON response per stdout line
//! - Handles graceful shutdown on Ctrl+C
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin quote_service -- --caller 0x...
//! echo '{"method":"system_stats"}' | cargo run --bin quote_service
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use ethers::prelude::{Address, Http, Provider};
use log::{error, info, warn};
use mig_quote_sdk::{
    auth::{RoleAuthorizer, SharedAuthorizer},
    chain_reader::{EthersChainReader, PoolStateReader, PriceFeedReader, StaticChainReader},
    clock::system_clock,
    service::QuoteService,
    settings::Settings,
    types::conversions::string_to_address,
};
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "quote_service", about = "Multi-hop quoting and oracle price service")]
struct Args {
    /// Settings file (defaults to ./Config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address the stdin client acts as for role checks
    #[arg(long)]
    caller: Option<String>,

    /// Override `service.pool_refresh_interval_secs`
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Do not start the oracle auto-update loop
    #[arg(long, default_value_t = false)]
    no_auto_update: bool,
}

fn init_observability() {
    #[cfg(feature = "observability")]
    {
        if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().install() {
            warn!("Prometheus exporter not installed: {}", e);
        }
        let _ = tracing_subscriber::fmt().json().try_init();
        mig_quote_sdk::metrics::describe_metrics();
    }
}

fn build_readers(settings: &Settings) -> Result<(Arc<dyn PoolStateReader>, Arc<dyn PriceFeedReader>)> {
    match settings.rpc.http_url.as_deref() {
        Some(url) => {
            let provider = Provider::<Http>::try_from(url).context("invalid rpc.http_url")?;
            let reader = Arc::new(EthersChainReader::new(Arc::new(provider), &settings.rpc)?);
            info!("chain reader connected to {}", url);
            let pools: Arc<dyn PoolStateReader> = reader.clone();
            let feeds: Arc<dyn PriceFeedReader> = reader;
            Ok((pools, feeds))
        }
        None => {
            warn!("rpc.http_url not set, running on an in-memory reader");
            let reader = Arc::new(StaticChainReader::new());
            let pools: Arc<dyn PoolStateReader> = reader.clone();
            let feeds: Arc<dyn PriceFeedReader> = reader;
            Ok((pools, feeds))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    init_observability();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::new().context("loading settings")?,
    };
    info!("settings loaded");

    let caller = match &args.caller {
        Some(raw) => string_to_address(raw).context("invalid --caller")?,
        None => Address::zero(),
    };

    let (pool_reader, feed_reader) = build_readers(&settings)?;
    let authorizer: SharedAuthorizer = Arc::new(RoleAuthorizer::from_settings(&settings.service.roles)?);
    let service = Arc::new(QuoteService::new(
        &settings,
        Some(pool_reader),
        feed_reader,
        authorizer,
        system_clock(),
    ));

    let pools: Vec<Address> = settings
        .service
        .pools
        .iter()
        .filter_map(|raw| match string_to_address(raw) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!("ignoring pool {}: {}", raw, e);
                None
            }
        })
        .collect();
    info!("tracking {} pools", pools.len());

    let cancel = CancellationToken::new();
    let refresh_every = Duration::from_secs(
        args.refresh_secs
            .unwrap_or(settings.service.pool_refresh_interval_secs)
            .max(1),
    );
    let refresh_handle = service.clone().spawn_pool_refresh(pools, refresh_every, cancel.clone());
    let auto_update_handle = if args.no_auto_update {
        None
    } else {
        Some(service.oracle().clone().spawn_auto_update(cancel.clone()))
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("serving JSON requests on stdin (caller {:?})", caller);

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let response = service.handle_json(caller, &line).await;
                        stdout.write_all(response.as_bytes()).await?;
                        stdout.write_all(b"\n").await?;
                        stdout.flush().await?;
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        error!("stdin read failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    if let Err(e) = refresh_handle.await {
        warn!("pool refresh task ended abnormally: {}", e);
    }
    if let Some(handle) = auto_update_handle {
        if let Err(e) = handle.await {
            warn!("auto-update task ended abnormally: {}", e);
        }
    }
    info!("quote service stopped");
    Ok(())
}
