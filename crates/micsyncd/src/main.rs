mod cli;
mod error;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use micsync_config::{Config, RateLimitSection, RetrySection, VendorProfile};
use micsync_core::{
    CoreError, DiscoveryOutcome, DomainEvent, Engine, EventPayload, EventSubscriber, SyncResult,
    VendorKind, VendorStatus,
};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout is reserved for command output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli.config.unwrap_or_else(micsync_config::config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::InitConfig { force } => init_config(&path, force),

        Command::Run => {
            let engine = build_engine(&path)?;
            engine
                .attach_subscriber("log", Arc::new(LogSubscriber))
                .await;
            engine.start().await;

            tokio::signal::ctrl_c().await?;
            info!("interrupt received, shutting down");
            engine.shutdown().await;
            Ok(())
        }

        Command::Sync { vendor } => {
            let engine = build_engine(&path)?;
            let results = engine.trigger_sync(vendor.as_deref()).await?;
            let summaries: Vec<&SyncResult> = results.iter().map(AsRef::as_ref).collect();
            print_json(&summaries)?;

            let failed: Vec<&str> = results
                .iter()
                .filter(|r| r.status == VendorStatus::Error)
                .map(|r| r.vendor.as_str())
                .collect();
            if failed.is_empty() {
                Ok(())
            } else {
                Err(CliError::SyncFailed {
                    vendors: failed.join(", "),
                })
            }
        }

        Command::Discovery {
            vendor,
            add,
            remove,
        } => {
            let engine = build_engine(&path)?;
            if add.is_empty() && remove.is_empty() {
                let candidates = engine.discovery().get_candidates(&vendor).await?;
                return print_json(&candidates);
            }

            let outcome = engine
                .trigger_discovery_update(&vendor, &add, &remove)
                .await;
            print_json(&outcome)?;
            match outcome {
                DiscoveryOutcome::Accepted(_) => Ok(()),
                DiscoveryOutcome::Rejected { kind, reason } => {
                    Err(CliError::DiscoveryRejected { kind, reason })
                }
            }
        }
    }
}

fn build_engine(path: &Path) -> Result<Engine, CliError> {
    let cfg = micsync_config::load_config_from(path)?;
    let engine_config = micsync_config::to_engine_config(&cfg)?;
    if engine_config.vendors.is_empty() {
        return Err(CliError::NoVendors {
            path: path.display().to_string(),
        });
    }
    debug!(vendors = engine_config.vendors.len(), "building engine");
    Ok(Engine::new(engine_config)?)
}

fn init_config(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::ConfigExists {
            path: path.display().to_string(),
        });
    }
    micsync_config::save_config(path, &starter_config())?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn starter_config() -> Config {
    let shure = VendorProfile {
        kind: VendorKind::Shure,
        base_url: "https://127.0.0.1:10000/api/v1".into(),
        ws_url: Some("wss://127.0.0.1:10000/api/v1/subscriptions".into()),
        key: "micsync".into(),
        secret: None,
        secret_env: Some("MICSYNC_SHURE_SECRET".into()),
        key_header: None,
        secret_header: None,
        insecure: false,
        ca_cert: None,
        timeout: Some("30s".into()),
        enabled: true,
        rate_limit: RateLimitSection::default(),
        retry: RetrySection::default(),
    };
    Config {
        vendors: BTreeMap::from([("shure".to_owned(), shure)]),
        ..Config::default()
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes every domain event to the tracing log.
struct LogSubscriber;

#[async_trait]
impl EventSubscriber for LogSubscriber {
    async fn on_event(&self, event: Arc<DomainEvent>) -> Result<(), CoreError> {
        match &event.payload {
            EventPayload::DevicesSynced(result) => info!(
                vendor = %event.vendor_code,
                status = %result.status,
                created = result.created,
                updated = result.updated,
                offline = result.offline,
                failed = result.failed,
                "devices synced"
            ),
            EventPayload::HealthChanged(change) => info!(
                vendor = %event.vendor_code,
                change = ?change,
                "health changed"
            ),
            EventPayload::DiscoveryUpdated(change) => info!(
                vendor = %event.vendor_code,
                added = ?change.added,
                removed = ?change.removed,
                "discovery updated"
            ),
        }
        Ok(())
    }
}
