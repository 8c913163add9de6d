//! dsk-daemon entry point.
//!
//! Thin on purpose: load settings, resolve the s2s key, register the storage
//! provider with the engine, then serve its callbacks until shutdown.

use anyhow::Context;
use clap::Parser;
use dsk_config::{load_layered_yaml, resolve_secrets, ProviderSettings, ResolvedSecrets};
use dsk_daemon::storage_provider;
use serde_json::json;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "dsk-daemon", about = "Bucket/object storage provider")]
struct Cli {
    /// Layered YAML config; later files override earlier ones. Without any,
    /// settings come from DSK_* env vars.
    #[arg(long = "config")]
    config: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();
    let cli = Cli::parse();

    let (settings, secrets) = load_settings(&cli.config)?;
    let key = secrets.require_s2s_key()?.to_string();

    let registered = storage_provider(&settings, Some(key))?
        .register()
        .await
        .context("provider registration failed")?;
    info!(
        base_callback = %registered.catalog().base_callback(),
        bind_addr = %registered.bind_addr(),
        "dsk-daemon registered"
    );

    let listener = tokio::net::TcpListener::bind(registered.bind_addr())
        .await
        .with_context(|| format!("bind {}", registered.bind_addr()))?;
    tokio::select! {
        served = registered.serve(listener) => served.context("server crashed")?,
        _ = tokio::signal::ctrl_c() => info!("dsk-daemon shutting down"),
    }
    Ok(())
}

fn load_settings(paths: &[String]) -> anyhow::Result<(ProviderSettings, ResolvedSecrets)> {
    if paths.is_empty() {
        let settings = ProviderSettings::from_env()?;
        let secrets = resolve_secrets(&json!({}))?;
        return Ok((settings, secrets));
    }
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = load_layered_yaml(&refs)?;
    info!(config_hash = %loaded.config_hash, layers = refs.len(), "config loaded");
    let settings = ProviderSettings::from_config_json(&loaded.config_json)?;
    let secrets = resolve_secrets(&loaded.config_json)?;
    Ok((settings, secrets))
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}
