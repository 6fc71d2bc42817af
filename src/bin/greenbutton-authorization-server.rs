// ABOUTME: Green Button authorization server binary
// ABOUTME: Loads configuration, wires services, runs the scheduler, and serves HTTP until ctrl-c
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Green Button Authorization Contributors

//! # Green Button Authorization Server Binary
//!
//! Starts the ESPI registration, consent, and certificate trust surface on
//! a single HTTP port, with the nightly rollup and retention prune jobs
//! running in the background.

use anyhow::{Context, Result};
use clap::Parser;
use greenbutton_authorization::{
    config::environment::ServerConfig, database::Database, logging, resources::ServerResources,
    routes,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "greenbutton-authorization-server")]
#[command(about = "Green Button (ESPI) authorization server - client registry, consent, certificate trust")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env();
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    logging::init_from_env()?;
    info!("{}", config.summary());

    ensure_database_directory(&config.database_url)?;
    let database = Database::new(&config.database_url)
        .await
        .with_context(|| "Failed to open the database")?;
    info!("Database ready");

    let http_port = config.http_port;
    let resources = Arc::new(ServerResources::builder(config, database).build()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = resources.scheduler();
    let jobs = scheduler.start(&shutdown_rx);
    info!(jobs = ?scheduler.job_names(), "Scheduler started");

    let app = routes::router(Arc::clone(&resources));
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP server listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");
    });
    if let Err(e) = serve.await {
        error!(error = %e, "HTTP server error");
    }

    let _ = shutdown_tx.send(true);
    for job in jobs {
        if let Err(e) = job.await {
            error!(error = %e, "Scheduled job task ended abnormally");
        }
    }
    info!("Server stopped");
    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL
fn ensure_database_directory(database_url: &str) -> Result<()> {
    let Some(path) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = path.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}
