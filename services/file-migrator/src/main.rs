// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! File Migrator
//!
//! Batch job that uploads legacy files to an S3-compatible bucket and marks
//! them as migrated in the database. It:
//!
//! - Lists files within a date window through the database
//! - Uploads them with a fixed pool of concurrent workers
//! - Records the uploaded files as migrated
//! - Repeats until no files are left, or until SIGINT/SIGTERM

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use file_migrator::config::MigratorConfig;
use file_migrator::db::Database;
use file_migrator::metrics;
use file_migrator::migrate::MigrationService;
use file_migrator::object_store::S3ObjectStore;
use file_migrator::pipeline::{DEFAULT_UPLOAD_WORKERS, UploadPipeline};

fn print_version() {
    let version = env!("CARGO_PKG_VERSION");
    let name = env!("CARGO_PKG_NAME");
    let buildstamp = option_env!("STAMP").unwrap_or("no-STAMP");
    println!("{} {} ({})", name, version, buildstamp);
}

fn print_usage(program: &str) {
    print_version();
    println!("Usage: {} [OPTIONS]", program);
    println!();
    println!("Options:");
    println!("  -h, --help               Display this information");
    println!("  -V, --version            Display the program's version number");
    println!();
    println!("Environment variables:");
    println!("  DATABASE_URL             PostgreSQL connection URL (required)");
    println!("  BEGIN_DATE               First file date to migrate, YYYY-MM-DD (required)");
    println!("  END_DATE                 Last file date to migrate, YYYY-MM-DD (required)");
    println!("  AWS_ACCESS_KEY_ID        Object store access key (required)");
    println!("  AWS_SECRET_ACCESS_KEY    Object store secret key (required)");
    println!("  BUCKET_NAME              Destination bucket (required)");
    println!(
        "  S3_ENDPOINT              Object store endpoint (default: {})",
        file_migrator::config::DEFAULT_S3_ENDPOINT
    );
    println!(
        "  S3_REGION                Object store region (default: {})",
        file_migrator::config::DEFAULT_S3_REGION
    );
    println!(
        "  CONTENT_TYPE             Content type of uploaded objects (default: {})",
        file_migrator::config::DEFAULT_CONTENT_TYPE
    );
    println!(
        "  UPLOAD_WORKERS           Concurrent uploads (default: {})",
        DEFAULT_UPLOAD_WORKERS
    );
    println!("  MAX_BATCHES              Stop after this many batches (default: unbounded)");
    println!("  REMOVE_SOURCE_FILES      Delete migrated source files (default: false)");
    println!("  RUST_LOG                 Log filter (default: file_migrator=info)");
}

/// Flip `cancel_tx` on the first SIGINT or SIGTERM
async fn watch_signals(cancel_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for SIGINT");
                    return;
                }
                warn!("Received SIGINT, stopping after in-flight uploads");
            }
            _ = sigterm.recv() => {
                warn!("Received SIGTERM, stopping after in-flight uploads");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        warn!("Received ctrl-c, stopping after in-flight uploads");
    }

    cancel_tx.send_replace(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --version and --help
    let args: Vec<String> = std::env::args().collect();
    #[allow(clippy::never_loop)] // Intentional: early return on first recognized arg
    for arg in &args[1..] {
        match arg.as_str() {
            "-V" | "--version" => {
                print_version();
                return Ok(());
            }
            "-h" | "--help" => {
                print_usage(&args[0]);
                return Ok(());
            }
            _ => {
                eprintln!("Unknown option: {}", arg);
                std::process::exit(1);
            }
        }
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "file_migrator=info".to_string()),
        ))
        .init();

    print_version();

    let config = match MigratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to load configuration");
            std::process::exit(1);
        }
    };
    info!("Database URL: {}", config.database_url_display());
    info!(
        endpoint = %config.s3.endpoint_url,
        bucket = %config.s3.bucket,
        "Object store"
    );

    metrics::register_metrics();

    let database = Database::new(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    let store = S3ObjectStore::new(config.s3.clone()).await;

    let pipeline = UploadPipeline::new(Arc::new(store), config.upload_workers);
    let service = MigrationService::new(
        Arc::new(database),
        pipeline,
        config.date_range,
        config.migrate_options(),
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(watch_signals(cancel_tx));

    let result = service.migrate(&cancel_rx).await;

    debug!(metrics = %metrics::gather_metrics(), "Final metrics");

    match result {
        Ok(summary) => {
            info!(
                batches = summary.batches,
                migrated = summary.migrated,
                "Migration complete"
            );
            Ok(())
        }
        Err(e) => {
            error!(
                phase = e.phase(),
                error = %e,
                migrated = service.pipeline().migrated_total(),
                "Migration aborted"
            );
            Err(e).context("Migration failed")
        }
    }
}
