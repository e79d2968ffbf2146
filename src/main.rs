//! mountvfs daemon entry point

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mountvfs::config::Config;
use mountvfs::Filesystem;

/// Print usage information
fn print_usage() {
    eprintln!("Usage: mountvfs <config.yaml>");
    eprintln!();
    eprintln!("mountvfs - A virtual filesystem over pluggable storage adapters");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.yaml    Path to configuration file");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  mountvfs /etc/mountvfs/config.yaml");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        print_usage();
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);

    let config = match Config::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("mountvfs starting");
    info!("Loaded configuration from {:?}", config_path);

    let fs = Arc::new(Filesystem::from_config(&config)?);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    for mount_config in &config.mounts {
        if let Err(e) = fs.mount(mount_config).await {
            error!("Failed to mount {}: {}", mount_config.name, e);
            continue;
        }
    }

    if fs.count() == 0 {
        error!("No mountpoints were mounted successfully");
        std::process::exit(1);
    }

    info!("{} mountpoint(s) mounted successfully", fs.count());
    info!("Press Ctrl+C to unmount and exit");

    let mut changes = fs.notifier().monitor();
    let monitor = tokio::spawn(async move {
        while let Some(event) = changes.recv().await {
            info!(path = event.path(), ?event, "change");
        }
    });

    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    }

    info!("Shutting down");
    fs.unmount_all().await;
    monitor.abort();
    info!("All mountpoints unmounted, exiting");

    Ok(())
}
