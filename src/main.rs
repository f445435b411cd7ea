//! hearthd - the Hearth daemon
//!
//! Loads `hearth.toml` (writing a commented default if missing), opens the
//! store, seeds defaults, starts the value log GC worker and the HTTP
//! server, then waits for SIGINT or SIGTERM and shuts down in order.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hearth::{open_service, HearthConfig, HttpServer, Result, Service, ValueLogGc};
use hearth_engine::CONFIG_FILE_NAME;

fn build_cli() -> Command {
    Command::new("hearthd")
        .about("Configuration and secrets store for a home telemetry service")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Config file (default: hearth.toml)"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .help("Store directory (overrides data_dir)"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .help("Listen address (overrides listen)"),
        )
}

/// Load the config file and apply command-line overrides
fn load_config(matches: &ArgMatches) -> Result<HearthConfig> {
    let path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
    HearthConfig::write_default_if_missing(&path)?;
    let mut config = HearthConfig::from_file(&path)?;

    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = Some(PathBuf::from(dir));
    }
    if let Some(listen) = matches.get_one::<String>("listen") {
        config.listen = listen.clone();
    }
    Ok(config)
}

fn init_tracing(config: &HearthConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Resolve once SIGINT or SIGTERM arrives
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(target: "hearth::daemon", error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn provision_configured_worker(config: &HearthConfig, service: &Service) {
    let (Some(name), Some(image)) = (
        config.provisioning.worker_service.as_deref(),
        config.provisioning.worker_image.as_deref(),
    ) else {
        return;
    };
    // Startup continues without the worker; it can be created over HTTP later
    if let Err(e) = service.provision_worker(name, image) {
        error!(target: "hearth::daemon", service = %name, error = %e, "Worker provisioning failed");
    }
}

fn run(config: HearthConfig) -> Result<()> {
    let service = open_service(&config)?;
    provision_configured_worker(&config, &service);

    let gc = match (config.gc_interval(), &config.data_dir) {
        (Some(interval), Some(_)) => {
            let gc = ValueLogGc::new(Arc::clone(service.store()), interval, config.gc_discard_ratio);
            let handle = gc.start()?;
            Some((gc, handle))
        }
        _ => None,
    };

    let server = HttpServer::start(&config.listen, Arc::clone(&service), config.workers)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(wait_for_signal());
    info!(target: "hearth::daemon", "Shutdown signal received");

    server.shutdown();
    if let Some((gc, handle)) = gc {
        gc.shutdown();
        if handle.join().is_err() {
            warn!(target: "hearth::daemon", "GC worker panicked");
        }
    }
    service.close()?;
    info!(target: "hearth::daemon", "Stopped");
    Ok(())
}

fn main() {
    let matches = build_cli().get_matches();
    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hearthd: {}", e);
            process::exit(1);
        }
    };
    init_tracing(&config);

    if let Err(e) = run(config) {
        error!(target: "hearth::daemon", error = %e, "Fatal");
        process::exit(1);
    }
}
