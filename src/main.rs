use beacon_reporter::app::{self, Options, RealScanner, RunError, Services};
use beacon_reporter::location::{FixedLocation, LocationProvider, NoLocation};
use beacon_reporter::publish::http::HttpPublisher;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use sysinfo::System;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

const UNKNOWN_HOST: &str = "unknown";

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn run(options: Options) -> Result<(), RunError> {
    let detected_by = options
        .detected_by
        .clone()
        .or_else(System::host_name)
        .unwrap_or_else(|| UNKNOWN_HOST.to_string());

    // A request may take at most one interval, so publishes never pile up
    let publisher = HttpPublisher::new(
        options.url.clone(),
        options.method,
        options.publish_interval,
        options.insecure,
    )?;
    info!(url = %publisher.url(), "publishing to endpoint");

    let location: Box<dyn LocationProvider> = match options.location {
        Some(location) => {
            info!(%location, "using fixed location");
            Box::new(FixedLocation(location))
        }
        None => Box::new(NoLocation),
    };

    info!(backend = %options.backend, "starting scan");
    let services = Services {
        scanner: &RealScanner,
        publisher: Arc::new(publisher),
        location: location.as_ref(),
    };
    app::run_with(options, detected_by, services, shutdown_signal()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
