//! enclave-host — parent-side driver
//!
//! Launches an enclave image, verifies its attestation measurements, exchanges
//! messages over the enclave channel and terminates the enclave on every exit
//! path, including Ctrl-C.
//!
//! Example:
//!   enclave-host --eif-path app.eif --enclave-name demo \
//!       --cpu-count 2 --memory-mib 512 --expected-measurement <pcr0-hex>

use clap::Parser;
use enclave_host::config::HostArgs;
use enclave_host::lifecycle::{LifecycleController, NitroCli};
use log::{error, info, warn};
use std::process;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = HostArgs::parse();
    let control = NitroCli::new(args.nitro_cli.clone());
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            error!("Exiting due to invalid arguments.");
            process::exit(2);
        }
    };

    let controller = LifecycleController::new(control, config);

    // Dropping the run future on Ctrl-C still terminates a launched enclave
    let mut run = Box::pin(controller.run());
    let finished = tokio::select! {
        report = &mut run => Some(report),
        _ = tokio::signal::ctrl_c() => None,
    };
    let report = match finished {
        Some(report) => report,
        None => {
            drop(run);
            warn!("Interrupted, enclave teardown attempted");
            process::exit(130);
        }
    };

    for (i, response) in report.responses.iter().enumerate() {
        println!("response[{}]: {}", i, response.to_text());
    }

    if let Some(Err(e)) = &report.termination {
        warn!("Cleanup did not complete: {}", e);
    }

    match &report.outcome {
        Ok(()) => info!("Parent application finished."),
        Err(e) => error!("Failed at {} stage: {}", e.stage(), e),
    }
    process::exit(report.exit_code());
}
