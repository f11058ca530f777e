//! enclave-server — runs inside the enclave
//!
//! Listens on the channel port and answers every request with the processed
//! payload, one task per connection, until the enclave is torn down.

use clap::Parser;
use enclave_host::channel::ChannelServer;
use enclave_host::config::ServerArgs;
use log::{error, info};
use std::process;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    info!("Enclave server starting...");

    let (addr, config) = match ServerArgs::parse().into_config() {
        Ok(parts) => parts,
        Err(e) => {
            error!("{}", e);
            process::exit(2);
        }
    };

    let listener = match ChannelServer::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to listen on {}: {}", addr, e);
            process::exit(1);
        }
    };

    ChannelServer::new(config).serve(listener).await;
}
