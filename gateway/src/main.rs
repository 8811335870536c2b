mod args;

use std::net::SocketAddr;

use anyhow::Context as _;
use args::Args;
use clap::Parser;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::Config::load(path).with_context(|| format!("loading configuration from {}", path.display()))?,
        None => config::Config::default(),
    };

    if let Some(override_address) = &args.listen_address {
        config.server.listen_address = Some(
            override_address
                .parse::<SocketAddr>()
                .with_context(|| format!("invalid --listen-address value: {override_address}"))?,
        );
    }

    config.validate().context("invalid configuration")?;

    let listen_address = config
        .server
        .listen_address
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse().expect("valid default address"));

    let shutdown_signal = CancellationToken::new();
    let shutdown_task = {
        let shutdown_signal = shutdown_signal.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown_signal.cancel();
        })
    };

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await?;

    shutdown_task.abort();

    Ok(())
}
