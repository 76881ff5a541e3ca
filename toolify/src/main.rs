use std::net::SocketAddr;

use anyhow::Context;
use args::Args;
use clap::Parser;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let shared = config::SharedConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;
    let snapshot = shared.snapshot();

    let filter = args
        .log
        .clone()
        .unwrap_or_else(|| snapshot.features.log_level.clone());
    logger::init(&filter);

    let listen_address: SocketAddr = match args.listen {
        Some(address) => address,
        None => format!("{}:{}", snapshot.server.host, snapshot.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "server.host must be an IP address, got '{}'",
                    snapshot.server.host
                )
            })?,
    };

    log::info!(
        "starting with {} upstream service(s), config from {}",
        snapshot.upstream_services.len(),
        args.config.display()
    );

    server::serve(server::ServeConfig {
        listen_address,
        config: shared,
    })
    .await?;

    Ok(())
}
