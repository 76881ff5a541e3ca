use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Protocol-bridging reverse proxy for LLM APIs.
#[derive(Debug, Parser)]
#[command(name = "toolify", version, about)]
pub struct Args {
    /// Path to the configuration file.
    #[arg(short, long, env = "TOOLIFY_CONFIG", default_value = "toolify.toml")]
    pub config: PathBuf,

    /// Listen address override, e.g. 0.0.0.0:8000. Defaults to the
    /// configured server.host and server.port.
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Log filter override, e.g. `info` or `llm=debug,info`.
    #[arg(long, env = "TOOLIFY_LOG")]
    pub log: Option<String>,
}
