use std::path::PathBuf;

use clap::Parser;

/// Manifold MCP hub
#[derive(Debug, Parser)]
#[command(name = "manifold", about = "Multi-tenant hub and gateway for MCP servers")]
pub struct Args {
    /// Path to the settings file
    #[arg(short, long, default_value = "manifold.toml", env = "MANIFOLD_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "MANIFOLD_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}
