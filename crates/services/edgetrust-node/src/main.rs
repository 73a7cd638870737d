use clap::Parser;
use edgetrust_config::load_config;
use edgetrust_node::run_node;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sensor node that delegates work to trusted edge nodes
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "EDGETRUST_CONFIG", default_value = "edgetrust.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli.config)?;

    if let Err(e) = run_node(config).await {
        tracing::error!("Node service error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
