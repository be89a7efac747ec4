use clap::Parser;
use tracing_subscriber::EnvFilter;
use volley::cli::{self, LoadCli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    cli::run(LoadCli::parse()).await
}
