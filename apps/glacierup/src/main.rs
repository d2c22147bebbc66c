//! glacierup entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = app::Args::parse(std::env::args().skip(1))?;

    let config = config::Config::load()?;
    tracing::info!(endpoint = %config.endpoint, vault = %args.vault, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(app::run(config, args))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.checksum_matched {
        std::process::exit(2);
    }
    Ok(())
}
