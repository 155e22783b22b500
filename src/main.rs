//! ac-sidecar entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ac_sidecar::{
    Sidecar,
    cli::Cli,
    config::{Config, LogFormat},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    config.apply_cli(&cli)?;

    let default_filter = if config.debug {
        "ac_sidecar=debug"
    } else {
        "ac_sidecar=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
    }

    tracing::info!(
        program = %config.supervisor.program.display(),
        args = %config.supervisor.args,
        "Starting ac-sidecar v{}",
        env!("CARGO_PKG_VERSION")
    );

    Sidecar::new(config)?.run().await?;

    tracing::info!("Sidecar stopped");
    Ok(())
}
