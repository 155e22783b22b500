//! Command-line flags.
//!
//! Flags mirror the environment configuration and take precedence over it.
//! Anything left unset falls back to the env value or the built-in default.

use std::path::PathBuf;

use clap::{ColorChoice, Parser};

#[derive(Parser, Debug, Default)]
#[command(name = "ac-sidecar")]
#[command(about = "Agones sidecar for an Assetto Corsa dedicated server")]
#[command(
    long_about = "Launches the game server, follows its log output to drive the Agones \
                  lifecycle (ready, allocated, reserved, shutdown) and exposes Prometheus \
                  metrics plus a liveness probe.\nExample:\n  ac-sidecar -i ./start-server.sh --args \"--config cfg\""
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    /// Server script or binary to launch
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Arguments passed to the server, split on whitespace
    #[arg(long, allow_hyphen_values = true)]
    pub args: Option<String>,

    /// Upper bound on teardown time (e.g. 8s)
    #[arg(long)]
    pub shutdown_timeout: Option<String>,

    /// Reservation length renewed while the server runs (e.g. 10m)
    #[arg(long)]
    pub reserve_duration: Option<String>,

    /// Port for the Prometheus /metrics endpoint
    #[arg(long)]
    pub metrics_port: Option<u16>,

    /// Port for the /health liveness endpoint
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Allocate on first player connect and release on last disconnect
    #[arg(long)]
    pub player_driven_allocation: bool,

    /// Verbose logging (debug level for this crate)
    #[arg(long)]
    pub debug: bool,
}
