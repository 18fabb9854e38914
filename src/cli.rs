use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
pub struct Args {
    /// Path to the configuration file.
    #[clap(long, env = "GRADVIS_CONFIG", default_value = "gradvis.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: one hourly steering run against the pump.
    Run,

    /// Render today's decrease plan without touching anything.
    Plan,

    /// Development tools.
    Probe(ProbeArgs),
}

#[derive(Parser)]
pub struct ProbeArgs {
    #[command(subcommand)]
    pub command: ProbeCommand,
}

#[derive(Subcommand)]
pub enum ProbeCommand {
    /// Read the pump temperatures and the current setpoint.
    Pump,

    /// Refresh the forecast cache and print it.
    Forecast,

    /// Print today's prices and the priciest hours.
    Rates,
}
