//! Command-line flags for the `framecast` daemon.

use std::path::PathBuf;

use clap::Parser;

/// Device daemon for the framecast display appliance.
#[derive(Debug, Parser)]
#[command(
    name = "framecast",
    version,
    about = "Render assets pushed over MQTT on a framecast display"
)]
pub struct Cli {
    /// Config file (defaults to the platform config dir, then /etc/framecast)
    #[arg(long, short = 'c', env = "FRAMECAST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, env = "FRAMECAST_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Print the effective configuration (secrets redacted) and exit
    #[arg(long)]
    pub print_config: bool,
}
