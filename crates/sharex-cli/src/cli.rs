use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sharex_server::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(
    name = "sharexserver",
    about = "ShareX upload server: stores uploads and serves them by call reference",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the upload server until "stop", "close", Ctrl-C or SIGTERM
    Serve(ServeArgs),
    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Override `webserver_address`
    #[arg(long)]
    pub address: Option<String>,
    /// Override `storage_engine`
    #[arg(long)]
    pub engine: Option<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}
