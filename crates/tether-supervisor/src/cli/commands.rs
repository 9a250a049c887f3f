use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tether")]
#[command(version = BUILD_VERSION)]
#[command(author = "Tether Developers <dev@tether.local>")]
#[command(about = "Tether - Keeps a local application server alive behind a desktop view")]
#[command(long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(short, long, global = true, value_name = "FILE", env = "TETHER_CONFIG", help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity (-v, -vv, -vvv)")]
    pub verbose: u8,

    #[arg(short, long, global = true, help = "Suppress non-error output")]
    pub quiet: bool,

    #[arg(long, global = true, value_name = "FILE", help = "Write logs to file")]
    pub log_file: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text", help = "Output format")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Launch the managed server and supervise it")]
    #[command(long_about = "Launch the managed server on a free loopback port and keep it healthy.\n\nRuns until SIGINT or SIGTERM. On Unix, SIGUSR1 and SIGUSR2 simulate system suspend and resume.")]
    Run {
        #[arg(long, value_name = "SECS", help = "Start again this many seconds after a failure or crash")]
        retry: Option<u64>,
        #[arg(long, help = "Open the served URL in the system browser")]
        open: bool,
    },

    #[command(about = "Validate configuration and resolve the server runtime")]
    Check,

    #[command(about = "Print a free loopback port")]
    Port,

    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show the effective configuration")]
    Show,
    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(short, long, help = "Overwrite existing configuration")]
        force: bool,
    },
}
