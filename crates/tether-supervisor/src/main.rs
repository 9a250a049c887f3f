mod cli;

use clap::Parser;
use cli::{handle_config, init_logging, run_checks, run_supervisor, show_port, Cli, Commands};
use tether_supervisor::{default_config_path, SupervisorConfig};
use tether_types::TetherResult;

#[tokio::main]
async fn main() -> TetherResult<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    // Logging settings come from the file when it parses; commands report the error otherwise.
    let loaded = SupervisorConfig::load(&config_path);
    init_logging(&cli, loaded.as_ref().ok().map(|c| &c.logging));

    match cli.command {
        Commands::Run { retry, open } => {
            run_supervisor(loaded?, retry, open, cli.format).await?;
        }
        Commands::Check => {
            run_checks(&config_path, cli.format)?;
        }
        Commands::Port => {
            show_port(cli.format).await?;
        }
        Commands::Config { action } => {
            handle_config(&config_path, action)?;
        }
    }

    Ok(())
}
