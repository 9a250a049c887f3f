use super::commands::ConfigAction;
use std::path::Path;
use tether_supervisor::SupervisorConfig;
use tether_types::{TetherError, TetherResult};

pub fn handle_config(config_path: &Path, action: Option<ConfigAction>) -> TetherResult<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            if !config_path.exists() {
                println!("\x1b[38;5;245mNo configuration file found at {:?}, showing defaults\x1b[0m", config_path);
                println!("Run '\x1b[38;5;51mtether config init\x1b[0m' to create one");
                println!();
            }
            let config = SupervisorConfig::load(config_path)?;
            let content = toml::to_string_pretty(&config)
                .map_err(|e| TetherError::Config(format!("Failed to serialize config: {}", e)))?;
            println!("{}", content);
        }
        Some(ConfigAction::Init { force }) => {
            if config_path.exists() && !force {
                println!("\x1b[38;5;196m[-]\x1b[0m Configuration already exists at {:?} (use --force to overwrite)", config_path);
                return Ok(());
            }
            SupervisorConfig::default().save(config_path)?;
            println!("\x1b[38;5;46m[+]\x1b[0m Wrote default configuration to {:?}", config_path);
        }
    }
    Ok(())
}
