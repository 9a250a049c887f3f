use super::commands::OutputFormat;
use std::path::Path;
use tether_supervisor::{port, resolver_from_config, SupervisorConfig};
use tether_types::{TetherError, TetherResult, LOOPBACK_HOST};

pub fn run_checks(config_path: &Path, format: OutputFormat) -> TetherResult<()> {
    let config = SupervisorConfig::load(config_path)?;
    let runtime = resolver_from_config(&config)?.resolve()?;

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "config": config_path,
                "config_found": config_path.exists(),
                "runtime": config.runtime.kind.to_string(),
                "executable": runtime.executable,
                "args": runtime.args,
                "application_directory": runtime.application_directory,
                "env": runtime.env,
                "liveness_path": config.liveness_path,
            });
            let text = serde_json::to_string_pretty(&report)
                .map_err(|e| TetherError::Internal(format!("Failed to encode report: {}", e)))?;
            println!("{}", text);
        }
        OutputFormat::Text => {
            if config_path.exists() {
                println!("\x1b[38;5;46m[+]\x1b[0m Configuration is valid ({:?})", config_path);
            } else {
                println!("\x1b[38;5;226m[!]\x1b[0m No file at {:?}, defaults are valid", config_path);
            }
            println!("\x1b[38;5;46m[+]\x1b[0m Runtime resolved ({})", config.runtime.kind);
            println!("    Executable:  {}", runtime.executable.display());
            println!("    App dir:     {}", runtime.application_directory.display());
            println!("    Arguments:   {}", runtime.args.join(" "));
            for (key, value) in &runtime.env {
                println!("    {}={}", key, value);
            }
        }
    }
    Ok(())
}

pub async fn show_port(format: OutputFormat) -> TetherResult<()> {
    let port = port::allocate().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "host": LOOPBACK_HOST, "port": port })),
        OutputFormat::Text => println!("{}", port),
    }
    Ok(())
}
