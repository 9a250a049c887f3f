mod logging;
mod runtime;
mod supervisor;
mod types;

pub use logging::LoggingConfig;
pub use runtime::RuntimeConfig;
pub use supervisor::SupervisorConfig;
pub use types::*;

use std::path::PathBuf;

/// Directory bundled assets are resolved against: `<exe dir>/app`.
pub fn default_asset_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("app")
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("tether.toml")
}
