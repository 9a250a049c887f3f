use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::types::LogLevel;

/// Where supervisor logs go and whether the managed server's own output is
/// mirrored into them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    pub json: bool,
    /// Re-emit server stdout/stderr under the `managed_server` target. The
    /// crash report tail is kept either way.
    pub forward_server_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: None,
            json: false,
            forward_server_output: true,
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directive for the given command-line verbosity. Flags win
    /// over the configured level; `quiet` wins over both.
    pub fn filter_directive(&self, verbose: u8, quiet: bool) -> String {
        if quiet {
            return "warn".to_string();
        }
        match verbose {
            0 if self.forward_server_output => self.level.to_string(),
            0 => format!("{},managed_server=off", self.level),
            1 => "info,tether_supervisor=debug".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        }
    }

    /// The log file to write, preferring one given on the command line.
    pub fn log_file<'a>(&'a self, cli_override: Option<&'a Path>) -> Option<&'a Path> {
        cli_override.or(self.file.as_deref())
    }
}
