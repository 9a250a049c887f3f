mod checks;
mod commands;
mod config_cmd;
mod run;
mod utils;

pub use checks::{run_checks, show_port};
pub use commands::{Cli, Commands};
pub use config_cmd::handle_config;
pub use run::run_supervisor;
pub use utils::init_logging;
