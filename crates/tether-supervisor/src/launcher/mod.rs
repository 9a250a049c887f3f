mod command;
mod handle;
mod runtime;

pub use command::{CommandLauncher, ProcessLauncher, UTF8_ENV};
pub use handle::{process_channel, ExitWatch, OutputTail, ProcessControl, ProcessHandle, OUTPUT_TAIL_LINES};
pub use runtime::{
    render_template, resolver_from_config, to_posix, CommandRuntime, RuntimeResolver,
    ServerRuntime, ShinyRuntime,
};
