use super::commands::Cli;
use tether_supervisor::LoggingConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging(cli: &Cli, logging: Option<&LoggingConfig>) {
    let defaults = LoggingConfig::default();
    let logging = logging.unwrap_or(&defaults);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directive(cli.verbose, cli.quiet)));

    let json = logging.json;
    let file = logging.log_file(cli.log_file.as_deref()).and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(std::sync::Mutex::new(file)),
            Err(e) => {
                eprintln!("Failed to open log file {:?}: {}, logging to stdout", path, e);
                None
            }
        }
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (file, json) {
        (Some(file), true) => {
            let file_layer = fmt::layer().json().with_writer(file).with_ansi(false);
            subscriber.with(file_layer).init();
        }
        (Some(file), false) => {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false);
            subscriber.with(file_layer).init();
        }
        (None, true) => {
            subscriber.with(fmt::layer().json()).init();
        }
        (None, false) => {
            let stdout_layer = fmt::layer().with_target(cli.verbose >= 2);
            subscriber.with(stdout_layer).init();
        }
    }
}

/// Hand `url` to the platform's opener without waiting for it.
pub fn open_in_browser(url: &str) {
    let mut command = if cfg!(target_os = "windows") {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };

    command
        .arg(url)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    if let Err(e) = command.spawn() {
        tracing::warn!("Could not open {} in a browser: {}", url, e);
    }
}

pub fn notify_systemd_ready() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(socket_path) = std::env::var("NOTIFY_SOCKET") {
            use std::os::unix::net::UnixDatagram;
            if let Ok(socket) = UnixDatagram::unbound() {
                let _ = socket.send_to(b"READY=1", &socket_path);
                tracing::debug!("Notified systemd: READY=1");
            }
        }
    }
}
