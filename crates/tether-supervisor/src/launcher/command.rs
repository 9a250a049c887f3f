use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tether_types::{ProcessExit, TetherError, TetherResult};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::{process_channel, OutputTail, ProcessControl, ProcessHandle};
use super::runtime::ServerRuntime;
use crate::config::SupervisorConfig;

/// Locale pinned for every managed server so its output decodes the same everywhere.
pub const UTF8_ENV: [(&str, &str); 4] = [
    ("LANG", "en_US.UTF-8"),
    ("LC_ALL", "en_US.UTF-8"),
    ("LC_CTYPE", "en_US.UTF-8"),
    ("R_ENCODING", "UTF-8"),
];

const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn the managed server bound to `host:port`.
    async fn launch(
        &self,
        runtime: &ServerRuntime,
        host: &str,
        port: u16,
    ) -> TetherResult<ProcessHandle>;
}

/// Launches the managed server as a tokio child process.
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    grace: Duration,
    forward_output: bool,
}

impl CommandLauncher {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            forward_output: true,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.teardown_grace())
            .with_forward_output(config.logging.forward_server_output)
    }

    pub fn with_forward_output(mut self, forward: bool) -> Self {
        self.forward_output = forward;
        self
    }

    fn build_command(&self, runtime: &ServerRuntime, host: &str, port: u16) -> Command {
        let mut command = Command::new(&runtime.executable);
        command
            .args(runtime.render_args(host, port))
            .envs(UTF8_ENV)
            .envs(&runtime.env)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if runtime.application_directory.is_dir() {
            command.current_dir(&runtime.application_directory);
        }

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        command
    }
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn launch(
        &self,
        runtime: &ServerRuntime,
        host: &str,
        port: u16,
    ) -> TetherResult<ProcessHandle> {
        let mut child = self.build_command(runtime, host, port).spawn().map_err(|e| {
            TetherError::LaunchFailure(format!(
                "Failed to launch {}: {}",
                runtime.executable.display(),
                e
            ))
        })?;

        let pid = child.id();
        let (handle, control) = process_channel(pid);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, "stdout", control.output(), self.forward_output));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, "stderr", control.output(), self.forward_output));
        }

        tokio::spawn(reap(child, control, readers, self.grace));

        info!(
            "Launched managed server {} (pid {:?}) on {}:{}",
            runtime.executable.display(),
            pid,
            host,
            port
        );
        Ok(handle)
    }
}

fn forward_lines<R>(
    stream: R,
    name: &'static str,
    tail: OutputTail,
    forward: bool,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Stopped reading managed server {}: {}", name, e);
                    break;
                }
            }
            // Servers are not guaranteed to write UTF-8; keep the pipe drained regardless.
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if forward {
                info!(target: "managed_server", stream = name, "{}", line);
            }
            tail.push(line);
        }
    })
}

async fn reap(
    mut child: Child,
    mut control: ProcessControl,
    readers: Vec<JoinHandle<()>>,
    grace: Duration,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = control.stop_requested() => None,
    };

    let status = match exited {
        Some(status) => status,
        None => stop_child(&mut child, grace).await,
    };

    if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, futures::future::join_all(readers))
        .await
        .is_err()
    {
        debug!("Managed server output still open after exit, not waiting for it");
    }

    let exit = match status {
        Ok(status) => exit_from_status(status),
        Err(e) => {
            warn!("Failed to wait for managed server: {}", e);
            ProcessExit::default()
        }
    };
    debug!("Managed server exited ({})", exit);
    control.report_exit(exit);
}

async fn stop_child(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if request_graceful_exit(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => warn!("Managed server ignored SIGTERM for {:?}, killing", grace),
        }
    }

    if let Err(e) = child.start_kill() {
        warn!("Failed to kill managed server: {}", e);
    }
    child.wait().await
}

#[cfg(unix)]
fn request_graceful_exit(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to send SIGTERM to {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(_child: &Child) -> bool {
    false
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    ProcessExit {
        code: status.code(),
        signal,
    }
}
