#![forbid(unsafe_code)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const LOOPBACK_HOST: &str = "127.0.0.1";

pub const DEFAULT_LIVENESS_PATH: &str = "/shared/shiny.min.js";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TetherError {
    #[error("No free local port available: {0}")]
    PortUnavailable(String),

    #[error("Failed to launch managed server: {0}")]
    LaunchFailure(String),

    #[error("Managed server did not respond within {}s", .0.as_secs())]
    StartupTimeout(Duration),

    #[error("Managed server crashed ({0})")]
    ProcessCrashed(ProcessExit),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Teardown error: {0}")]
    Teardown(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Start cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    /// Whether offering the user a retry can plausibly succeed.
    pub fn can_retry(&self) -> bool {
        !matches!(self, TetherError::Config(_))
    }
}

pub type TetherResult<T> = Result<T, TetherError>;

/// How a managed process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }

    pub fn signal_name(&self) -> Option<&'static str> {
        self.signal.map(|sig| match sig {
            1 => "SIGHUP",
            2 => "SIGINT",
            3 => "SIGQUIT",
            6 => "SIGABRT",
            9 => "SIGKILL",
            11 => "SIGSEGV",
            13 => "SIGPIPE",
            15 => "SIGTERM",
            _ => "unknown signal",
        })
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "code {}", code)?,
            None => write!(f, "code none")?,
        }
        match (self.signal, self.signal_name()) {
            (Some(sig), Some(name)) => write!(f, ", signal {} ({})", name, sig),
            (Some(sig), None) => write!(f, ", signal {}", sig),
            (None, _) => write!(f, ", signal none"),
        }
    }
}

/// The only states a host ever renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Loading,
    Running,
    Error,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Loading => write!(f, "loading"),
            HostStatus::Running => write!(f, "running"),
            HostStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartReason {
    HeartbeatFailures { failures: u32 },
    ResumeCheckFailed,
    Requested,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::HeartbeatFailures { failures } => {
                write!(f, "{} consecutive heartbeat failures with no live process", failures)
            }
            RestartReason::ResumeCheckFailed => write!(f, "liveness check failed after resume"),
            RestartReason::Requested => write!(f, "restart requested by host"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started { port: u16 },
    Restarting { reason: RestartReason },
    Crashed { exit: ProcessExit },
    Stopped,
    Status { status: HostStatus },
}

impl LifecycleEvent {
    pub fn status(status: HostStatus) -> Self {
        LifecycleEvent::Status { status }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Started { port } => write!(f, "started on port {}", port),
            LifecycleEvent::Restarting { reason } => write!(f, "restarting: {}", reason),
            LifecycleEvent::Crashed { exit } => write!(f, "crashed ({})", exit),
            LifecycleEvent::Stopped => write!(f, "stopped"),
            LifecycleEvent::Status { status } => write!(f, "status: {}", status),
        }
    }
}
