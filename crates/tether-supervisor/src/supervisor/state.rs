use std::fmt;
use std::sync::Arc;
use tether_types::TetherError;
use tokio::time::Instant;

use super::cancellation::CancelHandle;
use crate::heartbeat::HeartbeatTimer;
use crate::host::ViewHost;
use crate::launcher::{ExitWatch, ProcessHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Starting,
    Probing,
    Serving,
    Restarting,
    Crashed,
    ShuttingDown,
}

impl Phase {
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting | Self::Probing | Self::Restarting)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Probing => "probing",
            Self::Serving => "serving",
            Self::Restarting => "restarting",
            Self::Crashed => "crashed",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Result of `start_and_serve` / `restart`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// Freshly launched and answering on `port`.
    Served { port: u16 },
    /// Already serving; the new view was attached without relaunching.
    Reattached { port: u16 },
    /// Another start sequence is in flight.
    AlreadyStarting,
    /// Shutting down or handling a crash; try again later.
    Busy,
    /// Superseded by a teardown before it finished.
    Cancelled,
    Failed(TetherError),
}

impl StartOutcome {
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Served { port } | Self::Reattached { port } => Some(*port),
            _ => None,
        }
    }

    pub fn is_serving(&self) -> bool {
        self.port().is_some()
    }
}

pub(crate) struct RunState {
    pub phase: Phase,
    pub view: Option<Arc<dyn ViewHost>>,
    pub active: Option<Arc<ProcessHandle>>,
    /// Launched but not yet past the startup probe.
    pub pending: Option<Arc<ProcessHandle>>,
    pub port: Option<u16>,
    pub failures: u32,
    pub tick_in_flight: bool,
    /// Lower failure threshold applies; cleared by the next healthy tick.
    pub suspended: bool,
    /// Between a suspend and its resume; no heartbeat runs.
    pub paused: bool,
    pub last_reload: Option<Instant>,
    pub probe_cancel: Option<CancelHandle>,
    /// Bumped by every release; async work started under an older value is stale.
    pub generation: u64,
    pub sleep_blocked: bool,
    pub heartbeat: HeartbeatTimer,
    /// Exits still being awaited by an in-flight release.
    pub draining: Vec<ExitWatch>,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            view: None,
            active: None,
            pending: None,
            port: None,
            failures: 0,
            tick_in_flight: false,
            suspended: false,
            paused: false,
            last_reload: None,
            probe_cancel: None,
            generation: 0,
            sleep_blocked: false,
            heartbeat: HeartbeatTimer::new(),
            draining: Vec::new(),
        }
    }

    pub fn has_live_process(&self) -> bool {
        self.active.as_ref().map_or(false, |h| !h.has_exited())
    }

    /// Detach everything owned by the current run. The caller awaits the result
    /// outside the lock.
    pub fn release(&mut self) -> Released {
        self.generation += 1;
        self.heartbeat.stop();

        if let Some(cancel) = self.probe_cancel.take() {
            cancel.cancel();
        }

        let handles: Vec<_> = self.active.take().into_iter().chain(self.pending.take()).collect();
        self.draining.extend(handles.iter().map(|h| h.exit_watch()));

        self.port = None;
        self.failures = 0;
        self.tick_in_flight = false;

        Released {
            handles,
            sleep_was_blocked: std::mem::take(&mut self.sleep_blocked),
        }
    }
}

pub(crate) struct Released {
    pub handles: Vec<Arc<ProcessHandle>>,
    pub sleep_was_blocked: bool,
}

impl Released {
    pub fn had_process(&self) -> bool {
        !self.handles.is_empty()
    }
}
