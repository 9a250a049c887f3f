//! Seams the embedding application implements.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;

/// The window or page the managed server is shown in.
///
/// Calls are fire-and-forget; the supervisor never waits on the view.
pub trait ViewHost: Send + Sync {
    fn show_loading_view(&self);
    fn show_error_view(&self, message: &str, can_retry: bool);
    fn show_crash_view(&self, message: &str);
    fn load_view(&self, url: &str);
    fn reload_view(&self, ignore_cache: bool);
    fn is_view_alive(&self) -> bool;
}

pub trait SleepInhibitor: Send + Sync {
    fn prevent_idle_sleep(&self, on: bool);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInhibitor;

impl SleepInhibitor for NoopInhibitor {
    fn prevent_idle_sleep(&self, on: bool) {
        debug!("Idle-sleep inhibition {} (no-op)", if on { "requested" } else { "released" });
    }
}

/// Holds a `systemd-inhibit` child for as long as idle sleep is blocked.
#[derive(Debug, Default)]
pub struct SystemdInhibitor {
    child: Mutex<Option<tokio::process::Child>>,
}

impl SystemdInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.child.lock().is_some()
    }
}

impl SleepInhibitor for SystemdInhibitor {
    fn prevent_idle_sleep(&self, on: bool) {
        let mut child = self.child.lock();
        if on {
            if child.is_some() {
                return;
            }
            let spawned = tokio::process::Command::new("systemd-inhibit")
                .args([
                    "--what=idle",
                    "--who=tether",
                    "--why=Serving managed application",
                    "--mode=block",
                    "sleep",
                    "infinity",
                ])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn();
            match spawned {
                Ok(c) => {
                    info!("Idle sleep blocked (systemd-inhibit pid {:?})", c.id());
                    *child = Some(c);
                }
                Err(e) => warn!("Failed to block idle sleep: {}", e),
            }
        } else if let Some(mut c) = child.take() {
            if let Err(e) = c.start_kill() {
                warn!("Failed to release idle-sleep inhibitor: {}", e);
            }
            info!("Idle sleep released");
        }
    }
}

pub fn inhibitor_for(config: &SupervisorConfig) -> Arc<dyn SleepInhibitor> {
    if !config.prevent_idle_sleep {
        return Arc::new(NoopInhibitor);
    }
    if cfg!(target_os = "linux") {
        Arc::new(SystemdInhibitor::new())
    } else {
        Arc::new(NoopInhibitor)
    }
}
