use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::SupervisorConfig;
use crate::supervisor::{CancelHandle, CancellationToken};

/// The single repeating liveness timer.
///
/// `start` always stops the previous loop first, so at most one is live. Ticks
/// run sequentially inside the loop; a tick that overruns the period causes the
/// missed ticks to be skipped, never queued.
#[derive(Debug, Default)]
pub struct HeartbeatTimer {
    task: Option<JoinHandle<()>>,
    stop: Option<CancelHandle>,
}

impl HeartbeatTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();

        let (stop, mut token) = CancellationToken::new();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => break,
                }
                if token.is_cancelled() {
                    break;
                }
                tick().await;
            }
            debug!("Heartbeat loop stopped");
        });

        self.task = Some(task);
        self.stop = Some(stop);
    }

    /// Stops future ticks. A tick already running finishes on its own.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        self.task = None;
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
            && self.stop.as_ref().map_or(false, |s| !s.is_cancelled())
    }
}

/// What a failed tick asks the supervisor to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Escalation {
    /// Below threshold; keep counting.
    Wait { failures: u32 },
    /// The process handle is gone; relaunch.
    Restart { failures: u32 },
    /// The process is there but not answering; reload the view.
    Reload,
    /// Same as `Reload`, but a forced reload happened too recently.
    ReloadSuppressed,
}

#[derive(Clone, Copy, Debug)]
pub struct HealthPolicy {
    pub failure_threshold: u32,
    pub suspended_failure_threshold: u32,
    pub reload_cooldown: Duration,
}

impl HealthPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            suspended_failure_threshold: config.suspended_failure_threshold,
            reload_cooldown: config.reload_cooldown(),
        }
    }

    pub fn threshold(&self, suspended: bool) -> u32 {
        if suspended {
            self.suspended_failure_threshold
        } else {
            self.failure_threshold
        }
    }

    /// Count one failure. Reaching the threshold always resets `failures`,
    /// whichever action is taken.
    pub fn on_failure(
        &self,
        failures: &mut u32,
        suspended: bool,
        process_present: bool,
        last_reload: Option<Instant>,
        now: Instant,
    ) -> Escalation {
        *failures = failures.saturating_add(1);
        let count = *failures;
        if count < self.threshold(suspended) {
            return Escalation::Wait { failures: count };
        }

        *failures = 0;
        if !process_present {
            return Escalation::Restart { failures: count };
        }

        let cooled_down = last_reload.map_or(true, |at| now.duration_since(at) >= self.reload_cooldown);
        if cooled_down {
            Escalation::Reload
        } else {
            Escalation::ReloadSuppressed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn policy() -> HealthPolicy {
        HealthPolicy {
            failure_threshold: 3,
            suspended_failure_threshold: 1,
            reload_cooldown: Duration::from_secs(30),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_after_one_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = HeartbeatTimer::new();
        let c = count.clone();
        timer.start(Duration::from_secs(10), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(timer.is_running());

        timer.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_loop() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut timer = HeartbeatTimer::new();

        let f = first.clone();
        timer.start(Duration::from_secs(1), move || {
            let f = f.clone();
            async move {
                f.fetch_add(1, Ordering::SeqCst);
            }
        });
        let s = second.clone();
        timer.start(Duration::from_secs(1), move || {
            let s = s.clone();
            async move {
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_skips_missed_periods() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = HeartbeatTimer::new();
        let c = count.clone();
        timer.start(Duration::from_secs(1), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2500)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(7200)).await;
        // Ticks at 1s, 4s and 7s; nothing queued while a tick runs.
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_restart_when_process_gone() {
        let now = Instant::now();
        let mut failures = 0;
        assert_eq!(
            policy().on_failure(&mut failures, false, false, None, now),
            Escalation::Wait { failures: 1 }
        );
        assert_eq!(
            policy().on_failure(&mut failures, false, false, None, now),
            Escalation::Wait { failures: 2 }
        );
        assert_eq!(
            policy().on_failure(&mut failures, false, false, None, now),
            Escalation::Restart { failures: 3 }
        );
        assert_eq!(failures, 0);
    }

    #[test]
    fn test_suspended_threshold_applies() {
        let mut failures = 0;
        let escalation = policy().on_failure(&mut failures, true, true, None, Instant::now());
        assert_eq!(escalation, Escalation::Reload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_cooldown() {
        let policy = policy();
        let reloaded_at = Instant::now();
        let mut failures = 2;

        tokio::time::advance(Duration::from_secs(10)).await;
        let escalation = policy.on_failure(&mut failures, false, true, Some(reloaded_at), Instant::now());
        assert_eq!(escalation, Escalation::ReloadSuppressed);
        assert_eq!(failures, 0);

        tokio::time::advance(Duration::from_secs(20)).await;
        failures = 2;
        let escalation = policy.on_failure(&mut failures, false, true, Some(reloaded_at), Instant::now());
        assert_eq!(escalation, Escalation::Reload);
    }
}
