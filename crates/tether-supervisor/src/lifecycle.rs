//! Host lifecycle phases and the will-shutdown hook.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tether_types::{TetherError, TetherResult};
use tokio::sync::{watch, OnceCell};
use tracing::{debug, info, warn};

/// Phases only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecyclePhase {
    Starting,
    Ready,
    AfterWindowOpen,
    Eventually,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::AfterWindowOpen => "after_window_open",
            Self::Eventually => "eventually",
        };
        f.write_str(name)
    }
}

type Participant = (String, BoxFuture<'static, TetherResult<()>>);

pub struct Lifecycle {
    phase: watch::Sender<LifecyclePhase>,
    participants: Mutex<Vec<Participant>>,
    shutdown_started: AtomicBool,
    shutdown: OnceCell<()>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Starting);
        Self {
            phase,
            participants: Mutex::new(Vec::new()),
            shutdown_started: AtomicBool::new(false),
            shutdown: OnceCell::new(),
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    pub fn set_phase(&self, phase: LifecyclePhase) -> TetherResult<()> {
        let current = self.phase();
        if phase < current {
            return Err(TetherError::Internal(format!(
                "Lifecycle cannot go backwards from {} to {}",
                current, phase
            )));
        }
        if phase > current {
            debug!("Lifecycle phase {} -> {}", current, phase);
            self.phase.send_replace(phase);
        }
        Ok(())
    }

    /// Resolves once `phase` has been reached.
    pub async fn when(&self, phase: LifecyclePhase) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|current| *current >= phase).await;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    /// Register work that must finish before the host exits. `participant` is not
    /// polled until shutdown begins.
    pub fn join<F>(&self, id: impl Into<String>, participant: F)
    where
        F: Future<Output = TetherResult<()>> + Send + 'static,
    {
        let id = id.into();
        if self.is_shutting_down() {
            warn!("Shutdown participant '{}' joined too late, ignoring", id);
            return;
        }
        self.participants.lock().push((id, Box::pin(participant)));
    }

    /// Run every participant once. Concurrent and repeated calls wait on the same run.
    pub async fn shutdown(&self, timeout: Duration) {
        self.shutdown
            .get_or_init(|| self.run_shutdown(timeout))
            .await;
    }

    async fn run_shutdown(&self, timeout: Duration) {
        self.shutdown_started.store(true, Ordering::SeqCst);
        let participants = std::mem::take(&mut *self.participants.lock());
        info!("Shutting down ({} participant(s))", participants.len());

        let runs = participants.into_iter().map(|(id, participant)| async move {
            debug!("Shutdown participant '{}' started", id);
            match participant.await {
                Ok(()) => debug!("Shutdown participant '{}' finished", id),
                Err(e) => warn!("Shutdown participant '{}' failed: {}", id, e),
            }
        });

        if tokio::time::timeout(timeout, futures::future::join_all(runs))
            .await
            .is_err()
        {
            warn!("Shutdown participants still running after {:?}, giving up", timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_phases_only_move_forward() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.phase(), LifecyclePhase::Starting);

        lifecycle.set_phase(LifecyclePhase::AfterWindowOpen).unwrap();
        lifecycle.set_phase(LifecyclePhase::AfterWindowOpen).unwrap();
        assert!(lifecycle.set_phase(LifecyclePhase::Ready).is_err());
        assert_eq!(lifecycle.phase(), LifecyclePhase::AfterWindowOpen);
    }

    #[tokio::test]
    async fn test_when_resolves_on_later_phase() {
        let lifecycle = Arc::new(Lifecycle::new());
        let waiter = tokio::spawn({
            let lifecycle = lifecycle.clone();
            async move { lifecycle.when(LifecyclePhase::Ready).await }
        });

        lifecycle.set_phase(LifecyclePhase::Eventually).unwrap();
        waiter.await.unwrap();
        tokio_test::assert_ready!(tokio_test::task::spawn(lifecycle.when(LifecyclePhase::Starting)).poll());
    }

    #[tokio::test]
    async fn test_shutdown_runs_participants_once() {
        let lifecycle = Lifecycle::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b"] {
            let runs = runs.clone();
            lifecycle.join(id, async move {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        lifecycle.join("broken", async { Err(TetherError::Teardown("boom".into())) });

        tokio::join!(
            lifecycle.shutdown(Duration::from_secs(1)),
            lifecycle.shutdown(Duration::from_secs(1))
        );
        lifecycle.shutdown(Duration::from_secs(1)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(lifecycle.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_bounded() {
        let lifecycle = Lifecycle::new();
        lifecycle.join("stuck", futures::future::pending());

        let started = tokio::time::Instant::now();
        lifecycle.shutdown(Duration::from_secs(5)).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_late_join_is_ignored() {
        let lifecycle = Lifecycle::new();
        lifecycle.shutdown(Duration::from_secs(1)).await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        lifecycle.join("late", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        lifecycle.shutdown(Duration::from_secs(1)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
