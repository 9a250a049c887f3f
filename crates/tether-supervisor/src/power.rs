use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::supervisor::Supervisor;

const POWER_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    Suspend,
    Resume,
}

pub fn power_channel() -> (mpsc::Sender<PowerEvent>, mpsc::Receiver<PowerEvent>) {
    mpsc::channel(POWER_CHANNEL_CAPACITY)
}

/// Forwards platform suspend/resume notifications to the supervisor, one at a time.
pub struct PowerObserver;

impl PowerObserver {
    pub fn spawn(supervisor: Supervisor, mut events: mpsc::Receiver<PowerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                info!("Power event: {:?}", event);
                match event {
                    PowerEvent::Suspend => supervisor.on_suspend(),
                    PowerEvent::Resume => supervisor.on_resume().await,
                }
            }
            debug!("Power event channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::testing::{FakeLauncher, ProbeOutcome, RecordingView, ScriptedProbe, StaticRuntime};
    use crate::host::NoopInhibitor;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_observer_drives_suspend_and_resume() {
        let supervisor = Supervisor::builder(SupervisorConfig::default())
            .launcher(FakeLauncher::new())
            .resolver(Arc::new(StaticRuntime))
            .probe(ScriptedProbe::always(ProbeOutcome::Ok))
            .inhibitor(Arc::new(NoopInhibitor))
            .build()
            .unwrap();
        let view = RecordingView::new();
        assert!(supervisor.start_and_serve(view.clone()).await.is_serving());

        let (tx, rx) = power_channel();
        let observer = PowerObserver::spawn(supervisor.clone(), rx);

        tx.send(PowerEvent::Suspend).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(supervisor.is_suspended());
        assert!(!supervisor.heartbeat_running());

        tx.send(PowerEvent::Resume).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(supervisor.heartbeat_running());
        assert_eq!(view.reloads(), 1);

        drop(tx);
        observer.await.unwrap();
    }
}
