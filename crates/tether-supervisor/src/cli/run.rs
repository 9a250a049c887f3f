use super::commands::OutputFormat;
use super::utils::{notify_systemd_ready, open_in_browser};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_supervisor::{
    power_channel, Lifecycle, LifecyclePhase, PowerEvent, PowerObserver, StartOutcome, Supervisor,
    SupervisorConfig, ViewHost,
};
use tether_types::{LifecycleEvent, ProcessExit, TetherError, TetherResult};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

const EVENTUALLY_DELAY: Duration = Duration::from_millis(2500);
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);
const BUSY_BACKOFF: Duration = Duration::from_millis(250);

/// View host for terminals: logs what a window would show and prints the URL.
struct HeadlessView {
    format: OutputFormat,
    open_browser: bool,
    loaded_once: AtomicBool,
    lifecycle: Arc<Lifecycle>,
}

impl ViewHost for HeadlessView {
    fn show_loading_view(&self) {
        info!("Waiting for the application server");
    }

    fn show_error_view(&self, message: &str, can_retry: bool) {
        error!("{}", message);
        if can_retry {
            info!("Start can be retried (see --retry)");
        }
    }

    fn show_crash_view(&self, message: &str) {
        error!("{}", message);
    }

    fn load_view(&self, url: &str) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "url": url })),
            OutputFormat::Text => println!("\x1b[38;5;46m[+]\x1b[0m Serving at \x1b[38;5;51m{}\x1b[0m", url),
        }

        if !self.loaded_once.swap(true, Ordering::SeqCst) {
            if self.open_browser {
                open_in_browser(url);
            }
            if let Err(e) = self.lifecycle.set_phase(LifecyclePhase::AfterWindowOpen) {
                debug!("Lifecycle phase not advanced: {}", e);
            }
        }
    }

    fn reload_view(&self, ignore_cache: bool) {
        info!("View reload requested (ignore_cache={})", ignore_cache);
    }

    fn is_view_alive(&self) -> bool {
        true
    }
}

pub async fn run_supervisor(
    config: SupervisorConfig,
    retry: Option<u64>,
    open: bool,
    format: OutputFormat,
) -> TetherResult<()> {
    info!("Starting tether: {}", config.summary());
    let grace = config.teardown_grace();

    let supervisor = Supervisor::new(config)?;
    let lifecycle = Arc::new(Lifecycle::new());

    let teardown = supervisor.clone();
    lifecycle.join("server-teardown", async move {
        teardown.teardown().await;
        Ok(())
    });

    let (power_tx, power_rx) = power_channel();
    let observer = PowerObserver::spawn(supervisor.clone(), power_rx);
    let reporter = tokio::spawn(report_events(supervisor.subscribe(), format));

    let phases = lifecycle.clone();
    let phase_task = tokio::spawn(async move {
        phases.when(LifecyclePhase::AfterWindowOpen).await;
        notify_systemd_ready();
        tokio::time::sleep(EVENTUALLY_DELAY).await;
        if let Err(e) = phases.set_phase(LifecyclePhase::Eventually) {
            debug!("Lifecycle phase not advanced: {}", e);
        }
    });

    lifecycle.set_phase(LifecyclePhase::Ready)?;

    let view: Arc<dyn ViewHost> = Arc::new(HeadlessView {
        format,
        open_browser: open,
        loaded_once: AtomicBool::new(false),
        lifecycle: lifecycle.clone(),
    });

    let mut keeper = tokio::spawn(keep_serving(
        supervisor.clone(),
        view,
        retry.map(Duration::from_secs),
    ));

    let result = tokio::select! {
        signalled = wait_for_shutdown(power_tx) => {
            keeper.abort();
            signalled
        }
        finished = &mut keeper => match finished {
            Ok(result) => result,
            Err(e) => Err(TetherError::Internal(format!("Supervision task failed: {}", e))),
        },
    };

    info!("Shutting down...");
    lifecycle.shutdown(grace + SHUTDOWN_SLACK).await;

    phase_task.abort();
    observer.abort();
    reporter.abort();

    info!("Shutdown complete");
    result
}

/// Start the server, then wait for it to crash. Without `retry` the first
/// failure or crash ends supervision.
async fn keep_serving(
    supervisor: Supervisor,
    view: Arc<dyn ViewHost>,
    retry: Option<Duration>,
) -> TetherResult<()> {
    let mut events = supervisor.subscribe();

    loop {
        let failure = match supervisor.start_and_serve(view.clone()).await {
            StartOutcome::Failed(e) if !e.can_retry() => return Err(e),
            StartOutcome::Failed(e) => e,
            StartOutcome::Cancelled => return Ok(()),
            StartOutcome::Busy => {
                tokio::time::sleep(BUSY_BACKOFF).await;
                continue;
            }
            outcome => {
                debug!("Start outcome: {:?}", outcome);
                TetherError::ProcessCrashed(wait_for_crash(&mut events).await)
            }
        };

        let Some(delay) = retry else {
            return Err(failure);
        };
        warn!("{}, starting again in {}s", failure, delay.as_secs());
        tokio::time::sleep(delay).await;
    }
}

async fn wait_for_crash(events: &mut broadcast::Receiver<LifecycleEvent>) -> ProcessExit {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::Crashed { exit }) => return exit,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

async fn report_events(mut events: broadcast::Receiver<LifecycleEvent>, format: OutputFormat) {
    loop {
        match events.recv().await {
            Ok(event) => match format {
                OutputFormat::Json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Could not encode event: {}", e),
                },
                OutputFormat::Text => info!("Supervisor {}", event),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Event reporter fell behind, {} events dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn wait_for_shutdown(power: mpsc::Sender<PowerEvent>) -> TetherResult<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let install = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|e| {
                TetherError::Internal(format!("Failed to install {} handler: {}", name, e))
            })
        };

        let mut sigterm = install(SignalKind::terminate(), "SIGTERM")?;
        let mut sigint = install(SignalKind::interrupt(), "SIGINT")?;
        let mut sigusr1 = install(SignalKind::user_defined1(), "SIGUSR1")?;
        let mut sigusr2 = install(SignalKind::user_defined2(), "SIGUSR2")?;

        loop {
            let event = tokio::select! {
                _ = sigterm.recv() => { info!("Received SIGTERM"); return Ok(()); }
                _ = sigint.recv() => { info!("Received SIGINT"); return Ok(()); }
                _ = sigusr1.recv() => PowerEvent::Suspend,
                _ = sigusr2.recv() => PowerEvent::Resume,
            };
            if power.send(event).await.is_err() {
                warn!("Power observer is gone, dropping {:?}", event);
            }
        }
    }

    #[cfg(not(unix))]
    {
        drop(power);
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| TetherError::Internal(format!("Failed to install Ctrl+C handler: {}", e)))?;
        info!("Received Ctrl+C");
        Ok(())
    }
}
