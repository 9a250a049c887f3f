use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tether_types::{
    HostStatus, LifecycleEvent, ProcessExit, RestartReason, TetherError, TetherResult,
};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::cancellation::CancellationToken;
use super::state::{Phase, Released, RunState, StartOutcome};
use crate::config::SupervisorConfig;
use crate::heartbeat::{Escalation, HealthPolicy};
use crate::host::{inhibitor_for, SleepInhibitor, ViewHost};
use crate::launcher::{
    resolver_from_config, CommandLauncher, ExitWatch, ProcessLauncher, RuntimeResolver,
};
use crate::port;
use crate::probe::{probe_once, HttpProbe, ReqwestProbe, StartupProber};

const EVENT_CAPACITY: usize = 64;
/// Added to the teardown grace when bounding a whole termination.
const TERMINATE_SLACK: Duration = Duration::from_secs(2);

struct Inner {
    config: SupervisorConfig,
    launcher: Arc<dyn ProcessLauncher>,
    resolver: Arc<dyn RuntimeResolver>,
    probe: Arc<dyn HttpProbe>,
    prober: StartupProber,
    inhibitor: Arc<dyn SleepInhibitor>,
    policy: HealthPolicy,
    state: Mutex<RunState>,
    events: broadcast::Sender<LifecycleEvent>,
}

/// Owns the managed server for the lifetime of the host.
///
/// Cloning is cheap and every clone drives the same process. All state lives
/// behind one mutex that is never held across an await; async work captures the
/// run generation it started under and backs off once a teardown has bumped it.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

pub struct SupervisorBuilder {
    config: SupervisorConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    resolver: Option<Arc<dyn RuntimeResolver>>,
    probe: Option<Arc<dyn HttpProbe>>,
    inhibitor: Option<Arc<dyn SleepInhibitor>>,
}

impl SupervisorBuilder {
    pub fn launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn RuntimeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn HttpProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn inhibitor(mut self, inhibitor: Arc<dyn SleepInhibitor>) -> Self {
        self.inhibitor = Some(inhibitor);
        self
    }

    pub fn build(self) -> TetherResult<Supervisor> {
        let config = self.config;
        config.validate()?;

        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(CommandLauncher::from_config(&config)),
        };
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::from(resolver_from_config(&config)?),
        };
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(ReqwestProbe::new()?),
        };
        let inhibitor = self.inhibitor.unwrap_or_else(|| inhibitor_for(&config));

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Inner {
            prober: StartupProber::from_config(probe.clone(), &config),
            policy: HealthPolicy::from_config(&config),
            config,
            launcher,
            resolver,
            probe,
            inhibitor,
            state: Mutex::new(RunState::new()),
            events,
        };

        Ok(Supervisor {
            inner: Arc::new(inner),
        })
    }
}

impl Supervisor {
    pub fn builder(config: SupervisorConfig) -> SupervisorBuilder {
        SupervisorBuilder {
            config,
            launcher: None,
            resolver: None,
            probe: None,
            inhibitor: None,
        }
    }

    pub fn new(config: SupervisorConfig) -> TetherResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn port(&self) -> Option<u16> {
        self.inner.state.lock().port
    }

    pub fn base_url(&self) -> Option<String> {
        self.port().map(|port| self.inner.config.base_url(port))
    }

    pub fn failures(&self) -> u32 {
        self.inner.state.lock().failures
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.state.lock().suspended
    }

    pub fn heartbeat_running(&self) -> bool {
        self.inner.state.lock().heartbeat.is_running()
    }

    /// Launch the managed server and show it in `view`; safe to call on every
    /// view (re)load.
    pub async fn start_and_serve(&self, view: Arc<dyn ViewHost>) -> StartOutcome {
        let (released, generation) = {
            let mut state = self.inner.state.lock();
            match state.phase {
                phase if phase.is_starting() => {
                    debug!("Start requested while {}, ignoring", phase);
                    state.view = Some(view);
                    return StartOutcome::AlreadyStarting;
                }
                Phase::ShuttingDown | Phase::Crashed => {
                    debug!("Start requested while {}, refusing", state.phase);
                    return StartOutcome::Busy;
                }
                Phase::Serving if state.has_live_process() => {
                    if let Some(port) = state.port {
                        state.view = Some(view);
                        if !state.paused {
                            self.start_heartbeat(&mut state);
                        }
                        info!("Reattached view to managed server on port {}", port);
                        self.emit(LifecycleEvent::status(HostStatus::Running));
                        return StartOutcome::Reattached { port };
                    }
                }
                _ => {}
            }

            state.phase = Phase::Starting;
            state.view = Some(view.clone());
            (state.release(), state.generation)
        };

        self.run_start(view, released, generation).await
    }

    /// Tear the managed server down and launch a fresh one.
    pub async fn restart(&self, view: Arc<dyn ViewHost>) -> StartOutcome {
        self.restart_with(Some(view), RestartReason::Requested, None)
            .await
    }

    /// Stop the managed server and wait for it to exit. Idempotent; errors are
    /// logged, never returned.
    pub async fn teardown(&self) {
        if self.release_to_idle(Phase::ShuttingDown).await {
            info!("Managed server stopped");
            self.emit(LifecycleEvent::Stopped);
        }
    }

    pub fn on_suspend(&self) {
        let mut state = self.inner.state.lock();
        state.suspended = true;
        state.paused = true;
        state.heartbeat.stop();
        info!("System suspending, heartbeat paused");
    }

    /// Re-check the managed server after a resume and recover it if needed.
    pub async fn on_resume(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Serving {
                self.unpause(&mut state);
                return;
            }
            state.generation
        };

        let settle = self.inner.config.resume_settle_delay();
        info!("System resumed, checking managed server in {:?}", settle);
        tokio::time::sleep(settle).await;

        let url = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.phase != Phase::Serving {
                self.unpause(&mut state);
                return;
            }
            state.port.map(|port| self.inner.config.liveness_url(port))
        };

        let healthy = match url {
            Some(url) => probe_once(
                self.inner.probe.as_ref(),
                &url,
                self.inner.config.heartbeat_timeout(),
            )
            .await
            .is_ok(),
            None => false,
        };

        let view = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                self.unpause(&mut state);
                return;
            }
            state.paused = false;
            if healthy && state.has_live_process() {
                self.start_heartbeat(&mut state);
                Some(state.view.clone())
            } else {
                None
            }
        };

        match view {
            Some(view) => {
                info!("Managed server healthy after resume, reloading view");
                if let Some(view) = view.filter(|v| v.is_view_alive()) {
                    view.reload_view(false);
                }
            }
            None => {
                warn!("Managed server unhealthy after resume");
                self.restart_with(None, RestartReason::ResumeCheckFailed, Some(generation))
                    .await;
            }
        }
    }

    /// Lift the suspend pause. A run promoted while paused never got a
    /// heartbeat, so one is started here.
    fn unpause(&self, state: &mut RunState) {
        state.paused = false;
        if state.phase == Phase::Serving
            && state.has_live_process()
            && !state.heartbeat.is_running()
        {
            debug!("Run changed during resume, starting its heartbeat");
            self.start_heartbeat(state);
        }
    }

    async fn restart_with(
        &self,
        view: Option<Arc<dyn ViewHost>>,
        reason: RestartReason,
        expected_generation: Option<u64>,
    ) -> StartOutcome {
        let (view, released, generation) = {
            let mut state = self.inner.state.lock();
            if expected_generation.map_or(false, |g| g != state.generation) {
                debug!("Restart ({}) superseded, skipping", reason);
                return StartOutcome::Cancelled;
            }
            match state.phase {
                phase if phase.is_starting() => return StartOutcome::AlreadyStarting,
                Phase::ShuttingDown | Phase::Crashed => return StartOutcome::Busy,
                _ => {}
            }
            if let Some(view) = view {
                state.view = Some(view);
            }
            let Some(view) = state.view.clone() else {
                return StartOutcome::Failed(TetherError::Internal(
                    "restart requested with no view attached".into(),
                ));
            };

            warn!("Restarting managed server: {}", reason);
            self.emit(LifecycleEvent::Restarting { reason });
            state.phase = Phase::Restarting;
            (view, state.release(), state.generation)
        };

        self.run_start(view, released, generation).await
    }

    async fn run_start(
        &self,
        view: Arc<dyn ViewHost>,
        released: Released,
        generation: u64,
    ) -> StartOutcome {
        self.finish_release(released).await;

        view.show_loading_view();
        self.emit(LifecycleEvent::status(HostStatus::Loading));

        let port = match self.launch_and_probe(generation).await {
            Ok(port) => port,
            Err(err) => return self.fail_start(generation, err).await,
        };

        let promoted = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                None
            } else {
                state.active = state.pending.take();
                state.probe_cancel = None;
                state.phase = Phase::Serving;
                state.failures = 0;
                state.tick_in_flight = false;
                if !state.paused {
                    self.start_heartbeat(&mut state);
                }
                let block_sleep = !state.sleep_blocked;
                state.sleep_blocked = true;
                let exit = state.active.as_ref().map(|h| h.exit_watch());
                Some((state.view.clone(), block_sleep, exit))
            }
        };

        let Some((view, block_sleep, exit)) = promoted else {
            debug!("Start superseded after probe");
            return StartOutcome::Cancelled;
        };

        if let Some(exit) = exit {
            self.watch_exit(generation, exit);
        }
        if block_sleep {
            self.inner.inhibitor.prevent_idle_sleep(true);
        }

        let url = self.inner.config.base_url(port);
        if let Some(view) = view {
            view.load_view(&url);
        }
        info!("Serving managed application at {}", url);
        self.emit(LifecycleEvent::Started { port });
        self.emit(LifecycleEvent::status(HostStatus::Running));
        StartOutcome::Served { port }
    }

    async fn launch_and_probe(&self, generation: u64) -> TetherResult<u16> {
        let config = &self.inner.config;

        let port = port::allocate().await?;
        let runtime = self.inner.resolver.resolve()?;
        self.ensure_current(generation)?;

        let handle = Arc::new(
            self.inner
                .launcher
                .launch(&runtime, &config.bind_host, port)
                .await?,
        );

        let (probe_cancel, probe_token) = CancellationToken::new();
        let adopted = {
            let mut state = self.inner.state.lock();
            if state.generation == generation {
                state.pending = Some(handle.clone());
                state.port = Some(port);
                state.probe_cancel = Some(probe_cancel);
                state.phase = Phase::Probing;
                true
            } else {
                false
            }
        };
        if !adopted {
            if let Err(e) = handle.terminate(config.teardown_grace() + TERMINATE_SLACK).await {
                warn!("Failed to dispose superseded launch: {}", e);
            }
            return Err(TetherError::Cancelled("superseded during launch".into()));
        }

        debug!("Probing {} (deadline {:?})", config.base_url(port), config.startup_timeout());
        let base_url = config.base_url(port);
        tokio::select! {
            ready = self.inner.prober.wait_until_ready(
                &base_url,
                config.startup_timeout(),
                config.probe_timeout(),
                probe_token,
            ) => ready.map(|_| port),
            exit = handle.exit_watch().wait() => {
                Err(TetherError::ProcessCrashed(exit.unwrap_or_default()))
            }
        }
    }

    async fn fail_start(&self, generation: u64, err: TetherError) -> StartOutcome {
        let view = {
            let state = self.inner.state.lock();
            if state.generation != generation {
                debug!("Start superseded: {}", err);
                return StartOutcome::Cancelled;
            }
            state.view.clone()
        };

        error!("Failed to start managed server: {}", err);
        self.release_to_idle(Phase::ShuttingDown).await;

        if let Some(view) = view.filter(|v| v.is_view_alive()) {
            view.show_error_view(
                &format!("Failed to start managed server: {}", err),
                err.can_retry(),
            );
        }
        self.emit(LifecycleEvent::status(HostStatus::Error));
        StartOutcome::Failed(err)
    }

    fn ensure_current(&self, generation: u64) -> TetherResult<()> {
        if self.inner.state.lock().generation == generation {
            Ok(())
        } else {
            Err(TetherError::Cancelled("superseded by teardown".into()))
        }
    }

    /// Release everything held by the current run and settle in `Idle`.
    /// Returns whether a process was stopped.
    async fn release_to_idle(&self, during: Phase) -> bool {
        let (released, generation) = {
            let mut state = self.inner.state.lock();
            state.phase = during;
            (state.release(), state.generation)
        };
        let had_process = released.had_process();

        self.finish_release(released).await;

        let mut state = self.inner.state.lock();
        if state.generation == generation && state.phase == during {
            state.phase = Phase::Idle;
        }
        had_process
    }

    async fn finish_release(&self, released: Released) {
        let limit = self.inner.config.teardown_grace() + TERMINATE_SLACK;

        for handle in &released.handles {
            match handle.terminate(limit).await {
                Ok(Some(exit)) => debug!("Managed server {:?} stopped ({})", handle.pid(), exit),
                Ok(None) => debug!("Managed server {:?} reaper gone", handle.pid()),
                Err(e) => warn!("Teardown: {}", e),
            }
        }

        if released.sleep_was_blocked {
            self.inner.inhibitor.prevent_idle_sleep(false);
        }

        let others: Vec<ExitWatch> = {
            let mut state = self.inner.state.lock();
            state.draining.retain(|w| !w.is_settled());
            state.draining.clone()
        };
        if !others.is_empty() {
            let waits = futures::future::join_all(others.into_iter().map(|w| w.wait()));
            if tokio::time::timeout(limit, waits).await.is_err() {
                warn!("Timed out waiting for a concurrent teardown");
            }
            self.inner
                .state
                .lock()
                .draining
                .retain(|w| !w.is_settled());
        }
    }

    fn start_heartbeat(&self, state: &mut RunState) {
        let weak = Arc::downgrade(&self.inner);
        let generation = state.generation;
        state
            .heartbeat
            .start(self.inner.config.health_check_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        Supervisor { inner }.heartbeat_tick(generation).await;
                    }
                }
            });
    }

    async fn heartbeat_tick(&self, generation: u64) {
        let url = {
            let mut state = self.inner.state.lock();
            if state.generation != generation
                || state.phase != Phase::Serving
                || state.paused
                || state.tick_in_flight
            {
                return;
            }
            let Some(port) = state.port else {
                return;
            };
            state.tick_in_flight = true;
            self.inner.config.liveness_url(port)
        };

        let result = probe_once(
            self.inner.probe.as_ref(),
            &url,
            self.inner.config.heartbeat_timeout(),
        )
        .await;

        let (escalation, view, threshold) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }
            state.tick_in_flight = false;
            if state.phase != Phase::Serving {
                return;
            }

            match result {
                Ok(()) => {
                    if state.failures > 0 || state.suspended {
                        debug!("Heartbeat healthy again");
                    }
                    state.failures = 0;
                    state.suspended = false;
                    return;
                }
                Err(failure) => {
                    debug!("Heartbeat probe failed: {}", failure);
                    let now = Instant::now();
                    let threshold = self.inner.policy.threshold(state.suspended);
                    let process_present = state.has_live_process();
                    let escalation = self.inner.policy.on_failure(
                        &mut state.failures,
                        state.suspended,
                        process_present,
                        state.last_reload,
                        now,
                    );
                    if escalation == Escalation::Reload {
                        state.last_reload = Some(now);
                    }
                    (escalation, state.view.clone(), threshold)
                }
            }
        };

        match escalation {
            Escalation::Wait { failures } => {
                debug!("Heartbeat failure {}/{}", failures, threshold);
            }
            Escalation::Restart { failures } => {
                warn!("Managed server gone after {} failed heartbeats", failures);
                let supervisor = self.clone();
                tokio::spawn(async move {
                    supervisor
                        .restart_with(
                            None,
                            RestartReason::HeartbeatFailures { failures },
                            Some(generation),
                        )
                        .await;
                });
            }
            Escalation::Reload => {
                warn!("Managed server unresponsive, reloading view");
                if let Some(view) = view.filter(|v| v.is_view_alive()) {
                    view.reload_view(true);
                }
            }
            Escalation::ReloadSuppressed => {
                info!("Managed server unresponsive, view reloaded recently; waiting");
            }
        }
    }

    fn watch_exit(&self, generation: u64, exit: ExitWatch) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let exit = exit.wait().await.unwrap_or_default();
            if let Some(inner) = weak.upgrade() {
                Supervisor { inner }.on_process_exit(generation, exit).await;
            }
        });
    }

    async fn on_process_exit(&self, generation: u64, exit: ProcessExit) {
        let (view, output) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation || state.phase != Phase::Serving {
                return;
            }
            let Some(handle) = state.active.clone() else {
                return;
            };
            if handle.is_disposed() {
                return;
            }
            if exit.is_success() {
                info!("Managed server exited cleanly; heartbeat will relaunch it");
                state.active = None;
                return;
            }
            state.phase = Phase::Crashed;
            (state.view.clone(), handle.recent_output())
        };

        error!("Managed server crashed ({})", exit);
        self.emit(LifecycleEvent::Crashed { exit });

        if let Some(view) = view.filter(|v| v.is_view_alive()) {
            view.show_crash_view(&crash_message(&exit, &output));
        }

        self.release_to_idle(Phase::Crashed).await;
        self.emit(LifecycleEvent::status(HostStatus::Error));
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!("Lifecycle event: {}", event);
        let _ = self.inner.events.send(event);
    }
}

pub fn crash_message(exit: &ProcessExit, output: &[String]) -> String {
    let mut message = format!("Managed server crashed ({})", exit);
    if !output.is_empty() {
        message.push_str("\n\nRecent output:\n");
        message.push_str(&output.join("\n"));
    }
    message
}
