//! Fakes for the supervisor's seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::{ProcessExit, TetherError, TetherResult, DEFAULT_LIVENESS_PATH};
use tokio::sync::oneshot;

use crate::host::{SleepInhibitor, ViewHost};
use crate::launcher::{process_channel, ProcessHandle, ProcessLauncher, RuntimeResolver, ServerRuntime};
use crate::probe::{HttpProbe, ProbeFailure};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ok,
    Fail,
    Hang,
}

pub struct ScriptedProbe {
    script: Mutex<VecDeque<ProbeOutcome>>,
    fallback: Mutex<ProbeOutcome>,
    liveness: Mutex<Option<ProbeOutcome>>,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn always(outcome: ProbeOutcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(outcome),
            liveness: Mutex::new(None),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, outcomes: impl IntoIterator<Item = ProbeOutcome>) {
        self.script.lock().extend(outcomes);
    }

    pub fn set_fallback(&self, outcome: ProbeOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Answer liveness-path probes with `outcome`, leaving startup probes scripted.
    pub fn set_liveness(&self, outcome: ProbeOutcome) {
        *self.liveness.lock() = Some(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, suffix: &str) -> usize {
        self.urls.lock().iter().filter(|u| u.ends_with(suffix)).count()
    }
}

#[async_trait]
impl HttpProbe for ScriptedProbe {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<(), ProbeFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        let liveness = *self.liveness.lock();
        let outcome = match liveness {
            Some(outcome) if url.ends_with(DEFAULT_LIVENESS_PATH) => outcome,
            _ => self
                .script
                .lock()
                .pop_front()
                .unwrap_or(*self.fallback.lock()),
        };
        match outcome {
            ProbeOutcome::Ok => Ok(()),
            ProbeOutcome::Fail => Err(ProbeFailure::Status(503)),
            ProbeOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Launches pretend processes that exit on request or when told to crash.
#[derive(Default)]
pub struct FakeLauncher {
    launches: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    crash_senders: Mutex<Vec<oneshot::Sender<ProcessExit>>>,
    fail_next: Mutex<Option<TetherError>>,
    ports: Mutex<Vec<u16>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().clone()
    }

    pub fn fail_next_launch(&self, error: TetherError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Make the most recently launched process exit on its own.
    pub fn exit_latest(&self, exit: ProcessExit) {
        if let Some(sender) = self.crash_senders.lock().pop() {
            let _ = sender.send(exit);
        }
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn launch(
        &self,
        _runtime: &ServerRuntime,
        _host: &str,
        port: u16,
    ) -> TetherResult<ProcessHandle> {
        if let Some(error) = self.fail_next.lock().take() {
            return Err(error);
        }

        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.ports.lock().push(port);
        let live_now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live_now, Ordering::SeqCst);

        let (handle, mut control) = process_channel(Some(n as u32));
        let (crash_tx, crash_rx) = oneshot::channel();
        self.crash_senders.lock().push(crash_tx);

        let live = self.live.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                _ = control.stop_requested() => ProcessExit::with_signal(15),
                Ok(exit) = crash_rx => exit,
            };
            control.output().push(format!("fake server {} exiting", n));
            live.fetch_sub(1, Ordering::SeqCst);
            control.report_exit(exit);
        });

        Ok(handle)
    }
}

pub struct StaticRuntime;

impl RuntimeResolver for StaticRuntime {
    fn resolve(&self) -> TetherResult<ServerRuntime> {
        Ok(ServerRuntime {
            executable: PathBuf::from("fake-server"),
            args: vec!["--port".into(), "{port}".into()],
            application_directory: PathBuf::from("/srv/app"),
            env: Default::default(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewCall {
    Loading,
    Error(String, bool),
    Crash(String),
    Load(String),
    Reload(bool),
}

pub struct RecordingView {
    calls: Mutex<Vec<ViewCall>>,
    alive: AtomicBool,
}

impl RecordingView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
        })
    }

    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ViewCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn reloads(&self) -> usize {
        self.count(|c| matches!(c, ViewCall::Reload(_)))
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }
}

impl ViewHost for RecordingView {
    fn show_loading_view(&self) {
        self.calls.lock().push(ViewCall::Loading);
    }

    fn show_error_view(&self, message: &str, can_retry: bool) {
        self.calls
            .lock()
            .push(ViewCall::Error(message.to_string(), can_retry));
    }

    fn show_crash_view(&self, message: &str) {
        self.calls.lock().push(ViewCall::Crash(message.to_string()));
    }

    fn load_view(&self, url: &str) {
        self.calls.lock().push(ViewCall::Load(url.to_string()));
    }

    fn reload_view(&self, ignore_cache: bool) {
        self.calls.lock().push(ViewCall::Reload(ignore_cache));
    }

    fn is_view_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingInhibitor {
    pub requests: Mutex<Vec<bool>>,
}

impl SleepInhibitor for RecordingInhibitor {
    fn prevent_idle_sleep(&self, on: bool) {
        self.requests.lock().push(on);
    }
}
