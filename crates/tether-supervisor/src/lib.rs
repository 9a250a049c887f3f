#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod heartbeat;
pub mod host;
pub mod launcher;
pub mod lifecycle;
pub mod port;
pub mod power;
pub mod probe;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{
    default_asset_dir, default_config_path, LogLevel, LoggingConfig, RuntimeConfig, RuntimeKind,
    SupervisorConfig,
};
pub use heartbeat::{Escalation, HealthPolicy, HeartbeatTimer};
pub use host::{inhibitor_for, NoopInhibitor, SleepInhibitor, SystemdInhibitor, ViewHost};
pub use launcher::{
    resolver_from_config, CommandLauncher, CommandRuntime, ProcessHandle, ProcessLauncher,
    RuntimeResolver, ServerRuntime, ShinyRuntime,
};
pub use lifecycle::{Lifecycle, LifecyclePhase};
pub use power::{power_channel, PowerEvent, PowerObserver};
pub use probe::{HttpProbe, ProbeFailure, ReqwestProbe, StartupProber};
pub use supervisor::{CancellationToken, Phase, StartOutcome, Supervisor, SupervisorBuilder};
