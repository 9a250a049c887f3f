use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_types::{TetherError, TetherResult, DEFAULT_LIVENESS_PATH, LOOPBACK_HOST};
use tracing::{info, warn};

use super::logging::LoggingConfig;
use super::runtime::RuntimeConfig;
use super::types::{LogLevel, RuntimeKind};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub app_dir: PathBuf,
    pub bind_host: String,
    pub liveness_path: String,
    pub health_check_interval_secs: u64,
    pub startup_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub failure_threshold: u32,
    pub suspended_failure_threshold: u32,
    pub reload_cooldown_secs: u64,
    pub resume_settle_ms: u64,
    pub teardown_grace_ms: u64,
    pub probe_backoff_step_ms: u64,
    pub probe_backoff_max_ms: u64,
    pub prevent_idle_sleep: bool,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            app_dir: super::default_asset_dir().join("shiny"),
            bind_host: LOOPBACK_HOST.to_string(),
            liveness_path: DEFAULT_LIVENESS_PATH.to_string(),
            health_check_interval_secs: 10,
            startup_timeout_secs: 30,
            probe_timeout_ms: 1_500,
            heartbeat_timeout_ms: 2_000,
            failure_threshold: 3,
            suspended_failure_threshold: 1,
            reload_cooldown_secs: 30,
            resume_settle_ms: 3_000,
            teardown_grace_ms: 5_000,
            probe_backoff_step_ms: 250,
            probe_backoff_max_ms: 1_500,
            prevent_idle_sleep: true,
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn load(path: impl AsRef<Path>) -> TetherResult<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| TetherError::Config(format!("Failed to read config: {}", e)))?;

            toml::from_str(&contents)
                .map_err(|e| TetherError::Config(format!("Failed to parse config: {}", e)))?
        } else {
            info!("Config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TetherResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| TetherError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| TetherError::Config(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path.as_ref(), contents)
            .map_err(|e| TetherError::Config(format!("Failed to write config: {}", e)))?;

        info!("Configuration saved to {:?}", path.as_ref());
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("TETHER_APP_DIR") {
            self.app_dir = PathBuf::from(dir);
        }

        if let Ok(home) = std::env::var("TETHER_R_HOME") {
            self.runtime.r_home = PathBuf::from(home);
        }

        if let Ok(secs) = std::env::var("TETHER_HEALTH_INTERVAL_SECS") {
            if let Ok(s) = secs.parse() {
                self.health_check_interval_secs = s;
            }
        }

        if let Ok(secs) = std::env::var("TETHER_STARTUP_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse() {
                self.startup_timeout_secs = s;
            }
        }

        if let Ok(level) = std::env::var("TETHER_LOG_LEVEL") {
            self.logging.level = LogLevel::parse_lossy(&level);
        }

        if std::env::var("TETHER_LOG_JSON").is_ok() {
            self.logging.json = true;
        }
    }

    pub fn validate(&self) -> TetherResult<()> {
        let host: IpAddr = self
            .bind_host
            .parse()
            .map_err(|_| TetherError::Config(format!("Invalid bind host: {}", self.bind_host)))?;
        if !host.is_loopback() {
            return Err(TetherError::Config(format!(
                "Managed server must bind to loopback, got {}",
                self.bind_host
            )));
        }

        if !self.liveness_path.starts_with('/') {
            return Err(TetherError::Config(
                "Liveness path must start with '/'".into(),
            ));
        }

        let durations = [
            ("health_check_interval_secs", self.health_check_interval_secs),
            ("startup_timeout_secs", self.startup_timeout_secs),
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("reload_cooldown_secs", self.reload_cooldown_secs),
            ("resume_settle_ms", self.resume_settle_ms),
            ("teardown_grace_ms", self.teardown_grace_ms),
            ("probe_backoff_step_ms", self.probe_backoff_step_ms),
            ("probe_backoff_max_ms", self.probe_backoff_max_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(TetherError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if self.failure_threshold == 0 || self.suspended_failure_threshold == 0 {
            return Err(TetherError::Config(
                "Failure thresholds must be at least 1".into(),
            ));
        }

        if self.suspended_failure_threshold > self.failure_threshold {
            return Err(TetherError::Config(format!(
                "suspended_failure_threshold ({}) cannot exceed failure_threshold ({})",
                self.suspended_failure_threshold, self.failure_threshold
            )));
        }

        if self.probe_backoff_step_ms > self.probe_backoff_max_ms {
            return Err(TetherError::Config(
                "probe_backoff_step_ms cannot exceed probe_backoff_max_ms".into(),
            ));
        }

        if self.heartbeat_timeout_ms >= self.health_check_interval_secs * 1000 {
            warn!(
                "Heartbeat timeout ({}ms) is not shorter than the check interval ({}s); ticks will be skipped",
                self.heartbeat_timeout_ms, self.health_check_interval_secs
            );
        }

        if self.runtime.kind == RuntimeKind::Command && self.runtime.executable.is_none() {
            return Err(TetherError::Config(
                "Runtime kind 'command' requires runtime.executable".into(),
            ));
        }

        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reload_cooldown(&self) -> Duration {
        Duration::from_secs(self.reload_cooldown_secs)
    }

    pub fn resume_settle_delay(&self) -> Duration {
        Duration::from_millis(self.resume_settle_ms)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    pub fn probe_backoff_step(&self) -> Duration {
        Duration::from_millis(self.probe_backoff_step_ms)
    }

    pub fn probe_backoff_max(&self) -> Duration {
        Duration::from_millis(self.probe_backoff_max_ms)
    }

    pub fn base_url(&self, port: u16) -> String {
        format!("http://{}:{}", self.bind_host, port)
    }

    pub fn liveness_url(&self, port: u16) -> String {
        format!("{}{}", self.base_url(port), self.liveness_path)
    }

    pub fn summary(&self) -> String {
        format!(
            "app={} runtime={} interval={}s startup={}s thresholds={}/{}",
            self.app_dir.display(),
            self.runtime.kind,
            self.health_check_interval_secs,
            self.startup_timeout_secs,
            self.failure_threshold,
            self.suspended_failure_threshold
        )
    }
}
