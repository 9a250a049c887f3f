use std::sync::Arc;
use std::time::Duration;
use tether_types::{TetherError, TetherResult};
use tokio::time::Instant;
use tracing::{debug, info};

use super::backoff::LinearBackoff;
use super::http::{probe_once, HttpProbe};
use crate::config::SupervisorConfig;
use crate::supervisor::CancellationToken;

/// Polls the managed server until it answers 2xx or the deadline passes.
#[derive(Clone)]
pub struct StartupProber {
    probe: Arc<dyn HttpProbe>,
    backoff_step: Duration,
    backoff_max: Duration,
}

impl StartupProber {
    pub fn new(probe: Arc<dyn HttpProbe>, backoff_step: Duration, backoff_max: Duration) -> Self {
        Self {
            probe,
            backoff_step,
            backoff_max,
        }
    }

    pub fn from_config(probe: Arc<dyn HttpProbe>, config: &SupervisorConfig) -> Self {
        Self::new(probe, config.probe_backoff_step(), config.probe_backoff_max())
    }

    /// Returns the number of attempts it took. Individual probe failures never end
    /// the wait; only the deadline or `cancel` does.
    pub async fn wait_until_ready(
        &self,
        url: &str,
        deadline: Duration,
        per_probe_timeout: Duration,
        mut cancel: CancellationToken,
    ) -> TetherResult<u32> {
        let started = Instant::now();
        let mut backoff = LinearBackoff::new(self.backoff_step, self.backoff_max);

        let poll = async {
            loop {
                if cancel.is_cancelled() {
                    return Err(TetherError::Cancelled("startup probe cancelled".into()));
                }

                let delay = backoff.next_delay();
                match probe_once(self.probe.as_ref(), url, per_probe_timeout).await {
                    Ok(()) => return Ok(backoff.attempts()),
                    Err(failure) => {
                        debug!("Startup probe {} failed: {}", backoff.attempts(), failure)
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(TetherError::Cancelled("startup probe cancelled".into()));
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, poll).await {
            Ok(Ok(attempts)) => {
                info!(
                    "Managed server ready after {} probe(s) in {:?}",
                    attempts,
                    started.elapsed()
                );
                Ok(attempts)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TetherError::StartupTimeout(deadline)),
        }
    }
}
