use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tether_types::{TetherError, TetherResult};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("HTTP status {0}")]
    Status(u16),

    #[error("probe timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// One HTTP GET; any 2xx counts as healthy.
#[async_trait]
pub trait HttpProbe: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<(), ProbeFailure>;
}

/// Run a single probe, bounded by `timeout` even if the probe ignores it.
pub async fn probe_once(
    probe: &dyn HttpProbe,
    url: &str,
    timeout: Duration,
) -> Result<(), ProbeFailure> {
    match tokio::time::timeout(timeout, probe.get(url, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeFailure::Timeout),
    }
}

#[derive(Clone, Debug)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> TetherResult<Self> {
        // The managed server is always on loopback; system proxies must not intercept it.
        let client = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| TetherError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str, timeout: Duration) -> Result<(), ProbeFailure> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProbeFailure::Timeout
                } else {
                    ProbeFailure::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        debug!("GET {} -> {}", url, status);
        if status.is_success() {
            Ok(())
        } else {
            Err(ProbeFailure::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_status(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok",
                    status_line
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_success_status() {
        let port = serve_status("200 OK").await;
        let probe = ReqwestProbe::new().unwrap();
        let url = format!("http://127.0.0.1:{}/shared/shiny.min.js", port);
        assert_eq!(probe.get(&url, Duration::from_secs(2)).await, Ok(()));
    }

    #[tokio::test]
    async fn test_error_status() {
        let port = serve_status("503 Service Unavailable").await;
        let probe = ReqwestProbe::new().unwrap();
        let url = format!("http://127.0.0.1:{}", port);
        assert_eq!(
            probe.get(&url, Duration::from_secs(2)).await,
            Err(ProbeFailure::Status(503))
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let port = crate::port::allocate().await.unwrap();
        let probe = ReqwestProbe::new().unwrap();
        let url = format!("http://127.0.0.1:{}", port);
        let result = probe.get(&url, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ProbeFailure::Transport(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let probe = ReqwestProbe::new().unwrap();
        let url = format!("http://127.0.0.1:{}", port);
        let result = probe_once(&probe, &url, Duration::from_millis(200)).await;
        assert_eq!(result, Err(ProbeFailure::Timeout));
    }
}
