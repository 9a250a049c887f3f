use std::net::{Ipv4Addr, SocketAddr};
use tether_types::{TetherError, TetherResult};
use tokio::net::TcpListener;
use tracing::debug;

/// Ask the OS for a free loopback port.
///
/// The probe listener is closed before returning, so nothing stays reserved;
/// the managed server binds the port itself moments later.
pub async fn allocate() -> TetherResult<u16> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .map_err(|e| TetherError::PortUnavailable(format!("Failed to bind loopback: {}", e)))?;

    let addr = listener
        .local_addr()
        .map_err(|e| TetherError::PortUnavailable(format!("No local address: {}", e)))?;
    drop(listener);

    if addr.port() == 0 {
        return Err(TetherError::PortUnavailable(
            "OS returned port 0 for an ephemeral bind".into(),
        ));
    }

    debug!("Allocated local port {}", addr.port());
    Ok(addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allocate_returns_nonzero_port() {
        let port = allocate().await.unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_successive_allocations_are_bindable() {
        let first = allocate().await.unwrap();
        let second = allocate().await.unwrap();

        let a = TcpListener::bind(("127.0.0.1", first)).await;
        assert!(a.is_ok(), "first port {} should be bindable", first);
        drop(a);

        let b = TcpListener::bind(("127.0.0.1", second)).await;
        assert!(b.is_ok(), "second port {} should be bindable", second);
    }
}
