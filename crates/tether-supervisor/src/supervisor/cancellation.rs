use tokio::sync::watch;

/// Receiving side of a one-shot cancellation signal.
///
/// Dropping the matching [`CancelHandle`] counts as cancellation, so a task
/// whose owner disappears winds down instead of running orphaned.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    receiver: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancellationToken {
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { sender: tx }, Self { receiver: rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    pub async fn cancelled(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
    }
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let (handle, mut token) = CancellationToken::new();
        assert!(!token.is_cancelled());

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });

        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_cancels() {
        let (handle, mut token) = CancellationToken::new();
        drop(handle);
        assert!(token.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("dropped handle should release waiters");
    }

    #[tokio::test]
    async fn test_tokens_are_independent() {
        let (probe_handle, probe_token) = CancellationToken::new();
        let (_process_handle, process_token) = CancellationToken::new();

        probe_handle.cancel();
        assert!(probe_token.is_cancelled());
        assert!(!process_token.is_cancelled());
    }
}
