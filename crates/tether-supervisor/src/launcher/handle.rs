use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::{ProcessExit, TetherError, TetherResult};
use tokio::sync::watch;

use crate::supervisor::{CancelHandle, CancellationToken};

pub const OUTPUT_TAIL_LINES: usize = 20;

/// Last few lines the managed server printed, kept for crash reports.
#[derive(Clone, Debug, Default)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl OutputTail {
    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lines.lock();
        if lines.len() == OUTPUT_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}

/// Supervisor-side handle to one launched process.
///
/// Whoever reaps the child holds the matching [`ProcessControl`]. Disposal is
/// one-shot: the first [`ProcessHandle::terminate`] requests the stop, later
/// calls only report what is already known.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    stop: CancelHandle,
    exit: watch::Receiver<Option<ProcessExit>>,
    disposed: AtomicBool,
    output: OutputTail,
}

/// Reaper-side counterpart of a [`ProcessHandle`].
#[derive(Debug)]
pub struct ProcessControl {
    stop: CancellationToken,
    exit: watch::Sender<Option<ProcessExit>>,
    output: OutputTail,
}

/// Awaitable view of a process's exit that does not borrow the handle.
#[derive(Clone, Debug)]
pub struct ExitWatch {
    receiver: watch::Receiver<Option<ProcessExit>>,
}

pub fn process_channel(pid: Option<u32>) -> (ProcessHandle, ProcessControl) {
    let (stop_handle, stop_token) = CancellationToken::new();
    let (exit_tx, exit_rx) = watch::channel(None);
    let output = OutputTail::default();

    let handle = ProcessHandle {
        pid,
        stop: stop_handle,
        exit: exit_rx,
        disposed: AtomicBool::new(false),
        output: output.clone(),
    };
    let control = ProcessControl {
        stop: stop_token,
        exit: exit_tx,
        output,
    };
    (handle, control)
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn exit_watch(&self) -> ExitWatch {
        ExitWatch {
            receiver: self.exit.clone(),
        }
    }

    pub fn recent_output(&self) -> Vec<String> {
        self.output.snapshot()
    }

    pub async fn terminate(&self, timeout: Duration) -> TetherResult<Option<ProcessExit>> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(self.exit_status());
        }

        self.stop.cancel();

        match tokio::time::timeout(timeout, self.exit_watch().wait()).await {
            Ok(exit) => Ok(exit),
            Err(_) => Err(TetherError::Teardown(format!(
                "process {} did not exit within {:?}",
                self.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".into()),
                timeout
            ))),
        }
    }
}

impl ProcessControl {
    pub async fn stop_requested(&mut self) {
        self.stop.cancelled().await
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn report_exit(&self, exit: ProcessExit) {
        self.exit.send_replace(Some(exit));
    }

    pub fn output(&self) -> OutputTail {
        self.output.clone()
    }
}

impl ExitWatch {
    /// True once the exit is known or can never be.
    pub fn is_settled(&self) -> bool {
        self.receiver.borrow().is_some() || self.receiver.has_changed().is_err()
    }

    /// Resolves with the exit, or `None` if the reaper vanished without one.
    pub async fn wait(mut self) -> Option<ProcessExit> {
        loop {
            if let Some(exit) = *self.receiver.borrow() {
                return Some(exit);
            }
            if self.receiver.changed().await.is_err() {
                return *self.receiver.borrow();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminate_waits_for_reported_exit() {
        let (handle, mut control) = process_channel(Some(42));

        let reaper = tokio::spawn(async move {
            control.stop_requested().await;
            control.report_exit(ProcessExit::with_signal(15));
        });

        let exit = handle.terminate(Duration::from_secs(1)).await.unwrap();
        assert_eq!(exit, Some(ProcessExit::with_signal(15)));
        assert!(handle.has_exited());
        reaper.await.unwrap();
    }

    #[tokio::test]
    async fn test_double_terminate_is_noop() {
        let (handle, mut control) = process_channel(None);
        tokio::spawn(async move {
            control.stop_requested().await;
            control.report_exit(ProcessExit::with_code(0));
        });

        handle.terminate(Duration::from_secs(1)).await.unwrap();
        let again = handle.terminate(Duration::from_millis(1)).await.unwrap();
        assert_eq!(again, Some(ProcessExit::with_code(0)));
        assert!(handle.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_is_bounded_when_reaper_hangs() {
        let (handle, _control) = process_channel(Some(7));
        let err = handle.terminate(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, TetherError::Teardown(_)));
    }

    #[tokio::test]
    async fn test_exit_watch_sees_unprompted_exit() {
        let (handle, control) = process_channel(Some(1));
        let watch = handle.exit_watch();
        control.report_exit(ProcessExit::with_code(3));
        assert_eq!(watch.wait().await, Some(ProcessExit::with_code(3)));
    }

    #[tokio::test]
    async fn test_dropped_handle_requests_stop() {
        let (handle, control) = process_channel(None);
        drop(handle);
        assert!(control.is_stop_requested());
    }

    #[test]
    fn test_output_tail_keeps_last_lines() {
        let tail = OutputTail::default();
        for i in 0..(OUTPUT_TAIL_LINES + 5) {
            tail.push(format!("line {}", i));
        }
        let lines = tail.snapshot();
        assert_eq!(lines.len(), OUTPUT_TAIL_LINES);
        assert_eq!(lines[0], "line 5");
    }
}
