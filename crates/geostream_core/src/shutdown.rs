//! Shutdown coordination for partition workers.
//!
//! Shared shutdown state lets the driver stop every worker once input is
//! exhausted or a termination signal arrives. Workers finish the message in
//! hand, stop taking new ones and report their statistics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// Shared shutdown state for coordinating graceful shutdown across workers.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    /// Set once shutdown begins - no new messages are processed
    shutdown_initiated: Arc<AtomicBool>,
    /// Set once every worker has stopped
    shutdown_complete: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_complete: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Acquire)
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete.load(Ordering::Acquire)
    }

    /// Initiates shutdown and wakes every waiting worker.
    pub fn initiate_shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::AcqRel) {
            info!("🛑 Shutdown initiated - partitions stop taking new messages");
        }
        self.wake.notify_waiters();
    }

    pub fn complete_shutdown(&self) {
        self.shutdown_complete.store(true, Ordering::Release);
        info!("✅ All partitions stopped");
    }

    /// Resolves once shutdown has been initiated.
    pub async fn initiated(&self) {
        let notified = self.wake.notified();
        if self.is_shutdown_initiated() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_wake_on_initiation() {
        let state = ShutdownState::new();
        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.initiated().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!state.is_shutdown_initiated());

        state.initiate_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(!state.is_shutdown_complete());
        state.complete_shutdown();
        assert!(state.is_shutdown_complete());
    }

    #[tokio::test]
    async fn late_waiters_return_immediately() {
        let state = ShutdownState::new();
        state.initiate_shutdown();
        tokio::time::timeout(Duration::from_millis(100), state.initiated())
            .await
            .expect("already initiated");
    }
}
