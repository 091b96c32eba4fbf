//! Graceful shutdown / cancellation coordination.
//!
//! This is the single cancellation primitive threaded through the whole
//! crate: wave execution, health-monitor interval ticks, rollback retry
//! waits and the notification dispatcher's drain loop all hold a clone of
//! [`ShutdownSignal`] and check it at their await points (§5: "every
//! long-running operation accepts an external cancellation token").

use tokio::sync::watch;
use tracing::info;

/// Shutdown signal receiver. Cheap to clone; many components hold one.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is signaled.
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow() {
            if self.receiver.changed().await.is_err() {
                break;
            }
        }
    }

    /// Non-blocking check.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for triggering shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
        info!("shutdown signal sent");
    }
}

/// Create a new shutdown signal pair: (controller, signal).
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(false);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT.
#[cfg(unix)]
pub async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to register SIGTERM handler");
            panic!("cannot register SIGTERM handler: {}", e);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to register SIGINT handler");
            panic!("cannot register SIGINT handler: {}", e);
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM");
            "SIGTERM"
        }
        _ = sigint.recv() => {
            info!("received SIGINT");
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> &'static str {
    use tracing::error;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to wait for Ctrl+C");
        panic!("cannot wait for Ctrl+C: {}", e);
    }
    info!("received Ctrl+C");
    "CTRL_C"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_not_shutdown_until_triggered() {
        let (controller, mut signal) = shutdown_channel();
        assert!(!signal.is_shutdown());

        let waiter = tokio::spawn(async move {
            signal.wait().await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.shutdown();
        waiter.await.expect("waiter task");
    }

    #[test]
    fn is_shutdown_reflects_state() {
        let (controller, signal) = shutdown_channel();
        assert!(!signal.is_shutdown());
        controller.shutdown();
        assert!(signal.is_shutdown());
    }
}
