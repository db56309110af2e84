//! Graceful shutdown.
//!
//! Open ADS streams register as operations. Shutdown tells every stream task
//! to stop, then waits up to a grace period for their registrations to be
//! dropped.
//!
//! ```rust,ignore
//! let controller = ShutdownController::new();
//! let signal = controller.shutdown_signal();
//!
//! // later
//! controller.shutdown(Duration::from_secs(30)).await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

/// Coordinates shutdown of stream tasks.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug)]
struct ShutdownInner {
    initiated: AtomicBool,
    signal: watch::Sender<bool>,
    active: watch::Sender<usize>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    /// Create a controller.
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        let (active, _) = watch::channel(0);
        Self {
            inner: Arc::new(ShutdownInner {
                initiated: AtomicBool::new(false),
                signal,
                active,
            }),
        }
    }

    /// Whether shutdown has started.
    pub fn is_shutdown(&self) -> bool {
        self.inner.initiated.load(Ordering::SeqCst)
    }

    /// A future-like handle that resolves once shutdown starts.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.inner.signal.subscribe(),
        }
    }

    /// Start shutdown and wait for registered operations.
    ///
    /// Returns `false` if the grace period ran out first. Calling it again
    /// returns `true` immediately.
    pub async fn shutdown(&self, grace_period: Duration) -> bool {
        if self
            .inner
            .initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return true;
        }

        info!(?grace_period, active = self.active_operations(), "shutting down");
        self.inner.signal.send_replace(true);

        let mut active = self.inner.active.subscribe();
        let result = timeout(grace_period, active.wait_for(|n| *n == 0))
            .await
            .map(|_| ());
        match result {
            Ok(_) => {
                info!("graceful shutdown completed");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.active_operations(),
                    "grace period elapsed with streams still open"
                );
                false
            }
        }
    }

    /// Register an operation; it counts until the guard is dropped.
    pub fn register_operation(&self) -> OperationGuard {
        self.inner.active.send_modify(|n| *n += 1);
        OperationGuard {
            controller: self.clone(),
        }
    }

    /// Operations currently registered.
    pub fn active_operations(&self) -> usize {
        *self.inner.active.borrow()
    }
}

/// Counts as an active operation while alive.
#[derive(Debug)]
pub struct OperationGuard {
    controller: ShutdownController,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.controller
            .inner
            .active
            .send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Resolves when shutdown starts.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for shutdown.
    pub async fn wait(mut self) {
        // a closed channel means the controller is gone
        let _ = self.rx.wait_for(|initiated| *initiated).await;
    }

    /// Whether shutdown has started.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("received Ctrl+C");
    }

    Ok(())
}
