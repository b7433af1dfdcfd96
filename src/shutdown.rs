//! Cooperative stop requests for running jobs.
//!
//! A [`ShutdownCoordinator`] is polled by the orchestrator between windows, so
//! a stop never leaves a half-collected window checkpointed. The first request
//! wins and its reason is kept for the job's cancellation message.

use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

static GLOBAL_SHUTDOWN: OnceCell<SharedShutdown> = OnceCell::new();

/// Register the process-wide handle picked up by new orchestrators.
pub fn set_global_shutdown(handle: SharedShutdown) {
    let _ = GLOBAL_SHUTDOWN.set(handle);
}

/// Process-wide handle, if one was registered.
pub fn get_global_shutdown() -> Option<SharedShutdown> {
    GLOBAL_SHUTDOWN.get().cloned()
}

/// Stop flag plus the reason of the first request
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl ShutdownCoordinator {
    /// Coordinator with no stop requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// New coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Ask running jobs to stop at their next window boundary.
    pub fn request_shutdown(&self) {
        self.request_shutdown_because("stop requested");
    }

    /// Like [`request_shutdown`](Self::request_shutdown), recording `reason`.
    /// Later requests keep the first reason.
    pub fn request_shutdown_because(&self, reason: impl Into<String>) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            if let Ok(mut slot) = self.reason.lock() {
                *slot = Some(reason.into());
            }
        }
    }

    /// Whether a stop was requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Reason given with the first request.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().ok().and_then(|slot| slot.clone())
    }

    /// Request a stop when the process receives Ctrl+C.
    pub fn listen_for_ctrl_c(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received, stopping after the current window");
                coordinator.request_shutdown_because("interrupted (Ctrl+C)");
            }
        })
    }
}
