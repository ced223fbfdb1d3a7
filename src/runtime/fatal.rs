use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Conditions that stop the controller from ever entering its worker loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartupError {
    #[error("{controller}: cancelled before the cache finished its initial sync")]
    CacheSyncCancelled { controller: String },
    #[error("{controller}: watch feed task panicked: {reason}")]
    InformerPanicked { controller: String, reason: String },
    #[error("{controller}: runner has already been started")]
    AlreadyStarted { controller: String },
}

/// Records the first fatal startup error and tears the run down.
#[derive(Clone)]
pub struct FatalErrorHandler {
    inner: Arc<FatalInner>,
}

struct FatalInner {
    triggered: AtomicBool,
    root_shutdown: CancellationToken,
    captured_error: Mutex<Option<StartupError>>,
}

impl FatalErrorHandler {
    pub fn new(root_shutdown: CancellationToken) -> Self {
        Self {
            inner: Arc::new(FatalInner {
                triggered: AtomicBool::new(false),
                root_shutdown,
                captured_error: Mutex::new(None),
            }),
        }
    }

    /// Logs and keeps `error` if it is the first one, then cancels the root token. Returns the
    /// error that was kept.
    pub fn trigger(&self, error: StartupError) -> StartupError {
        let mut captured = self.inner.captured_error.lock();
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %error, "fatal error already latched; ignoring");
            return captured.clone().unwrap_or(error);
        }

        tracing::error!(error = %error, "fatal startup error; initiating shutdown");
        *captured = Some(error.clone());
        drop(captured);
        self.inner.root_shutdown.cancel();
        error
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<StartupError> {
        self.inner.captured_error.lock().clone()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
