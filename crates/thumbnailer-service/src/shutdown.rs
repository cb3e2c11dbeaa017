//! One-shot propagation of fatal errors to the enclosing server.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    reason: OnceLock<String>,
    token: CancellationToken,
}

/// Collects fatal errors from all in-flight requests and signals shutdown exactly once.
///
/// The coordinator never stops the process on its own. The server holds a
/// [`ShutdownSignal`] and decides how to drain.
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports an error that leaves the service unable to operate.
    ///
    /// Only the first report notifies the [`ShutdownSignal`] and returns `true`. Every later
    /// report, concurrent or not, is only logged.
    pub fn report_fatal(&self, error: &(dyn Error + 'static)) -> bool {
        if self.inner.triggered.swap(true, Ordering::AcqRel) {
            tracing::debug!(error, "Fatal error reported while already shutting down");
            return false;
        }

        self.inner.reason.get_or_init(|| error.to_string());
        metric!(counter("shutdown.triggered") += 1);
        tracing::error!(error, "Fatal error, shutting down");
        self.inner.token.cancel();
        true
    }

    /// Whether a fatal error has been reported.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// The message of the first fatal error, if any.
    pub fn reason(&self) -> Option<&str> {
        self.inner.reason.get().map(String::as_str)
    }

    /// Returns a handle that resolves once shutdown has been triggered.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            token: self.inner.token.clone(),
        }
    }
}

/// The listening side of a [`ShutdownCoordinator`].
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Waits until a fatal error was reported.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}
