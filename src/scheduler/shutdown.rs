use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::SchedulerError;

/// Completion handle returned by a graceful-shutdown request.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: Receiver<bool>,
}

/// The scheduler side of a [`ShutdownSignal`].
#[derive(Debug)]
pub struct ShutdownNotifier {
    tx: Sender<bool>,
}

impl ShutdownSignal {
    /// A connected signal/notifier pair.
    #[must_use]
    pub fn channel() -> (Self, ShutdownNotifier) {
        let (tx, rx) = bounded::<bool>(1);
        (Self { rx }, ShutdownNotifier { tx })
    }

    /// A signal that has already completed with `clean`.
    #[must_use]
    pub fn completed(clean: bool) -> Self {
        let (signal, notifier) = Self::channel();
        notifier.complete(clean);
        signal
    }

    /// Wait up to `timeout` for completion.
    ///
    /// Returns whether every shard shut down cleanly.
    ///
    /// # Errors
    ///
    /// `SchedulerError::ShutdownTimeout` when the bound elapses,
    /// `SchedulerError::ShutdownAbandoned` when the notifier is dropped first.
    pub fn wait(&self, timeout: Duration) -> Result<bool, SchedulerError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => SchedulerError::ShutdownTimeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
            RecvTimeoutError::Disconnected => SchedulerError::ShutdownAbandoned,
        })
    }
}

impl ShutdownNotifier {
    /// Report completion. Never blocks.
    pub fn complete(self, clean: bool) {
        let _ = self.tx.try_send(clean);
    }
}
