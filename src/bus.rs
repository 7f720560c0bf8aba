//! Observer registry and fan-out.
//!
//! The bus delivers every record to every registered observer, in
//! registration order, on the calling (scheduler) thread. Each observer is
//! isolated: an error or a panic is logged and the next observer still runs.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::{HostError, ListenerError};
use crate::security::run_as_system;

/// Receives raw records from every configured stream.
pub trait Observer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handle one record.
    ///
    /// # Errors
    ///
    /// Any error is logged by the bus and otherwise ignored.
    fn on_receive(&self, stream_name: &str, payload: &[u8]) -> Result<(), ListenerError>;
}

/// Handle returned by [`StreamEventBus::register_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub Uuid);

impl ObserverId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fan-out hub between record processors and observers.
#[derive(Default)]
pub struct StreamEventBus {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    ready: AtomicBool,
}

impl fmt::Debug for StreamEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamEventBus")
            .field("observers", &self.observers.read().len())
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl StreamEventBus {
    /// An empty bus. The host is considered unavailable until
    /// [`mark_ready`](Self::mark_ready).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer at the end of the delivery order.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId::new();
        debug!(observer = observer.name(), %id, "observer registered");
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        before != observers.len()
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// The host finished starting.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// The host is stopping.
    pub fn mark_stopped(&self) {
        self.ready.store(false, Ordering::Release);
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Snapshot of the observers, in delivery order.
    ///
    /// # Errors
    ///
    /// `HostError::RuntimeNotAvailable` before `mark_ready` or after
    /// `mark_stopped`.
    pub fn all_registered_listeners(&self) -> Result<Vec<Arc<dyn Observer>>, HostError> {
        if !self.is_ready() {
            return Err(HostError::RuntimeNotAvailable);
        }
        Ok(self.observers.read().iter().map(|(_, o)| Arc::clone(o)).collect())
    }

    /// Deliver one record to every observer as the system identity.
    ///
    /// Never fails; problems are logged.
    pub fn fire(&self, stream_name: &str, payload: &[u8]) {
        let observers = match self.all_registered_listeners() {
            Ok(observers) => observers,
            Err(e) => {
                warn!(stream = stream_name, error = %e, "dropping record");
                return;
            }
        };

        run_as_system(|| {
            for observer in &observers {
                let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_receive(stream_name, payload)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!(stream = stream_name, observer = observer.name(), error = %e, "observer failed");
                    }
                    Err(panic) => {
                        let e = ListenerError::Panicked {
                            observer: observer.name().to_string(),
                            message: panic_message(&*panic),
                        };
                        error!(stream = stream_name, observer = observer.name(), error = %e, "observer panicked");
                    }
                }
            }
        });
    }
}
