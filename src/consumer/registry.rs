use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::bus::StreamEventBus;
use crate::config::{ConfigListener, GlobalConfig};
use crate::scheduler::SchedulerProvider;

use super::worker::StreamWorker;

/// One [`StreamWorker`] per configured stream.
///
/// Start, shutdown and restart are serialized; size and membership queries
/// can run concurrently with them.
pub struct ConsumerRegistry {
    workers: DashMap<String, Arc<StreamWorker>>,
    provider: Arc<dyn SchedulerProvider>,
    bus: Arc<StreamEventBus>,
    lifecycle: Mutex<()>,
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("streams", &self.stream_names())
            .finish_non_exhaustive()
    }
}

impl ConsumerRegistry {
    /// An empty registry building schedulers with `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn SchedulerProvider>, bus: Arc<StreamEventBus>) -> Self {
        Self {
            workers: DashMap::new(),
            provider,
            bus,
            lifecycle: Mutex::new(()),
        }
    }

    /// Start a worker for every configured stream that has none.
    ///
    /// Absent, disabled, or stream-less configurations start nothing.
    /// Existing workers are left untouched. A stream whose scheduler cannot
    /// be built is logged and not tracked.
    pub fn start_all(&self, config: Option<Arc<GlobalConfig>>) {
        let _guard = self.lifecycle.lock();
        self.start_locked(config);
    }

    /// Stop every worker and forget them all.
    ///
    /// A worker that fails to stop does not prevent stopping the rest.
    pub fn shutdown_all(&self) {
        let _guard = self.lifecycle.lock();
        self.shutdown_locked();
    }

    /// [`shutdown_all`](Self::shutdown_all) then [`start_all`](Self::start_all),
    /// with no other lifecycle call in between.
    pub fn restart_all(&self, config: Option<Arc<GlobalConfig>>) {
        let _guard = self.lifecycle.lock();
        info!("restarting stream consumers");
        self.shutdown_locked();
        self.start_locked(config);
    }

    fn start_locked(&self, config: Option<Arc<GlobalConfig>>) {
        let Some(config) = config else {
            info!("no configuration available; stream consumers not started");
            return;
        };
        if !config.enabled {
            info!("stream consumers are disabled");
            return;
        }
        if config.streams.is_empty() {
            info!("no streams configured");
            return;
        }

        info!(streams = config.streams.len(), "starting stream consumers");
        for stream in &config.streams {
            let worker = match self.workers.entry(stream.stream_name.clone()) {
                Entry::Occupied(_) => {
                    debug!(stream = %stream.stream_name, "consumer already registered");
                    continue;
                }
                Entry::Vacant(slot) => {
                    let worker = Arc::new(StreamWorker::new(
                        stream.stream_name.clone(),
                        Arc::clone(&config),
                        Arc::clone(&self.provider),
                        Arc::clone(&self.bus),
                    ));
                    slot.insert(Arc::clone(&worker));
                    worker
                }
            };

            // Subscribe outside the map guard.
            if let Err(e) = worker.subscribe() {
                error!(stream = %stream.stream_name, error = %e, "failed to start stream consumer");
                self.workers.remove(&stream.stream_name);
            }
        }
    }

    fn shutdown_locked(&self) {
        let workers: Vec<Arc<StreamWorker>> = self.workers.iter().map(|e| Arc::clone(e.value())).collect();
        if workers.is_empty() {
            debug!("no stream consumers to shut down");
        }
        for worker in workers {
            if catch_unwind(AssertUnwindSafe(|| worker.shutdown())).is_err() {
                error!(stream = worker.stream_name(), "stream consumer panicked during shutdown");
            }
        }
        self.workers.clear();
    }

    /// Number of tracked workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Tracked stream names, sorted.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn contains(&self, stream_name: &str) -> bool {
        self.workers.contains_key(stream_name)
    }

    /// Whether the stream has a tracked, running worker.
    #[must_use]
    pub fn is_running(&self, stream_name: &str) -> bool {
        self.workers.get(stream_name).is_some_and(|w| w.is_running())
    }

    /// The worker for a stream, if tracked.
    #[must_use]
    pub fn worker(&self, stream_name: &str) -> Option<Arc<StreamWorker>> {
        self.workers.get(stream_name).map(|w| Arc::clone(w.value()))
    }
}

impl ConfigListener for ConsumerRegistry {
    fn on_config_changed(&self, config: &Arc<GlobalConfig>) {
        self.restart_all(Some(Arc::clone(config)));
    }
}
