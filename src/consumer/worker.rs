use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::bus::StreamEventBus;
use crate::clients::ClientSet;
use crate::config::GlobalConfig;
use crate::error::SchedulerError;
use crate::processor::ProcessorFactory;
use crate::scheduler::{SchedulerProvider, SchedulerSpec, StreamScheduler};

/// Observable lifecycle of a [`StreamWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Built but never subscribed.
    NotStarted,
    /// Scheduler thread launched.
    Running,
    /// Shut down; cannot be restarted.
    Stopped,
}

enum WorkerState {
    NotStarted,
    Running {
        scheduler: Arc<dyn StreamScheduler>,
        thread: JoinHandle<()>,
    },
    Stopped,
}

impl WorkerState {
    fn status(&self) -> WorkerStatus {
        match self {
            Self::NotStarted => WorkerStatus::NotStarted,
            Self::Running { .. } => WorkerStatus::Running,
            Self::Stopped => WorkerStatus::Stopped,
        }
    }
}

/// Owns one stream's scheduler and the thread it runs on.
pub struct StreamWorker {
    stream_name: String,
    config: Arc<GlobalConfig>,
    provider: Arc<dyn SchedulerProvider>,
    factory: Arc<ProcessorFactory>,
    state: Mutex<WorkerState>,
}

impl fmt::Debug for StreamWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWorker")
            .field("stream_name", &self.stream_name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl StreamWorker {
    /// A worker for `stream_name`, not yet started.
    #[must_use]
    pub fn new(
        stream_name: impl Into<String>,
        config: Arc<GlobalConfig>,
        provider: Arc<dyn SchedulerProvider>,
        bus: Arc<StreamEventBus>,
    ) -> Self {
        let stream_name = stream_name.into();
        let factory = Arc::new(ProcessorFactory::new(stream_name.clone(), bus));
        Self {
            stream_name,
            config,
            provider,
            factory,
            state: Mutex::new(WorkerState::NotStarted),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.state.lock().status()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status() == WorkerStatus::Running
    }

    /// Records this worker's processors have forwarded.
    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.factory.records_processed()
    }

    /// The scheduler construction request for this stream.
    fn scheduler_spec(&self) -> SchedulerSpec {
        let initial_position = self
            .config
            .stream(&self.stream_name)
            .map(|s| s.initial_position)
            .unwrap_or_default();

        SchedulerSpec {
            stream_name: self.stream_name.clone(),
            lease_namespace: self.config.lease_namespace(&self.stream_name),
            clients: ClientSet::from_config(&self.config),
            worker_identifier: self.config.worker_identifier(&self.stream_name),
            processor_factory: self.factory.clone(),
            initial_position,
        }
    }

    /// Build the scheduler and run it on a dedicated thread.
    ///
    /// The thread is detached: it does not keep the process alive.
    ///
    /// # Errors
    ///
    /// `SchedulerError::AlreadyStarted` on a second call,
    /// `SchedulerError::Construction` when the provider rejects the stream,
    /// `SchedulerError::Spawn` when the OS refuses the thread.
    pub fn subscribe(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        if !matches!(*state, WorkerState::NotStarted) {
            return Err(SchedulerError::AlreadyStarted {
                stream: self.stream_name.clone(),
            });
        }

        let spec = self.scheduler_spec();
        info!(
            stream = %self.stream_name,
            lease_namespace = %spec.lease_namespace,
            worker = %spec.worker_identifier,
            position = %spec.initial_position,
            "starting stream consumer"
        );
        let scheduler = self.provider.create(spec)?;

        let runner = Arc::clone(&scheduler);
        let stream_name = self.stream_name.clone();
        let thread = thread::Builder::new()
            .name(format!("streamhook-{}", self.stream_name))
            .spawn(move || {
                runner.run();
                debug!(stream = %stream_name, "scheduler returned");
            })
            .map_err(|e| SchedulerError::Spawn {
                stream: self.stream_name.clone(),
                reason: e.to_string(),
            })?;

        *state = WorkerState::Running { scheduler, thread };
        Ok(())
    }

    /// Gracefully stop the scheduler, waiting at most the configured timeout.
    ///
    /// The worker is stopped afterwards whatever the outcome. No-op unless
    /// running.
    pub fn shutdown(&self) {
        let (scheduler, thread) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, WorkerState::Stopped) {
                WorkerState::Running { scheduler, thread } => (scheduler, thread),
                other => {
                    *state = other;
                    debug!(stream = %self.stream_name, "worker not running; nothing to shut down");
                    return;
                }
            }
        };

        let timeout = self.config.shutdown_timeout();
        info!(stream = %self.stream_name, timeout_ms = self.config.shutdown_timeout_ms, "shutting down stream consumer");

        match scheduler.start_graceful_shutdown().wait(timeout) {
            Ok(true) => info!(stream = %self.stream_name, "stream consumer stopped"),
            Ok(false) => warn!(stream = %self.stream_name, "stream consumer stopped with errors"),
            Err(e @ SchedulerError::ShutdownTimeout { .. }) => {
                warn!(stream = %self.stream_name, error = %e, "graceful shutdown timed out");
            }
            Err(e) => error!(stream = %self.stream_name, error = %e, "graceful shutdown failed"),
        }

        if thread.is_finished() {
            if thread.join().is_err() {
                error!(stream = %self.stream_name, "scheduler thread panicked");
            }
        } else {
            debug!(stream = %self.stream_name, "detaching scheduler thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InitialPosition, StreamConfig};
    use crate::scheduler::ShutdownSignal;
    use parking_lot::Mutex as PlMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    struct Stuck {
        stop: AtomicBool,
    }

    impl StreamScheduler for Stuck {
        fn run(&self) {
            while !self.stop.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
            }
        }

        fn start_graceful_shutdown(&self) -> ShutdownSignal {
            let (signal, notifier) = ShutdownSignal::channel();
            std::mem::forget(notifier);
            signal
        }
    }

    struct Prompt;

    impl StreamScheduler for Prompt {
        fn run(&self) {}

        fn start_graceful_shutdown(&self) -> ShutdownSignal {
            ShutdownSignal::completed(true)
        }
    }

    #[derive(Default)]
    struct Provider {
        specs: PlMutex<Vec<SchedulerSpec>>,
        stuck: Option<Arc<Stuck>>,
        fail: bool,
    }

    impl SchedulerProvider for Provider {
        fn create(&self, spec: SchedulerSpec) -> Result<Arc<dyn StreamScheduler>, SchedulerError> {
            if self.fail {
                return Err(SchedulerError::Construction {
                    stream: spec.stream_name,
                    reason: "denied".into(),
                });
            }
            self.specs.lock().push(spec);
            Ok(match &self.stuck {
                Some(s) => Arc::clone(s) as Arc<dyn StreamScheduler>,
                None => Arc::new(Prompt),
            })
        }
    }

    fn config() -> Arc<GlobalConfig> {
        Arc::new(
            GlobalConfig::new("app")
                .with_stream(StreamConfig::new("orders").with_initial_position(InitialPosition::TrimHorizon))
                .with_shutdown_timeout(Duration::from_millis(50)),
        )
    }

    fn bus() -> Arc<StreamEventBus> {
        Arc::new(StreamEventBus::new())
    }

    #[test]
    fn subscribe_builds_spec_from_config() {
        let provider = Arc::new(Provider::default());
        let worker = StreamWorker::new("orders", config(), provider.clone(), bus());
        assert_eq!(worker.status(), WorkerStatus::NotStarted);

        worker.subscribe().unwrap();
        assert!(worker.is_running());

        let specs = provider.specs.lock();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].stream_name, "orders");
        assert_eq!(specs[0].lease_namespace, "app-orders");
        assert_eq!(specs[0].worker_identifier, "worker-app-orders");
        assert_eq!(specs[0].initial_position, InitialPosition::TrimHorizon);
    }

    #[test]
    fn subscribe_twice_is_rejected() {
        let worker = StreamWorker::new("orders", config(), Arc::new(Provider::default()), bus());
        worker.subscribe().unwrap();
        assert!(matches!(worker.subscribe(), Err(SchedulerError::AlreadyStarted { .. })));

        worker.shutdown();
        assert_eq!(worker.status(), WorkerStatus::Stopped);
        assert!(matches!(worker.subscribe(), Err(SchedulerError::AlreadyStarted { .. })));
    }

    #[test]
    fn construction_failure_leaves_worker_not_started() {
        let provider = Arc::new(Provider {
            fail: true,
            ..Provider::default()
        });
        let worker = StreamWorker::new("orders", config(), provider, bus());
        assert!(matches!(worker.subscribe(), Err(SchedulerError::Construction { .. })));
        assert_eq!(worker.status(), WorkerStatus::NotStarted);
    }

    #[test]
    fn shutdown_before_subscribe_is_noop() {
        let worker = StreamWorker::new("orders", config(), Arc::new(Provider::default()), bus());
        worker.shutdown();
        assert_eq!(worker.status(), WorkerStatus::NotStarted);
    }

    #[test]
    fn timed_out_shutdown_still_stops() {
        let stuck = Arc::new(Stuck {
            stop: AtomicBool::new(false),
        });
        let provider = Arc::new(Provider {
            stuck: Some(Arc::clone(&stuck)),
            ..Provider::default()
        });
        let worker = StreamWorker::new("orders", config(), provider, bus());
        worker.subscribe().unwrap();

        let started = Instant::now();
        worker.shutdown();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(worker.status(), WorkerStatus::Stopped);

        stuck.stop.store(true, Ordering::Release);
    }

    #[test]
    fn unknown_stream_uses_default_position() {
        let provider = Arc::new(Provider::default());
        let worker = StreamWorker::new("other", config(), provider.clone(), bus());
        worker.subscribe().unwrap();
        assert_eq!(provider.specs.lock()[0].initial_position, InitialPosition::Latest);
    }
}
