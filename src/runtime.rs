//! Composition root.
//!
//! [`StreamHook`] wires the configuration store, the event bus, the consumer
//! registry, and optionally the source-control trigger. The host calls
//! [`start`](StreamHook::start) once it has finished loading and
//! [`shutdown`](StreamHook::shutdown) before it stops. Configuration saved in
//! between restarts every consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::bus::{Observer, ObserverId, StreamEventBus};
use crate::config::{ConfigListener, ConfigStore, GlobalConfig};
use crate::consumer::ConsumerRegistry;
use crate::error::StreamHookResult;
use crate::scheduler::SchedulerProvider;
use crate::trigger::{ScmTriggerListener, SourceHost};

/// Forwards configuration changes to the registry while the hook is started.
struct RestartOnSave {
    registry: Arc<ConsumerRegistry>,
    started: Arc<AtomicBool>,
}

impl ConfigListener for RestartOnSave {
    fn on_config_changed(&self, config: &Arc<GlobalConfig>) {
        if self.started.load(Ordering::Acquire) {
            self.registry.on_config_changed(config);
        } else {
            debug!("configuration saved before start; consumers start later");
        }
    }
}

/// Stream consumers, observers and triggers for one host.
#[derive(Debug)]
pub struct StreamHook {
    config: Arc<ConfigStore>,
    bus: Arc<StreamEventBus>,
    registry: Arc<ConsumerRegistry>,
    started: Arc<AtomicBool>,
}

impl StreamHook {
    /// Wire everything around `config`. Nothing runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns the configuration's validation error.
    pub fn new(config: GlobalConfig, provider: Arc<dyn SchedulerProvider>) -> StreamHookResult<Self> {
        config.validate()?;

        let config = Arc::new(ConfigStore::new(config));
        let bus = Arc::new(StreamEventBus::new());
        let registry = Arc::new(ConsumerRegistry::new(provider, Arc::clone(&bus)));
        let started = Arc::new(AtomicBool::new(false));

        config.add_listener(Arc::new(RestartOnSave {
            registry: Arc::clone(&registry),
            started: Arc::clone(&started),
        }));

        Ok(Self {
            config,
            bus,
            registry,
            started,
        })
    }

    /// Register the source-control trigger against `host`.
    #[must_use]
    pub fn with_scm_trigger(self, host: Arc<dyn SourceHost>) -> Self {
        let listener = ScmTriggerListener::new(Arc::clone(&self.config), host);
        self.bus.register_observer(Arc::new(listener));
        self
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn bus(&self) -> &Arc<StreamEventBus> {
        &self.bus
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn registry(&self) -> &Arc<ConsumerRegistry> {
        &self.registry
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Add an observer for every stream's records.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverId {
        self.bus.register_observer(observer)
    }

    #[allow(missing_docs)]
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.bus.unregister_observer(id)
    }

    /// Observers that would receive a record right now, in delivery order.
    ///
    /// # Errors
    ///
    /// `HostError::RuntimeNotAvailable` (retryable) unless the hook is started.
    pub fn observers(&self) -> StreamHookResult<Vec<Arc<dyn Observer>>> {
        Ok(self.bus.all_registered_listeners()?)
    }

    /// Validate and apply a new configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error; running consumers are left as they are.
    pub fn save_config(&self, config: GlobalConfig) -> StreamHookResult<()> {
        self.config.save(config)?;
        Ok(())
    }

    /// The host finished loading: open the bus and start consumers.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("stream hook already started");
            return;
        }
        info!("starting stream hook");
        self.bus.mark_ready();
        self.registry.start_all(Some(self.config.current()));
    }

    /// The host is stopping: stop consumers and close the bus.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::AcqRel) {
            debug!("stream hook not started");
            return;
        }
        info!("shutting down stream hook");
        self.registry.shutdown_all();
        self.bus.mark_stopped();
    }
}
