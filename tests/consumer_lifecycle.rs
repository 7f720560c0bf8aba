use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use streamhook::scheduler::{
    InMemorySchedulerConfig, InMemorySchedulerProvider, InMemoryStreams, SchedulerSpec, ShutdownSignal,
};
use streamhook::{
    ConsumerRegistry, GlobalConfig, SchedulerError, SchedulerProvider, StreamConfig, StreamEventBus, StreamHook,
    StreamScheduler,
};

fn in_memory(names: &[&str]) -> Arc<InMemorySchedulerProvider> {
    let streams = InMemoryStreams::new();
    for name in names {
        streams.create_stream(name, 2);
    }
    Arc::new(InMemorySchedulerProvider::new(
        streams,
        InMemorySchedulerConfig {
            poll_interval: Duration::from_millis(5),
            max_batch_size: 50,
        },
    ))
}

fn config(names: &[&str]) -> Arc<GlobalConfig> {
    let mut cfg = GlobalConfig::new("lifecycle");
    for name in names {
        cfg = cfg.with_stream(StreamConfig::new(*name));
    }
    Arc::new(cfg)
}

#[test]
fn disabled_or_empty_configuration_starts_zero_workers() {
    let provider = in_memory(&["a"]);
    let registry = ConsumerRegistry::new(provider.clone(), Arc::new(StreamEventBus::new()));

    registry.start_all(None);
    registry.start_all(Some(config(&[])));
    registry.start_all(Some(Arc::new(config(&["a"]).as_ref().clone().with_enabled(false))));

    assert_eq!(registry.len(), 0);
    assert_eq!(provider.created(), 0);
}

#[test]
fn every_configured_stream_gets_one_running_worker() {
    let provider = in_memory(&["a", "b", "c"]);
    let registry = ConsumerRegistry::new(provider.clone(), Arc::new(StreamEventBus::new()));
    let cfg = config(&["a", "b", "c"]);

    registry.start_all(Some(Arc::clone(&cfg)));
    assert_eq!(registry.len(), 3);
    for name in ["a", "b", "c"] {
        assert!(registry.is_running(name), "{name} should be running");
    }

    registry.start_all(Some(cfg));
    assert_eq!(registry.len(), 3);
    assert_eq!(provider.created(), 3);

    registry.shutdown_all();
    assert!(registry.is_empty());
}

#[test]
fn unknown_stream_is_skipped_but_others_run() {
    let provider = in_memory(&["a"]);
    let registry = ConsumerRegistry::new(provider, Arc::new(StreamEventBus::new()));
    registry.start_all(Some(config(&["a", "missing"])));
    assert_eq!(registry.stream_names(), vec!["a".to_string()]);
    registry.shutdown_all();
}

#[test]
fn restart_is_shutdown_then_start() {
    let provider = in_memory(&["a", "b"]);
    let registry = ConsumerRegistry::new(provider.clone(), Arc::new(StreamEventBus::new()));
    registry.start_all(Some(config(&["a"])));
    let before = registry.worker("a").unwrap();

    registry.restart_all(Some(config(&["a", "b"])));
    assert!(!before.is_running());
    assert_eq!(registry.stream_names(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(provider.created(), 3);

    registry.restart_all(None);
    assert!(registry.is_empty());
}

struct Hanging {
    released: Arc<AtomicBool>,
}

impl StreamScheduler for Hanging {
    fn run(&self) {
        while !self.released.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn start_graceful_shutdown(&self) -> ShutdownSignal {
        let (signal, notifier) = ShutdownSignal::channel();
        let released = Arc::clone(&self.released);
        // Completes only once released.
        thread::spawn(move || {
            while !released.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(5));
            }
            notifier.complete(false);
        });
        signal
    }
}

struct HangingProvider {
    released: Arc<AtomicBool>,
    created: AtomicUsize,
}

impl SchedulerProvider for HangingProvider {
    fn create(&self, _spec: SchedulerSpec) -> Result<Arc<dyn StreamScheduler>, SchedulerError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Hanging {
            released: Arc::clone(&self.released),
        }))
    }
}

#[test]
fn shutdown_all_empties_registry_even_when_schedulers_hang() {
    let released = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(HangingProvider {
        released: Arc::clone(&released),
        created: AtomicUsize::new(0),
    });
    let registry = ConsumerRegistry::new(provider.clone(), Arc::new(StreamEventBus::new()));
    let cfg = Arc::new(
        config(&["a", "b"])
            .as_ref()
            .clone()
            .with_shutdown_timeout(Duration::from_millis(40)),
    );

    registry.start_all(Some(cfg));
    assert_eq!(registry.len(), 2);
    let a = registry.worker("a").unwrap();

    let started = Instant::now();
    registry.shutdown_all();
    let elapsed = started.elapsed();

    assert!(registry.is_empty());
    assert!(!a.is_running());
    assert!(elapsed >= Duration::from_millis(80), "both waits should elapse: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(provider.created.load(Ordering::SeqCst), 2);

    released.store(true, Ordering::Release);
}

#[test]
fn registry_size_is_readable_during_lifecycle_calls() {
    let provider = in_memory(&["a", "b", "c", "d"]);
    let registry = Arc::new(ConsumerRegistry::new(provider, Arc::new(StreamEventBus::new())));
    let cfg = config(&["a", "b", "c", "d"]);

    let reader = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let mut max = 0;
            for _ in 0..200 {
                max = max.max(registry.len());
                thread::sleep(Duration::from_millis(1));
            }
            max
        })
    };

    for _ in 0..3 {
        registry.restart_all(Some(Arc::clone(&cfg)));
    }
    let max = reader.join().unwrap();
    assert!(max <= 4);
    registry.shutdown_all();
}

#[test]
fn stream_hook_loads_configuration_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "enabled": true,
            "applicationName": "from-file",
            "shutdownTimeoutMs": 500,
            "streams": [
                {{ "streamName": "a", "initialPosition": "TRIM_HORIZON" }},
                {{ "streamName": "b", "triggerDownstream": true, "projectFieldPath": "$.project" }}
            ]
        }}"#
    )
    .unwrap();

    let cfg = GlobalConfig::from_json_file(file.path()).unwrap();
    assert_eq!(cfg.streams.len(), 2);

    let hook = StreamHook::new(cfg, in_memory(&["a", "b"])).unwrap();
    hook.start();
    assert_eq!(hook.registry().stream_names(), vec!["a".to_string(), "b".to_string()]);
    hook.shutdown();
    assert!(hook.registry().is_empty());
}
