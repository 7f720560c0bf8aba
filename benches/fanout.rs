use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use streamhook::{
    ConfigStore, GlobalConfig, HostError, ListenerError, Observer, PayloadProjectExtractor, ScmTriggerListener,
    SourceDescriptor, SourceEvent, SourceHost, SourceOwner, StreamConfig, StreamEventBus,
};

struct Counter(AtomicU64);

impl Observer for Counter {
    fn on_receive(&self, _stream_name: &str, payload: &[u8]) -> Result<(), ListenerError> {
        self.0.fetch_add(payload.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

struct Job(Vec<SourceDescriptor>);

impl SourceOwner for Job {
    fn name(&self) -> &str {
        "bench"
    }

    fn sources(&self) -> Vec<SourceDescriptor> {
        self.0.clone()
    }

    fn on_source_updated(&self, _source: &SourceDescriptor, _event: &SourceEvent) -> Result<(), HostError> {
        Ok(())
    }
}

struct Jobs(Vec<Arc<dyn SourceOwner>>);

impl SourceHost for Jobs {
    fn source_owners(&self) -> Vec<Arc<dyn SourceOwner>> {
        self.0.clone()
    }
}

const PAYLOAD: &str = r#"{"project":"org/repo-42","refUpdate":{"refName":"refs/heads/main","newRev":"9f1c"}}"#;

fn store() -> Arc<ConfigStore> {
    Arc::new(ConfigStore::new(
        GlobalConfig::new("bench").with_stream(StreamConfig::new("pushes").with_trigger("$.project")),
    ))
}

fn bench_bus_fire(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus/fire");
    for observers in [1usize, 8, 64] {
        let bus = StreamEventBus::new();
        bus.mark_ready();
        for _ in 0..observers {
            bus.register_observer(Arc::new(Counter(AtomicU64::new(0))));
        }
        group.throughput(Throughput::Elements(observers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(observers), &bus, |b, bus| {
            b.iter(|| bus.fire("pushes", PAYLOAD.as_bytes()));
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let extractor = PayloadProjectExtractor::new(store());
    c.bench_function("trigger/extract_project", |b| {
        b.iter(|| extractor.extract_project("pushes", PAYLOAD));
    });
}

fn bench_match_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("trigger/notify_matching");
    for jobs in [10usize, 100, 1000] {
        let owners = (0..jobs)
            .map(|i| {
                Arc::new(Job(vec![
                    SourceDescriptor::git("0", format!("git@host:org/repo-{i}.git")),
                    SourceDescriptor::Other { id: "1".to_string() },
                ])) as Arc<dyn SourceOwner>
            })
            .collect();
        let listener = ScmTriggerListener::new(store(), Arc::new(Jobs(owners)));
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(jobs), &listener, |b, listener| {
            b.iter(|| listener.notify_matching("pushes", PAYLOAD));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bus_fire, bench_extract, bench_match_scan);
criterion_main!(benches);
