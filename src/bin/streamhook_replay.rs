//! streamhook replay tool
//!
//! Feeds a newline-delimited record file through the full pipeline on the
//! in-memory scheduler and logs what every observer and trigger does.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use streamhook::scheduler::{InMemorySchedulerConfig, InMemorySchedulerProvider, InMemoryStreams};
use streamhook::telemetry::init_tracing;
use streamhook::{
    GlobalConfig, HostError, InitialPosition, ListenerError, Observer, SourceDescriptor, SourceEvent, SourceHost,
    SourceOwner, StreamHook,
};

/// Command-line options
struct Args {
    config: PathBuf,
    records: PathBuf,
    jobs: Option<PathBuf>,
    shards: usize,
    wait: Duration,
}

fn usage() {
    println!("streamhook-replay - replay recorded stream payloads");
    println!();
    println!("USAGE:");
    println!("    streamhook-replay --config <FILE> --records <FILE> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <FILE>     Global configuration (JSON)");
    println!("    -r, --records <FILE>    One record per line: {{\"stream\", \"partitionKey\", \"data\"}}");
    println!("    -j, --jobs <FILE>       Source-control jobs (JSON list of {{\"name\", \"remotes\"}})");
    println!("    -s, --shards <N>        Shards per stream [default: 1]");
    println!("    -w, --wait-ms <MS>      Max time to wait for delivery [default: 5000]");
    println!("    -h, --help              Print help information");
    println!();
    println!("Every stream is read from TRIM_HORIZON so the whole file is delivered.");
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1).cloned().unwrap_or_else(|| {
        eprintln!("error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config = None;
    let mut records = None;
    let mut jobs = None;
    let mut shards = 1;
    let mut wait = Duration::from_millis(5_000);

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => config = Some(PathBuf::from(value_of(&args, i, "--config"))),
            "--records" | "-r" => records = Some(PathBuf::from(value_of(&args, i, "--records"))),
            "--jobs" | "-j" => jobs = Some(PathBuf::from(value_of(&args, i, "--jobs"))),
            "--shards" | "-s" => {
                let raw = value_of(&args, i, "--shards");
                shards = raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid shard count: {raw}");
                    std::process::exit(1);
                });
            }
            "--wait-ms" | "-w" => {
                let raw = value_of(&args, i, "--wait-ms");
                wait = Duration::from_millis(raw.parse().unwrap_or_else(|_| {
                    eprintln!("error: invalid wait: {raw}");
                    std::process::exit(1);
                }));
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
        i += 2;
    }

    let (Some(config), Some(records)) = (config, records) else {
        eprintln!("error: --config and --records are required");
        std::process::exit(1);
    };

    Args {
        config,
        records,
        jobs,
        shards,
        wait,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordLine {
    stream: String,
    #[serde(default)]
    partition_key: Option<String>,
    data: Value,
}

#[derive(Deserialize)]
struct JobLine {
    name: String,
    remotes: Vec<String>,
}

/// Counts and logs every record.
#[derive(Default)]
struct LoggingObserver {
    received: AtomicUsize,
}

impl Observer for LoggingObserver {
    fn name(&self) -> &str {
        "replay-log"
    }

    fn on_receive(&self, stream_name: &str, payload: &[u8]) -> Result<(), ListenerError> {
        self.received.fetch_add(1, Ordering::AcqRel);
        info!(stream = stream_name, payload = %String::from_utf8_lossy(payload), "record received");
        Ok(())
    }
}

/// A job that only logs update requests.
struct LoggedJob {
    name: String,
    sources: Vec<SourceDescriptor>,
}

impl SourceOwner for LoggedJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn sources(&self) -> Vec<SourceDescriptor> {
        self.sources.clone()
    }

    fn on_source_updated(&self, source: &SourceDescriptor, event: &SourceEvent) -> Result<(), HostError> {
        info!(job = %self.name, source = source.id(), event = %event, "rescan requested");
        Ok(())
    }
}

struct LoggedJobs(Vec<Arc<dyn SourceOwner>>);

impl SourceHost for LoggedJobs {
    fn source_owners(&self) -> Vec<Arc<dyn SourceOwner>> {
        self.0.clone()
    }
}

fn load_jobs(path: &PathBuf) -> Result<LoggedJobs, Box<dyn std::error::Error>> {
    let jobs: Vec<JobLine> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let owners = jobs
        .into_iter()
        .map(|job| {
            let sources = job
                .remotes
                .into_iter()
                .enumerate()
                .map(|(i, remote)| SourceDescriptor::git(i.to_string(), remote))
                .collect();
            Arc::new(LoggedJob {
                name: job.name,
                sources,
            }) as Arc<dyn SourceOwner>
        })
        .collect();
    Ok(LoggedJobs(owners))
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = GlobalConfig::from_json_file(&args.config)?;
    config.enabled = true;
    for stream in &mut config.streams {
        stream.initial_position = InitialPosition::TrimHorizon;
    }

    let streams = InMemoryStreams::new();
    for stream in &config.streams {
        streams.create_stream(&stream.stream_name, args.shards);
    }

    let text = std::fs::read_to_string(&args.records)?;
    let mut total = 0;
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: RecordLine =
            serde_json::from_str(line).map_err(|e| format!("{}:{}: {e}", args.records.display(), lineno + 1))?;
        let data = match record.data {
            Value::String(s) => s.into_bytes(),
            other => other.to_string().into_bytes(),
        };
        let key = record.partition_key.unwrap_or_else(|| lineno.to_string());
        streams.put_record(&record.stream, &key, data)?;
        total += 1;
    }
    info!(records = total, "records loaded");

    let provider = Arc::new(InMemorySchedulerProvider::new(
        streams,
        InMemorySchedulerConfig::default(),
    ));
    let mut hook = StreamHook::new(config, provider)?;
    if let Some(path) = &args.jobs {
        hook = hook.with_scm_trigger(Arc::new(load_jobs(path)?));
    }
    let observer = Arc::new(LoggingObserver::default());
    hook.register_observer(observer.clone());

    hook.start();
    info!(observers = hook.observers()?.len(), "replay started");
    let deadline = Instant::now() + args.wait;
    while observer.received.load(Ordering::Acquire) < total && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    hook.shutdown();

    let received = observer.received.load(Ordering::Acquire);
    println!("delivered {received}/{total} records");
    if received < total {
        return Err(format!("{} records were not delivered", total - received).into());
    }
    Ok(())
}

fn main() {
    init_tracing("info");
    let args = parse_args();
    if let Err(e) = run(args) {
        error!(error = %e, "replay failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
