//! In-process stream scheduler.
//!
//! This module provides a complete, thread-safe implementation of the
//! scheduler contract backed by in-memory shard logs. It is intended for
//! embedded usage, local development, tests, and as a reference for real
//! streaming-service integrations.
//!
//! Records are appended with [`InMemoryStreams::put_record`] and routed to a
//! shard by partition key. Each scheduler leases every shard of its stream,
//! delivers batches in shard order, and stores checkpoints keyed by lease
//! namespace, so a restarted consumer resumes where the previous one stopped.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::InitialPosition;
use crate::error::SchedulerError;

use super::records::{
    Checkpointer, InitializationInput, LeaseLostInput, ProcessRecordsInput, Record, ShardEndedInput,
    ShutdownRequestedInput,
};
use super::shutdown::{ShutdownNotifier, ShutdownSignal};
use super::traits::{SchedulerProvider, SchedulerSpec, ShardRecordProcessor, StreamScheduler};

#[derive(Debug)]
struct ShardLog {
    id: String,
    records: RwLock<Vec<Record>>,
    closed: AtomicBool,
    lease_epoch: AtomicU64,
}

impl ShardLog {
    fn new(id: String) -> Self {
        Self {
            id,
            records: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            lease_epoch: AtomicU64::new(0),
        }
    }
}

#[derive(Debug)]
struct StreamLog {
    shards: Vec<Arc<ShardLog>>,
}

#[derive(Debug, Default)]
struct StreamsInner {
    streams: DashMap<String, Arc<StreamLog>>,
    checkpoints: DashMap<(String, String), String>,
    reject_checkpoints: AtomicBool,
}

/// Shared in-memory stream service.
///
/// Cloning is cheap; clones address the same streams and checkpoints.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStreams {
    inner: Arc<StreamsInner>,
}

fn stream_missing(stream: &str) -> SchedulerError {
    SchedulerError::InvalidState {
        message: format!("stream '{stream}' does not exist"),
    }
}

fn shard_missing(stream: &str, shard_id: &str) -> SchedulerError {
    SchedulerError::InvalidState {
        message: format!("shard '{shard_id}' does not exist in stream '{stream}'"),
    }
}

impl InMemoryStreams {
    /// An empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a stream with `shard_count` shards (at least one).
    ///
    /// Creating a stream that already exists leaves it unchanged.
    pub fn create_stream(&self, stream: &str, shard_count: usize) {
        self.inner.streams.entry(stream.to_string()).or_insert_with(|| {
            let shards = (0..shard_count.max(1))
                .map(|i| Arc::new(ShardLog::new(format!("shardId-{i:012}"))))
                .collect();
            Arc::new(StreamLog { shards })
        });
    }

    /// Shard ids of a stream, in creation order.
    #[must_use]
    pub fn shard_ids(&self, stream: &str) -> Vec<String> {
        self.inner
            .streams
            .get(stream)
            .map(|log| log.shards.iter().map(|s| s.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Append a record, routed to a shard by `partition_key`.
    ///
    /// Returns the record's sequence number.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` when the stream is unknown or the
    /// selected shard is closed.
    pub fn put_record(
        &self,
        stream: &str,
        partition_key: &str,
        data: impl Into<Vec<u8>>,
    ) -> Result<String, SchedulerError> {
        let log = self.log(stream)?;

        let mut hasher = DefaultHasher::new();
        partition_key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (hasher.finish() % log.shards.len() as u64) as usize;
        let shard = &log.shards[idx];

        if shard.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::InvalidState {
                message: format!("shard '{}' of stream '{stream}' is closed", shard.id),
            });
        }

        let mut records = shard.records.write();
        let sequence_number = format!("{:020}", records.len());
        records.push(Record::new(data, partition_key, sequence_number.clone()));
        Ok(sequence_number)
    }

    /// Close a shard. Consumers finish reading it and then see shard end.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` when the stream or shard is unknown.
    pub fn close_shard(&self, stream: &str, shard_id: &str) -> Result<(), SchedulerError> {
        self.shard(stream, shard_id)?.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Move the lease of a shard away from its current holder.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` when the stream or shard is unknown.
    pub fn revoke_lease(&self, stream: &str, shard_id: &str) -> Result<(), SchedulerError> {
        self.shard(stream, shard_id)?.lease_epoch.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Last checkpoint recorded for a shard under a lease namespace.
    #[must_use]
    pub fn checkpoint(&self, lease_namespace: &str, shard_id: &str) -> Option<String> {
        self.inner
            .checkpoints
            .get(&(lease_namespace.to_string(), shard_id.to_string()))
            .map(|v| v.value().clone())
    }

    /// Make every checkpoint call fail with `SchedulerError::Shutdown`.
    pub fn reject_checkpoints(&self, reject: bool) {
        self.inner.reject_checkpoints.store(reject, Ordering::Release);
    }

    fn log(&self, stream: &str) -> Result<Arc<StreamLog>, SchedulerError> {
        self.inner
            .streams
            .get(stream)
            .map(|log| Arc::clone(log.value()))
            .ok_or_else(|| stream_missing(stream))
    }

    fn shard(&self, stream: &str, shard_id: &str) -> Result<Arc<ShardLog>, SchedulerError> {
        self.log(stream)?
            .shards
            .iter()
            .find(|s| s.id == shard_id)
            .cloned()
            .ok_or_else(|| shard_missing(stream, shard_id))
    }
}

/// Polling behaviour of in-memory schedulers.
#[derive(Debug, Clone)]
pub struct InMemorySchedulerConfig {
    /// Delay between polls of an idle shard.
    pub poll_interval: Duration,
    /// Max records per delivered batch.
    pub max_batch_size: usize,
}

impl Default for InMemorySchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            max_batch_size: 100,
        }
    }
}

/// Builds [`InMemoryScheduler`]s over a shared [`InMemoryStreams`].
#[derive(Debug)]
pub struct InMemorySchedulerProvider {
    streams: InMemoryStreams,
    cfg: InMemorySchedulerConfig,
    created: AtomicUsize,
}

impl InMemorySchedulerProvider {
    /// A provider over `streams`.
    #[must_use]
    pub fn new(streams: InMemoryStreams, cfg: InMemorySchedulerConfig) -> Self {
        Self {
            streams,
            cfg,
            created: AtomicUsize::new(0),
        }
    }

    /// Number of schedulers built so far.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// The stream service backing this provider.
    #[must_use]
    pub fn streams(&self) -> &InMemoryStreams {
        &self.streams
    }
}

impl SchedulerProvider for InMemorySchedulerProvider {
    fn create(&self, spec: SchedulerSpec) -> Result<Arc<dyn StreamScheduler>, SchedulerError> {
        let log = self.streams.log(&spec.stream_name).map_err(|_| SchedulerError::Construction {
            stream: spec.stream_name.clone(),
            reason: "stream does not exist".to_string(),
        })?;

        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(InMemoryScheduler::new(
            spec,
            log,
            Arc::clone(&self.streams.inner),
            self.cfg.clone(),
        )))
    }
}

/// Scheduler consuming every shard of one in-memory stream.
pub struct InMemoryScheduler {
    id: Uuid,
    spec: SchedulerSpec,
    log: Arc<StreamLog>,
    streams: Arc<StreamsInner>,
    cfg: InMemorySchedulerConfig,
    shutdown_tx: Sender<ShutdownNotifier>,
    shutdown_rx: Receiver<ShutdownNotifier>,
    state: Mutex<RunState>,
}

/// Run and shutdown decisions are made together under one lock.
#[derive(Debug, Default)]
struct RunState {
    running: bool,
    shutdown_requested: bool,
}

impl std::fmt::Debug for InMemoryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryScheduler")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .field("running", &self.state.lock().running)
            .finish_non_exhaustive()
    }
}

struct ShardLease {
    shard: Arc<ShardLog>,
    processor: Box<dyn ShardRecordProcessor>,
    cursor: usize,
    last_delivered: Option<String>,
    epoch: u64,
}

enum PollOutcome {
    Active,
    Finished,
}

struct LeaseCheckpointer<'a> {
    streams: &'a StreamsInner,
    lease_namespace: &'a str,
    shard: &'a ShardLog,
    epoch: u64,
    position: Option<String>,
}

impl Checkpointer for LeaseCheckpointer<'_> {
    fn checkpoint(&self) -> Result<(), SchedulerError> {
        if self.streams.reject_checkpoints.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown {
                message: format!("checkpoint rejected for shard '{}'", self.shard.id),
            });
        }
        if self.shard.lease_epoch.load(Ordering::Acquire) != self.epoch {
            return Err(SchedulerError::InvalidState {
                message: format!("lease for shard '{}' is no longer held", self.shard.id),
            });
        }
        if let Some(position) = &self.position {
            self.streams.checkpoints.insert(
                (self.lease_namespace.to_string(), self.shard.id.clone()),
                position.clone(),
            );
        }
        Ok(())
    }
}

impl InMemoryScheduler {
    fn new(
        spec: SchedulerSpec,
        log: Arc<StreamLog>,
        streams: Arc<StreamsInner>,
        cfg: InMemorySchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = bounded::<ShutdownNotifier>(1);
        Self {
            id: Uuid::new_v4(),
            spec,
            log,
            streams,
            cfg,
            shutdown_tx,
            shutdown_rx,
            state: Mutex::new(RunState::default()),
        }
    }

    /// Construction request this scheduler was built from.
    #[must_use]
    pub fn spec(&self) -> &SchedulerSpec {
        &self.spec
    }

    fn acquire(&self, shard: &Arc<ShardLog>) -> ShardLease {
        let checkpoint = self
            .streams
            .checkpoints
            .get(&(self.spec.lease_namespace.clone(), shard.id.clone()))
            .map(|v| v.value().clone());

        let cursor = match &checkpoint {
            Some(seq) => seq.parse::<usize>().map_or(0, |n| n + 1),
            None => match self.spec.initial_position {
                InitialPosition::TrimHorizon => 0,
                InitialPosition::Latest => shard.records.read().len(),
            },
        };

        let epoch = shard.lease_epoch.load(Ordering::Acquire);

        let mut processor = self.spec.processor_factory.shard_record_processor();
        processor.initialize(InitializationInput {
            shard_id: shard.id.clone(),
            sequence_number: checkpoint.clone(),
        });

        ShardLease {
            shard: Arc::clone(shard),
            processor,
            cursor,
            last_delivered: checkpoint,
            epoch,
        }
    }

    fn poll(&self, lease: &mut ShardLease) -> PollOutcome {
        if lease.shard.lease_epoch.load(Ordering::Acquire) != lease.epoch {
            lease.processor.lease_lost(LeaseLostInput {
                shard_id: lease.shard.id.clone(),
            });
            return PollOutcome::Finished;
        }

        let (batch, behind) = {
            let records = lease.shard.records.read();
            let end = records.len().min(lease.cursor + self.cfg.max_batch_size.max(1));
            let batch: Vec<Record> = records.get(lease.cursor..end).map(<[Record]>::to_vec).unwrap_or_default();
            let behind = records.get(end).map_or(0, |next| {
                u64::try_from((Utc::now() - next.arrived_at).num_milliseconds().max(0)).unwrap_or(0)
            });
            (batch, behind)
        };

        if let Some(last) = batch.last() {
            lease.cursor += batch.len();
            lease.last_delivered = Some(last.sequence_number.clone());
            lease.processor.process_records(ProcessRecordsInput {
                records: batch,
                millis_behind_latest: Some(behind),
            });
            return PollOutcome::Active;
        }

        if lease.shard.closed.load(Ordering::Acquire) {
            let checkpointer = LeaseCheckpointer {
                streams: &self.streams,
                lease_namespace: &self.spec.lease_namespace,
                shard: &lease.shard,
                epoch: lease.epoch,
                position: lease.last_delivered.clone(),
            };
            lease.processor.shard_ended(ShardEndedInput {
                checkpointer: &checkpointer,
            });
            return PollOutcome::Finished;
        }

        PollOutcome::Active
    }

    fn shut_down_leases(&self, leases: &mut [ShardLease]) {
        for lease in leases.iter_mut() {
            let checkpointer = LeaseCheckpointer {
                streams: &self.streams,
                lease_namespace: &self.spec.lease_namespace,
                shard: &lease.shard,
                epoch: lease.epoch,
                position: lease.last_delivered.clone(),
            };
            lease.processor.shutdown_requested(ShutdownRequestedInput {
                checkpointer: &checkpointer,
            });
        }
    }
}

impl StreamScheduler for InMemoryScheduler {
    fn run(&self) {
        {
            let mut state = self.state.lock();
            if state.running {
                warn!(stream = %self.spec.stream_name, "scheduler is already running");
                return;
            }
            if state.shutdown_requested {
                debug!(stream = %self.spec.stream_name, "shutdown requested before run; exiting");
                return;
            }
            state.running = true;
        }

        info!(
            stream = %self.spec.stream_name,
            worker = %self.spec.worker_identifier,
            shards = self.log.shards.len(),
            "in-memory scheduler started"
        );

        let mut leases: Vec<ShardLease> = self.log.shards.iter().map(|s| self.acquire(s)).collect();

        loop {
            leases.retain_mut(|lease| matches!(self.poll(lease), PollOutcome::Active));

            match self.shutdown_rx.recv_timeout(self.cfg.poll_interval) {
                Ok(notifier) => {
                    self.shut_down_leases(&mut leases);
                    info!(stream = %self.spec.stream_name, "in-memory scheduler stopped");
                    self.state.lock().running = false;
                    notifier.complete(true);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.state.lock().running = false;
    }

    fn start_graceful_shutdown(&self) -> ShutdownSignal {
        let mut state = self.state.lock();
        if state.shutdown_requested {
            debug!(stream = %self.spec.stream_name, "shutdown already requested");
            return ShutdownSignal::completed(true);
        }
        state.shutdown_requested = true;
        if !state.running {
            return ShutdownSignal::completed(true);
        }

        // The run loop only exits after taking this notifier.
        let (signal, notifier) = ShutdownSignal::channel();
        if self.shutdown_tx.try_send(notifier).is_err() {
            return ShutdownSignal::completed(false);
        }
        signal
    }
}
