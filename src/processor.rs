//! Per-shard record processing.
//!
//! A [`RecordProcessor`] forwards every record of one shard to the
//! [`StreamEventBus`] and acknowledges progress when the shard ends or the
//! scheduler shuts down. It never propagates a failure back to the scheduler.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bus::StreamEventBus;
use crate::error::SchedulerError;
use crate::scheduler::{
    Checkpointer, InitializationInput, LeaseLostInput, ProcessRecordsInput, ShardEndedInput,
    ShardRecordProcessor, ShardRecordProcessorFactory, ShutdownRequestedInput,
};

/// Lifecycle of one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Waiting for `initialize`.
    Initializing,
    /// Receiving batches.
    Processing,
    /// The lease moved elsewhere.
    LeaseLost,
    /// The shard closed and was checkpointed.
    ShardEnded,
    /// The scheduler is stopping and the shard was checkpointed.
    ShutdownRequested,
    /// A final checkpoint failed; nothing more will happen.
    Terminal,
}

impl ProcessorState {
    /// No further callbacks are expected.
    #[must_use]
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Initializing | Self::Processing)
    }
}

/// Forwards one shard's records to the bus.
#[derive(Debug)]
pub struct RecordProcessor {
    stream_name: String,
    bus: Arc<StreamEventBus>,
    shard_id: Option<String>,
    state: ProcessorState,
    records_processed: u64,
    factory_total: Arc<AtomicU64>,
}

impl RecordProcessor {
    /// A processor for `stream_name` delivering to `bus`.
    #[must_use]
    pub fn new(stream_name: impl Into<String>, bus: Arc<StreamEventBus>) -> Self {
        Self::with_counter(stream_name.into(), bus, Arc::new(AtomicU64::new(0)))
    }

    fn with_counter(stream_name: String, bus: Arc<StreamEventBus>, counter: Arc<AtomicU64>) -> Self {
        Self {
            stream_name,
            bus,
            shard_id: None,
            state: ProcessorState::Initializing,
            records_processed: 0,
            factory_total: counter,
        }
    }

    /// Stream this processor belongs to.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Shard assigned by `initialize`.
    #[must_use]
    pub fn shard_id(&self) -> Option<&str> {
        self.shard_id.as_deref()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Records this processor handed to the bus.
    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.records_processed
    }

    fn shard(&self) -> &str {
        self.shard_id.as_deref().unwrap_or("unknown")
    }

    fn final_checkpoint(&mut self, checkpointer: &dyn Checkpointer, reached: ProcessorState, reason: &str) {
        match checkpointer.checkpoint() {
            Ok(()) => {
                info!(stream = %self.stream_name, shard = self.shard(), reason, "checkpointed");
                self.state = reached;
            }
            Err(e @ (SchedulerError::InvalidState { .. } | SchedulerError::Shutdown { .. })) => {
                error!(
                    stream = %self.stream_name,
                    shard = self.shard(),
                    reason,
                    error = %e,
                    "checkpoint failed; giving up"
                );
                self.state = ProcessorState::Terminal;
            }
            Err(e) => {
                error!(
                    stream = %self.stream_name,
                    shard = self.shard(),
                    reason,
                    error = %e,
                    "unexpected checkpoint error; giving up"
                );
                self.state = ProcessorState::Terminal;
            }
        }
    }
}

impl ShardRecordProcessor for RecordProcessor {
    fn initialize(&mut self, input: InitializationInput) {
        info!(
            stream = %self.stream_name,
            shard = %input.shard_id,
            sequence = input.sequence_number.as_deref().unwrap_or("none"),
            "initializing record processor"
        );
        self.shard_id = Some(input.shard_id);
        self.state = ProcessorState::Processing;
    }

    fn process_records(&mut self, input: ProcessRecordsInput) {
        if self.state.is_final() {
            warn!(stream = %self.stream_name, shard = self.shard(), state = ?self.state, "batch after final state ignored");
            return;
        }
        debug!(
            stream = %self.stream_name,
            shard = self.shard(),
            records = input.records.len(),
            behind_ms = input.millis_behind_latest,
            "processing batch"
        );
        for record in &input.records {
            self.bus.fire(&self.stream_name, &record.data);
            self.records_processed += 1;
            self.factory_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lease_lost(&mut self, input: LeaseLostInput) {
        info!(stream = %self.stream_name, shard = %input.shard_id, "lease lost");
        self.state = ProcessorState::LeaseLost;
    }

    fn shard_ended(&mut self, input: ShardEndedInput<'_>) {
        info!(stream = %self.stream_name, shard = self.shard(), "reached shard end");
        self.final_checkpoint(input.checkpointer, ProcessorState::ShardEnded, "shard ended");
    }

    fn shutdown_requested(&mut self, input: ShutdownRequestedInput<'_>) {
        info!(stream = %self.stream_name, shard = self.shard(), "scheduler is shutting down");
        self.final_checkpoint(input.checkpointer, ProcessorState::ShutdownRequested, "shutdown requested");
    }
}

/// Builds [`RecordProcessor`]s bound to one stream.
#[derive(Debug, Clone)]
pub struct ProcessorFactory {
    stream_name: String,
    bus: Arc<StreamEventBus>,
    records_processed: Arc<AtomicU64>,
}

impl ProcessorFactory {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(stream_name: impl Into<String>, bus: Arc<StreamEventBus>) -> Self {
        Self {
            stream_name: stream_name.into(),
            bus,
            records_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stream every built processor is bound to.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// A fresh processor feeding this factory's record total.
    #[must_use]
    pub fn create(&self) -> RecordProcessor {
        RecordProcessor::with_counter(
            self.stream_name.clone(),
            Arc::clone(&self.bus),
            Arc::clone(&self.records_processed),
        )
    }

    /// Records forwarded by every processor this factory built.
    #[must_use]
    pub fn records_processed(&self) -> u64 {
        self.records_processed.load(Ordering::Relaxed)
    }
}

impl ShardRecordProcessorFactory for ProcessorFactory {
    fn shard_record_processor(&self) -> Box<dyn ShardRecordProcessor> {
        Box::new(self.create())
    }
}
