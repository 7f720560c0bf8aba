//! Contract between the core and the external stream scheduler.
//!
//! The scheduler owns shard leasing, record retrieval and checkpoint storage.
//! The core hands it a processor factory and drives it from a dedicated
//! thread: `run` blocks for the scheduler's lifetime and
//! `start_graceful_shutdown` asks it to wind down.

use std::fmt;
use std::sync::Arc;

use crate::clients::ClientSet;
use crate::config::InitialPosition;
use crate::error::SchedulerError;

use super::records::{
    InitializationInput, LeaseLostInput, ProcessRecordsInput, ShardEndedInput, ShutdownRequestedInput,
};
use super::shutdown::ShutdownSignal;

/// Per-shard callbacks, invoked from the scheduler's threads.
///
/// One instance serves one shard for the duration of one lease.
pub trait ShardRecordProcessor: Send {
    /// The processor was assigned a shard.
    fn initialize(&mut self, input: InitializationInput);

    /// A batch of records arrived.
    fn process_records(&mut self, input: ProcessRecordsInput);

    /// The lease moved elsewhere; checkpointing is no longer possible.
    fn lease_lost(&mut self, input: LeaseLostInput);

    /// The shard was closed and fully consumed.
    fn shard_ended(&mut self, input: ShardEndedInput<'_>);

    /// The scheduler is shutting down gracefully.
    fn shutdown_requested(&mut self, input: ShutdownRequestedInput<'_>);
}

/// Creates a fresh processor whenever the scheduler acquires a shard.
pub trait ShardRecordProcessorFactory: Send + Sync {
    /// A new processor for a newly leased shard.
    fn shard_record_processor(&self) -> Box<dyn ShardRecordProcessor>;
}

/// A running consumer for one stream.
pub trait StreamScheduler: Send + Sync {
    /// Consume until shut down. Blocks; intended for a dedicated thread.
    fn run(&self);

    /// Begin a graceful shutdown and return its completion handle.
    fn start_graceful_shutdown(&self) -> ShutdownSignal;
}

/// Everything needed to build a scheduler for one stream.
#[derive(Clone)]
pub struct SchedulerSpec {
    /// Stream to consume.
    pub stream_name: String,
    /// Lease table / metrics namespace, `{application}-{stream}`.
    pub lease_namespace: String,
    /// Remote clients.
    pub clients: ClientSet,
    /// Worker identity, `worker-{application}-{stream}`.
    pub worker_identifier: String,
    /// Processor factory bound to this stream.
    pub processor_factory: Arc<dyn ShardRecordProcessorFactory>,
    /// Where new leases start reading.
    pub initial_position: InitialPosition,
}

impl fmt::Debug for SchedulerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerSpec")
            .field("stream_name", &self.stream_name)
            .field("lease_namespace", &self.lease_namespace)
            .field("clients", &self.clients)
            .field("worker_identifier", &self.worker_identifier)
            .field("initial_position", &self.initial_position)
            .finish_non_exhaustive()
    }
}

/// Builds schedulers. Implemented by the streaming-service integration.
pub trait SchedulerProvider: Send + Sync {
    /// Construct (but do not run) a scheduler.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Construction` when the service rejects the spec.
    fn create(&self, spec: SchedulerSpec) -> Result<Arc<dyn StreamScheduler>, SchedulerError>;
}
