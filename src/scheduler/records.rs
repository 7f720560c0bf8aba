//! Records and lifecycle inputs exchanged with shard processors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// One record as delivered by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque payload bytes.
    pub data: Vec<u8>,
    /// Key used to route the record to a shard.
    pub partition_key: String,
    /// Position of the record within its shard.
    pub sequence_number: String,
    /// When the stream accepted the record.
    pub arrived_at: DateTime<Utc>,
}

impl Record {
    /// Build a record stamped with the current time.
    #[must_use]
    pub fn new(
        data: impl Into<Vec<u8>>,
        partition_key: impl Into<String>,
        sequence_number: impl Into<String>,
    ) -> Self {
        Self {
            data: data.into(),
            partition_key: partition_key.into(),
            sequence_number: sequence_number.into(),
            arrived_at: Utc::now(),
        }
    }
}

/// Acknowledges progress on a shard.
pub trait Checkpointer {
    /// Record that everything delivered so far has been processed.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` when the lease is no longer held,
    /// `SchedulerError::Shutdown` when the scheduler stopped accepting
    /// checkpoints.
    fn checkpoint(&self) -> Result<(), SchedulerError>;
}

/// Delivered once, before any records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationInput {
    /// Shard the processor now owns.
    pub shard_id: String,
    /// Checkpoint the shard resumes after, if any.
    pub sequence_number: Option<String>,
}

/// A batch of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecordsInput {
    /// Records in shard order.
    pub records: Vec<Record>,
    /// How far behind the tip of the shard this batch is.
    pub millis_behind_latest: Option<u64>,
}

/// The lease moved to another worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseLostInput {
    /// Shard that was lost.
    pub shard_id: String,
}

/// The shard was closed and fully read.
pub struct ShardEndedInput<'a> {
    /// Checkpoint handle for the final position.
    pub checkpointer: &'a dyn Checkpointer,
}

/// The scheduler is shutting down gracefully.
pub struct ShutdownRequestedInput<'a> {
    /// Checkpoint handle for the last delivered position.
    pub checkpointer: &'a dyn Checkpointer,
}
