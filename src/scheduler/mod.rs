//! Stream scheduler contract and the in-process implementation.

pub mod memory;
mod records;
mod shutdown;
mod traits;

pub use memory::{InMemoryScheduler, InMemorySchedulerConfig, InMemorySchedulerProvider, InMemoryStreams};
pub use records::{
    Checkpointer, InitializationInput, LeaseLostInput, ProcessRecordsInput, Record, ShardEndedInput,
    ShutdownRequestedInput,
};
pub use shutdown::{ShutdownNotifier, ShutdownSignal};
pub use traits::{
    SchedulerProvider, SchedulerSpec, ShardRecordProcessor, ShardRecordProcessorFactory, StreamScheduler,
};
