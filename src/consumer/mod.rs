//! Consumer lifecycle: one worker thread per configured stream.

mod registry;
mod worker;

pub use registry::ConsumerRegistry;
pub use worker::{StreamWorker, WorkerStatus};
