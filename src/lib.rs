//! # streamhook - Stream consumers with observer fan-out
//!
//! streamhook subscribes a host application to managed event streams, runs
//! one consumer per configured stream, and delivers every record to the
//! host's registered observers. A built-in observer extracts a project
//! identifier from JSON payloads and asks matching source-control jobs to
//! rescan.
//!
//! ## Core Concepts
//!
//! - **ConsumerRegistry**: one `StreamWorker` per stream; idempotent start, bulk shutdown and restart
//! - **StreamWorker**: owns a scheduler and the thread it runs on
//! - **RecordProcessor**: forwards a shard's records to the bus and checkpoints
//! - **StreamEventBus**: isolated fan-out to observers, run as the system identity
//! - **ScmTriggerListener**: JSON path extraction and source matching
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use streamhook::{GlobalConfig, StreamConfig, StreamHook};
//! use streamhook::scheduler::{InMemorySchedulerConfig, InMemorySchedulerProvider, InMemoryStreams};
//!
//! let streams = InMemoryStreams::new();
//! streams.create_stream("pushes", 2);
//!
//! let config = GlobalConfig::new("ci")
//!     .with_stream(StreamConfig::new("pushes").with_trigger("$.project"));
//! let provider = Arc::new(InMemorySchedulerProvider::new(streams.clone(), InMemorySchedulerConfig::default()));
//!
//! let hook = StreamHook::new(config, provider)?.with_scm_trigger(host);
//! hook.start();
//! streams.put_record("pushes", "org/foo", r#"{"project":"org/foo"}"#)?;
//! hook.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Configuration and errors
pub mod clients;
pub mod config;
pub mod error;

// Scheduler seam
pub mod scheduler;

// Pipeline
pub mod bus;
pub mod consumer;
pub mod processor;
pub mod security;
pub mod trigger;

// Host integration
pub mod runtime;
pub mod telemetry;

// Re-export primary types at crate root for convenience
pub use bus::{Observer, ObserverId, StreamEventBus};
pub use clients::{ClientSet, ClientSettings, ServiceKind};
pub use config::{ConfigListener, ConfigStore, GlobalConfig, InitialPosition, StreamConfig};
pub use consumer::{ConsumerRegistry, StreamWorker, WorkerStatus};
pub use error::{
    ConfigError, HostError, JsonPathError, ListenerError, SchedulerError, StreamHookError, StreamHookResult,
};
pub use processor::{ProcessorFactory, ProcessorState, RecordProcessor};
pub use runtime::StreamHook;
pub use scheduler::{Record, SchedulerProvider, SchedulerSpec, StreamScheduler};
pub use trigger::{
    JsonPath, PayloadProjectExtractor, ScmTriggerListener, SourceDescriptor, SourceEvent, SourceHost, SourceOwner,
};
