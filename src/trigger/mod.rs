//! Conditional downstream triggering.
//!
//! Records whose stream enables `triggerDownstream` are parsed as JSON, the
//! configured path selects a project identifier, and every host source whose
//! remote ends with that project is asked to rescan.

pub mod extractor;
pub mod json_path;
pub mod scm;

pub use extractor::PayloadProjectExtractor;
pub use json_path::{JsonPath, PathStep};
pub use scm::{ScmTriggerListener, SourceDescriptor, SourceEvent, SourceEventKind, SourceHost, SourceOwner};
