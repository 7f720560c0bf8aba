//! Source-control trigger: turns records into "project updated" requests.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::Observer;
use crate::config::ConfigStore;
use crate::error::{HostError, ListenerError};

use super::extractor::PayloadProjectExtractor;

/// A downstream source known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// A git repository, identified by its remote.
    Git {
        /// Source id within its owner.
        id: String,
        /// Remote URL or scp-style address.
        remote: String,
    },
    /// Anything the trigger cannot match against.
    Other {
        /// Source id within its owner.
        id: String,
    },
}

impl SourceDescriptor {
    #[allow(missing_docs)]
    #[must_use]
    pub fn git(id: impl Into<String>, remote: impl Into<String>) -> Self {
        Self::Git {
            id: id.into(),
            remote: remote.into(),
        }
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Git { id, .. } | Self::Other { id } => id,
        }
    }

    /// Remote identity, for matchable sources.
    #[must_use]
    pub fn remote(&self) -> Option<&str> {
        match self {
            Self::Git { remote, .. } => Some(remote),
            Self::Other { .. } => None,
        }
    }
}

/// What happened to a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceEventKind {
    /// New commits may be available; rescan.
    Updated,
}

/// Update request raised for sources matching a record's project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Event kind.
    pub kind: SourceEventKind,
    /// Raw record payload.
    pub payload: String,
    /// Project extracted from the payload.
    pub project: String,
    /// `stream|{stream name}`.
    pub origin: String,
    /// When the event was raised.
    pub raised_at: DateTime<Utc>,
}

impl SourceEvent {
    /// An update event for `project` seen on `stream_name`.
    #[must_use]
    pub fn updated(stream_name: &str, project: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: SourceEventKind::Updated,
            payload: payload.into(),
            project: project.into(),
            origin: format!("stream|{stream_name}"),
            raised_at: Utc::now(),
        }
    }

    /// Whether `source` refers to this event's project.
    ///
    /// Only git sources match; the remote, minus one trailing `.git`, must
    /// end with the project. An empty project matches nothing.
    #[must_use]
    pub fn is_match(&self, source: &SourceDescriptor) -> bool {
        if self.project.is_empty() {
            return false;
        }
        source.remote().is_some_and(|remote| {
            let remote = remote.strip_suffix(".git").unwrap_or(remote);
            remote.ends_with(self.project.as_str())
        })
    }
}

impl fmt::Display for SourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} from {}", self.kind, self.project, self.origin)
    }
}

/// A host job that owns sources.
pub trait SourceOwner: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Sources configured on this job.
    fn sources(&self) -> Vec<SourceDescriptor>;

    /// Ask the job to rescan `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`HostError`] when the host rejects the request.
    fn on_source_updated(&self, source: &SourceDescriptor, event: &SourceEvent) -> Result<(), HostError>;
}

/// Enumerates the host's jobs.
pub trait SourceHost: Send + Sync {
    /// Every job that currently owns sources.
    fn source_owners(&self) -> Vec<Arc<dyn SourceOwner>>;
}

/// Observer requesting rescans of sources whose remote matches the record's project.
pub struct ScmTriggerListener {
    extractor: PayloadProjectExtractor,
    host: Arc<dyn SourceHost>,
}

impl fmt::Debug for ScmTriggerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScmTriggerListener")
            .field("extractor", &self.extractor)
            .finish_non_exhaustive()
    }
}

impl ScmTriggerListener {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(config: Arc<ConfigStore>, host: Arc<dyn SourceHost>) -> Self {
        Self {
            extractor: PayloadProjectExtractor::new(config),
            host,
        }
    }

    /// Notify every matching source. Returns how many were notified.
    ///
    /// Scans all sources of all jobs on every call.
    pub fn notify_matching(&self, stream_name: &str, payload: &str) -> usize {
        let Some(project) = self.extractor.extract_project(stream_name, payload) else {
            return 0;
        };

        let event = SourceEvent::updated(stream_name, project, payload);
        let mut notified = 0;
        for owner in self.host.source_owners() {
            for source in owner.sources() {
                if !event.is_match(&source) {
                    continue;
                }
                info!(
                    stream = stream_name,
                    project = %event.project,
                    job = owner.name(),
                    source = source.id(),
                    "requesting source update"
                );
                match owner.on_source_updated(&source, &event) {
                    Ok(()) => notified += 1,
                    Err(e) => warn!(job = owner.name(), source = source.id(), error = %e, "source update rejected"),
                }
            }
        }

        if notified == 0 {
            debug!(stream = stream_name, project = %event.project, "no matching sources");
        }
        notified
    }
}

impl Observer for ScmTriggerListener {
    fn name(&self) -> &str {
        "scm-trigger"
    }

    fn on_receive(&self, stream_name: &str, payload: &[u8]) -> Result<(), ListenerError> {
        let payload = String::from_utf8_lossy(payload);
        self.notify_matching(stream_name, &payload);
        Ok(())
    }
}
