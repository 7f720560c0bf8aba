//! Consumer configuration.
//!
//! `GlobalConfig` is owned by the host and handed to the core at start and
//! restart time. `ConfigStore` keeps the current snapshot, validates changes at
//! the boundary, and notifies listeners so running consumers can be restarted.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use url::Url;

use crate::error::ConfigError;
use crate::trigger::json_path::JsonPath;

/// Default bound on the graceful-shutdown wait of a single worker.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Where a fresh lease starts reading a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitialPosition {
    /// Only records arriving after the consumer starts.
    #[default]
    Latest,
    /// The oldest record still retained by the stream.
    TrimHorizon,
}

impl InitialPosition {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Latest => "LATEST",
            Self::TrimHorizon => "TRIM_HORIZON",
        }
    }
}

impl fmt::Display for InitialPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InitialPosition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.eq_ignore_ascii_case("LATEST") {
            Ok(Self::Latest)
        } else if value.eq_ignore_ascii_case("TRIM_HORIZON") {
            Ok(Self::TrimHorizon)
        } else {
            Err(ConfigError::InvalidInitialPosition {
                value: s.to_string(),
            })
        }
    }
}

/// Per-stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    /// Unique stream name.
    pub stream_name: String,
    /// Starting position for shards without a checkpoint.
    #[serde(default)]
    pub initial_position: InitialPosition,
    /// JSON path selecting the project identifier in each payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_field_path: Option<String>,
    /// Whether matching payloads request downstream source updates.
    #[serde(default)]
    pub trigger_downstream: bool,
}

impl StreamConfig {
    /// A stream with default position and no downstream trigger.
    #[must_use]
    pub fn new(stream_name: impl AsRef<str>) -> Self {
        Self {
            stream_name: stream_name.as_ref().trim().to_string(),
            initial_position: InitialPosition::default(),
            project_field_path: None,
            trigger_downstream: false,
        }
    }

    /// Set the initial position.
    #[must_use]
    pub fn with_initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = position;
        self
    }

    /// Enable downstream triggering using `path` to find the project.
    #[must_use]
    pub fn with_trigger(mut self, path: impl Into<String>) -> Self {
        self.project_field_path = Some(path.into());
        self.trigger_downstream = true;
        self
    }

    /// Set the project path without enabling the trigger.
    #[must_use]
    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.project_field_path = Some(path.into());
        self
    }
}

/// Settings shared by every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Region override for every remote client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Endpoint override, e.g. a local stack at `http://localhost:4566`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_endpoint_override: Option<String>,
    /// Namespace for lease tables and metrics.
    pub application_name: String,
    /// Bound on each worker's graceful-shutdown wait.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Configured streams, in order.
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl GlobalConfig {
    /// An enabled configuration with no streams.
    #[must_use]
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            region: None,
            local_endpoint_override: None,
            application_name: application_name.into(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            streams: Vec::new(),
        }
    }

    /// Append a stream.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the endpoint override.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.local_endpoint_override = Some(endpoint.into());
        self
    }

    /// Set the shutdown wait bound.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Toggle the master switch.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Parse from JSON text. The result is not validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` on malformed input.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Read and parse a JSON file. The result is not validated.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` or `ConfigError::Parse`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            message: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// The shutdown wait bound as a `Duration`.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// True when consumers should be started for this configuration.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && !self.streams.is_empty()
    }

    /// Look up a stream by name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::StreamNotConfigured` when absent.
    pub fn stream(&self, stream_name: &str) -> Result<&StreamConfig, ConfigError> {
        self.streams
            .iter()
            .find(|s| s.stream_name == stream_name)
            .ok_or_else(|| ConfigError::StreamNotConfigured {
                stream: stream_name.to_string(),
            })
    }

    /// Lease and metrics namespace for a stream: `{application}-{stream}`.
    #[must_use]
    pub fn lease_namespace(&self, stream_name: &str) -> String {
        format!("{}-{}", self.application_name, stream_name)
    }

    /// Worker identity for a stream: `worker-{application}-{stream}`.
    #[must_use]
    pub fn worker_identifier(&self, stream_name: &str) -> String {
        format!("worker-{}-{}", self.application_name, stream_name)
    }

    /// Parsed endpoint override, if any.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEndpoint` when the value is not an absolute URL.
    pub fn endpoint_url(&self) -> Result<Option<Url>, ConfigError> {
        match self.local_endpoint_override.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => Url::parse(raw).map(Some).map_err(|e| ConfigError::InvalidEndpoint {
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Check every boundary rule.
    ///
    /// # Errors
    ///
    /// Returns the first rule violated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.trim().is_empty() {
            return Err(ConfigError::EmptyApplicationName);
        }

        if let Some(region) = self.region.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            if !is_valid_region(region) {
                return Err(ConfigError::InvalidRegion {
                    value: region.to_string(),
                });
            }
        }

        self.endpoint_url()?;

        let mut seen = HashSet::with_capacity(self.streams.len());
        for stream in &self.streams {
            let name = stream.stream_name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyStreamName);
            }
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateStream {
                    stream: name.to_string(),
                });
            }

            match stream.project_field_path.as_deref().map(str::trim) {
                Some(path) if !path.is_empty() => {
                    JsonPath::compile(path).map_err(|source| ConfigError::InvalidProjectPath {
                        stream: name.to_string(),
                        source,
                    })?;
                }
                _ if stream.trigger_downstream => {
                    return Err(ConfigError::MissingProjectPath {
                        stream: name.to_string(),
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]?)?-[a-z]+-\d{1,2}$").expect("region pattern is valid")
    })
}

/// True when `region` has the `xx-name-N` shape.
#[must_use]
pub fn is_valid_region(region: &str) -> bool {
    region_pattern().is_match(region)
}

/// Reacts to configuration changes.
pub trait ConfigListener: Send + Sync {
    /// Called after a new configuration has been accepted.
    fn on_config_changed(&self, config: &Arc<GlobalConfig>);
}

/// Holds the current configuration and fans out change notifications.
pub struct ConfigStore {
    current: RwLock<Arc<GlobalConfig>>,
    listeners: RwLock<Vec<Arc<dyn ConfigListener>>>,
    // Held from install until every listener has been notified.
    saving: Mutex<()>,
}

impl ConfigStore {
    /// Create a store around an initial configuration (not validated).
    #[must_use]
    pub fn new(initial: GlobalConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            listeners: RwLock::new(Vec::new()),
            saving: Mutex::new(()),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<GlobalConfig> {
        self.current.read().clone()
    }

    /// Subscribe to accepted changes.
    pub fn add_listener(&self, listener: Arc<dyn ConfigListener>) {
        self.listeners.write().push(listener);
    }

    /// Validate and install a new configuration, then notify listeners.
    ///
    /// Concurrent saves are applied one at a time, so the last notification
    /// always carries the configuration that ends up current. A listener must
    /// not call `save` on the same store.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the previous configuration stays current.
    pub fn save(&self, config: GlobalConfig) -> Result<(), ConfigError> {
        if let Err(e) = config.validate() {
            error!(error = %e, "rejected configuration change");
            return Err(e);
        }

        let config = Arc::new(config);
        let _saving = self.saving.lock();
        *self.current.write() = Arc::clone(&config);
        info!(
            application = %config.application_name,
            streams = config.streams.len(),
            "configuration updated, notifying listeners"
        );

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_config_changed(&config);
        }
        Ok(())
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("current", &*self.current.read())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn valid() -> GlobalConfig {
        GlobalConfig::new("ci")
            .with_region("eu-west-1")
            .with_endpoint("http://localhost:4566")
            .with_stream(StreamConfig::new("gerrit").with_trigger("$.project"))
            .with_stream(StreamConfig::new("audit"))
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let cfg = GlobalConfig::from_json_str(
            r#"{"applicationName":"ci","streams":[{"streamName":"s"}]}"#,
        )
        .unwrap();
        assert!(!cfg.enabled);
        assert_eq!(cfg.shutdown_timeout_ms, DEFAULT_SHUTDOWN_TIMEOUT_MS);
        assert_eq!(cfg.streams[0].initial_position, InitialPosition::Latest);
        assert!(!cfg.streams[0].trigger_downstream);
        assert!(cfg.streams[0].project_field_path.is_none());
    }

    #[test]
    fn parses_full_document() {
        let cfg = GlobalConfig::from_json_str(
            r#"{
                "enabled": true,
                "region": "us-east-1",
                "localEndpointOverride": "http://localhost:4566",
                "applicationName": "ci",
                "shutdownTimeoutMs": 250,
                "streams": [{
                    "streamName": "gerrit",
                    "initialPosition": "TRIM_HORIZON",
                    "projectFieldPath": "$.project",
                    "triggerDownstream": true
                }]
            }"#,
        )
        .unwrap();
        assert!(cfg.is_active());
        assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.streams[0].initial_position, InitialPosition::TrimHorizon);
        cfg.validate().unwrap();
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"enabled":true,"applicationName":"ci"}}"#).unwrap();
        let cfg = GlobalConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.application_name, "ci");
        assert!(!cfg.is_active());

        let missing = GlobalConfig::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = GlobalConfig::from_json_str("{").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn initial_position_parses_case_insensitively() {
        assert_eq!("latest".parse::<InitialPosition>().unwrap(), InitialPosition::Latest);
        assert_eq!(
            " Trim_Horizon ".parse::<InitialPosition>().unwrap(),
            InitialPosition::TrimHorizon
        );
        assert!("EARLIEST".parse::<InitialPosition>().is_err());
        assert_eq!(InitialPosition::TrimHorizon.to_string(), "TRIM_HORIZON");
    }

    #[test]
    fn stream_names_are_trimmed() {
        assert_eq!(StreamConfig::new("  gerrit ").stream_name, "gerrit");
    }

    #[test]
    fn naming_is_namespaced_by_application() {
        let cfg = valid();
        assert_eq!(cfg.lease_namespace("gerrit"), "ci-gerrit");
        assert_eq!(cfg.worker_identifier("gerrit"), "worker-ci-gerrit");
    }

    #[test]
    fn stream_lookup() {
        let cfg = valid();
        assert!(cfg.stream("gerrit").unwrap().trigger_downstream);
        assert!(matches!(
            cfg.stream("nope"),
            Err(ConfigError::StreamNotConfigured { .. })
        ));
    }

    #[test]
    fn validate_accepts_valid_config() {
        valid().validate().unwrap();
    }

    #[test]
    fn validate_rejects_boundary_violations() {
        let err = GlobalConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyApplicationName));

        let err = valid().with_region("moon-base").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegion { .. }));

        let err = valid().with_endpoint("localhost 4566").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEndpoint { .. }));

        let err = valid().with_stream(StreamConfig::new("   ")).validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyStreamName));

        let err = valid().with_stream(StreamConfig::new("audit")).validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStream { .. }));

        let mut no_path = StreamConfig::new("x");
        no_path.trigger_downstream = true;
        let err = valid().with_stream(no_path).validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingProjectPath { .. }));

        let err = valid()
            .with_stream(StreamConfig::new("y").with_project_path("project"))
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProjectPath { .. }));
    }

    #[test]
    fn region_shapes() {
        assert!(is_valid_region("us-east-1"));
        assert!(is_valid_region("us-gov-west-1"));
        assert!(is_valid_region("ap-southeast-2"));
        assert!(!is_valid_region("US-EAST-1"));
        assert!(!is_valid_region("useast1"));
    }

    struct Counting(AtomicUsize);

    impl ConfigListener for Counting {
        fn on_config_changed(&self, _config: &Arc<GlobalConfig>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn store_notifies_only_on_accepted_change() {
        let store = ConfigStore::new(GlobalConfig::new("ci"));
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        store.add_listener(counter.clone());

        store.save(valid()).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.current().streams.len(), 2);

        assert!(store.save(GlobalConfig::new("")).is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(store.current().application_name, "ci");
    }

    /// Remembers the last notified stream names; slow for configs naming `slow`.
    struct LastNotified {
        slow: &'static str,
        last: Mutex<Vec<String>>,
    }

    impl ConfigListener for LastNotified {
        fn on_config_changed(&self, config: &Arc<GlobalConfig>) {
            let names: Vec<String> = config.streams.iter().map(|s| s.stream_name.clone()).collect();
            if names.iter().any(|n| n == self.slow) {
                std::thread::sleep(Duration::from_millis(100));
            }
            *self.last.lock() = names;
        }
    }

    #[test]
    fn overlapping_saves_notify_in_install_order() {
        let store = Arc::new(ConfigStore::new(GlobalConfig::new("ci")));
        let listener = Arc::new(LastNotified {
            slow: "a",
            last: Mutex::new(Vec::new()),
        });
        store.add_listener(listener.clone());

        let first = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.save(GlobalConfig::new("ci").with_stream(StreamConfig::new("a"))))
        };
        std::thread::sleep(Duration::from_millis(30));
        store
            .save(GlobalConfig::new("ci").with_stream(StreamConfig::new("b")))
            .unwrap();
        first.join().unwrap().unwrap();

        let current: Vec<String> = store.current().streams.iter().map(|s| s.stream_name.clone()).collect();
        assert_eq!(current, vec!["b".to_string()]);
        assert_eq!(*listener.last.lock(), current);
    }
}
