use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ConfigStore;
use crate::error::JsonPathError;

use super::json_path::JsonPath;

/// Pulls the project identifier out of a record payload.
///
/// The path comes from the stream's configuration at call time, so saved
/// configuration changes apply to the next record. Compiled paths are cached
/// by expression.
#[derive(Debug)]
pub struct PayloadProjectExtractor {
    config: Arc<ConfigStore>,
    compiled: DashMap<String, JsonPath>,
}

impl PayloadProjectExtractor {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            compiled: DashMap::new(),
        }
    }

    /// Extract the project for a record received on `stream_name`.
    ///
    /// Returns `None` when the stream does not trigger downstream updates,
    /// is unknown, the payload is not JSON, or the path selects nothing
    /// usable. Only the first selected value is considered.
    #[must_use]
    pub fn extract_project(&self, stream_name: &str, payload: &str) -> Option<String> {
        let config = self.config.current();
        let stream = match config.stream(stream_name) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(stream = stream_name, error = %e, "cannot extract project");
                return None;
            }
        };

        if !stream.trigger_downstream {
            debug!(stream = stream_name, "downstream trigger disabled");
            return None;
        }

        let Some(expr) = stream.project_field_path.as_deref() else {
            warn!(stream = stream_name, "no project field path configured");
            return None;
        };

        let path = match self.path(expr) {
            Ok(path) => path,
            Err(e) => {
                warn!(stream = stream_name, path = expr, error = %e, "invalid project field path");
                return None;
            }
        };

        let document: Value = match serde_json::from_str(payload) {
            Ok(document) => document,
            Err(e) => {
                warn!(stream = stream_name, error = %e, "payload is not valid JSON");
                return None;
            }
        };

        let project = path.first(&document).and_then(scalar_text);
        if project.is_none() {
            warn!(stream = stream_name, path = expr, "project field not found in payload");
        }
        project
    }

    fn path(&self, expr: &str) -> Result<JsonPath, JsonPathError> {
        if let Some(path) = self.compiled.get(expr) {
            return Ok(path.value().clone());
        }
        let path = JsonPath::compile(expr)?;
        self.compiled.insert(expr.to_string(), path.clone());
        Ok(path)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
