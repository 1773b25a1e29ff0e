//! Loading Task objects from multi-document YAML manifests.

use std::path::Path;

use cnat_core::Error;
use serde::Deserialize;
use tracing::warn;

use crate::types::{Task, TASK_KIND};

/// Parse every `kind: Task` document in a YAML stream.
///
/// Documents of other kinds are skipped with a warning.
///
/// # Errors
///
/// Returns [`Error::YamlParseFailed`] when a document is not valid YAML or a
/// Task document does not match the Task schema.
pub fn parse_tasks(input: &str) -> cnat_core::Result<Vec<Task>> {
    let mut tasks = Vec::new();
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let kind = value.get("kind").and_then(serde_yaml::Value::as_str);
        if kind != Some(TASK_KIND) {
            warn!(kind = ?kind, "Skipping manifest document that is not a Task");
            continue;
        }
        let task: Task =
            serde_yaml::from_value(value).map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        tasks.push(task);
    }
    Ok(tasks)
}

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns [`Error::FileReadFailed`] when the file cannot be read, or a parse
/// error from [`parse_tasks`].
pub fn load_tasks(path: &Path) -> cnat_core::Result<Vec<Task>> {
    let input = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
    parse_tasks(&input)
}
