//! Per-superjob submission options.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EngineError;

/// Options stored with a superjob at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Human-readable label.
    #[serde(default, alias = "name")]
    pub label: Option<String>,
    /// Delete the task records once the superjob completes.
    /// `None` falls back to the engine default.
    #[serde(default)]
    pub delete_records_on_completion: Option<bool>,
    /// Metadata copied onto every task record and dispatch.
    #[serde(default)]
    pub meta: Option<Value>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set whether records are deleted on completion.
    pub fn with_delete_records_on_completion(mut self, delete: bool) -> Self {
        self.delete_records_on_completion = Some(delete);
        self
    }

    /// Set the metadata.
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Split positional arguments from a trailing options object.
///
/// The last value is read as options only when there is exactly one value
/// more than the workflow declares and that value is a JSON object.
pub fn split_trailing_options(
    arity: usize,
    mut args: Vec<Value>,
) -> Result<(Vec<Value>, SubmitOptions), EngineError> {
    if args.len() == arity + 1 && args.last().is_some_and(Value::is_object) {
        let options = args.pop().unwrap_or_default();
        let options = serde_json::from_value(options)
            .map_err(|e| EngineError::InvalidOptions(e.to_string()))?;
        return Ok((args, options));
    }
    Ok((args, SubmitOptions::default()))
}
