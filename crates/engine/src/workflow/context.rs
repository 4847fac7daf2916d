use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-session state of one in-progress workflow.
///
/// Everything the executor needs between turns lives here, so a context
/// reloaded from the session store behaves exactly like the one that was
/// saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    /// Workflow being run, `None` once completed or cancelled
    pub workflow_id: Option<String>,

    /// Step waiting for input (or about to run)
    pub current_step_id: Option<String>,

    /// Collected answers and action data
    #[serde(default)]
    pub variables: Map<String, Value>,

    /// Interactive steps visited, most recent last
    #[serde(default)]
    pub history: Vec<String>,

    pub started_at: Option<DateTime<Utc>>,

    /// Failed validation attempts on the current step
    #[serde(default)]
    pub retry_count: u32,

    /// Monotonic write version, checked by the session store
    #[serde(default)]
    pub version: u64,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh context positioned on `start_step_id`.
    pub fn start(workflow_id: &str, start_step_id: &str) -> Self {
        Self {
            workflow_id: Some(workflow_id.to_string()),
            current_step_id: Some(start_step_id.to_string()),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.workflow_id.is_some() && self.current_step_id.is_some()
    }

    pub fn workflow_id(&self) -> Option<&str> {
        self.workflow_id.as_deref()
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step_id.as_deref()
    }

    pub fn set_current_step(&mut self, step_id: &str) {
        if self.current_step_id.as_deref() != Some(step_id) {
            self.retry_count = 0;
        }
        self.current_step_id = Some(step_id.to_string());
    }

    pub fn set_variable(&mut self, key: &str, value: Value) {
        self.variables.insert(key.to_string(), value);
    }

    pub fn get_variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Shallow-merge action data into the variables.
    pub fn merge_variables(&mut self, data: Map<String, Value>) {
        for (key, value) in data {
            self.variables.insert(key, value);
        }
    }

    /// Record a visited interactive step, keeping at most `limit` entries.
    pub fn push_history(&mut self, step_id: &str, limit: usize) {
        if self.history.last().map(String::as_str) == Some(step_id) {
            return;
        }
        self.history.push(step_id.to_string());
        if self.history.len() > limit {
            let overflow = self.history.len() - limit;
            self.history.drain(..overflow);
        }
    }

    /// Drop everything tied to the workflow. The version survives so that a
    /// later save still detects concurrent writers.
    pub fn clear(&mut self) {
        self.workflow_id = None;
        self.current_step_id = None;
        self.variables.clear();
        self.history.clear();
        self.started_at = None;
        self.retry_count = 0;
    }

    /// Convert the context to JSON for storage or transmission
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Create a context from JSON
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}
