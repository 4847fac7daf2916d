//! Action Registry
//!
//! Actions are the only place where a workflow touches the outside world
//! (verification services, databases). The executor calls them through this
//! registry and never performs I/O itself.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::workflow::definition::WorkflowDefinition;

/// Identifies the conversation an action runs for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub session_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl SessionRef {
    pub fn new(session_key: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            locale: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub workflow_id: String,
    pub step_id: String,
    /// Step params resolved against the variables
    pub params: Map<String, Value>,
    /// Snapshot of the variables at call time
    pub variables: Map<String, Value>,
    pub raw_input: String,
    pub session: SessionRef,
}

impl ActionRequest {
    /// A param if declared, otherwise the variable of the same name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .get(name)
            .filter(|v| !v.is_null())
            .or_else(|| self.variables.get(name))
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,

    /// Takes precedence over the step's declared transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_override: Option<String>,

    /// Merged into the workflow variables
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }

    pub fn goto(mut self, step_id: &str) -> Self {
        self.next_step_override = Some(step_id.to_string());
        self
    }

    pub fn with_data(mut self, key: &str, value: Value) -> Self {
        self.data
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }
}

/// Why an action call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    Timeout,
    Error(String),
}

impl ActionFailure {
    /// Short code stored in the `error` variable for error branches.
    pub fn code(&self) -> String {
        match self {
            ActionFailure::Timeout => "timeout".to_string(),
            ActionFailure::Error(message) => message.clone(),
        }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, request: ActionRequest) -> anyhow::Result<ActionResult>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ActionHandler for FnAction<F>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ActionResult>> + Send,
{
    async fn call(&self, request: ActionRequest) -> anyhow::Result<ActionResult> {
        (self.f)(request).await
    }
}

pub fn action_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(ActionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ActionResult>> + Send + 'static,
{
    Arc::new(FnAction { f })
}

/// Maps `(workflow id, action name)` to handlers. Shared handlers answer for
/// every workflow that has no specific registration.
#[derive(Default)]
pub struct ActionRegistry {
    scoped: HashMap<(String, String), Arc<dyn ActionHandler>>,
    shared: HashMap<String, Arc<dyn ActionHandler>>,
    timeout: Option<Duration>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every call; an expired call fails like any other error.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn register(&mut self, workflow_id: &str, name: &str, handler: Arc<dyn ActionHandler>) {
        debug!("Registering action {} for workflow {}", name, workflow_id);
        self.scoped
            .insert((workflow_id.to_string(), name.to_string()), handler);
    }

    pub fn register_shared(&mut self, name: &str, handler: Arc<dyn ActionHandler>) {
        debug!("Registering shared action {}", name);
        self.shared.insert(name.to_string(), handler);
    }

    pub fn get(&self, workflow_id: &str, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.scoped
            .get(&(workflow_id.to_string(), name.to_string()))
            .or_else(|| self.shared.get(name))
            .cloned()
    }

    pub fn contains(&self, workflow_id: &str, name: &str) -> bool {
        self.get(workflow_id, name).is_some()
    }

    /// Actions named by `definition` that have no handler.
    pub fn missing_for(&self, definition: &WorkflowDefinition) -> Vec<String> {
        definition
            .action_names()
            .into_iter()
            .filter(|name| !self.contains(&definition.id, name))
            .map(str::to_string)
            .collect()
    }

    /// Run a handler on its own task so that a panicking handler surfaces
    /// as a failure instead of tearing down the turn.
    pub async fn invoke(
        &self,
        handler: Arc<dyn ActionHandler>,
        request: ActionRequest,
    ) -> Result<ActionResult, ActionFailure> {
        let action_desc = format!("{}/{}", request.workflow_id, request.step_id);
        let mut task = tokio::spawn(async move { handler.call(request).await });

        let joined = match self.timeout {
            Some(limit) => match timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    warn!("Action at {} timed out after {:?}", action_desc, limit);
                    return Err(ActionFailure::Timeout);
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!("Action at {} failed: {}", action_desc, e);
                Err(ActionFailure::Error(e.to_string()))
            }
            Err(e) => {
                error!("Action task at {} aborted: {}", action_desc, e);
                Err(ActionFailure::Error(format!("action task aborted: {}", e)))
            }
        }
    }
}
