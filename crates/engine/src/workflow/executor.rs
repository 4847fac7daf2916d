//! Workflow Executor
//!
//! Advances a [`WorkflowContext`] by one user-visible turn. Interactive
//! steps consume the input; message and service steps run on their own
//! until the graph needs input again or reaches `END`. The executor holds
//! no per-session state: everything lives in the context it is handed.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::{
    metrics,
    workflow::{
        actions::{ActionFailure, ActionRegistry, ActionRequest, ActionResult, SessionRef},
        condition,
        context::WorkflowContext,
        definition::{Progress, StepDefinition, StepKind, Target, WorkflowDefinition, END},
        registry::DefinitionRegistry,
        validator::{self, ErrorReason},
    },
    Error, Result,
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Consecutive message/service steps allowed in one turn
    pub max_auto_steps: usize,
    /// Back-navigation entries kept per context
    pub history_limit: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_auto_steps: 25,
            history_limit: 50,
        }
    }
}

/// Everything a presenter needs to turn a step into a localized message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub workflow_id: String,
    pub step_id: String,
    /// Localization key or literal text
    pub prompt_key: String,
    pub choices: Vec<RenderChoice>,
    pub progress: Option<Progress>,
    pub allow_back: bool,
    /// `false` for a paused message: the caller continues with an empty
    /// input instead of waiting for the user
    pub expects_input: bool,
    pub error: Option<ErrorReason>,
    /// Values available for `{{ path }}` interpolation
    pub variables: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderChoice {
    /// 1-based
    pub index: usize,
    pub id: String,
    pub label_key: String,
}

/// Terminal result of a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// Waiting for the user on `prompt`. `notices` are messages emitted by
    /// automatic steps earlier in the same turn.
    AwaitingInput {
        prompt: RenderRequest,
        notices: Vec<RenderRequest>,
    },
    /// The input was rejected; the same step is re-rendered with the reason.
    ValidationError {
        reason: ErrorReason,
        prompt: RenderRequest,
        attempt: u32,
    },
    /// An action failed and the step has no error branch. The context is
    /// unchanged, so the same input can be retried.
    ServiceError {
        step_id: String,
        failure: ActionFailure,
    },
    Completed {
        final_data: Map<String, Value>,
        notices: Vec<RenderRequest>,
        message: Option<RenderRequest>,
    },
}

impl StepResult {
    pub fn kind(&self) -> &'static str {
        match self {
            StepResult::AwaitingInput { .. } => "awaiting_input",
            StepResult::ValidationError { .. } => "validation_error",
            StepResult::ServiceError { .. } => "service_error",
            StepResult::Completed { .. } => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackNavigation {
    Moved { prompt: RenderRequest },
    NotAllowed,
}

/// What running one step asks the driver to do next.
enum StepOutcome {
    /// Continue with the target right away
    Advance(Target),
    /// Invoke the action and feed its result back
    CallService {
        action: String,
        params: Map<String, Value>,
    },
    /// Stop the turn
    Yield(StepResult),
}

pub struct WorkflowExecutor {
    definitions: Arc<DefinitionRegistry>,
    actions: Arc<ActionRegistry>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        definitions: Arc<DefinitionRegistry>,
        actions: Arc<ActionRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            definitions,
            actions,
            config,
        }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn definition(&self, workflow_id: &str) -> Result<Arc<WorkflowDefinition>> {
        self.definitions
            .get(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))
    }

    /// Create a context for `workflow_id` and run up to its first prompt.
    pub async fn start(
        &self,
        workflow_id: &str,
        session: &SessionRef,
    ) -> Result<(WorkflowContext, StepResult)> {
        let def = self.definition(workflow_id)?;
        info!("Starting workflow {} for session {}", workflow_id, session.session_key);

        let context = WorkflowContext::start(&def.id, &def.start_step_id);
        let snapshot = context.clone();
        let start = Target::Step(def.start_step_id.clone());
        let result = self
            .drive(&def, context, snapshot, StepOutcome::Advance(start), "", session)
            .await;
        self.observe(&def.id, result)
    }

    /// Apply one turn of user input.
    pub async fn process_input(
        &self,
        mut context: WorkflowContext,
        raw_input: &str,
        session: &SessionRef,
    ) -> Result<(WorkflowContext, StepResult)> {
        let workflow_id = context.workflow_id().ok_or(Error::NoActiveWorkflow)?.to_string();
        let def = self.definition(&workflow_id)?;
        let step = self.current_step(&def, &context)?;

        debug!("Processing input for {}/{}", def.id, step.id);
        let snapshot = context.clone();
        let outcome = match self.execute_step(&def, &mut context, step, raw_input) {
            Ok(outcome) => outcome,
            Err(e) => return self.observe(&def.id, Err(e)),
        };
        let result = self
            .drive(&def, context, snapshot, outcome, raw_input, session)
            .await;
        self.observe(&def.id, result)
    }

    /// Step back to the previous interactive step. Collected variables are
    /// kept.
    pub fn go_back(&self, mut context: WorkflowContext) -> Result<(WorkflowContext, BackNavigation)> {
        let workflow_id = context.workflow_id().ok_or(Error::NoActiveWorkflow)?.to_string();
        let def = self.definition(&workflow_id)?;
        let step = self.current_step(&def, &context)?;

        if !step.allow_back || !step.is_interactive() || context.history.len() < 2 {
            debug!("Back navigation not allowed at {}/{}", def.id, step.id);
            return Ok((context, BackNavigation::NotAllowed));
        }

        if context.history.last().map(String::as_str) == Some(step.id.as_str()) {
            context.history.pop();
        }
        let target_id = match context.history.last() {
            Some(id) => id.clone(),
            None => return Ok((context, BackNavigation::NotAllowed)),
        };
        let target = def.step(&target_id).ok_or_else(|| Error::StepNotFound {
            workflow_id: def.id.clone(),
            step_id: target_id.clone(),
        })?;

        info!("Going back from {} to {} in {}", step.id, target.id, def.id);
        context.set_current_step(&target.id);
        context.retry_count = 0;
        let prompt = self.render(&def, target, &context, None);
        Ok((context, BackNavigation::Moved { prompt }))
    }

    /// Forget the workflow. Safe from any state.
    pub fn cancel(&self, mut context: WorkflowContext) -> WorkflowContext {
        if let Some(id) = context.workflow_id() {
            info!("Cancelling workflow {}", id);
        }
        context.clear();
        context
    }

    fn current_step<'a>(
        &self,
        def: &'a WorkflowDefinition,
        context: &WorkflowContext,
    ) -> Result<&'a StepDefinition> {
        let step_id = context.current_step().ok_or(Error::NoActiveWorkflow)?;
        def.step(step_id).ok_or_else(|| Error::StepNotFound {
            workflow_id: def.id.clone(),
            step_id: step_id.to_string(),
        })
    }

    /// Run the step the context is sitting on, consuming the input.
    fn execute_step(
        &self,
        def: &WorkflowDefinition,
        context: &mut WorkflowContext,
        step: &StepDefinition,
        raw_input: &str,
    ) -> Result<StepOutcome> {
        match step_kind(def, step)? {
            kind @ (StepKind::Input | StepKind::Choice) => {
                let validated = if kind == StepKind::Choice {
                    validator::validate_choice(raw_input, &step.choices)
                } else {
                    validator::validate(raw_input, step.validation.as_ref())
                };

                let value = match validated {
                    Ok(value) => value,
                    Err(reason) => {
                        context.retry_count += 1;
                        debug!(
                            "Input rejected at {}/{}: {} (attempt {})",
                            def.id, step.id, reason, context.retry_count
                        );
                        return Ok(StepOutcome::Yield(StepResult::ValidationError {
                            reason,
                            prompt: self.render(def, step, context, Some(reason)),
                            attempt: context.retry_count,
                        }));
                    }
                };

                context.set_variable(&step.id, value);
                context.retry_count = 0;
                context.push_history(&step.id, self.config.history_limit);

                match step.action.as_deref() {
                    Some(action) => Ok(self.call_service(step, action, context)),
                    None => Ok(StepOutcome::Advance(next_target(def, step, context)?)),
                }
            }
            // A paused message continues on any input
            StepKind::Message => Ok(StepOutcome::Advance(next_target(def, step, context)?)),
            StepKind::Service => self.arrive(def, context, step, &mut Vec::new()),
        }
    }

    /// Present a step the context has just moved to.
    fn arrive(
        &self,
        def: &WorkflowDefinition,
        context: &mut WorkflowContext,
        step: &StepDefinition,
        notices: &mut Vec<RenderRequest>,
    ) -> Result<StepOutcome> {
        match step_kind(def, step)? {
            StepKind::Input | StepKind::Choice => {
                context.push_history(&step.id, self.config.history_limit);
                Ok(StepOutcome::Yield(StepResult::AwaitingInput {
                    prompt: self.render(def, step, context, None),
                    notices: std::mem::take(notices),
                }))
            }
            StepKind::Message if step.pause => Ok(StepOutcome::Yield(StepResult::AwaitingInput {
                prompt: self.render(def, step, context, None),
                notices: std::mem::take(notices),
            })),
            StepKind::Message => {
                notices.push(self.render(def, step, context, None));
                Ok(StepOutcome::Advance(next_target(def, step, context)?))
            }
            StepKind::Service => match step.action.as_deref() {
                Some(action) => Ok(self.call_service(step, action, context)),
                None => Ok(StepOutcome::Advance(next_target(def, step, context)?)),
            },
        }
    }

    fn call_service(
        &self,
        step: &StepDefinition,
        action: &str,
        context: &WorkflowContext,
    ) -> StepOutcome {
        let params = step
            .params
            .iter()
            .map(|(name, value)| (name.clone(), value.resolve(&context.variables)))
            .collect();
        StepOutcome::CallService {
            action: action.to_string(),
            params,
        }
    }

    /// Drive outcomes until the turn yields. On a service failure without
    /// an error branch, the context reverts to `snapshot`, its state before
    /// the failing step ran.
    async fn drive(
        &self,
        def: &WorkflowDefinition,
        mut context: WorkflowContext,
        mut snapshot: WorkflowContext,
        first: StepOutcome,
        raw_input: &str,
        session: &SessionRef,
    ) -> Result<(WorkflowContext, StepResult)> {
        let mut notices = Vec::new();
        let mut auto_steps = 0usize;
        let mut outcome = first;

        loop {
            outcome = match outcome {
                StepOutcome::Yield(result) => return Ok((context, result)),

                StepOutcome::CallService { action, params } => {
                    let step = self.current_step(def, &context)?;
                    let called = self
                        .invoke_action(def, &context, &step.id, &action, params, raw_input, session)
                        .await?;

                    match called {
                        Ok(result) if result.success || result.next_step_override.is_some() => {
                            debug!("Action {} succeeded at {}/{}", action, def.id, step.id);
                            context.variables.remove("error");
                            if let Some(data) = result.data {
                                context.merge_variables(data);
                            }
                            match result.next_step_override {
                                Some(target) => StepOutcome::Advance(Target::parse(&target)),
                                None => StepOutcome::Advance(next_target(def, step, &context)?),
                            }
                        }
                        Ok(result) => {
                            let failure = failure_from_result(&result);
                            match self.recover(def, step, &mut context, failure, result.data)? {
                                Ok(target) => StepOutcome::Advance(target),
                                Err(failure) => return Ok((snapshot, service_error(step, failure))),
                            }
                        }
                        Err(failure) => match self.recover(def, step, &mut context, failure, None)? {
                            Ok(target) => StepOutcome::Advance(target),
                            Err(failure) => return Ok((snapshot, service_error(step, failure))),
                        },
                    }
                }

                StepOutcome::Advance(Target::End) => {
                    return self
                        .complete(def, context, snapshot, notices, raw_input, session)
                        .await;
                }

                StepOutcome::Advance(Target::Step(step_id)) => {
                    let step = def.step(&step_id).ok_or_else(|| Error::StepNotFound {
                        workflow_id: def.id.clone(),
                        step_id: step_id.clone(),
                    })?;

                    if !step.is_interactive() && !step.pause {
                        auto_steps += 1;
                        if auto_steps > self.config.max_auto_steps {
                            error!(
                                "Workflow {} stuck after {} automatic steps at {}",
                                def.id, self.config.max_auto_steps, step.id
                            );
                            return Err(Error::WorkflowStuck {
                                workflow_id: def.id.clone(),
                                step_id: step.id.clone(),
                                limit: self.config.max_auto_steps,
                            });
                        }
                    }

                    debug!("Moving to step {}/{}", def.id, step.id);
                    context.set_current_step(&step.id);
                    snapshot = context.clone();
                    self.arrive(def, &mut context, step, &mut notices)?
                }
            };
        }
    }

    /// Follow the step's `onError` branch if it has one. Returns the failure
    /// back when the caller must report a service error.
    fn recover(
        &self,
        def: &WorkflowDefinition,
        step: &StepDefinition,
        context: &mut WorkflowContext,
        failure: ActionFailure,
        data: Option<Map<String, Value>>,
    ) -> Result<std::result::Result<Target, ActionFailure>> {
        let on_error = match step.on_error.as_ref() {
            Some(on_error) => on_error,
            None => return Ok(Err(failure)),
        };

        warn!(
            "Action failed at {}/{} ({}), taking error branch",
            def.id,
            step.id,
            failure.code()
        );
        // The action's own error code wins over the generic one
        let reported = data.as_ref().map_or(false, |data| data.contains_key("error"));
        if let Some(data) = data {
            context.merge_variables(data);
        }
        if !reported {
            context.set_variable("error", Value::String(failure.code()));
        }

        condition::resolve(on_error, &context.variables)
            .map(Ok)
            .ok_or_else(|| Error::UnresolvedTransition {
                workflow_id: def.id.clone(),
                step_id: step.id.clone(),
            })
    }

    async fn complete(
        &self,
        def: &WorkflowDefinition,
        mut context: WorkflowContext,
        snapshot: WorkflowContext,
        notices: Vec<RenderRequest>,
        raw_input: &str,
        session: &SessionRef,
    ) -> Result<(WorkflowContext, StepResult)> {
        let step_id = context.current_step().unwrap_or(END).to_string();

        if let Some(hook) = def.on_complete.as_deref() {
            let called = self
                .invoke_action(def, &context, &step_id, hook, Map::new(), raw_input, session)
                .await?;
            match called {
                Ok(result) if result.success => {
                    if let Some(data) = result.data {
                        context.merge_variables(data);
                    }
                }
                Ok(result) => {
                    return Ok((
                        snapshot,
                        StepResult::ServiceError {
                            step_id,
                            failure: failure_from_result(&result),
                        },
                    ))
                }
                Err(failure) => {
                    return Ok((snapshot, StepResult::ServiceError { step_id, failure }));
                }
            }
        }

        info!("Workflow {} completed", def.id);
        let final_data = std::mem::take(&mut context.variables);
        let message = def.completion_prompt_key.as_ref().map(|key| RenderRequest {
            workflow_id: def.id.clone(),
            step_id: END.to_string(),
            prompt_key: key.clone(),
            choices: Vec::new(),
            progress: None,
            allow_back: false,
            expects_input: false,
            error: None,
            variables: final_data.clone(),
        });
        context.clear();

        Ok((
            context,
            StepResult::Completed {
                final_data,
                notices,
                message,
            },
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn invoke_action(
        &self,
        def: &WorkflowDefinition,
        context: &WorkflowContext,
        step_id: &str,
        action: &str,
        params: Map<String, Value>,
        raw_input: &str,
        session: &SessionRef,
    ) -> Result<std::result::Result<ActionResult, ActionFailure>> {
        let handler = self
            .actions
            .get(&def.id, action)
            .ok_or_else(|| Error::UnknownAction {
                workflow_id: def.id.clone(),
                action: action.to_string(),
            })?;

        info!("Invoking action {} at {}/{}", action, def.id, step_id);
        let request = ActionRequest {
            workflow_id: def.id.clone(),
            step_id: step_id.to_string(),
            params,
            variables: context.variables.clone(),
            raw_input: raw_input.to_string(),
            session: session.clone(),
        };
        Ok(self.actions.invoke(handler, request).await)
    }

    fn render(
        &self,
        def: &WorkflowDefinition,
        step: &StepDefinition,
        context: &WorkflowContext,
        error: Option<ErrorReason>,
    ) -> RenderRequest {
        RenderRequest {
            workflow_id: def.id.clone(),
            step_id: step.id.clone(),
            prompt_key: step.prompt_key.clone(),
            choices: step
                .choices
                .iter()
                .enumerate()
                .map(|(i, choice)| RenderChoice {
                    index: i + 1,
                    id: choice.id.clone(),
                    label_key: choice.label_key.clone(),
                })
                .collect(),
            progress: if def.show_progress {
                def.progress(&step.id)
            } else {
                None
            },
            allow_back: step.allow_back && step.is_interactive() && context.history.len() >= 2,
            expects_input: step.is_interactive(),
            error,
            variables: context.variables.clone(),
        }
    }

    fn observe(
        &self,
        workflow_id: &str,
        result: Result<(WorkflowContext, StepResult)>,
    ) -> Result<(WorkflowContext, StepResult)> {
        match &result {
            Ok((_, step_result)) => metrics::record_turn(workflow_id, step_result.kind()),
            Err(e) if e.is_configuration() => {
                error!("Configuration failure in workflow {}: {}", workflow_id, e);
                metrics::record_turn(workflow_id, "configuration_error");
            }
            Err(_) => {}
        }
        result
    }
}

fn step_kind(def: &WorkflowDefinition, step: &StepDefinition) -> Result<StepKind> {
    step.kind.ok_or_else(|| Error::InvalidDefinition {
        workflow_id: def.id.clone(),
        violations: vec![format!("step `{}` has no kind", step.id)],
    })
}

fn next_target(
    def: &WorkflowDefinition,
    step: &StepDefinition,
    context: &WorkflowContext,
) -> Result<Target> {
    match step.next.as_ref() {
        None => Ok(Target::End),
        Some(next) => {
            condition::resolve(next, &context.variables).ok_or_else(|| Error::UnresolvedTransition {
                workflow_id: def.id.clone(),
                step_id: step.id.clone(),
            })
        }
    }
}

fn failure_from_result(result: &ActionResult) -> ActionFailure {
    let reported = result
        .data
        .as_ref()
        .and_then(|data| data.get("error"))
        .and_then(Value::as_str);
    match reported {
        Some("timeout") => ActionFailure::Timeout,
        Some(message) => ActionFailure::Error(message.to_string()),
        None => ActionFailure::Error("action reported failure".to_string()),
    }
}

fn service_error(step: &StepDefinition, failure: ActionFailure) -> StepResult {
    StepResult::ServiceError {
        step_id: step.id.clone(),
        failure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        actions::action_fn,
        definition::{Branch, ChoiceOption, NextSpec},
        validator::{RuleKind, ValidationRule},
    };
    use serde_json::json;

    fn executor(def: WorkflowDefinition, actions: ActionRegistry) -> WorkflowExecutor {
        let mut definitions = DefinitionRegistry::new();
        definitions.register(def).unwrap();
        WorkflowExecutor::new(
            Arc::new(definitions),
            Arc::new(actions),
            ExecutorConfig::default(),
        )
    }

    fn session() -> SessionRef {
        SessionRef::new("user-1")
    }

    fn profile_flow() -> WorkflowDefinition {
        WorkflowDefinition::new(
            "profile",
            "welcome",
            vec![
                StepDefinition::message("welcome", "profile.welcome").then("ask_email"),
                StepDefinition::input("ask_email", "profile.ask_email")
                    .with_validation(ValidationRule::of_kind(RuleKind::Email))
                    .then("ask_plan"),
                StepDefinition::choice(
                    "ask_plan",
                    "profile.ask_plan",
                    vec![ChoiceOption::new("free", "plan.free"), ChoiceOption::new("pro", "plan.pro")],
                )
                .with_next(NextSpec::branches(vec![
                    Branch::when("ask_plan == \"pro\"", "ask_company"),
                    Branch::otherwise(END),
                ])),
                StepDefinition::input("ask_company", "profile.ask_company").then(END),
            ],
        )
        .with_progress()
        .with_completion_prompt("profile.done")
    }

    #[tokio::test]
    async fn test_start_runs_message_steps_until_input() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let (ctx, result) = exec.start("profile", &session()).await.unwrap();

        assert_eq!(ctx.current_step(), Some("ask_email"));
        assert_eq!(ctx.history, vec!["ask_email"]);
        match result {
            StepResult::AwaitingInput { prompt, notices } => {
                assert_eq!(prompt.step_id, "ask_email");
                assert_eq!(prompt.progress, Some(Progress { current: 1, total: 3 }));
                assert!(!prompt.allow_back);
                assert!(prompt.expects_input);
                assert_eq!(notices.len(), 1);
                assert_eq!(notices[0].prompt_key, "profile.welcome");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_full_walk_to_completion() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let (ctx, _) = exec.start("profile", &session()).await.unwrap();

        let (ctx, result) = exec.process_input(ctx, "Jean@Example.com", &session()).await.unwrap();
        match &result {
            StepResult::AwaitingInput { prompt, .. } => {
                assert_eq!(prompt.step_id, "ask_plan");
                assert!(prompt.allow_back);
                assert_eq!(prompt.choices.len(), 2);
                assert_eq!(prompt.choices[1].index, 2);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let (ctx, _) = exec.process_input(ctx, "2", &session()).await.unwrap();
        assert_eq!(ctx.current_step(), Some("ask_company"));

        let (ctx, result) = exec.process_input(ctx, "ACME", &session()).await.unwrap();
        assert!(!ctx.is_active());
        match result {
            StepResult::Completed { final_data, message, .. } => {
                assert_eq!(final_data["ask_email"], json!("jean@example.com"));
                assert_eq!(final_data["ask_plan"], json!("pro"));
                assert_eq!(final_data["ask_company"], json!("ACME"));
                assert_eq!(message.unwrap().prompt_key, "profile.done");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validation_error_keeps_position() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let (ctx, _) = exec.start("profile", &session()).await.unwrap();

        let (ctx, result) = exec.process_input(ctx, "not-an-email", &session()).await.unwrap();
        assert_eq!(ctx.current_step(), Some("ask_email"));
        assert_eq!(ctx.retry_count, 1);
        assert!(ctx.get_variable("ask_email").is_none());
        match result {
            StepResult::ValidationError { reason, prompt, attempt } => {
                assert_eq!(reason, ErrorReason::InvalidFormat);
                assert_eq!(prompt.error, Some(ErrorReason::InvalidFormat));
                assert_eq!(prompt.step_id, "ask_email");
                assert_eq!(attempt, 1);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let (ctx, result) = exec.process_input(ctx, "", &session()).await.unwrap();
        assert!(matches!(result, StepResult::ValidationError { reason: ErrorReason::Required, attempt: 2, .. }));
        assert_eq!(ctx.retry_count, 2);
    }

    #[tokio::test]
    async fn test_go_back_keeps_variables() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let (ctx, _) = exec.start("profile", &session()).await.unwrap();

        let (ctx, nav) = exec.go_back(ctx).unwrap();
        assert_eq!(nav, BackNavigation::NotAllowed);

        let (ctx, _) = exec.process_input(ctx, "a@b.co", &session()).await.unwrap();
        let (ctx, nav) = exec.go_back(ctx).unwrap();
        match nav {
            BackNavigation::Moved { prompt } => assert_eq!(prompt.step_id, "ask_email"),
            other => panic!("unexpected navigation {:?}", other),
        }
        assert_eq!(ctx.current_step(), Some("ask_email"));
        assert_eq!(ctx.get_variable("ask_email"), Some(&json!("a@b.co")));

        let (ctx, nav) = exec.go_back(ctx).unwrap();
        assert_eq!(nav, BackNavigation::NotAllowed);
        assert_eq!(ctx.history, vec!["ask_email"]);
    }

    #[tokio::test]
    async fn test_paused_message_is_two_phase() {
        let mut actions = ActionRegistry::new();
        actions.register(
            "lookup",
            "search",
            action_fn(|_| async { Ok(ActionResult::ok().with_data("found", json!(true))) }),
        );
        let def = WorkflowDefinition::new(
            "lookup",
            "ask",
            vec![
                StepDefinition::input("ask", "ask").then("searching"),
                StepDefinition::message("searching", "searching").paused().then("search"),
                StepDefinition::service("search", "search").then("done"),
                StepDefinition::input("done", "done").then(END),
            ],
        );
        let exec = executor(def, actions);
        let (ctx, _) = exec.start("lookup", &session()).await.unwrap();

        let (ctx, result) = exec.process_input(ctx, "query", &session()).await.unwrap();
        match result {
            StepResult::AwaitingInput { prompt, .. } => {
                assert_eq!(prompt.step_id, "searching");
                assert!(!prompt.expects_input);
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert!(ctx.get_variable("found").is_none());

        let (ctx, result) = exec.process_input(ctx, "", &session()).await.unwrap();
        assert!(matches!(result, StepResult::AwaitingInput { ref prompt, .. } if prompt.step_id == "done"));
        assert_eq!(ctx.get_variable("found"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_on_error_branch_sets_error_variable() {
        let mut actions = ActionRegistry::new();
        actions.register(
            "lookup",
            "search",
            action_fn(|_| async { Err(anyhow::anyhow!("connection refused")) }),
        );
        let def = WorkflowDefinition::new(
            "lookup",
            "ask",
            vec![
                StepDefinition::input("ask", "ask")
                    .with_action("search")
                    .with_on_error(NextSpec::Step("manual".to_string()))
                    .then(END),
                StepDefinition::input("manual", "manual").then(END),
            ],
        );
        let exec = executor(def, actions);
        let (ctx, _) = exec.start("lookup", &session()).await.unwrap();
        let (ctx, result) = exec.process_input(ctx, "query", &session()).await.unwrap();

        assert!(matches!(result, StepResult::AwaitingInput { ref prompt, .. } if prompt.step_id == "manual"));
        assert_eq!(ctx.get_variable("error"), Some(&json!("connection refused")));
        assert_eq!(ctx.get_variable("ask"), Some(&json!("query")));
    }

    #[tokio::test]
    async fn test_error_variable_tracks_latest_failure() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let mut actions = ActionRegistry::new();
        actions.register(
            "lookup",
            "flaky",
            action_fn(move |_| {
                let call = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    match call {
                        0 => Ok(ActionResult::failed().with_data("error", json!("timeout"))),
                        1 => Err(anyhow::anyhow!("connection refused")),
                        _ => Ok(ActionResult::ok()),
                    }
                }
            }),
        );
        let on_error = || {
            NextSpec::branches(vec![
                Branch::when("error == \"timeout\"", "timed_out"),
                Branch::otherwise("refused"),
            ])
        };
        let def = WorkflowDefinition::new(
            "lookup",
            "ask",
            vec![
                StepDefinition::input("ask", "ask")
                    .with_action("flaky")
                    .with_on_error(on_error())
                    .then(END),
                StepDefinition::input("timed_out", "timed_out")
                    .with_action("flaky")
                    .with_on_error(on_error())
                    .then(END),
                StepDefinition::input("refused", "refused")
                    .with_action("flaky")
                    .with_on_error(on_error())
                    .then("done"),
                StepDefinition::input("done", "done").then(END),
            ],
        );
        let exec = executor(def, actions);
        let (ctx, _) = exec.start("lookup", &session()).await.unwrap();

        let (ctx, result) = exec.process_input(ctx, "first", &session()).await.unwrap();
        assert!(matches!(result, StepResult::AwaitingInput { ref prompt, .. } if prompt.step_id == "timed_out"));
        assert_eq!(ctx.get_variable("error"), Some(&json!("timeout")));

        let (ctx, result) = exec.process_input(ctx, "second", &session()).await.unwrap();
        assert!(matches!(result, StepResult::AwaitingInput { ref prompt, .. } if prompt.step_id == "refused"));
        assert_eq!(ctx.get_variable("error"), Some(&json!("connection refused")));

        let (ctx, result) = exec.process_input(ctx, "third", &session()).await.unwrap();
        assert!(matches!(result, StepResult::AwaitingInput { ref prompt, .. } if prompt.step_id == "done"));
        assert!(ctx.get_variable("error").is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_completion_hook_failure_keeps_context() {
        let mut actions = ActionRegistry::new();
        actions.register(
            "profile",
            "persist",
            action_fn(|_| async { Ok(ActionResult::failed().with_data("error", json!("db down"))) }),
        );
        let def = WorkflowDefinition::new(
            "profile",
            "ask",
            vec![StepDefinition::input("ask", "ask").then(END)],
        )
        .with_on_complete("persist");
        let exec = executor(def, actions);
        let (ctx, _) = exec.start("profile", &session()).await.unwrap();
        let (after, result) = exec.process_input(ctx.clone(), "hello", &session()).await.unwrap();

        assert_eq!(after, ctx);
        assert_eq!(
            result,
            StepResult::ServiceError {
                step_id: "ask".to_string(),
                failure: ActionFailure::Error("db down".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_unregistered_action_is_configuration_error() {
        let def = WorkflowDefinition::new(
            "flow",
            "ask",
            vec![StepDefinition::input("ask", "ask").with_action("missing").then(END)],
        );
        let exec = executor(def, ActionRegistry::new());
        let (ctx, _) = exec.start("flow", &session()).await.unwrap();
        let err = exec.process_input(ctx, "x", &session()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownAction { .. }));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_inactive_context_is_rejected() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let err = exec
            .process_input(WorkflowContext::new(), "hi", &session())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveWorkflow));
    }

    #[tokio::test]
    async fn test_cancel_clears_everything() {
        let exec = executor(profile_flow(), ActionRegistry::new());
        let (ctx, _) = exec.start("profile", &session()).await.unwrap();
        let ctx = exec.cancel(ctx);
        assert!(!ctx.is_active());
        assert!(ctx.variables.is_empty());
        // Cancelling twice is harmless
        let ctx = exec.cancel(ctx);
        assert!(!ctx.is_active());
    }
}
