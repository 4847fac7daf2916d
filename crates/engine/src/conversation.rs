//! Conversation Service
//!
//! The port a channel adapter talks to. It loads the session, hands the
//! context to the executor and saves the result, one turn at a time per
//! session. A save that finds the stored version moved (the session was
//! cancelled or restarted meanwhile) is retried once against the fresh
//! state, and only if the same workflow is still running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::CommandConfig,
    metrics,
    session::SessionStore,
    workflow::{BackNavigation, SessionRef, StepResult, WorkflowContext, WorkflowExecutor},
    Error, Result,
};

/// What the channel should show after a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Step(StepResult),
    Back(BackNavigation),
    Cancelled,
    /// No workflow running and nothing to start
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemCommand {
    Back,
    Cancel,
    Restart,
}

impl SystemCommand {
    fn label(&self) -> &'static str {
        match self {
            SystemCommand::Back => "back",
            SystemCommand::Cancel => "cancel",
            SystemCommand::Restart => "restart",
        }
    }
}

enum Turn<'a> {
    Start(&'a str),
    Input(&'a str),
    Back,
}

pub struct ConversationService {
    executor: Arc<WorkflowExecutor>,
    store: Arc<dyn SessionStore>,
    commands: CommandConfig,
    auto_start: Option<String>,
    locks: Arc<LockTable>,
}

type LockTable = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// A session's turn lock, checked out of the table. Dropping it removes the
/// table entry once no other turn holds or waits on it, including when the
/// turn future is dropped midway.
struct LockLease {
    table: Arc<LockTable>,
    session_key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one here
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.session_key);
        }
    }
}

impl ConversationService {
    /// Fails if a registered workflow names an action with no handler, or if
    /// the auto-start workflow is unknown.
    pub fn new(
        executor: Arc<WorkflowExecutor>,
        store: Arc<dyn SessionStore>,
        commands: CommandConfig,
        auto_start: Option<String>,
    ) -> Result<Self> {
        let mut problems = Vec::new();
        for id in executor.definitions().ids() {
            if let Some(def) = executor.definitions().get(id) {
                let missing = executor.actions().missing_for(&def);
                if !missing.is_empty() {
                    problems.push(format!("workflow `{}` uses unregistered actions: {}", id, missing.join(", ")));
                }
            }
        }
        if !problems.is_empty() {
            return Err(Error::Config(problems.join("; ")));
        }

        if let Some(workflow_id) = auto_start.as_deref() {
            executor.definition(workflow_id)?;
        }

        Ok(Self {
            executor,
            store,
            commands,
            auto_start,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    /// Start (or restart) `workflow_id`, replacing any running workflow.
    pub async fn start_workflow(&self, session: &SessionRef, workflow_id: &str) -> Result<StepResult> {
        match self.run(session, Turn::Start(workflow_id)).await? {
            Reply::Step(result) => Ok(result),
            other => Err(Error::Internal(format!("unexpected reply to start: {:?}", other))),
        }
    }

    pub async fn handle_input(&self, session: &SessionRef, raw_input: &str) -> Result<Reply> {
        self.run(session, Turn::Input(raw_input)).await
    }

    pub async fn go_back(&self, session: &SessionRef) -> Result<BackNavigation> {
        match self.run(session, Turn::Back).await? {
            Reply::Back(navigation) => Ok(navigation),
            _ => Ok(BackNavigation::NotAllowed),
        }
    }

    /// Clear the session right away, without waiting for an in-flight
    /// turn. That turn's save then conflicts and its result is dropped.
    pub async fn cancel(&self, session_key: &str) -> Result<()> {
        info!("Cancelling session {}", session_key);
        metrics::record_system_command(SystemCommand::Cancel.label());
        self.store.clear(session_key).await
    }

    pub async fn context(&self, session_key: &str) -> Result<Option<WorkflowContext>> {
        self.store.load(session_key).await
    }

    async fn run(&self, session: &SessionRef, turn: Turn<'_>) -> Result<Reply> {
        let key = session.session_key.as_str();
        let lease = self.session_lock(key);
        let result = {
            let _guard = lease.lock.lock().await;
            self.run_locked(session, &turn).await
        };
        drop(lease);

        if let Err(e) = &result {
            if e.is_configuration() {
                error!("Configuration error in session {}: {}", key, e);
            }
        }
        result
    }

    async fn run_locked(&self, session: &SessionRef, turn: &Turn<'_>) -> Result<Reply> {
        let key = session.session_key.as_str();
        let mut retried = false;

        loop {
            let stored = self.store.load(key).await?;
            let expected = stored.as_ref().map(|context| context.version);
            let context = stored.unwrap_or_default();
            let running = context.workflow_id.clone();

            let (next, reply) = self.apply(session, context, turn).await?;
            let mut next = match next {
                Some(next) => next,
                None => return Ok(reply),
            };
            next.version = expected.unwrap_or(0) + 1;

            match self.store.save(key, &next, expected).await {
                Ok(()) => {
                    debug!("Session {} saved at version {}", key, next.version);
                    return Ok(reply);
                }
                Err(e @ Error::VersionConflict { .. }) => {
                    metrics::record_version_conflict();
                    if retried {
                        warn!("Giving up on session {} after a second conflict", key);
                        return Err(e);
                    }
                    let current = self.store.load(key).await?;
                    let now_running = current.and_then(|context| context.workflow_id);
                    if now_running != running {
                        warn!("Session {} changed workflow during the turn, dropping its result", key);
                        return Err(e);
                    }
                    info!("Version conflict on session {}, retrying the turn", key);
                    retried = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Compute the new context and the reply. `None` means nothing to save.
    async fn apply(
        &self,
        session: &SessionRef,
        context: WorkflowContext,
        turn: &Turn<'_>,
    ) -> Result<(Option<WorkflowContext>, Reply)> {
        match turn {
            Turn::Start(workflow_id) => self.start(session, context, workflow_id).await,
            Turn::Back => {
                if !context.is_active() {
                    return Ok((None, Reply::Back(BackNavigation::NotAllowed)));
                }
                let (next, navigation) = self.executor.go_back(context)?;
                if matches!(navigation, BackNavigation::Moved { .. }) {
                    metrics::record_system_command(SystemCommand::Back.label());
                    Ok((Some(next), Reply::Back(navigation)))
                } else {
                    Ok((None, Reply::Back(navigation)))
                }
            }
            Turn::Input(raw_input) => {
                if !context.is_active() {
                    return match self.auto_start.as_deref() {
                        Some(workflow_id) => {
                            info!("Auto-starting {} for session {}", workflow_id, session.session_key);
                            self.start(session, context, workflow_id).await
                        }
                        None => Ok((None, Reply::Idle)),
                    };
                }

                if let Some(command) = self.system_command(&context, raw_input)? {
                    metrics::record_system_command(command.label());
                    return match command {
                        SystemCommand::Back => {
                            let (next, navigation) = self.executor.go_back(context)?;
                            Ok((Some(next), Reply::Back(navigation)))
                        }
                        SystemCommand::Cancel => {
                            Ok((Some(self.executor.cancel(context)), Reply::Cancelled))
                        }
                        SystemCommand::Restart => {
                            let workflow_id = context.workflow_id().unwrap_or_default().to_string();
                            self.start(session, context, &workflow_id).await
                        }
                    };
                }

                let (next, result) = self.executor.process_input(context, raw_input, session).await?;
                Ok((Some(next), Reply::Step(result)))
            }
        }
    }

    async fn start(
        &self,
        session: &SessionRef,
        previous: WorkflowContext,
        workflow_id: &str,
    ) -> Result<(Option<WorkflowContext>, Reply)> {
        if let Some(running) = previous.workflow_id() {
            info!("Replacing workflow {} with {} for session {}", running, workflow_id, session.session_key);
        }
        let (next, result) = self.executor.start(workflow_id, session).await?;
        Ok((Some(next), Reply::Step(result)))
    }

    /// Recognise a system command, but only where the current step allows
    /// them.
    fn system_command(&self, context: &WorkflowContext, raw_input: &str) -> Result<Option<SystemCommand>> {
        let word = raw_input.trim().to_lowercase();
        if word.is_empty() {
            return Ok(None);
        }

        let command = if self.commands.back.contains(&word) {
            SystemCommand::Back
        } else if self.commands.cancel.contains(&word) {
            SystemCommand::Cancel
        } else if self.commands.restart.contains(&word) {
            SystemCommand::Restart
        } else {
            return Ok(None);
        };

        let workflow_id = context.workflow_id().ok_or(Error::NoActiveWorkflow)?;
        let def = self.executor.definition(workflow_id)?;
        let allowed = context
            .current_step()
            .and_then(|step_id| def.step(step_id))
            .map_or(false, |step| step.allow_system_commands);

        Ok(if allowed { Some(command) } else { None })
    }

    fn session_lock(&self, session_key: &str) -> LockLease {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(session_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LockLease {
            table: self.locks.clone(),
            session_key: session_key.to_string(),
            lock,
        }
    }
}
