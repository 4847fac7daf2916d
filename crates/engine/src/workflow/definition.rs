use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::template::TemplateValue;
use crate::workflow::validator::ValidationRule;

/// Sentinel transition target that finishes the workflow.
pub const END: &str = "END";

/// Declarative workflow graph, immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow identifier
    pub id: String,

    /// First step of a fresh conversation
    pub start_step_id: String,

    /// Steps in declaration order; the order drives progress display
    pub steps: Vec<StepDefinition>,

    /// Attach current/total progress to interactive prompts
    #[serde(default)]
    pub show_progress: bool,

    /// Action invoked once when the workflow reaches `END`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_complete: Option<String>,

    /// Prompt rendered on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_prompt_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Input,
    Choice,
    Message,
    Service,
}

impl StepKind {
    /// Interactive steps wait for user input; the others run on their own.
    pub fn is_interactive(&self) -> bool {
        matches!(self, StepKind::Input | StepKind::Choice)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Input => write!(f, "input"),
            StepKind::Choice => write!(f, "choice"),
            StepKind::Message => write!(f, "message"),
            StepKind::Service => write!(f, "service"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,

    /// Missing kinds are rejected at registration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StepKind>,

    /// Localization key or literal text
    #[serde(default)]
    pub prompt_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChoiceOption>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Action parameters, resolved against the variables before the call
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, TemplateValue>,

    /// Missing `next` finishes the workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextSpec>,

    /// Transition taken when the action fails
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<NextSpec>,

    #[serde(default = "default_true")]
    pub allow_back: bool,

    #[serde(default = "default_true")]
    pub allow_system_commands: bool,

    /// Message steps only: stop the turn after rendering and continue on
    /// the next (possibly empty) input
    #[serde(default)]
    pub pause: bool,
}

fn default_true() -> bool {
    true
}

impl StepDefinition {
    fn new(id: &str, kind: StepKind, prompt_key: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: Some(kind),
            prompt_key: prompt_key.to_string(),
            validation: None,
            choices: Vec::new(),
            action: None,
            params: BTreeMap::new(),
            next: None,
            on_error: None,
            allow_back: true,
            allow_system_commands: true,
            pause: false,
        }
    }

    pub fn input(id: &str, prompt_key: &str) -> Self {
        Self::new(id, StepKind::Input, prompt_key)
    }

    pub fn choice(id: &str, prompt_key: &str, choices: Vec<ChoiceOption>) -> Self {
        Self {
            choices,
            ..Self::new(id, StepKind::Choice, prompt_key)
        }
    }

    pub fn message(id: &str, prompt_key: &str) -> Self {
        Self::new(id, StepKind::Message, prompt_key)
    }

    pub fn service(id: &str, action: &str) -> Self {
        Self {
            action: Some(action.to_string()),
            ..Self::new(id, StepKind::Service, "")
        }
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), TemplateValue::parse(value));
        self
    }

    pub fn with_next(mut self, next: NextSpec) -> Self {
        self.next = Some(next);
        self
    }

    pub fn then(self, target: &str) -> Self {
        self.with_next(NextSpec::Step(target.to_string()))
    }

    pub fn with_on_error(mut self, next: NextSpec) -> Self {
        self.on_error = Some(next);
        self
    }

    pub fn without_back(mut self) -> Self {
        self.allow_back = false;
        self
    }

    pub fn paused(mut self) -> Self {
        self.pause = true;
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.kind.map_or(false, |k| k.is_interactive())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceOption {
    pub id: String,

    pub label_key: String,

    /// Stored value when selected; defaults to the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ChoiceOption {
    pub fn new(id: &str, label_key: &str) -> Self {
        Self {
            id: id.to_string(),
            label_key: label_key.to_string(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// Where a step goes next: a fixed target (a step id or `END`) or an
/// ordered list of conditional branches, first match wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextSpec {
    Step(String),
    Branches(Vec<Branch>),
}

impl NextSpec {
    pub fn end() -> Self {
        NextSpec::Step(END.to_string())
    }

    pub fn branches(branches: Vec<Branch>) -> Self {
        NextSpec::Branches(branches)
    }

    /// Every target named by this spec, `END` included.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            NextSpec::Step(target) => vec![target.as_str()],
            NextSpec::Branches(branches) => branches.iter().map(|b| b.goto.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Condition expression; `None` is a catch-all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,

    pub goto: String,
}

impl Branch {
    pub fn when(condition: &str, goto: &str) -> Self {
        Self {
            when: Some(condition.to_string()),
            goto: goto.to_string(),
        }
    }

    pub fn otherwise(goto: &str) -> Self {
        Self {
            when: None,
            goto: goto.to_string(),
        }
    }
}

/// A resolved transition target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Step(String),
    End,
}

impl Target {
    pub fn parse(raw: &str) -> Self {
        if raw == END {
            Target::End
        } else {
            Target::Step(raw.to_string())
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Step(id) => write!(f, "{}", id),
            Target::End => write!(f, "{}", END),
        }
    }
}

/// Position of an interactive step among all interactive steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl WorkflowDefinition {
    pub fn new(id: &str, start_step_id: &str, steps: Vec<StepDefinition>) -> Self {
        Self {
            id: id.to_string(),
            start_step_id: start_step_id.to_string(),
            steps,
            show_progress: false,
            on_complete: None,
            completion_prompt_key: None,
        }
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    pub fn with_on_complete(mut self, action: &str) -> Self {
        self.on_complete = Some(action.to_string());
        self
    }

    pub fn with_completion_prompt(mut self, prompt_key: &str) -> Self {
        self.completion_prompt_key = Some(prompt_key.to_string());
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Every action name referenced by a step or by the completion hook.
    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .steps
            .iter()
            .filter_map(|s| s.action.as_deref())
            .chain(self.on_complete.as_deref())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub fn progress(&self, step_id: &str) -> Option<Progress> {
        let interactive: Vec<&StepDefinition> =
            self.steps.iter().filter(|s| s.is_interactive()).collect();
        interactive
            .iter()
            .position(|s| s.id == step_id)
            .map(|index| Progress {
                current: index + 1,
                total: interactive.len(),
            })
    }
}
