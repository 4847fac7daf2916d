pub mod actions;
pub mod condition;
pub mod context;
pub mod definition;
pub mod executor;
pub mod registry;
pub mod validator;

pub use actions::{action_fn, ActionFailure, ActionHandler, ActionRegistry, ActionRequest, ActionResult, SessionRef};
pub use context::WorkflowContext;
pub use definition::{Branch, ChoiceOption, NextSpec, StepDefinition, StepKind, Target, WorkflowDefinition, END};
pub use executor::{BackNavigation, ExecutorConfig, RenderChoice, RenderRequest, StepResult, WorkflowExecutor};
pub use registry::DefinitionRegistry;
pub use validator::{ErrorReason, RuleKind, ValidationRule};
