//! Workflow Definition Registry
//!
//! Definitions are validated and registered at start-up, then shared
//! read-only (behind an `Arc`) by every session.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::{
    workflow::{
        condition::Condition,
        definition::{NextSpec, StepKind, WorkflowDefinition, END},
    },
    Error, Result,
};

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<WorkflowDefinition>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register. Nothing is registered unless the whole graph
    /// is valid.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<()> {
        let mut violations = validate_definition(&definition);
        if self.definitions.contains_key(&definition.id) {
            violations.push(format!("workflow `{}` is already registered", definition.id));
        }
        if !violations.is_empty() {
            return Err(Error::InvalidDefinition {
                workflow_id: definition.id,
                violations,
            });
        }

        info!(
            "Registered workflow {} ({} steps)",
            definition.id,
            definition.steps.len()
        );
        self.definitions
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Register every `*.yaml` / `*.yml` file in `dir`.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        paths.sort();

        for path in &paths {
            debug!("Loading workflow definition from {}", path.display());
            let raw = std::fs::read_to_string(path)?;
            let definition: WorkflowDefinition = serde_yaml::from_str(&raw)?;
            self.register(definition)?;
        }

        Ok(paths.len())
    }
}

fn validate_definition(def: &WorkflowDefinition) -> Vec<String> {
    let mut violations = Vec::new();

    if def.id.trim().is_empty() {
        violations.push("workflow id is empty".to_string());
    }
    if def.steps.is_empty() {
        violations.push("workflow has no steps".to_string());
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        if step.id == END {
            violations.push(format!("`{}` is reserved and cannot be a step id", END));
        }
        if !seen.insert(step.id.as_str()) {
            violations.push(format!("duplicate step id `{}`", step.id));
        }
    }

    if def.step(&def.start_step_id).is_none() {
        violations.push(format!("start step `{}` does not exist", def.start_step_id));
    }

    for step in &def.steps {
        match step.kind {
            None => violations.push(format!("step `{}` has no kind", step.id)),
            Some(StepKind::Choice) if step.choices.is_empty() => {
                violations.push(format!("choice step `{}` declares no choices", step.id))
            }
            Some(StepKind::Service) if step.action.is_none() => {
                violations.push(format!("service step `{}` declares no action", step.id))
            }
            _ => {}
        }

        if step.pause && step.kind != Some(StepKind::Message) {
            violations.push(format!("step `{}` uses `pause` but is not a message step", step.id));
        }

        if step.on_error.is_some() && step.action.is_none() {
            violations.push(format!("step `{}` has `onError` but no action", step.id));
        }

        if let Some(pattern) = step.validation.as_ref().and_then(|v| v.pattern.as_deref()) {
            if let Err(e) = Regex::new(pattern) {
                violations.push(format!("step `{}` has an invalid pattern: {}", step.id, e));
            }
        }

        for (label, spec) in [("next", step.next.as_ref()), ("onError", step.on_error.as_ref())] {
            if let Some(spec) = spec {
                check_transition(def, &step.id, label, spec, &mut violations);
            }
        }
    }

    violations
}

fn check_transition(
    def: &WorkflowDefinition,
    step_id: &str,
    label: &str,
    spec: &NextSpec,
    violations: &mut Vec<String>,
) {
    for target in spec.targets() {
        if target != END && def.step(target).is_none() {
            violations.push(format!(
                "step `{}` {} target `{}` does not exist",
                step_id, label, target
            ));
        }
    }

    if let NextSpec::Branches(branches) = spec {
        if branches.is_empty() {
            violations.push(format!("step `{}` {} has no branches", step_id, label));
        }
        for condition in branches.iter().filter_map(|b| b.when.as_deref()) {
            if let Err(e) = Condition::parse(condition) {
                violations.push(format!("step `{}` {}: {}", step_id, label, e));
            }
        }
    }
}
