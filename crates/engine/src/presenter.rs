//! Message Presenter
//!
//! Turns executor output into localized text. Catalogs are YAML files named
//! after their locale (`fr.yaml`, `en.yaml`); nested keys are addressed with
//! dots. A prompt key missing from every catalog is shown as literal text.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{json, Map, Value};
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

use crate::{
    template::render_text,
    workflow::{RenderRequest, StepResult},
    Result,
};

const SERVICE_UNAVAILABLE: &str = "errors.service_unavailable";
const GENERIC_FAILURE: &str = "errors.generic_failure";
const TRY_AGAIN: &str = "errors.try_again";
const BACK_NOT_ALLOWED: &str = "errors.back_not_allowed";
const CANCELLED: &str = "system.cancelled";
const PROGRESS: &str = "progress";
const BACK_HINT: &str = "hints.back";

#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    messages: HashMap<String, String>,
}

impl MessageCatalog {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let root: YamlValue = serde_yaml::from_str(raw)?;
        let mut messages = HashMap::new();
        flatten("", &root, &mut messages);
        Ok(Self { messages })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.messages.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn flatten(prefix: &str, node: &YamlValue, out: &mut HashMap<String, String>) {
    match node {
        YamlValue::Mapping(map) => {
            for (key, value) in map {
                let key = match key {
                    YamlValue::String(s) => s.clone(),
                    YamlValue::Number(n) => n.to_string(),
                    YamlValue::Bool(b) => b.to_string(),
                    _ => continue,
                };
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, value, out);
            }
        }
        YamlValue::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        YamlValue::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        YamlValue::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        _ => {}
    }
}

pub struct Presenter {
    catalogs: HashMap<String, MessageCatalog>,
    default_locale: String,
}

impl Presenter {
    pub fn new(default_locale: &str) -> Self {
        Self {
            catalogs: HashMap::new(),
            default_locale: default_locale.to_string(),
        }
    }

    pub fn with_catalog(mut self, locale: &str, catalog: MessageCatalog) -> Self {
        self.add_catalog(locale, catalog);
        self
    }

    pub fn add_catalog(&mut self, locale: &str, catalog: MessageCatalog) {
        debug!("Adding {} messages for locale {}", catalog.len(), locale);
        self.catalogs.insert(locale.to_string(), catalog);
    }

    /// Load every `<locale>.yaml` / `<locale>.yml` file in `dir`.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_yaml = matches!(
                path.extension().and_then(|ext| ext.to_str()),
                Some("yaml") | Some("yml")
            );
            let locale = match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(locale) if is_yaml => locale.to_string(),
                _ => continue,
            };
            let raw = std::fs::read_to_string(&path)?;
            self.add_catalog(&locale, MessageCatalog::from_yaml(&raw)?);
            loaded += 1;
        }
        if !self.catalogs.contains_key(&self.default_locale) {
            warn!("No catalog for default locale {}", self.default_locale);
        }
        Ok(loaded)
    }

    /// Look a key up in `locale`, then in the default locale.
    fn lookup(&self, locale: Option<&str>, key: &str) -> Option<&str> {
        locale
            .and_then(|l| self.catalogs.get(l))
            .and_then(|c| c.get(key))
            .or_else(|| self.catalogs.get(&self.default_locale).and_then(|c| c.get(key)))
    }

    fn text(&self, locale: Option<&str>, key: &str, fallback: &str) -> String {
        self.lookup(locale, key).unwrap_or(fallback).to_string()
    }

    /// Render one prompt: error annotation, prompt text, numbered choices,
    /// progress and back hint, one per line.
    pub fn render(&self, request: &RenderRequest, locale: Option<&str>) -> String {
        let mut lines = Vec::new();

        if let Some(reason) = request.error {
            let key = format!("errors.{}", reason.code());
            lines.push(self.text(locale, &key, &reason.to_string()));
        }

        let prompt = self.lookup(locale, &request.prompt_key).unwrap_or(request.prompt_key.as_str());
        let prompt = render_text(prompt, &request.variables);
        if !prompt.is_empty() {
            lines.push(prompt);
        }

        for choice in &request.choices {
            let label = self.lookup(locale, &choice.label_key).unwrap_or(choice.label_key.as_str());
            lines.push(format!("{}. {}", choice.index, render_text(label, &request.variables)));
        }

        if let Some(progress) = request.progress {
            let vars: Map<String, Value> = json!({
                "current": progress.current,
                "total": progress.total,
            })
            .as_object()
            .cloned()
            .unwrap_or_default();
            let template = self.lookup(locale, PROGRESS).unwrap_or("({{ current }}/{{ total }})");
            lines.push(render_text(template, &vars));
        }

        if request.allow_back {
            if let Some(hint) = self.lookup(locale, BACK_HINT) {
                lines.push(hint.to_string());
            }
        }

        lines.join("\n")
    }

    /// Every message a turn produces, in send order.
    pub fn render_result(&self, result: &StepResult, locale: Option<&str>) -> Vec<String> {
        match result {
            StepResult::AwaitingInput { prompt, notices } => notices
                .iter()
                .chain(std::iter::once(prompt))
                .map(|request| self.render(request, locale))
                .collect(),
            StepResult::ValidationError { prompt, .. } => vec![self.render(prompt, locale)],
            StepResult::ServiceError { .. } => vec![self.service_unavailable(locale)],
            StepResult::Completed { notices, message, .. } => notices
                .iter()
                .chain(message.iter())
                .map(|request| self.render(request, locale))
                .collect(),
        }
    }

    pub fn service_unavailable(&self, locale: Option<&str>) -> String {
        self.text(
            locale,
            SERVICE_UNAVAILABLE,
            "The service is temporarily unavailable, please try again.",
        )
    }

    pub fn generic_failure(&self, locale: Option<&str>) -> String {
        self.text(locale, GENERIC_FAILURE, "Something went wrong.")
    }

    pub fn try_again(&self, locale: Option<&str>) -> String {
        self.text(locale, TRY_AGAIN, "Please send your message again.")
    }

    pub fn back_not_allowed(&self, locale: Option<&str>) -> String {
        self.text(locale, BACK_NOT_ALLOWED, "You cannot go back from here.")
    }

    pub fn cancelled(&self, locale: Option<&str>) -> String {
        self.text(locale, CANCELLED, "Cancelled.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{
        definition::Progress, executor::RenderChoice, ActionFailure, ErrorReason,
    };

    const FR: &str = r#"
onboarding:
  confirm_single: "Êtes-vous {{ dgi.match.name }} ({{ dgi.match.nif }}) ?"
choices:
  "yes": "Oui"
  "no": "Non"
errors:
  required: "Ce champ est obligatoire."
  service_unavailable: "Service momentanément indisponible."
progress: "Étape {{ current }}/{{ total }}"
hints:
  back: "Tapez « retour » pour revenir."
"#;

    const EN: &str = r#"
choices:
  "yes": "Yes"
"#;

    fn presenter() -> Presenter {
        Presenter::new("fr")
            .with_catalog("fr", MessageCatalog::from_yaml(FR).unwrap())
            .with_catalog("en", MessageCatalog::from_yaml(EN).unwrap())
    }

    fn request() -> RenderRequest {
        RenderRequest {
            workflow_id: "onboarding".to_string(),
            step_id: "confirm_single".to_string(),
            prompt_key: "onboarding.confirm_single".to_string(),
            choices: vec![
                RenderChoice { index: 1, id: "yes".into(), label_key: "choices.yes".into() },
                RenderChoice { index: 2, id: "no".into(), label_key: "choices.no".into() },
            ],
            progress: Some(Progress { current: 2, total: 4 }),
            allow_back: true,
            expects_input: true,
            error: None,
            variables: serde_json::json!({
                "dgi": { "match": { "name": "Jean Dupont", "nif": "123456789" } }
            })
            .as_object()
            .cloned()
            .unwrap(),
        }
    }

    #[test]
    fn test_catalog_flattens_nested_keys() {
        let catalog = MessageCatalog::from_yaml(FR).unwrap();
        assert_eq!(catalog.get("choices.yes"), Some("Oui"));
        assert_eq!(catalog.get("errors.required"), Some("Ce champ est obligatoire."));
        assert!(catalog.get("choices").is_none());
    }

    #[test]
    fn test_render_prompt() {
        let text = presenter().render(&request(), None);
        assert_eq!(
            text,
            "Êtes-vous Jean Dupont (123456789) ?\n1. Oui\n2. Non\nÉtape 2/4\nTapez « retour » pour revenir."
        );
    }

    #[test]
    fn test_locale_falls_back_to_default() {
        let text = presenter().render(&request(), Some("en"));
        assert!(text.contains("1. Yes"));
        assert!(text.contains("2. Non"));
    }

    #[test]
    fn test_literal_prompt_and_error_annotation() {
        let mut req = request();
        req.prompt_key = "Votre nom, {{ missing }}?".to_string();
        req.choices.clear();
        req.progress = None;
        req.allow_back = false;
        req.error = Some(ErrorReason::Required);
        assert_eq!(
            presenter().render(&req, None),
            "Ce champ est obligatoire.\nVotre nom, ?"
        );
    }

    #[test]
    fn test_service_error_uses_generic_message() {
        let result = StepResult::ServiceError {
            step_id: "collect_name".to_string(),
            failure: ActionFailure::Timeout,
        };
        assert_eq!(
            presenter().render_result(&result, None),
            vec!["Service momentanément indisponible.".to_string()]
        );
        assert_eq!(presenter().generic_failure(None), "Something went wrong.");
    }
}
