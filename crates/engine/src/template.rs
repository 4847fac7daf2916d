//! Typed template values and `{{ path }}` interpolation
//!
//! Prompts and action parameters reference collected variables by dotted
//! path. A parameter that is exactly one placeholder resolves to the
//! referenced value untouched (objects stay objects); anything else is text
//! and gets every placeholder rendered as a string.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

lazy_static! {
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}")
            .expect("placeholder regex is valid");
    static ref WHOLE_REFERENCE: Regex =
        Regex::new(r"^\s*\{\{\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*\}\}\s*$")
            .expect("reference regex is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TemplateValue {
    /// Text, possibly containing placeholders
    Literal(String),
    /// A single variable reference, passed through as-is
    VariableRef(String),
}

impl TemplateValue {
    pub fn parse(raw: &str) -> Self {
        match WHOLE_REFERENCE.captures(raw) {
            Some(caps) => TemplateValue::VariableRef(caps[1].to_string()),
            None => TemplateValue::Literal(raw.to_string()),
        }
    }

    /// Resolve against the collected variables. Missing references resolve
    /// to `null`.
    pub fn resolve(&self, variables: &Map<String, Value>) -> Value {
        match self {
            TemplateValue::Literal(text) => Value::String(render_text(text, variables)),
            TemplateValue::VariableRef(path) => {
                lookup_path(variables, path).cloned().unwrap_or(Value::Null)
            }
        }
    }
}

impl From<String> for TemplateValue {
    fn from(raw: String) -> Self {
        TemplateValue::parse(&raw)
    }
}

impl From<&str> for TemplateValue {
    fn from(raw: &str) -> Self {
        TemplateValue::parse(raw)
    }
}

impl From<TemplateValue> for String {
    fn from(value: TemplateValue) -> Self {
        match value {
            TemplateValue::Literal(text) => text,
            TemplateValue::VariableRef(path) => format!("{{{{ {} }}}}", path),
        }
    }
}

/// Walk a dotted path through nested objects (and arrays, by index).
/// Any missing segment yields `None`.
pub fn lookup_path<'a>(variables: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = variables.get(first)?;

    for part in parts {
        match current {
            Value::Object(map) => {
                current = map.get(part)?;
            }
            Value::Array(arr) => {
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// Replace every `{{ path }}` in `template` with the display form of the
/// referenced value. Unknown paths render as empty text.
pub fn render_text(template: &str, variables: &Map<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            lookup_path(variables, &caps[1])
                .map(display_value)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Text form of a variable value. Scalars render bare, lists of scalars are
/// comma separated, objects render as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) if items.iter().all(|v| !v.is_object() && !v.is_array()) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
