//! Step input validation
//!
//! Pure functions: raw user text in, sanitized JSON value or a reason out.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::workflow::definition::ChoiceOption;

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid");
    static ref PHONE: Regex = Regex::new(r"^\+?[0-9]{8,15}$").expect("phone regex is valid");
    static ref NAME: Regex =
        Regex::new(r"^\p{L}[\p{L}\p{M}\s'\-\.]*$").expect("name regex is valid");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("whitespace regex is valid");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    #[default]
    Text,
    Number,
    Email,
    Phone,
    Name,
    Pattern,
    #[serde(other)]
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRule {
    #[serde(default = "default_required")]
    pub required: bool,

    #[serde(default)]
    pub kind: RuleKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Default for ValidationRule {
    fn default() -> Self {
        Self {
            required: true,
            kind: RuleKind::Text,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
        }
    }
}

impl ValidationRule {
    pub fn of_kind(kind: RuleKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    Required,
    TooShort,
    TooLong,
    InvalidFormat,
    OutOfRange,
    InvalidChoice,
}

impl ErrorReason {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorReason::Required => "required",
            ErrorReason::TooShort => "too_short",
            ErrorReason::TooLong => "too_long",
            ErrorReason::InvalidFormat => "invalid_format",
            ErrorReason::OutOfRange => "out_of_range",
            ErrorReason::InvalidChoice => "invalid_choice",
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Validate free-text input against an optional rule.
///
/// Checks run in a fixed order: required, type coercion, length or range
/// bounds, then the pattern. The first failure wins.
pub fn validate(raw_input: &str, rule: Option<&ValidationRule>) -> Result<Value, ErrorReason> {
    let trimmed = raw_input.trim();
    let rule = match rule {
        Some(rule) => rule,
        None => return Ok(Value::String(trimmed.to_string())),
    };

    if trimmed.is_empty() {
        return if rule.required {
            Err(ErrorReason::Required)
        } else {
            Ok(Value::Null)
        };
    }

    // Unknown kinds accept anything, bounds included
    if rule.kind == RuleKind::Any {
        return Ok(Value::String(trimmed.to_string()));
    }

    match rule.kind {
        RuleKind::Number => {
            let number = coerce_number(trimmed).ok_or(ErrorReason::InvalidFormat)?;
            if rule.min.map_or(false, |min| number < min) || rule.max.map_or(false, |max| number > max) {
                return Err(ErrorReason::OutOfRange);
            }
            let sanitized = number_value(number).ok_or(ErrorReason::InvalidFormat)?;
            check_pattern(trimmed, rule)?;
            Ok(sanitized)
        }
        kind => {
            let sanitized = coerce_text(trimmed, kind)?;
            check_length(&sanitized, rule)?;
            check_pattern(&sanitized, rule)?;
            Ok(Value::String(sanitized))
        }
    }
}

/// Match input against a choice list: first by exact id, then by 1-based
/// index.
pub fn validate_choice(raw_input: &str, choices: &[ChoiceOption]) -> Result<Value, ErrorReason> {
    let trimmed = raw_input.trim();

    let selected = choices
        .iter()
        .find(|c| c.id == trimmed)
        .or_else(|| {
            trimmed
                .parse::<usize>()
                .ok()
                .filter(|index| *index >= 1)
                .and_then(|index| choices.get(index - 1))
        });

    match selected {
        Some(choice) => Ok(choice
            .value
            .clone()
            .unwrap_or_else(|| Value::String(choice.id.clone()))),
        None => Err(ErrorReason::InvalidChoice),
    }
}

fn coerce_text(trimmed: &str, kind: RuleKind) -> Result<String, ErrorReason> {
    match kind {
        RuleKind::Email => {
            let email = trimmed.to_lowercase();
            if EMAIL.is_match(&email) {
                Ok(email)
            } else {
                Err(ErrorReason::InvalidFormat)
            }
        }
        RuleKind::Phone => {
            let phone: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')'))
                .collect();
            if PHONE.is_match(&phone) {
                Ok(phone)
            } else {
                Err(ErrorReason::InvalidFormat)
            }
        }
        RuleKind::Name => {
            let name = WHITESPACE.replace_all(trimmed, " ").into_owned();
            if NAME.is_match(&name) {
                Ok(name)
            } else {
                Err(ErrorReason::InvalidFormat)
            }
        }
        RuleKind::Text | RuleKind::Pattern | RuleKind::Any | RuleKind::Number => {
            Ok(trimmed.to_string())
        }
    }
}

fn coerce_number(trimmed: &str) -> Option<f64> {
    let normalized: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn number_value(number: f64) -> Option<Value> {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Some(Value::Number(Number::from(number as i64)))
    } else {
        Number::from_f64(number).map(Value::Number)
    }
}

fn check_length(value: &str, rule: &ValidationRule) -> Result<(), ErrorReason> {
    let length = value.chars().count();
    if let Some(min) = rule.min_length {
        if length < min {
            return Err(ErrorReason::TooShort);
        }
    }
    if let Some(max) = rule.max_length {
        if length > max {
            return Err(ErrorReason::TooLong);
        }
    }
    Ok(())
}

fn check_pattern(value: &str, rule: &ValidationRule) -> Result<(), ErrorReason> {
    let pattern = match rule.pattern.as_deref() {
        Some(pattern) => pattern,
        None => return Ok(()),
    };
    match Regex::new(pattern) {
        Ok(re) if re.is_match(value) => Ok(()),
        Ok(_) => Err(ErrorReason::InvalidFormat),
        Err(e) => {
            tracing::warn!("Rejecting input against uncompilable pattern {}: {}", pattern, e);
            Err(ErrorReason::InvalidFormat)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn choices() -> Vec<ChoiceOption> {
        vec![
            ChoiceOption::new("yes", "choices.yes").with_value(json!(true)),
            ChoiceOption::new("no", "choices.no").with_value(json!(false)),
            ChoiceOption::new("later", "choices.later"),
        ]
    }

    #[test]
    fn test_no_rule_trims() {
        assert_eq!(validate("  hello  ", None), Ok(json!("hello")));
        assert_eq!(validate("   ", None), Ok(json!("")));
    }

    #[test]
    fn test_required() {
        let rule = ValidationRule::of_kind(RuleKind::Text);
        assert_eq!(validate("   ", Some(&rule)), Err(ErrorReason::Required));
        assert_eq!(validate("", Some(&rule.clone().optional())), Ok(Value::Null));
    }

    #[test]
    fn test_name_rule() {
        let rule = ValidationRule::of_kind(RuleKind::Name).length(2, 100);
        assert_eq!(validate(" Jean   Dupont ", Some(&rule)), Ok(json!("Jean Dupont")));
        assert_eq!(validate("Hélène d'Arc-Lévy", Some(&rule)), Ok(json!("Hélène d'Arc-Lévy")));
        assert_eq!(validate("J", Some(&rule)), Err(ErrorReason::TooShort));
        assert_eq!(validate("R2D2", Some(&rule)), Err(ErrorReason::InvalidFormat));
        assert_eq!(validate(&"a".repeat(101), Some(&rule)), Err(ErrorReason::TooLong));
    }

    #[test]
    fn test_email_rule() {
        let rule = ValidationRule::of_kind(RuleKind::Email);
        assert_eq!(validate("Jean@Example.COM", Some(&rule)), Ok(json!("jean@example.com")));
        assert_eq!(validate("jean@example", Some(&rule)), Err(ErrorReason::InvalidFormat));
    }

    #[test]
    fn test_phone_rule() {
        let rule = ValidationRule::of_kind(RuleKind::Phone);
        assert_eq!(validate("+33 6 12-34.56.78", Some(&rule)), Ok(json!("+33612345678")));
        assert_eq!(validate("12", Some(&rule)), Err(ErrorReason::InvalidFormat));
    }

    #[test]
    fn test_number_rule() {
        let rule = ValidationRule::of_kind(RuleKind::Number).range(0.0, 100.0);
        assert_eq!(validate("42", Some(&rule)), Ok(json!(42)));
        assert_eq!(validate("12,5", Some(&rule)), Ok(json!(12.5)));
        assert_eq!(validate("abc", Some(&rule)), Err(ErrorReason::InvalidFormat));
        assert_eq!(validate("150", Some(&rule)), Err(ErrorReason::OutOfRange));
    }

    #[test]
    fn test_length_checked_before_pattern() {
        let rule = ValidationRule::of_kind(RuleKind::Pattern)
            .length(5, 10)
            .pattern(r"^[0-9]+$");
        assert_eq!(validate("ab", Some(&rule)), Err(ErrorReason::TooShort));
        assert_eq!(validate("abcdef", Some(&rule)), Err(ErrorReason::InvalidFormat));
        assert_eq!(validate("123456", Some(&rule)), Ok(json!("123456")));
    }

    #[test]
    fn test_unknown_kind_accepts_anything() {
        let rule: ValidationRule = serde_json::from_value(json!({ "kind": "iban" })).unwrap();
        assert_eq!(rule.kind, RuleKind::Any);
        assert!(rule.required);
        assert_eq!(validate("whatever 123 !", Some(&rule)), Ok(json!("whatever 123 !")));
    }

    #[test]
    fn test_unknown_kind_ignores_bounds() {
        let rule: ValidationRule = serde_json::from_value(json!({
            "kind": "iban",
            "minLength": 10,
            "pattern": "^[0-9]+$"
        }))
        .unwrap();
        assert_eq!(validate(" abc ", Some(&rule)), Ok(json!("abc")));
        assert_eq!(validate("", Some(&rule)), Err(ErrorReason::Required));
    }

    #[test]
    fn test_choice_by_id_and_index() {
        let options = choices();
        assert_eq!(validate_choice("yes", &options), Ok(json!(true)));
        assert_eq!(validate_choice(" no ", &options), Ok(json!(false)));
        assert_eq!(validate_choice("NO", &options), Err(ErrorReason::InvalidChoice));
        assert_eq!(validate_choice("Yes", &options), Err(ErrorReason::InvalidChoice));
        assert_eq!(validate_choice("3", &options), Ok(json!("later")));
        assert_eq!(validate_choice("0", &options), Err(ErrorReason::InvalidChoice));
        assert_eq!(validate_choice("4", &options), Err(ErrorReason::InvalidChoice));
        assert_eq!(validate_choice("maybe", &options), Err(ErrorReason::InvalidChoice));
        assert_eq!(validate_choice("", &options), Err(ErrorReason::InvalidChoice));
    }
}
