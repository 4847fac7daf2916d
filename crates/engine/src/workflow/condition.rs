//! Transition resolution
//!
//! Conditions use a fixed grammar, nothing is ever evaluated as code:
//!
//! ```text
//! <path> <op> <literal>      op: == != > < >= <=
//! <path> exists
//! <path> not_exists
//! ```
//!
//! Literals are quoted strings, `true`, `false`, `null` or bare numbers.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

use crate::template::lookup_path;
use crate::workflow::definition::{NextSpec, Target};

lazy_static! {
    static ref COMPARISON: Regex = Regex::new(
        r"^\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s*(==|!=|>=|<=|>|<)\s*(.+?)\s*$"
    )
    .expect("comparison regex is valid");
    static ref PRESENCE: Regex = Regex::new(
        r"^\s*([A-Za-z0-9_\-]+(?:\.[A-Za-z0-9_\-]+)*)\s+(exists|not_exists)\s*$"
    )
    .expect("presence regex is valid");
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("unrecognised condition `{0}`")]
    Syntax(String),
    #[error("invalid literal `{literal}` in condition `{condition}`")]
    Literal { condition: String, literal: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Exists,
    NotExists,
}

impl Operator {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            "exists" => Some(Operator::Exists),
            "not_exists" => Some(Operator::NotExists),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
        };
        f.write_str(token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub operator: Operator,
    pub literal: Value,
}

impl Condition {
    pub fn parse(expr: &str) -> Result<Self, ConditionError> {
        if let Some(caps) = PRESENCE.captures(expr) {
            return Ok(Self {
                path: caps[1].to_string(),
                operator: Operator::parse(&caps[2]).ok_or_else(|| ConditionError::Syntax(expr.to_string()))?,
                literal: Value::Null,
            });
        }

        let caps = COMPARISON
            .captures(expr)
            .ok_or_else(|| ConditionError::Syntax(expr.to_string()))?;
        let operator =
            Operator::parse(&caps[2]).ok_or_else(|| ConditionError::Syntax(expr.to_string()))?;
        let literal = parse_literal(&caps[3]).ok_or_else(|| ConditionError::Literal {
            condition: expr.to_string(),
            literal: caps[3].to_string(),
        })?;

        Ok(Self {
            path: caps[1].to_string(),
            operator,
            literal,
        })
    }

    /// Evaluate against the collected variables. Never fails: a type
    /// mismatch simply evaluates to `false`.
    pub fn evaluate(&self, variables: &Map<String, Value>) -> bool {
        let actual = lookup_path(variables, &self.path);

        match self.operator {
            Operator::Exists => actual.map_or(false, |v| !v.is_null()),
            Operator::NotExists => actual.map_or(true, |v| v.is_null()),
            Operator::Eq => values_equal(actual.unwrap_or(&Value::Null), &self.literal),
            Operator::Ne => !values_equal(actual.unwrap_or(&Value::Null), &self.literal),
            Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le => {
                let (left, right) = match (actual.and_then(as_number), as_number(&self.literal)) {
                    (Some(left), Some(right)) => (left, right),
                    _ => return false,
                };
                match self.operator {
                    Operator::Gt => left > right,
                    Operator::Lt => left < right,
                    Operator::Ge => left >= right,
                    Operator::Le => left <= right,
                    _ => false,
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::Exists | Operator::NotExists => write!(f, "{} {}", self.path, self.operator),
            _ => write!(f, "{} {} {}", self.path, self.operator, self.literal),
        }
    }
}

fn parse_literal(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    let quoted = |q: char| raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Some(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    match raw {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        "null" => return Some(Value::Null),
        _ => {}
    }
    if let Ok(int) = raw.parse::<i64>() {
        return Some(Value::Number(Number::from(int)));
    }
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Value equality, except that numbers compare by magnitude so `5` and
/// `5.0` are equal. Strings are never coerced.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Pick the next target. `None` means no branch matched, which the caller
/// reports as a configuration error.
pub fn resolve(next: &NextSpec, variables: &Map<String, Value>) -> Option<Target> {
    match next {
        NextSpec::Step(target) => Some(Target::parse(target)),
        NextSpec::Branches(branches) => branches
            .iter()
            .find(|branch| match branch.when.as_deref() {
                None => true,
                Some(expr) => match Condition::parse(expr) {
                    Ok(condition) => condition.evaluate(variables),
                    Err(e) => {
                        warn!("Skipping branch to {}: {}", branch.goto, e);
                        false
                    }
                },
            })
            .map(|branch| Target::parse(&branch.goto)),
    }
}
