//! Evaluation context shared by the resolver and the state machine.

use crate::{EngineError, EngineResult};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use warden_expr::{Expression, Value};
use warden_types::Appeal;

/// Build the variable environment policy expressions run against:
/// the appeal serialized as a nested map under the `appeal` key.
pub fn appeal_vars(appeal: &Appeal) -> EngineResult<HashMap<String, serde_json::Value>> {
    let value = serde_json::to_value(appeal)?;
    Ok(HashMap::from([("appeal".to_string(), value)]))
}

/// Evaluate an expression, naming it in the error so a misconfigured policy
/// is attributable to the offending string.
pub fn evaluate_expression(
    expression: &str,
    vars: &HashMap<String, serde_json::Value>,
) -> EngineResult<Value> {
    Expression::new(expression)
        .evaluate(vars)
        .map_err(|source| EngineError::Expression {
            expression: expression.to_string(),
            source,
        })
}

static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

/// Loose email shape check applied to resolved approvers and actors.
pub fn is_valid_email(value: &str) -> bool {
    let re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
    });
    re.is_match(value)
}
