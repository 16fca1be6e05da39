//! Parameter Validation - Checks Produce Violations
//!
//! Checks produce structured violations; the caller decides what to do with
//! them. Model generation does not run these checks itself: clients are
//! expected to validate before submitting, and `validate_params` is offered
//! for callers that want the server-side verdict.

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::params::Params;
use crate::schema::{ModelSchema, ParamKind};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub check: String,
    pub severity: ViolationSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub model_type: String,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn messages(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }
}

/// A single check over normalized parameters.
pub trait ParamCheck {
    fn name(&self) -> &'static str;
    fn check(&self, params: &Params, schema: &ModelSchema) -> Vec<ValidationViolation>;
}

/// Every visible parameter without a default must be supplied.
pub struct RequiredCheck;

impl ParamCheck for RequiredCheck {
    fn name(&self) -> &'static str {
        "required"
    }

    fn check(&self, params: &Params, schema: &ModelSchema) -> Vec<ValidationViolation> {
        schema
            .parameters
            .iter()
            .filter(|p| !p.hidden && p.is_required() && !params.contains_key(&p.name))
            .map(|p| ValidationViolation {
                check: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: format!("Missing required parameter: {}", p.name),
                parameter: Some(p.name.clone()),
                expression: None,
            })
            .collect()
    }
}

/// Numeric parameters must hold numbers after coercion.
pub struct NumericCheck;

impl ParamCheck for NumericCheck {
    fn name(&self) -> &'static str {
        "numeric"
    }

    fn check(&self, params: &Params, schema: &ModelSchema) -> Vec<ValidationViolation> {
        schema
            .parameters
            .iter()
            .filter(|p| !p.hidden && p.kind == ParamKind::Numeric)
            .filter_map(|p| {
                let value = params.get(&p.name)?;
                if value.is_number() {
                    return None;
                }
                Some(ValidationViolation {
                    check: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message: format!("Parameter {} must be a number, got {}", p.name, value),
                    parameter: Some(p.name.clone()),
                    expression: None,
                })
            })
            .collect()
    }
}

/// The schema's own rule expressions.
pub struct RuleCheck;

impl ParamCheck for RuleCheck {
    fn name(&self) -> &'static str {
        "rule"
    }

    fn check(&self, params: &Params, schema: &ModelSchema) -> Vec<ValidationViolation> {
        let mut violations = vec![];

        for rule in &schema.validation_rules {
            let outcome = Expr::parse(&rule.expression).and_then(|expr| expr.holds(params));
            match outcome {
                Ok(true) => {}
                Ok(false) => violations.push(ValidationViolation {
                    check: self.name().to_string(),
                    severity: ViolationSeverity::Error,
                    message: rule.message.clone(),
                    parameter: None,
                    expression: Some(rule.expression.clone()),
                }),
                // missing or non-numeric inputs are already reported above
                Err(e) => violations.push(ValidationViolation {
                    check: self.name().to_string(),
                    severity: ViolationSeverity::Warning,
                    message: format!("Rule could not be evaluated: {}", e),
                    parameter: None,
                    expression: Some(rule.expression.clone()),
                }),
            }
        }

        violations
    }
}

/// Validator runs all checks in order.
pub struct Validator {
    checks: Vec<Box<dyn ParamCheck + Send + Sync>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            checks: vec![
                Box::new(RequiredCheck),
                Box::new(NumericCheck),
                Box::new(RuleCheck),
            ],
        }
    }

    pub fn validate(&self, model_type: &str, params: &Params, schema: &ModelSchema) -> ValidationResult {
        let violations: Vec<_> = self
            .checks
            .iter()
            .flat_map(|check| check.check(params, schema))
            .collect();

        let valid = !violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error);

        ValidationResult {
            valid,
            model_type: model_type.to_string(),
            violations,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParameterSpec, ValidationRule};
    use serde_json::json;

    fn schema() -> ModelSchema {
        ModelSchema {
            name: "Washer".into(),
            description: String::new(),
            parameters: vec![
                ParameterSpec::numeric("outer-diameter", "", None),
                ParameterSpec::numeric("inner-diameter", "", Some(json!(6))),
            ],
            validation_rules: vec![ValidationRule::new(
                "inner-diameter < outer-diameter",
                "Inner diameter must be smaller than outer diameter",
            )],
        }
    }

    fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_valid_params() {
        let p = params(&[("outer-diameter", json!(10.0)), ("inner-diameter", json!(6.0))]);
        let result = Validator::new().validate("washer", &p, &schema());
        assert!(result.valid);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn test_rule_violation_carries_message() {
        let p = params(&[("outer-diameter", json!(5.0)), ("inner-diameter", json!(6.0))]);
        let result = Validator::new().validate("washer", &p, &schema());
        assert!(!result.valid);
        assert_eq!(
            result.messages(),
            vec!["Inner diameter must be smaller than outer diameter"]
        );
    }

    #[test]
    fn test_missing_required_is_error_and_rule_is_warning() {
        let p = params(&[("inner-diameter", json!(6.0))]);
        let result = Validator::new().validate("washer", &p, &schema());
        assert!(!result.valid);
        assert_eq!(result.violations[0].check, "required");
        assert_eq!(result.violations[1].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_non_numeric_reported() {
        let p = params(&[("outer-diameter", json!("big")), ("inner-diameter", json!(6.0))]);
        let result = Validator::new().validate("washer", &p, &schema());
        assert!(result.has_errors());
        assert_eq!(result.violations[0].parameter.as_deref(), Some("outer-diameter"));
    }
}
