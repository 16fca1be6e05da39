//! Model Schemas - Parameter Contracts
//!
//! A schema describes the parameters a model type accepts. Schemas are checked
//! once, at registration, and are immutable afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::expr::Expr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub description: String,
    /// Absent default means the parameter is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub hidden: bool,
}

impl ParameterSpec {
    pub fn numeric(name: &str, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Numeric,
            description: description.to_string(),
            default,
            hidden: false,
        }
    }

    pub fn text(name: &str, description: &str, default: Option<Value>) -> Self {
        Self {
            name: name.to_string(),
            kind: ParamKind::Text,
            description: description.to_string(),
            default,
            hidden: false,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRule {
    /// Boolean expression over parameter names, e.g. `inner-diameter < outer-diameter`.
    pub expression: String,
    pub message: String,
}

impl ValidationRule {
    pub fn new(expression: &str, message: &str) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Schema has no name")]
    MissingName,

    #[error("Parameter #{0} has no name")]
    MissingParameterName(usize),

    #[error("Parameter {0} has no kind")]
    MissingParameterKind(String),

    #[error("Duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("Validation rule #{0} is missing expression or message")]
    IncompleteRule(usize),

    #[error("Validation rule #{index} does not parse: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("Validation rule #{index} references undeclared parameter {name}")]
    UnknownRuleParameter { index: usize, name: String },

    #[error("Malformed schema: {0}")]
    Malformed(String),
}

impl ModelSchema {
    /// Parse and check a schema from untyped JSON.
    ///
    /// Registration sources that are not compiled in (schema files, remote
    /// catalogs) come through here so that a parameter missing its `kind` is
    /// reported as such rather than as a generic decode error.
    pub fn from_json(value: &Value) -> Result<Self, SchemaError> {
        let object = value
            .as_object()
            .ok_or_else(|| SchemaError::Malformed("schema must be an object".into()))?;

        match object.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(SchemaError::MissingName),
        }

        let parameters = object
            .get("parameters")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::Malformed("parameters must be a list".into()))?;
        for (index, param) in parameters.iter().enumerate() {
            let name = param
                .get("name")
                .and_then(Value::as_str)
                .ok_or(SchemaError::MissingParameterName(index))?;
            if param.get("kind").is_none() {
                return Err(SchemaError::MissingParameterKind(name.to_string()));
            }
        }

        let schema: ModelSchema = serde_json::from_value(value.clone())
            .map_err(|e| SchemaError::Malformed(e.to_string()))?;
        schema.check()?;
        Ok(schema)
    }

    /// Structural checks run at registration time.
    pub fn check(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::MissingName);
        }

        let mut seen = std::collections::HashSet::new();
        for (index, param) in self.parameters.iter().enumerate() {
            if param.name.trim().is_empty() {
                return Err(SchemaError::MissingParameterName(index));
            }
            if !seen.insert(param.name.as_str()) {
                return Err(SchemaError::DuplicateParameter(param.name.clone()));
            }
        }

        for (index, rule) in self.validation_rules.iter().enumerate() {
            if rule.expression.trim().is_empty() || rule.message.trim().is_empty() {
                return Err(SchemaError::IncompleteRule(index));
            }
            let expr = Expr::parse(&rule.expression).map_err(|e| SchemaError::InvalidRule {
                index,
                reason: e.to_string(),
            })?;
            if let Some(name) = expr.identifiers().into_iter().find(|n| !seen.contains(n.as_str())) {
                return Err(SchemaError::UnknownRuleParameter { index, name });
            }
        }

        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Read view with hidden parameters filtered out of the user-facing list.
    pub fn view(&self, model_type: &str) -> SchemaView {
        let parameters: Vec<ParameterSpec> = self
            .parameters
            .iter()
            .filter(|p| !p.hidden)
            .cloned()
            .collect();
        SchemaView {
            model_type: model_type.to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            visible_parameters: parameters.iter().map(|p| p.name.clone()).collect(),
            parameters,
            validation_rules: self.validation_rules.clone(),
        }
    }
}

/// Schema as served to clients building parameter forms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaView {
    pub model_type: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSpec>,
    pub visible_parameters: Vec<String>,
    pub validation_rules: Vec<ValidationRule>,
}
