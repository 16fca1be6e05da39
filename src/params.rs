//! Parameter Pipeline - Normalize, Default, Coerce
//!
//! Raw client parameters arrive with mixed key spellings (`outer_diameter`,
//! `Outer-Diameter`) and numbers encoded as text. Every stage here is total:
//! a value that cannot be converted is left as-is and logged.

use std::collections::BTreeMap;

use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::schema::{ModelSchema, ParamKind};

/// Normalized parameter map, keyed by canonical (hyphenated, lowercase) name.
pub type Params = BTreeMap<String, Value>;

/// Prefix of parameters that only place a model inside an assembly.
pub const POSITION_PREFIX: &str = "position";

/// Canonical spelling of a parameter key: trimmed, lowercase, hyphen-separated.
pub fn canonical_key(key: &str) -> String {
    key.trim()
        .chars()
        .map(|c| match c {
            '_' | ' ' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Rewrite every key into its canonical spelling.
///
/// When two raw keys collapse onto the same canonical key the one that was
/// already canonical wins, so `{"outer-diameter": 10, "outer_diameter": 12}`
/// keeps 10.
pub fn normalize<'a, I>(raw: I) -> Params
where
    I: IntoIterator<Item = (&'a String, &'a Value)>,
{
    let mut params = Params::new();
    for (key, value) in raw {
        let canonical = canonical_key(key);
        let is_exact = canonical == *key;
        match params.get(&canonical) {
            Some(_) if !is_exact => {
                debug!(key = %key, canonical = %canonical, "Dropping duplicate parameter spelling");
            }
            _ => {
                params.insert(canonical, value.clone());
            }
        }
    }
    params
}

/// Fill in schema defaults for every absent parameter, hidden ones included.
pub fn apply_defaults(mut params: Params, schema: &ModelSchema) -> Params {
    for spec in &schema.parameters {
        if params.contains_key(&spec.name) {
            continue;
        }
        if let Some(default) = &spec.default {
            params.insert(spec.name.clone(), default.clone());
        }
    }
    params
}

/// Parse text representations of numeric parameters into numbers.
///
/// Numbers already present are re-encoded as `f64` so that `10` and `"10"`
/// end up as the same value (and therefore the same cache key).
pub fn coerce_types(mut params: Params, schema: &ModelSchema) -> Params {
    for spec in &schema.parameters {
        if spec.kind != ParamKind::Numeric {
            continue;
        }
        let Some(value) = params.get_mut(&spec.name) else {
            continue;
        };
        match coerce_number(value) {
            Some(number) => *value = number,
            None => warn!(
                parameter = %spec.name,
                value = %value,
                "Could not coerce parameter to a number, leaving it unchanged"
            ),
        }
    }
    params
}

fn coerce_number(value: &Value) -> Option<Value> {
    let parsed = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    Number::from_f64(parsed).map(Value::Number)
}

/// Full pipeline: normalize, apply defaults, coerce.
pub fn prepare(raw: &serde_json::Map<String, Value>, schema: &ModelSchema) -> Params {
    let params = normalize(raw);
    let params = apply_defaults(params, schema);
    coerce_types(params, schema)
}

/// Whether a canonical key only affects placement, not shape.
pub fn is_position_key(key: &str) -> bool {
    key.starts_with(POSITION_PREFIX)
}

/// Drop position parameters.
pub fn filter_position(params: &Params) -> Params {
    params
        .iter()
        .filter(|(k, _)| !is_position_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Numeric value of a parameter, if present and numeric.
pub fn number(params: &Params, name: &str) -> Option<f64> {
    params.get(name).and_then(Value::as_f64)
}

/// Render a number the way it appears in scene scripts and cache keys:
/// integral values without a fractional part, everything else in shortest form.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Textual rendering of a parameter value used in keys and derived names.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
