//! Assembly Composer
//!
//! Merges several component models into one scene. Each component's objects
//! are namespaced as `instance-local`, its top object becomes `instance`, and
//! a final union joins every instance under the assembly name.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::command::{defined_names, top_level_objects, SceneCommand};
use crate::params::{self, format_value};
use crate::registry::{GeneratorError, ModelRegistry};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentSpec {
    #[serde(rename = "type")]
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ComponentSpec {
    pub fn new(model_type: &str, name: &str) -> Self {
        Self {
            model_type: model_type.to_string(),
            name: Some(name.to_string()),
            params: Map::new(),
        }
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Explicit name, or one derived from type and parameter values.
    pub fn instance_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => derive_component_name(&self.model_type, &self.params),
        }
    }
}

/// `type-v1-v2...` over parameter values in key order, whitespace stripped.
pub fn derive_component_name(model_type: &str, params: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let mut name = model_type.to_string();
    for key in keys {
        name.push('-');
        name.extend(format_value(&params[key.as_str()]).chars().filter(|c| !c.is_whitespace()));
    }
    name
}

/// Compose components into one instruction list ending in a union named
/// `assembly_name`.
pub fn compose(
    registry: &ModelRegistry,
    assembly_name: &str,
    components: &[ComponentSpec],
    depth: usize,
) -> Result<Vec<SceneCommand>, GeneratorError> {
    if components.is_empty() {
        return Err(GeneratorError::EmptyAssembly);
    }

    let mut commands = Vec::new();
    let mut instances = Vec::with_capacity(components.len());
    let mut used = HashSet::new();
    // every object defined so far, across all components
    let mut defined: HashSet<String> = HashSet::new();

    for component in components {
        let instance = component.instance_name();
        if !used.insert(instance.clone()) || instance == assembly_name {
            return Err(GeneratorError::DuplicateComponent(instance));
        }

        let schema = &registry
            .registration(&component.model_type)
            .ok_or_else(|| GeneratorError::UnknownComponentType(component.model_type.clone()))?
            .schema;
        let component_params = params::prepare(&component.params, schema);
        let raw = registry
            .generate_nested(&component.model_type, &component_params, depth + 1)
            .map_err(|e| GeneratorError::Component {
                component: instance.clone(),
                reason: e.to_string(),
            })?;

        let renamed = namespace(&raw, &instance);
        for command in &renamed {
            if !defined.insert(command.defines().to_string()) {
                return Err(GeneratorError::NameCollision {
                    component: instance.clone(),
                    name: command.defines().to_string(),
                });
            }
        }
        debug!(
            assembly = %assembly_name,
            component = %instance,
            commands = renamed.len(),
            "Composed component"
        );
        commands.extend(renamed);
        instances.push(instance);
    }

    if defined.contains(assembly_name) {
        return Err(GeneratorError::NameCollision {
            component: assembly_name.to_string(),
            name: assembly_name.to_string(),
        });
    }
    commands.push(SceneCommand::union(assembly_name, &instances));
    Ok(commands)
}

/// Prefix every object a component defines with its instance name. A single
/// top object becomes the instance itself; several are gathered under it.
fn namespace(raw: &[SceneCommand], instance: &str) -> Vec<SceneCommand> {
    let mut map: HashMap<String, String> = defined_names(raw)
        .into_iter()
        .map(|local| {
            let scoped = format!("{}-{}", instance, local);
            (local, scoped)
        })
        .collect();

    let tops = top_level_objects(raw);
    if let [top] = tops.as_slice() {
        map.insert(top.clone(), instance.to_string());
    }

    let mut renamed: Vec<SceneCommand> = raw.iter().map(|c| c.rename(&map)).collect();
    if tops.len() > 1 {
        let scoped: Vec<String> = tops.iter().map(|t| map[t].clone()).collect();
        renamed.push(SceneCommand::union(instance, &scoped));
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derive_component_name() {
        let params = json!({"height": 2.0, "diameter": 10, "label": "a b"});
        let Value::Object(map) = params else { unreachable!() };
        assert_eq!(derive_component_name("cylinder", &map), "cylinder-10-2-ab");
    }

    #[test]
    fn test_explicit_name_wins() {
        let spec = ComponentSpec::new("washer", "spacer").param("thickness", 2);
        assert_eq!(spec.instance_name(), "spacer");
        let unnamed = ComponentSpec {
            name: None,
            ..spec
        };
        assert_eq!(unnamed.instance_name(), "washer-2");
    }

    #[test]
    fn test_namespace_maps_top_to_instance() {
        let raw = vec![
            SceneCommand::cylinder("outer", [0.0; 3], 2.0, 5.0),
            SceneCommand::cylinder("inner", [0.0; 3], 2.0, 3.0),
            SceneCommand::subtract("washer", "outer", "inner"),
        ];
        let renamed = namespace(&raw, "left");
        assert_eq!(renamed[2], SceneCommand::subtract("left", "left-outer", "left-inner"));
    }

    #[test]
    fn test_namespace_gathers_multiple_tops() {
        let raw = vec![
            SceneCommand::sphere("a", [0.0; 3], 1.0),
            SceneCommand::sphere("b", [3.0, 0.0, 0.0], 1.0),
        ];
        let renamed = namespace(&raw, "p1");
        assert_eq!(renamed.len(), 3);
        assert_eq!(renamed[2], SceneCommand::union("p1", &["p1-a", "p1-b"]));
    }

    #[test]
    fn test_instance_names_cannot_shadow_scoped_objects() {
        let registry = ModelRegistry::with_builtin_models();
        let components = [
            ComponentSpec::new("washer", "a")
                .param("outer-diameter", 10)
                .param("inner-diameter", 6),
            ComponentSpec::new("washer", "a-outer")
                .param("outer-diameter", 8)
                .param("inner-diameter", 4),
        ];
        let err = compose(&registry, "pair", &components, 0).unwrap_err();
        assert_eq!(
            err,
            GeneratorError::NameCollision {
                component: "a-outer".into(),
                name: "a-outer".into(),
            }
        );
    }

    #[test]
    fn test_assembly_name_cannot_shadow_scoped_objects() {
        let registry = ModelRegistry::with_builtin_models();
        let components = [ComponentSpec::new("washer", "a")
            .param("outer-diameter", 10)
            .param("inner-diameter", 6)];
        let err = compose(&registry, "a-inner", &components, 0).unwrap_err();
        assert!(matches!(err, GeneratorError::NameCollision { ref name, .. } if name == "a-inner"));
    }

    #[test]
    fn test_intermediate_named_like_type_stays_scoped() {
        let raw = vec![
            SceneCommand::sphere("gizmo", [0.0; 3], 1.0),
            SceneCommand::sphere("a", [3.0, 0.0, 0.0], 1.0),
            SceneCommand::union("c", &["gizmo"]),
        ];
        let renamed = namespace(&raw, "g1");
        let names: Vec<&str> = renamed.iter().map(SceneCommand::defines).collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len(), "{:?}", names);
        assert_eq!(renamed.last().unwrap(), &SceneCommand::union("g1", &["g1-a", "g1-c"]));
    }
}
