//! Built-in model types.
//!
//! Every generator names its final object after its model type; intermediate
//! primitives use short local names (`outer`, `inner`) that the assembly
//! composer namespaces.

use serde_json::json;

use crate::assembly::ComponentSpec;
use crate::command::SceneCommand;
use crate::params::{self, Params};
use crate::registry::{Generator, GeneratorError, ModelRegistry};
use crate::schema::{ModelSchema, ParameterSpec, ValidationRule};

fn require(params: &Params, name: &str) -> Result<f64, GeneratorError> {
    match params.get(name) {
        None => Err(GeneratorError::MissingParameter(name.to_string())),
        Some(value) => value.as_f64().ok_or_else(|| GeneratorError::NotNumeric {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn positive(params: &Params, name: &str) -> Result<f64, GeneratorError> {
    let value = require(params, name)?;
    if value <= 0.0 {
        return Err(GeneratorError::InvalidValue {
            name: name.to_string(),
            reason: format!("must be positive, got {}", params::format_number(value)),
        });
    }
    Ok(value)
}

fn position(params: &Params) -> [f64; 3] {
    ["position-x", "position-y", "position-z"].map(|k| params::number(params, k).unwrap_or(0.0))
}

fn position_specs() -> Vec<ParameterSpec> {
    ["x", "y", "z"]
        .iter()
        .map(|axis| {
            ParameterSpec::numeric(
                &format!("position-{}", axis),
                &format!("Offset along {} inside an assembly", axis),
                Some(json!(0)),
            )
            .hidden()
        })
        .collect()
}

fn with_positions(mut parameters: Vec<ParameterSpec>) -> Vec<ParameterSpec> {
    parameters.extend(position_specs());
    parameters
}

/// Outer cylinder minus a coaxial inner cylinder, combined into `result`.
fn tube(
    result: &str,
    params: &Params,
    outer_key: &str,
    inner_key: &str,
    height_key: &str,
) -> Result<Vec<SceneCommand>, GeneratorError> {
    let outer = positive(params, outer_key)?;
    let inner = positive(params, inner_key)?;
    let height = positive(params, height_key)?;
    if inner >= outer {
        return Err(GeneratorError::InvalidValue {
            name: inner_key.to_string(),
            reason: format!("must be smaller than {}", outer_key),
        });
    }
    let base = position(params);
    Ok(vec![
        SceneCommand::cylinder("outer", base, height, outer / 2.0),
        SceneCommand::cylinder("inner", base, height, inner / 2.0),
        SceneCommand::subtract(result, "outer", "inner"),
    ])
}

pub fn washer_schema() -> ModelSchema {
    ModelSchema {
        name: "Washer".into(),
        description: "Flat ring with a centered hole".into(),
        parameters: with_positions(vec![
            ParameterSpec::numeric("outer-diameter", "Outer diameter (mm)", None),
            ParameterSpec::numeric("inner-diameter", "Hole diameter (mm)", None),
            ParameterSpec::numeric("thickness", "Thickness (mm)", Some(json!(2))),
        ]),
        validation_rules: vec![
            ValidationRule::new("outer-diameter > 0", "Outer diameter must be positive"),
            ValidationRule::new("thickness > 0", "Thickness must be positive"),
            ValidationRule::new(
                "inner-diameter > 0 and inner-diameter < outer-diameter",
                "Inner diameter must be positive and smaller than the outer diameter",
            ),
        ],
    }
}

pub fn washer(params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
    tube("washer", params, "outer-diameter", "inner-diameter", "thickness")
}

pub fn hollow_cylinder_schema() -> ModelSchema {
    ModelSchema {
        name: "Hollow Cylinder".into(),
        description: "Tube section, also used as a ring or collar".into(),
        parameters: with_positions(vec![
            ParameterSpec::numeric("outer-diameter", "Outer diameter (mm)", Some(json!(10))),
            ParameterSpec::numeric("inner-diameter", "Inner diameter (mm)", Some(json!(8))),
            ParameterSpec::numeric("height", "Height (mm)", Some(json!(5))),
        ]),
        validation_rules: vec![
            ValidationRule::new("height > 0", "Height must be positive"),
            ValidationRule::new(
                "inner-diameter > 0 and inner-diameter < outer-diameter",
                "Inner diameter must be positive and smaller than the outer diameter",
            ),
        ],
    }
}

pub fn hollow_cylinder(params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
    tube("hollow-cylinder", params, "outer-diameter", "inner-diameter", "height")
}

pub fn cylinder_schema() -> ModelSchema {
    ModelSchema {
        name: "Cylinder".into(),
        description: "Solid cylinder, optionally bored through".into(),
        parameters: with_positions(vec![
            ParameterSpec::numeric("diameter", "Diameter (mm)", Some(json!(10))),
            ParameterSpec::numeric("height", "Height (mm)", Some(json!(20))),
            ParameterSpec::numeric("inner-diameter", "Bore diameter, 0 for solid (mm)", Some(json!(0))),
        ]),
        validation_rules: vec![
            ValidationRule::new("diameter > 0", "Diameter must be positive"),
            ValidationRule::new("height > 0", "Height must be positive"),
            ValidationRule::new(
                "inner-diameter >= 0 and inner-diameter < diameter",
                "Bore must be smaller than the diameter",
            ),
        ],
    }
}

pub fn cylinder(params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
    let bore = params::number(params, "inner-diameter").unwrap_or(0.0);
    if bore > 0.0 {
        return tube("cylinder", params, "diameter", "inner-diameter", "height");
    }
    let diameter = positive(params, "diameter")?;
    let height = positive(params, "height")?;
    Ok(vec![SceneCommand::cylinder("cylinder", position(params), height, diameter / 2.0)])
}

pub fn box_schema() -> ModelSchema {
    ModelSchema {
        name: "Box".into(),
        description: "Axis-aligned rectangular block".into(),
        parameters: with_positions(vec![
            ParameterSpec::numeric("width", "Size along x (mm)", Some(json!(10))),
            ParameterSpec::numeric("depth", "Size along y (mm)", Some(json!(10))),
            ParameterSpec::numeric("height", "Size along z (mm)", Some(json!(10))),
        ]),
        validation_rules: vec![ValidationRule::new(
            "width > 0 and depth > 0 and height > 0",
            "All dimensions must be positive",
        )],
    }
}

pub fn block(params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
    let size = [
        positive(params, "width")?,
        positive(params, "depth")?,
        positive(params, "height")?,
    ];
    let min = position(params);
    let max = [min[0] + size[0], min[1] + size[1], min[2] + size[2]];
    Ok(vec![SceneCommand::cuboid("box", min, max)])
}

pub fn sphere_schema() -> ModelSchema {
    ModelSchema {
        name: "Sphere".into(),
        description: "Sphere centered on its position offset".into(),
        parameters: with_positions(vec![ParameterSpec::numeric(
            "diameter",
            "Diameter (mm)",
            Some(json!(10)),
        )]),
        validation_rules: vec![ValidationRule::new("diameter > 0", "Diameter must be positive")],
    }
}

pub fn sphere(params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
    let diameter = positive(params, "diameter")?;
    Ok(vec![SceneCommand::sphere("sphere", position(params), diameter / 2.0)])
}

pub fn cylinder_with_ring_schema() -> ModelSchema {
    ModelSchema {
        name: "Cylinder with Ring".into(),
        description: "Tube with a collar ring around it".into(),
        parameters: with_positions(vec![
            ParameterSpec::numeric("cylinder-diameter", "Tube outer diameter (mm)", Some(json!(20))),
            ParameterSpec::numeric("cylinder-height", "Tube height (mm)", Some(json!(40))),
            ParameterSpec::numeric("wall-thickness", "Tube wall thickness (mm)", Some(json!(2))),
            ParameterSpec::numeric("ring-outer-diameter", "Ring outer diameter (mm)", Some(json!(30))),
            ParameterSpec::numeric("ring-height", "Ring height (mm)", Some(json!(5))),
            ParameterSpec::numeric("ring-offset", "Ring distance from the tube base (mm)", Some(json!(10))),
        ]),
        validation_rules: vec![
            ValidationRule::new(
                "wall-thickness > 0 and wall-thickness * 2 < cylinder-diameter",
                "Wall thickness must leave a bore",
            ),
            ValidationRule::new(
                "ring-outer-diameter > cylinder-diameter",
                "Ring must be wider than the tube",
            ),
            ValidationRule::new(
                "ring-offset >= 0 and ring-offset + ring-height <= cylinder-height",
                "Ring must sit within the tube height",
            ),
        ],
    }
}

pub fn cylinder_with_ring(params: &Params) -> Result<Vec<ComponentSpec>, GeneratorError> {
    let diameter = positive(params, "cylinder-diameter")?;
    let height = positive(params, "cylinder-height")?;
    let wall = positive(params, "wall-thickness")?;
    let ring_outer = positive(params, "ring-outer-diameter")?;
    let ring_height = positive(params, "ring-height")?;
    let ring_offset = require(params, "ring-offset")?;
    let [x, y, z] = position(params);

    Ok(vec![
        ComponentSpec::new("cylinder", "main-cylinder")
            .param("diameter", diameter)
            .param("inner-diameter", diameter - 2.0 * wall)
            .param("height", height)
            .param("position-x", x)
            .param("position-y", y)
            .param("position-z", z),
        ComponentSpec::new("hollow-cylinder", "ring")
            .param("outer-diameter", ring_outer)
            .param("inner-diameter", diameter)
            .param("height", ring_height)
            .param("position-x", x)
            .param("position-y", y)
            .param("position-z", z + ring_offset),
    ])
}

/// Register every built-in type. Returns how many registrations succeeded.
pub fn register_builtin_models(registry: &mut ModelRegistry) -> usize {
    let builtins = [
        ("cylinder", cylinder_schema(), Generator::commands(cylinder)),
        ("hollow-cylinder", hollow_cylinder_schema(), Generator::commands(hollow_cylinder)),
        ("washer", washer_schema(), Generator::commands(washer)),
        ("box", box_schema(), Generator::commands(block)),
        ("sphere", sphere_schema(), Generator::commands(sphere)),
        (
            "cylinder-with-ring",
            cylinder_with_ring_schema(),
            Generator::assembly(cylinder_with_ring),
        ),
    ];

    builtins
        .into_iter()
        .map(|(model_type, schema, generator)| registry.register(model_type, schema, generator))
        .filter(|registered| *registered)
        .count()
}
