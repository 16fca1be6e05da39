//! Contract Invariant Tests
//!
//! Cache keys, registration, assembly naming and the failure behavior of the
//! generation pipeline, exercised through the public API with faked tools.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tempfile::tempdir;

use cadforge_core::{
    assembly::ComponentSpec,
    catalog,
    command::{defined_names, top_level_objects},
    hashing::compute_cache_key,
    params::{self, filter_position, Params},
    EngineConfig, FailureKind, Format, Generator, Invocation, ModelPipeline, ModelRegistry,
    ModelSchema, PollConfig, ProcessOutput, ProcessRunner, SceneCommand, Status,
};

/// Stands in for the engine and converters: writes the file each tool would
/// produce unless told to fail or to stay silent.
#[derive(Default)]
struct FakeTools {
    failing: Vec<&'static str>,
    silent: Vec<&'static str>,
    /// Write their output, then exit non-zero.
    partial: Vec<&'static str>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeTools {
    fn failing(tools: &[&'static str]) -> Self {
        Self {
            failing: tools.to_vec(),
            ..Self::default()
        }
    }

    fn silent(tools: &[&'static str]) -> Self {
        Self {
            silent: tools.to_vec(),
            ..Self::default()
        }
    }

    fn partial(tools: &[&'static str]) -> Self {
        Self {
            partial: tools.to_vec(),
            ..Self::default()
        }
    }

    fn calls_to(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program_name() == tool)
            .count()
    }
}

impl ProcessRunner for FakeTools {
    fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        let tool = invocation.program_name();
        self.calls.lock().unwrap().push(invocation.clone());

        if self.failing.contains(&tool.as_str()) {
            return Ok(ProcessOutput::failure(1, &format!("{}: conversion error", tool)));
        }
        if self.silent.contains(&tool.as_str()) {
            return Ok(ProcessOutput::success());
        }
        let flag = if tool == "mged" { "-c" } else { "-o" };
        if let Some(target) = invocation.flag_value(flag) {
            std::fs::write(target, tool.as_bytes())?;
        }
        if self.partial.contains(&tool.as_str()) {
            return Ok(ProcessOutput::failure(1, &format!("{}: aborted midway", tool)));
        }
        Ok(ProcessOutput::success())
    }
}

fn config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::in_dir(dir);
    config.artifact_poll = PollConfig::new(5, 20);
    config.render_poll = PollConfig::new(5, 20);
    config
}

fn pipeline(dir: &Path, tools: Arc<FakeTools>) -> ModelPipeline {
    ModelPipeline::new(ModelRegistry::with_builtin_models(), config(dir), tools)
}

fn raw(text: &str) -> Map<String, Value> {
    serde_json::from_str(text).unwrap()
}

fn washer_params() -> Map<String, Value> {
    raw(r#"{"outer-diameter": 10, "inner-diameter": 6, "thickness": 2}"#)
}

fn prepared_params(model_type: &str, input: &Map<String, Value>) -> Params {
    ModelRegistry::with_builtin_models()
        .normalize_params(model_type, input)
        .unwrap()
}

#[test]
fn invariant_cache_key_is_deterministic_and_order_independent() {
    let registry = ModelRegistry::with_builtin_models();
    let a = registry.prepare("washer", &washer_params()).unwrap();
    let b = registry
        .prepare("washer", &raw(r#"{"thickness": 2, "inner_diameter": 6, "Outer-Diameter": 10}"#))
        .unwrap();
    let c = registry.prepare("washer", &washer_params()).unwrap();

    assert_eq!(a.base_name, b.base_name);
    assert_eq!(a.base_name, c.base_name);
    assert!(a.base_name.starts_with("washer-"));
}

#[test]
fn invariant_position_parameters_do_not_affect_key() {
    let with_offset = prepared_params(
        "box",
        &raw(r#"{"width": 4, "position-x": 12, "position_z": -3}"#),
    );
    let without = prepared_params("box", &raw(r#"{"width": 4}"#));

    assert_eq!(
        compute_cache_key("box", &with_offset),
        compute_cache_key("box", &filter_position(&with_offset))
    );
    assert_eq!(compute_cache_key("box", &with_offset), compute_cache_key("box", &without));
}

#[test]
fn invariant_key_changes_with_any_shape_parameter() {
    let base = prepared_params("washer", &washer_params());
    let base_key = compute_cache_key("washer", &base);

    for name in ["outer-diameter", "inner-diameter", "thickness"] {
        for value in [1.5, 7.0, 42.0] {
            let mut changed = base.clone();
            changed.insert(name.to_string(), json!(value));
            assert_ne!(compute_cache_key("washer", &changed), base_key, "{} = {}", name, value);
        }
    }
    assert_ne!(compute_cache_key("hollow-cylinder", &base), base_key);
}

#[test]
fn invariant_defaults_are_applied() {
    let normalized = prepared_params("washer", &raw(r#"{"outer-diameter": 10, "inner-diameter": 6}"#));
    assert_eq!(params::number(&normalized, "thickness"), Some(2.0));
    // hidden parameters get defaults too
    assert_eq!(params::number(&normalized, "position-x"), Some(0.0));
}

#[test]
fn invariant_registry_rejects_malformed_schemas() {
    let mut registry = ModelRegistry::with_builtin_models();
    let before = registry.types();
    let noop = || Generator::commands(|_: &Params| Ok(vec![SceneCommand::sphere("ball", [0.0; 3], 1.0)]));

    let no_name = json!({"parameters": [{"name": "diameter", "kind": "numeric"}]});
    assert!(!registry.register_json("ball", &no_name, noop()));

    let no_kind = json!({"name": "Ball", "parameters": [{"name": "diameter", "default": 2}]});
    assert!(!registry.register_json("ball", &no_kind, noop()));

    let unnamed = ModelSchema {
        name: String::new(),
        description: String::new(),
        parameters: vec![],
        validation_rules: vec![],
    };
    assert!(!registry.register("ball", unnamed, noop()));

    assert_eq!(registry.types(), before);
    assert!(registry.schema("ball").is_none());
}

#[test]
fn invariant_same_type_components_share_no_names() {
    let mut registry = ModelRegistry::with_builtin_models();
    let schema = ModelSchema {
        name: "Washer Pair".into(),
        description: String::new(),
        parameters: vec![],
        validation_rules: vec![],
    };
    let pair = Generator::assembly(|_: &Params| {
        Ok(vec![
            ComponentSpec::new("washer", "left")
                .param("outer-diameter", 10)
                .param("inner-diameter", 6),
            ComponentSpec::new("washer", "right")
                .param("outer-diameter", 12)
                .param("inner-diameter", 4)
                .param("position-x", 20),
        ])
    });
    assert!(registry.register("washer-pair", schema, pair));

    let commands = registry.generate("washer-pair", &Params::new()).unwrap();

    let names: Vec<&str> = commands.iter().map(SceneCommand::defines).collect();
    let unique: HashSet<&str> = names.iter().copied().collect();
    assert_eq!(unique.len(), names.len(), "duplicate names in {:?}", names);

    assert_eq!(
        commands.last().unwrap(),
        &SceneCommand::union("washer-pair", &["left", "right"])
    );
    assert_eq!(top_level_objects(&commands), vec!["washer-pair"]);
}

#[test]
fn invariant_component_names_never_collide() {
    let mut registry = ModelRegistry::with_builtin_models();
    let schema = ModelSchema {
        name: "Shadowed Pair".into(),
        description: String::new(),
        parameters: vec![],
        validation_rules: vec![],
    };
    let pair = Generator::assembly(|_: &Params| {
        Ok(vec![
            ComponentSpec::new("washer", "a")
                .param("outer-diameter", 10)
                .param("inner-diameter", 6),
            ComponentSpec::new("washer", "a-outer")
                .param("outer-diameter", 10)
                .param("inner-diameter", 6),
        ])
    });
    assert!(registry.register("pair", schema, pair));

    let err = registry.generate("pair", &Params::new()).unwrap_err();
    assert!(err.to_string().contains("a-outer"), "{}", err);

    let dir = tempdir().unwrap();
    let p = ModelPipeline::new(registry, config(dir.path()), Arc::new(FakeTools::default()));
    let result = p.create("pair", &Map::new(), &[Format::Obj]);
    assert_eq!(result.failure, Some(FailureKind::GeneratorFailure));
}

#[test]
fn invariant_cylinder_with_ring_namespaces_components() {
    let registry = ModelRegistry::with_builtin_models();
    let prepared = registry.prepare("cylinder-with-ring", &Map::new()).unwrap();
    let names = defined_names(&prepared.commands);

    for expected in ["main-cylinder-outer", "main-cylinder-inner", "ring-outer", "ring-inner"] {
        assert!(names.iter().any(|n| n == expected), "missing {} in {:?}", expected, names);
    }
    assert!(!names.iter().any(|n| n == "outer" || n == "inner"));
    assert_eq!(
        prepared.commands.last().unwrap(),
        &SceneCommand::union("cylinder-with-ring", &["main-cylinder", "ring"])
    );
    assert_eq!(prepared.objects, vec!["cylinder-with-ring"]);
}

#[test]
fn invariant_failed_format_keeps_existing_ones() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeTools::failing(&["g-stl"]));
    let p = pipeline(dir.path(), Arc::clone(&tools));

    let base = p.prepare("washer", &washer_params()).unwrap().base_name;
    let obj = dir.path().join(format!("{}.obj", base));
    std::fs::write(dir.path().join(format!("{}.g", base)), b"db").unwrap();
    std::fs::write(&obj, b"v 0 0 0").unwrap();

    let result = p.create("washer", &washer_params(), &[Format::Obj, Format::Stl]);

    assert_eq!(result.status, Status::Success);
    assert_eq!(result.path(Format::Obj), Some(obj.as_path()));
    assert!(result.formats[&Format::Obj].cached);

    let stl = &result.formats[&Format::Stl];
    assert_eq!(stl.status, Status::Error);
    assert_eq!(stl.failure, Some(FailureKind::ProcessFailure));
    assert!(stl.error.as_deref().unwrap().contains("g-stl: conversion error"));
    assert_eq!(tools.calls_to("mged"), 0);
}

#[test]
fn invariant_failed_build_leaves_nothing_cached() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeTools::partial(&["mged"]));
    let p = pipeline(dir.path(), Arc::clone(&tools));
    let base = p.prepare("sphere", &Map::new()).unwrap().base_name;

    let first = p.create("sphere", &Map::new(), &[Format::Obj]);
    assert_eq!(first.failure, Some(FailureKind::ProcessFailure));
    assert!(!dir.path().join(format!("{}.g", base)).exists());

    let second = p.create("sphere", &Map::new(), &[Format::Obj]);
    assert_eq!(second.status, Status::Error);
    assert_eq!(second.failure, Some(FailureKind::ProcessFailure));
    assert_eq!(tools.calls_to("mged"), 2);
    assert_eq!(tools.calls_to("g-obj"), 0);
}

#[test]
fn invariant_failed_conversion_leaves_nothing_cached() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeTools::partial(&["g-stl"]));
    let p = pipeline(dir.path(), Arc::clone(&tools));

    let first = p.create("box", &Map::new(), &[Format::Stl]);
    assert_eq!(first.formats[&Format::Stl].failure, Some(FailureKind::ProcessFailure));

    let second = p.create("box", &Map::new(), &[Format::Stl]);
    assert!(!second.formats[&Format::Stl].cached);
    assert_eq!(second.formats[&Format::Stl].status, Status::Error);
    assert_eq!(tools.calls_to("g-stl"), 2);
}

#[test]
fn invariant_missing_output_times_out_within_bound() {
    let dir = tempdir().unwrap();
    let p = pipeline(dir.path(), Arc::new(FakeTools::silent(&["mged"])));
    let bound = config(dir.path()).artifact_poll.max_wait();

    let started = Instant::now();
    let result = p.create("sphere", &Map::new(), &[Format::Obj]);
    let elapsed = started.elapsed();

    assert_eq!(result.status, Status::Error);
    assert_eq!(result.failure, Some(FailureKind::MaterializationTimeout));
    assert!(result.message.contains(&format!("{} ms", bound.as_millis())));
    assert_eq!(
        result.formats[&Format::Obj].failure,
        Some(FailureKind::MissingDependency)
    );
    assert!(elapsed < bound + Duration::from_secs(1), "waited {:?}", elapsed);
}

#[test]
fn invariant_converter_timeout_is_per_format() {
    let dir = tempdir().unwrap();
    let p = pipeline(dir.path(), Arc::new(FakeTools::silent(&["g-step"])));

    let result = p.create("box", &Map::new(), &[Format::Step, Format::Stl]);

    assert!(result.is_success());
    assert!(result.path(Format::Stl).is_some());
    assert_eq!(
        result.formats[&Format::Step].failure,
        Some(FailureKind::MaterializationTimeout)
    );
}

#[test]
fn end_to_end_washer() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeTools::default());
    let p = pipeline(dir.path(), Arc::clone(&tools));

    let prepared = p.prepare("washer", &washer_params()).unwrap();
    assert_eq!(
        prepared.commands,
        vec![
            SceneCommand::cylinder("outer", [0.0; 3], 2.0, 5.0),
            SceneCommand::cylinder("inner", [0.0; 3], 2.0, 3.0),
            SceneCommand::subtract("washer", "outer", "inner"),
        ]
    );

    let first = p.create("washer", &washer_params(), &[]);
    assert!(first.is_success(), "{}", first.message);
    let expected: PathBuf = dir.path().join(format!("{}.obj", prepared.base_name));
    assert_eq!(first.path(Format::Obj), Some(expected.as_path()));
    assert_eq!(first.base_name.as_deref(), Some(prepared.base_name.as_str()));

    // same shape, different key order and spelling: served from disk
    let again = p.create(
        "washer",
        &raw(r#"{"thickness": 2, "outer_diameter": 10, "inner-diameter": 6}"#),
        &[Format::Obj],
    );
    assert!(again.formats[&Format::Obj].cached);
    assert_eq!(tools.calls_to("mged"), 1);
    assert_eq!(tools.calls_to("g-obj"), 1);
}

#[test]
fn unknown_type_returns_error_result() {
    let dir = tempdir().unwrap();
    let tools = Arc::new(FakeTools::default());
    let p = pipeline(dir.path(), Arc::clone(&tools));

    let result = p.create("gear", &washer_params(), &[Format::Obj]);
    assert_eq!(result.status, Status::Error);
    assert_eq!(result.failure, Some(FailureKind::UnknownType));
    assert!(tools.calls.lock().unwrap().is_empty());
}

#[test]
fn render_after_generation() {
    let dir = tempdir().unwrap();
    let p = pipeline(dir.path(), Arc::new(FakeTools::default()));

    let generated = p.create("washer", &washer_params(), &[Format::G]);
    let base = generated.base_name.clone().unwrap();

    let views = p.render_orbit(&base, None);
    assert_eq!(views.len(), 5);
    assert!(views.iter().all(|v| v.is_success()));
    assert!(dir
        .path()
        .join("render")
        .join(&base)
        .join(format!("{}_top.png", base))
        .exists());
}

#[test]
fn builtin_catalog_is_complete() {
    let mut registry = ModelRegistry::new();
    assert_eq!(catalog::register_builtin_models(&mut registry), 6);
    assert_eq!(
        registry.types(),
        vec!["box", "cylinder", "cylinder-with-ring", "hollow-cylinder", "sphere", "washer"]
    );
}
