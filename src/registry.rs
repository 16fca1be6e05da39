//! Model Registry - Types, Schemas, Generators
//!
//! Built once at startup by a fixed sequence of `register` calls and shared
//! read-only afterwards. Registration is append-only: a type id can be
//! registered once.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assembly::{compose, ComponentSpec};
use crate::command::{top_level_objects, SceneCommand};
use crate::hashing::artifact_base_name;
use crate::params::{self, Params};
use crate::schema::{ModelSchema, SchemaError, SchemaView};

/// Nesting limit for assemblies built from other assemblies.
pub const MAX_ASSEMBLY_DEPTH: usize = 8;

pub type CommandFn = dyn Fn(&Params) -> Result<Vec<SceneCommand>, GeneratorError> + Send + Sync;
pub type ComponentFn = dyn Fn(&Params) -> Result<Vec<ComponentSpec>, GeneratorError> + Send + Sync;

/// How a model type turns parameters into scene commands.
#[derive(Clone)]
pub enum Generator {
    /// Emits commands directly.
    Commands(Arc<CommandFn>),
    /// Emits component specs; the composer turns them into one namespaced scene.
    Assembly(Arc<ComponentFn>),
}

impl Generator {
    pub fn commands<F>(f: F) -> Self
    where
        F: Fn(&Params) -> Result<Vec<SceneCommand>, GeneratorError> + Send + Sync + 'static,
    {
        Generator::Commands(Arc::new(f))
    }

    pub fn assembly<F>(f: F) -> Self
    where
        F: Fn(&Params) -> Result<Vec<ComponentSpec>, GeneratorError> + Send + Sync + 'static,
    {
        Generator::Assembly(Arc::new(f))
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generator::Commands(_) => f.write_str("Generator::Commands"),
            Generator::Assembly(_) => f.write_str("Generator::Assembly"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Parameter {name} is not numeric: {value}")]
    NotNumeric { name: String, value: String },

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Unknown component type: {0}")]
    UnknownComponentType(String),

    #[error("Duplicate component name: {0}")]
    DuplicateComponent(String),

    #[error("Component {component} defines {name}, which another component already defines")]
    NameCollision { component: String, name: String },

    #[error("Assembly has no components")]
    EmptyAssembly,

    #[error("Assemblies nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("Component {component}: {reason}")]
    Component { component: String, reason: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Unknown model type: {0}")]
    UnknownType(String),

    #[error("Model type already registered: {0}")]
    DuplicateType(String),

    #[error("Invalid schema for {model_type}: {source}")]
    InvalidSchema {
        model_type: String,
        #[source]
        source: SchemaError,
    },

    #[error("Generator for {model_type} failed: {source}")]
    Generator {
        model_type: String,
        #[source]
        source: GeneratorError,
    },
}

#[derive(Debug, Clone)]
pub struct ModelRegistration {
    pub model_type: String,
    pub schema: ModelSchema,
    pub generator: Generator,
}

/// Everything needed to build a model: canonical params, commands, artifact name.
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub model_type: String,
    pub params: Params,
    pub commands: Vec<SceneCommand>,
    pub base_name: String,
    pub objects: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    models: HashMap<String, ModelRegistration>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in model type.
    pub fn with_builtin_models() -> Self {
        let mut registry = Self::new();
        crate::catalog::register_builtin_models(&mut registry);
        registry
    }

    /// Register a model type; logs and returns false when rejected.
    pub fn register(&mut self, model_type: &str, schema: ModelSchema, generator: Generator) -> bool {
        match self.try_register(model_type, schema, generator) {
            Ok(()) => true,
            Err(e) => {
                warn!(model_type = %model_type, error = %e, "Rejected model registration");
                false
            }
        }
    }

    /// Register a type whose schema arrives as untyped JSON.
    pub fn register_json(&mut self, model_type: &str, schema: &Value, generator: Generator) -> bool {
        match ModelSchema::from_json(schema) {
            Ok(schema) => self.register(model_type, schema, generator),
            Err(source) => {
                let e = RegistryError::InvalidSchema {
                    model_type: model_type.to_string(),
                    source,
                };
                warn!(model_type = %model_type, error = %e, "Rejected model registration");
                false
            }
        }
    }

    pub fn try_register(
        &mut self,
        model_type: &str,
        schema: ModelSchema,
        generator: Generator,
    ) -> Result<(), RegistryError> {
        if self.models.contains_key(model_type) {
            return Err(RegistryError::DuplicateType(model_type.to_string()));
        }
        if model_type.trim().is_empty() {
            return Err(RegistryError::InvalidSchema {
                model_type: model_type.to_string(),
                source: SchemaError::Malformed("empty model type".into()),
            });
        }
        schema.check().map_err(|source| RegistryError::InvalidSchema {
            model_type: model_type.to_string(),
            source,
        })?;

        info!(model_type = %model_type, parameters = schema.parameters.len(), "Registered model type");
        self.models.insert(
            model_type.to_string(),
            ModelRegistration {
                model_type: model_type.to_string(),
                schema,
                generator,
            },
        );
        Ok(())
    }

    /// Registered type ids, sorted for stable output.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.models.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn contains(&self, model_type: &str) -> bool {
        self.models.contains_key(model_type)
    }

    pub fn registration(&self, model_type: &str) -> Option<&ModelRegistration> {
        self.models.get(model_type)
    }

    pub fn schema(&self, model_type: &str) -> Option<SchemaView> {
        self.models.get(model_type).map(|r| r.schema.view(model_type))
    }

    pub fn all_schemas(&self) -> HashMap<String, SchemaView> {
        self.models
            .iter()
            .map(|(k, r)| (k.clone(), r.schema.view(k)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Normalize raw params against a type's schema.
    pub fn normalize_params(
        &self,
        model_type: &str,
        raw: &Map<String, Value>,
    ) -> Result<Params, RegistryError> {
        let registration = self
            .models
            .get(model_type)
            .ok_or_else(|| RegistryError::UnknownType(model_type.to_string()))?;
        Ok(params::prepare(raw, &registration.schema))
    }

    /// Look up, normalize, generate and name a model.
    pub fn prepare(&self, model_type: &str, raw: &Map<String, Value>) -> Result<PreparedModel, RegistryError> {
        let params = self.normalize_params(model_type, raw)?;
        debug!(model_type = %model_type, params = ?params, "Normalized parameters");

        let commands = self
            .generate(model_type, &params)
            .map_err(|source| RegistryError::Generator {
                model_type: model_type.to_string(),
                source,
            })?;

        Ok(PreparedModel {
            model_type: model_type.to_string(),
            base_name: artifact_base_name(model_type, &params),
            objects: top_level_objects(&commands),
            params,
            commands,
        })
    }

    /// Run a type's generator over already-normalized params.
    pub fn generate(&self, model_type: &str, params: &Params) -> Result<Vec<SceneCommand>, GeneratorError> {
        self.generate_nested(model_type, params, 0)
    }

    pub(crate) fn generate_nested(
        &self,
        model_type: &str,
        params: &Params,
        depth: usize,
    ) -> Result<Vec<SceneCommand>, GeneratorError> {
        if depth > MAX_ASSEMBLY_DEPTH {
            return Err(GeneratorError::TooDeep(MAX_ASSEMBLY_DEPTH));
        }
        let registration = self
            .models
            .get(model_type)
            .ok_or_else(|| GeneratorError::UnknownComponentType(model_type.to_string()))?;

        match &registration.generator {
            Generator::Commands(f) => f(params),
            Generator::Assembly(f) => {
                let components = f(params)?;
                compose(self, model_type, &components, depth)
            }
        }
    }
}
