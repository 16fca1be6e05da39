//! Model Pipeline - Single Entry Point
//!
//! Owns the registry, builder and renderer. `create` and `render` never return
//! `Err`: every failure comes back as a status-tagged result.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, info_span, warn};

use crate::artifacts::{ArtifactBuilder, BuildRequest, FailureKind, GenerationResult};
use crate::command::to_script;
use crate::config::EngineConfig;
use crate::formats::{base_filename, is_artifact_base_name, Format};
use crate::process::{ProcessRunner, SystemRunner};
use crate::registry::{ModelRegistry, PreparedModel, RegistryError};
use crate::render::{RenderOptions, RenderResult, Renderer, View};
use crate::schema::SchemaView;
use crate::validation::{ValidationResult, Validator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown model type: {0}")]
    UnknownType(String),

    #[error(transparent)]
    Registry(RegistryError),

    #[error("Artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
}

impl From<RegistryError> for PipelineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownType(t) => PipelineError::UnknownType(t),
            other => PipelineError::Registry(other),
        }
    }
}

/// Failure category reported for a registry error at a request boundary.
pub fn failure_kind(error: &RegistryError) -> FailureKind {
    match error {
        RegistryError::UnknownType(_) => FailureKind::UnknownType,
        RegistryError::DuplicateType(_) | RegistryError::InvalidSchema { .. } => {
            FailureKind::SchemaValidation
        }
        RegistryError::Generator { .. } => FailureKind::GeneratorFailure,
    }
}

pub struct ModelPipeline {
    registry: ModelRegistry,
    validator: Validator,
    builder: ArtifactBuilder,
    renderer: Renderer,
}

impl ModelPipeline {
    pub fn new(registry: ModelRegistry, config: EngineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            registry,
            validator: Validator::new(),
            builder: ArtifactBuilder::new(config.clone(), Arc::clone(&runner)),
            renderer: Renderer::new(config, runner),
        }
    }

    /// Pipeline running the real engine tools.
    pub fn with_system_tools(registry: ModelRegistry, config: EngineConfig) -> Self {
        Self::new(registry, config, Arc::new(SystemRunner))
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        self.builder.config()
    }

    pub fn list_types(&self) -> Vec<String> {
        self.registry.types()
    }

    pub fn get_schema(&self, model_type: &str) -> Result<SchemaView, PipelineError> {
        self.registry
            .schema(model_type)
            .ok_or_else(|| PipelineError::UnknownType(model_type.to_string()))
    }

    pub fn get_all_schemas(&self) -> HashMap<String, SchemaView> {
        self.registry.all_schemas()
    }

    /// Check raw params against a type's rules. Not applied by `create`.
    pub fn validate_params(
        &self,
        model_type: &str,
        raw: &Map<String, Value>,
    ) -> Result<ValidationResult, PipelineError> {
        let registration = self
            .registry
            .registration(model_type)
            .ok_or_else(|| PipelineError::UnknownType(model_type.to_string()))?;
        let params = self.registry.normalize_params(model_type, raw)?;
        Ok(self.validator.validate(model_type, &params, &registration.schema))
    }

    /// Normalize and generate without touching the filesystem.
    pub fn prepare(&self, model_type: &str, raw: &Map<String, Value>) -> Result<PreparedModel, PipelineError> {
        Ok(self.registry.prepare(model_type, raw)?)
    }

    /// Engine script a request would run.
    pub fn script(&self, model_type: &str, raw: &Map<String, Value>) -> Result<String, PipelineError> {
        let prepared = self.prepare(model_type, raw)?;
        Ok(to_script(&prepared.commands))
    }

    /// Build a model and convert it into `formats` (the configured defaults
    /// when empty).
    pub fn create(&self, model_type: &str, raw: &Map<String, Value>, formats: &[Format]) -> GenerationResult {
        let span = info_span!("create", %model_type);
        let _enter = span.enter();

        let prepared = match self.registry.prepare(model_type, raw) {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(error = %e, "Request rejected");
                return GenerationResult::rejected(model_type, failure_kind(&e), e.to_string());
            }
        };
        info!(base = %prepared.base_name, commands = prepared.commands.len(), "Prepared model");

        let mut result = self.builder.build(&BuildRequest {
            model_type,
            base_name: &prepared.base_name,
            commands: &prepared.commands,
            objects: &prepared.objects,
            formats,
        });
        result.model_type = prepared.model_type;
        result
    }

    /// Existing artifact for a base name (or file name), `obj` by default.
    pub fn artifact_path(&self, file: &str, format: Option<Format>) -> Result<PathBuf, PipelineError> {
        let base = base_filename(file);
        if !is_artifact_base_name(base) {
            return Err(PipelineError::InvalidName(file.to_string()));
        }
        let path = self.builder.artifact_path(base, format.unwrap_or(Format::Obj));
        if path.exists() {
            Ok(path)
        } else {
            Err(PipelineError::ArtifactNotFound(path))
        }
    }

    pub fn render(&self, file: &str, view: Option<View>, objects: Option<&[String]>) -> RenderResult {
        self.render_with(file, view.unwrap_or_default(), objects, &self.render_options())
    }

    pub fn render_with(
        &self,
        file: &str,
        view: View,
        objects: Option<&[String]>,
        options: &RenderOptions,
    ) -> RenderResult {
        self.renderer
            .render_named_view(base_filename(file), view, objects, options)
    }

    pub fn render_orbit(&self, file: &str, objects: Option<&[String]>) -> Vec<RenderResult> {
        self.renderer
            .render_orbit(base_filename(file), objects, &self.render_options())
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions::from_config(self.config())
    }
}
