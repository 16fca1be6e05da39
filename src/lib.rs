//! CadForge Core - Parametric Solid Model Generation
//!
//! Turns a declarative parameter set into CSG geometry: parameters are
//! normalized against a registered schema, a generator emits engine
//! instructions, the external engine materializes a base artifact and
//! converters derive the requested formats from it.
//!
//! Artifacts are content addressed: the same type and semantic parameters
//! always map to the same base name, so existing files double as a cache.

pub mod params;
pub mod hashing;
pub mod formats;
pub mod schema;
pub mod expr;
pub mod validation;
pub mod command;
pub mod registry;
pub mod assembly;
pub mod catalog;
pub mod process;
pub mod config;
pub mod artifacts;
pub mod render;
pub mod pipeline;

pub use params::Params;
pub use hashing::{artifact_base_name, compute_cache_key};
pub use formats::Format;
pub use schema::{ModelSchema, ParamKind, ParameterSpec, SchemaView, ValidationRule};
pub use validation::{ValidationResult, ValidationViolation, Validator, ViolationSeverity};
pub use command::{SceneCommand, to_script};
pub use registry::{Generator, GeneratorError, ModelRegistry, PreparedModel, RegistryError};
pub use assembly::ComponentSpec;
pub use process::{Invocation, PollConfig, ProcessOutput, ProcessRunner, SystemRunner};
pub use config::EngineConfig;
pub use artifacts::{FailureKind, FormatOutcome, GenerationResult, GenerationStage, Status};
pub use render::{RenderOptions, RenderResult, Renderer, View};
pub use pipeline::{ModelPipeline, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
