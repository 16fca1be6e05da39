//! CadForge CLI - Bridge interface for the gateway
//!
//! Commands: types, schema, schemas, validate, script, generate, artifact, render
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation or generation failure

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadforge_core::{
    formats::parse_formats, EngineConfig, Format, ModelPipeline, ModelRegistry, View, ENGINE_VERSION,
};

#[derive(Parser)]
#[command(name = "cadforge-cli")]
#[command(about = "CadForge CLI - Parametric CAD Generator")]
#[command(version = ENGINE_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the engine config file
    #[arg(short, long, default_value = "cadforge.json", global = true)]
    config: PathBuf,

    /// Override the artifact directory
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered model types
    Types,

    /// Show one model type's schema
    Schema {
        model_type: String,
    },

    /// Show every schema keyed by type
    Schemas,

    /// Check parameters against a type's validation rules
    Validate {
        model_type: String,

        /// JSON object of parameters
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Print the engine script a request would run
    Script {
        model_type: String,

        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// Build a model and convert it into the requested formats
    Generate {
        model_type: String,

        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Comma separated formats (g, obj, stl, step)
        #[arg(short, long, value_delimiter = ',')]
        formats: Vec<String>,
    },

    /// Locate an existing artifact
    Artifact {
        /// Base name or file name
        file: String,

        #[arg(short, long)]
        format: Option<String>,
    },

    /// Render views of an existing artifact
    Render {
        file: String,

        #[arg(short, long)]
        view: Option<String>,

        /// Render all five canonical views
        #[arg(long, conflicts_with = "view")]
        orbit: bool,

        /// Objects to display; defaults to the model type in the name
        #[arg(long, value_delimiter = ',')]
        objects: Vec<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "cadforge_core=info".into()),
    );
    // stdout carries the JSON output
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            println!("{}", json!({ "success": false, "error": format!("{:#}", e) }));
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(&cli.config)?.apply_env()?;
    if let Some(dir) = &cli.work_dir {
        config.work_dir = dir.clone();
    }
    Ok(config)
}

fn parse_params(raw: &str) -> anyhow::Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("Invalid params JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("Params must be a JSON object, got {}", other)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let pipeline = ModelPipeline::with_system_tools(ModelRegistry::with_builtin_models(), config);

    match cli.command {
        Commands::Types => {
            print_json(&pipeline.list_types())?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Schema { model_type } => {
            print_json(&pipeline.get_schema(&model_type)?)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Schemas => {
            // sorted keys for stable output
            let schemas: std::collections::BTreeMap<_, _> = pipeline.get_all_schemas().into_iter().collect();
            print_json(&schemas)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Validate { model_type, params } => {
            let result = pipeline.validate_params(&model_type, &parse_params(&params)?)?;
            print_json(&result)?;
            Ok(exit_code(result.valid))
        }

        Commands::Script { model_type, params } => {
            let prepared = pipeline.prepare(&model_type, &parse_params(&params)?)?;
            print_json(&json!({
                "model_type": prepared.model_type,
                "base_name": prepared.base_name,
                "objects": prepared.objects,
                "script": cadforge_core::to_script(&prepared.commands),
            }))?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Generate { model_type, params, formats } => {
            let formats = parse_formats(&formats).map_err(|e| anyhow!(e))?;
            let result = pipeline.create(&model_type, &parse_params(&params)?, &formats);
            print_json(&result)?;
            Ok(exit_code(result.is_success()))
        }

        Commands::Artifact { file, format } => {
            let format: Option<Format> = format
                .map(|f| f.parse())
                .transpose()
                .map_err(|e: String| anyhow!(e))?;
            let path = pipeline.artifact_path(&file, format)?;
            print_json(&json!({ "success": true, "path": path }))?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Render { file, view, orbit, objects } => {
            let objects = (!objects.is_empty()).then_some(objects.as_slice());
            if orbit {
                let results = pipeline.render_orbit(&file, objects);
                print_json(&results)?;
                return Ok(exit_code(results.iter().all(|r| r.is_success())));
            }
            let view: Option<View> = view
                .map(|v| v.parse())
                .transpose()
                .map_err(|e: String| anyhow!(e))?;
            let result = pipeline.render(&file, view, objects);
            print_json(&result)?;
            Ok(exit_code(result.is_success()))
        }
    }
}
