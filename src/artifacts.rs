//! Artifact Generation - Base Build and Format Conversion
//!
//! Per request: build the base database once (unless cached), wait for it to
//! appear, then convert it into every requested format not already on disk.
//! Formats fail independently; a failed conversion never discards one that
//! already succeeded.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::command::{to_script, SceneCommand};
use crate::config::EngineConfig;
use crate::formats::{artifact_path, Format};
use crate::process::{wait_for_file, Invocation, PollConfig, ProcessRunner};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Why a request, or one format of it, failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownType,
    SchemaValidation,
    GeneratorFailure,
    ProcessFailure,
    MaterializationTimeout,
    MissingDependency,
}

/// Last stage a request reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStage {
    Preparing,
    BuildingBase,
    WaitingForBase,
    ConvertingFormats,
    WaitingForFormat,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatOutcome {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Served from a file that existed before this request.
    #[serde(default)]
    pub cached: bool,
}

impl FormatOutcome {
    pub fn produced(path: PathBuf, cached: bool) -> Self {
        Self {
            status: Status::Success,
            path: Some(path),
            error: None,
            failure: None,
            cached,
        }
    }

    pub fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            path: None,
            error: Some(error.into()),
            failure: Some(kind),
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Outcome of one generation request. Built fresh for every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub request_id: Uuid,
    pub status: Status,
    pub model_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,
    pub formats: BTreeMap<Format, FormatOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    pub stage: GenerationStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl GenerationResult {
    /// Failure before any artifact work started (unknown type, generator error).
    pub fn rejected(model_type: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            status: Status::Error,
            model_type: model_type.to_string(),
            base_name: None,
            base_path: None,
            formats: BTreeMap::new(),
            objects: vec![],
            stage: GenerationStage::Failed,
            failure: Some(kind),
            message: message.into(),
            created_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Path of a successfully produced format.
    pub fn path(&self, format: Format) -> Option<&Path> {
        self.formats
            .get(&format)
            .filter(|o| o.is_success())
            .and_then(|o| o.path.as_deref())
    }
}

/// What to build: output of `ModelRegistry::prepare`.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    pub model_type: &'a str,
    pub base_name: &'a str,
    pub commands: &'a [SceneCommand],
    pub objects: &'a [String],
    pub formats: &'a [Format],
}

/// Per-key mutual exclusion so identical concurrent requests build once.
#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_key<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let release = SlotRelease {
            locks: self,
            key,
            slot,
        };

        let _guard = release.slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Drops a key's slot once no caller holds it, also when the locked work panics.
struct SlotRelease<'a> {
    locks: &'a KeyLocks,
    key: &'a str,
    slot: Arc<Mutex<()>>,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // only the map and this call still hold the slot
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(self.key);
        }
    }
}

/// Drives the engine and converters for one artifact directory.
pub struct ArtifactBuilder {
    config: EngineConfig,
    runner: Arc<dyn ProcessRunner>,
    locks: KeyLocks,
}

impl ArtifactBuilder {
    pub fn new(config: EngineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            locks: KeyLocks::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn artifact_path(&self, base_name: &str, format: Format) -> PathBuf {
        artifact_path(&self.config.work_dir, base_name, format)
    }

    pub fn build(&self, request: &BuildRequest<'_>) -> GenerationResult {
        if self.config.serialize_builds {
            self.locks.with_key(request.base_name, || self.build_unlocked(request))
        } else {
            self.build_unlocked(request)
        }
    }

    fn build_unlocked(&self, request: &BuildRequest<'_>) -> GenerationResult {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let span = info_span!("generate", %request_id, base = %request.base_name);
        let _enter = span.enter();

        let formats: Vec<Format> = if request.formats.is_empty() {
            self.config.default_formats.clone()
        } else {
            request.formats.to_vec()
        };

        let mut run = Run {
            result: GenerationResult {
                request_id,
                status: Status::Success,
                model_type: request.model_type.to_string(),
                base_name: Some(request.base_name.to_string()),
                base_path: None,
                formats: BTreeMap::new(),
                objects: request.objects.to_vec(),
                stage: GenerationStage::Preparing,
                failure: None,
                message: String::new(),
                created_at: Utc::now(),
                elapsed_ms: 0,
            },
        };

        if let Err(e) = fs::create_dir_all(&self.config.work_dir) {
            let message = format!(
                "Cannot create work directory {}: {}",
                self.config.work_dir.display(),
                e
            );
            return run.fail_all(&formats, FailureKind::ProcessFailure, message, started);
        }

        let base_path = self.artifact_path(request.base_name, Format::G);
        let base_cached = base_path.exists();

        // formats already on disk need no work at all
        let mut pending = Vec::new();
        for &format in formats.iter().filter(|f| !f.is_base()) {
            let path = self.artifact_path(request.base_name, format);
            if path.exists() {
                debug!(%format, path = %path.display(), "Format already cached");
                run.result.formats.insert(format, FormatOutcome::produced(path, true));
            } else {
                pending.push(format);
            }
        }

        let wants_base = formats.contains(&Format::G);
        if !base_cached && (wants_base || !pending.is_empty()) {
            if let Err((kind, message)) = self.build_base(&mut run, request, &base_path) {
                error!(failure = ?kind, %message, "Base artifact failed");
                if wants_base {
                    run.result
                        .formats
                        .insert(Format::G, FormatOutcome::failed(kind, message.clone()));
                }
                for format in pending {
                    run.result.formats.insert(
                        format,
                        FormatOutcome::failed(
                            FailureKind::MissingDependency,
                            format!("Base artifact {} is unavailable: {}", base_path.display(), message),
                        ),
                    );
                }
                run.result.failure = Some(kind);
                run.result.stage = GenerationStage::Failed;
                run.result.message = message;
                return run.finish(started);
            }
        } else if base_cached {
            info!(path = %base_path.display(), "Using cached base artifact");
        }

        if base_path.exists() {
            run.result.base_path = Some(base_path.clone());
        }
        if wants_base {
            run.result
                .formats
                .insert(Format::G, FormatOutcome::produced(base_path.clone(), base_cached));
        }

        for format in pending {
            let outcome = self.convert(&mut run, request, &base_path, format);
            run.result.formats.insert(format, outcome);
        }

        run.result.stage = GenerationStage::Done;
        run.finish(started)
    }

    fn build_base(
        &self,
        run: &mut Run,
        request: &BuildRequest<'_>,
        base_path: &Path,
    ) -> Result<(), (FailureKind, String)> {
        run.result.stage = GenerationStage::BuildingBase;
        let script = to_script(request.commands);
        info!(commands = request.commands.len(), "Building base artifact");
        debug!(%script, "Engine script");

        let invocation = Invocation::new(&self.config.mged)
            .arg("-c")
            .arg(base_path.display().to_string())
            .arg(script)
            .current_dir(&self.config.work_dir);
        let built = self.run_tool(&invocation).and_then(|()| {
            run.result.stage = GenerationStage::WaitingForBase;
            self.await_output(base_path, self.config.artifact_poll)
        });
        if built.is_err() {
            discard_partial(base_path);
        }
        built
    }

    fn convert(
        &self,
        run: &mut Run,
        request: &BuildRequest<'_>,
        base_path: &Path,
        format: Format,
    ) -> FormatOutcome {
        run.result.stage = GenerationStage::ConvertingFormats;
        let output = self.artifact_path(request.base_name, format);

        if !base_path.exists() {
            return FormatOutcome::failed(
                FailureKind::MissingDependency,
                format!("Base artifact {} does not exist", base_path.display()),
            );
        }
        let Some(program) = self.config.converter_program(format) else {
            return FormatOutcome::failed(
                FailureKind::MissingDependency,
                format!("No converter configured for {}", format),
            );
        };

        let invocation = Invocation::new(program)
            .args(self.converter_flags(format))
            .arg("-o")
            .arg(output.display().to_string())
            .arg(base_path.display().to_string())
            .args(request.objects.iter().cloned())
            .current_dir(&self.config.work_dir);

        info!(%format, "Converting base artifact");
        let outcome = self.run_tool(&invocation).and_then(|()| {
            run.result.stage = GenerationStage::WaitingForFormat;
            self.await_output(&output, self.config.artifact_poll)
        });

        match outcome {
            Ok(()) => FormatOutcome::produced(output, false),
            Err((kind, message)) => {
                warn!(%format, failure = ?kind, %message, "Format conversion failed");
                discard_partial(&output);
                FormatOutcome::failed(kind, message)
            }
        }
    }

    fn converter_flags(&self, format: Format) -> Vec<String> {
        let options = &self.config.converter;
        let mut flags = Vec::new();
        if matches!(format, Format::Obj | Format::Stl) {
            if let Some(tolerance) = options.tolerance {
                flags.push("-a".to_string());
                flags.push(tolerance.to_string());
            }
        }
        if format == Format::Stl && options.binary_stl {
            flags.push("-b".to_string());
        }
        if options.verbose {
            flags.push("-v".to_string());
        }
        flags
    }

    fn run_tool(&self, invocation: &Invocation) -> Result<(), (FailureKind, String)> {
        let name = invocation.program_name();
        match self.runner.run(invocation) {
            Ok(output) if output.succeeded() => Ok(()),
            Ok(output) => Err((
                FailureKind::ProcessFailure,
                format!("{} failed: {}", name, output.diagnostic()),
            )),
            Err(e) => Err((
                FailureKind::ProcessFailure,
                format!("{} could not be started: {}", name, e),
            )),
        }
    }

    fn await_output(&self, path: &Path, poll: PollConfig) -> Result<(), (FailureKind, String)> {
        match wait_for_file(path, poll) {
            Some(_) => Ok(()),
            None => Err((
                FailureKind::MaterializationTimeout,
                format!(
                    "{} did not appear within {} ms ({} attempts)",
                    path.display(),
                    poll.max_wait().as_millis(),
                    poll.attempts
                ),
            )),
        }
    }
}

/// Remove what a failed tool left at `path` so it is never served as cached.
fn discard_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not remove partial output"),
    }
}

/// Mutable state of one request while it runs.
struct Run {
    result: GenerationResult,
}

impl Run {
    fn fail_all(
        mut self,
        formats: &[Format],
        kind: FailureKind,
        message: String,
        started: Instant,
    ) -> GenerationResult {
        for &format in formats {
            self.result
                .formats
                .insert(format, FormatOutcome::failed(kind, message.clone()));
        }
        self.result.failure = Some(kind);
        self.result.stage = GenerationStage::Failed;
        self.result.message = message;
        self.finish(started)
    }

    fn finish(mut self, started: Instant) -> GenerationResult {
        let result = &mut self.result;
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        let failed: Vec<String> = result
            .formats
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(f, o)| format!("{}: {}", f, o.error.as_deref().unwrap_or("failed")))
            .collect();
        let produced = result.formats.values().filter(|o| o.is_success()).count();

        if result.stage == GenerationStage::Failed || produced == 0 {
            result.status = Status::Error;
            if result.failure.is_none() {
                result.failure = result.formats.values().find_map(|o| o.failure);
            }
            if result.message.is_empty() {
                result.message = failed.join("; ");
            }
        } else if failed.is_empty() {
            result.message = format!("Generated {} format(s)", produced);
        } else {
            result.message = format!(
                "Generated {} format(s), {} failed: {}",
                produced,
                failed.len(),
                failed.join("; ")
            );
        }

        info!(
            status = ?result.status,
            elapsed_ms = result.elapsed_ms,
            message = %result.message,
            "Generation finished"
        );
        self.result
    }
}
