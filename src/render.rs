//! Orbit-View Rendering
//!
//! Snapshots of a materialized base artifact from fixed camera angles. Output
//! lands in `render_dir/<base>/<base>_<view>.png`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::artifacts::{FailureKind, Status};
use crate::config::EngineConfig;
use crate::formats::{artifact_path, extract_model_type, is_artifact_base_name, Format};
use crate::process::{wait_for_file, Invocation, ProcessRunner};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum View {
    #[default]
    Front,
    Right,
    Back,
    Left,
    Top,
}

impl View {
    pub const ALL: [View; 5] = [View::Front, View::Right, View::Back, View::Left, View::Top];

    pub fn name(self) -> &'static str {
        match self {
            View::Front => "front",
            View::Right => "right",
            View::Back => "back",
            View::Left => "left",
            View::Top => "top",
        }
    }

    /// Camera (azimuth, elevation) in degrees.
    pub fn angles(self) -> (f64, f64) {
        match self {
            View::Front => (0.0, 0.0),
            View::Right => (90.0, 0.0),
            View::Back => (180.0, 0.0),
            View::Left => (270.0, 0.0),
            View::Top => (0.0, 90.0),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        View::ALL
            .into_iter()
            .find(|v| v.name() == wanted)
            .ok_or_else(|| {
                let valid: Vec<&str> = View::ALL.iter().map(|v| v.name()).collect();
                format!("Unknown view '{}'. Valid views: {}", s, valid.join(", "))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    /// Square image edge in pixels.
    pub size: u32,
    pub white_background: bool,
    /// Accept a differently named image produced during this request when the
    /// expected file never appears.
    pub allow_fallback: bool,
}

impl RenderOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            size: config.render_size,
            white_background: config.white_background,
            allow_fallback: true,
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderResult {
    pub request_id: Uuid,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<View>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Set when the image came from the fallback scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub message: String,
    pub elapsed_ms: u64,
}

impl RenderResult {
    fn success(request_id: Uuid, path: PathBuf, warning: Option<String>, started: Instant) -> Self {
        Self {
            request_id,
            status: Status::Success,
            view: None,
            message: format!("Rendered {}", path.display()),
            path: Some(path),
            warning,
            failure: None,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn failed(request_id: Uuid, kind: FailureKind, message: String, started: Instant) -> Self {
        warn!(failure = ?kind, %message, "Render failed");
        Self {
            request_id,
            status: Status::Error,
            view: None,
            path: None,
            warning: None,
            failure: Some(kind),
            message,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

pub struct Renderer {
    config: EngineConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl Renderer {
    pub fn new(config: EngineConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    /// `render_dir/<base>/<base>_<view>.png`
    pub fn output_path(&self, base_name: &str, view: View) -> PathBuf {
        self.config
            .render_dir
            .join(base_name)
            .join(format!("{}_{}.png", base_name, view))
    }

    /// Render `objects` of `base_artifact` from one camera angle into `output`.
    pub fn render_view(
        &self,
        base_artifact: &Path,
        objects: &[String],
        azimuth: f64,
        elevation: f64,
        output: &Path,
        options: &RenderOptions,
    ) -> RenderResult {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let span = info_span!("render", %request_id, output = %output.display());
        let _enter = span.enter();

        if !base_artifact.exists() {
            return RenderResult::failed(
                request_id,
                FailureKind::MissingDependency,
                format!("Base artifact {} does not exist", base_artifact.display()),
                started,
            );
        }
        if objects.is_empty() {
            return RenderResult::failed(
                request_id,
                FailureKind::MissingDependency,
                "No objects to render".to_string(),
                started,
            );
        }

        let out_dir = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        if let Err(e) = fs::create_dir_all(out_dir) {
            return RenderResult::failed(
                request_id,
                FailureKind::ProcessFailure,
                format!("Cannot create render directory {}: {}", out_dir.display(), e),
                started,
            );
        }
        // a leftover image would satisfy the poll without a new render
        if let Err(e) = fs::remove_file(output) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Could not remove previous render");
            }
        }

        let existing = images_in(out_dir);

        let mut invocation = Invocation::new(&self.config.rt)
            .arg("-s")
            .arg(options.size.to_string())
            .arg("-a")
            .arg(azimuth.to_string())
            .arg("-e")
            .arg(elevation.to_string());
        if options.white_background {
            invocation = invocation.arg("-C255/255/255");
        }
        let invocation = invocation
            .arg("-o")
            .arg(output.display().to_string())
            .arg(base_artifact.display().to_string())
            .args(objects.iter().cloned())
            .current_dir(out_dir);

        info!(azimuth, elevation, size = options.size, "Rendering view");
        match self.runner.run(&invocation) {
            Ok(out) if out.succeeded() => {}
            Ok(out) => {
                return RenderResult::failed(
                    request_id,
                    FailureKind::ProcessFailure,
                    format!("{} failed: {}", invocation.program_name(), out.diagnostic()),
                    started,
                )
            }
            Err(e) => {
                return RenderResult::failed(
                    request_id,
                    FailureKind::ProcessFailure,
                    format!("{} could not be started: {}", invocation.program_name(), e),
                    started,
                )
            }
        }

        let poll = self.config.render_poll;
        if wait_for_file(output, poll).is_some() {
            return RenderResult::success(request_id, output.to_path_buf(), None, started);
        }

        if options.allow_fallback {
            if let Some(found) = fresh_image(out_dir, &existing) {
                let warning = format!(
                    "Expected {} but the renderer wrote {}",
                    output.display(),
                    found.display()
                );
                warn!(%warning, "Using fallback render output");
                return RenderResult::success(request_id, found, Some(warning), started);
            }
        }

        RenderResult::failed(
            request_id,
            FailureKind::MaterializationTimeout,
            format!(
                "{} did not appear within {} ms ({} attempts)",
                output.display(),
                poll.max_wait().as_millis(),
                poll.attempts
            ),
            started,
        )
    }

    /// Render one named view of an artifact identified by base name. Objects
    /// default to the model type encoded in the base name.
    pub fn render_named_view(
        &self,
        base_name: &str,
        view: View,
        objects: Option<&[String]>,
        options: &RenderOptions,
    ) -> RenderResult {
        if !is_artifact_base_name(base_name) {
            return RenderResult::failed(
                Uuid::new_v4(),
                FailureKind::MissingDependency,
                format!("Invalid artifact name: {}", base_name),
                Instant::now(),
            );
        }
        let base_artifact = artifact_path(&self.config.work_dir, base_name, Format::G);
        let objects = match objects {
            Some(objects) if !objects.is_empty() => objects.to_vec(),
            _ => vec![extract_model_type(base_name).to_string()],
        };
        let (azimuth, elevation) = view.angles();
        let output = self.output_path(base_name, view);
        debug!(%base_name, %view, ?objects, "Named view");

        let mut result = self.render_view(&base_artifact, &objects, azimuth, elevation, &output, options);
        result.view = Some(view);
        result
    }

    /// All five canonical views, in order.
    pub fn render_orbit(
        &self,
        base_name: &str,
        objects: Option<&[String]>,
        options: &RenderOptions,
    ) -> Vec<RenderResult> {
        View::ALL
            .into_iter()
            .map(|view| self.render_named_view(base_name, view, objects, options))
            .collect()
    }
}

fn images_in(dir: &Path) -> HashSet<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("png")))
        .collect()
}

/// `<anything>_<view>.png`: the expected output of some named view.
fn is_view_image(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit_once('_'))
        .map_or(false, |(_, suffix)| View::ALL.iter().any(|v| v.name() == suffix))
}

/// Image that appeared in `dir` since `before` was taken, ignoring outputs
/// of named views. Newest wins when there are several.
fn fresh_image(dir: &Path, before: &HashSet<PathBuf>) -> Option<PathBuf> {
    images_in(dir)
        .into_iter()
        .filter(|p| !before.contains(p) && !is_view_image(p))
        .filter_map(|p| {
            let modified = fs::metadata(&p).ok()?.modified().ok()?;
            Some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{PollConfig, ProcessOutput};
    use tempfile::tempdir;

    /// Writes the image named by `-o`, or `alternate` in the same directory.
    struct FakeRt {
        alternate: Option<&'static str>,
    }

    impl ProcessRunner for FakeRt {
        fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
            let output = PathBuf::from(invocation.flag_value("-o").unwrap_or_default());
            let target = match self.alternate {
                Some(name) => output.with_file_name(name),
                None => output,
            };
            fs::write(target, b"png")?;
            Ok(ProcessOutput::success())
        }
    }

    fn renderer(dir: &Path, alternate: Option<&'static str>) -> Renderer {
        let mut config = EngineConfig::in_dir(dir);
        config.render_poll = PollConfig::new(2, 5);
        Renderer::new(config, Arc::new(FakeRt { alternate }))
    }

    #[test]
    fn test_view_parsing() {
        assert_eq!("TOP".parse::<View>().unwrap(), View::Top);
        assert_eq!(View::Left.angles(), (270.0, 0.0));
        let err = "iso".parse::<View>().unwrap_err();
        assert!(err.contains("front, right, back, left, top"));
    }

    #[test]
    fn test_named_view_path() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("washer-abcdefghij.g"), b"db").unwrap();
        let r = renderer(dir.path(), None);

        let result = r.render_named_view("washer-abcdefghij", View::Right, None, &RenderOptions::default());
        assert!(result.is_success(), "{}", result.message);
        assert_eq!(
            result.path.unwrap(),
            dir.path().join("render/washer-abcdefghij/washer-abcdefghij_right.png")
        );
        assert!(result.warning.is_none());
    }

    #[test]
    fn test_fallback_picks_fresh_image() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("box-abcdefghij.g"), b"db").unwrap();
        let r = renderer(dir.path(), Some("rt-output.png"));

        let result = r.render_named_view("box-abcdefghij", View::Front, None, &RenderOptions::default());
        assert!(result.is_success());
        assert!(result.path.unwrap().ends_with("rt-output.png"));
        assert!(result.warning.is_some());
    }

    #[test]
    fn test_fallback_disabled_times_out() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("box-abcdefghij.g"), b"db").unwrap();
        let r = renderer(dir.path(), Some("rt-output.png"));
        let options = RenderOptions {
            allow_fallback: false,
            ..RenderOptions::default()
        };

        let result = r.render_named_view("box-abcdefghij", View::Front, None, &options);
        assert_eq!(result.failure, Some(FailureKind::MaterializationTimeout));
    }

    #[test]
    fn test_images_present_before_render_are_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("box-abcdefghij.g"), b"db").unwrap();
        let r = renderer(dir.path(), Some("rt-output.png"));
        let out_dir = dir.path().join("render/box-abcdefghij");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("rt-output.png"), b"old").unwrap();

        let result = r.render_named_view("box-abcdefghij", View::Front, None, &RenderOptions::default());
        assert_eq!(result.failure, Some(FailureKind::MaterializationTimeout));
    }

    #[test]
    fn test_sibling_view_is_never_a_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sphere-abcdefghij.g"), b"db").unwrap();
        let r = renderer(dir.path(), Some("sphere-abcdefghij_front.png"));

        let front = r.render_named_view("sphere-abcdefghij", View::Front, None, &RenderOptions::default());
        assert!(front.is_success());
        assert!(front.warning.is_none());

        let right = r.render_named_view("sphere-abcdefghij", View::Right, None, &RenderOptions::default());
        assert!(!right.is_success());
        assert_eq!(right.failure, Some(FailureKind::MaterializationTimeout));
    }

    #[test]
    fn test_names_outside_render_dir_rejected() {
        let dir = tempdir().unwrap();
        let r = renderer(dir.path(), None);
        for name in ["/tmp/elsewhere/box-abcdefghij", "../box-abcdefghij"] {
            let result = r.render_named_view(name, View::Front, None, &RenderOptions::default());
            assert!(!result.is_success());
            assert!(result.message.contains("Invalid artifact name"));
        }
        assert!(!dir.path().join("render").exists());
    }

    #[test]
    fn test_view_image_names() {
        assert!(is_view_image(Path::new("/r/washer-abc_top.png")));
        assert!(!is_view_image(Path::new("/r/rt-output.png")));
        assert!(!is_view_image(Path::new("/r/washer-abc_iso.png")));
    }

    #[test]
    fn test_missing_base_artifact() {
        let dir = tempdir().unwrap();
        let r = renderer(dir.path(), None);
        let result = r.render_named_view("sphere-qqqqqqqqqq", View::Top, None, &RenderOptions::default());
        assert_eq!(result.failure, Some(FailureKind::MissingDependency));
        assert_eq!(result.view, Some(View::Top));
    }
}
