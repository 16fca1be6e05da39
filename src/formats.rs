//! Artifact formats and file naming.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::hashing::split_base_name;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Engine database, the base artifact every other format is converted from.
    G,
    Obj,
    Stl,
    Step,
}

impl Format {
    pub const ALL: [Format; 4] = [Format::G, Format::Obj, Format::Stl, Format::Step];

    pub fn name(self) -> &'static str {
        match self {
            Format::G => "g",
            Format::Obj => "obj",
            Format::Stl => "stl",
            Format::Step => "step",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::G => "g",
            Format::Obj => "obj",
            Format::Stl => "stl",
            Format::Step => "stp",
        }
    }

    /// Default converter program, `None` for the base format.
    pub fn converter(self) -> Option<&'static str> {
        match self {
            Format::G => None,
            Format::Obj => Some("g-obj"),
            Format::Stl => Some("g-stl"),
            Format::Step => Some("g-step"),
        }
    }

    pub fn is_base(self) -> bool {
        self == Format::G
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Format::ALL
            .iter()
            .copied()
            .find(|f| f.name() == lower || f.extension() == lower)
            .ok_or_else(|| {
                let valid: Vec<_> = Format::ALL.iter().map(|f| f.name()).collect();
                format!("Invalid format: {}. Valid formats are: {}", s, valid.join(", "))
            })
    }
}

/// Parse a list of format names, deduplicated and in canonical order.
pub fn parse_formats<S: AsRef<str>>(names: &[S]) -> Result<Vec<Format>, String> {
    let mut formats: Vec<Format> = names
        .iter()
        .map(|n| n.as_ref().parse())
        .collect::<Result<_, _>>()?;
    formats.sort();
    formats.dedup();
    Ok(formats)
}

/// Filename without its extension.
pub fn base_filename(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((base, _)) if !base.is_empty() => base,
        _ => filename,
    }
}

/// `base` with the format's extension appended; `base` is used as is.
pub fn with_extension(base: &str, format: Format) -> String {
    format!("{}.{}", base, format.extension())
}

/// A single path component in `<model-type>-<key>` form.
pub fn is_artifact_base_name(base: &str) -> bool {
    !base.is_empty()
        && !base.contains(|c: char| c == '/' || c == '\\')
        && !base.contains("..")
        && !Path::new(base).is_absolute()
        && split_base_name(base).is_some()
}

/// Model type encoded in an artifact file name.
pub fn extract_model_type(filename: &str) -> &str {
    let base = base_filename(filename);
    match split_base_name(base) {
        Some((model_type, _)) => model_type,
        None => base,
    }
}

pub fn artifact_path(dir: &Path, base: &str, format: Format) -> PathBuf {
    dir.join(with_extension(base, format))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_uses_stp_extension() {
        assert_eq!(with_extension("washer-abcdefghij", Format::Step), "washer-abcdefghij.stp");
        assert_eq!("stp".parse::<Format>(), Ok(Format::Step));
    }

    #[test]
    fn test_invalid_format_lists_valid_ones() {
        let err = "dwg".parse::<Format>().unwrap_err();
        assert!(err.contains("g, obj, stl, step"));
    }

    #[test]
    fn test_parse_formats_dedup() {
        assert_eq!(
            parse_formats(&["stl", "OBJ", "stl"]).unwrap(),
            vec![Format::Obj, Format::Stl]
        );
    }

    #[test]
    fn test_filename_helpers() {
        assert_eq!(base_filename("washer-abcdefghij.obj"), "washer-abcdefghij");
        assert_eq!(base_filename("washer"), "washer");
        assert_eq!(extract_model_type("hollow-cylinder-ab-defghij.g"), "hollow-cylinder");
        assert_eq!(extract_model_type("washer"), "washer");
    }

    #[test]
    fn test_dotted_directories_kept() {
        let dir = Path::new("/tmp/.tmpAb12/x");
        assert_eq!(
            artifact_path(dir, "box-abcdefghij", Format::Obj),
            PathBuf::from("/tmp/.tmpAb12/x/box-abcdefghij.obj")
        );
    }

    #[test]
    fn test_artifact_base_names() {
        assert!(is_artifact_base_name("hollow-cylinder-ab-defghij"));
        assert!(!is_artifact_base_name("/tmp/secret/secret"));
        assert!(!is_artifact_base_name("../box-abcdefghij"));
        assert!(!is_artifact_base_name("sub/box-abcdefghij"));
        assert!(!is_artifact_base_name("box..abcdefghij"));
        assert!(!is_artifact_base_name("washer"));
        assert!(!is_artifact_base_name(""));
    }
}
