//! Scene Commands - Typed Engine Instructions
//!
//! Generators build `SceneCommand` values instead of strings. Object names are
//! explicit fields, so namespacing an assembly is a field rewrite and never a
//! text search. `Display` produces the engine's command language:
//!
//! ```text
//! in outer rcc 0 0 0 0 0 2 5
//! r washer u outer - inner
//! cp washer washer-copy
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::format_number;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Empty instruction")]
    Empty,

    #[error("Unrecognized instruction: {0}")]
    Unrecognized(String),

    #[error("Unknown primitive: {0}")]
    UnknownPrimitive(String),

    #[error("Invalid number {value} in instruction: {instruction}")]
    InvalidNumber { value: String, instruction: String },

    #[error("Primitive {primitive} takes {expected} arguments, got {actual}")]
    Arity {
        primitive: Primitive,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    /// Right circular cylinder: base point, height vector, radius.
    Rcc,
    /// Axis-aligned box: xmin xmax ymin ymax zmin zmax.
    Rpp,
    /// Sphere: center, radius.
    Sph,
    /// Torus: center, normal, major radius, minor radius.
    Tor,
    /// Truncated right cone: base point, height vector, base radius, top radius.
    Trc,
}

impl Primitive {
    pub fn code(self) -> &'static str {
        match self {
            Primitive::Rcc => "rcc",
            Primitive::Rpp => "rpp",
            Primitive::Sph => "sph",
            Primitive::Tor => "tor",
            Primitive::Trc => "trc",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Primitive::Rcc => 7,
            Primitive::Rpp => 6,
            Primitive::Sph => 4,
            Primitive::Tor => 8,
            Primitive::Trc => 8,
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Primitive {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rcc" => Ok(Primitive::Rcc),
            "rpp" => Ok(Primitive::Rpp),
            "sph" => Ok(Primitive::Sph),
            "tor" => Ok(Primitive::Tor),
            "trc" => Ok(Primitive::Trc),
            other => Err(CommandError::UnknownPrimitive(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoolOp {
    Union,
    Subtract,
    Intersect,
}

impl BoolOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BoolOp::Union => "u",
            BoolOp::Subtract => "-",
            BoolOp::Intersect => "+",
        }
    }

    fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "u" => Some(BoolOp::Union),
            "-" => Some(BoolOp::Subtract),
            "+" => Some(BoolOp::Intersect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum SceneCommand {
    /// `in NAME PRIMITIVE args...`
    Insert {
        name: String,
        primitive: Primitive,
        args: Vec<f64>,
    },
    /// `r RESULT u FIRST OP NAME ...`
    Combine {
        result: String,
        first: String,
        rest: Vec<(BoolOp, String)>,
    },
    /// `cp FROM TO`
    Copy { from: String, to: String },
}

impl SceneCommand {
    pub fn insert(name: &str, primitive: Primitive, args: Vec<f64>) -> Self {
        SceneCommand::Insert {
            name: name.to_string(),
            primitive,
            args,
        }
    }

    /// Right circular cylinder standing on `base`, extruded along +z.
    pub fn cylinder(name: &str, base: [f64; 3], height: f64, radius: f64) -> Self {
        let [x, y, z] = base;
        Self::insert(name, Primitive::Rcc, vec![x, y, z, 0.0, 0.0, height, radius])
    }

    pub fn cuboid(name: &str, min: [f64; 3], max: [f64; 3]) -> Self {
        Self::insert(
            name,
            Primitive::Rpp,
            vec![min[0], max[0], min[1], max[1], min[2], max[2]],
        )
    }

    pub fn sphere(name: &str, center: [f64; 3], radius: f64) -> Self {
        let [x, y, z] = center;
        Self::insert(name, Primitive::Sph, vec![x, y, z, radius])
    }

    pub fn subtract(result: &str, from: &str, cut: &str) -> Self {
        SceneCommand::Combine {
            result: result.to_string(),
            first: from.to_string(),
            rest: vec![(BoolOp::Subtract, cut.to_string())],
        }
    }

    pub fn intersect(result: &str, a: &str, b: &str) -> Self {
        SceneCommand::Combine {
            result: result.to_string(),
            first: a.to_string(),
            rest: vec![(BoolOp::Intersect, b.to_string())],
        }
    }

    /// Union of one or more objects. An empty member list yields a
    /// combination the engine rejects.
    pub fn union<S: AsRef<str>>(result: &str, members: &[S]) -> Self {
        let mut names = members.iter().map(|m| m.as_ref().to_string());
        let first = names.next().unwrap_or_default();
        SceneCommand::Combine {
            result: result.to_string(),
            first,
            rest: names.map(|n| (BoolOp::Union, n)).collect(),
        }
    }

    pub fn copy(from: &str, to: &str) -> Self {
        SceneCommand::Copy {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Name of the object this instruction creates.
    pub fn defines(&self) -> &str {
        match self {
            SceneCommand::Insert { name, .. } => name,
            SceneCommand::Combine { result, .. } => result,
            SceneCommand::Copy { to, .. } => to,
        }
    }

    /// Names this instruction reads.
    pub fn operands(&self) -> Vec<&str> {
        match self {
            SceneCommand::Insert { .. } => vec![],
            SceneCommand::Combine { first, rest, .. } => std::iter::once(first.as_str())
                .chain(rest.iter().map(|(_, n)| n.as_str()))
                .collect(),
            SceneCommand::Copy { from, .. } => vec![from.as_str()],
        }
    }

    /// Rewrite every object name present in `map`; others are kept.
    pub fn rename(&self, map: &HashMap<String, String>) -> Self {
        let r = |name: &String| map.get(name).cloned().unwrap_or_else(|| name.clone());
        match self {
            SceneCommand::Insert {
                name,
                primitive,
                args,
            } => SceneCommand::Insert {
                name: r(name),
                primitive: *primitive,
                args: args.clone(),
            },
            SceneCommand::Combine {
                result,
                first,
                rest,
            } => SceneCommand::Combine {
                result: r(result),
                first: r(first),
                rest: rest.iter().map(|(op, n)| (*op, r(n))).collect(),
            },
            SceneCommand::Copy { from, to } => SceneCommand::Copy {
                from: r(from),
                to: r(to),
            },
        }
    }

    /// Parse one instruction of the engine language.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let unrecognized = || CommandError::Unrecognized(line.trim().to_string());

        match tokens.as_slice() {
            [] => Err(CommandError::Empty),
            ["in", name, code, args @ ..] => {
                let primitive: Primitive = code.parse()?;
                let args = args
                    .iter()
                    .map(|a| {
                        a.parse::<f64>().map_err(|_| CommandError::InvalidNumber {
                            value: a.to_string(),
                            instruction: line.trim().to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if args.len() != primitive.arity() {
                    return Err(CommandError::Arity {
                        primitive,
                        expected: primitive.arity(),
                        actual: args.len(),
                    });
                }
                Ok(SceneCommand::Insert {
                    name: name.to_string(),
                    primitive,
                    args,
                })
            }
            ["r", result, "u", first, rest @ ..] if rest.len() % 2 == 0 => {
                let rest = rest
                    .chunks(2)
                    .map(|pair| {
                        BoolOp::from_symbol(pair[0])
                            .map(|op| (op, pair[1].to_string()))
                            .ok_or_else(unrecognized)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SceneCommand::Combine {
                    result: result.to_string(),
                    first: first.to_string(),
                    rest,
                })
            }
            ["cp", from, to] => Ok(SceneCommand::copy(from, to)),
            _ => Err(unrecognized()),
        }
    }
}

impl fmt::Display for SceneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneCommand::Insert {
                name,
                primitive,
                args,
            } => {
                write!(f, "in {} {}", name, primitive)?;
                for arg in args {
                    write!(f, " {}", format_number(*arg))?;
                }
                Ok(())
            }
            SceneCommand::Combine {
                result,
                first,
                rest,
            } => {
                write!(f, "r {} u {}", result, first)?;
                for (op, name) in rest {
                    write!(f, " {} {}", op.symbol(), name)?;
                }
                Ok(())
            }
            SceneCommand::Copy { from, to } => write!(f, "cp {} {}", from, to),
        }
    }
}

impl FromStr for SceneCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SceneCommand::parse(s)
    }
}

/// Semicolon-joined script handed to the engine.
pub fn to_script(commands: &[SceneCommand]) -> String {
    commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a semicolon-joined script.
pub fn parse_script(script: &str) -> Result<Vec<SceneCommand>, CommandError> {
    script
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .map(SceneCommand::parse)
        .collect()
}

/// Every object name the commands create, in first-definition order.
pub fn defined_names(commands: &[SceneCommand]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    commands
        .iter()
        .map(SceneCommand::defines)
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Objects no other command consumes: what converters and renderers export.
pub fn top_level_objects(commands: &[SceneCommand]) -> Vec<String> {
    let consumed: BTreeSet<&str> = commands.iter().flat_map(|c| c.operands()).collect();
    defined_names(commands)
        .into_iter()
        .filter(|name| !consumed.contains(name.as_str()))
        .collect()
}
