//! File naming for saved samples
//!
//! A saved file's path is built from a `BasePath` (folder, stem, extension)
//! plus optional suffixes: a wall-clock timestamp and/or the running save
//! count. When a session can produce more than one file and no suffix was
//! asked for, a timestamp suffix is added anyway so files never overwrite
//! each other.

use crate::error::{Error, Result};
use crate::stop::Limit;
use chrono::{DateTime, Local};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Set of suffixes appended to saved file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Append(u8);

impl Append {
    /// No suffix
    pub const NONE: Self = Self(0);
    /// `_<count>` suffix
    pub const COUNT: Self = Self(0b01);
    /// `_YYYYMMDD_HHMMSS.mmm` suffix
    pub const TIMESTAMP: Self = Self(0b10);

    /// Whether every suffix in `other` is present
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no suffix is selected
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Build a set from option names (`"count"`, `"timestamp"`, `"none"`)
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::NONE, |append, name| {
            Ok(append | name.as_ref().parse::<Append>()?)
        })
    }

    /// Option names present in this set
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::COUNT) {
            names.push("count");
        }
        if self.contains(Self::TIMESTAMP) {
            names.push("timestamp");
        }
        names
    }
}

impl BitOr for Append {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Append {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Parses a single option name, or several joined by `|` or `,`
impl FromStr for Append {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        value
            .split(['|', ','])
            .map(|name| name.trim().to_ascii_lowercase())
            .try_fold(Self::NONE, |append, name| match name.as_str() {
                "" | "none" => Ok(append),
                "count" => Ok(append | Self::COUNT),
                "timestamp" => Ok(append | Self::TIMESTAMP),
                _ => Err(Error::configuration(format!("invalid append value '{name}'"))),
            })
    }
}

impl fmt::Display for Append {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

/// Suffixes actually applied, given the configured set and the stop rule
///
/// An empty set is promoted to `TIMESTAMP` whenever the session can write
/// more than one file.
pub fn effective_append(append: Append, limit: &Limit) -> Append {
    if append.is_empty() && limit.produces_multiple_files() {
        Append::TIMESTAMP
    } else {
        append
    }
}

/// Wall-clock timestamp with millisecond precision: `YYYYMMDD_HHMMSS.mmm`
pub fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S%.3f").to_string()
}

/// Ensure a non-empty extension starts with a dot
pub fn normalize_extension(extension: &str) -> String {
    let extension = extension.trim();
    if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    }
}

/// Base path split into folder, stem and extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasePath {
    /// Directory the files are written to
    pub folder: PathBuf,
    /// File name without extension
    pub stem: String,
    /// Extension including the leading dot, possibly empty
    pub extension: String,
}

impl BasePath {
    /// Split `path`, taking `default_extension` when the file has none
    pub fn parse(path: impl AsRef<Path>, default_extension: &str) -> Result<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy().into_owned();

        if display.is_empty() {
            return Err(Error::InvalidPath {
                path: display,
                reason: "path is empty",
            });
        }
        if display.contains('\0') {
            return Err(Error::InvalidPath {
                path: display,
                reason: "path contains a NUL byte",
            });
        }

        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| Error::InvalidPath {
                path: display.clone(),
                reason: "path has no file name",
            })?;

        let extension = match path.extension() {
            Some(extension) => format!(".{}", extension.to_string_lossy()),
            None => normalize_extension(default_extension),
        };

        Ok(Self {
            folder: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            stem,
            extension,
        })
    }

    /// Path with the suffixes selected by `append`
    ///
    /// The timestamp comes first, then the count, then the extension.
    pub fn resolve(&self, append: Append, count: u64, now: &DateTime<Local>) -> PathBuf {
        let mut name = self.stem.clone();
        if append.contains(Append::TIMESTAMP) {
            name.push('_');
            name.push_str(&timestamp(now));
        }
        if append.contains(Append::COUNT) {
            name.push('_');
            name.push_str(&count.to_string());
        }
        name.push_str(&self.extension);

        self.folder.join(name)
    }

    /// The unsuffixed path
    pub fn to_path_buf(&self) -> PathBuf {
        self.folder.join(format!("{}{}", self.stem, self.extension))
    }
}
