// src/manifest/glob_files.rs

//! Glob-pattern file adds
//!
//! An `add_files` entry with `source_glob` expands to one file copy per
//! matching regular file:
//!
//! ```yaml
//! add_files:
//!   - path: /etc/app/
//!     source_glob: "config/**/*.conf"
//!     preserve_path: true
//! ```
//!
//! Without `preserve_path` every match lands directly in the destination
//! directory. With it, the part of the match below the pattern's "glob
//! prefix" is kept:
//!
//! | pattern | prefix stripped |
//! |---|---|
//! | contains `..` | everything (flattened to the file name) |
//! | absolute | leading literal directories |
//! | contains `**` | literal part before `**` |
//! | plain relative | the manifest directory |

use glob::{MatchOptions, Pattern};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::ManifestError;

pub const DEFAULT_MAX_FILES: usize = 1000;

/// A `source_glob` entry of `add_files`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobEntry {
    pub pattern: String,
    /// Destination directory
    pub destination: String,
    pub preserve_path: bool,
    pub allow_empty: bool,
    pub max_files: usize,
}

impl GlobEntry {
    /// Read a glob entry; `None` if the entry has no `source_glob`
    pub fn from_entry(entry: &Map<String, Value>) -> Option<Self> {
        let pattern = entry.get("source_glob")?.as_str()?.to_string();
        let destination = entry.get("path")?.as_str()?.to_string();
        let flag = |key: &str| entry.get(key).and_then(Value::as_bool).unwrap_or(false);

        Some(Self {
            pattern,
            destination,
            preserve_path: flag("preserve_path"),
            allow_empty: flag("allow_empty"),
            max_files: entry
                .get("max_files")
                .and_then(Value::as_u64)
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(DEFAULT_MAX_FILES),
        })
    }
}

/// One matched file and where it goes in the image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobMatch {
    /// Absolute source path
    pub source: PathBuf,
    pub destination: String,
}

/// Result of expanding one glob entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobExpansion {
    pub files: Vec<GlobMatch>,
    /// Directories that must exist before the copies, in first-seen order
    pub directories: Vec<String>,
}

/// Expand a glob entry against the manifest directory
pub fn expand(entry: &GlobEntry, manifest_dir: &Path) -> Result<GlobExpansion, ManifestError> {
    let full_pattern = if Path::new(&entry.pattern).is_absolute() {
        entry.pattern.clone()
    } else {
        Path::new(&Pattern::escape(&manifest_dir.to_string_lossy()))
            .join(&entry.pattern)
            .to_string_lossy()
            .into_owned()
    };

    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let invalid = |message: String| ManifestError::InvalidGlob {
        pattern: entry.pattern.clone(),
        message,
    };

    let mut matches = Vec::new();
    for path in glob::glob_with(&full_pattern, options).map_err(|e| invalid(e.to_string()))? {
        let path = path.map_err(|e| invalid(e.to_string()))?;
        if path.is_file() {
            matches.push(path);
        }
    }
    matches.sort();

    let destination_dir = entry.destination.trim_end_matches('/');
    if matches.is_empty() {
        if entry.allow_empty {
            debug!("Glob {} matched nothing, creating {}", entry.pattern, destination_dir);
            return Ok(GlobExpansion {
                files: Vec::new(),
                directories: vec![destination_dir.to_string()],
            });
        }
        return Err(ManifestError::NoMatchingFiles(entry.pattern.clone()));
    }

    if matches.len() > entry.max_files {
        return Err(ManifestError::TooManyFiles {
            pattern: entry.pattern.clone(),
            matched: matches.len(),
            max_files: entry.max_files,
        });
    }

    let prefix = if entry.preserve_path {
        glob_prefix(&entry.pattern, manifest_dir)
    } else {
        None
    };

    let mut expansion = GlobExpansion::default();
    for path in matches {
        let relative = prefix
            .as_deref()
            .and_then(|prefix| path.strip_prefix(prefix).ok())
            .map(Path::to_path_buf)
            .or_else(|| path.file_name().map(PathBuf::from))
            .unwrap_or_default();

        let destination = format!("{}/{}", destination_dir, relative.to_string_lossy());
        if let Some(parent) = Path::new(&destination).parent() {
            let parent = parent.to_string_lossy().into_owned();
            if parent != destination_dir && !expansion.directories.contains(&parent) {
                expansion.directories.push(parent);
            }
        }

        let source = std::path::absolute(&path).unwrap_or(path);
        expansion.files.push(GlobMatch {
            source,
            destination,
        });
    }

    debug!(
        "Glob {} expanded to {} files",
        entry.pattern,
        expansion.files.len()
    );
    Ok(expansion)
}

/// The directory whose contents keep their relative layout under the
/// destination, or `None` when matches are flattened
pub fn glob_prefix(pattern: &str, manifest_dir: &Path) -> Option<PathBuf> {
    if pattern.contains("..") {
        return None;
    }

    if Path::new(pattern).is_absolute() {
        let literal: PathBuf = Path::new(pattern)
            .components()
            .take_while(|c| !has_wildcard(&c.as_os_str().to_string_lossy()))
            .collect();
        // The last literal component of a wildcard-free pattern is the file itself
        if literal.as_os_str() == Path::new(pattern).as_os_str() {
            return literal.parent().map(Path::to_path_buf);
        }
        return Some(literal);
    }

    if let Some(index) = pattern.find("**") {
        let literal = pattern[..index].trim_end_matches('/');
        return Some(manifest_dir.join(literal));
    }

    Some(manifest_dir.to_path_buf())
}

fn has_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '['])
}
